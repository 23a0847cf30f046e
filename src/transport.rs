//! Where an encoded job goes: a spooler queue or a serial device.

use std::fmt;

use tracing::info;

use crate::consts::DEFAULT_BAUD;
use crate::error::{PrintError, Result, TransportError};
use crate::tspl::EncodedJob;
use crate::{printer, serial};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportTarget {
    /// Named print queue, fed a RAW document.
    Queue { name: String },
    /// Serial device at a fixed 8N1 framing.
    Serial { port: String, baud_rate: u32 },
}

impl TransportTarget {
    /// Build a target from optionally configured parts.
    ///
    /// Exactly one of `queue` and `port` must be set. `baud` only applies
    /// to a serial port.
    pub fn from_parts(
        queue: Option<String>,
        port: Option<String>,
        baud: Option<u32>,
    ) -> Result<Self> {
        let queue = queue.filter(|q| !q.trim().is_empty());
        let port = port.filter(|p| !p.trim().is_empty());

        match (queue, port) {
            (Some(_), Some(_)) => Err(PrintError::config(
                "both a printer queue and a serial port are configured; choose one",
            )),
            (None, None) => Err(PrintError::config(
                "no printer queue or serial port configured",
            )),
            (Some(name), None) => Ok(TransportTarget::Queue { name }),
            (None, Some(port)) => {
                let baud_rate = baud.unwrap_or(DEFAULT_BAUD);
                if baud_rate == 0 {
                    return Err(PrintError::config("baud rate must be positive"));
                }
                if !serial::supports_baud(baud_rate) {
                    return Err(PrintError::config(format!(
                        "baud rate {} is not supported on this platform",
                        baud_rate
                    )));
                }
                Ok(TransportTarget::Serial { port, baud_rate })
            }
        }
    }

    /// Deliver the whole job or fail. Opens and closes the device per call.
    pub fn send(&self, job: &EncodedJob) -> Result<(), TransportError> {
        info!(destination = %self, bytes = job.len(), "sending job");
        match self {
            TransportTarget::Queue { name } => printer::send_raw_to_printer(name, job.as_bytes()),
            TransportTarget::Serial { port, baud_rate } => {
                serial::send(port, *baud_rate, job.as_bytes())
            }
        }
    }

    pub fn queue_name(&self) -> Option<&str> {
        match self {
            TransportTarget::Queue { name } => Some(name),
            TransportTarget::Serial { .. } => None,
        }
    }
}

impl fmt::Display for TransportTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportTarget::Queue { name } => write!(f, "queue {}", name),
            TransportTarget::Serial { port, baud_rate } => write!(f, "{} @ {} baud", port, baud_rate),
        }
    }
}

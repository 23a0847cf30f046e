//! Error types for the label printing pipeline.
//!
//! Configuration and decode failures are raised before any byte reaches a
//! device. Transport failures carry enough detail to tell an unreachable
//! queue from a payload that was only partly delivered.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure of a single print job or of the watch loop's startup.
#[derive(Debug, Error)]
pub enum PrintError {
    /// Invalid or conflicting geometry, settings or target.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The source page could not be read, or the page index is out of range.
    #[error("decode error: {0}")]
    Decode(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Folder access failures. Cleanup after a job is best-effort and never
    /// produces this variant; the watch loop only raises it on startup.
    #[error("filesystem error on {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl PrintError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn filesystem(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }
}

/// Delivery failure on either transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("cannot open print queue {queue:?}: {reason}")]
    QueueOpen { queue: String, reason: String },

    /// A spooler call after the queue was opened reported failure.
    #[error("{call} failed: {reason}")]
    Spooler { call: &'static str, reason: String },

    #[error("short write: {written} of {expected} bytes accepted")]
    ShortWrite { written: usize, expected: usize },

    #[error("cannot open serial port {port:?}: {reason}")]
    SerialOpen { port: String, reason: String },

    #[error("serial write timed out after {timeout:?} ({written} of {expected} bytes sent)")]
    SerialTimeout {
        timeout: Duration,
        written: usize,
        expected: usize,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0} transport is not supported on this platform")]
    Unsupported(&'static str),
}

pub type Result<T, E = PrintError> = std::result::Result<T, E>;

//! Installed print queues, serial ports, and per-queue native resolution.

use tracing::debug;

use crate::error::TransportError;

/// Native resolution of `queue` in DPI, if the spooler reports one.
pub fn native_dpi(queue: &str) -> Option<u32> {
    let dpi = platform::native_dpi(queue);
    debug!(queue, ?dpi, "queried native resolution");
    dpi
}

/// Names of the print queues visible to this user.
pub fn list_queues() -> Result<Vec<String>, TransportError> {
    platform::list_queues()
}

/// Serial device names that can be passed as a port.
pub fn list_serial_ports() -> Vec<String> {
    platform::list_serial_ports()
}

/// Pick the default value out of an `lpoptions -l` listing's `Resolution` line,
/// e.g. `Resolution/Output Resolution: 300dpi *203dpi` → 203.
pub fn parse_lpoptions_resolution(listing: &str) -> Option<u32> {
    listing
        .lines()
        .find(|line| {
            line.split(['/', ':'])
                .next()
                .map(|key| key.trim().eq_ignore_ascii_case("resolution"))
                .unwrap_or(false)
        })
        .and_then(|line| line.split_once(':'))
        .and_then(|(_, values)| values.split_whitespace().find(|v| v.starts_with('*')))
        .and_then(|value| {
            let digits: String = value[1..].chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse().ok()
        })
        .filter(|&dpi| dpi > 0)
}

#[cfg(unix)]
mod platform {
    use std::fs;
    use std::process::Command;

    use super::parse_lpoptions_resolution;
    use crate::error::TransportError;

    const PORT_PREFIXES: &[&str] = &["ttyUSB", "ttyACM", "ttyS", "rfcomm", "cu.", "tty.usb"];

    pub fn native_dpi(queue: &str) -> Option<u32> {
        let output = Command::new("lpoptions").arg("-p").arg(queue).arg("-l").output().ok()?;
        if !output.status.success() {
            return None;
        }
        parse_lpoptions_resolution(&String::from_utf8_lossy(&output.stdout))
    }

    pub fn list_queues() -> Result<Vec<String>, TransportError> {
        let output = Command::new("lpstat").arg("-e").output().map_err(|e| {
            TransportError::Spooler {
                call: "lpstat",
                reason: e.to_string(),
            }
        })?;
        if !output.status.success() {
            return Err(TransportError::Spooler {
                call: "lpstat",
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    pub fn list_serial_ports() -> Vec<String> {
        let mut ports: Vec<String> = match fs::read_dir("/dev") {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .filter_map(|e| e.file_name().into_string().ok())
                .filter(|name| PORT_PREFIXES.iter().any(|p| name.starts_with(p)))
                .map(|name| format!("/dev/{}", name))
                .collect(),
            Err(_) => Vec::new(),
        };
        ports.sort();
        ports
    }
}

#[cfg(windows)]
mod platform {
    use std::ptr::null_mut;
    use std::slice;

    use winapi::shared::minwindef::{DWORD, LPBYTE};
    use winapi::um::fileapi::QueryDosDeviceW;
    use winapi::um::wingdi::{DM_PRINTQUALITY, DM_YRESOLUTION};
    use winapi::um::winspool::{
        EnumPrintersW, GetPrinterW, PRINTER_ENUM_CONNECTIONS, PRINTER_ENUM_LOCAL,
        PRINTER_INFO_2W, PRINTER_INFO_4W,
    };

    use crate::error::TransportError;
    use crate::printer::win32::{wide, PrinterHandle};

    /// u64 words so the spooler's structs land suitably aligned.
    fn buffer(bytes: DWORD) -> Vec<u64> {
        vec![0u64; (bytes as usize + 7) / 8]
    }

    unsafe fn from_wide(ptr: *const u16) -> String {
        if ptr.is_null() {
            return String::new();
        }
        let mut len = 0;
        while *ptr.add(len) != 0 {
            len += 1;
        }
        String::from_utf16_lossy(slice::from_raw_parts(ptr, len))
    }

    pub fn native_dpi(queue: &str) -> Option<u32> {
        let handle = PrinterHandle::open(queue).ok()?;
        let mut needed: DWORD = 0;
        unsafe {
            GetPrinterW(handle.0, 2, null_mut(), 0, &mut needed);
            if needed == 0 {
                return None;
            }
            let mut buf = buffer(needed);
            if GetPrinterW(handle.0, 2, buf.as_mut_ptr() as LPBYTE, needed, &mut needed) == 0 {
                return None;
            }
            let info = &*(buf.as_ptr() as *const PRINTER_INFO_2W);
            let devmode = info.pDevMode.as_ref()?;
            if devmode.dmFields & DM_YRESOLUTION != 0 && devmode.dmYResolution > 0 {
                return Some(devmode.dmYResolution as u32);
            }
            let quality = devmode.u1.s1().dmPrintQuality;
            if devmode.dmFields & DM_PRINTQUALITY != 0 && quality > 0 {
                return Some(quality as u32);
            }
        }
        None
    }

    pub fn list_queues() -> Result<Vec<String>, TransportError> {
        let flags = PRINTER_ENUM_LOCAL | PRINTER_ENUM_CONNECTIONS;
        let mut needed: DWORD = 0;
        let mut returned: DWORD = 0;
        unsafe {
            EnumPrintersW(flags, null_mut(), 4, null_mut(), 0, &mut needed, &mut returned);
            if needed == 0 {
                return Ok(Vec::new());
            }
            let mut buf = buffer(needed);
            if EnumPrintersW(
                flags,
                null_mut(),
                4,
                buf.as_mut_ptr() as LPBYTE,
                needed,
                &mut needed,
                &mut returned,
            ) == 0
            {
                return Err(TransportError::Spooler {
                    call: "EnumPrintersW",
                    reason: std::io::Error::last_os_error().to_string(),
                });
            }
            let infos =
                slice::from_raw_parts(buf.as_ptr() as *const PRINTER_INFO_4W, returned as usize);
            Ok(infos.iter().map(|i| from_wide(i.pPrinterName)).collect())
        }
    }

    pub fn list_serial_ports() -> Vec<String> {
        let mut target = [0u16; 512];
        (1..=255)
            .map(|n| format!("COM{}", n))
            .filter(|name| {
                let wide_name = wide(name);
                unsafe {
                    QueryDosDeviceW(wide_name.as_ptr(), target.as_mut_ptr(), target.len() as DWORD)
                        != 0
                }
            })
            .collect()
    }
}

#[cfg(not(any(unix, windows)))]
mod platform {
    use crate::error::TransportError;

    pub fn native_dpi(_queue: &str) -> Option<u32> {
        None
    }

    pub fn list_queues() -> Result<Vec<String>, TransportError> {
        Err(TransportError::Unsupported("print queue"))
    }

    pub fn list_serial_ports() -> Vec<String> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_resolution() {
        let listing = "PageSize/Media Size: *w288h432 w144h216\n\
                       Resolution/Output Resolution: 300dpi *203dpi\n\
                       Darkness/Darkness: *8 10";
        assert_eq!(parse_lpoptions_resolution(listing), Some(203));
    }

    #[test]
    fn test_parse_xy_resolution() {
        let listing = "Resolution/Resolution: *300x300dpi 600x600dpi";
        assert_eq!(parse_lpoptions_resolution(listing), Some(300));
    }

    #[test]
    fn test_parse_without_resolution_line() {
        assert_eq!(parse_lpoptions_resolution("PageSize/Media: *A4"), None);
        assert_eq!(parse_lpoptions_resolution(""), None);
    }

    #[test]
    fn test_parse_without_default_marker() {
        let listing = "Resolution/Resolution: 203dpi 300dpi";
        assert_eq!(parse_lpoptions_resolution(listing), None);
    }
}

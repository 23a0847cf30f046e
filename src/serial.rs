//! # Serial Transport
//!
//! Direct delivery to a printer on a serial device (`/dev/ttyUSB0`, `COM3`).
//!
//! ## Line Settings
//!
//! Framing is fixed: 8 data bits, no parity, one stop bit, no flow control.
//! Only the baud rate is configurable. Software flow control must stay off:
//! 0x11 (XON) and 0x13 (XOFF) appear in binary raster data.
//!
//! ## Timeouts
//!
//! The whole payload must be written and drained from the output buffer
//! within [`SERIAL_WRITE_TIMEOUT`]. A payload cut short by the deadline is a
//! failure and is never resent; a second copy would print a duplicate or
//! garbled label.
//!
//! Every job opens the port, writes, flushes and closes it again.

use std::io::{self, Write};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::consts::SERIAL_WRITE_TIMEOUT;
use crate::error::TransportError;

#[cfg(any(windows, target_os = "linux", target_os = "android"))]
const DRAIN_POLL: Duration = Duration::from_millis(10);

/// A configured, open serial device.
pub trait SerialLink: Write {
    /// Block until the device can accept more bytes or `timeout` passes.
    /// Returns `false` on timeout.
    fn wait_writable(&mut self, timeout: Duration) -> io::Result<bool>;

    /// Wait until everything written has left the output buffer or
    /// `timeout` passes. Returns `false` on timeout.
    fn drain(&mut self, timeout: Duration) -> io::Result<bool>;
}

/// Write all of `payload` to `link` before `timeout` elapses, then drain.
pub fn transmit<L: SerialLink>(
    link: &mut L,
    payload: &[u8],
    timeout: Duration,
) -> Result<(), TransportError> {
    let deadline = Instant::now() + timeout;
    let timed_out = |written| TransportError::SerialTimeout {
        timeout,
        written,
        expected: payload.len(),
    };

    let mut written = 0;
    while written < payload.len() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(timed_out(written));
        }
        match link.write(&payload[written..]) {
            Ok(0) => {
                return Err(TransportError::ShortWrite {
                    written,
                    expected: payload.len(),
                })
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if !link.wait_writable(remaining)? {
                    return Err(timed_out(written));
                }
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => return Err(timed_out(written)),
            Err(e) => return Err(e.into()),
        }
    }

    // bytes still queued in the driver count as not delivered
    let remaining = deadline.saturating_duration_since(Instant::now());
    if !link.drain(remaining)? {
        return Err(timed_out(written));
    }
    Ok(())
}

/// Open `port` at `baud`, send `payload`, close.
pub fn send(port: &str, baud: u32, payload: &[u8]) -> Result<(), TransportError> {
    #[cfg(any(unix, windows))]
    {
        let mut link = SystemPort::open(port, baud)?;
        transmit(&mut link, payload, SERIAL_WRITE_TIMEOUT)?;
        debug!(port, baud, bytes = payload.len(), "serial job sent");
        Ok(())
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = (port, baud, payload, SERIAL_WRITE_TIMEOUT);
        Err(TransportError::Unsupported("serial"))
    }
}

/// Whether this platform's serial driver can be set to `baud`.
pub fn supports_baud(baud: u32) -> bool {
    #[cfg(unix)]
    {
        unix::speed(baud).is_some()
    }

    #[cfg(not(unix))]
    {
        baud > 0
    }
}

#[cfg(unix)]
use self::unix::TtyPort as SystemPort;

#[cfg(windows)]
use self::windows::ComPort as SystemPort;

#[cfg(unix)]
mod unix {
    use std::fs::{File, OpenOptions};
    use std::io::{self, Write};
    use std::mem::MaybeUninit;
    use std::os::unix::fs::OpenOptionsExt;
    use std::os::unix::io::AsRawFd;
    use std::time::Duration;
    #[cfg(any(target_os = "linux", target_os = "android"))]
    use std::time::Instant;

    #[cfg(any(target_os = "linux", target_os = "android"))]
    use tracing::debug;

    use super::SerialLink;
    #[cfg(any(target_os = "linux", target_os = "android"))]
    use super::DRAIN_POLL;
    use crate::error::TransportError;

    /// Raw-mode TTY; closed when the file drops.
    pub struct TtyPort {
        file: File,
    }

    pub(super) fn speed(baud: u32) -> Option<libc::speed_t> {
        Some(match baud {
            1200 => libc::B1200,
            2400 => libc::B2400,
            4800 => libc::B4800,
            9600 => libc::B9600,
            19200 => libc::B19200,
            38400 => libc::B38400,
            57600 => libc::B57600,
            115200 => libc::B115200,
            230400 => libc::B230400,
            #[cfg(any(target_os = "linux", target_os = "android"))]
            460800 => libc::B460800,
            #[cfg(any(target_os = "linux", target_os = "android"))]
            921600 => libc::B921600,
            _ => return None,
        })
    }

    impl TtyPort {
        pub fn open(port: &str, baud: u32) -> Result<Self, TransportError> {
            let open_err = |reason: String| TransportError::SerialOpen {
                port: port.to_string(),
                reason,
            };
            let speed = speed(baud).ok_or_else(|| open_err(format!("unsupported baud rate {}", baud)))?;

            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
                .open(port)
                .map_err(|e| open_err(e.to_string()))?;

            configure_8n1(file.as_raw_fd(), speed).map_err(|e| open_err(e.to_string()))?;
            Ok(Self { file })
        }
    }

    /// Raw mode, 8N1, no XON/XOFF, no RTS/CTS.
    fn configure_8n1(fd: i32, speed: libc::speed_t) -> io::Result<()> {
        let mut termios = MaybeUninit::uninit();
        if unsafe { libc::tcgetattr(fd, termios.as_mut_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        let mut termios = unsafe { termios.assume_init() };

        termios.c_iflag &= !(libc::IGNBRK
            | libc::BRKINT
            | libc::PARMRK
            | libc::ISTRIP
            | libc::INLCR
            | libc::IGNCR
            | libc::ICRNL
            | libc::IXON
            | libc::IXOFF
            | libc::IXANY);
        termios.c_oflag &= !libc::OPOST;
        termios.c_lflag &= !(libc::ECHO | libc::ECHONL | libc::ICANON | libc::ISIG | libc::IEXTEN);
        termios.c_cflag &= !(libc::CSIZE | libc::PARENB | libc::CSTOPB | libc::CRTSCTS);
        termios.c_cflag |= libc::CS8 | libc::CREAD | libc::CLOCAL;

        unsafe {
            if libc::cfsetispeed(&mut termios, speed) != 0
                || libc::cfsetospeed(&mut termios, speed) != 0
            {
                return Err(io::Error::last_os_error());
            }
            if libc::tcsetattr(fd, libc::TCSANOW, &termios) != 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }

    impl Write for TtyPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.file.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.file.flush()
        }
    }

    impl SerialLink for TtyPort {
        fn wait_writable(&mut self, timeout: Duration) -> io::Result<bool> {
            let mut pfd = libc::pollfd {
                fd: self.file.as_raw_fd(),
                events: libc::POLLOUT,
                revents: 0,
            };
            let ms = timeout.as_millis().clamp(1, i32::MAX as u128) as libc::c_int;
            loop {
                let n = unsafe { libc::poll(&mut pfd, 1, ms) };
                if n < 0 {
                    let err = io::Error::last_os_error();
                    if err.kind() == io::ErrorKind::Interrupted {
                        continue;
                    }
                    return Err(err);
                }
                return Ok(n > 0);
            }
        }

        #[cfg(any(target_os = "linux", target_os = "android"))]
        fn drain(&mut self, timeout: Duration) -> io::Result<bool> {
            let fd = self.file.as_raw_fd();
            let deadline = Instant::now() + timeout;
            loop {
                let mut pending: libc::c_int = 0;
                if unsafe { libc::ioctl(fd, libc::TIOCOUTQ, &mut pending) } != 0 {
                    // driver without an output-queue count
                    return tcdrain(fd).map(|()| true);
                }
                if pending == 0 {
                    // last byte may still be in the shift register
                    return tcdrain(fd).map(|()| true);
                }
                if Instant::now() >= deadline {
                    debug!(pending, "serial output queue did not drain");
                    return Ok(false);
                }
                std::thread::sleep(DRAIN_POLL);
            }
        }

        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        fn drain(&mut self, _timeout: Duration) -> io::Result<bool> {
            tcdrain(self.file.as_raw_fd()).map(|()| true)
        }
    }

    fn tcdrain(fd: i32) -> io::Result<()> {
        if unsafe { libc::tcdrain(fd) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

#[cfg(windows)]
mod windows {
    use std::io::{self, Write};
    use std::mem::{size_of, zeroed};
    use std::ptr::null_mut;
    use std::time::{Duration, Instant};

    use winapi::shared::minwindef::{DWORD, FALSE};
    use winapi::um::commapi::{ClearCommError, GetCommState, SetCommState, SetCommTimeouts};
    use winapi::um::fileapi::{CreateFileW, FlushFileBuffers, WriteFile, OPEN_EXISTING};
    use winapi::um::handleapi::{CloseHandle, INVALID_HANDLE_VALUE};
    use winapi::um::winbase::{COMMTIMEOUTS, COMSTAT, DCB, NOPARITY, ONESTOPBIT};
    use winapi::um::winnt::{GENERIC_READ, GENERIC_WRITE, HANDLE};

    use super::{SerialLink, DRAIN_POLL};
    use crate::consts::SERIAL_WRITE_TIMEOUT;
    use crate::error::TransportError;
    use crate::printer::win32::wide;

    /// COM port handle, closed on drop.
    pub struct ComPort {
        handle: HANDLE,
    }

    impl ComPort {
        pub fn open(port: &str, baud: u32) -> Result<Self, TransportError> {
            let open_err = |reason: String| TransportError::SerialOpen {
                port: port.to_string(),
                reason,
            };
            // COM10 and above only open through the device namespace
            let path = if port.starts_with(r"\\.\") {
                port.to_string()
            } else {
                format!(r"\\.\{}", port)
            };
            let wide_path = wide(&path);

            let handle = unsafe {
                CreateFileW(
                    wide_path.as_ptr(),
                    GENERIC_READ | GENERIC_WRITE,
                    0,
                    null_mut(),
                    OPEN_EXISTING,
                    0,
                    null_mut(),
                )
            };
            if handle == INVALID_HANDLE_VALUE {
                return Err(open_err(io::Error::last_os_error().to_string()));
            }
            let port_handle = Self { handle };

            unsafe {
                let mut dcb: DCB = zeroed();
                dcb.DCBlength = size_of::<DCB>() as DWORD;
                if GetCommState(handle, &mut dcb) == 0 {
                    return Err(open_err(io::Error::last_os_error().to_string()));
                }
                dcb.BaudRate = baud;
                dcb.ByteSize = 8;
                dcb.Parity = NOPARITY;
                dcb.StopBits = ONESTOPBIT;
                dcb.set_fBinary(1);
                dcb.set_fParity(0);
                dcb.set_fOutxCtsFlow(0);
                dcb.set_fOutxDsrFlow(0);
                dcb.set_fDtrControl(1); // DTR_CONTROL_ENABLE
                dcb.set_fRtsControl(1); // RTS_CONTROL_ENABLE
                dcb.set_fOutX(0);
                dcb.set_fInX(0);
                if SetCommState(handle, &mut dcb) == 0 {
                    return Err(open_err(io::Error::last_os_error().to_string()));
                }

                let mut timeouts: COMMTIMEOUTS = zeroed();
                timeouts.WriteTotalTimeoutConstant = SERIAL_WRITE_TIMEOUT.as_millis() as DWORD;
                if SetCommTimeouts(handle, &mut timeouts) == 0 {
                    return Err(open_err(io::Error::last_os_error().to_string()));
                }
            }
            Ok(port_handle)
        }
    }

    impl Drop for ComPort {
        fn drop(&mut self) {
            unsafe {
                CloseHandle(self.handle);
            }
        }
    }

    impl Write for ComPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut written: DWORD = 0;
            let ok = unsafe {
                WriteFile(
                    self.handle,
                    buf.as_ptr() as *const _,
                    buf.len() as DWORD,
                    &mut written,
                    null_mut(),
                )
            };
            if ok == FALSE {
                return Err(io::Error::last_os_error());
            }
            // Zero bytes inside the comm timeout means the line is stuck
            if written == 0 && !buf.is_empty() {
                return Err(io::ErrorKind::TimedOut.into());
            }
            Ok(written as usize)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SerialLink for ComPort {
        fn wait_writable(&mut self, _timeout: Duration) -> io::Result<bool> {
            Ok(true)
        }

        fn drain(&mut self, timeout: Duration) -> io::Result<bool> {
            let deadline = Instant::now() + timeout;
            loop {
                let mut errors: DWORD = 0;
                let mut status: COMSTAT = unsafe { zeroed() };
                if unsafe { ClearCommError(self.handle, &mut errors, &mut status) } == 0 {
                    return Err(io::Error::last_os_error());
                }
                if status.cbOutQue == 0 {
                    if unsafe { FlushFileBuffers(self.handle) } == 0 {
                        return Err(io::Error::last_os_error());
                    }
                    return Ok(true);
                }
                if Instant::now() >= deadline {
                    return Ok(false);
                }
                std::thread::sleep(DRAIN_POLL);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Accepts up to `capacity` bytes, `chunk` per write, then would block.
    struct StubLink {
        sent: Vec<u8>,
        capacity: usize,
        chunk: usize,
        drained: bool,
        drain_stuck: bool,
        drain_budget: Option<Duration>,
        waits: usize,
    }

    impl StubLink {
        fn new(capacity: usize, chunk: usize) -> Self {
            Self {
                sent: Vec::new(),
                capacity,
                chunk,
                drained: false,
                drain_stuck: false,
                drain_budget: None,
                waits: 0,
            }
        }
    }

    impl Write for StubLink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let room = self.capacity - self.sent.len();
            if room == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = buf.len().min(room).min(self.chunk);
            self.sent.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SerialLink for StubLink {
        fn wait_writable(&mut self, _timeout: Duration) -> io::Result<bool> {
            self.waits += 1;
            Ok(false)
        }

        fn drain(&mut self, timeout: Duration) -> io::Result<bool> {
            self.drain_budget = Some(timeout);
            if self.drain_stuck {
                return Ok(false);
            }
            self.drained = true;
            Ok(true)
        }
    }

    #[test]
    fn test_chunked_writes_complete_and_drain() {
        let mut link = StubLink::new(usize::MAX, 3);
        let payload = b"SIZE 10 mm,10 mm\r\nCLS\r\n";
        transmit(&mut link, payload, Duration::from_secs(1)).unwrap();
        assert_eq!(link.sent, payload);
        assert!(link.drained);
    }

    #[test]
    fn test_drain_shares_the_write_deadline() {
        let mut link = StubLink::new(usize::MAX, 64);
        transmit(&mut link, b"CLS\r\n", Duration::from_secs(1)).unwrap();
        assert!(link.drain_budget.unwrap() <= Duration::from_secs(1));
    }

    #[test]
    fn test_stuck_output_queue_times_out_after_full_write() {
        let mut link = StubLink::new(usize::MAX, 64);
        link.drain_stuck = true;
        let err = transmit(&mut link, &[0u8; 20], Duration::from_millis(100)).unwrap_err();
        assert!(matches!(
            err,
            TransportError::SerialTimeout {
                written: 20,
                expected: 20,
                ..
            }
        ));
        assert_eq!(link.sent.len(), 20);
    }

    #[test]
    fn test_stalled_link_times_out_with_partial_count() {
        let mut link = StubLink::new(5, 64);
        let err = transmit(&mut link, &[0u8; 20], Duration::from_secs(1)).unwrap_err();
        assert!(matches!(
            err,
            TransportError::SerialTimeout {
                written: 5,
                expected: 20,
                ..
            }
        ));
        assert_eq!(link.waits, 1);
        assert!(!link.drained);
    }

    #[test]
    fn test_zero_timeout_fails_before_writing() {
        let mut link = StubLink::new(usize::MAX, 64);
        let err = transmit(&mut link, b"PRINT 1,1\r\n", Duration::ZERO).unwrap_err();
        assert!(matches!(err, TransportError::SerialTimeout { written: 0, .. }));
        assert!(link.sent.is_empty());
    }

    #[test]
    fn test_zero_length_write_is_short_write() {
        struct Dead;
        impl Write for Dead {
            fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
                Ok(0)
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        impl SerialLink for Dead {
            fn wait_writable(&mut self, _timeout: Duration) -> io::Result<bool> {
                Ok(true)
            }
            fn drain(&mut self, _timeout: Duration) -> io::Result<bool> {
                Ok(true)
            }
        }
        let err = transmit(&mut Dead, b"CLS\r\n", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, TransportError::ShortWrite { written: 0, expected: 5 }));
    }

    #[test]
    fn test_missing_device_is_open_error() {
        let err = send("/nonexistent/tty-label", 9600, b"CLS\r\n").unwrap_err();
        assert!(matches!(err, TransportError::SerialOpen { .. }));
    }
}

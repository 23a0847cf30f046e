//! Raw jobs through the operating system's print spooler.
//!
//! A job is queue → document → page → one write. Each level is a scope
//! guard: whatever happens, the page is ended before the document, and the
//! document before the queue handle is closed. A document left by a failure
//! is released through [`RawQueue::abort_document`].

use tracing::{debug, warn};

use crate::consts::JOB_TITLE;
use crate::error::TransportError;

/// An open print queue. Dropping it closes the handle.
pub trait RawQueue {
    fn start_document(&mut self, title: &str) -> Result<(), TransportError>;
    fn start_page(&mut self) -> Result<(), TransportError>;
    /// Hand `data` to the spooler, returning how many bytes it accepted.
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError>;
    fn end_page(&mut self) -> Result<(), TransportError>;
    fn end_document(&mut self) -> Result<(), TransportError>;

    /// Release a document after a failure. Spoolers that can discard a
    /// partial job do so; the rest end it normally.
    fn abort_document(&mut self) -> Result<(), TransportError> {
        self.end_document()
    }
}

pub trait Spooler {
    type Queue: RawQueue;
    fn open(&self, queue: &str) -> Result<Self::Queue, TransportError>;
}

struct DocumentScope<'q, Q: RawQueue> {
    queue: &'q mut Q,
    open: bool,
}

impl<'q, Q: RawQueue> DocumentScope<'q, Q> {
    fn start(queue: &'q mut Q, title: &str) -> Result<Self, TransportError> {
        queue.start_document(title)?;
        Ok(Self { queue, open: true })
    }

    fn start_page(&mut self) -> Result<PageScope<'_, Q>, TransportError> {
        self.queue.start_page()?;
        Ok(PageScope {
            queue: &mut *self.queue,
            open: true,
        })
    }

    fn finish(mut self) -> Result<(), TransportError> {
        self.open = false;
        self.queue.end_document()
    }
}

impl<Q: RawQueue> Drop for DocumentScope<'_, Q> {
    fn drop(&mut self) {
        if self.open {
            if let Err(e) = self.queue.abort_document() {
                warn!("releasing spooler document after failure: {}", e);
            }
        }
    }
}

struct PageScope<'d, Q: RawQueue> {
    queue: &'d mut Q,
    open: bool,
}

impl<Q: RawQueue> PageScope<'_, Q> {
    fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        self.queue.write(data)
    }

    fn finish(mut self) -> Result<(), TransportError> {
        self.open = false;
        self.queue.end_page()
    }
}

impl<Q: RawQueue> Drop for PageScope<'_, Q> {
    fn drop(&mut self) {
        if self.open {
            if let Err(e) = self.queue.end_page() {
                warn!("ending spooler page after failure: {}", e);
            }
        }
    }
}

/// Write `payload` as a single raw document on an already-open queue.
pub fn deliver<Q: RawQueue>(queue: &mut Q, title: &str, payload: &[u8]) -> Result<(), TransportError> {
    let mut document = DocumentScope::start(queue, title)?;
    {
        let mut page = document.start_page()?;
        let written = page.write(payload)?;
        if written != payload.len() {
            return Err(TransportError::ShortWrite {
                written,
                expected: payload.len(),
            });
        }
        page.finish()?;
    }
    document.finish()
}

/// Open `queue` on `spooler` and send `payload` as one raw job.
pub fn send_with<S: Spooler>(spooler: &S, queue: &str, payload: &[u8]) -> Result<(), TransportError> {
    let mut handle = spooler.open(queue)?;
    deliver(&mut handle, JOB_TITLE, payload)?;
    debug!(queue, bytes = payload.len(), "raw job spooled");
    Ok(())
}

/// Send raw bytes to the named printer through the platform spooler.
pub fn send_raw_to_printer(queue: &str, payload: &[u8]) -> Result<(), TransportError> {
    #[cfg(any(unix, windows))]
    {
        send_with(&SystemSpooler, queue, payload)
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = (queue, payload);
        Err(TransportError::Unsupported("print queue"))
    }
}

#[cfg(windows)]
pub use self::win32::Win32Spooler as SystemSpooler;

#[cfg(unix)]
pub use self::cups::CupsSpooler as SystemSpooler;

#[cfg(windows)]
pub(crate) mod win32 {
    use std::ffi::OsStr;
    use std::io;
    use std::iter::once;
    use std::os::windows::ffi::OsStrExt;
    use std::ptr::null_mut;

    use winapi::shared::minwindef::DWORD;
    use winapi::shared::ntdef::LPWSTR;
    use winapi::um::winnt::HANDLE;
    use winapi::um::winspool::{
        ClosePrinter, EndDocPrinter, EndPagePrinter, OpenPrinterW, StartDocPrinterW,
        StartPagePrinter, WritePrinter, DOC_INFO_1W,
    };

    use super::{RawQueue, Spooler};
    use crate::consts::RAW_DATATYPE;
    use crate::error::TransportError;

    pub(crate) fn wide(s: &str) -> Vec<u16> {
        OsStr::new(s).encode_wide().chain(once(0)).collect()
    }

    fn last_error() -> String {
        io::Error::last_os_error().to_string()
    }

    fn call_failed(call: &'static str) -> TransportError {
        TransportError::Spooler {
            call,
            reason: last_error(),
        }
    }

    /// Printer handle from `OpenPrinterW`, closed on drop.
    pub(crate) struct PrinterHandle(pub(crate) HANDLE);

    impl PrinterHandle {
        pub(crate) fn open(name: &str) -> Result<Self, TransportError> {
            let mut wide_name = wide(name);
            let mut handle: HANDLE = null_mut();
            let ok = unsafe { OpenPrinterW(wide_name.as_mut_ptr(), &mut handle, null_mut()) };
            if ok == 0 {
                return Err(TransportError::QueueOpen {
                    queue: name.to_string(),
                    reason: last_error(),
                });
            }
            Ok(Self(handle))
        }
    }

    impl Drop for PrinterHandle {
        fn drop(&mut self) {
            unsafe {
                ClosePrinter(self.0);
            }
        }
    }

    pub struct Win32Spooler;

    impl Spooler for Win32Spooler {
        type Queue = PrinterHandle;

        fn open(&self, queue: &str) -> Result<PrinterHandle, TransportError> {
            PrinterHandle::open(queue)
        }
    }

    impl RawQueue for PrinterHandle {
        fn start_document(&mut self, title: &str) -> Result<(), TransportError> {
            let mut wide_doc = wide(title);
            let mut wide_raw = wide(RAW_DATATYPE);
            let mut doc_info = DOC_INFO_1W {
                pDocName: wide_doc.as_mut_ptr() as LPWSTR,
                pOutputFile: null_mut(),
                pDatatype: wide_raw.as_mut_ptr() as LPWSTR,
            };
            let job = unsafe { StartDocPrinterW(self.0, 1, &mut doc_info as *mut _ as *mut _) };
            if job == 0 {
                return Err(call_failed("StartDocPrinterW"));
            }
            Ok(())
        }

        fn start_page(&mut self) -> Result<(), TransportError> {
            if unsafe { StartPagePrinter(self.0) } == 0 {
                return Err(call_failed("StartPagePrinter"));
            }
            Ok(())
        }

        fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
            let mut written: DWORD = 0;
            let ok = unsafe {
                WritePrinter(
                    self.0,
                    data.as_ptr() as *mut _,
                    data.len() as DWORD,
                    &mut written,
                )
            };
            if ok == 0 {
                return Err(call_failed("WritePrinter"));
            }
            Ok(written as usize)
        }

        fn end_page(&mut self) -> Result<(), TransportError> {
            if unsafe { EndPagePrinter(self.0) } == 0 {
                return Err(call_failed("EndPagePrinter"));
            }
            Ok(())
        }

        fn end_document(&mut self) -> Result<(), TransportError> {
            if unsafe { EndDocPrinter(self.0) } == 0 {
                return Err(call_failed("EndDocPrinter"));
            }
            Ok(())
        }
    }
}

#[cfg(unix)]
mod cups {
    use std::io::Write;
    use std::process::{Child, Command, Stdio};

    use tracing::debug;

    use super::{RawQueue, Spooler};
    use crate::error::TransportError;

    /// CUPS through its `lp` client: `lp -d <queue> -o raw`, payload on stdin.
    pub struct CupsSpooler;

    pub struct LpQueue {
        queue: String,
        child: Option<Child>,
    }

    impl Spooler for CupsSpooler {
        type Queue = LpQueue;

        fn open(&self, queue: &str) -> Result<LpQueue, TransportError> {
            if queue.is_empty() || queue.starts_with('-') {
                return Err(TransportError::QueueOpen {
                    queue: queue.to_string(),
                    reason: "invalid queue name".to_string(),
                });
            }
            Ok(LpQueue {
                queue: queue.to_string(),
                child: None,
            })
        }
    }

    impl LpQueue {
        fn child(&mut self, call: &'static str) -> Result<&mut Child, TransportError> {
            self.child.as_mut().ok_or(TransportError::Spooler {
                call,
                reason: "no document started".to_string(),
            })
        }
    }

    impl RawQueue for LpQueue {
        fn start_document(&mut self, title: &str) -> Result<(), TransportError> {
            let child = Command::new("lp")
                .arg("-d")
                .arg(&self.queue)
                .arg("-o")
                .arg("raw")
                .arg("-t")
                .arg(title)
                .stdin(Stdio::piped())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .spawn()
                .map_err(|e| TransportError::QueueOpen {
                    queue: self.queue.clone(),
                    reason: format!("cannot run lp: {}", e),
                })?;
            self.child = Some(child);
            Ok(())
        }

        fn start_page(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
            let child = self.child("write")?;
            let stdin = child.stdin.as_mut().ok_or(TransportError::Spooler {
                call: "write",
                reason: "lp stdin already closed".to_string(),
            })?;
            let mut written = 0;
            while written < data.len() {
                match stdin.write(&data[written..]) {
                    Ok(0) => break,
                    Ok(n) => written += n,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                    Err(e) if written > 0 => {
                        debug!("lp stdin closed after {} bytes: {}", written, e);
                        break;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(written)
        }

        fn end_page(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        fn end_document(&mut self) -> Result<(), TransportError> {
            let mut child = match self.child.take() {
                Some(child) => child,
                None => return Ok(()),
            };
            drop(child.stdin.take());
            let output = child.wait_with_output()?;
            if !output.status.success() {
                return Err(TransportError::Spooler {
                    call: "lp",
                    reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                });
            }
            debug!(
                queue = %self.queue,
                "lp accepted job"
            );
            Ok(())
        }

        /// Kill `lp` before its stdin closes, so nothing partial is queued.
        fn abort_document(&mut self) -> Result<(), TransportError> {
            if let Some(mut child) = self.child.take() {
                debug!(queue = %self.queue, "cancelling lp job");
                let _ = child.kill();
                child.wait()?;
            }
            Ok(())
        }
    }

    impl Drop for LpQueue {
        fn drop(&mut self) {
            if let Err(e) = self.abort_document() {
                debug!("reaping lp: {}", e);
            }
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    /// Records every spooler call; accepts at most `accept` bytes per write.
    struct StubQueue {
        log: Log,
        accept: usize,
        fail_on: Option<&'static str>,
        discards: bool,
    }

    impl StubQueue {
        fn call(&mut self, name: &'static str) -> Result<(), TransportError> {
            self.log.borrow_mut().push(name.to_string());
            if self.fail_on == Some(name) {
                return Err(TransportError::Spooler {
                    call: name,
                    reason: "stub failure".to_string(),
                });
            }
            Ok(())
        }
    }

    impl RawQueue for StubQueue {
        fn start_document(&mut self, _title: &str) -> Result<(), TransportError> {
            self.call("start_document")
        }
        fn start_page(&mut self) -> Result<(), TransportError> {
            self.call("start_page")
        }
        fn write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
            self.call("write")?;
            Ok(data.len().min(self.accept))
        }
        fn end_page(&mut self) -> Result<(), TransportError> {
            self.call("end_page")
        }
        fn end_document(&mut self) -> Result<(), TransportError> {
            self.call("end_document")
        }
        fn abort_document(&mut self) -> Result<(), TransportError> {
            if self.discards {
                self.call("abort_document")
            } else {
                self.end_document()
            }
        }
    }

    impl Drop for StubQueue {
        fn drop(&mut self) {
            self.log.borrow_mut().push("close".to_string());
        }
    }

    struct StubSpooler {
        log: Log,
        accept: usize,
        fail_on: Option<&'static str>,
        discards: bool,
    }

    impl Spooler for StubSpooler {
        type Queue = StubQueue;
        fn open(&self, queue: &str) -> Result<StubQueue, TransportError> {
            self.log.borrow_mut().push("open".to_string());
            if self.fail_on == Some("open") {
                return Err(TransportError::QueueOpen {
                    queue: queue.to_string(),
                    reason: "stub failure".to_string(),
                });
            }
            Ok(StubQueue {
                log: self.log.clone(),
                accept: self.accept,
                fail_on: self.fail_on,
                discards: self.discards,
            })
        }
    }

    fn run(accept: usize, fail_on: Option<&'static str>) -> (Result<(), TransportError>, Vec<String>) {
        run_with(accept, fail_on, false)
    }

    fn run_with(
        accept: usize,
        fail_on: Option<&'static str>,
        discards: bool,
    ) -> (Result<(), TransportError>, Vec<String>) {
        let log: Log = Rc::default();
        let spooler = StubSpooler {
            log: log.clone(),
            accept,
            fail_on,
            discards,
        };
        let result = send_with(&spooler, "Label", b"SIZE 1 mm,1 mm\r\n");
        let calls = log.borrow().clone();
        (result, calls)
    }

    #[test]
    fn test_successful_job_releases_in_reverse_order() {
        let (result, calls) = run(usize::MAX, None);
        assert!(result.is_ok());
        assert_eq!(
            calls,
            ["open", "start_document", "start_page", "write", "end_page", "end_document", "close"]
        );
    }

    #[test]
    fn test_short_write_is_failure() {
        let (result, calls) = run(4, None);
        assert!(matches!(
            result,
            Err(TransportError::ShortWrite { written: 4, expected: 16 })
        ));
        assert_eq!(
            calls,
            ["open", "start_document", "start_page", "write", "end_page", "end_document", "close"]
        );
    }

    #[test]
    fn test_short_write_discards_document_when_supported() {
        let (result, calls) = run_with(4, None, true);
        assert!(matches!(result, Err(TransportError::ShortWrite { .. })));
        assert_eq!(
            calls,
            ["open", "start_document", "start_page", "write", "end_page", "abort_document", "close"]
        );
    }

    #[test]
    fn test_successful_job_never_aborts() {
        let (result, calls) = run_with(usize::MAX, None, true);
        assert!(result.is_ok());
        assert!(!calls.iter().any(|c| c == "abort_document"));
    }

    #[test]
    fn test_page_failure_still_closes_document_and_queue() {
        let (result, calls) = run(usize::MAX, Some("start_page"));
        assert!(result.is_err());
        assert_eq!(calls, ["open", "start_document", "start_page", "end_document", "close"]);
    }

    #[test]
    fn test_write_error_unwinds_all_scopes() {
        let (result, calls) = run(usize::MAX, Some("write"));
        assert!(matches!(result, Err(TransportError::Spooler { call: "write", .. })));
        assert_eq!(
            calls,
            ["open", "start_document", "start_page", "write", "end_page", "end_document", "close"]
        );
    }

    #[test]
    fn test_open_failure_touches_nothing_else() {
        let (result, calls) = run(usize::MAX, Some("open"));
        assert!(matches!(result, Err(TransportError::QueueOpen { .. })));
        assert_eq!(calls, ["open"]);
    }

    #[test]
    fn test_end_document_failure_is_reported() {
        let (result, calls) = run(usize::MAX, Some("end_document"));
        assert!(result.is_err());
        // finish() consumed the scope; no second end_document from Drop
        assert_eq!(
            calls,
            ["open", "start_document", "start_page", "write", "end_page", "end_document", "close"]
        );
    }
}

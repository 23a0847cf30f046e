//! # Watch Folder
//!
//! Turns a directory into an unattended print queue.
//!
//! ## Lifecycle
//!
//! `Idle → Scanning → Waiting ⇄ Processing → Stopped`
//!
//! - **Scanning**: files already in the folder are queued, by name.
//! - **Waiting**: the queue is empty; poll again every [`POLL_INTERVAL`].
//! - **Processing**: one file at a time, in the order notifications arrived.
//!
//! Filesystem notifications only append to the pending queue; all I/O
//! happens on the processing loop.
//!
//! ## Per File
//!
//! 1. Gone already? Skip it.
//! 2. Wait [`SETTLE_DELAY`] so a slow writer can finish.
//! 3. Run the job.
//! 4. Success deletes the file. Failure moves it to `errors/`, replacing any
//!    earlier failure with the same name, so a bad file is tried once per
//!    arrival.
//!
//! Cancellation is observed while waiting or settling; a job that already
//! started runs to completion.

use std::collections::VecDeque;
use std::ffi::OsStr;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Local};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::consts::{ERRORS_DIR, POLL_INTERVAL, SETTLE_DELAY};
use crate::error::{PrintError, Result};
use crate::job::JobRunner;

#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub folder: PathBuf,
    /// Lowercase extensions without the dot.
    pub extensions: Vec<String>,
    pub settle_delay: Duration,
    pub poll_interval: Duration,
}

impl WatchOptions {
    pub fn new<S: AsRef<str>>(folder: impl Into<PathBuf>, extensions: &[S]) -> Self {
        Self {
            folder: folder.into(),
            extensions: extensions
                .iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            settle_delay: SETTLE_DELAY,
            poll_interval: POLL_INTERVAL,
        }
    }

    pub fn errors_dir(&self) -> PathBuf {
        self.folder.join(ERRORS_DIR)
    }

    pub fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(OsStr::to_str)
            .map(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
pub struct WatchQueueEntry {
    pub path: PathBuf,
    pub arrived: DateTime<Local>,
}

/// FIFO shared between the notification callback and the processing loop.
#[derive(Debug, Clone, Default)]
pub struct PendingQueue {
    inner: Arc<Mutex<VecDeque<WatchQueueEntry>>>,
}

impl PendingQueue {
    fn lock(&self) -> MutexGuard<'_, VecDeque<WatchQueueEntry>> {
        // a panicked holder cannot leave the deque half-updated
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, path: PathBuf) {
        self.lock().push_back(WatchQueueEntry {
            path,
            arrived: Local::now(),
        });
    }

    /// Remove and return the oldest entry.
    pub fn pop(&self) -> Option<WatchQueueEntry> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Scanning,
    Waiting,
    Processing,
    Stopped,
}

impl fmt::Display for WatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WatchState::Idle => "idle",
            WatchState::Scanning => "scanning",
            WatchState::Waiting => "waiting",
            WatchState::Processing => "processing",
            WatchState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Printed,
    Quarantined,
    Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchSummary {
    pub printed: usize,
    pub quarantined: usize,
    pub skipped: usize,
}

impl WatchSummary {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Printed => self.printed += 1,
            Outcome::Quarantined => self.quarantined += 1,
            Outcome::Skipped => self.skipped += 1,
        }
    }
}

pub struct WatchEngine<R: JobRunner> {
    options: WatchOptions,
    runner: Arc<R>,
    queue: PendingQueue,
    state: WatchState,
}

impl<R: JobRunner> WatchEngine<R> {
    pub fn new(options: WatchOptions, runner: Arc<R>) -> Self {
        Self {
            options,
            runner,
            queue: PendingQueue::default(),
            state: WatchState::Idle,
        }
    }

    /// Handle to the pending queue; pushes behave like notifications.
    pub fn queue(&self) -> PendingQueue {
        self.queue.clone()
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    fn set_state(&mut self, state: WatchState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "watch state");
            self.state = state;
        }
    }

    /// Watch until `cancel` fires. Errors only if the folder cannot be
    /// watched at startup.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<WatchSummary> {
        let folder = self.options.folder.clone();
        let meta = fs::metadata(&folder).map_err(|e| PrintError::filesystem(&folder, e))?;
        if !meta.is_dir() {
            return Err(PrintError::filesystem(
                &folder,
                io::Error::new(io::ErrorKind::InvalidInput, "not a directory"),
            ));
        }

        // Subscribe before scanning so nothing lands in the gap; a file seen
        // by both is skipped the second time because it is gone by then.
        let _watcher = self.subscribe()?;

        self.set_state(WatchState::Scanning);
        let existing = scan_existing(&self.options)
            .map_err(|e| PrintError::filesystem(&folder, e))?;
        info!(
            folder = %folder.display(),
            existing = existing.len(),
            "watching folder"
        );
        for path in existing {
            self.queue.push(path);
        }

        let mut summary = WatchSummary::default();
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let entry = match self.queue.pop() {
                Some(entry) => entry,
                None => {
                    self.set_state(WatchState::Waiting);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.options.poll_interval) => continue,
                    }
                }
            };

            self.set_state(WatchState::Processing);
            match self.process(entry, &cancel).await {
                Some(outcome) => summary.record(outcome),
                None => break,
            }
        }

        self.set_state(WatchState::Stopped);
        info!(
            printed = summary.printed,
            quarantined = summary.quarantined,
            skipped = summary.skipped,
            "watch stopped"
        );
        Ok(summary)
    }

    fn subscribe(&self) -> Result<RecommendedWatcher> {
        let queue = self.queue.clone();
        let options = self.options.clone();
        let folder = &self.options.folder;
        let to_fs_error = |e: notify::Error| {
            PrintError::filesystem(folder, io::Error::new(io::ErrorKind::Other, e))
        };

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for path in arrivals(&event) {
                    if options.accepts(path) {
                        debug!(path = %path.display(), "file arrived");
                        queue.push(path.to_path_buf());
                    }
                }
            }
            Err(e) => warn!("watch notification error: {}", e),
        })
        .map_err(to_fs_error)?;
        watcher
            .watch(folder, RecursiveMode::NonRecursive)
            .map_err(to_fs_error)?;
        Ok(watcher)
    }

    /// `None` if cancelled before the job started.
    async fn process(&self, entry: WatchQueueEntry, cancel: &CancellationToken) -> Option<Outcome> {
        let path = entry.path;
        if !path.is_file() {
            debug!(path = %path.display(), "already gone, skipping");
            return Some(Outcome::Skipped);
        }

        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(self.options.settle_delay) => {}
        }
        if !path.is_file() {
            debug!(path = %path.display(), "removed while settling, skipping");
            return Some(Outcome::Skipped);
        }

        info!(
            path = %path.display(),
            queued_at = %entry.arrived.format("%H:%M:%S%.3f"),
            "processing"
        );
        let runner = self.runner.clone();
        let job_path = path.clone();
        let result = match tokio::task::spawn_blocking(move || runner.run(&job_path)).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(e) => Err(format!("print job aborted: {}", e)),
        };

        let name = display_name(&path);
        match result {
            Ok(()) => {
                if let Err(e) = fs::remove_file(&path) {
                    warn!(path = %path.display(), "printed but could not delete: {}", e);
                }
                println!("[{}] Printed {}", timestamp(), name);
                Some(Outcome::Printed)
            }
            Err(reason) => {
                debug!(path = %path.display(), "print failed: {}", reason);
                eprintln!("[{}] Error: {}: {}", timestamp(), name, reason);
                match quarantine(&self.options.errors_dir(), &path) {
                    Ok(dest) => info!(to = %dest.display(), "moved to errors"),
                    Err(e) => warn!(path = %path.display(), "could not quarantine: {}", e),
                }
                Some(Outcome::Quarantined)
            }
        }
    }
}

/// Paths a notification brings into the folder: creations and rename targets.
fn arrivals(event: &Event) -> &[PathBuf] {
    match event.kind {
        EventKind::Create(_) => &event.paths[..],
        EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Any)) => &event.paths[..],
        // [from, to]
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let n = event.paths.len();
            &event.paths[n.saturating_sub(1)..]
        }
        _ => &[],
    }
}

/// Accepted regular files directly in the folder, sorted by name.
pub fn scan_existing(options: &WatchOptions) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(&options.folder)? {
        let entry = entry?;
        if entry.file_type()?.is_file() && options.accepts(&entry.path()) {
            files.push(entry.path());
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Move `file` into `errors_dir` under its own name, replacing a prior copy.
pub fn quarantine(errors_dir: &Path, file: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(errors_dir)?;
    let name = file
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let dest = errors_dir.join(name);
    if dest.exists() {
        fs::remove_file(&dest)?;
    }
    if fs::rename(file, &dest).is_err() {
        fs::copy(file, &dest)?;
        fs::remove_file(file)?;
    }
    Ok(dest)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn timestamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, ModifyKind};
    use pretty_assertions::assert_eq;

    fn options(dir: &Path) -> WatchOptions {
        WatchOptions::new(dir, &["png", ".JPG"])
    }

    #[test]
    fn test_extension_filter_is_case_insensitive() {
        let opts = options(Path::new("/in"));
        assert!(opts.accepts(Path::new("/in/a.PNG")));
        assert!(opts.accepts(Path::new("/in/b.jpg")));
        assert!(!opts.accepts(Path::new("/in/c.txt")));
        assert!(!opts.accepts(Path::new("/in/errors")));
    }

    #[test]
    fn test_pending_queue_is_fifo() {
        let queue = PendingQueue::default();
        queue.push("z.png".into());
        queue.push("a.png".into());
        queue.push("m.png".into());
        assert_eq!(queue.len(), 3);

        let order: Vec<PathBuf> = std::iter::from_fn(|| queue.pop()).map(|e| e.path).collect();
        assert_eq!(order, vec![PathBuf::from("z.png"), "a.png".into(), "m.png".into()]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_arrivals_from_events() {
        let create = Event::new(EventKind::Create(CreateKind::File)).add_path("/in/a.png".into());
        assert_eq!(arrivals(&create), &[PathBuf::from("/in/a.png")]);

        let rename = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path("/tmp/a.part".into())
            .add_path("/in/a.png".into());
        assert_eq!(arrivals(&rename), &[PathBuf::from("/in/a.png")]);

        let write = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path("/in/a.png".into());
        assert!(arrivals(&write).is_empty());

        let moved_out = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
            .add_path("/in/a.png".into());
        assert!(arrivals(&moved_out).is_empty());
    }

    #[test]
    fn test_scan_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.png", "a.png", "notes.txt"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        fs::create_dir(dir.path().join("c.png")).unwrap();

        let found = scan_existing(&options(dir.path())).unwrap();
        assert_eq!(found, vec![dir.path().join("a.png"), dir.path().join("b.png")]);
    }

    #[test]
    fn test_quarantine_replaces_previous_failure() {
        let dir = tempfile::tempdir().unwrap();
        let errors = dir.path().join(ERRORS_DIR);
        let file = dir.path().join("label.png");

        fs::write(&file, b"first").unwrap();
        quarantine(&errors, &file).unwrap();
        fs::write(&file, b"second").unwrap();
        let dest = quarantine(&errors, &file).unwrap();

        assert_eq!(dest, errors.join("label.png"));
        assert!(!file.exists());
        assert_eq!(fs::read(&dest).unwrap(), b"second");
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = WatchSummary::default();
        summary.record(Outcome::Printed);
        summary.record(Outcome::Quarantined);
        summary.record(Outcome::Printed);
        assert_eq!(
            summary,
            WatchSummary {
                printed: 2,
                quarantined: 1,
                skipped: 0
            }
        );
    }
}

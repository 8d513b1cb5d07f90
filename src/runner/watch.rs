//! Polling watcher for live mode.
//!
//! [`SnapshotWatcher`] records the modification times of every entry below a
//! set of directories and compares them against fresh snapshots on a
//! background thread. It implements [`Waitable`], so the scheduler can block
//! on it alongside running processes.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use camino::Utf8PathBuf;
use tracing::debug;
use walkdir::WalkDir;

use crate::process::{Completion, Waitable, wait_for_any};

/// Default delay between two snapshots.
pub const WATCH_INTERVAL: Duration = Duration::from_millis(250);

type Snapshot = BTreeMap<PathBuf, Option<SystemTime>>;

fn snapshot(roots: &[Utf8PathBuf]) -> Snapshot {
    roots
        .iter()
        .filter(|root| root.exists())
        .flat_map(|root| WalkDir::new(root).sort_by_file_name())
        .filter_map(Result::ok)
        .map(|entry| {
            let modified = entry.metadata().ok().and_then(|meta| meta.modified().ok());
            (entry.into_path(), modified)
        })
        .collect()
}

/// Fires once anything below the watched directories is added, removed or
/// modified.
#[derive(Debug)]
pub struct SnapshotWatcher {
    roots: Vec<Utf8PathBuf>,
    changed: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SnapshotWatcher {
    /// Take the baseline snapshot of `roots` and start polling every
    /// `interval`.
    #[must_use]
    pub fn start(roots: Vec<Utf8PathBuf>, interval: Duration) -> Self {
        let baseline = snapshot(&roots);
        let changed = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(AtomicBool::new(false));
        let worker = {
            let watched = roots.clone();
            let flag = Arc::clone(&changed);
            let halt = Arc::clone(&stop);
            thread::spawn(move || {
                while !halt.load(Ordering::Acquire) {
                    thread::sleep(interval);
                    if snapshot(&watched) != baseline {
                        debug!(roots = ?watched, "watched files changed");
                        flag.store(true, Ordering::Release);
                        break;
                    }
                }
            })
        };
        Self {
            roots,
            changed,
            stop,
            worker: Some(worker),
        }
    }

    /// Directories being watched.
    #[must_use]
    pub fn roots(&self) -> &[Utf8PathBuf] {
        &self.roots
    }

    /// Whether a change has been seen.
    #[must_use]
    pub fn has_changed(&self) -> bool {
        self.changed.load(Ordering::Acquire)
    }

    /// Block until a change is seen.
    ///
    /// # Errors
    ///
    /// Propagates errors from the shared wait loop.
    pub fn wait(&mut self) -> io::Result<()> {
        wait_for_any(&mut [self as &mut dyn Waitable]).map(drop)
    }
}

impl Waitable for SnapshotWatcher {
    fn try_complete(&mut self) -> io::Result<Option<Completion>> {
        Ok(self.has_changed().then_some(Completion::DONE))
    }
}

impl Drop for SnapshotWatcher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            drop(worker.join());
        }
    }
}

//! Waiting on heterogeneous handles.
//!
//! Running processes and file watchers both implement [`Waitable`], so the
//! scheduler can block on "whichever finishes first" without knowing what
//! each handle is. On Linux, when every handle is a process, the wait blocks
//! in `waitid(P_ALL, WEXITED | WNOWAIT)`; otherwise it polls.

use std::io;
use std::process::ExitStatus;
use std::thread;
use std::time::{Duration, Instant};

use super::RunningAction;

/// Sleep between polls when a native wait is not possible.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Time given to interrupted processes before they are killed.
pub const GRACE_PERIOD: Duration = Duration::from_secs(3);

/// How a handle finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// Whether the handle finished successfully.
    pub success: bool,
    /// Exit code, when the handle is a process that exited normally.
    pub code: Option<i32>,
}

impl Completion {
    /// A successful completion without an exit code.
    pub const DONE: Self = Self {
        success: true,
        code: None,
    };
}

impl From<ExitStatus> for Completion {
    fn from(status: ExitStatus) -> Self {
        Self {
            success: status.success(),
            code: status.code(),
        }
    }
}

/// Something the scheduler can wait on.
pub trait Waitable {
    /// Check for completion without blocking.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the status cannot be queried.
    fn try_complete(&mut self) -> io::Result<Option<Completion>>;

    /// Process id when the handle is a child process.
    fn pid(&self) -> Option<u32> {
        None
    }
}

/// Block until one of `handles` completes and return its index.
///
/// # Errors
///
/// Returns an error when `handles` is empty or a handle cannot be polled.
pub fn wait_for_any(handles: &mut [&mut dyn Waitable]) -> io::Result<(usize, Completion)> {
    if handles.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "wait_for_any needs at least one handle",
        ));
    }
    let all_processes = handles.iter().all(|handle| handle.pid().is_some());
    let mut native = all_processes;
    loop {
        for (index, handle) in handles.iter_mut().enumerate() {
            if let Some(completion) = handle.try_complete()? {
                return Ok((index, completion));
            }
        }
        // A native wake without one of our handles finishing means some other
        // child is waitable; poll once before trying the native wait again.
        if native && block_on_any_child() {
            native = false;
        } else {
            thread::sleep(POLL_INTERVAL);
            native = all_processes;
        }
    }
}

#[cfg(target_os = "linux")]
fn block_on_any_child() -> bool {
    // SAFETY: siginfo_t is plain old data and zero is a valid bit pattern.
    let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
    // SAFETY: `info` is a valid, writable siginfo_t; WNOWAIT leaves the child
    // waitable so `Child::try_wait` still observes its status.
    let rc = unsafe { libc::waitid(libc::P_ALL, 0, &raw mut info, libc::WEXITED | libc::WNOWAIT) };
    rc == 0
}

#[cfg(not(target_os = "linux"))]
const fn block_on_any_child() -> bool {
    false
}

/// Interrupt every running action, give them a shared grace period, then
/// kill and reap whatever is left.
pub fn terminate_all<'a, I>(running: I, grace: Duration)
where
    I: IntoIterator<Item = &'a mut RunningAction>,
{
    let mut actions: Vec<&mut RunningAction> = running.into_iter().collect();
    for action in &mut actions {
        action.interrupt();
    }
    let deadline = Instant::now() + grace;
    for action in actions {
        action.reap_by(deadline);
    }
}

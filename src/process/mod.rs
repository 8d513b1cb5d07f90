//! External process supervision.
//!
//! [`spawn`] launches an [`Invocation`] with stdin closed and stderr
//! captured to an anonymous temporary file. Stdout shares the capture
//! unless the run is verbose or the invocation redirects it to a file. The
//! resulting [`RunningAction`] is polled through the [`Waitable`] trait and
//! can be interrupted with a grace period by [`terminate_all`].

mod redaction;
mod wait;

use std::fs::{self, File};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::Instant;

use camino::Utf8PathBuf;
use itertools::Itertools;
use thiserror::Error;
use tracing::debug;
use wait_timeout::ChildExt;

pub use wait::{Completion, GRACE_PERIOD, POLL_INTERVAL, Waitable, terminate_all, wait_for_any};

use redaction::{redact_argument, redact_env_value};

/// A fully resolved external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    /// Program name or path.
    pub program: String,
    /// Arguments after the program.
    pub args: Vec<String>,
    /// Environment overrides.
    pub env: Vec<(String, String)>,
    /// Working directory; inherited when unset.
    pub cwd: Option<Utf8PathBuf>,
    /// File receiving stdout instead of the capture.
    pub stdout: Option<Utf8PathBuf>,
}

impl Invocation {
    /// Invocation of `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the child.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Run the child in `dir`.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Send stdout to `path`.
    #[must_use]
    pub fn stdout_to(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.stdout = Some(path.into());
        self
    }

    /// Program followed by its arguments.
    #[must_use]
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }

    /// Shell-style rendering with secrets redacted, for logs and failures.
    #[must_use]
    pub fn command_line(&self) -> String {
        let env = self
            .env
            .iter()
            .map(|(key, value)| format!("{key}={}", redact_env_value(key, value)));
        let words: Vec<String> = std::iter::once(self.program.clone())
            .chain(self.args.iter().map(|arg| redact_argument(arg).into_owned()))
            .collect();
        let command = shlex::try_join(words.iter().map(String::as_str))
            .unwrap_or_else(|_| words.join(" "));
        let mut line = env.chain(std::iter::once(command)).join(" ");
        if let Some(cwd) = &self.cwd {
            line = format!("(cd {cwd} && {line})");
        }
        if let Some(stdout) = &self.stdout {
            line = format!("{line} > {stdout}");
        }
        line
    }
}

/// Failure to launch a process.
#[derive(Debug, Error)]
pub enum SpawnError {
    /// The program was not found.
    #[error("`{program}` was not found")]
    MissingExecutable {
        /// The program that was looked up.
        program: String,
    },
    /// The program exists but may not be executed.
    #[error("permission denied when launching `{program}`")]
    PermissionDenied {
        /// The program that was rejected.
        program: String,
    },
    /// Any other launch failure.
    #[error("failed to launch `{program}`")]
    Io {
        /// The program that failed.
        program: String,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// The output capture could not be set up.
    #[error("failed to capture output of `{program}`")]
    Capture {
        /// The program whose output was being captured.
        program: String,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
}

/// A launched process and its captured stderr.
#[derive(Debug)]
pub struct RunningAction {
    child: Child,
    stderr: File,
    command_line: String,
}

impl RunningAction {
    /// Process id.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Redacted command line the process was started with.
    #[must_use]
    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    /// Everything the process wrote to stderr so far.
    #[must_use]
    pub fn captured_stderr(&mut self) -> String {
        let mut bytes = Vec::new();
        let read = self
            .stderr
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.stderr.read_to_end(&mut bytes));
        if let Err(err) = read {
            debug!("failed to read captured stderr: {err}");
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Ask the process to stop: SIGINT on Unix, a kill elsewhere.
    pub fn interrupt(&mut self) {
        #[cfg(unix)]
        {
            if let Ok(pid) = libc::pid_t::try_from(self.child.id()) {
                // SAFETY: sending a signal to our own child's pid has no memory effects.
                let rc = unsafe { libc::kill(pid, libc::SIGINT) };
                if rc != 0 {
                    debug!(pid, "failed to deliver SIGINT");
                }
            }
        }
        #[cfg(not(unix))]
        {
            if let Err(err) = self.child.kill() {
                debug!("failed to kill child: {err}");
            }
        }
    }

    /// Wait until `deadline` for the process to exit, then kill and reap it.
    pub fn reap_by(&mut self, deadline: Instant) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.child.wait_timeout(remaining) {
            Ok(Some(_)) => return,
            Ok(None) => debug!(pid = self.id(), "grace period elapsed; killing"),
            Err(err) => debug!("failed to wait for child: {err}"),
        }
        if let Err(err) = self.child.kill() {
            debug!("failed to kill child: {err}");
        }
        if let Err(err) = self.child.wait() {
            debug!("failed to reap child: {err}");
        }
    }

    fn try_status(&mut self) -> io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }
}

/// Launch `invocation`.
///
/// # Errors
///
/// Returns [`SpawnError`] when the capture file cannot be created or the
/// program cannot be started.
pub fn spawn(invocation: &Invocation, verbose: bool) -> Result<RunningAction, SpawnError> {
    let program = invocation.program.clone();
    let capture = |source: io::Error| SpawnError::Capture {
        program: program.clone(),
        source,
    };
    let stderr = tempfile::tempfile().map_err(capture)?;
    let stdout = match &invocation.stdout {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_str().is_empty()) {
                fs::create_dir_all(parent).map_err(capture)?;
            }
            Stdio::from(File::create(path).map_err(capture)?)
        }
        None if verbose => Stdio::inherit(),
        None => Stdio::from(stderr.try_clone().map_err(capture)?),
    };

    let mut command = Command::new(&invocation.program);
    command
        .args(&invocation.args)
        .envs(invocation.env.iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(Stdio::from(stderr.try_clone().map_err(capture)?));
    if let Some(cwd) = &invocation.cwd {
        command.current_dir(cwd);
    }
    let command_line = invocation.command_line();
    debug!("spawning {command_line}");
    let child = command.spawn().map_err(|source| match source.kind() {
        ErrorKind::NotFound => SpawnError::MissingExecutable {
            program: program.clone(),
        },
        ErrorKind::PermissionDenied => SpawnError::PermissionDenied {
            program: program.clone(),
        },
        _ => SpawnError::Io {
            program: program.clone(),
            source,
        },
    })?;
    Ok(RunningAction {
        child,
        stderr,
        command_line,
    })
}

impl Waitable for RunningAction {
    fn try_complete(&mut self) -> io::Result<Option<Completion>> {
        Ok(self.try_status()?.map(Completion::from))
    }

    fn pid(&self) -> Option<u32> {
        Some(self.id())
    }
}

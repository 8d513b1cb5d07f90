//! Errors that abort execution.

use std::io;

use miette::Diagnostic;
use thiserror::Error;

use crate::process::SpawnError;
use crate::recipe::ConfigurationError;

/// A step whose action did not succeed.
#[derive(Debug, Error)]
pub enum ActionFailure {
    /// The process exited unsuccessfully.
    #[error("{desc} exited with {}", describe_code(.code.as_ref()))]
    Exit {
        /// Step description.
        desc: String,
        /// Redacted command line.
        command: String,
        /// Exit code; `None` when terminated by a signal.
        code: Option<i32>,
        /// Captured stderr after the step's filter.
        stderr: String,
    },
    /// An in-process action returned an error.
    #[error("{desc} failed")]
    Raised {
        /// Step description.
        desc: String,
        /// The action's error.
        #[source]
        source: anyhow::Error,
    },
    /// The program could not be found.
    #[error("{desc}: `{program}` was not found")]
    MissingExecutable {
        /// Step description.
        desc: String,
        /// The missing program.
        program: String,
    },
    /// The program may not be executed.
    #[error("{desc}: permission denied when launching `{program}`")]
    PermissionDenied {
        /// Step description.
        desc: String,
        /// The rejected program.
        program: String,
    },
    /// The process could not be launched for another reason.
    #[error("{desc}: failed to start")]
    Spawn {
        /// Step description.
        desc: String,
        /// The launch failure.
        #[source]
        source: SpawnError,
    },
}

fn describe_code(code: Option<&i32>) -> String {
    code.map_or_else(|| "a signal".to_owned(), |value| format!("exit code {value}"))
}

impl ActionFailure {
    pub(crate) fn from_spawn(step: &str, error: SpawnError) -> Self {
        let desc = step.to_owned();
        match error {
            SpawnError::MissingExecutable { program } => Self::MissingExecutable { desc, program },
            SpawnError::PermissionDenied { program } => Self::PermissionDenied { desc, program },
            source @ (SpawnError::Io { .. } | SpawnError::Capture { .. }) => {
                Self::Spawn { desc, source }
            }
        }
    }

    /// Description of the failed step.
    #[must_use]
    pub fn desc(&self) -> &str {
        match self {
            Self::Exit { desc, .. }
            | Self::Raised { desc, .. }
            | Self::MissingExecutable { desc, .. }
            | Self::PermissionDenied { desc, .. }
            | Self::Spawn { desc, .. } => desc,
        }
    }

    /// Redacted command line, when the step ran a process.
    #[must_use]
    pub fn command(&self) -> Option<&str> {
        match self {
            Self::Exit { command, .. } => Some(command),
            _ => None,
        }
    }

    /// Text shown under the failure: captured stderr or the error chain.
    #[must_use]
    pub fn details(&self) -> String {
        match self {
            Self::Exit { stderr, .. } => stderr.clone(),
            Self::Raised { source, .. } => format!("{source:#}"),
            Self::Spawn { source, .. } => source.to_string(),
            Self::MissingExecutable { .. } | Self::PermissionDenied { .. } => self.to_string(),
        }
    }
}

/// Why a build did not complete.
#[derive(Debug, Error, Diagnostic)]
pub enum BuildError {
    /// The recipe is malformed.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Configuration(#[from] ConfigurationError),
    /// A step failed.
    #[error(transparent)]
    Action(#[from] ActionFailure),
    /// Waiting on running steps failed.
    #[error("failed while waiting for running steps")]
    Io(#[from] io::Error),
}

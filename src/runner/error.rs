//! Error types for the runner module.

use camino::Utf8PathBuf;
use itertools::Itertools as _;
use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while turning command-line options into a build context.
#[derive(Debug, Error, Diagnostic)]
pub enum RunnerError {
    /// The requested variant is not one of the built-in variants.
    #[error("unknown build variant `{name}`")]
    #[diagnostic(
        code(kiln::runner::unknown_variant),
        help("available variants: {}", .known.join(", "))
    )]
    UnknownVariant {
        /// The requested name.
        name: String,
        /// Every variant that could have been chosen.
        known: Vec<String>,
    },

    /// The project directory does not exist or cannot be resolved.
    #[error("cannot use {} as the project directory", .path.display())]
    #[diagnostic(code(kiln::runner::project_dir))]
    ProjectDir {
        /// The directory as given.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The project directory is not valid UTF-8.
    #[error("project directory {} is not valid UTF-8", .path.display())]
    #[diagnostic(code(kiln::runner::non_utf8))]
    NonUtf8 {
        /// The offending directory.
        path: PathBuf,
    },

    /// Waiting for source changes failed.
    #[error("failed to watch {} for changes", .roots.iter().join(", "))]
    #[diagnostic(code(kiln::runner::watch))]
    Watch {
        /// Watched directories.
        roots: Vec<Utf8PathBuf>,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

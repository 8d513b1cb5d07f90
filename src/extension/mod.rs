//! Pluggable contributors to the build graph.
//!
//! An [`Extension`] injects steps and arguments at four fixed points of the
//! planning pipeline. Extensions are created by factories held in an
//! [`ExtensionRegistry`]; loading resolves `requires` relationships so a base
//! extension always runs its hooks before the extensions deriving from it.
//! Extensions coordinate through a [`ReadinessBoard`] instead of naming each
//! other's internals.

mod dependency;
mod readiness;
mod registry;
mod tests_suite;

use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

use crate::context::BuildContext;
use crate::plan::Plan;
use crate::recipe::{ConfigurationError, Recipe};
use crate::scan::SourceMap;

pub use dependency::{
    ConfigureSpec, ConfigureSystem, DependencyExtension, DependencyManifest, FetchSpec, OptionValue,
};
pub use readiness::ReadinessBoard;
pub use registry::{ExtensionRegistry, ExtensionSet, Factory, Loader};
pub use tests_suite::TestsExtension;

/// State shared with every hook invocation.
pub struct HookContext<'a> {
    /// Options of the current run.
    pub build: &'a BuildContext,
    /// Paths published by extensions for others to depend on.
    pub readiness: &'a mut ReadinessBoard,
}

/// A contributor to the build graph.
///
/// Every hook defaults to doing nothing. Errors returned from a hook are
/// logged and do not stop the pipeline.
pub trait Extension {
    /// Name the extension was registered under.
    fn name(&self) -> &str;

    /// Add steps before sources are scanned.
    ///
    /// # Errors
    ///
    /// Any error is reported as a warning.
    fn hook_recipe(
        &mut self,
        _ctx: &mut HookContext<'_>,
        _recipe: &mut Recipe,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Inspect or annotate scanned files.
    ///
    /// # Errors
    ///
    /// Any error is reported as a warning.
    fn hook_srcs(
        &mut self,
        _ctx: &mut HookContext<'_>,
        _files: &mut SourceMap,
        _recipe: &mut Recipe,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Adjust planned objects and binaries before their steps exist.
    ///
    /// # Errors
    ///
    /// Any error is reported as a warning.
    fn hook_plan(
        &mut self,
        _ctx: &mut HookContext<'_>,
        _files: &SourceMap,
        _plan: &mut Plan,
        _recipe: &mut Recipe,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Add step-level edges once compile, link and run steps exist.
    ///
    /// # Errors
    ///
    /// Any error is reported as a warning.
    fn hook_final(
        &mut self,
        _ctx: &mut HookContext<'_>,
        _files: &SourceMap,
        _plan: &Plan,
        _recipe: &mut Recipe,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Failures while discovering or loading extensions.
#[derive(Debug, Error, Diagnostic)]
pub enum ExtensionError {
    /// No factory is registered under the name.
    #[error("unknown extension `{name}`")]
    #[diagnostic(code(kiln::extension::unknown))]
    Unknown {
        /// The requested name.
        name: String,
    },

    /// The extension failed to load earlier in this session.
    #[error("extension `{name}` is unavailable because it failed to load")]
    #[diagnostic(code(kiln::extension::unavailable))]
    Unavailable {
        /// The failed extension.
        name: String,
    },

    /// A manifest could not be read.
    #[error("failed to read extension manifest {path}")]
    #[diagnostic(code(kiln::extension::read))]
    Read {
        /// Manifest path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A manifest is not valid YAML for a dependency description.
    #[error("invalid extension manifest `{name}`: {message}")]
    #[diagnostic(code(kiln::extension::manifest))]
    Manifest {
        /// Extension name derived from the manifest file name.
        name: String,
        /// Parser message.
        message: String,
    },

    /// The manifest's `include_pattern` is not a valid regular expression.
    #[error("extension `{name}` has an invalid include pattern")]
    #[diagnostic(code(kiln::extension::pattern))]
    InvalidPattern {
        /// Extension name.
        name: String,
        /// Regex compilation error.
        #[source]
        source: regex::Error,
    },

    /// Loading would loop through `requires`.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Configuration(#[from] ConfigurationError),
}

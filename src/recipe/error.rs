//! Configuration errors raised while assembling or pruning a recipe.

use camino::Utf8PathBuf;
use itertools::Itertools;
use miette::Diagnostic;
use thiserror::Error;

/// A recipe that cannot be executed as described.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigurationError {
    /// A step needs a path that neither exists nor is produced by any step.
    #[error("\"{step}\" requires `{input}` but it doesn't exist and there is no recipe to build it")]
    #[diagnostic(
        code(kiln::recipe::unsatisfiable_dependency),
        help("add a step that outputs this path, or create it before building")
    )]
    UnsatisfiableDependency {
        /// Description of the step with the missing input.
        step: String,
        /// The missing input.
        input: Utf8PathBuf,
    },

    /// Two steps share a shortcut.
    #[error("shortcut `{shortcut}` is already used by \"{existing}\"")]
    #[diagnostic(code(kiln::recipe::duplicate_shortcut))]
    DuplicateShortcut {
        /// The contested shortcut.
        shortcut: String,
        /// Description of the step that registered it first.
        existing: String,
    },

    /// Two steps claim the same output.
    #[error("`{output}` is produced by both \"{existing}\" and \"{step}\"")]
    #[diagnostic(
        code(kiln::recipe::duplicate_output),
        help("every output path must be produced by exactly one step")
    )]
    DuplicateOutput {
        /// The contested output path.
        output: Utf8PathBuf,
        /// Description of the step that registered it first.
        existing: String,
        /// Description of the rejected step.
        step: String,
    },

    /// The step has no description and its action has no name to derive one.
    #[error("step has no description and its action is unnamed")]
    #[diagnostic(code(kiln::recipe::missing_description))]
    MissingDescription,

    /// The step has no shortcut and its action has no name to derive one.
    #[error("step \"{step}\" has no shortcut and its action is unnamed")]
    #[diagnostic(code(kiln::recipe::missing_shortcut))]
    MissingShortcut {
        /// Description of the step.
        step: String,
    },

    /// The shortcut is not usable as a file name.
    #[error("shortcut `{shortcut}` is not a valid file name")]
    #[diagnostic(
        code(kiln::recipe::invalid_shortcut),
        help("shortcuts name fingerprint files; use one path component other than `.` or `..`")
    )]
    InvalidShortcut {
        /// The rejected shortcut.
        shortcut: String,
    },

    /// No step matches the requested target.
    #[error("{target} is not a valid target. {}", describe_hints(.close_matches, .targets))]
    #[diagnostic(code(kiln::recipe::unknown_target))]
    UnknownTarget {
        /// The requested target.
        target: String,
        /// Shortcuts similar to the target.
        close_matches: Vec<String>,
        /// Every shortcut, reported when nothing is close.
        targets: Vec<String>,
    },

    /// A step with the given shortcut does not exist.
    #[error("no step has the shortcut `{shortcut}`")]
    #[diagnostic(code(kiln::recipe::unknown_step))]
    UnknownStep {
        /// The requested shortcut.
        shortcut: String,
    },

    /// Two sources map to the same object file.
    #[error("`{first}` and `{second}` both compile to `{object}`")]
    #[diagnostic(
        code(kiln::plan::object_collision),
        help("objects are named after the source stem; rename one of the sources")
    )]
    ObjectCollision {
        /// The contested object path.
        object: Utf8PathBuf,
        /// Source planned first.
        first: Utf8PathBuf,
        /// Source planned second.
        second: Utf8PathBuf,
    },

    /// Steps depend on each other in a loop.
    #[error("dependency cycle detected: {}", .cycle.iter().join(" -> "))]
    #[diagnostic(
        code(kiln::recipe::cycle),
        help("break the loop by removing one of the inputs")
    )]
    Cycle {
        /// Shortcuts along the cycle, first repeated at the end.
        cycle: Vec<String>,
    },

    /// Extensions require each other in a loop.
    #[error("extension cycle detected: {}", .chain.iter().join(" -> "))]
    #[diagnostic(code(kiln::extension::cycle))]
    ExtensionCycle {
        /// Extension names from the outermost request to the repeated one.
        chain: Vec<String>,
    },
}

fn describe_hints(close_matches: &[String], targets: &[String]) -> String {
    if close_matches.is_empty() {
        format!("Valid targets: {}.", targets.join(", "))
    } else {
        format!("Close matches: {}.", close_matches.join(", "))
    }
}

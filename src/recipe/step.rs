//! Steps and the builder used to declare them.

use std::collections::BTreeSet;
use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};

use super::action::Action;

/// Identifier of a step: the number of steps in the recipe when it was added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StepId(pub(crate) usize);

impl StepId {
    /// Position at insertion time.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub(crate) type Cleanup = Box<dyn FnMut() -> anyhow::Result<()>>;
pub(crate) type StderrFilter = Box<dyn Fn(&str) -> bool>;

/// One node of the build graph.
pub struct Step {
    pub(crate) id: StepId,
    pub(crate) desc: String,
    pub(crate) shortcut: String,
    pub(crate) outputs: BTreeSet<Utf8PathBuf>,
    pub(crate) inputs: BTreeSet<Utf8PathBuf>,
    pub(crate) action: Action,
    pub(crate) cleanup: Option<Cleanup>,
    pub(crate) stderr_filter: Option<StderrFilter>,
}

impl Step {
    /// Identifier assigned by the recipe.
    #[must_use]
    pub const fn id(&self) -> StepId {
        self.id
    }

    /// Human-readable description, e.g. `Compiling main.o`.
    #[must_use]
    pub fn desc(&self) -> &str {
        &self.desc
    }

    /// Unique short name usable as a target.
    #[must_use]
    pub fn shortcut(&self) -> &str {
        &self.shortcut
    }

    /// Paths this step produces.
    #[must_use]
    pub const fn outputs(&self) -> &BTreeSet<Utf8PathBuf> {
        &self.outputs
    }

    /// Paths this step reads.
    #[must_use]
    pub const fn inputs(&self) -> &BTreeSet<Utf8PathBuf> {
        &self.inputs
    }

    /// Add an input edge.
    pub fn add_input(&mut self, path: impl Into<Utf8PathBuf>) {
        self.inputs.insert(path.into());
    }

    /// Whether the step has no outputs and therefore always runs.
    #[must_use]
    pub fn is_phony(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Whether this step produces `path`.
    #[must_use]
    pub fn produces(&self, path: &Utf8Path) -> bool {
        self.outputs.contains(path)
    }

    /// Whether any output of `other` is an input of this step.
    #[must_use]
    pub fn depends_on(&self, other: &Self) -> bool {
        other
            .outputs
            .iter()
            .any(|output| self.inputs.contains(output))
    }

    /// The step's action.
    pub const fn action_mut(&mut self) -> &mut Action {
        &mut self.action
    }

    /// The step's action.
    #[must_use]
    pub const fn action(&self) -> &Action {
        &self.action
    }

    /// Run the cleanup callback, if any.
    ///
    /// # Errors
    ///
    /// Propagates the callback's error.
    pub fn run_cleanup(&mut self) -> anyhow::Result<()> {
        self.cleanup.as_mut().map_or(Ok(()), |cleanup| cleanup())
    }

    /// Apply the stderr filter to captured output, line by line.
    #[must_use]
    pub fn filter_stderr(&self, stderr: &str) -> String {
        match &self.stderr_filter {
            Some(keep) => stderr
                .lines()
                .filter(|&line| keep(line))
                .map(|line| format!("{line}\n"))
                .collect(),
            None => stderr.to_owned(),
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("id", &self.id)
            .field("desc", &self.desc)
            .field("shortcut", &self.shortcut)
            .field("outputs", &self.outputs)
            .field("inputs", &self.inputs)
            .field("action", &self.action)
            .field("cleanup", &self.cleanup.is_some())
            .field("stderr_filter", &self.stderr_filter.is_some())
            .finish()
    }
}

/// Declaration of a step, consumed by [`Recipe::add_step`](super::Recipe::add_step).
pub struct StepSpec {
    pub(crate) action: Action,
    pub(crate) desc: Option<String>,
    pub(crate) shortcut: Option<String>,
    pub(crate) outputs: BTreeSet<Utf8PathBuf>,
    pub(crate) inputs: BTreeSet<Utf8PathBuf>,
    pub(crate) cleanup: Option<Cleanup>,
    pub(crate) stderr_filter: Option<StderrFilter>,
}

impl StepSpec {
    /// Start a declaration for `action`.
    #[must_use]
    pub const fn new(action: Action) -> Self {
        Self {
            action,
            desc: None,
            shortcut: None,
            outputs: BTreeSet::new(),
            inputs: BTreeSet::new(),
            cleanup: None,
            stderr_filter: None,
        }
    }

    /// Set the description.
    #[must_use]
    pub fn desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }

    /// Set the shortcut.
    #[must_use]
    pub fn shortcut(mut self, shortcut: impl Into<String>) -> Self {
        self.shortcut = Some(shortcut.into());
        self
    }

    /// Add one output.
    #[must_use]
    pub fn output(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.outputs.insert(path.into());
        self
    }

    /// Add several outputs.
    #[must_use]
    pub fn outputs<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Utf8PathBuf>,
    {
        self.outputs.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Add one input.
    #[must_use]
    pub fn input(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.inputs.insert(path.into());
        self
    }

    /// Add several inputs.
    #[must_use]
    pub fn inputs<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Utf8PathBuf>,
    {
        self.inputs.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Callback run when the step's action fails.
    #[must_use]
    pub fn cleanup<F>(mut self, f: F) -> Self
    where
        F: FnMut() -> anyhow::Result<()> + 'static,
    {
        self.cleanup = Some(Box::new(f));
        self
    }

    /// Keep only stderr lines for which `keep` returns `true`.
    #[must_use]
    pub fn stderr_filter<F>(mut self, keep: F) -> Self
    where
        F: Fn(&str) -> bool + 'static,
    {
        self.stderr_filter = Some(Box::new(keep));
        self
    }
}

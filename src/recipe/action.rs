//! Step actions: external processes or in-process callables.

use std::fmt;

use crate::process::Invocation;

/// What an in-process callable asks the scheduler to do next.
#[derive(Debug)]
pub enum ActionResult {
    /// The work is complete.
    Done,
    /// Launch this process and treat its exit as the step's completion.
    Spawn(Invocation),
}

type Callable = Box<dyn FnMut() -> anyhow::Result<ActionResult>>;

/// The body of an action.
pub enum ActionKind {
    /// Launch an external process.
    Process(Invocation),
    /// Run Rust code on the control thread.
    Callable(Callable),
}

/// Work performed by a step, with an optional intrinsic name used to
/// default the step's description and shortcut.
pub struct Action {
    name: Option<String>,
    kind: ActionKind,
}

impl Action {
    /// Action that launches `invocation`.
    #[must_use]
    pub const fn process(invocation: Invocation) -> Self {
        Self {
            name: None,
            kind: ActionKind::Process(invocation),
        }
    }

    /// Action that runs `f` to completion on the control thread.
    pub fn from_fn<F>(mut f: F) -> Self
    where
        F: FnMut() -> anyhow::Result<()> + 'static,
    {
        Self::deferred(move || f().map(|()| ActionResult::Done))
    }

    /// Action whose callable decides at run time whether to spawn a process.
    pub fn deferred<F>(f: F) -> Self
    where
        F: FnMut() -> anyhow::Result<ActionResult> + 'static,
    {
        Self {
            name: None,
            kind: ActionKind::Callable(Box::new(f)),
        }
    }

    /// Attach an intrinsic name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Intrinsic name, when one was given.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The action body.
    pub const fn kind_mut(&mut self) -> &mut ActionKind {
        &mut self.kind
    }

    /// The action body.
    #[must_use]
    pub const fn kind(&self) -> &ActionKind {
        &self.kind
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Action");
        out.field("name", &self.name);
        match &self.kind {
            ActionKind::Process(invocation) => out.field("process", invocation),
            ActionKind::Callable(_) => out.field("callable", &"<fn>"),
        };
        out.finish()
    }
}

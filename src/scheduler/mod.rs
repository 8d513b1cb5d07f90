//! Incremental, bounded-parallel execution of a recipe.
//!
//! Steps move from blocked to ready once every producer of their inputs has
//! finished. Ready steps are dispatched in recipe order while the job budget
//! allows; up-to-date steps finish without running. When the budget is
//! exhausted or nothing is ready, the scheduler blocks on whichever running
//! process (or the optional watcher) completes first.

mod error;

use std::collections::VecDeque;
use std::fs;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use tracing::{debug, info, warn};

pub use error::{ActionFailure, BuildError};

use crate::context::default_jobs;
use crate::fingerprint::ChangeDetector;
use crate::process::{
    self, GRACE_PERIOD, Invocation, RunningAction, Waitable, terminate_all, wait_for_any,
};
use crate::recipe::{ActionKind, ActionResult, Recipe, Step};
use crate::status::{FailureReport, StatusReporter};

/// Statistics of a completed build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSummary {
    /// Steps in the executed recipe.
    pub total: usize,
    /// Shortcuts of steps whose actions ran, in completion order.
    pub executed: Vec<String>,
    /// Steps found up to date.
    pub skipped: usize,
    /// Wall time of the build.
    pub elapsed: Duration,
}

/// How an execution ended without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Every step finished.
    Completed(BuildSummary),
    /// The watcher fired; running steps were terminated.
    Interrupted,
}

/// Executes recipes.
pub struct Scheduler<'r> {
    detector: ChangeDetector,
    reporter: &'r dyn StatusReporter,
    jobs: NonZeroUsize,
    verbose: bool,
    grace: Duration,
}

enum Started {
    UpToDate,
    Finished,
    Running(RunningAction),
}

impl<'r> Scheduler<'r> {
    /// Scheduler using `detector` for dirty checks and reporting to
    /// `reporter`, with one job per logical core.
    #[must_use]
    pub fn new(detector: ChangeDetector, reporter: &'r dyn StatusReporter) -> Self {
        Self {
            detector,
            reporter,
            jobs: default_jobs(),
            verbose: false,
            grace: GRACE_PERIOD,
        }
    }

    /// Limit concurrently running actions.
    #[must_use]
    pub const fn with_jobs(mut self, jobs: NonZeroUsize) -> Self {
        self.jobs = jobs;
        self
    }

    /// Let process stdout through instead of capturing it.
    #[must_use]
    pub const fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Time interrupted actions get before being killed.
    #[must_use]
    pub const fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Run every step of `recipe` that is out of date.
    ///
    /// When `watcher` completes while steps are running, they are
    /// terminated and [`Outcome::Interrupted`] is returned.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Configuration`] for a cyclic recipe,
    /// [`BuildError::Action`] when a step fails, and [`BuildError::Io`]
    /// when running processes cannot be polled.
    pub fn execute(
        &self,
        recipe: &mut Recipe,
        mut watcher: Option<&mut dyn Waitable>,
    ) -> Result<Outcome, BuildError> {
        recipe.validate_acyclic()?;
        let start = Instant::now();
        let mut run = Execution::new(recipe.steps_mut());
        self.reporter.build_started(run.steps.len());

        loop {
            if run.running.len() < self.jobs.get() {
                if let Some(index) = run.ready.pop_front() {
                    self.dispatch(&mut run, index)?;
                    continue;
                }
            }
            if run.running.is_empty() {
                break;
            }

            let names: Vec<&str> = run
                .running
                .iter()
                .filter_map(|(index, _)| run.steps.get(*index).map(Step::shortcut))
                .collect();
            self.reporter.waiting(&names);

            let (which, completion) = {
                let mut handles: Vec<&mut dyn Waitable> = run
                    .running
                    .iter_mut()
                    .map(|(_, action)| action as &mut dyn Waitable)
                    .collect();
                if let Some(handle) = watcher.as_deref_mut() {
                    handles.push(handle);
                }
                wait_for_any(&mut handles)?
            };
            if which >= run.running.len() {
                info!("watched sources changed; interrupting build");
                self.reporter.interrupted();
                run.terminate(self.grace);
                return Ok(Outcome::Interrupted);
            }

            let (index, mut action) = run.running.remove(which);
            if completion.success {
                self.finish(&mut run, index, true);
            } else {
                let failure = run.step_mut(index).map_or_else(
                    || ActionFailure::Raised {
                        desc: String::new(),
                        source: anyhow::anyhow!("finished process has no step"),
                    },
                    |step| ActionFailure::Exit {
                        desc: step.desc().to_owned(),
                        command: action.command_line().to_owned(),
                        code: completion.code,
                        stderr: step.filter_stderr(&action.captured_stderr()),
                    },
                );
                return Err(self.abort(&mut run, index, failure));
            }
        }

        let summary = BuildSummary {
            total: run.steps.len(),
            executed: run.executed,
            skipped: run.skipped,
            elapsed: start.elapsed(),
        };
        self.reporter.build_finished(&summary);
        Ok(Outcome::Completed(summary))
    }

    fn dispatch(&self, run: &mut Execution<'_>, index: usize) -> Result<(), BuildError> {
        let Some(step) = run.step_mut(index) else {
            return Ok(());
        };
        match self.start(step) {
            Ok(Started::UpToDate) => self.finish(run, index, false),
            Ok(Started::Finished) => self.finish(run, index, true),
            Ok(Started::Running(action)) => run.running.push((index, action)),
            Err(failure) => return Err(self.abort(run, index, failure)),
        }
        Ok(())
    }

    fn start(&self, step: &mut Step) -> Result<Started, ActionFailure> {
        let Some(reason) = self.reason_to_run(step) else {
            debug!(shortcut = step.shortcut(), "up to date");
            return Ok(Started::UpToDate);
        };
        debug!(shortcut = step.shortcut(), "running because {reason}");
        self.reporter.step_started(step.desc());
        prepare_outputs(step)?;

        let desc = step.desc().to_owned();
        let invocation = match step.action_mut().kind_mut() {
            ActionKind::Process(invocation) => invocation.clone(),
            ActionKind::Callable(callable) => match callable() {
                Ok(ActionResult::Done) => return Ok(Started::Finished),
                Ok(ActionResult::Spawn(invocation)) => invocation,
                Err(source) => return Err(ActionFailure::Raised { desc, source }),
            },
        };
        self.launch(&desc, &invocation).map(Started::Running)
    }

    fn launch(&self, desc: &str, invocation: &Invocation) -> Result<RunningAction, ActionFailure> {
        if self.verbose {
            info!("{}", invocation.command_line());
        }
        process::spawn(invocation, self.verbose)
            .map_err(|error| ActionFailure::from_spawn(desc, error))
    }

    fn reason_to_run(&self, step: &Step) -> Option<String> {
        if step.inputs().is_empty() && step.outputs().iter().any(|output| !output.exists()) {
            return Some("some of its outputs don't exist".to_owned());
        }
        if step.is_phony() {
            return Some("it has no outputs".to_owned());
        }
        let dirty = self.detector.dirty_inputs(step);
        (!dirty.is_empty()).then(|| {
            let names: Vec<&str> = dirty.iter().map(|path| path.as_str()).collect();
            format!("{} changed", names.join(", "))
        })
    }

    fn finish(&self, run: &mut Execution<'_>, index: usize, ran: bool) {
        if let Some(step) = run.steps.get(index) {
            if let Err(err) = self.detector.record(step) {
                warn!(shortcut = step.shortcut(), "failed to record fingerprints: {err}");
            }
            self.reporter.step_finished(step.desc());
            if ran {
                run.executed.push(step.shortcut().to_owned());
            } else {
                run.skipped += 1;
            }
        }
        run.release_dependents(index);
    }

    fn abort(&self, run: &mut Execution<'_>, index: usize, failure: ActionFailure) -> BuildError {
        if let Some(step) = run.step_mut(index) {
            if let Err(err) = step.run_cleanup() {
                warn!(shortcut = step.shortcut(), "cleanup failed: {err:#}");
            }
        }
        run.terminate(self.grace);
        let details = failure.details();
        self.reporter.step_failed(&FailureReport {
            desc: failure.desc(),
            command: failure.command(),
            details: &details,
        });
        BuildError::Action(failure)
    }
}

fn prepare_outputs(step: &Step) -> Result<(), ActionFailure> {
    for output in step.outputs() {
        if let Some(parent) = output.parent().filter(|parent| !parent.as_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {parent}"))
                .map_err(|source| ActionFailure::Raised {
                    desc: step.desc().to_owned(),
                    source,
                })?;
        }
    }
    Ok(())
}

/// Mutable state of one execution.
struct Execution<'s> {
    steps: &'s mut [Step],
    blockers: Vec<usize>,
    dependents: Vec<Vec<usize>>,
    ready: VecDeque<usize>,
    running: Vec<(usize, RunningAction)>,
    executed: Vec<String>,
    skipped: usize,
}

impl<'s> Execution<'s> {
    fn new(steps: &'s mut [Step]) -> Self {
        let blockers: Vec<usize> = steps
            .iter()
            .enumerate()
            .map(|(a, step)| {
                steps
                    .iter()
                    .enumerate()
                    .filter(|&(b, other)| a != b && step.depends_on(other))
                    .count()
            })
            .collect();
        let dependents: Vec<Vec<usize>> = steps
            .iter()
            .enumerate()
            .map(|(b, producer)| {
                steps
                    .iter()
                    .enumerate()
                    .filter(|&(a, step)| a != b && step.depends_on(producer))
                    .map(|(a, _)| a)
                    .collect()
            })
            .collect();
        let ready = blockers
            .iter()
            .enumerate()
            .filter(|&(_, count)| *count == 0)
            .map(|(index, _)| index)
            .collect();
        Self {
            steps,
            blockers,
            dependents,
            ready,
            running: Vec::new(),
            executed: Vec::new(),
            skipped: 0,
        }
    }

    fn step_mut(&mut self, index: usize) -> Option<&mut Step> {
        self.steps.get_mut(index)
    }

    fn release_dependents(&mut self, index: usize) {
        let Some(dependents) = self.dependents.get(index) else {
            return;
        };
        for &dependent in dependents {
            if let Some(count) = self.blockers.get_mut(dependent) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    self.ready.push_back(dependent);
                }
            }
        }
    }

    fn terminate(&mut self, grace: Duration) {
        if self.running.is_empty() {
            return;
        }
        debug!(count = self.running.len(), "terminating running steps");
        terminate_all(self.running.iter_mut().map(|(_, action)| action), grace);
        self.running.clear();
    }
}

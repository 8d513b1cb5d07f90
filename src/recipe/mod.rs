//! The step graph.
//!
//! A [`Recipe`] is an ordered list of [`Step`]s plus the set of paths that
//! were generated by the build and may be removed by [`Recipe::clean`]. It is
//! rebuilt from scratch on every planning pass and pruned in place by
//! [`Recipe::set_target`] before execution.
//!
//! Edges are implicit: a step depends on every step whose outputs intersect
//! its inputs.

mod action;
mod cycle;
mod error;
mod step;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info};

pub use action::{Action, ActionKind, ActionResult};
pub use error::ConfigurationError;
pub use step::{Step, StepId, StepSpec};

/// Number of close matches offered for an unknown target.
const MAX_TARGET_HINTS: usize = 3;
/// Minimum normalised similarity for a shortcut to count as a close match.
const TARGET_HINT_THRESHOLD: f64 = 0.6;

/// Ordered steps and generated paths of one build.
#[derive(Debug)]
pub struct Recipe {
    steps: Vec<Step>,
    generated: BTreeSet<Utf8PathBuf>,
    root: Utf8PathBuf,
}

impl Recipe {
    /// Empty recipe for the project rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            steps: Vec::new(),
            generated: BTreeSet::new(),
            root: root.into(),
        }
    }

    /// Project root used to match targets given as relative paths.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Append a step.
    ///
    /// A missing description or shortcut defaults from the action's name
    /// (`Running <name>` and `<name>`).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] when the description or shortcut is
    /// missing and cannot be derived, the shortcut is not a plain file name,
    /// or the shortcut or an output is already taken.
    pub fn add_step(&mut self, spec: StepSpec) -> Result<StepId, ConfigurationError> {
        let name = spec.action.name().map(str::to_owned);
        let desc = spec
            .desc
            .or_else(|| name.as_ref().map(|action| format!("Running {action}")))
            .ok_or(ConfigurationError::MissingDescription)?;
        let shortcut = spec
            .shortcut
            .or(name)
            .ok_or_else(|| ConfigurationError::MissingShortcut { step: desc.clone() })?;
        if !is_file_name(&shortcut) {
            return Err(ConfigurationError::InvalidShortcut { shortcut });
        }
        if let Some(existing) = self.step(&shortcut) {
            return Err(ConfigurationError::DuplicateShortcut {
                existing: existing.desc.clone(),
                shortcut,
            });
        }
        for output in &spec.outputs {
            if let Some(existing) = self.producer_of(output) {
                return Err(ConfigurationError::DuplicateOutput {
                    output: output.clone(),
                    existing: existing.desc.clone(),
                    step: desc,
                });
            }
        }

        let id = StepId(self.steps.len());
        debug!(%id, %shortcut, "added step");
        self.steps.push(Step {
            id,
            desc,
            shortcut,
            outputs: spec.outputs,
            inputs: spec.inputs,
            action: spec.action,
            cleanup: spec.cleanup,
            stderr_filter: spec.stderr_filter,
        });
        Ok(id)
    }

    /// Steps in insertion order.
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Mutable access to the steps, for executors.
    pub fn steps_mut(&mut self) -> &mut [Step] {
        &mut self.steps
    }

    /// Number of steps.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the recipe has no steps.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step with the given shortcut.
    #[must_use]
    pub fn step(&self, shortcut: &str) -> Option<&Step> {
        self.steps.iter().find(|step| step.shortcut == shortcut)
    }

    /// Mutable step with the given shortcut.
    pub fn step_mut(&mut self, shortcut: &str) -> Option<&mut Step> {
        self.steps.iter_mut().find(|step| step.shortcut == shortcut)
    }

    /// Step producing `path`.
    #[must_use]
    pub fn producer_of(&self, path: &Utf8Path) -> Option<&Step> {
        self.steps.iter().find(|step| step.produces(path))
    }

    /// Add `path` as an input of the step named `shortcut`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnknownStep`] when no step has that
    /// shortcut.
    pub fn add_input(
        &mut self,
        shortcut: &str,
        path: impl Into<Utf8PathBuf>,
    ) -> Result<(), ConfigurationError> {
        let step = self
            .step_mut(shortcut)
            .ok_or_else(|| ConfigurationError::UnknownStep {
                shortcut: shortcut.to_owned(),
            })?;
        step.add_input(path);
        Ok(())
    }

    /// Record `path` as produced by the build and safe to delete.
    pub fn mark_generated(&mut self, path: impl Into<Utf8PathBuf>) {
        self.generated.insert(path.into());
    }

    /// Paths recorded by [`Recipe::mark_generated`].
    #[must_use]
    pub const fn generated(&self) -> &BTreeSet<Utf8PathBuf> {
        &self.generated
    }

    /// Delete every generated path that exists.
    ///
    /// Files and symlinks are unlinked; directories are removed recursively.
    ///
    /// # Errors
    ///
    /// Returns the first I/O error encountered.
    pub fn clean(&self) -> io::Result<()> {
        for path in &self.generated {
            let Ok(meta) = fs::symlink_metadata(path) else {
                continue;
            };
            if meta.is_dir() {
                info!("  > rmtree {path}");
                fs::remove_dir_all(path)?;
            } else {
                info!("  > unlink {path}");
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    /// Prune the recipe to the steps needed for `target` and `extra`.
    ///
    /// `target` matches a shortcut first and an output path relative to the
    /// project root second. Extra targets are shortcuts and are only
    /// considered once the main target matched. Relative order is preserved.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnknownTarget`] when nothing matches, or
    /// [`ConfigurationError::UnsatisfiableDependency`] when a needed input is
    /// neither on disk nor produced by a step.
    pub fn set_target(&mut self, target: &str, extra: &[&str]) -> Result<(), ConfigurationError> {
        let mut queue: Vec<usize> = self.matching_shortcut(target).into_iter().collect();
        if queue.is_empty() {
            queue.extend(self.matching_output(target));
        }
        if queue.is_empty() {
            return Err(self.unknown_target(target));
        }
        queue.extend(
            self.steps
                .iter()
                .enumerate()
                .filter(|(_, step)| extra.contains(&step.shortcut.as_str()))
                .map(|(index, _)| index),
        );

        let producers: HashMap<&Utf8PathBuf, usize> = self
            .steps
            .iter()
            .enumerate()
            .flat_map(|(index, step)| step.outputs.iter().map(move |out| (out, index)))
            .collect();
        let mut keep = HashSet::new();
        while let Some(index) = queue.pop() {
            if !keep.insert(index) {
                continue;
            }
            let Some(step) = self.steps.get(index) else {
                continue;
            };
            for input in &step.inputs {
                if let Some(&producer) = producers.get(input) {
                    queue.push(producer);
                } else if !input.exists() {
                    return Err(ConfigurationError::UnsatisfiableDependency {
                        step: step.desc.clone(),
                        input: input.clone(),
                    });
                }
            }
        }

        let before = self.steps.len();
        let mut index = 0;
        self.steps.retain(|_| {
            let kept = keep.contains(&index);
            index += 1;
            kept
        });
        debug!(requested = target, kept = self.steps.len(), before, "pruned recipe");
        Ok(())
    }

    /// Check that no step transitively depends on itself.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Cycle`] naming the steps on the loop.
    pub fn validate_acyclic(&self) -> Result<(), ConfigurationError> {
        match cycle::find_cycle(&self.steps) {
            Some(cycle) => Err(ConfigurationError::Cycle { cycle }),
            None => Ok(()),
        }
    }

    fn matching_shortcut(&self, target: &str) -> Option<usize> {
        self.steps.iter().position(|step| step.shortcut == target)
    }

    fn matching_output(&self, target: &str) -> Option<usize> {
        self.steps.iter().position(|step| {
            step.outputs.iter().any(|output| {
                output
                    .strip_prefix(&self.root)
                    .is_ok_and(|relative| relative == Utf8Path::new(target))
            })
        })
    }

    fn unknown_target(&self, target: &str) -> ConfigurationError {
        let mut scored: Vec<(f64, &str)> = self
            .steps
            .iter()
            .map(|step| {
                (
                    strsim::normalized_levenshtein(target, &step.shortcut),
                    step.shortcut.as_str(),
                )
            })
            .filter(|(score, _)| *score >= TARGET_HINT_THRESHOLD)
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        ConfigurationError::UnknownTarget {
            target: target.to_owned(),
            close_matches: scored
                .into_iter()
                .take(MAX_TARGET_HINTS)
                .map(|(_, name)| name.to_owned())
                .collect(),
            targets: self.steps.iter().map(|step| step.shortcut.clone()).collect(),
        }
    }
}

/// Shortcuts name fingerprint files, so they must be a single path
/// component that is neither empty nor a directory reference.
fn is_file_name(shortcut: &str) -> bool {
    !matches!(shortcut, "" | "." | "..") && !shortcut.contains(['/', '\\'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    fn noop() -> Action {
        Action::from_fn(|| Ok(()))
    }

    #[fixture]
    fn recipe() -> Recipe {
        let mut recipe = Recipe::new("/p");
        let steps = [
            StepSpec::new(noop()).desc("Compiling a.o").shortcut("a.o").output("/p/build/a.o"),
            StepSpec::new(noop()).desc("Compiling b.o").shortcut("b.o").output("/p/build/b.o"),
            StepSpec::new(noop())
                .desc("Linking app")
                .shortcut("link app")
                .inputs(["/p/build/a.o", "/p/build/b.o"])
                .output("/p/build/app"),
            StepSpec::new(noop()).desc("Running app").shortcut("app").input("/p/build/app"),
            StepSpec::new(noop()).desc("Compiling c.o").shortcut("c.o").output("/p/build/c.o"),
        ];
        for spec in steps {
            assert!(recipe.add_step(spec).is_ok());
        }
        recipe
    }

    fn shortcuts(recipe: &Recipe) -> Vec<&str> {
        recipe.steps().iter().map(Step::shortcut).collect()
    }

    #[rstest]
    fn ids_follow_insertion_order(recipe: Recipe) {
        let ids: Vec<usize> = recipe.steps().iter().map(|s| s.id().index()).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    }

    #[rstest]
    fn ids_after_pruning_count_the_remaining_steps(mut recipe: Recipe) {
        assert!(recipe.set_target("b.o", &[]).is_ok());
        let id = recipe.add_step(StepSpec::new(noop()).desc("Late").shortcut("late"));
        assert_eq!(id.ok().map(StepId::index), Some(1));
    }

    #[rstest]
    fn named_actions_default_desc_and_shortcut() {
        let mut recipe = Recipe::new("/p");
        let id = recipe.add_step(StepSpec::new(noop().named("tests")));
        assert!(id.is_ok());
        let step = recipe.step("tests");
        assert_eq!(step.map(Step::desc), Some("Running tests"));
    }

    #[rstest]
    fn unnamed_actions_need_a_description() {
        let mut recipe = Recipe::new("/p");
        let err = recipe.add_step(StepSpec::new(noop()).shortcut("x"));
        assert!(matches!(err, Err(ConfigurationError::MissingDescription)));
        let err = recipe.add_step(StepSpec::new(noop()).desc("X"));
        assert!(matches!(err, Err(ConfigurationError::MissingShortcut { .. })));
    }

    #[rstest]
    #[case("obj/a.o")]
    #[case("obj\\a.o")]
    #[case("")]
    #[case(".")]
    #[case("..")]
    fn shortcuts_must_be_plain_file_names(#[case] shortcut: &str) {
        let mut recipe = Recipe::new("/p");
        let err = recipe.add_step(StepSpec::new(noop()).desc("A").shortcut(shortcut));
        assert!(matches!(err, Err(ConfigurationError::InvalidShortcut { .. })));
    }

    #[rstest]
    fn duplicate_shortcuts_and_outputs_are_rejected(mut recipe: Recipe) {
        let err = recipe.add_step(StepSpec::new(noop()).desc("Again").shortcut("a.o"));
        assert!(matches!(err, Err(ConfigurationError::DuplicateShortcut { .. })));
        let err = recipe.add_step(
            StepSpec::new(noop())
                .desc("Other")
                .shortcut("other")
                .output("/p/build/b.o"),
        );
        assert!(matches!(err, Err(ConfigurationError::DuplicateOutput { .. })));
        assert_eq!(recipe.len(), 5);
    }

    #[rstest]
    fn set_target_keeps_producers_in_order(mut recipe: Recipe) {
        assert!(recipe.set_target("app", &[]).is_ok());
        assert_eq!(shortcuts(&recipe), vec!["a.o", "b.o", "link app", "app"]);
    }

    #[rstest]
    fn set_target_matches_relative_output_paths(mut recipe: Recipe) {
        assert!(recipe.set_target("build/b.o", &["c.o"]).is_ok());
        assert_eq!(shortcuts(&recipe), vec!["b.o", "c.o"]);
    }

    #[rstest]
    fn extra_targets_alone_do_not_match(mut recipe: Recipe) {
        let err = recipe.set_target("nothing", &["c.o"]);
        assert!(matches!(err, Err(ConfigurationError::UnknownTarget { .. })));
        assert_eq!(recipe.len(), 5);
    }

    #[rstest]
    fn unknown_target_offers_close_matches(mut recipe: Recipe) {
        match recipe.set_target("ap", &[]) {
            Err(ConfigurationError::UnknownTarget { close_matches, .. }) => {
                assert_eq!(close_matches.first().map(String::as_str), Some("app"));
            }
            other => panic!("expected unknown target, got {other:?}"),
        }
    }

    #[rstest]
    fn unknown_target_without_close_matches_lists_everything(mut recipe: Recipe) {
        match recipe.set_target("zzzzzzzz", &[]) {
            Err(ConfigurationError::UnknownTarget {
                close_matches,
                targets,
                ..
            }) => {
                assert!(close_matches.is_empty());
                assert_eq!(targets.len(), 5);
            }
            other => panic!("expected unknown target, got {other:?}"),
        }
    }

    #[rstest]
    fn missing_inputs_without_producers_are_unsatisfiable() {
        let mut recipe = Recipe::new("/p");
        let spec = StepSpec::new(noop())
            .desc("Running ghost")
            .shortcut("ghost")
            .input("/definitely/not/here.txt");
        assert!(recipe.add_step(spec).is_ok());
        let err = recipe.set_target("ghost", &[]);
        assert!(matches!(
            err,
            Err(ConfigurationError::UnsatisfiableDependency { .. })
        ));
    }

    #[rstest]
    fn clean_removes_generated_files_and_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8");
        let file = root.join("out.o");
        let tree = root.join("prefix");
        fs::write(&file, b"obj").expect("write");
        fs::create_dir_all(tree.join("lib")).expect("mkdir");
        let mut recipe = Recipe::new(&root);
        recipe.mark_generated(&file);
        recipe.mark_generated(&tree);
        recipe.mark_generated(root.join("never-built"));
        assert!(recipe.clean().is_ok());
        assert!(!file.exists());
        assert!(!tree.exists());
    }
}

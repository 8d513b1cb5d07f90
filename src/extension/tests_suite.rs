//! Built-in extension adding a `tests` target.

use std::process::Command;

use anyhow::{Context as _, ensure};
use camino::Utf8PathBuf;
use tracing::{debug, info};

use super::{Extension, HookContext};
use crate::plan::Plan;
use crate::recipe::{Action, Recipe, StepSpec};
use crate::scan::SourceMap;

/// Adds a phony `tests` step that runs every test binary of the current
/// variant one after another.
#[derive(Debug, Default, Clone, Copy)]
pub struct TestsExtension;

impl TestsExtension {
    /// Registered name, also the shortcut of the added step.
    pub const NAME: &'static str = "tests";
}

impl Extension for TestsExtension {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn hook_final(
        &mut self,
        ctx: &mut HookContext<'_>,
        _files: &SourceMap,
        plan: &Plan,
        recipe: &mut Recipe,
    ) -> anyhow::Result<()> {
        let suite: Vec<(Utf8PathBuf, Vec<String>)> = plan
            .binaries
            .iter()
            .filter(|binary| binary.test && ctx.build.is_current(&binary.variant))
            .map(|binary| (binary.path.clone(), binary.run_args.clone()))
            .collect();
        if suite.is_empty() {
            debug!("no test binaries; skipping the tests step");
            return Ok(());
        }
        let inputs: Vec<Utf8PathBuf> = suite.iter().map(|(path, _)| path.clone()).collect();
        let action = Action::from_fn(move || {
            for (binary, args) in &suite {
                info!("Running {binary}");
                let status = Command::new(binary)
                    .args(args)
                    .status()
                    .with_context(|| format!("failed to launch {binary}"))?;
                ensure!(status.success(), "{binary} failed with {status}");
            }
            Ok(())
        });
        recipe.add_step(
            StepSpec::new(action)
                .desc("Running tests")
                .shortcut(Self::NAME)
                .inputs(inputs),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, reason = "tests construct plans directly")]
    use super::*;
    use crate::context::{BuildContext, ProjectLayout};
    use crate::extension::ReadinessBoard;
    use crate::plan::Binary;
    use crate::variant::BuildVariant;
    use rstest::rstest;

    fn binary(path: &str, variant: &str, test: bool) -> Binary {
        Binary {
            path: Utf8PathBuf::from(path),
            variant: variant.to_owned(),
            main_source: Utf8PathBuf::from("/p/src/x.cc"),
            objects: Vec::new(),
            link_args: Vec::new(),
            run_args: Vec::new(),
            libraries: Vec::new(),
            test,
        }
    }

    fn run_hook(plan: &Plan) -> Recipe {
        let build = BuildContext::new(ProjectLayout::new("/p"), BuildVariant::new("fast"));
        let mut readiness = ReadinessBoard::new();
        let mut ctx = HookContext {
            build: &build,
            readiness: &mut readiness,
        };
        let mut recipe = Recipe::new("/p");
        TestsExtension
            .hook_final(&mut ctx, &SourceMap::new(), plan, &mut recipe)
            .expect("hook");
        recipe
    }

    #[rstest]
    fn tests_step_depends_on_current_variant_test_binaries() {
        let plan = Plan {
            objects: Vec::new(),
            binaries: vec![
                binary("/p/build/fast/app", "fast", false),
                binary("/p/build/fast/math_test", "fast", true),
                binary("/p/build/debug/math_test", "debug", true),
            ],
        };
        let recipe = run_hook(&plan);
        let step = recipe.step("tests").expect("tests step");
        assert!(step.is_phony());
        let inputs: Vec<_> = step.inputs().iter().map(Utf8PathBuf::as_path).map(camino::Utf8Path::as_str).collect();
        assert_eq!(inputs, vec!["/p/build/fast/math_test"]);
    }

    #[rstest]
    fn nothing_is_added_without_test_binaries() {
        let plan = Plan {
            objects: Vec::new(),
            binaries: vec![binary("/p/build/fast/app", "fast", false)],
        };
        assert!(run_hook(&plan).is_empty());
    }
}

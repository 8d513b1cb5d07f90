//! The planning pipeline.
//!
//! [`build_recipe`] turns the project on disk into a [`Recipe`] in a fixed
//! order: extension `hook_recipe`, source scan, `hook_srcs`, include
//! closures, planning, `hook_plan`, core compile/link/run steps,
//! `hook_final`, and finally the compilation database step. The recipe is
//! rebuilt from scratch on every pass.

mod compile_db;
mod steps;

use std::collections::BTreeSet;

use anyhow::Context as _;
use tracing::{debug, info};

pub use compile_db::{CompileCommand, render as render_compile_commands};

use crate::context::BuildContext;
use crate::extension::{ExtensionRegistry, HookContext, ReadinessBoard};
use crate::plan::{self, Plan, SameStemSource};
use crate::recipe::{Action, Recipe, StepSpec};
use crate::scan::{self, SourceMap};
use crate::toolchain::write_identity;

/// Shortcut of the compilation database step.
pub const COMPILE_COMMANDS_SHORTCUT: &str = "compile_commands.json";

/// Output of one planning pass.
#[derive(Debug)]
pub struct PlannedBuild {
    /// Steps to execute.
    pub recipe: Recipe,
    /// Scanned sources after extension hooks.
    pub files: SourceMap,
    /// Planned objects and binaries after extension hooks.
    pub plan: Plan,
}

/// Preprocessor names visible to the scanner for the current variant.
#[must_use]
pub fn scanner_defines(ctx: &BuildContext) -> BTreeSet<String> {
    let mut defines = scan::host_defines();
    defines.extend(ctx.variant.defines());
    defines
}

/// Run the whole planning sequence for `ctx`.
///
/// Extensions are loaded afresh from `registry`; hook failures are logged
/// and do not abort planning.
///
/// # Errors
///
/// Returns an error when the source tree cannot be scanned, a toolchain
/// identity marker cannot be written, or core steps conflict with each
/// other or with extension steps.
pub fn build_recipe(ctx: &BuildContext, registry: &ExtensionRegistry) -> anyhow::Result<PlannedBuild> {
    let layout = &ctx.layout;
    let mut recipe = Recipe::new(layout.root.clone());
    let mut readiness = ReadinessBoard::new();
    let mut extensions = registry.load_all();
    debug!(extensions = ?extensions.names().collect::<Vec<_>>(), "loaded extensions");
    let mut hooks = HookContext {
        build: ctx,
        readiness: &mut readiness,
    };

    extensions.run_recipe(&mut hooks, &mut recipe);

    let mut files = scan::scan(&layout.src_dir, &layout.root, &scanner_defines(ctx))
        .with_context(|| format!("failed to scan {}", layout.src_dir))?;
    extensions.run_srcs(&mut hooks, &mut files, &mut recipe);
    scan::resolve_closures(&mut files);

    let variants = ctx.planned_variants();
    for variant in &variants {
        let marker = variant.paths(&layout.build_dir).identity;
        write_identity(&marker, &ctx.toolchain.identity(variant))
            .with_context(|| format!("failed to write {marker}"))?;
    }
    let mut planned = plan::plan(&files, &variants, &layout.build_dir, &SameStemSource);
    extensions.run_plan(&mut hooks, &files, &mut planned, &mut recipe);
    planned.check_unique_objects()?;

    let mut database = Vec::with_capacity(planned.objects.len());
    for object in &planned.objects {
        let Some(variant) = variants.iter().find(|v| v.name() == object.variant) else {
            continue;
        };
        let entry = steps::add_compile_step(ctx, variant, object, &mut recipe)?;
        if ctx.is_current(&object.variant) {
            database.push(entry);
        }
    }
    for binary in &planned.binaries {
        let Some(variant) = variants.iter().find(|v| v.name() == binary.variant) else {
            continue;
        };
        steps::add_binary_steps(ctx, variant, binary, &mut recipe)?;
    }

    extensions.run_final(&mut hooks, &files, &planned, &mut recipe);

    if ctx.compile_commands {
        let path = layout.compile_commands.clone();
        let target = path.clone();
        recipe.add_step(
            StepSpec::new(Action::from_fn(move || compile_db::write(&target, &database)))
                .desc("Writing JSON Compilation Database")
                .shortcut(COMPILE_COMMANDS_SHORTCUT)
                .output(path.clone()),
        )?;
        recipe.mark_generated(path);
    }

    info!(
        files = files.len(),
        objects = planned.objects.len(),
        binaries = planned.binaries.len(),
        steps = recipe.len(),
        "planned build"
    );
    Ok(PlannedBuild {
        recipe,
        files,
        plan: planned,
    })
}

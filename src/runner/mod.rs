//! CLI execution logic.
//!
//! This module keeps `main` minimal: [`run`] converts the parsed [`Cli`]
//! into a [`BuildContext`], plans the recipe, prunes it to the requested
//! target and executes it. In live mode the whole sequence starts over after
//! every change below the source and extension directories.

mod error;
mod watch;

pub use error::RunnerError;
pub use watch::{SnapshotWatcher, WATCH_INTERVAL};

use std::env;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use camino::Utf8PathBuf;
use itertools::Itertools as _;
use miette::{Diagnostic, GraphicalReportHandler};
use tracing::{debug, error, info, warn};

use crate::cli::Cli;
use crate::context::{BuildContext, ProjectLayout};
use crate::extension::{ExtensionError, ExtensionRegistry};
use crate::fingerprint::{ChangeDetector, FingerprintCache};
use crate::pipeline;
use crate::recipe::{ConfigurationError, Recipe};
use crate::scheduler::{BuildError, Outcome, Scheduler};
use crate::status::{ProgressReporter, StatusReporter, TextReporter};
use crate::toolchain::Toolchain;
use crate::variant::VariantSet;

/// Build the [`StatusReporter`] requested on the command line.
fn make_reporter(cli: &Cli) -> Box<dyn StatusReporter> {
    if cli.progress {
        Box::new(ProgressReporter::new())
    } else {
        Box::new(TextReporter::new(cli.verbose))
    }
}

fn project_root(directory: Option<&Path>) -> Result<Utf8PathBuf, RunnerError> {
    let dir = match directory {
        Some(dir) => dir.to_path_buf(),
        None => env::current_dir().map_err(|source| RunnerError::ProjectDir {
            path: PathBuf::from("."),
            source,
        })?,
    };
    let canonical = dir
        .canonicalize()
        .map_err(|source| RunnerError::ProjectDir { path: dir, source })?;
    Utf8PathBuf::from_path_buf(canonical).map_err(|path| RunnerError::NonUtf8 { path })
}

/// Resolve the project, variant and options selected by `cli`.
///
/// Compilers and flags come from `CC`, `CXX`, `CXXFLAGS` and `LDFLAGS`.
///
/// # Errors
///
/// Returns [`RunnerError`] when the project directory cannot be resolved or
/// the variant is unknown.
pub fn context_from_cli(cli: &Cli) -> Result<BuildContext, RunnerError> {
    let root = project_root(cli.directory.as_deref())?;
    let variants = VariantSet::builtin();
    let variant = variants
        .get(&cli.variant)
        .cloned()
        .ok_or_else(|| RunnerError::UnknownVariant {
            name: cli.variant.clone(),
            known: variants.names().map(str::to_owned).collect(),
        })?;
    let mut ctx = BuildContext::new(ProjectLayout::new(root), variant);
    if let Some(jobs) = cli.jobs {
        ctx.jobs = jobs;
    }
    ctx.verbose = cli.verbose;
    ctx.compile_commands = !cli.no_compile_commands;
    ctx.extra_run_args.clone_from(&cli.extra_args);
    ctx.toolchain = Toolchain::from_env();
    Ok(ctx)
}

/// Built-in extensions plus every manifest under the extension directory.
///
/// Discovery problems are logged; the built-ins remain usable.
#[must_use]
pub fn registry_for(ctx: &BuildContext) -> ExtensionRegistry {
    let mut registry = ExtensionRegistry::with_builtins();
    match registry.discover(&ctx.layout.extensions_dir) {
        Ok(names) => debug!(?names, "discovered dependency extensions"),
        Err(err) => warn!(error = %err, "failed to discover extensions"),
    }
    registry
}

/// Plan a fresh recipe and prune it to `target`.
///
/// # Errors
///
/// Returns planning errors and [`ConfigurationError`]s from target
/// selection.
pub fn plan_target(ctx: &BuildContext, target: &str) -> Result<Recipe> {
    let mut recipe = pipeline::build_recipe(ctx, &registry_for(ctx))?.recipe;
    recipe.set_target(target, &[])?;
    Ok(recipe)
}

/// Delete every path the full recipe marks as generated.
///
/// # Errors
///
/// Returns an error when planning or deletion fails.
pub fn clean(ctx: &BuildContext) -> Result<()> {
    info!("Cleaning old build results:");
    let planned = pipeline::build_recipe(ctx, &registry_for(ctx))?;
    planned
        .recipe
        .clean()
        .context("failed to delete generated files")
}

/// Execute the parsed [`Cli`].
///
/// # Errors
///
/// Returns an error if planning, target selection or a build step fails.
/// In live mode only failures to watch the sources end the run.
pub fn run(cli: &Cli) -> Result<()> {
    let ctx = context_from_cli(cli)?;
    debug!(
        root = %ctx.layout.root,
        variant = ctx.variant.name(),
        jobs = ctx.jobs.get(),
        "resolved build context"
    );
    let reporter = make_reporter(cli);
    let detector = ChangeDetector::new(FingerprintCache::new(ctx.variant_paths().hashes));
    let scheduler = Scheduler::new(detector, reporter.as_ref())
        .with_jobs(ctx.jobs)
        .with_verbose(ctx.verbose);

    if cli.fresh {
        clean(&ctx)?;
    }
    if cli.live {
        return run_live(&ctx, &cli.target, &scheduler);
    }
    let mut recipe = plan_target(&ctx, &cli.target)?;
    match scheduler.execute(&mut recipe, None)? {
        Outcome::Completed(summary) => {
            debug!(executed = ?summary.executed, "build completed");
        }
        Outcome::Interrupted => debug!("build interrupted"),
    }
    Ok(())
}

fn run_live(ctx: &BuildContext, target: &str, scheduler: &Scheduler<'_>) -> Result<()> {
    let roots = vec![
        ctx.layout.src_dir.clone(),
        ctx.layout.extensions_dir.clone(),
    ];
    loop {
        // Started before planning so edits made while planning still count.
        let mut watcher = SnapshotWatcher::start(roots.clone(), WATCH_INTERVAL);
        let pass = plan_target(ctx, target).and_then(|mut recipe| {
            scheduler
                .execute(&mut recipe, Some(&mut watcher))
                .map_err(anyhow::Error::from)
        });
        match pass {
            Ok(Outcome::Interrupted) => {
                info!("Sources changed, restarting the build");
                continue;
            }
            Ok(Outcome::Completed(_)) => {}
            Err(err) => report_error(&err),
        }
        info!(
            "Watching {} for changes...",
            roots.iter().map(|root| ctx.layout.relative(root)).join(", ")
        );
        watcher.wait().map_err(|source| RunnerError::Watch {
            roots: roots.clone(),
            source,
        })?;
    }
}

fn render_diagnostic(diagnostic: &dyn Diagnostic) {
    let mut out = String::new();
    if GraphicalReportHandler::new()
        .render_report(&mut out, diagnostic)
        .is_ok()
    {
        drop(write!(io::stderr(), "{out}"));
    } else {
        error!(error = %diagnostic, "build failed");
    }
}

/// Show `err` to the user.
///
/// Step failures were already printed by the status reporter. Configuration
/// and setup errors are rendered as diagnostics with their help text;
/// anything else is logged with its context chain.
pub fn report_error(err: &anyhow::Error) {
    if let Some(build) = err.downcast_ref::<BuildError>() {
        match build {
            BuildError::Action(_) => {}
            BuildError::Configuration(config) => render_diagnostic(config),
            BuildError::Io(_) => error!("build failed: {err:#}"),
        }
    } else if let Some(config) = err.downcast_ref::<ConfigurationError>() {
        render_diagnostic(config);
    } else if let Some(runner) = err.downcast_ref::<RunnerError>() {
        render_diagnostic(runner);
    } else if let Some(extension) = err.downcast_ref::<ExtensionError>() {
        render_diagnostic(extension);
    } else {
        error!("build failed: {err:#}");
    }
}

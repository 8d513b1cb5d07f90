//! Command line interface definition using clap.
//!
//! The parsed [`Cli`] is converted into a
//! [`BuildContext`](crate::context::BuildContext) by the runner.

use std::num::NonZeroUsize;
use std::path::PathBuf;

use clap::Parser;

use crate::variant::DEFAULT_VARIANT;

/// Maximum number of jobs accepted by the CLI.
const MAX_JOBS: usize = 256;

fn parse_jobs(s: &str) -> Result<NonZeroUsize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("{s} is not a valid number"))?;
    if value > MAX_JOBS {
        return Err(format!("jobs must be between 1 and {MAX_JOBS}"));
    }
    NonZeroUsize::new(value).ok_or_else(|| format!("jobs must be between 1 and {MAX_JOBS}"))
}

/// Incremental build orchestrator for C and C++ source trees.
///
/// Sources under `src/` are scanned for includes and `#pragma kiln` directives
/// and turned into compile, link and run steps; the named target and
/// everything it depends on are brought up to date.
#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Step to bring up to date, by shortcut (for example `app`,
    /// `link app`, `tests`) or by output path relative to the project root.
    #[arg(value_name = "TARGET")]
    pub target: String,

    /// Build variant to use.
    #[arg(long, value_name = "NAME", default_value = DEFAULT_VARIANT)]
    pub variant: String,

    /// Keep watching the sources and rebuild after every change.
    #[arg(long)]
    pub live: bool,

    /// Delete generated files before building.
    #[arg(long)]
    pub fresh: bool,

    /// Echo commands, let action output through and enable debug logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Set the number of parallel build jobs.
    ///
    /// Defaults to the number of logical cores.
    #[arg(short, long, value_name = "N", value_parser = parse_jobs)]
    pub jobs: Option<NonZeroUsize>,

    /// Run as if started in this directory.
    #[arg(short = 'C', long, value_name = "DIR")]
    pub directory: Option<PathBuf>,

    /// Disable generation of compile_commands.json.
    #[arg(long)]
    pub no_compile_commands: bool,

    /// Argument passed to the target when it is run. May be repeated.
    #[arg(short = 'x', value_name = "ARG", allow_hyphen_values = true)]
    pub extra_args: Vec<String>,

    /// Show a progress bar instead of one line per step.
    #[arg(long)]
    pub progress: bool,
}

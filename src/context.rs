//! Project layout and the per-run build context.
//!
//! Everything that used to be ambient (the project root, the current
//! variant, verbosity) travels through planning and scheduling as an
//! explicit [`BuildContext`] value.

use std::num::NonZeroUsize;
use std::thread;

use camino::{Utf8Path, Utf8PathBuf};

use crate::toolchain::Toolchain;
use crate::variant::{BuildVariant, VariantPaths};

/// Well-known directories of a project, all rooted at one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectLayout {
    /// Project root; targets may be named relative to it.
    pub root: Utf8PathBuf,
    /// Scanned source tree.
    pub src_dir: Utf8PathBuf,
    /// Build outputs, one subdirectory per variant.
    pub build_dir: Utf8PathBuf,
    /// Checkouts of third-party dependencies.
    pub third_party_dir: Utf8PathBuf,
    /// Declarative extension manifests.
    pub extensions_dir: Utf8PathBuf,
    /// JSON compilation database consumed by editors.
    pub compile_commands: Utf8PathBuf,
}

impl ProjectLayout {
    /// Derive the standard layout below `root`.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        let base: Utf8PathBuf = root.into();
        Self {
            src_dir: base.join("src"),
            build_dir: base.join("build"),
            third_party_dir: base.join("third_party"),
            extensions_dir: base.join("extensions"),
            compile_commands: base.join("compile_commands.json"),
            root: base,
        }
    }

    /// Express `path` relative to the project root when it lies below it.
    #[must_use]
    pub fn relative<'a>(&self, path: &'a Utf8Path) -> &'a Utf8Path {
        path.strip_prefix(&self.root).unwrap_or(path)
    }
}

/// Options shared by every stage of one build run.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// Directories of the project being built.
    pub layout: ProjectLayout,
    /// The single variant selected for this run.
    pub variant: BuildVariant,
    /// Maximum number of concurrently running actions.
    pub jobs: NonZeroUsize,
    /// Echo commands and let action stdout through.
    pub verbose: bool,
    /// Write `compile_commands.json`.
    pub compile_commands: bool,
    /// Extra arguments appended when running a binary.
    pub extra_run_args: Vec<String>,
    /// Variants planned alongside the current one. Their steps carry the
    /// variant name as a shortcut prefix.
    pub extra_variants: Vec<BuildVariant>,
    /// Compilers and environment flags.
    pub toolchain: Toolchain,
}

impl BuildContext {
    /// Context with default options for `variant`.
    #[must_use]
    pub fn new(layout: ProjectLayout, variant: BuildVariant) -> Self {
        Self {
            layout,
            variant,
            jobs: default_jobs(),
            verbose: false,
            compile_commands: true,
            extra_run_args: Vec::new(),
            extra_variants: Vec::new(),
            toolchain: Toolchain::default(),
        }
    }

    /// The current variant followed by any extra ones, without repeats.
    #[must_use]
    pub fn planned_variants(&self) -> Vec<BuildVariant> {
        let mut variants = vec![self.variant.clone()];
        for extra in &self.extra_variants {
            if variants.iter().all(|known| known.name() != extra.name()) {
                variants.push(extra.clone());
            }
        }
        variants
    }

    /// Whether `name` is the current variant.
    #[must_use]
    pub fn is_current(&self, name: &str) -> bool {
        self.variant.name() == name
    }

    /// Directories of the current variant.
    #[must_use]
    pub fn variant_paths(&self) -> VariantPaths {
        self.variant.paths(&self.layout.build_dir)
    }
}

/// Logical core count, or one when it cannot be determined.
#[must_use]
pub fn default_jobs() -> NonZeroUsize {
    thread::available_parallelism().unwrap_or(NonZeroUsize::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/p/src/main.cc", "src/main.cc")]
    #[case("/elsewhere/x.h", "/elsewhere/x.h")]
    fn relative_strips_project_root(#[case] input: &str, #[case] expected: &str) {
        let layout = ProjectLayout::new("/p");
        assert_eq!(layout.relative(Utf8Path::new(input)), Utf8Path::new(expected));
    }
}

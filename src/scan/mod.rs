//! Source tree scanning.
//!
//! [`scan`] walks the source directory and records, for every C/C++ file,
//! the includes, library comments and kiln pragmas found in its active
//! preprocessor regions. [`resolve_closures`] then computes each file's
//! transitive local includes and propagates `main` markers and system
//! includes from included files to their includers.

mod conditional;
mod directive;

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use indexmap::IndexSet;
use miette::Diagnostic;
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

pub use directive::ArgTarget;

use crate::variant::BuildVariant;
use conditional::ConditionalStack;
use directive::{Directive, parse_line};

/// File extensions picked up by the scanner.
pub const SOURCE_EXTENSIONS: [&str; 4] = ["c", "cc", "h", "hh"];

/// Ordered map from file path to its scan record.
pub type SourceMap = BTreeMap<Utf8PathBuf, File>;

/// Extra arguments keyed by variant name; the empty key applies to all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariantArgs(BTreeMap<String, Vec<String>>);

impl VariantArgs {
    /// Append `value` to the list for `variant` (`""` for every variant).
    pub fn push(&mut self, variant: &str, value: impl Into<String>) {
        self.0.entry(variant.to_owned()).or_default().push(value.into());
    }

    /// Arguments for `variant`: the lists of every variant along its chain,
    /// derived first, followed by the shared list.
    #[must_use]
    pub fn resolve(&self, variant: &BuildVariant) -> Vec<String> {
        variant
            .chain()
            .filter_map(|link| self.0.get(link.name()))
            .chain(self.0.get(""))
            .flatten()
            .cloned()
            .collect()
    }

    /// Whether no arguments were recorded for any variant.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.values().all(Vec::is_empty)
    }
}

/// Everything the scanner learned about one source file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct File {
    /// Path of the file.
    pub path: Utf8PathBuf,
    /// `#include <...>` targets, own first, then those of included files.
    pub system_includes: Vec<String>,
    /// Libraries named by `#pragma comment(lib, ...)`.
    pub comment_libs: Vec<String>,
    /// Resolved `#include "..."` targets in source order.
    pub local_includes: Vec<Utf8PathBuf>,
    /// Every file reachable over local includes.
    pub transitive_includes: BTreeSet<Utf8PathBuf>,
    /// Marked with `#pragma kiln main`, directly or through an include.
    pub main: bool,
    /// A main file whose stem ends in `_test`.
    pub test: bool,
    /// Extra compile arguments from pragmas.
    pub compile_args: VariantArgs,
    /// Extra link arguments from pragmas.
    pub link_args: VariantArgs,
    /// Extra run arguments from pragmas.
    pub run_args: VariantArgs,
    /// Names of extensions this file depends on, set by extension hooks.
    pub requires: BTreeSet<String>,
}

impl File {
    /// Empty record for `path`.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Whether the file is a header (`.h` or `.hh`).
    #[must_use]
    pub fn is_header(&self) -> bool {
        matches!(self.path.extension(), Some("h" | "hh"))
    }

    /// Whether the file is compiled on its own (`.c` or `.cc`).
    #[must_use]
    pub fn is_source(&self) -> bool {
        matches!(self.path.extension(), Some("c" | "cc"))
    }

    /// Whether the file is C rather than C++.
    #[must_use]
    pub fn is_c(&self) -> bool {
        self.path.extension() == Some("c")
    }

    /// File name without its extension.
    #[must_use]
    pub fn stem(&self) -> &str {
        self.path.file_stem().unwrap_or_default()
    }

    /// Argument list of `target` kind.
    #[must_use]
    pub const fn args(&self, target: ArgTarget) -> &VariantArgs {
        match target {
            ArgTarget::Compile => &self.compile_args,
            ArgTarget::Link => &self.link_args,
            ArgTarget::Run => &self.run_args,
        }
    }

    fn args_mut(&mut self, target: ArgTarget) -> &mut VariantArgs {
        match target {
            ArgTarget::Compile => &mut self.compile_args,
            ArgTarget::Link => &mut self.link_args,
            ArgTarget::Run => &mut self.run_args,
        }
    }
}

/// Errors raised while reading the source tree.
#[derive(Debug, Error, Diagnostic)]
pub enum ScanError {
    /// Walking the source directory failed.
    #[error("failed to walk source tree below {root}")]
    #[diagnostic(code(kiln::scan::walk))]
    Walk {
        /// Directory being walked.
        root: Utf8PathBuf,
        /// Underlying walk failure.
        #[source]
        source: walkdir::Error,
    },
    /// A path in the source tree is not valid UTF-8.
    #[error("source path {} is not valid UTF-8", .0.display())]
    #[diagnostic(code(kiln::scan::non_utf8_path))]
    NonUtf8Path(std::path::PathBuf),
    /// A source file could not be read.
    #[error("failed to read {path}")]
    #[diagnostic(code(kiln::scan::read))]
    Read {
        /// File that failed to read.
        path: Utf8PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
}

/// Preprocessor names the host compiler defines by default.
#[must_use]
pub fn host_defines() -> BTreeSet<String> {
    let mut names = Vec::new();
    if cfg!(target_os = "linux") {
        names.extend(["__linux__", "__unix__"]);
    }
    if cfg!(target_os = "macos") {
        names.extend(["__APPLE__", "__MACH__", "__unix__"]);
    }
    if cfg!(target_os = "freebsd") {
        names.extend(["__FreeBSD__", "__unix__"]);
    }
    if cfg!(windows) {
        names.extend(["_WIN32", "_MSC_VER"]);
    }
    if cfg!(target_pointer_width = "64") && cfg!(windows) {
        names.push("_WIN64");
    }
    if cfg!(target_arch = "x86_64") {
        names.extend(["__x86_64__", "__amd64__"]);
    }
    if cfg!(target_arch = "aarch64") {
        names.push("__aarch64__");
    }
    names.into_iter().map(str::to_owned).collect()
}

/// Scan every source file below `src_dir`.
///
/// Local includes are resolved relative to the including file first and
/// `root` second. Closures are not computed; see [`resolve_closures`].
///
/// # Errors
///
/// Returns [`ScanError`] when the tree cannot be walked or a file cannot be
/// read.
pub fn scan(
    src_dir: &Utf8Path,
    root: &Utf8Path,
    defines: &BTreeSet<String>,
) -> Result<SourceMap, ScanError> {
    let mut files = SourceMap::new();
    if !src_dir.is_dir() {
        debug!(dir = %src_dir, "source directory missing; nothing to scan");
        return Ok(files);
    }
    for item in WalkDir::new(src_dir).sort_by_file_name() {
        let entry = item.map_err(|source| ScanError::Walk {
            root: src_dir.to_owned(),
            source,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = Utf8Path::from_path(entry.path())
            .ok_or_else(|| ScanError::NonUtf8Path(entry.path().to_path_buf()))?;
        if !path
            .extension()
            .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext))
        {
            continue;
        }
        let bytes = fs::read(path).map_err(|source| ScanError::Read {
            path: path.to_owned(),
            source,
        })?;
        let text = String::from_utf8_lossy(&bytes);
        let file = parse_file(path, &text, root, defines);
        files.insert(file.path.clone(), file);
    }
    debug!(count = files.len(), dir = %src_dir, "scanned source files");
    Ok(files)
}

/// Scan `src_dir` and resolve closures in one call.
///
/// # Errors
///
/// See [`scan`].
pub fn scan_tree(
    src_dir: &Utf8Path,
    root: &Utf8Path,
    defines: &BTreeSet<String>,
) -> Result<SourceMap, ScanError> {
    let mut files = scan(src_dir, root, defines)?;
    resolve_closures(&mut files);
    Ok(files)
}

/// Parse the contents of one file.
#[must_use]
pub fn parse_file(
    path: &Utf8Path,
    text: &str,
    root: &Utf8Path,
    defines: &BTreeSet<String>,
) -> File {
    let mut file = File::new(normalize(path));
    let mut conditions = ConditionalStack::new(defines);
    for (index, line) in text.lines().enumerate() {
        let Some(directive) = parse_line(line) else {
            continue;
        };
        match directive {
            Directive::If(expr) => conditions.push_if(expr),
            Directive::IfDef(name) => conditions.push_ifdef(name, false),
            Directive::IfNDef(name) => conditions.push_ifdef(name, true),
            Directive::Elif(expr) => {
                if !conditions.elif(expr) {
                    warn!(file = %path, line = index + 1, "#elif without matching #if");
                }
            }
            Directive::Else => {
                if !conditions.otherwise() {
                    warn!(file = %path, line = index + 1, "#else without matching #if");
                }
            }
            Directive::EndIf => {
                if !conditions.end() {
                    warn!(file = %path, line = index + 1, "#endif without matching #if");
                }
            }
            other if conditions.is_active() => record(&mut file, other, root),
            _ => {}
        }
    }
    file
}

fn record(file: &mut File, directive: Directive<'_>, root: &Utf8Path) {
    match directive {
        Directive::SystemInclude(name) => push_unique(&mut file.system_includes, name),
        Directive::CommentLib(name) => push_unique(&mut file.comment_libs, name),
        Directive::LocalInclude(name) => {
            let resolved = resolve_local(&file.path, name, root);
            if !file.local_includes.contains(&resolved) {
                file.local_includes.push(resolved);
            }
        }
        Directive::Main => file.main = true,
        Directive::AddArgument {
            variant,
            target,
            value,
        } => file.args_mut(target).push(variant, value),
        _ => {}
    }
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|existing| existing == value) {
        list.push(value.to_owned());
    }
}

fn resolve_local(includer: &Utf8Path, name: &str, root: &Utf8Path) -> Utf8PathBuf {
    let beside = normalize(&includer.parent().unwrap_or(root).join(name));
    if beside.exists() {
        return beside;
    }
    let from_root = normalize(&root.join(name));
    if from_root.exists() { from_root } else { beside }
}

/// Lexically normalise `path`, folding `.` and `..` components.
#[must_use]
pub fn normalize(path: &Utf8Path) -> Utf8PathBuf {
    let mut out = Utf8PathBuf::new();
    for component in path.components() {
        match component {
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Recompute transitive includes, then propagate `main` flags and system
/// includes from included files to every includer.
///
/// Dangling includes are reported as warnings and otherwise ignored.
pub fn resolve_closures(files: &mut SourceMap) {
    for file in files.values() {
        for include in &file.local_includes {
            if !files.contains_key(include) {
                warn!(file = %file.path, include = %include, "included file not found");
            }
        }
    }

    let closures: Vec<(Utf8PathBuf, BTreeSet<Utf8PathBuf>)> = files
        .keys()
        .map(|path| (path.clone(), closure_of(files, path)))
        .collect();

    let updates: Vec<(Utf8PathBuf, BTreeSet<Utf8PathBuf>, bool, Vec<String>)> = closures
        .into_iter()
        .filter_map(|(path, closure)| {
            let file = files.get(&path)?;
            let mut main = file.main;
            let mut system: IndexSet<String> = file.system_includes.iter().cloned().collect();
            for include in &closure {
                if let Some(included) = files.get(include) {
                    main |= included.main;
                    system.extend(included.system_includes.iter().cloned());
                }
            }
            Some((path, closure, main, system.into_iter().collect()))
        })
        .collect();

    for (path, closure, main, system) in updates {
        if let Some(file) = files.get_mut(&path) {
            file.transitive_includes = closure;
            file.main = main;
            file.system_includes = system;
            file.test = main && file.stem().ends_with("_test");
        }
    }
}

fn closure_of(files: &SourceMap, start: &Utf8Path) -> BTreeSet<Utf8PathBuf> {
    let mut seen = BTreeSet::new();
    let mut worklist: Vec<&Utf8PathBuf> = files
        .get(start)
        .map(|file| file.local_includes.iter().collect())
        .unwrap_or_default();
    while let Some(path) = worklist.pop() {
        let Some(file) = files.get(path) else {
            continue;
        };
        if path.as_path() == start || !seen.insert(path.clone()) {
            continue;
        }
        worklist.extend(file.local_includes.iter());
    }
    seen
}

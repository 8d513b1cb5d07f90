//! Temporary project trees.

use std::fs;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;

/// A throwaway project root with `src/` and `extensions/` helpers.
///
/// The directory is deleted when the value is dropped.
#[derive(Debug)]
pub struct ProjectTree {
    _dir: TempDir,
    root: Utf8PathBuf,
}

impl ProjectTree {
    /// Create an empty project with an empty `src/` directory.
    pub fn new() -> Result<Self> {
        let dir = TempDir::new().context("create project dir")?;
        let canonical = dir
            .path()
            .canonicalize()
            .context("canonicalise project dir")?;
        let root = Utf8PathBuf::from_path_buf(canonical)
            .map_err(|path| anyhow::anyhow!("non UTF-8 temp dir {}", path.display()))?;
        fs::create_dir_all(root.join("src")).context("create src dir")?;
        Ok(Self { _dir: dir, root })
    }

    /// Absolute project root.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Write `contents` to `relative` below the root, creating parents.
    pub fn write(&self, relative: &str, contents: &str) -> Result<Utf8PathBuf> {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {parent}"))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {path}"))?;
        Ok(path)
    }

    /// Write a source file below `src/`.
    pub fn source(&self, relative: &str, contents: &str) -> Result<Utf8PathBuf> {
        self.write(&format!("src/{relative}"), contents)
    }

    /// Write an extension manifest `extensions/<name>.yml`.
    pub fn extension(&self, name: &str, yaml: &str) -> Result<Utf8PathBuf> {
        self.write(&format!("extensions/{name}.yml"), yaml)
    }

    /// Directory for helper executables, created on demand.
    pub fn tools_dir(&self) -> Result<Utf8PathBuf> {
        let dir = self.root.join("tools");
        fs::create_dir_all(&dir).with_context(|| format!("create {dir}"))?;
        Ok(dir)
    }

    /// Move the modification time of `path` forward by `by` without
    /// changing its contents.
    pub fn touch_later(&self, path: &Utf8Path, by: Duration) -> Result<()> {
        let file = fs::File::options()
            .write(true)
            .open(path)
            .with_context(|| format!("open {path}"))?;
        let modified = fs::metadata(path)
            .and_then(|meta| meta.modified())
            .unwrap_or_else(|_| SystemTime::now());
        file.set_modified(modified + by)
            .with_context(|| format!("set mtime of {path}"))
    }

    /// Rewrite `path` and move its modification time forward by `by`, so
    /// the change is visible even on coarse-grained file systems.
    pub fn edit_later(&self, path: &Utf8Path, contents: &str, by: Duration) -> Result<()> {
        fs::write(path, contents).with_context(|| format!("write {path}"))?;
        self.touch_later(path, by)
    }
}

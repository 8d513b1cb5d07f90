//! Compiler selection and the toolchain identity marker.

use std::env;
use std::fs;
use std::io;

use camino::Utf8Path;
use tracing::debug;

use crate::variant::BuildVariant;

/// Compilers and flags taken from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    /// Compiler for `.c` sources (`CC`).
    pub c_compiler: String,
    /// Compiler for everything else (`CXX`).
    pub cxx_compiler: String,
    /// Extra compile flags (`CXXFLAGS`).
    pub cxxflags: Vec<String>,
    /// Extra link flags (`LDFLAGS`).
    pub ldflags: Vec<String>,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            c_compiler: "cc".to_owned(),
            cxx_compiler: "c++".to_owned(),
            cxxflags: Vec::new(),
            ldflags: Vec::new(),
        }
    }
}

fn split_flags(value: &str) -> Vec<String> {
    shlex::split(value)
        .unwrap_or_else(|| value.split_whitespace().map(str::to_owned).collect())
}

impl Toolchain {
    /// Read `CC`, `CXX`, `CXXFLAGS` and `LDFLAGS`, falling back to the
    /// defaults for anything unset.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let var = |name: &str| env::var(name).ok().filter(|value| !value.trim().is_empty());
        Self {
            c_compiler: var("CC").unwrap_or(defaults.c_compiler),
            cxx_compiler: var("CXX").unwrap_or(defaults.cxx_compiler),
            cxxflags: var("CXXFLAGS").map(|v| split_flags(&v)).unwrap_or_default(),
            ldflags: var("LDFLAGS").map(|v| split_flags(&v)).unwrap_or_default(),
        }
    }

    /// Compiler used for a source file.
    #[must_use]
    pub fn compiler(&self, is_c: bool) -> &str {
        if is_c {
            &self.c_compiler
        } else {
            &self.cxx_compiler
        }
    }

    /// Text identifying everything that affects how objects of `variant`
    /// are compiled and linked.
    #[must_use]
    pub fn identity(&self, variant: &BuildVariant) -> String {
        let mut text = format!(
            "variant {}\ncc {}\ncxx {}\n",
            variant.name(),
            self.c_compiler,
            self.cxx_compiler
        );
        for (label, args) in [
            ("compile", variant.compile_args()),
            ("link", variant.link_args()),
            ("cxxflags", self.cxxflags.clone()),
            ("ldflags", self.ldflags.clone()),
        ] {
            text.push_str(label);
            for arg in args {
                text.push(' ');
                text.push_str(&arg);
            }
            text.push('\n');
        }
        text
    }
}

/// Write `contents` to the identity marker at `path` unless it already
/// holds exactly that. Returns whether the file was rewritten.
///
/// Leaving an unchanged marker alone keeps its mtime, so objects depending
/// on it stay up to date.
///
/// # Errors
///
/// Returns an I/O error when the marker or its directory cannot be written.
pub fn write_identity(path: &Utf8Path, contents: &str) -> io::Result<bool> {
    if fs::read_to_string(path).is_ok_and(|existing| existing == contents) {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    debug!(%path, "toolchain identity changed");
    Ok(true)
}

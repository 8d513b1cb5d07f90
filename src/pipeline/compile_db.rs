//! JSON compilation database for editors and language servers.

use std::fs;

use anyhow::Context as _;
use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One entry of `compile_commands.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileCommand {
    /// Working directory of the compiler.
    pub directory: String,
    /// Compiled source file.
    pub file: String,
    /// Produced object file.
    pub output: String,
    /// Full compiler argv.
    pub arguments: Vec<String>,
}

/// Render `entries` as a pretty-printed JSON array.
///
/// # Errors
///
/// Returns a serialization error, which only happens for non-string map keys
/// and therefore not for this type.
pub fn render(entries: &[CompileCommand]) -> serde_json::Result<String> {
    let mut text = serde_json::to_string_pretty(entries)?;
    text.push('\n');
    Ok(text)
}

/// Write the database to `path`, leaving an identical file untouched.
///
/// # Errors
///
/// Returns an error when rendering or writing fails.
pub fn write(path: &Utf8Path, entries: &[CompileCommand]) -> anyhow::Result<()> {
    let text = render(entries).context("failed to serialise the compilation database")?;
    if fs::read_to_string(path).is_ok_and(|existing| existing == text) {
        debug!(%path, "compilation database unchanged");
        return Ok(());
    }
    fs::write(path, text).with_context(|| format!("failed to write {path}"))?;
    debug!(%path, entries = entries.len(), "wrote compilation database");
    Ok(())
}

//! Helpers for creating executable stubs in tests.
//!
//! These utilities write tiny shell scripts and mark them executable so tests
//! can drive the scheduler without depending on a real compiler. Callers own
//! the containing directory's lifetime to keep the stub on disk.
//!
//! # Examples
//!
//! ```rust
//! use camino::Utf8Path;
//! use tempfile::TempDir;
//! use test_support::write_exec;
//!
//! let temp = TempDir::new().expect("tempdir");
//! let root = Utf8Path::from_path(temp.path()).expect("utf8 path");
//! let path = write_exec(root, "tool", "exit 0\n").expect("stub executable");
//! assert!(path.exists());
//! ```

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Write an executable shell script named `name` inside `root`.
pub fn write_exec(root: &Utf8Path, name: &str, body: &str) -> Result<Utf8PathBuf> {
    let path = root.join(name);
    fs::write(path.as_std_path(), format!("#!/bin/sh\n{body}"))
        .with_context(|| format!("write exec stub {name}"))?;
    make_executable(&path)?;
    Ok(path)
}

/// Mark an existing file as executable on Unix; no-op elsewhere.
pub fn make_executable(path: &Utf8Path) -> Result<()> {
    #[cfg(unix)]
    {
        let mut perms = fs::metadata(path.as_std_path())
            .context("stat exec stub")?
            .permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path.as_std_path(), perms).context("chmod exec stub")?;
    }

    #[cfg(not(unix))]
    let _ = path;

    Ok(())
}

/// A compiler stand-in that concatenates its existing file operands into the
/// `-o` target and appends that target to `log`, one line per invocation.
pub fn fake_compiler(root: &Utf8Path, name: &str, log: &Utf8Path) -> Result<Utf8PathBuf> {
    let body = format!(
        r#"out=""
inputs=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift 2; continue ;;
    -*) ;;
    *) if [ -f "$1" ]; then inputs="$inputs $1"; fi ;;
  esac
  shift
done
echo "$out" >> "{log}"
cat $inputs > "$out"
"#
    );
    write_exec(root, name, &body)
}

/// A tool that prints `stderr` to standard error and exits with `code`.
pub fn failing_tool(root: &Utf8Path, name: &str, code: i32, stderr: &str) -> Result<Utf8PathBuf> {
    write_exec(root, name, &format!("echo '{stderr}' >&2\nexit {code}\n"))
}

/// A tool that sleeps for `seconds` and then succeeds.
pub fn sleeping_tool(root: &Utf8Path, name: &str, seconds: u32) -> Result<Utf8PathBuf> {
    write_exec(root, name, &format!("exec sleep {seconds}\n"))
}

/// A long-running tool that touches `ready` once its SIGINT trap is
/// installed, and writes `interrupted` to `marker` when the trap fires.
pub fn trapping_sleeper(
    root: &Utf8Path,
    name: &str,
    ready: &Utf8Path,
    marker: &Utf8Path,
) -> Result<Utf8PathBuf> {
    let body = format!(
        r#"trap 'echo interrupted > "{marker}"; kill $child 2>/dev/null; exit 130' INT
sleep 30 &
child=$!
: > "{ready}"
wait $child
"#
    );
    write_exec(root, name, &body)
}

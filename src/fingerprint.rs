//! Content fingerprints and dirty-input detection.
//!
//! A step is rebuilt when an output is missing, or when an input that is not
//! older than the oldest output has a fingerprint different from the one
//! recorded after the step last succeeded. Records live in one file per step
//! under the variant's fingerprint directory, as `<input> <hex digest>` lines.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::time::{SystemTime, UNIX_EPOCH};

use camino::{Utf8Path, Utf8PathBuf};
use digest::Digest;
use sha2::Sha256;
use tracing::debug;

use crate::recipe::Step;

/// SHA-256 hex digest of `path`.
///
/// Files hash their contents. Directories hash their modification time in
/// nanoseconds. Missing or unreadable paths hash the empty input.
#[must_use]
pub fn fingerprint(path: &Utf8Path) -> String {
    let mut hasher = Sha256::new();
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => {
            let nanos = meta
                .modified()
                .ok()
                .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
                .map_or(0, |elapsed| elapsed.as_nanos());
            hasher.update(nanos.to_string().as_bytes());
        }
        Ok(_) => match fs::read(path) {
            Ok(bytes) => hasher.update(&bytes),
            Err(err) => debug!(%path, "hashing unreadable file as empty: {err}"),
        },
        Err(_) => {}
    }
    format!("{:x}", hasher.finalize())
}

fn modified(path: &Utf8Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

/// Per-step fingerprint records for one variant.
#[derive(Debug, Clone)]
pub struct FingerprintCache {
    dir: Utf8PathBuf,
}

impl FingerprintCache {
    /// Cache stored in `dir`.
    #[must_use]
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the records.
    #[must_use]
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    fn record_path(&self, shortcut: &str) -> Utf8PathBuf {
        self.dir.join(shortcut)
    }

    /// Recorded fingerprints for `shortcut`, or `None` when never recorded.
    #[must_use]
    pub fn load(&self, shortcut: &str) -> Option<HashMap<Utf8PathBuf, String>> {
        let text = fs::read_to_string(self.record_path(shortcut)).ok()?;
        Some(
            text.lines()
                .filter_map(|line| line.rsplit_once(' '))
                .map(|(path, digest)| (Utf8PathBuf::from(path), digest.to_owned()))
                .collect(),
        )
    }

    /// Overwrite the record of `step` with the current fingerprints of all
    /// its inputs.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the record cannot be written.
    pub fn record(&self, step: &Step) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let text: String = step
            .inputs()
            .iter()
            .map(|input| format!("{input} {}\n", fingerprint(input)))
            .collect();
        fs::write(self.record_path(step.shortcut()), text)
    }
}

/// Decides which inputs of a step changed since it last succeeded.
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    cache: FingerprintCache,
}

impl ChangeDetector {
    /// Detector backed by `cache`.
    #[must_use]
    pub const fn new(cache: FingerprintCache) -> Self {
        Self { cache }
    }

    /// The underlying cache.
    #[must_use]
    pub const fn cache(&self) -> &FingerprintCache {
        &self.cache
    }

    /// Inputs of `step` that require it to run again. Empty means clean.
    #[must_use]
    pub fn dirty_inputs(&self, step: &Step) -> Vec<Utf8PathBuf> {
        let all_inputs = || step.inputs().iter().cloned().collect();
        if step.outputs().iter().any(|output| !output.exists()) {
            return all_inputs();
        }

        let build_time = step
            .outputs()
            .iter()
            .map(|output| modified(output).unwrap_or(UNIX_EPOCH))
            .min()
            .unwrap_or(UNIX_EPOCH);
        let candidates: Vec<Utf8PathBuf> = step
            .inputs()
            .iter()
            .filter(|input| !self.contains_existing_output(step, input))
            .filter(|input| modified(input).is_some_and(|time| time >= build_time))
            .cloned()
            .collect();
        if candidates.is_empty() {
            return candidates;
        }

        let Some(recorded) = self.cache.load(step.shortcut()) else {
            return candidates;
        };
        candidates
            .into_iter()
            .filter(|input| recorded.get(input).is_none_or(|digest| *digest != fingerprint(input)))
            .collect()
    }

    fn contains_existing_output(&self, step: &Step, input: &Utf8Path) -> bool {
        input.is_dir()
            && step
                .outputs()
                .iter()
                .any(|output| output.starts_with(input) && output.exists())
    }

    /// Store the current fingerprints of `step`'s inputs.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the record cannot be written.
    pub fn record(&self, step: &Step) -> io::Result<()> {
        self.cache.record(step)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, reason = "tests set up temporary files")]
    use super::*;
    use crate::recipe::{Action, Recipe, StepSpec};
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    struct Sandbox {
        _dir: TempDir,
        root: Utf8PathBuf,
    }

    #[fixture]
    fn sandbox() -> Sandbox {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8");
        Sandbox { _dir: dir, root }
    }

    fn recipe_with(root: &Utf8Path, inputs: &[Utf8PathBuf], output: &Utf8Path) -> Recipe {
        let mut recipe = Recipe::new(root);
        let spec = StepSpec::new(Action::from_fn(|| Ok(())))
            .desc("Compiling out.o")
            .shortcut("out.o")
            .inputs(inputs.iter().cloned())
            .output(output);
        recipe.add_step(spec).expect("add step");
        recipe
    }

    #[rstest]
    #[case(b"hello".as_slice())]
    #[case(b"".as_slice())]
    fn fingerprint_is_sha256_of_contents(sandbox: Sandbox, #[case] contents: &[u8]) {
        let path = sandbox.root.join("f");
        fs::write(&path, contents).expect("write");
        let expected = format!("{:x}", Sha256::digest(contents));
        assert_eq!(fingerprint(&path), expected);
    }

    #[rstest]
    fn missing_paths_hash_the_empty_input(sandbox: Sandbox) {
        let expected = format!("{:x}", Sha256::digest(b""));
        assert_eq!(fingerprint(&sandbox.root.join("absent")), expected);
    }

    #[rstest]
    fn missing_output_makes_every_input_dirty(sandbox: Sandbox) {
        let input = sandbox.root.join("a.c");
        fs::write(&input, "int a;").expect("write");
        let recipe = recipe_with(&sandbox.root, &[input.clone()], &sandbox.root.join("out.o"));
        let detector = ChangeDetector::new(FingerprintCache::new(sandbox.root.join("hashes")));
        let step = recipe.step("out.o").expect("step");
        assert_eq!(detector.dirty_inputs(step), vec![input]);
    }

    #[rstest]
    fn touched_but_unchanged_inputs_are_clean_after_recording(sandbox: Sandbox) {
        let input = sandbox.root.join("a.c");
        let output = sandbox.root.join("out.o");
        fs::write(&output, "obj").expect("write output");
        fs::write(&input, "int a;").expect("write input");
        let recipe = recipe_with(&sandbox.root, &[input.clone()], &output);
        let detector = ChangeDetector::new(FingerprintCache::new(sandbox.root.join("hashes")));
        let step = recipe.step("out.o").expect("step");

        assert_eq!(detector.dirty_inputs(step), vec![input.clone()]);
        detector.record(step).expect("record");
        assert!(detector.dirty_inputs(step).is_empty());

        fs::write(&input, "int b;").expect("edit input");
        assert_eq!(detector.dirty_inputs(step), vec![input]);
    }

    #[rstest]
    fn directories_holding_outputs_are_not_candidates(sandbox: Sandbox) {
        let prefix = sandbox.root.join("PREFIX");
        fs::create_dir_all(&prefix).expect("mkdir");
        let output = prefix.join("lib.a");
        fs::write(&output, "lib").expect("write");
        let recipe = recipe_with(&sandbox.root, &[prefix], &output);
        let detector = ChangeDetector::new(FingerprintCache::new(sandbox.root.join("hashes")));
        let step = recipe.step("out.o").expect("step");
        assert!(detector.dirty_inputs(step).is_empty());
    }

    #[rstest]
    fn records_are_path_digest_lines(sandbox: Sandbox) {
        let input = sandbox.root.join("with space.h");
        fs::write(&input, "x").expect("write");
        let recipe = recipe_with(&sandbox.root, &[input.clone()], &sandbox.root.join("out.o"));
        let cache = FingerprintCache::new(sandbox.root.join("hashes"));
        cache.record(recipe.step("out.o").expect("step")).expect("record");
        let loaded = cache.load("out.o").expect("record exists");
        assert_eq!(loaded.get(&input), Some(&fingerprint(&input)));
    }
}

//! Planning of object files and binaries.
//!
//! [`plan`] is a pure function of the scanned [`SourceMap`], the variants to
//! build and a [`CompanionPolicy`]. It yields one [`ObjectFile`] per source
//! file and variant, and one [`Binary`] per main file and variant.

use std::collections::{BTreeSet, HashMap};
use std::env::consts::EXE_SUFFIX;

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexSet;

use crate::recipe::ConfigurationError;
use crate::scan::{File, SourceMap};
use crate::variant::BuildVariant;

/// One compilation unit for one variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectFile {
    /// Output path, `<obj dir>/<stem>.o`.
    pub path: Utf8PathBuf,
    /// The compiled source file.
    pub source: Utf8PathBuf,
    /// Name of the variant this object is built for.
    pub variant: String,
    /// Inputs that invalidate the object when changed.
    pub deps: BTreeSet<Utf8PathBuf>,
    /// Arguments contributed by the source and its includes.
    pub compile_args: Vec<String>,
    /// Extensions required by the source or any of its includes.
    pub requires: BTreeSet<String>,
}

impl ObjectFile {
    /// File name of the object, e.g. `main.o`.
    #[must_use]
    pub fn name(&self) -> &str {
        self.path.file_name().unwrap_or(self.path.as_str())
    }
}

/// One executable for one variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binary {
    /// Output path, `build/<variant>/<stem>`.
    pub path: Utf8PathBuf,
    /// Name of the variant this binary is built for.
    pub variant: String,
    /// The main file the binary was planned from.
    pub main_source: Utf8PathBuf,
    /// Objects linked into the binary, in traversal order.
    pub objects: Vec<Utf8PathBuf>,
    /// Link arguments gathered from every reachable file.
    pub link_args: Vec<String>,
    /// Run arguments gathered from every reachable file.
    pub run_args: Vec<String>,
    /// Libraries named by `#pragma comment(lib, ...)` in reachable files.
    pub libraries: Vec<String>,
    /// Whether the binary is a test.
    pub test: bool,
}

impl Binary {
    /// Binary stem, used for the run shortcut.
    #[must_use]
    pub fn stem(&self) -> &str {
        self.path.file_stem().unwrap_or(self.path.as_str())
    }

    /// File name including any executable suffix.
    #[must_use]
    pub fn name(&self) -> &str {
        self.path.file_name().unwrap_or(self.path.as_str())
    }
}

/// Result of planning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Objects in (variant, source path) order.
    pub objects: Vec<ObjectFile>,
    /// Binaries in (variant, main path) order.
    pub binaries: Vec<Binary>,
}

impl Plan {
    /// Look up the object built from `source` for `variant`.
    #[must_use]
    pub fn object_for(&self, source: &Utf8Path, variant: &str) -> Option<&ObjectFile> {
        self.objects
            .iter()
            .find(|object| object.source == source && object.variant == variant)
    }

    /// Check that no two sources compile to the same object path.
    ///
    /// Objects are named after the source stem, so `a/util.cc` and
    /// `b/util.cc` collide.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::ObjectCollision`] naming both sources.
    pub fn check_unique_objects(&self) -> Result<(), ConfigurationError> {
        let mut seen: HashMap<&Utf8Path, &Utf8Path> = HashMap::new();
        for object in &self.objects {
            if let Some(first) = seen.insert(object.path.as_path(), object.source.as_path()) {
                return Err(ConfigurationError::ObjectCollision {
                    object: object.path.clone(),
                    first: first.to_owned(),
                    second: object.source.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Decides which extra files a binary pulls in for a reachable file.
pub trait CompanionPolicy {
    /// Files to visit next after `file`, besides its transitive includes.
    fn companions(&self, file: &File, files: &SourceMap) -> Vec<Utf8PathBuf>;
}

/// A header pulls in the source file with the same stem, when it exists.
#[derive(Debug, Clone, Copy, Default)]
pub struct SameStemSource;

impl CompanionPolicy for SameStemSource {
    fn companions(&self, file: &File, files: &SourceMap) -> Vec<Utf8PathBuf> {
        if !file.is_header() {
            return Vec::new();
        }
        ["cc", "c"]
            .into_iter()
            .map(|ext| file.path.with_extension(ext))
            .filter(|candidate| files.contains_key(candidate))
            .collect()
    }
}

/// Object path for `source` inside `objects_dir`.
#[must_use]
pub fn object_path(objects_dir: &Utf8Path, source: &Utf8Path) -> Utf8PathBuf {
    objects_dir.join(format!("{}.o", source.file_stem().unwrap_or_default()))
}

/// Plan objects and binaries for every variant in `variants`.
#[must_use]
pub fn plan(
    files: &SourceMap,
    variants: &[BuildVariant],
    build_dir: &Utf8Path,
    policy: &dyn CompanionPolicy,
) -> Plan {
    let mut result = Plan::default();
    for variant in variants {
        let paths = variant.paths(build_dir);
        let objects_start = result.objects.len();
        for file in files.values().filter(|file| file.is_source()) {
            result
                .objects
                .push(plan_object(file, files, variant, &paths.objects, &paths.identity));
        }
        let objects = result.objects.get(objects_start..).unwrap_or_default();
        for file in files.values().filter(|file| file.is_source() && file.main) {
            let path = paths
                .base
                .join(format!("{}{EXE_SUFFIX}", file.stem()));
            result
                .binaries
                .push(plan_binary(file, files, variant, path, objects, policy));
        }
    }
    result
}

fn plan_object(
    file: &File,
    files: &SourceMap,
    variant: &BuildVariant,
    objects_dir: &Utf8Path,
    identity: &Utf8Path,
) -> ObjectFile {
    let mut deps = file.transitive_includes.clone();
    deps.insert(file.path.clone());
    deps.insert(identity.to_owned());
    let mut compile_args = file.compile_args.resolve(variant);
    let mut requires = file.requires.clone();
    for include in file
        .transitive_includes
        .iter()
        .filter_map(|path| files.get(path))
    {
        compile_args.extend(include.compile_args.resolve(variant));
        requires.extend(include.requires.iter().cloned());
    }
    ObjectFile {
        path: object_path(objects_dir, &file.path),
        source: file.path.clone(),
        variant: variant.name().to_owned(),
        deps,
        compile_args,
        requires,
    }
}

fn plan_binary(
    main: &File,
    files: &SourceMap,
    variant: &BuildVariant,
    path: Utf8PathBuf,
    objects: &[ObjectFile],
    policy: &dyn CompanionPolicy,
) -> Binary {
    let mut binary = Binary {
        path,
        variant: variant.name().to_owned(),
        main_source: main.path.clone(),
        objects: Vec::new(),
        link_args: Vec::new(),
        run_args: Vec::new(),
        libraries: Vec::new(),
        test: main.test,
    };
    let mut libraries = IndexSet::new();
    let mut visited = BTreeSet::new();
    let mut stack = vec![main.path.clone()];
    while let Some(current) = stack.pop() {
        if !visited.insert(current.clone()) {
            continue;
        }
        let Some(file) = files.get(&current) else {
            continue;
        };
        binary.link_args.extend(file.link_args.resolve(variant));
        binary.run_args.extend(file.run_args.resolve(variant));
        libraries.extend(file.comment_libs.iter().cloned());
        if let Some(object) = objects.iter().find(|object| object.source == current) {
            if !binary.objects.contains(&object.path) {
                binary.objects.push(object.path.clone());
            }
        }
        stack.extend(file.transitive_includes.iter().cloned());
        stack.extend(policy.companions(file, files));
    }
    binary.libraries = libraries.into_iter().collect();
    binary
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    fn file(path: &str, includes: &[&str]) -> File {
        let mut file = File::new(path);
        file.transitive_includes = includes.iter().map(Utf8PathBuf::from).collect();
        file
    }

    #[fixture]
    fn tree() -> SourceMap {
        let mut main = file("src/app.cc", &["src/util.hh"]);
        main.main = true;
        main.link_args.push("", "-lm");
        main.compile_args.push("debug", "-DAPP_TRACE");
        let mut header = file("src/util.hh", &[]);
        header.compile_args.push("", "-Ivendor");
        let mut util = file("src/util.cc", &["src/util.hh"]);
        util.comment_libs.push("z".into());
        let orphan = file("src/orphan.cc", &[]);
        [main, header, util, orphan]
            .into_iter()
            .map(|f| (f.path.clone(), f))
            .collect()
    }

    #[rstest]
    fn objects_depend_on_includes_source_and_identity(tree: SourceMap) {
        let variants = [BuildVariant::new("debug")];
        let plan = plan(&tree, &variants, Utf8Path::new("build"), &SameStemSource);
        let app = plan.object_for(Utf8Path::new("src/app.cc"), "debug");
        let app = app.map(|object| (object.path.clone(), object.deps.clone(), object.compile_args.clone()));
        assert_eq!(
            app,
            Some((
                Utf8PathBuf::from("build/debug/obj/app.o"),
                BTreeSet::from([
                    Utf8PathBuf::from("build/debug/toolchain.args"),
                    Utf8PathBuf::from("src/app.cc"),
                    Utf8PathBuf::from("src/util.hh"),
                ]),
                vec!["-DAPP_TRACE".to_owned(), "-Ivendor".to_owned()],
            ))
        );
        assert_eq!(plan.objects.len(), 3);
    }

    #[rstest]
    fn binaries_follow_companion_sources(tree: SourceMap) {
        let variants = [BuildVariant::new("fast")];
        let plan = plan(&tree, &variants, Utf8Path::new("build"), &SameStemSource);
        assert_eq!(plan.binaries.len(), 1);
        let binary = plan.binaries.first();
        let objects: Option<Vec<&str>> =
            binary.map(|b| b.objects.iter().map(Utf8PathBuf::as_path).map(camino::Utf8Path::as_str).collect());
        assert_eq!(
            objects,
            Some(vec!["build/fast/obj/app.o", "build/fast/obj/util.o"])
        );
        assert_eq!(binary.map(|b| b.libraries.clone()), Some(vec!["z".to_owned()]));
        assert_eq!(binary.map(|b| b.link_args.clone()), Some(vec!["-lm".to_owned()]));
    }

    struct NoCompanions;

    impl CompanionPolicy for NoCompanions {
        fn companions(&self, _file: &File, _files: &SourceMap) -> Vec<Utf8PathBuf> {
            Vec::new()
        }
    }

    #[rstest]
    fn companion_policy_is_replaceable(tree: SourceMap) {
        let variants = [BuildVariant::new("fast")];
        let plan = plan(&tree, &variants, Utf8Path::new("build"), &NoCompanions);
        let count = plan.binaries.first().map(|b| b.objects.len());
        assert_eq!(count, Some(1));
    }

    #[rstest]
    fn planning_is_deterministic_across_variants(tree: SourceMap) {
        let variants = [BuildVariant::new("fast"), BuildVariant::new("release")];
        let first = plan(&tree, &variants, Utf8Path::new("build"), &SameStemSource);
        let second = plan(&tree, &variants, Utf8Path::new("build"), &SameStemSource);
        assert_eq!(first, second);
        let variants_seen: Vec<&str> = first.binaries.iter().map(|b| b.variant.as_str()).collect();
        assert_eq!(variants_seen, vec!["fast", "release"]);
    }

    #[rstest]
    fn same_stem_sources_in_different_directories_collide() {
        let tree: SourceMap = [file("src/a/util.cc", &[]), file("src/b/util.cc", &[])]
            .into_iter()
            .map(|f| (f.path.clone(), f))
            .collect();
        let variants = [BuildVariant::new("fast")];
        let plan = plan(&tree, &variants, Utf8Path::new("build"), &SameStemSource);
        match plan.check_unique_objects() {
            Err(ConfigurationError::ObjectCollision { object, first, second }) => {
                assert_eq!(object, Utf8PathBuf::from("build/fast/obj/util.o"));
                assert_eq!(first, Utf8PathBuf::from("src/a/util.cc"));
                assert_eq!(second, Utf8PathBuf::from("src/b/util.cc"));
            }
            other => panic!("expected a collision, got {other:?}"),
        }
    }

    #[rstest]
    fn distinct_stems_do_not_collide(tree: SourceMap) {
        let variants = [BuildVariant::new("fast"), BuildVariant::new("debug")];
        let plan = plan(&tree, &variants, Utf8Path::new("build"), &SameStemSource);
        assert!(plan.check_unique_objects().is_ok());
    }

    #[rstest]
    fn derived_variants_see_pragma_args_of_their_base(tree: SourceMap) {
        let variants = [BuildVariant::new("asan").derived_from(BuildVariant::new("debug"))];
        let plan = plan(&tree, &variants, Utf8Path::new("build"), &SameStemSource);
        let app = plan.object_for(Utf8Path::new("src/app.cc"), "asan");
        assert_eq!(
            app.map(|object| object.compile_args.clone()),
            Some(vec!["-DAPP_TRACE".to_owned(), "-Ivendor".to_owned()])
        );
    }
}

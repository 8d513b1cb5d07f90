//! Build variants and their inheritance chains.
//!
//! A [`BuildVariant`] is a named flag profile that may derive from a base
//! variant. Flags resolve by walking the chain from the derived variant to
//! its bases and concatenating, so `asan` carries its own sanitizer flags
//! followed by everything `debug` contributes.

use std::collections::BTreeSet;

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;

/// Name of the variant selected when none is requested.
pub const DEFAULT_VARIANT: &str = "fast";

/// A named configuration profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildVariant {
    name: String,
    base: Option<Box<Self>>,
    compile_args: Vec<String>,
    link_args: Vec<String>,
}

/// Directories owned by a variant under the build directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantPaths {
    /// `build/<variant>`; binaries land here.
    pub base: Utf8PathBuf,
    /// Install prefix for third-party dependencies.
    pub prefix: Utf8PathBuf,
    /// Object file directory.
    pub objects: Utf8PathBuf,
    /// Fingerprint cache directory.
    pub hashes: Utf8PathBuf,
    /// File whose content identifies the toolchain configuration; every
    /// object of the variant depends on it.
    pub identity: Utf8PathBuf,
}

impl BuildVariant {
    /// Create a root variant with no base.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base: None,
            compile_args: Vec::new(),
            link_args: Vec::new(),
        }
    }

    /// Derive this variant from `base`.
    #[must_use]
    pub fn derived_from(mut self, base: Self) -> Self {
        self.base = Some(Box::new(base));
        self
    }

    /// Append compile arguments contributed by this variant alone.
    #[must_use]
    pub fn with_compile_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.compile_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append link arguments contributed by this variant alone.
    #[must_use]
    pub fn with_link_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.link_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Variant name, e.g. `debug`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Immediate base variant, if any.
    #[must_use]
    pub fn base(&self) -> Option<&Self> {
        self.base.as_deref()
    }

    /// Iterate the inheritance chain from this variant down to its root.
    pub fn chain(&self) -> impl Iterator<Item = &Self> {
        std::iter::successors(Some(self), |variant| variant.base())
    }

    /// Whether `name` is this variant or one of its bases.
    #[must_use]
    pub fn inherits(&self, name: &str) -> bool {
        self.chain().any(|variant| variant.name == name)
    }

    /// Compile arguments of the whole chain, derived first.
    #[must_use]
    pub fn compile_args(&self) -> Vec<String> {
        self.chain()
            .flat_map(|variant| variant.compile_args.iter().cloned())
            .collect()
    }

    /// Link arguments of the whole chain, derived first.
    #[must_use]
    pub fn link_args(&self) -> Vec<String> {
        self.chain()
            .flat_map(|variant| variant.link_args.iter().cloned())
            .collect()
    }

    /// `-I <PREFIX>/include` for every variant along the chain, derived
    /// first, so dependencies installed for a base variant stay visible.
    #[must_use]
    pub fn prefix_compile_args(&self, build_dir: &Utf8Path) -> Vec<String> {
        self.chain()
            .flat_map(|variant| {
                let prefix = variant.paths(build_dir).prefix;
                ["-I".to_owned(), prefix.join("include").into_string()]
            })
            .collect()
    }

    /// `-L <PREFIX>/lib -L <PREFIX>/lib64` for every variant along the chain.
    #[must_use]
    pub fn prefix_link_args(&self, build_dir: &Utf8Path) -> Vec<String> {
        self.chain()
            .flat_map(|variant| {
                let prefix = variant.paths(build_dir).prefix;
                ["lib", "lib64"]
                    .map(|dir| ["-L".to_owned(), prefix.join(dir).into_string()])
            })
            .flatten()
            .collect()
    }

    /// Preprocessor names defined by `-D` flags anywhere in the chain.
    #[must_use]
    pub fn defines(&self) -> BTreeSet<String> {
        self.compile_args()
            .iter()
            .filter_map(|arg| arg.strip_prefix("-D"))
            .map(|define| define.split_once('=').map_or(define, |(name, _)| name))
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
            .collect()
    }

    /// Resolve the directories this variant owns below `build_dir`.
    #[must_use]
    pub fn paths(&self, build_dir: &Utf8Path) -> VariantPaths {
        let base = build_dir.join(&self.name);
        VariantPaths {
            prefix: base.join("PREFIX"),
            objects: base.join("obj"),
            hashes: base.join("hashes"),
            identity: base.join("toolchain.args"),
            base,
        }
    }
}

/// The set of variants a project knows about, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct VariantSet {
    variants: IndexMap<String, BuildVariant>,
}

impl VariantSet {
    /// The variants every project gets: `release`, `fast` and `debug`, plus
    /// the sanitizer variants deriving from `debug` on Linux.
    #[must_use]
    pub fn builtin() -> Self {
        let debug = BuildVariant::new("debug").with_compile_args([
            "-O0",
            "-g",
            "-D_DEBUG",
            "-fno-omit-frame-pointer",
        ]);
        let mut set = Self::default();
        set.insert(
            BuildVariant::new("release")
                .with_compile_args(["-O3", "-DNDEBUG", "-flto", "-fstack-protector"])
                .with_link_args(["-flto"]),
        );
        set.insert(BuildVariant::new("fast").with_compile_args(["-O1", "-g"]));
        set.insert(debug.clone());
        if cfg!(target_os = "linux") {
            for (name, flag) in [
                ("asan", "-fsanitize=address"),
                ("tsan", "-fsanitize=thread"),
                ("ubsan", "-fsanitize=undefined"),
            ] {
                set.insert(
                    BuildVariant::new(name)
                        .derived_from(debug.clone())
                        .with_compile_args([flag])
                        .with_link_args([flag]),
                );
            }
        }
        set
    }

    /// Register or replace a variant.
    pub fn insert(&mut self, variant: BuildVariant) {
        self.variants.insert(variant.name.clone(), variant);
    }

    /// Look up a variant by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&BuildVariant> {
        self.variants.get(name)
    }

    /// All known variant names, in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.variants.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn chain_flags_run_from_derived_to_base() {
        let base = BuildVariant::new("debug").with_compile_args(["-O0"]);
        let derived = BuildVariant::new("asan")
            .derived_from(base)
            .with_compile_args(["-fsanitize=address"]);
        assert_eq!(derived.compile_args(), vec!["-fsanitize=address", "-O0"]);
        let names: Vec<_> = derived.chain().map(BuildVariant::name).collect();
        assert_eq!(names, vec!["asan", "debug"]);
        assert!(derived.inherits("debug"));
        assert!(!derived.inherits("release"));
    }

    #[rstest]
    fn defines_come_from_dash_d_flags() {
        let variant = BuildVariant::new("release")
            .with_compile_args(["-DNDEBUG", "-DLEVEL=3", "-O3", "-D"]);
        let defines: Vec<_> = variant.defines().into_iter().collect();
        assert_eq!(defines, vec!["LEVEL", "NDEBUG"]);
    }

    #[rstest]
    fn paths_are_scoped_by_variant_name() {
        let paths = BuildVariant::new("fast").paths(Utf8Path::new("/p/build"));
        assert_eq!(paths.base, Utf8PathBuf::from("/p/build/fast"));
        assert_eq!(paths.prefix, Utf8PathBuf::from("/p/build/fast/PREFIX"));
        assert_eq!(paths.objects, Utf8PathBuf::from("/p/build/fast/obj"));
        assert_eq!(paths.hashes, Utf8PathBuf::from("/p/build/fast/hashes"));
    }

    #[rstest]
    fn derived_variants_search_every_prefix_along_the_chain() {
        let asan = BuildVariant::new("asan").derived_from(BuildVariant::new("debug"));
        let build = Utf8Path::new("/p/build");
        assert_eq!(
            asan.prefix_compile_args(build),
            vec![
                "-I",
                "/p/build/asan/PREFIX/include",
                "-I",
                "/p/build/debug/PREFIX/include"
            ]
        );
        let link = asan.prefix_link_args(build);
        assert_eq!(link.len(), 8);
        assert!(link.contains(&"/p/build/debug/PREFIX/lib".to_owned()));
        assert!(link.contains(&"/p/build/debug/PREFIX/lib64".to_owned()));
        assert_eq!(link.first().map(String::as_str), Some("-L"));
    }

    #[rstest]
    #[case("fast")]
    #[case("debug")]
    #[case("release")]
    fn builtin_set_contains_core_variants(#[case] name: &str) {
        assert!(VariantSet::builtin().get(name).is_some());
    }
}

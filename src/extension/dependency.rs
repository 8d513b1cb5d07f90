//! Third-party dependencies described by YAML manifests.
//!
//! A manifest in `extensions/<name>.yml` names where the sources come from,
//! how they are configured and installed, and which compile, link and run
//! arguments users of the dependency need. The resulting
//! [`DependencyExtension`] injects the fetch/patch/configure/install steps,
//! publishes its install outputs on the readiness board, and wires them into
//! every object whose sources include one of the dependency's headers.

use std::fs;
use std::io::Write as _;
use std::process::{Command, Stdio};

use anyhow::{Context as _, anyhow, ensure};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use super::{Extension, ExtensionError, HookContext};
use crate::context::BuildContext;
use crate::plan::Plan;
use crate::process::Invocation;
use crate::recipe::{Action, ActionResult, Recipe, StepSpec};
use crate::scan::SourceMap;
use crate::variant::VariantPaths;

const PREFIX_PLACEHOLDER: &str = "{PREFIX}";
const ARCHIVE_SUFFIXES: [&str; 2] = [".tar.gz", ".tar.xz"];

/// Where the dependency's sources come from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchSpec {
    /// Shallow clone of one tag.
    Git {
        /// Repository URL.
        url: String,
        /// Tag or branch to check out.
        tag: String,
    },
    /// Archive download, extracted into the checkout directory.
    Url {
        /// Archive URL.
        url: String,
        /// File name under `third_party/`; defaults to the URL's last segment.
        #[serde(default)]
        filename: Option<String>,
    },
}

/// Build system used to configure the dependency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigureSystem {
    /// `cmake -G Ninja`, installed with `ninja install`.
    Cmake,
    /// `meson setup`, installed with `meson install`.
    Meson,
    /// `./configure`, installed with `make install`.
    Autotools,
    /// Sources are used as fetched.
    #[default]
    None,
}

/// Scalar value of a configure option.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    /// `true` / `false`.
    Bool(bool),
    /// Integer option.
    Int(i64),
    /// Anything else, passed through verbatim.
    Text(String),
}

impl OptionValue {
    fn render(&self, system: ConfigureSystem) -> String {
        match (self, system) {
            (Self::Bool(true), ConfigureSystem::Cmake) => "ON".to_owned(),
            (Self::Bool(false), ConfigureSystem::Cmake) => "OFF".to_owned(),
            (Self::Bool(value), _) => value.to_string(),
            (Self::Int(value), _) => value.to_string(),
            (Self::Text(value), _) => value.clone(),
        }
    }
}

/// How the dependency is configured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigureSpec {
    /// Build system.
    pub system: ConfigureSystem,
    /// `-D<name>=<value>` options, in declaration order.
    pub options: IndexMap<String, OptionValue>,
    /// Environment overrides for the configure step.
    pub env: IndexMap<String, String>,
    /// Extra inputs of the configure step: paths (with `{PREFIX}`
    /// placeholders) or `@<extension>` to wait for another extension.
    pub depends_on: Vec<String>,
}

/// Parsed `extensions/<name>.yml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DependencyManifest {
    /// Extension name, taken from the manifest file name.
    #[serde(skip)]
    pub name: String,
    /// Manifest path; changes to it reconfigure the dependency.
    #[serde(skip)]
    pub source: Option<Utf8PathBuf>,
    /// Extensions to load first.
    pub requires: Vec<String>,
    /// Source location.
    pub fetch: Option<FetchSpec>,
    /// Subdirectory of the checkout holding the build files.
    pub src_dir: Option<String>,
    /// Patch text applied with `patch -p0` inside the source directory.
    pub patch: Option<String>,
    /// Configure settings.
    pub configure: ConfigureSpec,
    /// Files produced by the install step (with `{PREFIX}` placeholders).
    pub outputs: Vec<String>,
    /// Regex matched against system includes to find users.
    pub include_pattern: Option<String>,
    /// Compile arguments for users.
    pub compile_args: Vec<String>,
    /// Link arguments for binaries containing users.
    pub link_args: Vec<String>,
    /// Run arguments for binaries containing users.
    pub run_args: Vec<String>,
}

impl DependencyManifest {
    /// Parse manifest `text` for the extension `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ExtensionError::Manifest`] when the YAML is malformed, has
    /// unknown keys, or describes an impossible build.
    pub fn parse(name: &str, text: &str) -> Result<Self, ExtensionError> {
        let invalid = |message: String| ExtensionError::Manifest {
            name: name.to_owned(),
            message,
        };
        let parsed: serde_json::Value =
            serde_saphyr::from_str(text).map_err(|err| invalid(err.to_string()))?;
        let doc = if parsed.is_null() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            parsed
        };
        let mut manifest: Self =
            serde_json::from_value(doc).map_err(|err| invalid(err.to_string()))?;
        manifest.name = name.to_owned();
        manifest.validate().map_err(invalid)?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<(), String> {
        if let Some(FetchSpec::Url { .. }) = &self.fetch {
            let archive = self.archive_name().unwrap_or_default();
            if !ARCHIVE_SUFFIXES.iter().any(|suffix| archive.ends_with(suffix)) {
                return Err(format!(
                    "unknown archive format for {archive} (supported: {})",
                    ARCHIVE_SUFFIXES.join(", ")
                ));
            }
        }
        if self.configure.system != ConfigureSystem::None && self.outputs.is_empty() {
            return Err("configured dependencies must list their install outputs".to_owned());
        }
        Ok(())
    }

    fn archive_name(&self) -> Option<&str> {
        match &self.fetch {
            Some(FetchSpec::Url { url, filename }) => Some(
                filename
                    .as_deref()
                    .unwrap_or_else(|| url.rsplit('/').next().unwrap_or(url)),
            ),
            _ => None,
        }
    }
}

/// Extension built from a [`DependencyManifest`].
#[derive(Debug)]
pub struct DependencyExtension {
    manifest: DependencyManifest,
    include: Option<Regex>,
}

impl DependencyExtension {
    /// Compile the manifest's include pattern.
    ///
    /// # Errors
    ///
    /// Returns [`ExtensionError::InvalidPattern`] when `include_pattern` is
    /// not a valid regular expression.
    pub fn new(manifest: DependencyManifest) -> Result<Self, ExtensionError> {
        let include = manifest
            .include_pattern
            .as_deref()
            .map(|pattern| Regex::new(&format!("^(?:{pattern})")))
            .transpose()
            .map_err(|source| ExtensionError::InvalidPattern {
                name: manifest.name.clone(),
                source,
            })?;
        Ok(Self { manifest, include })
    }

    /// The parsed manifest.
    #[must_use]
    pub const fn manifest(&self) -> &DependencyManifest {
        &self.manifest
    }

    fn add_fetch_steps(
        &self,
        recipe: &mut Recipe,
        third_party: &Utf8Path,
        checkout: &Utf8Path,
    ) -> anyhow::Result<Vec<Utf8PathBuf>> {
        let name = &self.manifest.name;
        match &self.manifest.fetch {
            None => Ok(Vec::new()),
            Some(FetchSpec::Git { url, tag }) => {
                let clone = Invocation::new("git")
                    .args(["-c", "advice.detachedHead=false", "-c", "core.autocrlf=false"])
                    .args(["clone", "--depth", "1", "--branch", tag.as_str()])
                    .args([url.as_str(), checkout.as_str()]);
                recipe.add_step(
                    StepSpec::new(Action::process(clone))
                        .desc(format!("Downloading {name}"))
                        .shortcut(format!("get {name}"))
                        .output(checkout.to_owned()),
                )?;
                Ok(vec![checkout.to_owned()])
            }
            Some(FetchSpec::Url { url, .. }) => {
                let archive_name = self
                    .manifest
                    .archive_name()
                    .ok_or_else(|| anyhow!("{name} has no archive name"))?;
                let archive = third_party.join(archive_name);
                let download = Invocation::new("curl").args([
                    "--fail",
                    "--location",
                    "--silent",
                    "--show-error",
                    "--output",
                    archive.as_str(),
                    url.as_str(),
                ]);
                recipe.add_step(
                    StepSpec::new(Action::process(download))
                        .desc(format!("Downloading {name}"))
                        .shortcut(format!("get {name}"))
                        .output(archive.clone()),
                )?;

                let target = checkout.to_owned();
                let source = archive.clone();
                let extract = Action::deferred(move || {
                    fs::create_dir_all(&target)
                        .with_context(|| format!("failed to create {target}"))?;
                    Ok(ActionResult::Spawn(Invocation::new("tar").args([
                        "-xf",
                        source.as_str(),
                        "-C",
                        target.as_str(),
                        "--strip-components=1",
                    ])))
                });
                recipe.add_step(
                    StepSpec::new(extract)
                        .desc(format!("Extracting {name}"))
                        .shortcut(format!("extract {name}"))
                        .input(archive)
                        .output(checkout.to_owned()),
                )?;
                Ok(vec![checkout.to_owned()])
            }
        }
    }

    fn configure_inputs(
        &self,
        ctx: &HookContext<'_>,
        paths: &VariantPaths,
        beam: &[Utf8PathBuf],
    ) -> anyhow::Result<Vec<Utf8PathBuf>> {
        let mut inputs: Vec<Utf8PathBuf> = beam.to_vec();
        inputs.extend(self.manifest.source.iter().cloned());
        for dep in &self.manifest.configure.depends_on {
            if let Some(other) = dep.strip_prefix('@') {
                let ready = ctx
                    .readiness
                    .wait_for(other)
                    .ok_or_else(|| anyhow!("`{other}` published no readiness paths"))?;
                inputs.extend(ready.iter().cloned());
            } else {
                inputs.push(expand_path(dep, ctx.build, paths));
            }
        }
        Ok(inputs)
    }

    fn configure_action(
        &self,
        ctx: &BuildContext,
        paths: &VariantPaths,
        src_dir: &Utf8Path,
        build_dir: &Utf8Path,
    ) -> (Action, Utf8PathBuf) {
        let configure = &self.manifest.configure;
        let options = configure.options.iter().map(|(key, value)| {
            format!("-D{key}={}", value.render(configure.system))
        });
        let toolchain = &ctx.toolchain;
        let with_env = |mut invocation: Invocation| {
            invocation = invocation
                .env("CC", &toolchain.c_compiler)
                .env("CXX", &toolchain.cxx_compiler);
            for (key, value) in &configure.env {
                invocation = invocation.env(key, expand(value, paths));
            }
            invocation
        };
        let prefix = paths.prefix.as_str();
        match configure.system {
            ConfigureSystem::Cmake => {
                let build_type = cmake_build_type(ctx);
                let invocation = Invocation::new("cmake")
                    .args(["-G", "Ninja"])
                    .arg(format!("-DCMAKE_BUILD_TYPE={build_type}"))
                    .arg(format!("-DCMAKE_C_COMPILER={}", toolchain.c_compiler))
                    .arg(format!("-DCMAKE_CXX_COMPILER={}", toolchain.cxx_compiler))
                    .arg(format!("-DCMAKE_INSTALL_PREFIX={prefix}"))
                    .args(options)
                    .args(["-S", src_dir.as_str(), "-B", build_dir.as_str()]);
                (Action::process(with_env(invocation)), build_dir.join("build.ninja"))
            }
            ConfigureSystem::Meson => {
                let invocation = Invocation::new("meson")
                    .arg("setup")
                    .args(options)
                    .arg(format!("--buildtype={}", meson_build_type(ctx)))
                    .args(["--default-library=static", "-Dprefer_static=true"])
                    .args(["--prefix", prefix, "--libdir", "lib64"])
                    .args([build_dir.as_str(), src_dir.as_str()]);
                (
                    Action::process(with_env(invocation)),
                    build_dir.join("meson-info").join("meson-info.json"),
                )
            }
            ConfigureSystem::Autotools | ConfigureSystem::None => {
                let invocation = with_env(
                    Invocation::new(src_dir.join("configure").as_str())
                        .arg(format!("--prefix={prefix}"))
                        .arg(format!("--libdir={prefix}/lib64"))
                        .arg("--disable-shared")
                        .args(options)
                        .current_dir(build_dir.to_owned()),
                );
                let dir = build_dir.to_owned();
                let action = Action::deferred(move || {
                    fs::create_dir_all(&dir).with_context(|| format!("failed to create {dir}"))?;
                    Ok(ActionResult::Spawn(invocation.clone()))
                });
                (action, build_dir.join("Makefile"))
            }
        }
    }

    fn install_action(&self, ctx: &BuildContext, build_dir: &Utf8Path) -> Invocation {
        match self.manifest.configure.system {
            ConfigureSystem::Cmake => {
                Invocation::new("ninja").args(["-C", build_dir.as_str(), "install"])
            }
            ConfigureSystem::Meson => Invocation::new("meson").args([
                "install",
                "-C",
                build_dir.as_str(),
                "--tags",
                "devel",
            ]),
            ConfigureSystem::Autotools | ConfigureSystem::None => Invocation::new("make")
                .args(["install", "-j"])
                .arg(ctx.jobs.to_string())
                .current_dir(build_dir.to_owned()),
        }
    }
}

fn expand(value: &str, paths: &VariantPaths) -> String {
    value.replace(PREFIX_PLACEHOLDER, paths.prefix.as_str())
}

/// Expand placeholders and anchor relative paths at the project root.
fn expand_path(value: &str, ctx: &BuildContext, paths: &VariantPaths) -> Utf8PathBuf {
    let path = Utf8PathBuf::from(expand(value, paths));
    if path.is_absolute() {
        path
    } else {
        ctx.layout.root.join(path)
    }
}

fn cmake_build_type(ctx: &BuildContext) -> &'static str {
    let variant = &ctx.variant;
    if variant.inherits("debug") {
        "Debug"
    } else if variant.inherits("release") {
        "Release"
    } else {
        "RelWithDebInfo"
    }
}

fn meson_build_type(ctx: &BuildContext) -> &'static str {
    let variant = &ctx.variant;
    if variant.inherits("debug") {
        "debug"
    } else if variant.inherits("release") {
        "release"
    } else {
        "debugoptimized"
    }
}

fn apply_patch(patch: &str, dir: &Utf8Path, marker: &Utf8Path) -> anyhow::Result<()> {
    let mut child = Command::new("patch")
        .arg("-p0")
        .current_dir(dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .context("failed to launch `patch`; is it installed and on PATH?")?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(patch.as_bytes())
            .context("failed to pass the patch to `patch`")?;
    }
    let output = child
        .wait_with_output()
        .context("failed to wait for `patch`")?;
    ensure!(
        output.status.success(),
        "patch -p0 failed in {dir}:\n{}",
        String::from_utf8_lossy(&output.stderr)
    );
    fs::write(marker, "").with_context(|| format!("failed to write {marker}"))?;
    Ok(())
}

impl Extension for DependencyExtension {
    fn name(&self) -> &str {
        &self.manifest.name
    }

    fn hook_recipe(&mut self, ctx: &mut HookContext<'_>, recipe: &mut Recipe) -> anyhow::Result<()> {
        let build = ctx.build;
        let paths = build.variant_paths();
        let name = self.manifest.name.clone();
        let checkout = build.layout.third_party_dir.join(&name);
        let src_dir = self
            .manifest
            .src_dir
            .as_ref()
            .map_or_else(|| checkout.clone(), |sub| checkout.join(sub));

        let mut beam = self.add_fetch_steps(recipe, &build.layout.third_party_dir, &checkout)?;

        if let Some(patch) = self.manifest.patch.clone() {
            let marker = build.layout.third_party_dir.join(format!("{name}.patched"));
            let (dir, token) = (src_dir.clone(), marker.clone());
            recipe.add_step(
                StepSpec::new(Action::from_fn(move || apply_patch(&patch, &dir, &token)))
                    .desc(format!("Patching {name}"))
                    .shortcut(format!("patch {name}"))
                    .inputs(beam.iter().cloned())
                    .output(marker.clone()),
            )?;
            beam = vec![marker];
        }

        if self.manifest.configure.system != ConfigureSystem::None {
            let build_dir = paths.base.join(&name);
            let inputs = self.configure_inputs(ctx, &paths, &beam)?;
            let (action, makefile) = self.configure_action(build, &paths, &src_dir, &build_dir);
            recipe.add_step(
                StepSpec::new(action)
                    .desc(format!("Configuring {name}"))
                    .shortcut(format!("configure {name}"))
                    .inputs(inputs)
                    .output(makefile.clone()),
            )?;

            let outputs: Vec<Utf8PathBuf> = self
                .manifest
                .outputs
                .iter()
                .map(|output| expand_path(output, build, &paths))
                .collect();
            recipe.add_step(
                StepSpec::new(Action::process(self.install_action(build, &build_dir)))
                    .desc(format!("Installing {name}"))
                    .shortcut(format!("install {name}"))
                    .input(makefile)
                    .outputs(outputs.iter().cloned()),
            )?;
            recipe.mark_generated(build_dir);
            beam = outputs;
        }

        debug!(extension = %name, count = beam.len(), "dependency ready paths");
        ctx.readiness.publish(name, beam);
        Ok(())
    }

    fn hook_srcs(
        &mut self,
        _ctx: &mut HookContext<'_>,
        files: &mut SourceMap,
        _recipe: &mut Recipe,
    ) -> anyhow::Result<()> {
        let Some(include) = &self.include else {
            return Ok(());
        };
        for file in files.values_mut() {
            if file
                .system_includes
                .iter()
                .any(|header| include.is_match(header))
            {
                file.requires.insert(self.manifest.name.clone());
            }
        }
        Ok(())
    }

    fn hook_plan(
        &mut self,
        ctx: &mut HookContext<'_>,
        _files: &SourceMap,
        plan: &mut Plan,
        _recipe: &mut Recipe,
    ) -> anyhow::Result<()> {
        let name = &self.manifest.name;
        let paths = ctx.build.variant_paths();
        let beam = ctx.readiness.wait_for(name).cloned().unwrap_or_default();
        let expand_all = |args: &[String]| -> Vec<String> {
            args.iter().map(|arg| expand(arg, &paths)).collect()
        };
        let compile_args = expand_all(&self.manifest.compile_args);
        let link_args = expand_all(&self.manifest.link_args);
        let run_args = expand_all(&self.manifest.run_args);

        let mut users = Vec::new();
        for object in plan
            .objects
            .iter_mut()
            .filter(|object| object.requires.contains(name))
        {
            object.deps.extend(beam.iter().cloned());
            object.compile_args.extend(compile_args.iter().cloned());
            users.push(object.path.clone());
        }
        for binary in plan
            .binaries
            .iter_mut()
            .filter(|binary| binary.objects.iter().any(|object| users.contains(object)))
        {
            binary.link_args.extend(link_args.iter().cloned());
            binary.run_args.extend(run_args.iter().cloned());
        }
        debug!(extension = %name, objects = users.len(), "wired dependency into plan");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, reason = "tests parse fixed manifests")]
    use super::*;
    use crate::context::ProjectLayout;
    use crate::extension::ReadinessBoard;
    use crate::plan::{Binary, ObjectFile};
    use crate::recipe::ActionKind;
    use crate::scan::File;
    use crate::variant::BuildVariant;
    use rstest::{fixture, rstest};
    use std::collections::BTreeSet;

    const ZLIB: &str = r#"
fetch:
  git:
    url: https://github.com/madler/zlib.git
    tag: v1.3.1
configure:
  system: cmake
  options:
    ZLIB_BUILD_EXAMPLES: false
    LEVEL: 3
  depends_on:
    - "{PREFIX}/include/other.h"
outputs:
  - "{PREFIX}/lib/libz.a"
include_pattern: "zlib\\.h"
compile_args: ["-I{PREFIX}/include"]
link_args: ["-lz"]
"#;

    #[fixture]
    fn build() -> BuildContext {
        BuildContext::new(ProjectLayout::new("/p"), BuildVariant::new("fast"))
    }

    fn process_argv(recipe: &Recipe, shortcut: &str) -> Vec<String> {
        match recipe.step(shortcut).expect("step").action().kind() {
            ActionKind::Process(invocation) => invocation.argv(),
            ActionKind::Callable(_) => Vec::new(),
        }
    }

    #[rstest]
    fn manifests_parse_with_defaults() {
        let manifest = DependencyManifest::parse("zlib", ZLIB).expect("parse");
        assert_eq!(manifest.name, "zlib");
        assert_eq!(
            manifest.fetch,
            Some(FetchSpec::Git {
                url: "https://github.com/madler/zlib.git".to_owned(),
                tag: "v1.3.1".to_owned(),
            })
        );
        assert_eq!(manifest.configure.system, ConfigureSystem::Cmake);
        assert!(manifest.requires.is_empty());
        assert!(manifest.patch.is_none());
    }

    #[rstest]
    #[case("fetch:\n  svn: {url: x}\n")]
    #[case("unexpected: 1\n")]
    #[case("configure:\n  system: cmake\n")]
    #[case("fetch:\n  url:\n    url: https://example.com/lib.zip\n")]
    fn invalid_manifests_are_rejected(#[case] text: &str) {
        assert!(matches!(
            DependencyManifest::parse("lib", text),
            Err(ExtensionError::Manifest { .. })
        ));
    }

    #[rstest]
    fn invalid_include_patterns_are_rejected() {
        let manifest = DependencyManifest::parse("lib", "include_pattern: \"(\"\n").expect("parse");
        assert!(matches!(
            DependencyExtension::new(manifest),
            Err(ExtensionError::InvalidPattern { .. })
        ));
    }

    #[rstest]
    fn hook_recipe_adds_fetch_configure_and_install(build: BuildContext) {
        let manifest = DependencyManifest::parse("zlib", ZLIB).expect("parse");
        let mut extension = DependencyExtension::new(manifest).expect("extension");
        let mut readiness = ReadinessBoard::new();
        let mut recipe = Recipe::new("/p");
        let mut ctx = HookContext {
            build: &build,
            readiness: &mut readiness,
        };
        extension.hook_recipe(&mut ctx, &mut recipe).expect("hook");

        let shortcuts: Vec<_> = recipe.steps().iter().map(|step| step.shortcut()).collect();
        assert_eq!(shortcuts, vec!["get zlib", "configure zlib", "install zlib"]);

        let configure = recipe.step("configure zlib").expect("configure");
        assert!(configure.inputs().contains(Utf8Path::new("/p/third_party/zlib")));
        assert!(configure
            .inputs()
            .contains(Utf8Path::new("/p/build/fast/PREFIX/include/other.h")));
        let argv = process_argv(&recipe, "configure zlib");
        assert!(argv.contains(&"-DCMAKE_BUILD_TYPE=RelWithDebInfo".to_owned()));
        assert!(argv.contains(&"-DZLIB_BUILD_EXAMPLES=OFF".to_owned()));
        assert!(argv.contains(&"-DLEVEL=3".to_owned()));

        let install = recipe.step("install zlib").expect("install");
        assert!(install.produces(Utf8Path::new("/p/build/fast/PREFIX/lib/libz.a")));
        let ready: Vec<_> = readiness
            .wait_for("zlib")
            .expect("published")
            .iter()
            .map(Utf8PathBuf::as_path).map(camino::Utf8Path::as_str)
            .collect();
        assert_eq!(ready, vec!["/p/build/fast/PREFIX/lib/libz.a"]);
    }

    #[rstest]
    fn archives_are_downloaded_then_extracted(build: BuildContext) {
        let text = "fetch:\n  url:\n    url: https://example.com/dl/lib-1.0.tar.gz\n";
        let manifest = DependencyManifest::parse("lib", text).expect("parse");
        let mut extension = DependencyExtension::new(manifest).expect("extension");
        let mut readiness = ReadinessBoard::new();
        let mut recipe = Recipe::new("/p");
        let mut ctx = HookContext {
            build: &build,
            readiness: &mut readiness,
        };
        extension.hook_recipe(&mut ctx, &mut recipe).expect("hook");

        let extract = recipe.step("extract lib").expect("extract");
        assert!(extract
            .inputs()
            .contains(Utf8Path::new("/p/third_party/lib-1.0.tar.gz")));
        assert!(extract.produces(Utf8Path::new("/p/third_party/lib")));
        assert!(recipe.step("configure lib").is_none());
    }

    #[rstest]
    fn users_receive_ready_paths_and_arguments(build: BuildContext) {
        let manifest = DependencyManifest::parse("zlib", ZLIB).expect("parse");
        let mut extension = DependencyExtension::new(manifest).expect("extension");
        let mut readiness = ReadinessBoard::new();
        readiness.publish("zlib", ["/p/build/fast/PREFIX/lib/libz.a"]);
        let mut ctx = HookContext {
            build: &build,
            readiness: &mut readiness,
        };

        let mut files = SourceMap::new();
        let mut user = File::new("/p/src/gz.cc");
        user.system_includes.push("zlib.h".to_owned());
        files.insert(user.path.clone(), user);
        let mut other = File::new("/p/src/app.cc");
        other.system_includes.push("notzlib.h".to_owned());
        files.insert(other.path.clone(), other);
        let mut recipe = Recipe::new("/p");
        extension
            .hook_srcs(&mut ctx, &mut files, &mut recipe)
            .expect("hook_srcs");
        let gz = files.get(Utf8Path::new("/p/src/gz.cc")).expect("gz");
        assert!(gz.requires.contains("zlib"));
        let app = files.get(Utf8Path::new("/p/src/app.cc")).expect("app");
        assert!(app.requires.is_empty());

        let object = ObjectFile {
            path: Utf8PathBuf::from("/p/build/fast/obj/gz.o"),
            source: Utf8PathBuf::from("/p/src/gz.cc"),
            variant: "fast".to_owned(),
            deps: BTreeSet::new(),
            compile_args: Vec::new(),
            requires: gz.requires.clone(),
        };
        let binary = Binary {
            path: Utf8PathBuf::from("/p/build/fast/gz"),
            variant: "fast".to_owned(),
            main_source: object.source.clone(),
            objects: vec![object.path.clone()],
            link_args: Vec::new(),
            run_args: Vec::new(),
            libraries: Vec::new(),
            test: false,
        };
        let mut plan = Plan {
            objects: vec![object],
            binaries: vec![binary],
        };
        extension
            .hook_plan(&mut ctx, &files, &mut plan, &mut recipe)
            .expect("hook_plan");
        let object = plan.objects.first().expect("object");
        assert!(object
            .deps
            .contains(Utf8Path::new("/p/build/fast/PREFIX/lib/libz.a")));
        assert_eq!(object.compile_args, vec!["-I/p/build/fast/PREFIX/include"]);
        let binary = plan.binaries.first().expect("binary");
        assert_eq!(binary.link_args, vec!["-lz"]);
    }
}

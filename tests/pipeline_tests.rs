//! Planning whole projects into recipes.

#![allow(clippy::expect_used, reason = "tests operate on temporary projects")]

use std::collections::BTreeSet;
use std::env::consts::EXE_SUFFIX;
use std::fs;

use camino::Utf8PathBuf;
use kiln::context::{BuildContext, ProjectLayout};
use kiln::pipeline::{COMPILE_COMMANDS_SHORTCUT, PlannedBuild, build_recipe};
use kiln::recipe::{ConfigurationError, Recipe};
use kiln::runner::registry_for;
use kiln::variant::VariantSet;
use rstest::{fixture, rstest};
use test_support::ProjectTree;

const ZLIB: &str = r#"
fetch:
  git:
    url: https://github.com/madler/zlib.git
    tag: v1.3.1
configure:
  system: cmake
outputs:
  - "{PREFIX}/lib/libz.a"
include_pattern: "zlib\\.h"
compile_args: ["-I{PREFIX}/include"]
link_args: ["-lz"]
"#;

#[fixture]
fn tree() -> ProjectTree {
    let tree = ProjectTree::new().expect("project");
    tree.source("deep.hh", "#pragma once\n").expect("deep.hh");
    tree.source("util.hh", "#pragma once\n#include \"deep.hh\"\n")
        .expect("util.hh");
    tree.source("util.cc", "#include \"util.hh\"\n").expect("util.cc");
    tree.source(
        "app.cc",
        "#pragma kiln main\n#include <cstdio>\n#include \"util.hh\"\n",
    )
    .expect("app.cc");
    tree
}

fn context(tree: &ProjectTree) -> BuildContext {
    let variant = VariantSet::builtin().get("fast").cloned().expect("fast");
    BuildContext::new(ProjectLayout::new(tree.root()), variant)
}

fn plan(ctx: &BuildContext) -> PlannedBuild {
    build_recipe(ctx, &registry_for(ctx)).expect("planning succeeds")
}

fn shortcuts(recipe: &Recipe) -> Vec<&str> {
    recipe.steps().iter().map(|step| step.shortcut()).collect()
}

type StepShape = (String, BTreeSet<Utf8PathBuf>, BTreeSet<Utf8PathBuf>);

fn shape(recipe: &Recipe) -> BTreeSet<StepShape> {
    recipe
        .steps()
        .iter()
        .map(|step| {
            (
                step.shortcut().to_owned(),
                step.inputs().clone(),
                step.outputs().clone(),
            )
        })
        .collect()
}

#[rstest]
fn core_steps_cover_sources_and_mains(tree: ProjectTree) {
    let planned = plan(&context(&tree));
    let names = shortcuts(&planned.recipe);
    for expected in ["app.o", "util.o", "link app", "app", COMPILE_COMMANDS_SHORTCUT] {
        assert!(names.contains(&expected), "missing {expected} in {names:?}");
    }
    assert!(!names.contains(&"tests"));
    assert_eq!(planned.plan.binaries.len(), 1);
}

#[rstest]
fn planning_twice_yields_the_same_steps(tree: ProjectTree) {
    let ctx = context(&tree);
    assert_eq!(shape(&plan(&ctx).recipe), shape(&plan(&ctx).recipe));
}

#[rstest]
fn objects_depend_on_transitive_includes_and_the_identity_marker(tree: ProjectTree) {
    let ctx = context(&tree);
    let planned = plan(&ctx);
    let step = planned.recipe.step("app.o").expect("app.o");
    let identity = ctx.variant_paths().identity;
    assert!(step.inputs().contains(&tree.root().join("src/deep.hh")));
    assert!(step.inputs().contains(&identity));
    assert!(step.inputs().contains(&ctx.layout.compile_commands));
    let marker = fs::read_to_string(&identity).expect("identity marker");
    assert!(marker.starts_with("variant fast\n"));
}

#[rstest]
fn companion_sources_are_linked(tree: ProjectTree) {
    let planned = plan(&context(&tree));
    let link = planned.recipe.step("link app").expect("link app");
    let inputs: Vec<&str> = link
        .inputs()
        .iter()
        .filter_map(|path| path.file_name())
        .collect();
    assert_eq!(inputs, vec!["app.o", "util.o"]);
}

#[rstest]
fn targets_prune_to_their_producers(tree: ProjectTree) {
    let mut recipe = plan(&context(&tree)).recipe;
    recipe.set_target("link app", &[]).expect("target");
    let names: BTreeSet<&str> = shortcuts(&recipe).into_iter().collect();
    assert_eq!(
        names,
        BTreeSet::from(["app.o", "util.o", "link app", COMPILE_COMMANDS_SHORTCUT])
    );
}

#[rstest]
fn targets_match_relative_output_paths(tree: ProjectTree) {
    let mut recipe = plan(&context(&tree)).recipe;
    recipe
        .set_target(&format!("build/fast/app{EXE_SUFFIX}"), &[])
        .expect("target");
    assert!(shortcuts(&recipe).contains(&"link app"));
    assert!(!shortcuts(&recipe).contains(&"app"));
}

#[rstest]
fn unknown_targets_suggest_close_shortcuts(tree: ProjectTree) {
    let mut recipe = plan(&context(&tree)).recipe;
    let err = recipe.set_target("ap", &[]).expect_err("unknown target");
    match err {
        ConfigurationError::UnknownTarget {
            target,
            close_matches,
            ..
        } => {
            assert_eq!(target, "ap");
            assert!(close_matches.iter().any(|name| name == "app"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[rstest]
fn compile_commands_can_be_disabled(tree: ProjectTree) {
    let mut ctx = context(&tree);
    ctx.compile_commands = false;
    let planned = plan(&ctx);
    assert!(planned.recipe.step(COMPILE_COMMANDS_SHORTCUT).is_none());
    let step = planned.recipe.step("util.o").expect("util.o");
    assert!(!step.inputs().contains(&ctx.layout.compile_commands));
}

#[rstest]
fn test_mains_get_a_tests_step(tree: ProjectTree) {
    tree.source("math_test.cc", "#pragma kiln main\n#include \"util.hh\"\n")
        .expect("math_test.cc");
    let ctx = context(&tree);
    let planned = plan(&ctx);
    let tests = planned.recipe.step("tests").expect("tests step");
    let binary = ctx.variant_paths().base.join(format!("math_test{EXE_SUFFIX}"));
    assert!(tests.inputs().contains(&binary));
    assert!(!tests.inputs().iter().any(|input| input.as_str().ends_with("/app")));
}

#[rstest]
fn extra_variants_get_prefixed_steps(tree: ProjectTree) {
    let mut ctx = context(&tree);
    ctx.extra_variants
        .push(VariantSet::builtin().get("debug").cloned().expect("debug"));
    let planned = plan(&ctx);
    let names = shortcuts(&planned.recipe);
    assert!(names.contains(&"app.o"));
    assert!(names.contains(&"debug app.o"));
    assert!(names.contains(&"debug link app"));
    assert!(tree.root().join("build/debug/toolchain.args").exists());
}

#[rstest]
fn dependency_manifests_wire_into_their_users(tree: ProjectTree) {
    tree.extension("zlib", ZLIB).expect("manifest");
    tree.source("zip.cc", "#pragma kiln main\n#include <zlib.h>\n")
        .expect("zip.cc");
    let ctx = context(&tree);
    let PlannedBuild {
        mut recipe,
        plan: planned,
        ..
    } = plan(&ctx);
    let library = ctx.variant_paths().prefix.join("lib/libz.a");

    let zip = recipe.step("zip.o").expect("zip.o");
    assert!(zip.inputs().contains(&library));
    let app = recipe.step("app.o").expect("app.o");
    assert!(!app.inputs().contains(&library));
    let binary = planned
        .binaries
        .iter()
        .find(|binary| binary.stem() == "zip")
        .expect("zip binary");
    assert!(binary.link_args.contains(&"-lz".to_owned()));

    recipe.set_target("link zip", &[]).expect("target");
    let names = shortcuts(&recipe);
    for expected in ["get zlib", "configure zlib", "install zlib", "zip.o", "link zip"] {
        assert!(names.contains(&expected), "missing {expected} in {names:?}");
    }
    assert!(!names.contains(&"app.o"));
}

#[rstest]
fn broken_manifests_do_not_stop_planning(tree: ProjectTree) {
    tree.extension("broken", "fetch: [not, a, mapping]\n")
        .expect("manifest");
    let planned = plan(&context(&tree));
    assert!(planned.recipe.step("link app").is_some());
    assert!(planned.recipe.step("get broken").is_none());
}

#[rstest]
fn same_stem_sources_report_both_paths(tree: ProjectTree) {
    let legacy = tree.source("legacy/util.c", "int legacy;\n").expect("legacy/util.c");
    let ctx = context(&tree);
    let err = build_recipe(&ctx, &registry_for(&ctx)).expect_err("objects collide");
    match err.downcast_ref::<ConfigurationError>() {
        Some(ConfigurationError::ObjectCollision { object, first, second }) => {
            assert_eq!(object, &ctx.variant_paths().objects.join("util.o"));
            assert_eq!(first, &legacy);
            assert_eq!(second, &tree.root().join("src/util.cc"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[cfg(unix)]
mod end_to_end {
    use super::*;
    use kiln::fingerprint::{ChangeDetector, FingerprintCache};
    use kiln::pipeline::CompileCommand;
    use kiln::scheduler::{Outcome, Scheduler};
    use kiln::status::SilentReporter;
    use std::time::Duration;
    use test_support::fake_compiler;

    fn build(ctx: &BuildContext, target: &str) -> Vec<String> {
        let mut recipe = plan(ctx).recipe;
        recipe.set_target(target, &[]).expect("target");
        let detector = ChangeDetector::new(FingerprintCache::new(ctx.variant_paths().hashes));
        match Scheduler::new(detector, &SilentReporter)
            .execute(&mut recipe, None)
            .expect("build succeeds")
        {
            Outcome::Completed(summary) => summary.executed,
            Outcome::Interrupted => panic!("no watcher was given"),
        }
    }

    #[rstest]
    fn header_edits_rebuild_every_includer(tree: ProjectTree) {
        let tools = tree.tools_dir().expect("tools");
        let compiler = fake_compiler(&tools, "fake-cc", &tools.join("log")).expect("compiler");
        let mut ctx = context(&tree);
        ctx.toolchain.c_compiler = compiler.to_string();
        ctx.toolchain.cxx_compiler = compiler.to_string();

        let first: BTreeSet<String> = build(&ctx, "link app").into_iter().collect();
        assert_eq!(
            first,
            BTreeSet::from(
                ["app.o", "util.o", "link app", COMPILE_COMMANDS_SHORTCUT].map(str::to_owned)
            )
        );
        assert!(build(&ctx, "link app").is_empty());

        let database = fs::read_to_string(&ctx.layout.compile_commands).expect("database");
        let entries: Vec<CompileCommand> = serde_json::from_str(&database).expect("json");
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|entry| entry.arguments.contains(&"-c".to_owned())));

        tree.edit_later(
            &tree.root().join("src/deep.hh"),
            "#pragma once\nint deep;\n",
            Duration::from_secs(5),
        )
        .expect("edit deep.hh");
        // The fake compiler only copies the source, so both objects come out
        // byte-identical and the link is skipped.
        let second: BTreeSet<String> = build(&ctx, "link app").into_iter().collect();
        assert_eq!(
            second,
            BTreeSet::from(["app.o", "util.o"].map(str::to_owned))
        );
    }
}

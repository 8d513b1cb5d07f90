//! Compile, link and run steps for planned objects and binaries.

use std::fs;
use std::io::ErrorKind;

use anyhow::Context as _;
use camino::{Utf8Path, Utf8PathBuf};

use super::compile_db::CompileCommand;
use crate::context::BuildContext;
use crate::plan::{Binary, ObjectFile};
use crate::process::Invocation;
use crate::recipe::{Action, ConfigurationError, Recipe, StepSpec};
use crate::variant::BuildVariant;

/// Whether `arg` selects a C++ language standard, which C compilers reject.
fn is_cxx_standard(arg: &str) -> bool {
    arg.strip_prefix("-std=")
        .is_some_and(|standard| standard.contains("++"))
}

fn remove_if_present(path: &Utf8Path) -> anyhow::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != ErrorKind::NotFound => {
            Err(err).with_context(|| format!("failed to remove {path}"))
        }
        _ => Ok(()),
    }
}

/// Shortcut of a core step, prefixed with the variant name unless it
/// belongs to the current variant.
pub(crate) fn scoped(ctx: &BuildContext, variant: &str, shortcut: &str) -> String {
    if ctx.is_current(variant) {
        shortcut.to_owned()
    } else {
        format!("{variant} {shortcut}")
    }
}

fn scoped_desc(ctx: &BuildContext, variant: &str, desc: String) -> String {
    if ctx.is_current(variant) {
        desc
    } else {
        format!("{desc} ({variant})")
    }
}

/// Compiler invocation for `object`.
pub(crate) fn compile_invocation(
    ctx: &BuildContext,
    variant: &BuildVariant,
    object: &ObjectFile,
) -> Invocation {
    let is_c = object.source.extension() == Some("c");
    let flags = variant
        .compile_args()
        .into_iter()
        .chain(variant.prefix_compile_args(&ctx.layout.build_dir))
        .chain(ctx.toolchain.cxxflags.iter().cloned())
        .chain(object.compile_args.iter().cloned())
        .filter(|arg| !(is_c && is_cxx_standard(arg)));
    Invocation::new(ctx.toolchain.compiler(is_c))
        .args(flags)
        .arg(object.source.as_str())
        .args(["-c", "-o", object.path.as_str()])
}

/// Linker invocation for `binary`.
pub(crate) fn link_invocation(
    ctx: &BuildContext,
    variant: &BuildVariant,
    binary: &Binary,
) -> Invocation {
    let libraries = binary.libraries.iter().map(|library| {
        let name = library.strip_suffix(".lib").unwrap_or(library);
        format!("-l{name}")
    });
    Invocation::new(ctx.toolchain.compiler(false))
        .args(binary.objects.iter().map(Utf8PathBuf::as_path).map(Utf8Path::as_str))
        .args(variant.link_args())
        .args(variant.prefix_link_args(&ctx.layout.build_dir))
        .args(ctx.toolchain.ldflags.iter().cloned())
        .args(binary.link_args.iter().cloned())
        .args(libraries)
        .args(["-o", binary.path.as_str()])
}

/// Add the compile step of `object` and return its database entry.
pub(crate) fn add_compile_step(
    ctx: &BuildContext,
    variant: &BuildVariant,
    object: &ObjectFile,
    recipe: &mut Recipe,
) -> Result<CompileCommand, ConfigurationError> {
    let invocation = compile_invocation(ctx, variant, object);
    let entry = CompileCommand {
        directory: ctx.layout.root.to_string(),
        file: object.source.to_string(),
        output: object.path.to_string(),
        arguments: invocation.argv(),
    };
    let output = object.path.clone();
    let mut spec = StepSpec::new(Action::process(invocation))
        .desc(scoped_desc(ctx, &object.variant, format!("Compiling {}", object.name())))
        .shortcut(scoped(ctx, &object.variant, object.name()))
        .inputs(object.deps.iter().cloned())
        .output(object.path.clone())
        .cleanup(move || remove_if_present(&output));
    if ctx.compile_commands {
        spec = spec.input(ctx.layout.compile_commands.clone());
    }
    recipe.add_step(spec)?;
    recipe.mark_generated(object.path.clone());
    Ok(entry)
}

/// Add the link and run steps of `binary`.
pub(crate) fn add_binary_steps(
    ctx: &BuildContext,
    variant: &BuildVariant,
    binary: &Binary,
    recipe: &mut Recipe,
) -> Result<(), ConfigurationError> {
    let output = binary.path.clone();
    recipe.add_step(
        StepSpec::new(Action::process(link_invocation(ctx, variant, binary)))
            .desc(scoped_desc(ctx, &binary.variant, format!("Linking {}", binary.name())))
            .shortcut(scoped(ctx, &binary.variant, &format!("link {}", binary.stem())))
            .inputs(binary.objects.iter().cloned())
            .output(binary.path.clone())
            .cleanup(move || remove_if_present(&output)),
    )?;
    recipe.mark_generated(binary.path.clone());

    let mut run = Invocation::new(binary.path.as_str()).args(binary.run_args.iter().cloned());
    if ctx.is_current(&binary.variant) {
        run = run.args(ctx.extra_run_args.iter().cloned());
    }
    recipe.add_step(
        StepSpec::new(Action::process(run))
            .desc(scoped_desc(ctx, &binary.variant, format!("Running {}", binary.name())))
            .shortcut(scoped(ctx, &binary.variant, binary.stem()))
            .input(binary.path.clone()),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ProjectLayout;
    use crate::toolchain::Toolchain;
    use rstest::{fixture, rstest};
    use std::collections::BTreeSet;

    #[fixture]
    fn ctx() -> BuildContext {
        let mut ctx = BuildContext::new(
            ProjectLayout::new("/p"),
            BuildVariant::new("fast").with_compile_args(["-O1", "-std=gnu++26"]),
        );
        ctx.toolchain = Toolchain {
            cxxflags: vec!["-Wall".to_owned()],
            ldflags: vec!["-fuse-ld=lld".to_owned()],
            ..Toolchain::default()
        };
        ctx
    }

    fn object(source: &str, args: &[&str]) -> ObjectFile {
        let source = Utf8PathBuf::from(source);
        ObjectFile {
            path: Utf8PathBuf::from(format!(
                "/p/build/fast/obj/{}.o",
                source.file_stem().unwrap_or_default()
            )),
            source,
            variant: "fast".to_owned(),
            deps: BTreeSet::new(),
            compile_args: args.iter().map(|&arg| arg.to_owned()).collect(),
            requires: BTreeSet::new(),
        }
    }

    #[rstest]
    #[case("-std=gnu++26", true)]
    #[case("-std=c++17", true)]
    #[case("-std=c11", false)]
    #[case("-O2", false)]
    fn recognises_cxx_standards(#[case] arg: &str, #[case] expected: bool) {
        assert_eq!(is_cxx_standard(arg), expected);
    }

    #[rstest]
    fn cxx_sources_use_the_cxx_compiler_with_all_flags(ctx: BuildContext) {
        let argv = compile_invocation(&ctx, &ctx.variant, &object("/p/src/main.cc", &["-DX"]))
            .argv();
        assert_eq!(
            argv,
            vec![
                "c++",
                "-O1",
                "-std=gnu++26",
                "-I",
                "/p/build/fast/PREFIX/include",
                "-Wall",
                "-DX",
                "/p/src/main.cc",
                "-c",
                "-o",
                "/p/build/fast/obj/main.o"
            ]
        );
    }

    #[rstest]
    fn c_sources_drop_cxx_standards(ctx: BuildContext) {
        let argv = compile_invocation(&ctx, &ctx.variant, &object("/p/src/a.c", &["-std=c++20"]))
            .argv();
        assert_eq!(argv.first().map(String::as_str), Some("cc"));
        assert!(argv.iter().all(|arg| !is_cxx_standard(arg)));
        assert!(argv.contains(&"-O1".to_owned()));
    }

    #[rstest]
    fn link_orders_objects_flags_and_libraries(ctx: BuildContext) {
        let binary = Binary {
            path: Utf8PathBuf::from("/p/build/fast/app"),
            variant: "fast".to_owned(),
            main_source: Utf8PathBuf::from("/p/src/app.cc"),
            objects: vec![Utf8PathBuf::from("/p/build/fast/obj/app.o")],
            link_args: vec!["-pthread".to_owned()],
            run_args: Vec::new(),
            libraries: vec!["ws2_32.lib".to_owned(), "m".to_owned()],
            test: false,
        };
        let argv = link_invocation(&ctx, &ctx.variant, &binary).argv();
        assert_eq!(
            argv,
            vec![
                "c++",
                "/p/build/fast/obj/app.o",
                "-L",
                "/p/build/fast/PREFIX/lib",
                "-L",
                "/p/build/fast/PREFIX/lib64",
                "-fuse-ld=lld",
                "-pthread",
                "-lws2_32",
                "-lm",
                "-o",
                "/p/build/fast/app"
            ]
        );
    }

    #[rstest]
    #[case("fast", "main.o")]
    #[case("debug", "debug main.o")]
    fn non_current_variants_get_prefixed_shortcuts(
        ctx: BuildContext,
        #[case] variant: &str,
        #[case] expected: &str,
    ) {
        assert_eq!(scoped(&ctx, variant, "main.o"), expected);
    }
}

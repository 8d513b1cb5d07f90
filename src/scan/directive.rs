//! Line-level recognition of preprocessor directives and kiln pragmas.

/// Which argument list a pragma contributes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgTarget {
    /// Arguments passed when compiling the file.
    Compile,
    /// Arguments passed when linking binaries that contain the file.
    Link,
    /// Arguments passed when running binaries that contain the file.
    Run,
}

impl ArgTarget {
    fn parse(word: &str) -> Option<Self> {
        match word {
            "compile" => Some(Self::Compile),
            "link" => Some(Self::Link),
            "run" => Some(Self::Run),
            _ => None,
        }
    }
}

/// A directive recognised on one source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Directive<'a> {
    If(&'a str),
    IfDef(&'a str),
    IfNDef(&'a str),
    Elif(&'a str),
    Else,
    EndIf,
    SystemInclude(&'a str),
    LocalInclude(&'a str),
    CommentLib(&'a str),
    Main,
    AddArgument {
        variant: &'a str,
        target: ArgTarget,
        value: &'a str,
    },
}

/// Pragma namespace owned by kiln.
const PRAGMA_NAMESPACE: &str = "kiln";

/// Recognise the directive on `line`, if any.
pub(crate) fn parse_line(line: &str) -> Option<Directive<'_>> {
    let body = line.trim_start().strip_prefix('#')?.trim_start();
    let (keyword, after_keyword) = split_word(body);
    let rest = after_keyword.trim();
    match keyword {
        "if" => Some(Directive::If(rest)),
        "ifdef" => Some(Directive::IfDef(first_word(rest))),
        "ifndef" => Some(Directive::IfNDef(first_word(rest))),
        "elif" => Some(Directive::Elif(rest)),
        "else" => Some(Directive::Else),
        "endif" => Some(Directive::EndIf),
        "include" => parse_include(rest),
        "pragma" => parse_pragma(rest),
        _ => None,
    }
}

fn split_word(text: &str) -> (&str, &str) {
    let end = text
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(text.len());
    text.split_at(end)
}

fn first_word(text: &str) -> &str {
    split_word(text.trim_start()).0
}

fn parse_include(rest: &str) -> Option<Directive<'_>> {
    if let Some(inner) = rest.strip_prefix('<') {
        let (path, _) = inner.split_once('>')?;
        return is_include_path(path).then_some(Directive::SystemInclude(path));
    }
    let inner = rest.strip_prefix('"')?;
    let (path, _) = inner.split_once('"')?;
    let header = path.ends_with(".h") || path.ends_with(".hh");
    (header && is_include_path(path)).then_some(Directive::LocalInclude(path))
}

fn is_include_path(path: &str) -> bool {
    !path.is_empty()
        && path
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '/' | '.' | '-' | '+'))
}

fn parse_pragma(rest: &str) -> Option<Directive<'_>> {
    if let Some(args) = rest.strip_prefix("comment") {
        return parse_comment_lib(args.trim_start());
    }
    let (namespace, body) = split_word(rest);
    if namespace != PRAGMA_NAMESPACE {
        return None;
    }
    let (verb, tail) = split_word(body.trim_start());
    match verb {
        "main" => Some(Directive::Main),
        "add" => parse_add_argument(tail.trim_start()),
        _ => None,
    }
}

/// `(lib, "name")`
fn parse_comment_lib(args: &str) -> Option<Directive<'_>> {
    let after_lib = args.strip_prefix('(')?.trim_start().strip_prefix("lib")?;
    let after_comma = after_lib.trim_start().strip_prefix(',')?.trim_start();
    let quoted = after_comma.strip_prefix('"')?;
    let (name, _) = quoted.split_once('"')?;
    is_include_path(name).then_some(Directive::CommentLib(name))
}

/// `[variant] {compile|link|run} argument "<value>"`
fn parse_add_argument(text: &str) -> Option<Directive<'_>> {
    let (first, after_first) = split_word(text);
    let (variant, target, tail) = match ArgTarget::parse(first) {
        Some(shared) => ("", shared, after_first),
        None => {
            let (second, after_second) = split_word(after_first.trim_start());
            (first, ArgTarget::parse(second)?, after_second)
        }
    };
    let argument = tail.trim_start().strip_prefix("argument")?.trim_start();
    let quoted = argument.strip_prefix('"')?;
    let end = quoted.rfind('"')?;
    let value = quoted.get(..end)?;
    (!value.is_empty()).then_some(Directive::AddArgument {
        variant,
        target,
        value,
    })
}

//! Minimal conditional-compilation evaluator.
//!
//! Only enough of the preprocessor is modelled to skip platform- and
//! variant-gated includes: `defined` checks, bare identifiers, integer
//! literals, negation, and `&&`/`||` chains. Anything else is false.

use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy)]
struct Frame {
    parent_active: bool,
    taken: bool,
    active: bool,
}

/// Tracks which regions of a file are active while scanning it line by line.
#[derive(Debug)]
pub(crate) struct ConditionalStack<'d> {
    defines: &'d BTreeSet<String>,
    frames: Vec<Frame>,
}

impl<'d> ConditionalStack<'d> {
    pub(crate) const fn new(defines: &'d BTreeSet<String>) -> Self {
        Self {
            defines,
            frames: Vec::new(),
        }
    }

    /// Whether lines at the current position are compiled.
    pub(crate) fn is_active(&self) -> bool {
        self.frames.last().is_none_or(|frame| frame.active)
    }

    pub(crate) fn push_if(&mut self, expr: &str) {
        let cond = self.evaluate(expr);
        self.push(cond);
    }

    pub(crate) fn push_ifdef(&mut self, name: &str, negate: bool) {
        let cond = self.defines.contains(name) != negate;
        self.push(cond);
    }

    fn push(&mut self, cond: bool) {
        let parent_active = self.is_active();
        self.frames.push(Frame {
            parent_active,
            taken: parent_active && cond,
            active: parent_active && cond,
        });
    }

    /// Returns `false` when there is no open conditional.
    pub(crate) fn elif(&mut self, expr: &str) -> bool {
        let cond = self.evaluate(expr);
        let Some(frame) = self.frames.last_mut() else {
            return false;
        };
        frame.active = frame.parent_active && !frame.taken && cond;
        frame.taken |= frame.active;
        true
    }

    /// Returns `false` when there is no open conditional.
    pub(crate) fn otherwise(&mut self) -> bool {
        let Some(frame) = self.frames.last_mut() else {
            return false;
        };
        frame.active = frame.parent_active && !frame.taken;
        frame.taken = true;
        true
    }

    /// Returns `false` when there is no open conditional.
    pub(crate) fn end(&mut self) -> bool {
        self.frames.pop().is_some()
    }

    fn evaluate(&self, expr: &str) -> bool {
        strip_comment(expr).split("||").any(|clause| {
            clause
                .split("&&")
                .all(|term| self.evaluate_term(term.trim()))
        })
    }

    fn evaluate_term(&self, term: &str) -> bool {
        if let Some(inner) = term.strip_prefix('!') {
            return !self.evaluate_term(inner.trim_start());
        }
        let bare = strip_parens(term);
        if let Some(rest) = bare.strip_prefix("defined") {
            let name = strip_parens(rest.trim());
            return self.defines.contains(name);
        }
        if let Ok(value) = bare.parse::<i64>() {
            return value != 0;
        }
        is_identifier(bare) && self.defines.contains(bare)
    }
}

fn strip_comment(expr: &str) -> &str {
    let end = [expr.find("//"), expr.find("/*")]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(expr.len());
    expr.get(..end).unwrap_or(expr)
}

fn strip_parens(term: &str) -> &str {
    let mut current = term.trim();
    while let Some(inner) = current
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
    {
        current = inner.trim();
    }
    current
}

fn is_identifier(term: &str) -> bool {
    !term.is_empty() && term.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn defines() -> BTreeSet<String> {
        ["__linux__", "_DEBUG"].into_iter().map(String::from).collect()
    }

    #[rstest]
    #[case("defined(__linux__)", true)]
    #[case("defined __linux__", true)]
    #[case("!defined(_WIN32)", true)]
    #[case("defined(_WIN32) || defined(__linux__)", true)]
    #[case("defined(_WIN32) && defined(__linux__)", false)]
    #[case("_DEBUG // debug only", true)]
    #[case("0", false)]
    #[case("1", true)]
    #[case("__has_include(<foo.h>)", false)]
    fn evaluates_expressions(#[case] expr: &str, #[case] expected: bool) {
        let defines = defines();
        let stack = ConditionalStack::new(&defines);
        assert_eq!(stack.evaluate(expr), expected);
    }

    #[rstest]
    fn elif_chain_takes_first_true_branch_only() {
        let defines = defines();
        let mut stack = ConditionalStack::new(&defines);
        stack.push_if("defined(_WIN32)");
        assert!(!stack.is_active());
        assert!(stack.elif("defined(__linux__)"));
        assert!(stack.is_active());
        assert!(stack.elif("1"));
        assert!(!stack.is_active());
        assert!(stack.otherwise());
        assert!(!stack.is_active());
        assert!(stack.end());
        assert!(stack.is_active());
    }

    #[rstest]
    fn nested_regions_stay_inactive_inside_inactive_parent() {
        let defines = defines();
        let mut stack = ConditionalStack::new(&defines);
        stack.push_ifdef("_WIN32", false);
        stack.push_ifdef("__linux__", false);
        assert!(!stack.is_active());
        assert!(stack.otherwise());
        assert!(!stack.is_active());
        assert!(stack.end());
        assert!(stack.end());
        assert!(!stack.end());
        assert!(stack.is_active());
    }
}

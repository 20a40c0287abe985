//! Heuristic line classification for recovering code from chatty model output.
//!
//! This is a best-effort filter, not a parser: it has known false positives
//! (prose that happens to start with `if ` or contain `=`) and false negatives
//! (unusual statement openers). Callers pick an implementation per language and
//! may supply their own through [`LineClassifier`].

use std::sync::LazyLock;

use regex::Regex;

/// Classification of a single line of model output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// Recognised statement opener, comment, or indented continuation.
    Code,
    /// Empty or whitespace-only.
    Blank,
    /// Conversational filler ("Sure, ...", "Here is ..."), dropped everywhere.
    Filler,
    /// Anything else.
    Prose,
}

/// Replaceable line classifier used by code extraction.
pub trait LineClassifier {
    fn classify(&self, line: &str) -> LineKind;

    /// Whether a whole block plausibly contains code.
    fn looks_like_code(&self, text: &str) -> bool {
        text.lines().any(|line| self.classify(line) == LineKind::Code)
    }
}

const FILLER_PHRASES: &[&str] = &[
    "sure",
    "here is",
    "here's",
    "here are",
    "let me",
    "i will",
    "i'll",
    "i've",
    "this code",
    "this program",
    "this script",
    "the code",
    "the program",
    "the script",
    "certainly",
    "of course",
    "explanation:",
    "note:",
    "now,",
    "first,",
    "next,",
    "finally,",
];

fn is_filler(trimmed: &str) -> bool {
    let lower = trimmed.to_lowercase();
    FILLER_PHRASES
        .iter()
        .any(|phrase| starts_with_phrase(&lower, phrase))
}

/// Phrase match that does not fire on identifiers such as `sure_count = 1`.
fn starts_with_phrase(lower: &str, phrase: &str) -> bool {
    let Some(rest) = lower.strip_prefix(phrase) else {
        return false;
    };
    match rest.chars().next() {
        None => true,
        Some(c) => !(c.is_alphanumeric() || c == '_' || c == '=' || c == '('),
    }
}

/// Classifier for Python source.
#[derive(Debug, Clone, Copy, Default)]
pub struct PythonLineClassifier;

static PYTHON_OPENER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:import|from|def|class|if|elif|else|for|while|try|except|finally|with|return|raise|assert|async|await|yield|break|continue|pass|global|nonlocal|lambda|del|print)\b",
    )
    .expect("python opener regex should be valid")
});

static PYTHON_ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][\w.,\s\[\]'\x22]*?\s*(?:[-+*/%&|^@]|//|\*\*|>>|<<)?=[^=]")
        .expect("python assignment regex should be valid")
});

/// Plain assignment to one or more names, e.g. `first, last = ...`.
static PYTHON_TARGET_ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[A-Za-z_][\w.]*(?:\s*,\s*[A-Za-z_][\w.]*)*\s*(?:[-+*/%&|^@]|//|\*\*|>>|<<)?=(?:[^=]|$)",
    )
    .expect("python target assignment regex should be valid")
});

static PYTHON_CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][\w.]*\s*\(").expect("python call regex should be valid")
});

impl LineClassifier for PythonLineClassifier {
    fn classify(&self, line: &str) -> LineKind {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return LineKind::Blank;
        }
        // Filler openers such as "first," or "sure" are also valid names.
        if PYTHON_TARGET_ASSIGNMENT.is_match(trimmed) {
            return LineKind::Code;
        }
        if is_filler(trimmed) {
            return LineKind::Filler;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            return LineKind::Code;
        }
        if trimmed.starts_with('#')
            || trimmed.starts_with('@')
            || trimmed.starts_with([')', ']', '}'])
            || trimmed.starts_with("\"\"\"")
            || trimmed.starts_with("'''")
        {
            return LineKind::Code;
        }
        if PYTHON_OPENER.is_match(trimmed)
            || PYTHON_ASSIGNMENT.is_match(trimmed)
            || PYTHON_CALL.is_match(trimmed)
        {
            return LineKind::Code;
        }
        LineKind::Prose
    }
}

/// Classifier for POSIX shell scripts.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellLineClassifier;

static SHELL_OPENER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:if|then|else|elif|fi|for|while|until|do|done|case|esac|function|local|export|set|unset|echo|printf|read|cd|exit|return|shift|test|true|false|source|\.|\[\[?)(?:\s|$|;)",
    )
    .expect("shell opener regex should be valid")
});

static SHELL_ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*=").expect("shell assignment regex should be valid")
});

impl LineClassifier for ShellLineClassifier {
    fn classify(&self, line: &str) -> LineKind {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return LineKind::Blank;
        }
        if is_filler(trimmed) {
            return LineKind::Filler;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            return LineKind::Code;
        }
        if trimmed.starts_with('#')
            || trimmed.starts_with('}')
            || trimmed.starts_with("$(")
            || trimmed.ends_with("() {")
        {
            return LineKind::Code;
        }
        if SHELL_OPENER.is_match(trimmed) || SHELL_ASSIGNMENT.is_match(trimmed) {
            return LineKind::Code;
        }
        LineKind::Prose
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn python_statement_openers_are_code() {
        let c = PythonLineClassifier;
        for line in [
            "import math",
            "from collections import Counter",
            "def main():",
            "for i in range(5):",
            "total = 0",
            "total += value",
            "items[0] = 3",
            "a, b = 1, 2",
            "print('hi')",
            "main()",
            "# comment",
            "@dataclass",
            "    return x",
            ")",
        ] {
            assert_eq!(c.classify(line), LineKind::Code, "{line}");
        }
    }

    #[test]
    fn python_filler_and_prose_are_detected() {
        let c = PythonLineClassifier;
        assert_eq!(c.classify("Sure! Here is the code:"), LineKind::Filler);
        assert_eq!(c.classify("Here's a script that prints"), LineKind::Filler);
        assert_eq!(c.classify("This code prints numbers."), LineKind::Filler);
        assert_eq!(c.classify("Output will be 1 to 5."), LineKind::Prose);
        assert_eq!(c.classify("   "), LineKind::Blank);
    }

    #[test]
    fn assignments_to_filler_words_are_code() {
        let c = PythonLineClassifier;
        for line in [
            "first, last = 'Ada Lovelace'.split()",
            "next, rest = xs[0], xs[1:]",
            "sure = 1",
            "finally_done, count = False, 0",
        ] {
            assert_eq!(c.classify(line), LineKind::Code, "{line}");
        }
        assert_eq!(c.classify("Sure, here is the code:"), LineKind::Filler);
        assert_eq!(c.classify("Next, we set total = 0"), LineKind::Filler);
    }

    #[test]
    fn filler_phrase_does_not_swallow_identifiers() {
        let c = PythonLineClassifier;
        assert_eq!(c.classify("sure_count = 1"), LineKind::Code);
        assert_eq!(c.classify("note = 'x'"), LineKind::Code);
    }

    #[test]
    fn comparisons_are_not_assignments() {
        let c = PythonLineClassifier;
        assert_eq!(c.classify("Result == expected"), LineKind::Prose);
    }

    #[test]
    fn shell_lines_are_classified() {
        let c = ShellLineClassifier;
        assert_eq!(c.classify("echo hello"), LineKind::Code);
        assert_eq!(c.classify("COUNT=3"), LineKind::Code);
        assert_eq!(c.classify("if [ -f x ]; then"), LineKind::Code);
        assert_eq!(c.classify("Here is the script:"), LineKind::Filler);
        assert_eq!(c.classify("It prints a greeting."), LineKind::Prose);
    }

    #[test]
    fn looks_like_code_checks_any_line() {
        let c = PythonLineClassifier;
        assert!(c.looks_like_code("Intro\nprint(1)\n"));
        assert!(!c.looks_like_code("Just some words.\nMore words."));
    }
}

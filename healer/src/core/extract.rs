//! Recovery of structured data and source code from free-form model output.
//!
//! Structured extraction runs an ordered chain of strategies and keeps the first
//! structurally valid result:
//!
//! 1. [`Strategy::FencedBlock`]: contents of fenced blocks, tagged or plain.
//! 2. [`Strategy::BalancedSpan`]: top-level bracket/brace spans found with a
//!    string-aware counter.
//! 3. [`Strategy::Normalized`]: the whole text after normalisation repairs.
//! 4. [`Strategy::Direct`]: the trimmed whole text.
//!
//! Every strategy returns a definite outcome; a miss carries its reason so it
//! can be traced without being confused with a downstream bug.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::core::classifier::{LineClassifier, LineKind, PythonLineClassifier};

/// A JSON object recovered from model output.
pub type Record = Map<String, Value>;

/// One structured extraction strategy, in chain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    FencedBlock,
    BalancedSpan,
    Normalized,
    Direct,
}

impl Strategy {
    pub const CHAIN: [Strategy; 4] = [
        Strategy::FencedBlock,
        Strategy::BalancedSpan,
        Strategy::Normalized,
        Strategy::Direct,
    ];
}

/// Why a strategy produced nothing.
#[derive(Debug)]
pub enum StrategyMiss {
    /// The strategy found nothing to parse.
    NoCandidate,
    /// Candidates were found but none parsed into an accepted shape.
    Rejected { candidates: usize, last_error: String },
}

static THINK_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<think>.*?</think>").expect("think block regex should be valid")
});

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[ \t]*([A-Za-z0-9_+\-.]*)[^\n`]*\n?(.*?)```")
        .expect("fence regex should be valid")
});

static TRAILING_COMMA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r",(\s*[\]}])").expect("trailing comma regex should be valid")
});

static BARE_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)(\s*):")
        .expect("bare key regex should be valid")
});

static SINGLE_QUOTED_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"'([^'\x22\n]*)'(\s*):").expect("single quoted key regex should be valid")
});

static SINGLE_QUOTED_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([:\[,]\s*)'([^'\x22\n]*)'").expect("single quoted value regex should be valid")
});

/// Remove reasoning-model `<think>` sections.
pub fn strip_reasoning(text: &str) -> String {
    THINK_BLOCK.replace_all(text, "").into_owned()
}

/// A fenced block: its language tag (possibly empty) and its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FencedBlock {
    pub tag: String,
    pub body: String,
}

/// All fenced blocks in order of appearance.
pub fn fenced_blocks(text: &str) -> Vec<FencedBlock> {
    FENCED_BLOCK
        .captures_iter(text)
        .map(|caps| FencedBlock {
            tag: caps
                .get(1)
                .map(|m| m.as_str().to_lowercase())
                .unwrap_or_default(),
            body: caps
                .get(2)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default(),
        })
        .collect()
}

/// Extract the first JSON value accepted by `accept`, running the strategy chain.
pub fn extract_json_with<T>(text: &str, accept: impl Fn(Value) -> Option<T>) -> Option<T> {
    let cleaned = strip_reasoning(text);
    if cleaned.trim().is_empty() {
        return None;
    }
    for strategy in Strategy::CHAIN {
        match run_strategy(strategy, &cleaned, &accept) {
            Ok(value) => {
                debug!(?strategy, "structured extraction succeeded");
                return Some(value);
            }
            Err(miss) => trace!(?strategy, ?miss, "strategy missed"),
        }
    }
    debug!("no extraction strategy produced a valid structure");
    None
}

/// Extract any JSON value (object or array).
pub fn extract_json(text: &str) -> Option<Value> {
    extract_json_with(text, |value| match value {
        Value::Object(_) | Value::Array(_) => Some(value),
        _ => None,
    })
}

/// Extract a list of records.
///
/// Accepts an array of objects, a single object (as a one-element list), or an
/// object wrapping such an array under `tasks`, `steps` or `items`.
pub fn extract_structured(text: &str) -> Option<Vec<Record>> {
    extract_json_with(text, records_from_value)
}

fn records_from_value(value: Value) -> Option<Vec<Record>> {
    match value {
        Value::Array(items) => {
            let mut records = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Object(map) => records.push(map),
                    _ => return None,
                }
            }
            Some(records)
        }
        Value::Object(mut map) => {
            for key in ["tasks", "steps", "items"] {
                if let Some(Value::Array(_)) = map.get(key) {
                    let inner = map.remove(key)?;
                    return records_from_value(inner);
                }
            }
            Some(vec![map])
        }
        _ => None,
    }
}

fn run_strategy<T>(
    strategy: Strategy,
    text: &str,
    accept: &impl Fn(Value) -> Option<T>,
) -> Result<T, StrategyMiss> {
    let candidates: Vec<String> = match strategy {
        Strategy::FencedBlock => fenced_blocks(text)
            .into_iter()
            .map(|block| block.body)
            .filter(|body| !body.is_empty())
            .collect(),
        Strategy::BalancedSpan => balanced_spans(text)
            .into_iter()
            .map(str::to_string)
            .collect(),
        Strategy::Normalized => normalize_json(text).into_iter().collect(),
        Strategy::Direct => vec![text.trim().to_string()],
    };
    first_accepted(&candidates, accept)
}

fn first_accepted<T>(
    candidates: &[String],
    accept: &impl Fn(Value) -> Option<T>,
) -> Result<T, StrategyMiss> {
    if candidates.is_empty() {
        return Err(StrategyMiss::NoCandidate);
    }
    let mut last_error = String::new();
    for candidate in candidates {
        match serde_json::from_str::<Value>(candidate) {
            Ok(value) => match accept(value) {
                Some(accepted) => return Ok(accepted),
                None => last_error = "parsed value has the wrong shape".to_string(),
            },
            Err(err) => last_error = err.to_string(),
        }
    }
    Err(StrategyMiss::Rejected {
        candidates: candidates.len(),
        last_error,
    })
}

/// Top-level balanced `{...}` / `[...]` spans, ignoring delimiters inside strings.
///
/// Nested spans are not reported separately, so a malformed outer array is never
/// silently replaced by one of its elements.
pub fn balanced_spans(text: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut stack: Vec<char> = Vec::new();
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if stack.is_empty() {
            match ch {
                '{' => stack.push('}'),
                '[' => stack.push(']'),
                _ => continue,
            }
            start = Some(idx);
            in_string = false;
            escaped = false;
            continue;
        }

        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(ch) {
                    // Mismatched closer: abandon the span.
                    stack.clear();
                    start = None;
                    continue;
                }
                if stack.is_empty()
                    && let Some(begin) = start.take()
                {
                    spans.push(&text[begin..idx + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }

    spans
}

/// Apply the normalisation repairs to the whole text.
///
/// Returns `None` when the text contains no bracket at all.
pub fn normalize_json(text: &str) -> Option<String> {
    let begin = text.find(['{', '['])?;
    let end = text.rfind(['}', ']'])?;
    if end < begin {
        return None;
    }
    let mut fixed = text[begin..=end].to_string();

    fixed = fixed
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");
    fixed = TRAILING_COMMA.replace_all(&fixed, "$1").into_owned();
    fixed = SINGLE_QUOTED_KEY
        .replace_all(&fixed, "\"$1\"$2:")
        .into_owned();
    fixed = SINGLE_QUOTED_VALUE
        .replace_all(&fixed, "$1\"$2\"")
        .into_owned();
    fixed = BARE_KEY.replace_all(&fixed, "$1\"$2\"$3:").into_owned();
    Some(fixed)
}

/// Extract source code using the default (Python) line classifier.
pub fn extract_code(text: &str) -> Option<String> {
    extract_code_with(text, &PythonLineClassifier, &["python", "py", "python3"])
}

/// Extract source code with an explicit classifier and preferred fence tags.
pub fn extract_code_with(
    text: &str,
    classifier: &dyn LineClassifier,
    fence_tags: &[&str],
) -> Option<String> {
    let cleaned = strip_reasoning(text);
    if cleaned.trim().is_empty() {
        return None;
    }

    let blocks = fenced_blocks(&cleaned);
    if let Some(block) = blocks
        .iter()
        .find(|block| fence_tags.contains(&block.tag.as_str()) && !block.body.is_empty())
    {
        debug!(tag = %block.tag, "code extracted from tagged fence");
        return Some(block.body.clone());
    }
    if let Some(block) = blocks
        .iter()
        .find(|block| !block.body.is_empty() && classifier.looks_like_code(&block.body))
    {
        debug!(tag = %block.tag, "code extracted from fence");
        return Some(block.body.clone());
    }

    if let Some(code) = keep_code_lines(&cleaned, classifier) {
        debug!("code extracted by line classification");
        return Some(code);
    }

    let trimmed = cleaned.trim();
    if classifier.looks_like_code(trimmed) {
        return Some(trimmed.to_string());
    }
    None
}

fn keep_code_lines(text: &str, classifier: &dyn LineClassifier) -> Option<String> {
    let mut kept: Vec<&str> = Vec::new();
    let mut started = false;

    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            continue;
        }
        match classifier.classify(line) {
            LineKind::Code => {
                started = true;
                kept.push(line);
            }
            LineKind::Blank if started => kept.push(line),
            LineKind::Blank | LineKind::Filler | LineKind::Prose => {}
        }
    }

    while kept.last().is_some_and(|line| line.trim().is_empty()) {
        kept.pop();
    }
    if kept.is_empty() {
        return None;
    }
    Some(kept.join("\n"))
}

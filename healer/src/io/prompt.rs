//! Prompt rendering for every model-facing step.
//!
//! Templates live in `prompts/*.md` and are split into sections with
//! `<!-- section:KEY required|droppable -->` markers. After rendering, sections
//! are trimmed to the configured byte budget.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::Environment;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::core::trail::AttemptDigest;

const GENERATE_TEMPLATE: &str = include_str!("prompts/generate.md");
const REPAIR_TEMPLATE: &str = include_str!("prompts/repair.md");
const DECOMPOSE_TEMPLATE: &str = include_str!("prompts/decompose.md");
const MERGE_TEMPLATE: &str = include_str!("prompts/merge.md");
const STRATEGY_TEMPLATE: &str = include_str!("prompts/strategy.md");
const INTENT_TEMPLATE: &str = include_str!("prompts/intent.md");
const CHAT_TEMPLATE: &str = include_str!("prompts/chat.md");

/// Sections dropped first when a prompt exceeds its budget.
const DROP_ORDER: [&str; 3] = ["guidelines", "history", "contract"];

const TRUNCATION_NOTICE: &str = "\n[truncated]";

static ENGINE: LazyLock<PromptEngine> = LazyLock::new(PromptEngine::new);

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        for (name, source) in [
            ("generate", GENERATE_TEMPLATE),
            ("repair", REPAIR_TEMPLATE),
            ("decompose", DECOMPOSE_TEMPLATE),
            ("merge", MERGE_TEMPLATE),
            ("strategy", STRATEGY_TEMPLATE),
            ("intent", INTENT_TEMPLATE),
            ("chat", CHAT_TEMPLATE),
        ] {
            env.add_template(name, source)
                .expect("prompt template should be valid");
        }
        Self { env }
    }

    fn render<T: Serialize>(&self, name: &str, input: &T) -> Result<String> {
        let template = self
            .env
            .get_template(name)
            .with_context(|| format!("load template {name}"))?;
        template
            .render(input)
            .with_context(|| format!("render template {name}"))
    }
}

/// One inlined value from an earlier task, already rendered as an assignment.
#[derive(Debug, Clone, Serialize)]
pub struct ContextLine {
    pub name: String,
    pub assignment: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratePrompt<'a> {
    pub language: &'a str,
    pub fence: &'a str,
    pub goal: &'a str,
    pub context: Vec<ContextLine>,
    pub exports: &'a [String],
}

#[derive(Debug, Clone, Serialize)]
pub struct RepairPrompt<'a> {
    pub language: &'a str,
    pub fence: &'a str,
    pub goal: &'a str,
    pub failing_code: &'a str,
    pub error_text: &'a str,
    pub history: &'a [AttemptDigest],
}

#[derive(Debug, Clone, Serialize)]
pub struct DecomposePrompt<'a> {
    pub language: &'a str,
    pub request: &'a str,
    pub max_tasks: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MergePart<'a> {
    pub goal: &'a str,
    pub code: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct MergePrompt<'a> {
    pub language: &'a str,
    pub fence: &'a str,
    pub request: &'a str,
    pub parts: Vec<MergePart<'a>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestPrompt<'a> {
    pub request: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct InputPrompt<'a> {
    pub input: &'a str,
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    /// Section identifier (e.g., "contract", "goal").
    key: String,
    /// Whether this section is required (cannot be dropped).
    required: bool,
    /// Section content, excluding the marker.
    content: String,
}

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
        .expect("section marker regex should be valid")
});

/// Parse sections from rendered template output using HTML comment markers.
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::with_capacity(markers.len());

    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let required = kind.as_str() == "required";
        let content = rendered[whole.end()..end].trim().to_string();
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }

    sections
}

/// Apply budget to parsed sections, dropping droppable sections as needed.
fn apply_budget_to_sections(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total_len =
        |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    if total_len(sections) <= budget {
        return;
    }

    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            break;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            let dropped_len = sections[idx].content.len();
            debug!(
                section = key,
                bytes_dropped = dropped_len,
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    // Still over budget: truncate the last section.
    let other_len: usize = sections
        .iter()
        .rev()
        .skip(1)
        .map(|s| s.content.len())
        .sum();
    let allowed = budget.saturating_sub(other_len);
    if let Some(last) = sections.last_mut()
        && last.content.len() > allowed
    {
        let before_len = last.content.len();
        if allowed > TRUNCATION_NOTICE.len() {
            truncate_on_char_boundary(&mut last.content, allowed - TRUNCATION_NOTICE.len());
            last.content.push_str(TRUNCATION_NOTICE);
        } else {
            truncate_on_char_boundary(&mut last.content, allowed);
        }
        debug!(
            section = %last.key,
            before_len,
            after_len = last.content.len(),
            "truncated section for budget"
        );
    }
}

fn truncate_on_char_boundary(text: &mut String, max_len: usize) {
    let mut cut = max_len.min(text.len());
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

/// Render sections back to a single string.
fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Builds prompts within a byte budget, dropping less critical sections first.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    /// Create a builder with the given byte budget.
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    fn build<T: Serialize>(&self, template: &str, input: &T) -> Result<String> {
        let rendered = ENGINE.render(template, input)?;
        let mut sections = parse_sections(&rendered);
        apply_budget_to_sections(&mut sections, self.budget_bytes);
        Ok(render_sections(&sections))
    }

    pub fn generate(&self, input: &GeneratePrompt<'_>) -> Result<String> {
        self.build("generate", input)
    }

    pub fn repair(&self, input: &RepairPrompt<'_>) -> Result<String> {
        self.build("repair", input)
    }

    pub fn decompose(&self, input: &DecomposePrompt<'_>) -> Result<String> {
        self.build("decompose", input)
    }

    pub fn merge(&self, input: &MergePrompt<'_>) -> Result<String> {
        self.build("merge", input)
    }

    pub fn strategy(&self, request: &str) -> Result<String> {
        self.build("strategy", &RequestPrompt { request })
    }

    pub fn intent(&self, input: &str) -> Result<String> {
        self.build("intent", &InputPrompt { input })
    }

    pub fn chat(&self, input: &str) -> Result<String> {
        self.build("chat", &InputPrompt { input })
    }
}

//! Code synthesis and revision through the language model.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, instrument, warn};

use crate::core::extract::extract_code_with;
use crate::core::language::Language;
use crate::core::trail::AttemptDigest;
use crate::core::types::{ContextVariable, HealError};
use crate::io::model::{CompletionRequest, LanguageModel};
use crate::io::prompt::{ContextLine, GeneratePrompt, PromptBuilder, RepairPrompt};

/// Inputs for producing fresh code.
#[derive(Debug, Clone)]
pub struct GenerationRequest<'a> {
    pub goal: &'a str,
    /// Values from earlier tasks, inlined as assignments.
    pub context: &'a [ContextVariable],
    /// Names the code must report with `RESULT: name = value`.
    pub exports: &'a [String],
}

/// Inputs for revising failing code.
#[derive(Debug, Clone)]
pub struct RevisionRequest<'a> {
    pub goal: &'a str,
    pub failing_code: &'a str,
    pub error_text: &'a str,
    pub history: &'a [AttemptDigest],
}

/// Turns goals and failures into code via the model.
#[derive(Debug, Clone)]
pub struct CodeSynthesizer<M> {
    model: M,
    model_name: String,
    language: Language,
    prompts: PromptBuilder,
}

impl<M: LanguageModel> CodeSynthesizer<M> {
    pub fn new(
        model: M,
        model_name: impl Into<String>,
        language: Language,
        prompts: PromptBuilder,
    ) -> Self {
        Self {
            model,
            model_name: model_name.into(),
            language,
            prompts,
        }
    }

    pub fn language(&self) -> Language {
        self.language
    }

    /// Generate code for `goal` with the given context and no required exports.
    pub fn synthesize(&self, goal: &str, context: &[ContextVariable]) -> Result<String, HealError> {
        self.generate(&GenerationRequest {
            goal,
            context,
            exports: &[],
        })
    }

    #[instrument(skip_all, fields(context = request.context.len(), exports = request.exports.len()))]
    pub fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, HealError> {
        let context = request
            .context
            .iter()
            .map(|var| ContextLine {
                name: var.name.clone(),
                assignment: render_assignment(self.language, &var.name, &var.value),
            })
            .collect();
        let prompt = self
            .prompts
            .generate(&GeneratePrompt {
                language: self.language.display_name(),
                fence: self.language.fence_tag(),
                goal: request.goal,
                context,
                exports: request.exports,
            })
            .map_err(|err| HealError::Generation(format!("{err:#}")))?;
        self.complete_code(prompt)
    }

    #[instrument(skip_all, fields(history = request.history.len()))]
    pub fn revise(&self, request: &RevisionRequest<'_>) -> Result<String, HealError> {
        let prompt = self
            .prompts
            .repair(&RepairPrompt {
                language: self.language.display_name(),
                fence: self.language.fence_tag(),
                goal: request.goal,
                failing_code: request.failing_code,
                error_text: request.error_text,
                history: request.history,
            })
            .map_err(|err| HealError::Generation(format!("{err:#}")))?;
        self.complete_code(prompt)
    }

    fn complete_code(&self, prompt: String) -> Result<String, HealError> {
        let reply = self
            .model
            .complete(&CompletionRequest::prompt(&self.model_name, prompt))
            .map_err(|err| {
                warn!(err = %err, "model call failed");
                HealError::Generation(format!("{err:#}"))
            })?;
        if reply.trim().is_empty() {
            return Err(HealError::Generation("model returned an empty reply".to_string()));
        }
        let code = extract_code_with(
            &reply,
            self.language.classifier(),
            self.language.fence_tags(),
        )
        .ok_or_else(|| HealError::Extraction("no code found in model reply".to_string()))?;
        debug!(bytes = code.len(), "code extracted");
        Ok(code)
    }
}

static INTEGER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?\d+$").expect("integer regex should be valid"));

static FLOAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^-?(?:\d+\.\d*|\.\d+|\d+(?:\.\d*)?[eE][-+]?\d+)$")
        .expect("float regex should be valid")
});

fn is_number(value: &str) -> bool {
    INTEGER.is_match(value) || FLOAT.is_match(value)
}

/// Parse `value` when it is a JSON array or object.
fn json_container(value: &str) -> Option<serde_json::Value> {
    if !(value.starts_with('[') || value.starts_with('{')) {
        return None;
    }
    serde_json::from_str(value).ok()
}

/// Render a JSON value with Python spellings for booleans and null.
fn python_literal(value: &serde_json::Value) -> String {
    use serde_json::Value;

    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        // A JSON string literal is also a valid Python string literal.
        Value::Number(_) | Value::String(_) => value.to_string(),
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(python_literal).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Object(fields) => {
            let fields: Vec<String> = fields
                .iter()
                .map(|(key, field)| {
                    format!("{}: {}", Value::String(key.clone()), python_literal(field))
                })
                .collect();
            format!("{{{}}}", fields.join(", "))
        }
    }
}

/// Render a context value as a literal of `language`.
///
/// Numbers, booleans and `None` are emitted as written. JSON arrays and
/// objects are re-rendered as Python literals; anything else becomes a quoted
/// string.
pub fn render_literal(language: Language, value: &str) -> String {
    let value = value.trim();
    match language {
        Language::Python => {
            if is_number(value) || matches!(value, "True" | "False" | "None") {
                value.to_string()
            } else if let Some(container) = json_container(value) {
                python_literal(&container)
            } else {
                serde_json::Value::String(value.to_string()).to_string()
            }
        }
        Language::Shell => {
            if is_number(value) {
                value.to_string()
            } else {
                format!("'{}'", value.replace('\'', r"'\''"))
            }
        }
    }
}

/// Render `name = value` as an assignment statement of `language`.
pub fn render_assignment(language: Language, name: &str, value: &str) -> String {
    let literal = render_literal(language, value);
    match language {
        Language::Python => format!("{name} = {literal}"),
        Language::Shell => format!("{name}={literal}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedModel, fenced};

    fn synthesizer(model: &ScriptedModel) -> CodeSynthesizer<&ScriptedModel> {
        CodeSynthesizer::new(model, "coder", Language::Python, PromptBuilder::new(20_000))
    }

    fn variable(name: &str, value: &str) -> ContextVariable {
        ContextVariable {
            name: name.to_string(),
            value: value.to_string(),
            produced_by_task: 0,
        }
    }

    #[test]
    fn python_literals_follow_value_shape() {
        assert_eq!(render_literal(Language::Python, "100"), "100");
        assert_eq!(render_literal(Language::Python, "-2.5"), "-2.5");
        assert_eq!(render_literal(Language::Python, "1e3"), "1e3");
        assert_eq!(render_literal(Language::Python, "True"), "True");
        assert_eq!(render_literal(Language::Python, "None"), "None");
        assert_eq!(render_literal(Language::Python, "[1, 2]"), "[1, 2]");
        assert_eq!(render_literal(Language::Python, "{\"a\": 1}"), "{\"a\": 1}");
        assert_eq!(render_literal(Language::Python, "widget"), "\"widget\"");
        assert_eq!(
            render_literal(Language::Python, "say \"hi\""),
            "\"say \\\"hi\\\"\""
        );
        assert_eq!(render_literal(Language::Python, "[oops"), "\"[oops\"");
    }

    #[test]
    fn json_containers_use_python_constants() {
        assert_eq!(
            render_assignment(Language::Python, "cfg", "{\"ok\": true, \"x\": null}"),
            "cfg = {\"ok\": True, \"x\": None}"
        );
        assert_eq!(
            render_literal(Language::Python, "[1, \"a\", false, [null]]"),
            "[1, \"a\", False, [None]]"
        );
        assert_eq!(
            render_literal(Language::Python, "{\"nested\": {\"n\": 2.5}}"),
            "{\"nested\": {\"n\": 2.5}}"
        );
    }

    #[test]
    fn shell_assignments_quote_strings() {
        assert_eq!(render_assignment(Language::Shell, "n", "3"), "n=3");
        assert_eq!(render_assignment(Language::Shell, "s", "it's"), r"s='it'\''s'");
    }

    #[test]
    fn generate_inlines_context_and_exports() {
        let model = ScriptedModel::new([fenced("python", "print(price * 2)")]);
        let context = vec![variable("price", "100")];
        let exports = vec!["total".to_string()];
        let code = synthesizer(&model)
            .generate(&GenerationRequest {
                goal: "double the price",
                context: &context,
                exports: &exports,
            })
            .expect("generate");

        assert_eq!(code, "print(price * 2)");
        let requests = model.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].model, "coder");
        let prompt = requests[0].flattened();
        assert!(prompt.contains("price = 100"));
        assert!(prompt.contains("double the price"));
        assert!(prompt.contains("- total"));
    }

    #[test]
    fn revise_sends_failing_code_and_error() {
        let model = ScriptedModel::new([fenced("python", "x = 1\nprint(x)")]);
        let history = vec![AttemptDigest {
            depth: 0,
            error_preview: "NameError".to_string(),
        }];
        let code = synthesizer(&model)
            .revise(&RevisionRequest {
                goal: "print x",
                failing_code: "print(x)",
                error_text: "NameError: name 'x' is not defined",
                history: &history,
            })
            .expect("revise");
        assert_eq!(code, "x = 1\nprint(x)");
        let prompt = model.requests()[0].flattened();
        assert!(prompt.contains("print(x)"));
        assert!(prompt.contains("NameError: name 'x' is not defined"));
        assert!(prompt.contains("depth 0 failed with: NameError"));
    }

    #[test]
    fn model_failure_is_a_generation_error() {
        let model = ScriptedModel::failing("connection refused");
        let err = synthesizer(&model).synthesize("anything", &[]).expect_err("fails");
        assert!(matches!(err, HealError::Generation(_)));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn reply_without_code_is_an_extraction_error() {
        let model = ScriptedModel::new(["I am not able to help with that."]);
        let err = synthesizer(&model).synthesize("anything", &[]).expect_err("fails");
        assert!(matches!(err, HealError::Extraction(_)));
    }
}

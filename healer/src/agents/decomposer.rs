//! Decomposer agent for splitting a request into ordered tasks.

use std::sync::LazyLock;

use jsonschema::{Draft, Validator};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::context::is_identifier;
use crate::core::extract::{Record, extract_structured};
use crate::core::language::Language;
use crate::core::types::{HealError, Task};
use crate::io::model::{CompletionRequest, LanguageModel};
use crate::io::prompt::{DecomposePrompt, PromptBuilder};

const TASK_SCHEMA: &str = include_str!("../../schemas/task.schema.json");

static TASK_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value =
        serde_json::from_str(TASK_SCHEMA).expect("task schema should be valid json");
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .expect("task schema should compile")
});

/// Decomposer agent wrapper that owns prompt settings.
#[derive(Debug, Clone)]
pub struct TaskDecomposer<M> {
    model: M,
    model_name: String,
    language: Language,
    prompts: PromptBuilder,
    max_tasks: usize,
}

impl<M: LanguageModel> TaskDecomposer<M> {
    pub fn new(
        model: M,
        model_name: impl Into<String>,
        language: Language,
        prompts: PromptBuilder,
        max_tasks: usize,
    ) -> Self {
        Self {
            model,
            model_name: model_name.into(),
            language,
            prompts,
            max_tasks,
        }
    }

    /// Ask the model for a task list.
    ///
    /// An empty list means the caller should fall back to a single program.
    #[instrument(skip_all, fields(max_tasks = self.max_tasks))]
    pub fn decompose(&self, request: &str) -> Result<Vec<Task>, HealError> {
        let prompt = self
            .prompts
            .decompose(&DecomposePrompt {
                language: self.language.display_name(),
                request,
                max_tasks: self.max_tasks,
            })
            .map_err(|err| HealError::Generation(format!("{err:#}")))?;
        let reply = self
            .model
            .complete(&CompletionRequest::prompt(&self.model_name, prompt))
            .map_err(|err| HealError::Generation(format!("{err:#}")))?;
        let records = extract_structured(&reply)
            .ok_or_else(|| HealError::Extraction("no task list found in model reply".to_string()))?;
        let tasks = tasks_from_records(records, self.max_tasks);
        info!(tasks = tasks.len(), "request decomposed");
        Ok(tasks)
    }
}

/// Convert extracted records into tasks.
///
/// Records failing the task schema (including those without a usable `goal`)
/// are dropped; a missing `description` defaults to the goal.
pub fn tasks_from_records(records: Vec<Record>, max_tasks: usize) -> Vec<Task> {
    let mut tasks = Vec::new();
    for (index, record) in records.into_iter().enumerate() {
        if tasks.len() == max_tasks {
            debug!(max_tasks, "task cap reached, ignoring remaining records");
            break;
        }
        let value = Value::Object(record);
        if !TASK_VALIDATOR.is_valid(&value) {
            let messages: Vec<String> = TASK_VALIDATOR
                .iter_errors(&value)
                .map(|err| err.to_string())
                .collect();
            warn!(index, errors = %messages.join("; "), "dropping invalid task record");
            continue;
        }
        if let Some(task) = task_from_value(&value) {
            tasks.push(task);
        }
    }
    tasks
}

fn task_from_value(value: &Value) -> Option<Task> {
    let goal = value.get("goal")?.as_str()?.trim().to_string();
    if goal.is_empty() {
        return None;
    }
    let description = value
        .get("description")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map_or_else(|| goal.clone(), str::to_string);
    let depends_on = value
        .get("depends_on")
        .or_else(|| value.get("dependsOn"))
        .map(dependency_names)
        .unwrap_or_default();
    Some(Task {
        description,
        goal,
        depends_on,
    })
}

fn dependency_names(value: &Value) -> Vec<String> {
    let raw: Vec<&str> = match value {
        Value::String(name) => vec![name.as_str()],
        Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    };
    let mut names: Vec<String> = Vec::with_capacity(raw.len());
    for name in raw.into_iter().map(str::trim) {
        if is_identifier(name) && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

//! Consolidation of successful task programs into one program.

use tracing::{debug, info, instrument, warn};

use crate::core::extract::{extract_code_with, strip_reasoning};
use crate::core::language::Language;
use crate::core::types::{HealError, TaskReport};
use crate::io::model::{CompletionRequest, LanguageModel};
use crate::io::prompt::{MergePart, MergePrompt, PromptBuilder};

#[derive(Debug, Clone)]
pub struct CodeMerger<M> {
    model: M,
    model_name: String,
    language: Language,
    prompts: PromptBuilder,
}

impl<M: LanguageModel> CodeMerger<M> {
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

    /// Merge the code of every successful task.
    ///
    /// A single success is returned as-is (after cleanup) without a model call.
    #[instrument(skip_all, fields(tasks = reports.len()))]
    pub fn merge(&self, reports: &[TaskReport], request: &str) -> Result<String, HealError> {
        let successes: Vec<(&TaskReport, &str)> = reports
            .iter()
            .filter(|report| report.succeeded())
            .filter_map(|report| report.code.as_deref().map(|code| (report, code)))
            .collect();

        match successes.as_slice() {
            [] => Err(HealError::Merge("no task succeeded".to_string())),
            [(report, code)] => {
                debug!(task = report.index, "single successful task, skipping model merge");
                Ok(clean_code(code))
            }
            parts => {
                info!(parts = parts.len(), "merging task programs");
                let prompt = self
                    .prompts
                    .merge(&MergePrompt {
                        language: self.language.display_name(),
                        fence: self.language.fence_tag(),
                        request,
                        parts: parts
                            .iter()
                            .map(|(report, code)| MergePart {
                                goal: &report.task.goal,
                                code,
                            })
                            .collect(),
                    })
                    .map_err(|err| HealError::Merge(format!("{err:#}")))?;
                let reply = self
                    .model
                    .complete(&CompletionRequest::prompt(&self.model_name, prompt))
                    .map_err(|err| {
                        warn!(err = %err, "merge model call failed");
                        HealError::Merge(format!("{err:#}"))
                    })?;
                extract_code_with(
                    &reply,
                    self.language.classifier(),
                    self.language.fence_tags(),
                )
                .ok_or_else(|| HealError::Merge("no code found in merge reply".to_string()))
            }
        }
    }
}

/// Strip stray reasoning from already-extracted code.
fn clean_code(code: &str) -> String {
    strip_reasoning(code).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Failure, FailureKind, Task};
    use crate::test_support::{ScriptedModel, failure, fenced, success};

    fn report(index: usize, goal: &str, code: &str, ok: bool) -> TaskReport {
        let task = Task {
            description: goal.to_string(),
            goal: goal.to_string(),
            depends_on: Vec::new(),
        };
        if ok {
            TaskReport {
                index,
                task,
                code: Some(code.to_string()),
                result: Some(success(code, "")),
                depth: 0,
                failure: None,
            }
        } else {
            TaskReport {
                index,
                task,
                code: None,
                result: Some(failure(code, "boom")),
                depth: 0,
                failure: Some(Failure::new(FailureKind::DepthExhausted, "boom")),
            }
        }
    }

    fn merger(model: &ScriptedModel) -> CodeMerger<&ScriptedModel> {
        CodeMerger::new(model, "coder", Language::Python, PromptBuilder::new(20_000))
    }

    #[test]
    fn no_success_is_a_merge_error() {
        let model = ScriptedModel::new(Vec::<String>::new());
        let err = merger(&model)
            .merge(&[report(0, "a", "x", false)], "r")
            .expect_err("nothing to merge");
        assert!(matches!(err, HealError::Merge(_)));
        assert!(model.requests().is_empty());
    }

    #[test]
    fn single_success_skips_the_model() {
        let model = ScriptedModel::new(Vec::<String>::new());
        let reports = [report(0, "a", "print(1)\n", true), report(1, "b", "x", false)];
        let merged = merger(&model).merge(&reports, "r").expect("merged");
        assert_eq!(merged, "print(1)");
        assert!(model.requests().is_empty());
    }

    #[test]
    fn single_success_keeps_backticks_inside_strings() {
        let model = ScriptedModel::new(Vec::<String>::new());
        let code = "doc = \"\"\"\n```python\nprint('inner')\n```\n\"\"\"\nprint(doc)";
        let merged = merger(&model)
            .merge(&[report(0, "a", code, true)], "r")
            .expect("merged");
        assert_eq!(merged, code);
        assert!(model.requests().is_empty());
    }

    #[test]
    fn multiple_successes_are_merged_by_the_model() {
        let model = ScriptedModel::new([fenced("python", "price = 100\nprint(price * 2)")]);
        let reports = [
            report(0, "compute price", "price = 100\nprint('RESULT: price = 100')", true),
            report(1, "double it", "print(price * 2)", true),
        ];
        let merged = merger(&model).merge(&reports, "double the price").expect("merged");
        assert_eq!(merged, "price = 100\nprint(price * 2)");

        let prompt = model.requests()[0].flattened();
        assert!(prompt.contains("#### Step 1: compute price"));
        assert!(prompt.contains("#### Step 2: double it"));
        assert!(prompt.contains("double the price"));
    }

    #[test]
    fn unusable_merge_reply_is_a_merge_error() {
        let model = ScriptedModel::new(["Sorry, I cannot combine these."]);
        let reports = [report(0, "a", "print(1)", true), report(1, "b", "print(2)", true)];
        let err = merger(&model).merge(&reports, "r").expect_err("no code");
        assert!(matches!(err, HealError::Merge(_)));
    }
}

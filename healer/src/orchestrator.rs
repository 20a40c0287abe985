//! Orchestration for a single `healer run` request.

use anyhow::Result;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::agents::decomposer::TaskDecomposer;
use crate::agents::intent::{ExecutionStrategy, StrategyClassifier};
use crate::agents::merger::CodeMerger;
use crate::agents::synthesizer::{CodeSynthesizer, GenerationRequest};
use crate::core::session::Session;
use crate::core::types::{
    ContextVariable, ExecutionResult, Failure, FailureKind, FixAttempt, Task, TaskReport,
};
use crate::io::config::{HealerConfig, StrategyChoice};
use crate::io::model::LanguageModel;
use crate::io::prompt::PromptBuilder;
use crate::io::sandbox::{RunRequest, Sandbox};
use crate::io::transcript::{TranscriptMeta, TranscriptWriteRequest, write_transcript};
use crate::repair::{RepairController, RepairSettings};

/// Result of one request.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub session_id: String,
    pub strategy: ExecutionStrategy,
    /// Final execution result; absent when nothing could be run.
    pub result: Option<ExecutionResult>,
    /// Repair depth of the final chain (sequential: deepest task chain).
    pub depth: u32,
    /// Every accepted revision, in the order it was made.
    pub attempts: Vec<FixAttempt>,
    /// Per-task reports, empty for unified requests.
    pub tasks: Vec<TaskReport>,
    /// Values reported by tasks through the result marker.
    pub context: Vec<ContextVariable>,
    pub failure: Option<Failure>,
}

impl Outcome {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none() && self.result.as_ref().is_some_and(|r| r.succeeded)
    }

    /// Code of the final result, if any ran.
    pub fn final_code(&self) -> Option<&str> {
        self.result.as_ref().map(|r| r.source_code.as_str())
    }
}

/// Wires the model, sandbox and configuration into the request flow.
pub struct Orchestrator<M, S> {
    model: M,
    sandbox: S,
    config: HealerConfig,
    prompts: PromptBuilder,
}

impl<M: LanguageModel, S: Sandbox> Orchestrator<M, S> {
    pub fn new(model: M, sandbox: S, config: HealerConfig) -> Self {
        let prompts = PromptBuilder::new(config.prompt_budget_bytes);
        Self {
            model,
            sandbox,
            config,
            prompts,
        }
    }

    pub fn config(&self) -> &HealerConfig {
        &self.config
    }

    /// Carry a request from planning to a final result.
    ///
    /// Terminal failures are reported in [`Outcome::failure`]; `Err` is left
    /// for sandbox infrastructure problems.
    #[instrument(skip_all, fields(strategy = ?self.config.strategy))]
    pub fn handle(&self, request: &str) -> Result<Outcome> {
        let mut session = Session::new(request, self.config.repair.trail_capacity);
        info!(session = %session.id, "request started");

        let outcome = match self.choose_strategy(request) {
            ExecutionStrategy::Unified => self.run_unified(&mut session, request)?,
            ExecutionStrategy::Sequential => match self.plan(request) {
                Some(tasks) => self.run_sequential(&mut session, request, &tasks)?,
                None => self.run_unified(&mut session, request)?,
            },
        };

        match &outcome.failure {
            None => info!(depth = outcome.depth, "request succeeded"),
            Some(failure) => warn!(kind = %failure.kind, "request failed"),
        }
        self.write_transcript(request, &outcome);
        Ok(outcome)
    }

    fn choose_strategy(&self, request: &str) -> ExecutionStrategy {
        match self.config.strategy {
            StrategyChoice::Unified => ExecutionStrategy::Unified,
            StrategyChoice::Sequential => ExecutionStrategy::Sequential,
            StrategyChoice::Auto => {
                let classifier = StrategyClassifier::new(
                    &self.model,
                    &self.config.models.intent_model,
                    self.prompts.clone(),
                );
                classifier.classify(request).unwrap_or_else(|err| {
                    warn!(err = %err, "strategy classification failed, using unified");
                    ExecutionStrategy::Unified
                })
            }
        }
    }

    /// Decompose the request; `None` means fall back to one program.
    fn plan(&self, request: &str) -> Option<Vec<Task>> {
        let decomposer = TaskDecomposer::new(
            &self.model,
            &self.config.models.code_model,
            self.config.sandbox.language,
            self.prompts.clone(),
            self.config.max_tasks,
        );
        match decomposer.decompose(request) {
            Ok(tasks) if !tasks.is_empty() => Some(tasks),
            Ok(_) => {
                warn!("decomposition produced no tasks, using unified");
                None
            }
            Err(err) => {
                warn!(err = %err, "decomposition failed, using unified");
                None
            }
        }
    }

    fn synthesizer(&self) -> CodeSynthesizer<&M> {
        CodeSynthesizer::new(
            &self.model,
            &self.config.models.code_model,
            self.config.sandbox.language,
            self.prompts.clone(),
        )
    }

    fn settings(&self) -> RepairSettings {
        RepairSettings::from_config(&self.config)
    }

    fn run_unified(&self, session: &mut Session, request: &str) -> Result<Outcome> {
        let synthesizer = self.synthesizer();
        let mut outcome = empty_outcome(session, ExecutionStrategy::Unified);

        let code = match synthesizer.synthesize(request, &[]) {
            Ok(code) => code,
            Err(err) => {
                outcome.failure = Some(Failure::from(&err));
                return Ok(outcome);
            }
        };

        let controller = RepairController::new(&synthesizer, &self.sandbox, self.settings());
        let resolution = controller.resolve(session, request, code)?;
        outcome.depth = resolution.depth;
        outcome.attempts = resolution.trail;
        outcome.failure = resolution.failure;
        outcome.result = Some(resolution.result);
        Ok(outcome)
    }

    #[instrument(skip_all, fields(tasks = tasks.len()))]
    fn run_sequential(
        &self,
        session: &mut Session,
        request: &str,
        tasks: &[Task],
    ) -> Result<Outcome> {
        let synthesizer = self.synthesizer();
        let controller = RepairController::new(&synthesizer, &self.sandbox, self.settings());
        let mut outcome = empty_outcome(session, ExecutionStrategy::Sequential);

        for (index, task) in tasks.iter().enumerate() {
            let context = session.context.resolve(&task.depends_on);
            let exports = exports_for(tasks, index);
            info!(task = index, goal = %task.goal, "running task");

            let code = match synthesizer.generate(&GenerationRequest {
                goal: &task.goal,
                context: &context,
                exports: &exports,
            }) {
                Ok(code) => code,
                Err(err) => {
                    warn!(task = index, err = %err, "task synthesis failed");
                    outcome.tasks.push(TaskReport {
                        index,
                        task: task.clone(),
                        code: None,
                        result: None,
                        depth: 0,
                        failure: Some(Failure::from(&err)),
                    });
                    continue;
                }
            };

            let resolution = controller.resolve(session, &task.goal, code)?;
            let succeeded = resolution.succeeded();
            if succeeded {
                let recorded = session.context.extract(&resolution.result.stdout, index);
                info!(task = index, recorded, "task succeeded");
            } else {
                warn!(task = index, stop = ?resolution.stop, "task failed");
            }
            outcome.depth = outcome.depth.max(resolution.depth);
            outcome.attempts.extend(resolution.trail);
            outcome.tasks.push(TaskReport {
                index,
                task: task.clone(),
                code: succeeded.then(|| resolution.result.source_code.clone()),
                result: Some(resolution.result),
                depth: resolution.depth,
                failure: resolution.failure,
            });
        }
        outcome.context = session.context.variables();

        let merger = CodeMerger::new(
            &self.model,
            &self.config.models.code_model,
            self.config.sandbox.language,
            self.prompts.clone(),
        );
        let merged = match merger.merge(&outcome.tasks, request) {
            Ok(merged) => merged,
            Err(err) => {
                warn!(err = %err, "merge failed");
                outcome.failure = Some(Failure::from(&err));
                return Ok(outcome);
            }
        };

        let result = self.sandbox.run(&RunRequest {
            source: &merged,
            timeout: self.config.sandbox.timeout(),
            memory_ceiling_mb: self.config.sandbox.memory_limit_mb,
        })?;
        if !result.succeeded {
            let kind = if result.timed_out() {
                FailureKind::Timeout
            } else {
                FailureKind::Execution
            };
            outcome.failure = Some(Failure::new(kind, result.error_text()));
        }
        outcome.result = Some(result);
        Ok(outcome)
    }

    fn write_transcript(&self, request: &str, outcome: &Outcome) {
        let Some(root) = self.config.transcript_dir.as_deref() else {
            return;
        };
        let strategy = outcome.strategy.to_string();
        let meta = TranscriptMeta {
            session_id: &outcome.session_id,
            request,
            strategy: &strategy,
            language: self.config.sandbox.language,
            succeeded: outcome.succeeded(),
            depth: outcome.depth,
            attempt_count: outcome.attempts.len(),
            failure: outcome.failure.as_ref(),
        };
        let written = write_transcript(&TranscriptWriteRequest {
            root,
            meta: &meta,
            attempts: &outcome.attempts,
            tasks: &outcome.tasks,
            result: outcome.result.as_ref(),
        });
        if let Err(err) = written {
            warn!(err = %format!("{err:#}"), "failed to write transcript");
        }
    }
}

fn empty_outcome(session: &Session, strategy: ExecutionStrategy) -> Outcome {
    Outcome {
        session_id: session.id.clone(),
        strategy,
        result: None,
        depth: 0,
        attempts: Vec::new(),
        tasks: Vec::new(),
        context: Vec::new(),
        failure: None,
    }
}

/// Names that tasks after `index` depend on, first occurrence order.
fn exports_for(tasks: &[Task], index: usize) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in tasks.iter().skip(index + 1).flat_map(|t| &t.depends_on) {
        if !names.contains(name) {
            names.push(name.clone());
        }
    }
    names
}

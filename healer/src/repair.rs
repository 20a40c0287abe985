//! The execute, observe, repair loop.
//!
//! A chain starts at depth 0 with the initial code. Each failed run that is
//! neither a timeout nor at the depth bound asks the synthesizer for a
//! revision; an accepted revision is recorded as a [`FixAttempt`] and run at
//! the next depth. The loop is bounded by `max_fix_depth` and by the session's
//! set of tried variants.
//!
//! Repair prompts only summarise attempts from the current chain; the session
//! trail keeps every attempt for diagnostics.

use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::agents::synthesizer::{CodeSynthesizer, RevisionRequest};
use crate::core::session::Session;
use crate::core::trail::summarize;
use crate::core::types::{ExecutionResult, Failure, FailureKind, FixAttempt};
use crate::io::config::HealerConfig;
use crate::io::model::LanguageModel;
use crate::io::sandbox::{RunRequest, Sandbox};

/// Why a repair chain stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairStop {
    Succeeded,
    Timeout,
    DepthExhausted,
    DuplicateFix,
    GenerationFailed,
}

/// Final state of one repair chain.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Result of the last execution in the chain.
    pub result: ExecutionResult,
    pub depth: u32,
    /// Revisions accepted in this chain, oldest first.
    pub trail: Vec<FixAttempt>,
    pub stop: RepairStop,
    /// Terminal failure, absent on success.
    pub failure: Option<Failure>,
}

impl Resolution {
    fn new(
        result: ExecutionResult,
        depth: u32,
        trail: Vec<FixAttempt>,
        stop: RepairStop,
        detail: Option<Failure>,
    ) -> Self {
        let failure = match stop {
            RepairStop::Succeeded => None,
            RepairStop::Timeout => Some(Failure::new(FailureKind::Timeout, result.error_text())),
            RepairStop::DepthExhausted => Some(Failure::new(
                FailureKind::DepthExhausted,
                result.error_text(),
            )),
            RepairStop::DuplicateFix => {
                Some(Failure::new(FailureKind::DuplicateFix, result.error_text()))
            }
            RepairStop::GenerationFailed => Some(detail.unwrap_or_else(|| {
                Failure::new(FailureKind::Generation, result.error_text())
            })),
        };
        Self {
            result,
            depth,
            trail,
            stop,
            failure,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.stop == RepairStop::Succeeded
    }
}

/// Limits applied to every chain.
#[derive(Debug, Clone)]
pub struct RepairSettings {
    pub max_fix_depth: u32,
    pub timeout: Duration,
    pub memory_ceiling_mb: Option<u64>,
    pub digest_attempts: usize,
    pub error_preview_chars: usize,
}

impl RepairSettings {
    pub fn from_config(config: &HealerConfig) -> Self {
        Self {
            max_fix_depth: config.repair.max_fix_depth,
            timeout: config.sandbox.timeout(),
            memory_ceiling_mb: config.sandbox.memory_limit_mb,
            digest_attempts: config.repair.digest_attempts,
            error_preview_chars: config.repair.error_preview_chars,
        }
    }
}

/// Drives code through the sandbox, requesting revisions on failure.
pub struct RepairController<'a, M, S> {
    synthesizer: &'a CodeSynthesizer<M>,
    sandbox: &'a S,
    settings: RepairSettings,
}

impl<'a, M: LanguageModel, S: Sandbox> RepairController<'a, M, S> {
    pub fn new(
        synthesizer: &'a CodeSynthesizer<M>,
        sandbox: &'a S,
        settings: RepairSettings,
    ) -> Self {
        Self {
            synthesizer,
            sandbox,
            settings,
        }
    }

    /// Run `initial_code` and repair it until it succeeds or a bound is hit.
    ///
    /// `Err` only for sandbox infrastructure failures; every other ending is a
    /// [`Resolution`].
    #[instrument(skip_all, fields(session = %session.id, max_fix_depth = self.settings.max_fix_depth))]
    pub fn resolve(
        &self,
        session: &mut Session,
        goal: &str,
        initial_code: String,
    ) -> Result<Resolution> {
        let mut code = initial_code;
        let mut depth: u32 = 0;
        let mut trail = Vec::new();
        session.tried.insert(&code);

        loop {
            let result = self.sandbox.run(&RunRequest {
                source: &code,
                timeout: self.settings.timeout,
                memory_ceiling_mb: self.settings.memory_ceiling_mb,
            })?;

            if result.succeeded {
                info!(depth, "code succeeded");
                return Ok(Resolution::new(result, depth, trail, RepairStop::Succeeded, None));
            }
            if result.timed_out() {
                warn!(depth, "execution timed out, not repairing");
                return Ok(Resolution::new(result, depth, trail, RepairStop::Timeout, None));
            }
            if depth >= self.settings.max_fix_depth {
                warn!(depth, "fix depth exhausted");
                return Ok(Resolution::new(
                    result,
                    depth,
                    trail,
                    RepairStop::DepthExhausted,
                    None,
                ));
            }

            let error_text = result.error_text();
            let history = summarize(
                &trail,
                self.settings.digest_attempts,
                self.settings.error_preview_chars,
            );
            let revision = match self.synthesizer.revise(&RevisionRequest {
                goal,
                failing_code: &code,
                error_text: &error_text,
                history: &history,
            }) {
                Ok(revision) if !revision.trim().is_empty() => revision,
                Ok(_) => {
                    warn!(depth, "empty revision");
                    let detail = Failure::new(FailureKind::Generation, "model returned empty code");
                    return Ok(Resolution::new(
                        result,
                        depth,
                        trail,
                        RepairStop::GenerationFailed,
                        Some(detail),
                    ));
                }
                Err(err) => {
                    warn!(depth, err = %err, "revision failed");
                    return Ok(Resolution::new(
                        result,
                        depth,
                        trail,
                        RepairStop::GenerationFailed,
                        Some(Failure::from(&err)),
                    ));
                }
            };

            if revision == code || !session.tried.insert(&revision) {
                warn!(depth, "revision repeats an earlier variant");
                return Ok(Resolution::new(
                    result,
                    depth,
                    trail,
                    RepairStop::DuplicateFix,
                    None,
                ));
            }

            let attempt = FixAttempt {
                depth,
                prior_code: code,
                revised_code: revision.clone(),
                error_text,
            };
            session.trail.push(attempt.clone());
            trail.push(attempt);
            code = revision;
            depth += 1;
            debug!(depth, "running revision");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::language::Language;
    use crate::io::prompt::PromptBuilder;
    use crate::test_support::{FnSandbox, ScriptedModel, failure, fenced, success, timeout};

    fn settings(max_fix_depth: u32) -> RepairSettings {
        RepairSettings {
            max_fix_depth,
            timeout: Duration::from_secs(5),
            memory_ceiling_mb: None,
            digest_attempts: 3,
            error_preview_chars: 200,
        }
    }

    fn synthesizer(model: &ScriptedModel) -> CodeSynthesizer<&ScriptedModel> {
        CodeSynthesizer::new(model, "coder", Language::Python, PromptBuilder::new(20_000))
    }

    fn fails_unless(good: &'static str) -> impl Fn(&str) -> ExecutionResult {
        move |source: &str| {
            if source == good {
                success(source, "ok\n")
            } else {
                failure(source, "NameError: name 'x' is not defined")
            }
        }
    }

    #[test]
    fn success_at_depth_zero_makes_no_model_call() {
        let model = ScriptedModel::new(Vec::<String>::new());
        let sandbox = FnSandbox::new(fails_unless("print(1)"));
        let synth = synthesizer(&model);
        let mut session = Session::new("r", 10);

        let resolution = RepairController::new(&synth, &sandbox, settings(5))
            .resolve(&mut session, "print one", "print(1)".to_string())
            .expect("resolve");

        assert_eq!(resolution.stop, RepairStop::Succeeded);
        assert_eq!(resolution.depth, 0);
        assert!(resolution.trail.is_empty());
        assert!(resolution.failure.is_none());
        assert_eq!(resolution.result.source_code, "print(1)");
        assert!(model.requests().is_empty());
    }

    #[test]
    fn one_repair_reaches_depth_one() {
        let model = ScriptedModel::new([fenced("python", "x = 1\nprint(x)")]);
        let sandbox = FnSandbox::new(fails_unless("x = 1\nprint(x)"));
        let synth = synthesizer(&model);
        let mut session = Session::new("r", 10);

        let resolution = RepairController::new(&synth, &sandbox, settings(5))
            .resolve(&mut session, "print x", "print(x)".to_string())
            .expect("resolve");

        assert!(resolution.succeeded());
        assert_eq!(resolution.depth, 1);
        assert_eq!(resolution.trail.len(), 1);
        assert_eq!(resolution.trail[0].depth, 0);
        assert_eq!(resolution.trail[0].prior_code, "print(x)");
        assert!(resolution.trail[0].error_text.contains("NameError"));
        assert_eq!(resolution.result.source_code, "x = 1\nprint(x)");
        assert_eq!(session.trail.len(), 1);
        assert_eq!(sandbox.sources(), vec!["print(x)", "x = 1\nprint(x)"]);
    }

    #[test]
    fn identical_revision_stops_with_duplicate_fix() {
        let model = ScriptedModel::new([fenced("python", "print(x)")]);
        let sandbox = FnSandbox::new(fails_unless("never"));
        let synth = synthesizer(&model);
        let mut session = Session::new("r", 10);

        let resolution = RepairController::new(&synth, &sandbox, settings(5))
            .resolve(&mut session, "print x", "print(x)".to_string())
            .expect("resolve");

        assert_eq!(resolution.stop, RepairStop::DuplicateFix);
        assert_eq!(resolution.depth, 0);
        assert!(resolution.trail.is_empty());
        assert_eq!(
            resolution.failure.as_ref().map(|f| f.kind),
            Some(FailureKind::DuplicateFix)
        );
        assert_eq!(sandbox.sources().len(), 1);
    }

    #[test]
    fn cycling_back_to_an_earlier_variant_is_a_duplicate() {
        let model = ScriptedModel::new([fenced("python", "print(y)"), fenced("python", "print(x)")]);
        let sandbox = FnSandbox::new(fails_unless("never"));
        let synth = synthesizer(&model);
        let mut session = Session::new("r", 10);

        let resolution = RepairController::new(&synth, &sandbox, settings(5))
            .resolve(&mut session, "print", "print(x)".to_string())
            .expect("resolve");

        assert_eq!(resolution.stop, RepairStop::DuplicateFix);
        assert_eq!(resolution.depth, 1);
        assert_eq!(resolution.trail.len(), 1);
    }

    #[test]
    fn timeout_is_never_repaired() {
        let model = ScriptedModel::new([fenced("python", "print(2)")]);
        let sandbox = FnSandbox::new(|source: &str| timeout(source));
        let synth = synthesizer(&model);
        let mut session = Session::new("r", 10);

        let resolution = RepairController::new(&synth, &sandbox, settings(5))
            .resolve(&mut session, "loop", "while True: pass".to_string())
            .expect("resolve");

        assert_eq!(resolution.stop, RepairStop::Timeout);
        assert_eq!(resolution.depth, 0);
        assert!(resolution.trail.is_empty());
        assert!(session.trail.is_empty());
        assert!(model.requests().is_empty());
        assert_eq!(
            resolution.failure.map(|f| f.kind),
            Some(FailureKind::Timeout)
        );
    }

    #[test]
    fn depth_never_exceeds_the_bound() {
        for max in 0..4u32 {
            let model = ScriptedModel::new((0..10).map(|i| fenced("python", &format!("print({i})"))));
            let sandbox = FnSandbox::new(fails_unless("never"));
            let synth = synthesizer(&model);
            let mut session = Session::new("r", 10);

            let resolution = RepairController::new(&synth, &sandbox, settings(max))
                .resolve(&mut session, "g", "start".to_string())
                .expect("resolve");

            assert_eq!(resolution.stop, RepairStop::DepthExhausted);
            assert_eq!(resolution.depth, max);
            assert_eq!(resolution.trail.len(), max as usize);
            assert_eq!(sandbox.sources().len(), max as usize + 1);
            assert_eq!(model.requests().len(), max as usize);
        }
    }

    #[test]
    fn model_failure_stops_with_generation_failure() {
        let model = ScriptedModel::failing("model offline");
        let sandbox = FnSandbox::new(fails_unless("never"));
        let synth = synthesizer(&model);
        let mut session = Session::new("r", 10);

        let resolution = RepairController::new(&synth, &sandbox, settings(5))
            .resolve(&mut session, "g", "print(x)".to_string())
            .expect("resolve");

        assert_eq!(resolution.stop, RepairStop::GenerationFailed);
        let failure = resolution.failure.expect("failure");
        assert_eq!(failure.kind, FailureKind::Generation);
        assert!(failure.message.contains("model offline"));
        assert_eq!(resolution.result.source_code, "print(x)");
    }

    #[test]
    fn repair_prompt_carries_digest_of_earlier_attempts() {
        let model = ScriptedModel::new([
            fenced("python", "print(1)"),
            fenced("python", "print(2)"),
            fenced("python", "print(3)"),
        ]);
        let sandbox = FnSandbox::new(fails_unless("print(3)"));
        let synth = synthesizer(&model);
        let mut session = Session::new("r", 10);

        let resolution = RepairController::new(&synth, &sandbox, settings(5))
            .resolve(&mut session, "g", "print(0)".to_string())
            .expect("resolve");

        assert_eq!(resolution.depth, 3);
        let prompts = model.prompts();
        assert!(!prompts[0].contains("### Earlier Attempts"));
        assert!(prompts[2].contains("attempt at depth 0"));
        assert!(prompts[2].contains("attempt at depth 1"));
    }

    #[test]
    fn repair_prompt_ignores_attempts_from_other_chains() {
        let model = ScriptedModel::new([fenced("python", "x = 1\nprint(x)")]);
        let sandbox = FnSandbox::new(fails_unless("x = 1\nprint(x)"));
        let synth = synthesizer(&model);
        let mut session = Session::new("r", 10);
        session.trail.push(FixAttempt {
            depth: 0,
            prior_code: "open('missing.csv')".to_string(),
            revised_code: "print('skip')".to_string(),
            error_text: "FileNotFoundError: missing.csv".to_string(),
        });

        let resolution = RepairController::new(&synth, &sandbox, settings(5))
            .resolve(&mut session, "print x", "print(x)".to_string())
            .expect("resolve");

        assert!(resolution.succeeded());
        let prompts = model.prompts();
        assert!(!prompts[0].contains("missing.csv"));
        assert!(!prompts[0].contains("### Earlier Attempts"));
        assert_eq!(session.trail.len(), 2);
    }
}

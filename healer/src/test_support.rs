//! Test-only doubles and builders for the healing engine.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::core::language::Language;
use crate::core::types::{ExecutionResult, ExitReason};
use crate::io::config::{HealerConfig, StrategyChoice};
use crate::io::model::{CompletionRequest, LanguageModel};
use crate::io::sandbox::{ProcessSandbox, RunRequest, Sandbox};

/// Model that replays scripted replies in order and records every request.
///
/// Once the script is exhausted every call fails.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    script: RefCell<VecDeque<Result<String, String>>>,
    requests: RefCell<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_outcomes(replies.into_iter().map(|reply| Ok(reply.into())))
    }

    /// Model whose first call fails with `message`.
    pub fn failing(message: &str) -> Self {
        Self::from_outcomes([Err(message.to_string())])
    }

    pub fn from_outcomes(outcomes: impl IntoIterator<Item = Result<String, String>>) -> Self {
        Self {
            script: RefCell::new(outcomes.into_iter().collect()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.borrow().clone()
    }

    /// Flattened prompt text of every request, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.requests
            .borrow()
            .iter()
            .map(CompletionRequest::flattened)
            .collect()
    }

    pub fn remaining(&self) -> usize {
        self.script.borrow().len()
    }
}

impl LanguageModel for ScriptedModel {
    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.requests.borrow_mut().push(request.clone());
        match self.script.borrow_mut().pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("scripted model exhausted")),
        }
    }
}

/// Sandbox backed by a closure; records every source it is asked to run.
pub struct FnSandbox<F> {
    run: F,
    sources: RefCell<Vec<String>>,
}

impl<F> FnSandbox<F>
where
    F: Fn(&str) -> ExecutionResult,
{
    pub fn new(run: F) -> Self {
        Self {
            run,
            sources: RefCell::new(Vec::new()),
        }
    }

    pub fn sources(&self) -> Vec<String> {
        self.sources.borrow().clone()
    }
}

impl<F> Sandbox for FnSandbox<F>
where
    F: Fn(&str) -> ExecutionResult,
{
    fn run(&self, request: &RunRequest<'_>) -> Result<ExecutionResult> {
        self.sources.borrow_mut().push(request.source.to_string());
        Ok((self.run)(request.source))
    }
}

/// Successful result for `source` with the given stdout.
pub fn success(source: &str, stdout: &str) -> ExecutionResult {
    ExecutionResult::new(
        source,
        ExitReason::Success,
        Some(0),
        stdout,
        "",
        Duration::from_millis(5),
    )
}

/// Failed result for `source` with the given stderr.
pub fn failure(source: &str, stderr: &str) -> ExecutionResult {
    ExecutionResult::new(
        source,
        ExitReason::NonZeroExit,
        Some(1),
        "",
        stderr,
        Duration::from_millis(5),
    )
}

/// Timed-out result for `source`.
pub fn timeout(source: &str) -> ExecutionResult {
    ExecutionResult::new(
        source,
        ExitReason::Timeout,
        None,
        "",
        "EXECUTION_TIMEOUT: code execution timed out after 1 seconds\n",
        Duration::from_secs(1),
    )
}

/// Wrap `code` in a fenced block tagged `tag`.
pub fn fenced(tag: &str, code: &str) -> String {
    format!("```{tag}\n{code}\n```")
}

/// Real sandbox running POSIX shell snippets.
pub fn shell_sandbox() -> ProcessSandbox {
    ProcessSandbox::new(Language::Shell)
}

/// Deterministic config for tests: unified strategy, shell language, short timeouts.
pub fn test_config() -> HealerConfig {
    let mut cfg = HealerConfig {
        strategy: StrategyChoice::Unified,
        ..HealerConfig::default()
    };
    cfg.sandbox.language = Language::Shell;
    cfg.sandbox.timeout_secs = 10;
    cfg.sandbox.memory_limit_mb = None;
    cfg
}

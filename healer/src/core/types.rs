//! Shared deterministic types for the healing engine.
//!
//! These types define stable contracts between components. They carry no I/O
//! handles and are cheap to clone into reports and transcripts.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One unit of work produced by the task decomposer.
///
/// Immutable once created. `depends_on` lists variable names that must already
/// be present in the context store when the task is synthesized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Human label.
    pub description: String,
    /// Instruction for synthesis.
    pub goal: String,
    /// Ordered, de-duplicated variable names read by this task.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// Why a sandbox run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Success,
    NonZeroExit,
    Timeout,
}

/// Outcome of exactly one sandbox invocation.
///
/// `source_code` is the snippet that was run, byte for byte. The language
/// harness that wraps it is not part of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub succeeded: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_reason: ExitReason,
    pub exit_code: Option<i32>,
    pub source_code: String,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

impl ExecutionResult {
    /// Build a result, deriving `succeeded` from `exit_reason`.
    pub fn new(
        source_code: impl Into<String>,
        exit_reason: ExitReason,
        exit_code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            succeeded: exit_reason == ExitReason::Success,
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_reason,
            exit_code,
            source_code: source_code.into(),
            duration,
        }
    }

    pub fn timed_out(&self) -> bool {
        self.exit_reason == ExitReason::Timeout
    }

    /// Text describing the failure, preferring stderr over stdout.
    pub fn error_text(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        match self.exit_code {
            Some(code) => format!("process exited with status {code}"),
            None => "process terminated without an exit status".to_string(),
        }
    }
}

/// One accepted revision in a repair chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixAttempt {
    /// Depth at which the failing code ran (0 for the initial code).
    pub depth: u32,
    pub prior_code: String,
    pub revised_code: String,
    pub error_text: String,
}

/// A value reported by generated code through the result marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextVariable {
    pub name: String,
    pub value: String,
    pub produced_by_task: usize,
}

/// Record of one task's run through synthesis and repair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReport {
    /// Position in the decomposed task list.
    pub index: usize,
    pub task: Task,
    /// Final code for the task when it succeeded.
    pub code: Option<String>,
    /// Last execution result, absent when synthesis itself failed.
    pub result: Option<ExecutionResult>,
    pub depth: u32,
    pub failure: Option<Failure>,
}

impl TaskReport {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none() && self.result.as_ref().is_some_and(|r| r.succeeded)
    }
}

/// Failure taxonomy reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The model was unusable or returned nothing usable.
    Generation,
    /// No extraction strategy recovered valid structure or code.
    Extraction,
    /// Non-zero exit or in-sandbox exception.
    Execution,
    /// Wall-clock bound exceeded. Never repaired.
    Timeout,
    /// Repair bound reached without success.
    DepthExhausted,
    /// No novel revision was available.
    DuplicateFix,
    /// Consolidation failed or yielded no extractable code.
    Merge,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Generation => "generation_failure",
            FailureKind::Extraction => "extraction_failure",
            FailureKind::Execution => "execution_failure",
            FailureKind::Timeout => "timeout_failure",
            FailureKind::DepthExhausted => "depth_exhausted",
            FailureKind::DuplicateFix => "duplicate_fix",
            FailureKind::Merge => "merge_failure",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of a request or task, with the last observed error text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&HealError> for Failure {
    fn from(err: &HealError) -> Self {
        Failure::new(err.kind(), err.to_string())
    }
}

/// Typed errors raised by the model-facing components.
///
/// Infrastructure problems (spawning, filesystem) travel as `anyhow::Error`
/// instead; these variants are the ones callers are expected to recover from.
#[derive(Debug, Error)]
pub enum HealError {
    #[error("generation failed: {0}")]
    Generation(String),
    #[error("extraction failed: {0}")]
    Extraction(String),
    #[error("merge failed: {0}")]
    Merge(String),
}

impl HealError {
    pub fn kind(&self) -> FailureKind {
        match self {
            HealError::Generation(_) => FailureKind::Generation,
            HealError::Extraction(_) => FailureKind::Extraction,
            HealError::Merge(_) => FailureKind::Merge,
        }
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

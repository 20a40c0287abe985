//! Isolated execution of generated snippets.
//!
//! Every run gets a fresh temporary directory (the execution unit) and a fresh
//! interpreter process. The unit is removed when the run returns, on every
//! path. Isolation is best-effort: a wall-clock bound and, where the platform
//! allows, an address-space ceiling. This is not a security boundary.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::core::language::Language;
use crate::core::types::{ExecutionResult, ExitReason};
use crate::io::config::SandboxConfig;
use crate::io::limits::{apply_memory_ceiling, isolate_process_group, memory_ceiling_supported};
use crate::io::process::{CommandOutput, run_command_with_timeout};

/// Prefix of the diagnostic line written for an in-sandbox failure.
pub const EXECUTION_ERROR_PREFIX: &str = "EXECUTION_ERROR:";
/// Prefix of the diagnostic line written when a run exceeds its time bound.
pub const EXECUTION_TIMEOUT_PREFIX: &str = "EXECUTION_TIMEOUT:";

const PYTHON_HARNESS: &str = include_str!("harness/python_main.py");
const PYTHON_HARNESS_NAME: &str = "__healer_main__.py";

/// Parameters for one sandbox run.
#[derive(Debug, Clone)]
pub struct RunRequest<'a> {
    pub source: &'a str,
    pub timeout: Duration,
    pub memory_ceiling_mb: Option<u64>,
}

/// Executes source code in isolation and reports what happened.
///
/// `Err` is reserved for infrastructure problems (the interpreter could not be
/// started, the unit could not be created). Anything the snippet itself does
/// is reported through the returned [`ExecutionResult`].
pub trait Sandbox {
    fn run(&self, request: &RunRequest<'_>) -> Result<ExecutionResult>;
}

impl<S: Sandbox + ?Sized> Sandbox for &S {
    fn run(&self, request: &RunRequest<'_>) -> Result<ExecutionResult> {
        (**self).run(request)
    }
}

impl<S: Sandbox + ?Sized> Sandbox for Box<S> {
    fn run(&self, request: &RunRequest<'_>) -> Result<ExecutionResult> {
        (**self).run(request)
    }
}

/// Sandbox that spawns a local interpreter per run.
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    language: Language,
    interpreter: String,
    working_dir: Option<PathBuf>,
    output_limit_bytes: usize,
}

impl ProcessSandbox {
    pub fn new(language: Language) -> Self {
        Self {
            language,
            interpreter: language.default_interpreter().to_string(),
            working_dir: None,
            output_limit_bytes: 100_000,
        }
    }

    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            language: config.language,
            interpreter: config.interpreter().to_string(),
            working_dir: config.working_dir.clone(),
            output_limit_bytes: config.output_limit_bytes,
        }
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn language(&self) -> Language {
        self.language
    }

    fn build_command(&self, unit: &Path, snippet: &Path) -> Result<Command> {
        let mut cmd = Command::new(&self.interpreter);
        match self.language {
            Language::Python => {
                let harness = unit.join(PYTHON_HARNESS_NAME);
                fs::write(&harness, PYTHON_HARNESS)
                    .with_context(|| format!("write harness {}", harness.display()))?;
                cmd.arg(harness).arg(snippet);
                cmd.env("PYTHONUNBUFFERED", "1")
                    .env("PYTHONDONTWRITEBYTECODE", "1")
                    .env("PYTHONIOENCODING", "utf-8");
            }
            Language::Shell => {
                cmd.arg(snippet);
            }
        }
        cmd.current_dir(self.working_dir.as_deref().unwrap_or(unit));
        Ok(cmd)
    }
}

impl Sandbox for ProcessSandbox {
    #[instrument(
        skip_all,
        fields(language = %self.language, timeout_ms = request.timeout.as_millis())
    )]
    fn run(&self, request: &RunRequest<'_>) -> Result<ExecutionResult> {
        let unit = tempfile::Builder::new()
            .prefix("healer-unit-")
            .tempdir()
            .context("create execution unit")?;
        let snippet = unit
            .path()
            .join(format!("snippet.{}", self.language.extension()));
        fs::write(&snippet, request.source)
            .with_context(|| format!("write snippet {}", snippet.display()))?;

        let mut cmd = self.build_command(unit.path(), &snippet)?;
        isolate_process_group(&mut cmd);
        if let Some(megabytes) = request.memory_ceiling_mb {
            if memory_ceiling_supported() {
                apply_memory_ceiling(&mut cmd, megabytes);
            } else {
                debug!(megabytes, "memory ceiling requested but unsupported");
            }
        }

        debug!(unit = %unit.path().display(), "running snippet");
        let output = run_command_with_timeout(cmd, None, request.timeout, self.output_limit_bytes)
            .with_context(|| format!("spawn interpreter {}", self.interpreter))?;

        let result = into_result(request, &output);
        info!(
            exit_reason = ?result.exit_reason,
            exit_code = ?result.exit_code,
            duration_ms = result.duration.as_millis(),
            "sandbox run finished"
        );
        // `unit` drops here and removes the directory.
        Ok(result)
    }
}

fn into_result(request: &RunRequest<'_>, output: &CommandOutput) -> ExecutionResult {
    let stdout = output.stdout_text();
    let mut stderr = output.stderr_text();

    let (exit_reason, exit_code) = if output.timed_out {
        push_line(
            &mut stderr,
            &format!(
                "{EXECUTION_TIMEOUT_PREFIX} code execution timed out after {} seconds",
                describe_secs(request.timeout)
            ),
        );
        (ExitReason::Timeout, None)
    } else if output.status.success() {
        (ExitReason::Success, output.status.code())
    } else {
        let code = output.status.code();
        if stderr.trim().is_empty() {
            let detail = match code {
                Some(code) => format!("process exited with status {code}"),
                None => "process was terminated by a signal".to_string(),
            };
            push_line(&mut stderr, &format!("{EXECUTION_ERROR_PREFIX} {detail}"));
        }
        (ExitReason::NonZeroExit, code)
    };

    ExecutionResult::new(
        request.source,
        exit_reason,
        exit_code,
        stdout,
        stderr,
        output.elapsed,
    )
}

fn push_line(buf: &mut String, line: &str) {
    if !buf.is_empty() && !buf.ends_with('\n') {
        buf.push('\n');
    }
    buf.push_str(line);
    buf.push('\n');
}

fn describe_secs(duration: Duration) -> String {
    if duration.subsec_millis() == 0 {
        duration.as_secs().to_string()
    } else {
        format!("{:.1}", duration.as_secs_f64())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn request(source: &str) -> RunRequest<'_> {
        RunRequest {
            source,
            timeout: Duration::from_secs(10),
            memory_ceiling_mb: None,
        }
    }

    fn python_available() -> bool {
        Command::new("python3")
            .arg("--version")
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    #[test]
    fn shell_success_reports_stdout_and_exact_source() {
        let source = "echo hello\n";
        let result = ProcessSandbox::new(Language::Shell)
            .run(&request(source))
            .expect("run");
        assert!(result.succeeded);
        assert_eq!(result.exit_reason, ExitReason::Success);
        assert_eq!(result.stdout, "hello\n");
        assert_eq!(result.source_code, source);
    }

    #[test]
    fn silent_failure_gets_diagnostic_line() {
        let result = ProcessSandbox::new(Language::Shell)
            .run(&request("exit 4"))
            .expect("run");
        assert!(!result.succeeded);
        assert_eq!(result.exit_reason, ExitReason::NonZeroExit);
        assert_eq!(result.exit_code, Some(4));
        assert!(
            result
                .stderr
                .contains("EXECUTION_ERROR: process exited with status 4")
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn timeout_kills_and_reports() {
        let run = RunRequest {
            source: "sleep 30",
            timeout: Duration::from_millis(300),
            memory_ceiling_mb: None,
        };
        let result = ProcessSandbox::new(Language::Shell).run(&run).expect("run");
        assert!(result.timed_out());
        assert!(!result.succeeded);
        assert!(
            result
                .stderr
                .contains("EXECUTION_TIMEOUT: code execution timed out after 0.3 seconds")
        );
        assert!(result.duration < Duration::from_secs(20));
    }

    #[test]
    fn execution_unit_is_removed_after_run() {
        let result = ProcessSandbox::new(Language::Shell)
            .run(&request("pwd"))
            .expect("run");
        let unit = PathBuf::from(result.stdout.trim());
        assert!(
            unit.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("healer-unit-"))
        );
        assert!(!unit.exists());
    }

    #[test]
    fn runs_are_independent() {
        let sandbox = ProcessSandbox::new(Language::Shell);
        sandbox.run(&request("echo kept > marker.txt")).expect("first");
        let second = sandbox.run(&request("cat marker.txt")).expect("second");
        assert!(!second.succeeded);
    }

    #[test]
    fn configured_working_dir_is_used() {
        let temp = tempfile::tempdir().expect("tempdir");
        let sandbox = ProcessSandbox::new(Language::Shell).with_working_dir(temp.path());
        let result = sandbox.run(&request("echo data > out.txt")).expect("run");
        assert!(result.succeeded);
        assert!(temp.path().join("out.txt").exists());
    }

    #[test]
    fn missing_interpreter_is_an_error() {
        let sandbox =
            ProcessSandbox::new(Language::Shell).with_interpreter("no-such-interpreter-healer");
        let err = sandbox.run(&request("echo hi")).expect_err("spawn fails");
        assert!(format!("{err:#}").contains("no-such-interpreter-healer"));
    }

    #[test]
    fn python_exception_is_reported() {
        if !python_available() {
            return;
        }
        let result = ProcessSandbox::new(Language::Python)
            .run(&request("print('before')\nraise ValueError('bad input')\n"))
            .expect("run");
        assert_eq!(result.exit_code, Some(1));
        assert_eq!(result.stdout, "before\n");
        assert!(result.stderr.contains("Traceback"));
        assert!(result.stderr.contains("EXECUTION_ERROR: ValueError: bad input"));
    }

    #[test]
    fn python_exit_status_is_preserved() {
        if !python_available() {
            return;
        }
        let result = ProcessSandbox::new(Language::Python)
            .run(&request("import sys\nsys.exit(3)\n"))
            .expect("run");
        assert_eq!(result.exit_code, Some(3));
        assert!(!result.stderr.contains("Traceback"));
    }

    #[test]
    fn python_success_under_memory_ceiling() {
        if !python_available() {
            return;
        }
        let run = RunRequest {
            source: "print(sum(range(10)))",
            timeout: Duration::from_secs(20),
            memory_ceiling_mb: Some(512),
        };
        let result = ProcessSandbox::new(Language::Python).run(&run).expect("run");
        assert!(result.succeeded, "stderr: {}", result.stderr);
        assert_eq!(result.stdout, "45\n");
    }
}

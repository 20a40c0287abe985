//! Self-healing code execution from the command line.
//!
//! Reads `healer.toml` (or `--config`), turns a natural-language request into
//! a program, runs it and repairs it from its own errors.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use healer::agents::intent::{Intent, IntentInterpreter};
use healer::core::language::Language;
use healer::core::types::{ExecutionResult, FailureKind};
use healer::exit_codes;
use healer::io::config::{
    HealerConfig, PerformanceMode, StrategyChoice, load_config, render_config, write_config,
};
use healer::io::model::model_from_config;
use healer::io::prompt::PromptBuilder;
use healer::io::sandbox::{ProcessSandbox, RunRequest, Sandbox};
use healer::logging;
use healer::orchestrator::{Orchestrator, Outcome};

#[derive(Parser)]
#[command(
    name = "healer",
    version,
    about = "Generate, run and repair code from natural-language requests"
)]
struct Cli {
    /// Configuration file; missing files fall back to defaults.
    #[arg(long, global = true, default_value = "healer.toml")]
    config: PathBuf,

    /// Performance mode: fast, balanced or quality.
    #[arg(long, global = true)]
    mode: Option<PerformanceMode>,

    /// Model preset applied to the code and intent models.
    #[arg(long, global = true)]
    preset: Option<String>,

    /// Planning strategy: auto, unified or sequential.
    #[arg(long, global = true)]
    strategy: Option<StrategyChoice>,

    /// Working directory for executed code.
    #[arg(long, global = true)]
    workdir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate code for a request, run it and repair it until it works.
    Run {
        #[arg(required = true, num_args = 1..)]
        request: Vec<String>,
    },
    /// Route the input to code generation or a chat reply.
    Ask {
        #[arg(required = true, num_args = 1..)]
        request: Vec<String>,
    },
    /// Run one file through the sandbox once, without repair.
    Exec { file: PathBuf },
    /// Print the effective configuration as TOML.
    Config {
        /// Also write it to the config file.
        #[arg(long)]
        write: bool,
    },
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<i32> {
    let cfg = effective_config(&cli)?;
    match cli.command {
        Command::Run { request } => cmd_run(&cfg, &request.join(" ")),
        Command::Ask { request } => cmd_ask(&cfg, &request.join(" ")),
        Command::Exec { file } => cmd_exec(&cfg, &file),
        Command::Config { write } => {
            if write {
                write_config(&cli.config, &cfg)?;
            }
            print!("{}", render_config(&cfg)?);
            Ok(exit_codes::OK)
        }
    }
}

/// Load the config file and apply command-line overrides in a fixed order.
fn effective_config(cli: &Cli) -> Result<HealerConfig> {
    let mut cfg = load_config(&cli.config)?;
    if let Some(mode) = cli.mode {
        cfg = cfg.with_mode(mode)?;
    }
    if let Some(preset) = cli.preset.as_deref() {
        cfg = cfg.with_model_preset(preset)?;
    }
    if let Some(strategy) = cli.strategy {
        cfg.strategy = strategy;
    }
    if let Some(workdir) = &cli.workdir {
        cfg.sandbox.working_dir = Some(workdir.clone());
    }
    cfg.validate()?;
    Ok(cfg)
}

fn cmd_run(cfg: &HealerConfig, request: &str) -> Result<i32> {
    let model = model_from_config(&cfg.models).context("build model backend")?;
    let sandbox = ProcessSandbox::from_config(&cfg.sandbox);
    let orchestrator = Orchestrator::new(model, sandbox, cfg.clone());
    let outcome = orchestrator.handle(request)?;
    print_outcome(cfg, &outcome);
    Ok(outcome_exit_code(&outcome))
}

fn cmd_ask(cfg: &HealerConfig, input: &str) -> Result<i32> {
    let model = model_from_config(&cfg.models).context("build model backend")?;
    let interpreter = IntentInterpreter::new(
        &model,
        &cfg.models.intent_model,
        &cfg.models.chat_model,
        PromptBuilder::new(cfg.prompt_budget_bytes),
    );
    match interpreter.interpret(input) {
        Intent::Code => {
            let sandbox = ProcessSandbox::from_config(&cfg.sandbox);
            let orchestrator = Orchestrator::new(&model, sandbox, cfg.clone());
            let outcome = orchestrator.handle(input)?;
            print_outcome(cfg, &outcome);
            Ok(outcome_exit_code(&outcome))
        }
        Intent::Chat => {
            println!("{}", interpreter.converse(input)?);
            Ok(exit_codes::OK)
        }
    }
}

fn cmd_exec(cfg: &HealerConfig, file: &Path) -> Result<i32> {
    let source =
        fs::read_to_string(file).with_context(|| format!("read {}", file.display()))?;
    let mut sandbox_cfg = cfg.sandbox.clone();
    if let Some(language) = file
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(Language::from_extension)
        && language != sandbox_cfg.language
    {
        sandbox_cfg.language = language;
        sandbox_cfg.interpreter = None;
    }
    let sandbox = ProcessSandbox::from_config(&sandbox_cfg);
    let result = sandbox.run(&RunRequest {
        source: &source,
        timeout: sandbox_cfg.timeout(),
        memory_ceiling_mb: sandbox_cfg.memory_limit_mb,
    })?;
    print_streams(&result);
    Ok(result_exit_code(&result))
}

fn print_outcome(cfg: &HealerConfig, outcome: &Outcome) {
    if cfg.display.show_fix_history && !outcome.attempts.is_empty() {
        eprintln!("fix history ({} attempts):", outcome.attempts.len());
        for attempt in &outcome.attempts {
            let last_line = attempt.error_text.lines().last().unwrap_or_default();
            eprintln!("  depth {}: {}", attempt.depth, last_line);
        }
    }
    for report in outcome.tasks.iter().filter(|r| !r.succeeded()) {
        if let Some(failure) = &report.failure {
            eprintln!(
                "task {} ({}) failed: {}",
                report.index + 1,
                report.task.goal,
                failure.kind
            );
        }
    }
    if cfg.display.show_generated_code
        && let Some(code) = outcome.final_code()
    {
        eprintln!("generated code:\n{}\n", code.trim_end());
    }
    if let Some(result) = &outcome.result {
        print_streams(result);
    }
    if let Some(failure) = &outcome.failure {
        eprintln!("healer: {}: {}", failure.kind, failure.message);
    }
}

fn print_streams(result: &ExecutionResult) {
    print!("{}", result.stdout);
    eprint!("{}", result.stderr);
}

fn outcome_exit_code(outcome: &Outcome) -> i32 {
    match &outcome.failure {
        None if outcome.succeeded() => exit_codes::OK,
        Some(failure) if failure.kind == FailureKind::Timeout => exit_codes::TIMEOUT,
        _ => exit_codes::FAILED,
    }
}

fn result_exit_code(result: &ExecutionResult) -> i32 {
    if result.succeeded {
        exit_codes::OK
    } else if result.timed_out() {
        exit_codes::TIMEOUT
    } else {
        exit_codes::FAILED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_joins_request_words() {
        let cli = Cli::parse_from(["healer", "run", "print", "ten", "primes"]);
        match cli.command {
            Command::Run { request } => assert_eq!(request.join(" "), "print ten primes"),
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn parse_global_overrides_after_subcommand() {
        let cli = Cli::parse_from([
            "healer",
            "run",
            "hello",
            "--mode",
            "fast",
            "--strategy",
            "sequential",
            "--config",
            "custom.toml",
        ]);
        assert_eq!(cli.mode, Some(PerformanceMode::Fast));
        assert_eq!(cli.strategy, Some(StrategyChoice::Sequential));
        assert_eq!(cli.config, PathBuf::from("custom.toml"));
    }

    #[test]
    fn parse_rejects_unknown_strategy() {
        assert!(Cli::try_parse_from(["healer", "--strategy", "parallel", "config"]).is_err());
    }

    #[test]
    fn run_requires_a_request() {
        assert!(Cli::try_parse_from(["healer", "run"]).is_err());
    }

    #[test]
    fn effective_config_applies_overrides() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cli = Cli::parse_from([
            "healer",
            "--config",
            temp.path().join("missing.toml").to_str().expect("utf8 path"),
            "--mode",
            "quality",
            "--preset",
            "coder",
            "--workdir",
            "/tmp",
            "config",
        ]);
        let cfg = effective_config(&cli).expect("config");
        assert_eq!(cfg.sandbox.timeout_secs, 60);
        assert_eq!(cfg.repair.max_fix_depth, 8);
        assert_eq!(cfg.models.code_model, "deepseek-coder-v2");
        assert_eq!(cfg.sandbox.working_dir, Some(PathBuf::from("/tmp")));
    }
}

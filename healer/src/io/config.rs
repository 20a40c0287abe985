//! Engine configuration stored in `healer.toml`.
//!
//! The configuration is an immutable value: it is built once, validated and
//! handed to components by reference. Performance modes and model presets
//! return a new value instead of mutating shared state.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::language::Language;

/// Engine configuration (TOML).
///
/// Missing fields default to the `balanced` profile with local Ollama models.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HealerConfig {
    /// How requests are planned: `auto`, `unified` or `sequential`.
    pub strategy: StrategyChoice,

    /// Upper bound on tasks accepted from one decomposition.
    pub max_tasks: usize,

    /// Rendered prompts are trimmed to this many bytes.
    pub prompt_budget_bytes: usize,

    /// When set, each session writes a transcript under this directory.
    pub transcript_dir: Option<PathBuf>,

    pub models: ModelConfig,
    pub sandbox: SandboxConfig,
    pub repair: RepairConfig,
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyChoice {
    #[default]
    Auto,
    Unified,
    Sequential,
}

impl FromStr for StrategyChoice {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto" => Ok(StrategyChoice::Auto),
            "unified" => Ok(StrategyChoice::Unified),
            "sequential" => Ok(StrategyChoice::Sequential),
            other => Err(anyhow!(
                "unknown strategy {other:?} (expected auto, unified or sequential)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelBackend {
    #[default]
    Ollama,
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    pub backend: ModelBackend,

    /// Base URL of the Ollama server.
    pub endpoint: String,

    /// Model used for code synthesis, repair, decomposition and merging.
    pub code_model: String,

    /// Model used for intent and strategy classification.
    pub intent_model: String,

    /// Model used for conversational replies.
    pub chat_model: String,

    pub request_timeout_secs: u64,

    /// Program and arguments for the `command` backend. The prompt is written
    /// to stdin and stdout is taken as the completion.
    pub command: Vec<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            backend: ModelBackend::Ollama,
            endpoint: "http://localhost:11434".to_string(),
            code_model: "deepseek-coder-v2".to_string(),
            intent_model: "phi3".to_string(),
            chat_model: "phi3".to_string(),
            request_timeout_secs: 300,
            command: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    pub language: Language,

    /// Interpreter program; defaults to the language's usual interpreter.
    pub interpreter: Option<String>,

    /// Wall-clock bound for one run.
    pub timeout_secs: u64,

    /// Address-space ceiling where supported. Unset disables the ceiling.
    pub memory_limit_mb: Option<u64>,

    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Working directory for runs; defaults to each run's temporary directory.
    pub working_dir: Option<PathBuf>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            language: Language::Python,
            interpreter: None,
            timeout_secs: 30,
            memory_limit_mb: Some(512),
            output_limit_bytes: 100_000,
            working_dir: None,
        }
    }
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn interpreter(&self) -> &str {
        self.interpreter
            .as_deref()
            .unwrap_or(self.language.default_interpreter())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RepairConfig {
    /// Number of revisions allowed after the first execution.
    pub max_fix_depth: u32,

    /// Attempts retained in a session's fix trail.
    pub trail_capacity: usize,

    /// Most recent attempts summarised in each repair prompt.
    pub digest_attempts: usize,

    /// Error text in attempt summaries is cut to this many characters.
    pub error_preview_chars: usize,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            max_fix_depth: 5,
            trail_capacity: 10,
            digest_attempts: 3,
            error_preview_chars: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DisplayConfig {
    pub show_generated_code: bool,
    pub show_fix_history: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            show_generated_code: true,
            show_fix_history: false,
        }
    }
}

/// Speed/quality trade-off applied on top of a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceMode {
    Fast,
    Balanced,
    Quality,
}

impl FromStr for PerformanceMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fast" => Ok(PerformanceMode::Fast),
            "balanced" => Ok(PerformanceMode::Balanced),
            "quality" => Ok(PerformanceMode::Quality),
            other => Err(anyhow!(
                "unknown mode {other:?} (expected fast, balanced or quality)"
            )),
        }
    }
}

impl fmt::Display for PerformanceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PerformanceMode::Fast => "fast",
            PerformanceMode::Balanced => "balanced",
            PerformanceMode::Quality => "quality",
        })
    }
}

/// Named model presets, applied to both the code and intent models.
pub const MODEL_PRESETS: &[(&str, &str)] = &[
    ("fast", "deepseek-r1:1.5b"),
    ("balanced", "deepseek-r1:7b"),
    ("powerful", "deepseek-r1"),
    ("large", "deepseek-r1:32b"),
    ("massive", "deepseek-r1:671b"),
    ("coder", "deepseek-coder-v2"),
    ("reasoner", "deepseek-r1"),
];

pub fn preset_model(name: &str) -> Option<&'static str> {
    MODEL_PRESETS
        .iter()
        .find(|(preset, _)| *preset == name)
        .map(|(_, model)| *model)
}

impl HealerConfig {
    /// Return a copy tuned for `mode`.
    pub fn with_mode(&self, mode: PerformanceMode) -> Result<Self> {
        let (timeout_secs, max_fix_depth, show_code, show_history, preset) = match mode {
            PerformanceMode::Fast => (15, 2, false, false, "fast"),
            PerformanceMode::Balanced => (30, 5, true, false, "balanced"),
            PerformanceMode::Quality => (60, 8, true, true, "powerful"),
        };
        let mut next = self.with_model_preset(preset)?;
        next.sandbox.timeout_secs = timeout_secs;
        next.repair.max_fix_depth = max_fix_depth;
        next.display.show_generated_code = show_code;
        next.display.show_fix_history = show_history;
        Ok(next)
    }

    /// Return a copy whose code and intent models use the named preset.
    pub fn with_model_preset(&self, name: &str) -> Result<Self> {
        let model = preset_model(name).ok_or_else(|| {
            let known: Vec<&str> = MODEL_PRESETS.iter().map(|(preset, _)| *preset).collect();
            anyhow!("unknown model preset {name:?} (available: {})", known.join(", "))
        })?;
        let mut next = self.clone();
        next.models.code_model = model.to_string();
        next.models.intent_model = model.to_string();
        Ok(next)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sandbox.timeout_secs == 0 {
            return Err(anyhow!("sandbox.timeout_secs must be > 0"));
        }
        if self.sandbox.output_limit_bytes == 0 {
            return Err(anyhow!("sandbox.output_limit_bytes must be > 0"));
        }
        if self.sandbox.memory_limit_mb == Some(0) {
            return Err(anyhow!("sandbox.memory_limit_mb must be > 0 when set"));
        }
        if self
            .sandbox
            .interpreter
            .as_deref()
            .is_some_and(|i| i.trim().is_empty())
        {
            return Err(anyhow!("sandbox.interpreter must not be empty when set"));
        }
        if self.repair.trail_capacity == 0 {
            return Err(anyhow!("repair.trail_capacity must be > 0"));
        }
        if self.max_tasks == 0 {
            return Err(anyhow!("max_tasks must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        if self.models.request_timeout_secs == 0 {
            return Err(anyhow!("models.request_timeout_secs must be > 0"));
        }
        match self.models.backend {
            ModelBackend::Ollama => {
                if self.models.endpoint.trim().is_empty() {
                    return Err(anyhow!("models.endpoint must be set for the ollama backend"));
                }
            }
            ModelBackend::Command => {
                if self.models.command.is_empty() || self.models.command[0].trim().is_empty() {
                    return Err(anyhow!("models.command must be a non-empty array"));
                }
            }
        }
        for (label, name) in [
            ("code_model", &self.models.code_model),
            ("intent_model", &self.models.intent_model),
            ("chat_model", &self.models.chat_model),
        ] {
            if name.trim().is_empty() {
                return Err(anyhow!("models.{label} must not be empty"));
            }
        }
        Ok(())
    }
}

impl Default for HealerConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyChoice::Auto,
            max_tasks: 8,
            prompt_budget_bytes: 40_000,
            transcript_dir: None,
            models: ModelConfig::default(),
            sandbox: SandboxConfig::default(),
            repair: RepairConfig::default(),
            display: DisplayConfig::default(),
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `HealerConfig::default()`.
pub fn load_config(path: &Path) -> Result<HealerConfig> {
    if !path.exists() {
        let cfg = HealerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: HealerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Serialize config as pretty TOML.
pub fn render_config(cfg: &HealerConfig) -> Result<String> {
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    if !buf.ends_with('\n') {
        buf.push('\n');
    }
    Ok(buf)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &HealerConfig) -> Result<()> {
    cfg.validate()?;
    let buf = render_config(cfg)?;
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

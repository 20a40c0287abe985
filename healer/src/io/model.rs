//! Language-model completion backends.
//!
//! The [`LanguageModel`] trait decouples the engine from the completion
//! service. [`OllamaClient`] talks to a local Ollama server; [`CommandModel`]
//! pipes the prompt into any CLI. Tests use scripted models that return
//! predetermined replies without network or process access.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::io::config::{ModelBackend, ModelConfig};
use crate::io::process::run_command_with_timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Parameters for one completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
}

impl CompletionRequest {
    /// Single user message for `model`.
    pub fn prompt(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: vec![Message::user(prompt)],
        }
    }

    /// Concatenated message contents, as seen by text-only backends.
    pub fn flattened(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Abstraction over completion backends.
pub trait LanguageModel {
    /// Return the completion text for `request`.
    fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

impl<M: LanguageModel + ?Sized> LanguageModel for &M {
    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        (**self).complete(request)
    }
}

impl<M: LanguageModel + ?Sized> LanguageModel for Box<M> {
    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        (**self).complete(request)
    }
}

/// Build the configured backend.
pub fn model_from_config(config: &ModelConfig) -> Result<Box<dyn LanguageModel>> {
    match config.backend {
        ModelBackend::Ollama => Ok(Box::new(OllamaClient::new(
            &config.endpoint,
            Duration::from_secs(config.request_timeout_secs),
        )?)),
        ModelBackend::Command => {
            let (program, args) = config
                .command
                .split_first()
                .ok_or_else(|| anyhow!("models.command must be a non-empty array"))?;
            Ok(Box::new(CommandModel::new(
                program.clone(),
                args.to_vec(),
                Duration::from_secs(config.request_timeout_secs),
            )))
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatPayload<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ChatMessage>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// Client for a local Ollama server (`POST /api/chat`, non-streaming).
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::blocking::Client,
    chat_url: String,
}

impl OllamaClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            chat_url: format!("{}/api/chat", endpoint.trim_end_matches('/')),
        })
    }
}

impl LanguageModel for OllamaClient {
    #[instrument(skip_all, fields(model = %request.model, url = %self.chat_url))]
    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let payload = ChatPayload {
            model: &request.model,
            messages: &request.messages,
            stream: false,
        };
        debug!("sending chat request");
        let response = self
            .client
            .post(&self.chat_url)
            .json(&payload)
            .send()
            .with_context(|| format!("send request to {}", self.chat_url))?;

        let status = response.status();
        let body = response.text().context("read ollama response body")?;
        if !status.is_success() {
            warn!(%status, "ollama returned an error status");
            return Err(anyhow!("ollama returned {status}: {}", body.trim()));
        }

        let parsed: ChatResponse =
            serde_json::from_str(&body).context("parse ollama response")?;
        if let Some(error) = parsed.error {
            return Err(anyhow!("ollama error: {error}"));
        }
        let content = parsed
            .message
            .map(|m| m.content)
            .ok_or_else(|| anyhow!("ollama response has no message"))?;
        info!(bytes = content.len(), "completion received");
        Ok(content)
    }
}

/// Backend that spawns a CLI per completion.
///
/// The flattened prompt is written to stdin; stdout is the completion.
#[derive(Debug, Clone)]
pub struct CommandModel {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandModel {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl LanguageModel for CommandModel {
    #[instrument(skip_all, fields(program = %self.program, model = %request.model))]
    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).env("HEALER_MODEL", &request.model);

        let prompt = request.flattened();
        let output = run_command_with_timeout(
            cmd,
            Some(prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run model command {}", self.program))?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "model command timed out");
            return Err(anyhow!("model command timed out after {:?}", self.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "model command failed");
            return Err(anyhow!(
                "model command failed with status {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!(bytes = text.len(), "model command completed");
        Ok(text)
    }
}

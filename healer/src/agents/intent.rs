//! Classification of requests: code versus chat, unified versus sequential.

use std::fmt;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::core::extract::strip_reasoning;
use crate::io::model::{CompletionRequest, LanguageModel};
use crate::io::prompt::PromptBuilder;

/// How a code request is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// One program for the whole request.
    Unified,
    /// Ordered tasks, context threading, then a merge.
    Sequential,
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExecutionStrategy::Unified => "unified",
            ExecutionStrategy::Sequential => "sequential",
        })
    }
}

/// What the user wants from an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Code,
    Chat,
}

/// Chooses an execution strategy for a request.
#[derive(Debug, Clone)]
pub struct StrategyClassifier<M> {
    model: M,
    model_name: String,
    prompts: PromptBuilder,
}

impl<M: LanguageModel> StrategyClassifier<M> {
    pub fn new(model: M, model_name: impl Into<String>, prompts: PromptBuilder) -> Self {
        Self {
            model,
            model_name: model_name.into(),
            prompts,
        }
    }

    #[instrument(skip_all)]
    pub fn classify(&self, request: &str) -> Result<ExecutionStrategy> {
        let prompt = self.prompts.strategy(request)?;
        let reply = self
            .model
            .complete(&CompletionRequest::prompt(&self.model_name, prompt))
            .context("classify strategy")?;
        let answer = strip_reasoning(&reply).to_lowercase();
        let strategy = if answer.contains("sequential") || answer.contains("steps") {
            ExecutionStrategy::Sequential
        } else {
            ExecutionStrategy::Unified
        };
        debug!(%strategy, "strategy classified");
        Ok(strategy)
    }
}

/// Routes free-form input to code generation or conversation.
#[derive(Debug, Clone)]
pub struct IntentInterpreter<M> {
    model: M,
    intent_model: String,
    chat_model: String,
    prompts: PromptBuilder,
}

impl<M: LanguageModel> IntentInterpreter<M> {
    pub fn new(
        model: M,
        intent_model: impl Into<String>,
        chat_model: impl Into<String>,
        prompts: PromptBuilder,
    ) -> Self {
        Self {
            model,
            intent_model: intent_model.into(),
            chat_model: chat_model.into(),
            prompts,
        }
    }

    /// Classify `input`. Any failure counts as chat.
    #[instrument(skip_all)]
    pub fn interpret(&self, input: &str) -> Intent {
        let reply = self.prompts.intent(input).and_then(|prompt| {
            self.model
                .complete(&CompletionRequest::prompt(&self.intent_model, prompt))
        });
        match reply {
            Ok(reply) if strip_reasoning(&reply).to_lowercase().contains("code") => Intent::Code,
            Ok(_) => Intent::Chat,
            Err(err) => {
                warn!(err = %err, "intent classification failed, treating as chat");
                Intent::Chat
            }
        }
    }

    /// Produce a conversational reply.
    #[instrument(skip_all)]
    pub fn converse(&self, input: &str) -> Result<String> {
        let prompt = self.prompts.chat(input)?;
        let reply = self
            .model
            .complete(&CompletionRequest::prompt(&self.chat_model, prompt))
            .context("chat completion")?;
        Ok(strip_reasoning(&reply).trim().to_string())
    }
}

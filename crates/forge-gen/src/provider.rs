//! OpenAI-compatible chat-completions backend.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use forge_core::ForgeError;

use crate::backend::{GenerateFuture, GeneratorBackend};
use crate::context::{ModuleContext, TokenUsage};
use crate::prompt::build_module_prompt;
use crate::validate::strip_markdown_fences;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

const SYSTEM_PROMPT: &str = "You are a precise code generator. You write complete, \
working Python modules and respond with source code only.";

/// Backend speaking the OpenAI chat-completions wire format.
///
/// Works against any compatible endpoint via `base_url`.
pub struct OpenAiBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiBackend {
    /// # Errors
    ///
    /// Returns [`ForgeError::Generation`] if the HTTP client cannot be built.
    pub fn new(base_url: &str, api_key: String, model: String) -> Result<Self, ForgeError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ForgeError::Generation(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        })
    }

    async fn chat(&self, prompt: String) -> Result<(String, Option<TokenUsage>), ForgeError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.0,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ForgeError::Generation(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ForgeError::Generation(format!(
                "provider returned {status}: {}",
                body.chars().take(400).collect::<String>()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ForgeError::Generation(format!("malformed provider response: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ForgeError::Generation("provider returned no choices".to_string()))?;

        let usage = parsed.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            model: self.model.clone(),
            provider: self.provider_name().to_string(),
        });

        Ok((strip_markdown_fences(&content), usage))
    }
}

impl GeneratorBackend for OpenAiBackend {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &str {
        "openai"
    }

    fn generate_module<'a>(
        &'a self,
        ctx: &'a ModuleContext,
        extra_error_context: &'a [String],
    ) -> GenerateFuture<'a> {
        Box::pin(async move {
            let prompt = build_module_prompt(ctx, extra_error_context);
            tracing::debug!(
                module = %ctx.spec_module,
                model = %self.model,
                prompt_bytes = prompt.len(),
                "requesting module generation"
            );
            self.chat(prompt).await
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f64,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

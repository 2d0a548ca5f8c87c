use crate::config::{AgentConfig, LlmProvider, Settings};
use crate::domain::model::{ChatMessage, ToolDefinition};
use crate::domain::ports::LlmClient;
use crate::utils::error::{FinAgentError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Client for any server speaking the OpenAI chat-completions protocol (DeepSeek included).
pub struct OpenAiCompatibleClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolDefinition]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'a str>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

impl OpenAiCompatibleClient {
    pub fn new(
        api_key: Option<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key,
            base_url: base_url.into(),
            model: model.into(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatMessage> {
        let body = ChatRequest {
            model: &self.model,
            messages,
            tools: (!tools.is_empty()).then_some(tools),
            tool_choice: (!tools.is_empty()).then_some("auto"),
        };

        tracing::debug!(
            "Sending {} messages to {} (model {})",
            messages.len(),
            self.endpoint(),
            self.model
        );

        let mut request = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        tracing::debug!("LLM response status: {}", status);

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(FinAgentError::llm(format!(
                "{} returned {}: {}",
                self.endpoint(),
                status,
                text.trim()
            )));
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| FinAgentError::llm("response contained no choices"))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Builds the chat client for the configured `LLM_PROVIDER`.
pub fn create_llm(config: &AgentConfig, settings: &Settings) -> Result<Box<dyn LlmClient>> {
    let timeout = settings.request_timeout();
    let client = match config.provider()? {
        LlmProvider::DeepSeek => OpenAiCompatibleClient::new(
            config.deepseek_api_key.clone(),
            &config.deepseek_base_url,
            &config.deepseek_model,
            timeout,
        )?,
        LlmProvider::OpenAi | LlmProvider::Local => OpenAiCompatibleClient::new(
            config.openai_api_key.clone(),
            &config.openai_base_url,
            &config.openai_model,
            timeout,
        )?,
    };
    tracing::info!("Using LLM model {}", client.model());
    Ok(Box::new(client))
}

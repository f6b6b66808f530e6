//! Renderer backed by the Anthropic messages API.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use periodize_db::models::Plan;

use super::{GenerationError, Renderer, document};
use crate::discipline::{AthleteData, prompt};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_MAX_TOKENS: u32 = 12_000;
const API_VERSION: &str = "2023-06-01";
const TEMPERATURE: f32 = 0.7;

#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
}

impl AnthropicConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: Vec<TextBlock>,
}

#[derive(Debug, Serialize)]
struct TextBlock {
    #[serde(rename = "type")]
    kind: &'static str,
    text: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct AnthropicRenderer {
    client: Client,
    config: AnthropicConfig,
}

impl AnthropicRenderer {
    pub fn new(config: AnthropicConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    async fn complete(&self, system: &str, user: String) -> Result<String, GenerationError> {
        let request = MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            temperature: TEMPERATURE,
            system,
            messages: vec![Message {
                role: "user",
                content: vec![TextBlock {
                    kind: "text",
                    text: user,
                }],
            }],
        };

        let response = self
            .client
            .post(&self.config.api_url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(GenerationError::from_status(status.as_u16(), message));
        }

        let parsed: MessagesResponse =
            serde_json::from_str(&body).map_err(|e| GenerationError::Parse(e.to_string()))?;

        let text: String = parsed
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text)
            .collect();

        if text.trim().is_empty() {
            return Err(GenerationError::Parse(
                "response contained no text content".to_string(),
            ));
        }
        Ok(text)
    }
}

#[async_trait]
impl Renderer for AnthropicRenderer {
    async fn generate_content(
        &self,
        athlete: &AthleteData,
        weeks: i32,
    ) -> Result<String, GenerationError> {
        let system = prompt::system_prompt(athlete.discipline());
        let user = prompt::build_prompt(athlete, weeks);
        tracing::debug!(
            discipline = %athlete.discipline(),
            weeks,
            prompt_len = user.len(),
            "requesting plan content"
        );
        self.complete(system, user).await
    }

    async fn render_document(
        &self,
        plan: &Plan,
        athlete: &AthleteData,
        text: &str,
    ) -> Result<Vec<u8>, GenerationError> {
        Ok(document::render_text(plan, athlete, text))
    }
}

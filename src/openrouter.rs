//! OpenRouter (OpenAI-compatible) chat-completions client used as the
//! correction backend.

use crate::config::CorrectionConfig;
use crate::corrector::{BackendCorrection, CorrectionBackend, CorrectionPrompt, Suggestion};
use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Chat-completions client for OCR correction.
#[derive(Clone)]
pub struct OpenRouterClient {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl OpenRouterClient {
    /// Build a client from configuration. Returns `None` when no API key is set.
    pub fn from_config(config: &CorrectionConfig, client: Client) -> Option<Self> {
        let api_key = config.api_key.clone()?;
        Some(Self {
            client,
            api_url: config.api_url.clone(),
            api_key,
            model: config.model.clone(),
        })
    }

    /// Send a chat completion request with JSON schema response format.
    pub async fn chat_json<T: for<'de> Deserialize<'de>>(
        &self,
        messages: Vec<Message>,
        schema_name: &str,
        schema: serde_json::Value,
    ) -> Result<T> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            max_tokens: Some(4096),
            temperature: Some(0.1),
            response_format: Some(ResponseFormat::JsonSchema {
                json_schema: JsonSchemaFormat {
                    name: schema_name.to_string(),
                    schema,
                },
            }),
        };

        let response = self.send_request(request).await?;
        parse_llm_json(&response)
    }

    async fn send_request(&self, request: ChatCompletionRequest) -> Result<String> {
        debug!("Sending request to {}: model={}", self.api_url, request.model);

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to correction backend")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Correction API error ({}): {}", status, error_text);
        }

        let response: ChatCompletionResponse = response
            .json()
            .await
            .context("Failed to parse chat completion response")?;

        if let Some(usage) = &response.usage {
            info!(
                "Correction response: {} tokens (prompt: {}, completion: {})",
                usage.total_tokens, usage.prompt_tokens, usage.completion_tokens
            );
        }

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .context("Correction API returned no content")
    }
}

#[async_trait::async_trait]
impl CorrectionBackend for OpenRouterClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn correct(&self, prompt: &CorrectionPrompt) -> Result<BackendCorrection> {
        let messages = vec![Message::system(&prompt.system), Message::user(&prompt.user)];
        self.chat_json(messages, "ocr_correction", correction_schema())
            .await
    }

    async fn suggest(&self, prompt: &CorrectionPrompt) -> Result<Vec<Suggestion>> {
        #[derive(Deserialize)]
        struct SuggestionReply {
            #[serde(default)]
            suggestions: Vec<Suggestion>,
        }

        let messages = vec![Message::system(&prompt.system), Message::user(&prompt.user)];
        let reply: SuggestionReply = self
            .chat_json(messages, "text_suggestions", suggestion_schema())
            .await?;
        Ok(reply.suggestions)
    }
}

fn correction_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "corrected_text": {"type": "string"},
            "confidence": {"type": "number", "minimum": 0, "maximum": 100},
            "changes": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "original": {"type": "string"},
                        "corrected": {"type": "string"}
                    },
                    "required": ["original", "corrected"]
                }
            }
        },
        "required": ["corrected_text", "confidence", "changes"]
    })
}

fn suggestion_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "suggestions": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "original": {"type": "string"},
                        "suggestion": {"type": "string"},
                        "reason": {"type": "string"}
                    },
                    "required": ["original", "suggestion"]
                }
            }
        },
        "required": ["suggestions"]
    })
}

/// Parse a model reply as JSON, tolerating markdown code fences.
fn parse_llm_json<T: serde::de::DeserializeOwned>(response: &str) -> Result<T> {
    let json_str = if response.contains("```json") {
        response
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .unwrap_or(response)
            .trim()
    } else if response.contains("```") {
        response.split("```").nth(1).unwrap_or(response).trim()
    } else {
        response.trim()
    };

    serde_json::from_str(json_str).context(format!(
        "Malformed correction response: {}",
        &json_str.chars().take(200).collect::<String>()
    ))
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseFormat {
    JsonSchema { json_schema: JsonSchemaFormat },
}

#[derive(Debug, Serialize)]
struct JsonSchemaFormat {
    name: String,
    schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

// ============================================================================
// Message types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use slotforge_contracts::expansion::{expansion_instruction, ExpandedPrompts};
use slotforge_contracts::prompt::PromptError;

use super::PromptExpander;
use crate::config::GeminiConfig;
use crate::error::EngineError;
use crate::http::{build_client, response_json_or_error};

const EXPANDER_NAME: &str = "gemini";
const TEMPERATURE: f64 = 0.8;

/// Gemini `generateContent` client used for prompt expansion.
#[derive(Debug, Clone)]
pub struct GeminiExpander {
    client: Client,
    api_key: Option<String>,
    model: String,
    endpoint_base: String,
}

impl GeminiExpander {
    pub fn new(config: &GeminiConfig) -> Result<Self, EngineError> {
        Ok(Self {
            client: build_client(EXPANDER_NAME, config.timeout_secs)?,
            api_key: config
                .api_key
                .as_deref()
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(str::to_string),
            model: config.model.trim().to_string(),
            endpoint_base: config.endpoint_base.trim().trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self) -> String {
        let model = self.model.trim_start_matches("models/");
        format!("{}/models/{model}:generateContent", self.endpoint_base)
    }

    fn request_payload(theme: &str) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [{"text": expansion_instruction(theme)}],
            }],
            "generationConfig": {"temperature": TEMPERATURE},
        })
    }

    fn extract_text(payload: &Value) -> Option<&str> {
        payload
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|candidates| candidates.first())
            .and_then(|candidate| candidate.get("content"))
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .and_then(|parts| parts.first())
            .and_then(|part| part.get("text"))
            .and_then(Value::as_str)
    }
}

#[async_trait]
impl PromptExpander for GeminiExpander {
    fn name(&self) -> &str {
        EXPANDER_NAME
    }

    async fn expand(&self, theme: &str) -> Result<ExpandedPrompts, EngineError> {
        let theme = theme.trim();
        if theme.is_empty() {
            return Err(PromptError::EmptyPrompt.into());
        }
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(EngineError::Configuration(
                "gemini api_key is not set".to_string(),
            ));
        };

        log::info!("expanding theme with {}", self.model);
        let response = self
            .client
            .post(self.endpoint())
            .query(&[("key", api_key)])
            .json(&Self::request_payload(theme))
            .send()
            .await
            .map_err(|err| EngineError::transport(EXPANDER_NAME, err))?;
        let body = response_json_or_error(EXPANDER_NAME, response).await?;
        let text = Self::extract_text(&body).unwrap_or_default();
        ExpandedPrompts::from_model_text(text)
            .map_err(|err| EngineError::malformed(EXPANDER_NAME, err.to_string()))
    }
}

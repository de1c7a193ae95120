//! Google Gemini backend (`generateContent`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use super::{SYSTEM_PROMPT, attach_source, user_prompt};
use crate::stage::caption::CaptionArtifact;
use crate::stage::http::{
    CLIENT_USER_AGENT, build_client, endpoint, ensure_success, map_request_error, read_json,
};
use crate::stage::recipe::{Recipe, parse_model_output};
use crate::stage::{RecipeExtractor, StageError};

const SERVICE: &str = "gemini";

/// Public Gemini API endpoint.
pub const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

/// Extracts recipes with the hosted Gemini API.
#[derive(Clone)]
pub struct GeminiExtractor {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl std::fmt::Debug for GeminiExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiExtractor")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl GeminiExtractor {
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        request_timeout: Duration,
    ) -> reqwest::Result<Self> {
        Ok(Self {
            client: build_client(request_timeout, CLIENT_USER_AGENT)?,
            base_url: base_url.into(),
            model: model.into(),
            api_key: api_key.into(),
        })
    }

    fn model_url(&self, suffix: &str) -> String {
        endpoint(
            &self.base_url,
            &format!("/v1beta/models/{}{suffix}", self.model),
        )
    }
}

#[async_trait]
impl RecipeExtractor for GeminiExtractor {
    fn name(&self) -> &'static str {
        SERVICE
    }

    async fn check_ready(&self) -> Result<(), StageError> {
        let url = self.model_url("");
        let response = self
            .client
            .get(&url)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| map_request_error(&url, &e))?;
        ensure_success(&url, response)?;
        Ok(())
    }

    #[instrument(skip(self, caption), fields(model = %self.model))]
    async fn extract(&self, caption: &CaptionArtifact, source_url: &str) -> Result<Recipe, StageError> {
        let url = self.model_url(":generateContent");
        let request = json!({
            "systemInstruction": { "parts": [{ "text": SYSTEM_PROMPT }] },
            "contents": [{ "role": "user", "parts": [{ "text": user_prompt(caption) }] }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "temperature": 0
            }
        });

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| map_request_error(&url, &e))?;
        let response = ensure_success(&url, response)?;
        let reply: GenerateResponse = read_json(SERVICE, &url, response).await?;

        if let Some(reason) = reply
            .prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason.clone())
        {
            warn!(%reason, "prompt blocked by gemini");
            return Err(StageError::Rejected {
                service: SERVICE.to_string(),
                message: format!("prompt blocked: {reason}"),
            });
        }

        let text: String = reply
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect()
            })
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(StageError::Malformed {
                service: SERVICE.to_string(),
                message: "response has no candidate text".to_string(),
            });
        }

        let recipe = parse_model_output(&text, SERVICE)?;
        info!(title = %recipe.title, "recipe structured");
        Ok(attach_source(recipe, caption, source_url))
    }
}

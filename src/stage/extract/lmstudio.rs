//! LM Studio backend (OpenAI-compatible `/v1/chat/completions`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};

use super::{SYSTEM_PROMPT, attach_source, user_prompt};
use crate::stage::caption::CaptionArtifact;
use crate::stage::http::{
    CLIENT_USER_AGENT, build_client, endpoint, ensure_success, map_request_error, read_json,
};
use crate::stage::recipe::{Recipe, parse_model_output, recipe_json_schema};
use crate::stage::{RecipeExtractor, StageError};

const SERVICE: &str = "lmstudio";

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Extracts recipes with a model loaded in LM Studio's local server.
#[derive(Debug, Clone)]
pub struct LmStudioExtractor {
    client: Client,
    base_url: String,
    model: String,
}

impl LmStudioExtractor {
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        request_timeout: Duration,
    ) -> reqwest::Result<Self> {
        Ok(Self {
            client: build_client(request_timeout, CLIENT_USER_AGENT)?,
            base_url: base_url.into(),
            model: model.into(),
        })
    }
}

#[async_trait]
impl RecipeExtractor for LmStudioExtractor {
    fn name(&self) -> &'static str {
        SERVICE
    }

    async fn check_ready(&self) -> Result<(), StageError> {
        let url = endpoint(&self.base_url, "/v1/models");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| map_request_error(&url, &e))?;
        ensure_success(&url, response)?;
        Ok(())
    }

    #[instrument(skip(self, caption), fields(model = %self.model))]
    async fn extract(&self, caption: &CaptionArtifact, source_url: &str) -> Result<Recipe, StageError> {
        let url = endpoint(&self.base_url, "/v1/chat/completions");
        let request = json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": user_prompt(caption) }
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": { "name": "recipe", "schema": recipe_json_schema() }
            }
        });

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| map_request_error(&url, &e))?;
        let response = ensure_success(&url, response)?;
        let reply: CompletionResponse = read_json(SERVICE, &url, response).await?;

        let content = reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| StageError::Malformed {
                service: SERVICE.to_string(),
                message: "completion has no content".to_string(),
            })?;

        let recipe = parse_model_output(&content, SERVICE)?;
        info!(title = %recipe.title, "recipe structured");
        Ok(attach_source(recipe, caption, source_url))
    }
}

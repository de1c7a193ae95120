//! Local Ollama backend (`/api/chat`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument};

use super::{SYSTEM_PROMPT, attach_source, user_prompt};
use crate::stage::caption::CaptionArtifact;
use crate::stage::http::{
    CLIENT_USER_AGENT, build_client, endpoint, ensure_success, map_request_error, read_json,
};
use crate::stage::recipe::{Recipe, parse_model_output, recipe_json_schema};
use crate::stage::{RecipeExtractor, StageError};

const SERVICE: &str = "ollama";

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    format: Value,
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    content: String,
}

/// Extracts recipes with a model served by a local Ollama instance.
#[derive(Debug, Clone)]
pub struct OllamaExtractor {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaExtractor {
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
impl RecipeExtractor for OllamaExtractor {
    fn name(&self) -> &'static str {
        SERVICE
    }

    async fn check_ready(&self) -> Result<(), StageError> {
        let url = endpoint(&self.base_url, "/api/tags");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| map_request_error(&url, &e))?;
        ensure_success(&url, response)?;
        debug!(%url, "ollama reachable");
        Ok(())
    }

    #[instrument(skip(self, caption), fields(model = %self.model))]
    async fn extract(&self, caption: &CaptionArtifact, source_url: &str) -> Result<Recipe, StageError> {
        let url = endpoint(&self.base_url, "/api/chat");
        let user = user_prompt(caption);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &user,
                },
            ],
            format: recipe_json_schema(),
            stream: false,
            options: ChatOptions { temperature: 0.0 },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| map_request_error(&url, &e))?;
        let response = ensure_success(&url, response)?;
        let reply: ChatResponse = read_json(SERVICE, &url, response).await?;

        let recipe = parse_model_output(&reply.message.content, SERVICE)?;
        info!(title = %recipe.title, "recipe structured");
        Ok(attach_source(recipe, caption, source_url))
    }
}

//! Publish-stage executor for Telegraph pages.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, instrument};

use super::http::{
    CLIENT_USER_AGENT, build_client, endpoint, ensure_success, map_request_error, read_json,
};
use super::recipe::Recipe;
use super::{RecipePublisher, StageError};

const SERVICE: &str = "telegraph";

/// Public Telegraph API endpoint.
pub const DEFAULT_TELEGRAPH_URL: &str = "https://api.telegra.ph";

/// Default byline on published pages.
pub const DEFAULT_AUTHOR_NAME: &str = "Instagram Recipe Parser";

/// Telegraph rejects longer titles.
const MAX_TITLE_CHARS: usize = 256;

/// Output of the publish stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedPage {
    /// Public URL of the page.
    pub url: String,
    /// Page path as returned by the service.
    pub path: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    result: Option<PageResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PageResult {
    url: String,
    path: String,
}

/// Publishes recipes as Telegraph pages.
#[derive(Clone)]
pub struct TelegraphPublisher {
    client: Client,
    base_url: String,
    access_token: String,
    author_name: String,
}

impl std::fmt::Debug for TelegraphPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegraphPublisher")
            .field("base_url", &self.base_url)
            .field("author_name", &self.author_name)
            .finish_non_exhaustive()
    }
}

impl TelegraphPublisher {
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        access_token: impl Into<String>,
        author_name: impl Into<String>,
        request_timeout: Duration,
    ) -> reqwest::Result<Self> {
        Ok(Self {
            client: build_client(request_timeout, CLIENT_USER_AGENT)?,
            base_url: base_url.into(),
            access_token: access_token.into(),
            author_name: author_name.into(),
        })
    }
}

#[async_trait]
impl RecipePublisher for TelegraphPublisher {
    fn name(&self) -> &'static str {
        SERVICE
    }

    async fn check_ready(&self) -> Result<(), StageError> {
        if self.access_token.trim().is_empty() {
            return Err(StageError::Rejected {
                service: SERVICE.to_string(),
                message: "access token is empty".to_string(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self, recipe), fields(title = %recipe.title))]
    async fn publish(&self, recipe: &Recipe) -> Result<PublishedPage, StageError> {
        let url = endpoint(&self.base_url, "/createPage");
        let title: String = recipe.title.chars().take(MAX_TITLE_CHARS).collect();
        let request = json!({
            "access_token": self.access_token,
            "title": title,
            "author_name": self.author_name,
            "content": page_nodes(recipe),
            "return_content": false
        });

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| map_request_error(&url, &e))?;
        let response = ensure_success(&url, response)?;
        let reply: ApiResponse = read_json(SERVICE, &url, response).await?;

        match (reply.ok, reply.result) {
            (true, Some(page)) => {
                info!(url = %page.url, "page published");
                Ok(PublishedPage {
                    url: page.url,
                    path: page.path,
                })
            }
            (true, None) => Err(StageError::Malformed {
                service: SERVICE.to_string(),
                message: "ok response without result".to_string(),
            }),
            (false, _) => Err(api_error(reply.error.as_deref().unwrap_or("unknown error"))),
        }
    }
}

/// Maps a Telegraph error string; `FLOOD_WAIT_<secs>` is retryable.
fn api_error(code: &str) -> StageError {
    if let Some(seconds) = code
        .strip_prefix("FLOOD_WAIT_")
        .and_then(|s| s.parse::<u64>().ok())
    {
        return StageError::RateLimited {
            service: SERVICE.to_string(),
            retry_after: Some(Duration::from_secs(seconds)),
        };
    }
    StageError::Rejected {
        service: SERVICE.to_string(),
        message: code.to_string(),
    }
}

fn node(tag: &str, children: Vec<Value>) -> Value {
    json!({ "tag": tag, "children": children })
}

fn text(value: impl Into<String>) -> Value {
    Value::String(value.into())
}

fn labelled(label: &str, value: &str) -> Value {
    node(
        "li",
        vec![node("strong", vec![text(format!("{label}:"))]), text(format!(" {value}"))],
    )
}

/// Renders a recipe as Telegraph content nodes.
#[must_use]
pub fn page_nodes(recipe: &Recipe) -> Vec<Value> {
    let mut nodes = Vec::new();

    if let Some(thumbnail) = &recipe.thumbnail_url {
        nodes.push(json!({ "tag": "img", "attrs": { "src": thumbnail } }));
    }

    let meta: Vec<Value> = [
        ("Portionen", &recipe.servings),
        ("Vorbereitung", &recipe.prep_time),
        ("Kochzeit", &recipe.cook_time),
    ]
    .into_iter()
    .filter_map(|(label, value)| value.as_deref().map(|v| labelled(label, v)))
    .collect();
    if !meta.is_empty() {
        nodes.push(node("ul", meta));
    }

    for group in &recipe.ingredients {
        nodes.push(node(
            "h4",
            vec![text(group.group_title.as_deref().unwrap_or("Zutaten"))],
        ));
        let items = group
            .ingredients
            .iter()
            .map(|ingredient| {
                let line = match &ingredient.quantity {
                    Some(quantity) => format!("{quantity} {}", ingredient.name),
                    None => ingredient.name.clone(),
                };
                node("li", vec![text(line)])
            })
            .collect();
        nodes.push(node("ul", items));
    }

    if !recipe.steps.is_empty() {
        nodes.push(node("h4", vec![text("Zubereitung")]));
        nodes.push(node(
            "ol",
            recipe.steps.iter().map(|s| node("li", vec![text(s.as_str())])).collect(),
        ));
    }

    if !recipe.notes.is_empty() {
        nodes.push(node("h4", vec![text("Notizen")]));
        nodes.push(node(
            "ul",
            recipe.notes.iter().map(|n| node("li", vec![text(n.as_str())])).collect(),
        ));
    }

    if let Some(nutrition) = &recipe.nutrition {
        let values: Vec<Value> = [
            ("Kalorien", &nutrition.calories, "kcal"),
            ("Protein", &nutrition.protein, "g"),
            ("Kohlenhydrate", &nutrition.carbs, "g"),
            ("Fett", &nutrition.fat, "g"),
        ]
        .into_iter()
        .filter_map(|(label, value, unit)| {
            value.as_deref().map(|v| {
                let shown = if v.chars().any(char::is_alphabetic) {
                    v.to_string()
                } else {
                    format!("{v} {unit}")
                };
                labelled(label, &shown)
            })
        })
        .collect();
        if !values.is_empty() {
            nodes.push(node("h4", vec![text("Nährwerte (pro Portion)")]));
            nodes.push(node("ul", values));
        }
    }

    if let Some(source) = &recipe.source_url {
        nodes.push(node(
            "p",
            vec![json!({
                "tag": "a",
                "attrs": { "href": source },
                "children": ["Original-Post auf Instagram"]
            })],
        ));
    }

    nodes
}

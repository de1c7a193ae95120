//! Construction of the concrete stage executors from [`Settings`].

use std::env;
use std::sync::Arc;

use tracing::info;

use crate::config::{ConfigError, ExtractorKind, FetcherKind, PublisherKind, Settings};
use crate::stage::{
    CaptionFetcher, GeminiExtractor, HttpCaptionFetcher, InlineCaptionFetcher, LmStudioExtractor,
    OllamaExtractor, RecipeExtractor, RecipePublisher, StageExecutors, TelegraphPublisher,
};

/// Builds the executors selected in `settings`, reading secrets from the
/// process environment.
///
/// # Errors
///
/// Returns [`ConfigError::MissingSecret`] when a required API key or token
/// variable is unset or empty, and [`ConfigError::Client`] when an HTTP
/// client cannot be built.
pub fn build_executors(settings: &Settings) -> Result<StageExecutors, ConfigError> {
    build_executors_with(settings, |name| env::var(name).ok())
}

/// Like [`build_executors`] with an explicit secret lookup.
///
/// # Errors
///
/// See [`build_executors`].
pub fn build_executors_with(
    settings: &Settings,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<StageExecutors, ConfigError> {
    let secret = |var: &str, backend: &'static str| {
        lookup(var)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingSecret {
                var: var.to_string(),
                backend,
            })
    };
    let timeout = settings.request_timeout;

    let fetcher: Arc<dyn CaptionFetcher> = match settings.fetcher {
        FetcherKind::Inline => Arc::new(InlineCaptionFetcher),
        FetcherKind::Http => Arc::new(
            HttpCaptionFetcher::new(timeout).map_err(|source| ConfigError::Client {
                backend: "http",
                source,
            })?,
        ),
    };

    let extractor: Arc<dyn RecipeExtractor> = match settings.extractor {
        ExtractorKind::Ollama => Arc::new(
            OllamaExtractor::new(&settings.ollama.url, &settings.ollama.model, timeout).map_err(
                |source| ConfigError::Client {
                    backend: "ollama",
                    source,
                },
            )?,
        ),
        ExtractorKind::LmStudio => Arc::new(
            LmStudioExtractor::new(&settings.lmstudio.url, &settings.lmstudio.model, timeout)
                .map_err(|source| ConfigError::Client {
                    backend: "lmstudio",
                    source,
                })?,
        ),
        ExtractorKind::Gemini => {
            let api_key = secret(&settings.gemini.api_key_env, "gemini")?;
            Arc::new(
                GeminiExtractor::new(
                    &settings.gemini.url,
                    &settings.gemini.model,
                    api_key,
                    timeout,
                )
                .map_err(|source| ConfigError::Client {
                    backend: "gemini",
                    source,
                })?,
            )
        }
    };

    let publisher: Arc<dyn RecipePublisher> = match settings.publisher {
        PublisherKind::Telegraph => {
            let token = secret(&settings.telegraph.token_env, "telegraph")?;
            Arc::new(
                TelegraphPublisher::new(
                    &settings.telegraph.url,
                    token,
                    &settings.telegraph.author,
                    timeout,
                )
                .map_err(|source| ConfigError::Client {
                    backend: "telegraph",
                    source,
                })?,
            )
        }
    };

    info!(
        fetcher = fetcher.name(),
        extractor = extractor.name(),
        publisher = publisher.name(),
        "stage executors configured"
    );
    Ok(StageExecutors {
        fetcher,
        extractor,
        publisher,
    })
}

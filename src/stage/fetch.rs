//! Fetch-stage executors.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument};

use super::caption::{CaptionArtifact, caption_from_page};
use super::http::{BROWSER_USER_AGENT, build_client, ensure_success, map_request_error};
use super::{CaptionFetcher, SourceRef, StageError};

/// Uses the caption that came with the input collection.
///
/// Useful when captions were exported alongside the post list; no network
/// access is needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineCaptionFetcher;

#[async_trait]
impl CaptionFetcher for InlineCaptionFetcher {
    fn name(&self) -> &'static str {
        "inline"
    }

    async fn fetch(&self, source: &SourceRef) -> Result<CaptionArtifact, StageError> {
        match source.inline_caption.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => Ok(CaptionArtifact {
                text: text.to_string(),
                thumbnail_url: None,
            }),
            _ => Err(StageError::MissingCaption {
                url: source.url.clone(),
            }),
        }
    }
}

/// Downloads the public post page and reads its Open Graph caption.
#[derive(Debug, Clone)]
pub struct HttpCaptionFetcher {
    client: Client,
}

impl HttpCaptionFetcher {
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be built.
    pub fn new(request_timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            client: build_client(request_timeout, BROWSER_USER_AGENT)?,
        })
    }

    /// Reels expose the same caption under the `/p/` path with less script.
    fn page_url(url: &str) -> String {
        url.replacen("/reels/", "/p/", 1).replacen("/reel/", "/p/", 1)
    }
}

#[async_trait]
impl CaptionFetcher for HttpCaptionFetcher {
    fn name(&self) -> &'static str {
        "http"
    }

    #[instrument(skip(self, source), fields(id = %source.id))]
    async fn fetch(&self, source: &SourceRef) -> Result<CaptionArtifact, StageError> {
        let url = Self::page_url(&source.url);
        debug!(%url, "fetching post page");

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await
            .map_err(|e| map_request_error(&url, &e))?;
        let response = ensure_success(&url, response)?;
        let html = response
            .text()
            .await
            .map_err(|e| map_request_error(&url, &e))?;

        caption_from_page(&html).ok_or(StageError::MissingCaption {
            url: source.url.clone(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn source(caption: Option<&str>) -> SourceRef {
        SourceRef {
            id: "DAbc".to_string(),
            url: "https://www.instagram.com/reel/DAbc/".to_string(),
            inline_caption: caption.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_inline_fetcher_returns_caption() {
        let artifact = InlineCaptionFetcher
            .fetch(&source(Some(" Soup recipe ")))
            .await
            .unwrap();
        assert_eq!(artifact.text, "Soup recipe");
    }

    #[tokio::test]
    async fn test_inline_fetcher_without_caption_is_permanent() {
        let err = InlineCaptionFetcher.fetch(&source(None)).await.unwrap_err();
        assert!(matches!(err, StageError::MissingCaption { .. }));
        let err = InlineCaptionFetcher
            .fetch(&source(Some("   ")))
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::MissingCaption { .. }));
    }

    #[test]
    fn test_page_url_rewrites_reels() {
        assert_eq!(
            HttpCaptionFetcher::page_url("https://www.instagram.com/reel/DAbc/"),
            "https://www.instagram.com/p/DAbc/"
        );
        assert_eq!(
            HttpCaptionFetcher::page_url("https://www.instagram.com/p/DAbc/"),
            "https://www.instagram.com/p/DAbc/"
        );
    }
}

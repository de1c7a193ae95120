//! HTTP plumbing shared by the network-backed stage executors.

use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response};
use tracing::debug;

use super::StageError;

/// Browser-like user agent; post pages serve a stripped document otherwise.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// User agent for API backends.
pub const CLIENT_USER_AGENT: &str = concat!("recipe-pipeline/", env!("CARGO_PKG_VERSION"));

/// Connect timeout for every backend.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Builds a client with the given overall request timeout.
///
/// # Errors
///
/// Returns the reqwest builder error (TLS backend initialization).
pub fn build_client(request_timeout: Duration, user_agent: &str) -> reqwest::Result<Client> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(request_timeout)
        .user_agent(user_agent)
        .gzip(true)
        .build()
}

/// Maps a transport error to a stage error.
pub(crate) fn map_request_error(url: &str, error: &reqwest::Error) -> StageError {
    if error.is_timeout() {
        StageError::Timeout {
            url: url.to_string(),
        }
    } else if error.is_decode() {
        StageError::Malformed {
            service: url.to_string(),
            message: error.to_string(),
        }
    } else {
        StageError::Network {
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}

/// Passes successful responses through and turns the rest into `HttpStatus`.
pub(crate) fn ensure_success(url: &str, response: Response) -> Result<Response, StageError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    debug!(url, status = status.as_u16(), ?retry_after, "backend returned error status");
    Err(StageError::http_status(url, status.as_u16(), retry_after))
}

/// Decodes a JSON body, mapping failures to `Malformed`.
pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(
    service: &str,
    url: &str,
    response: Response,
) -> Result<T, StageError> {
    let body = response
        .text()
        .await
        .map_err(|e| map_request_error(url, &e))?;
    serde_json::from_str(&body).map_err(|e| StageError::Malformed {
        service: service.to_string(),
        message: e.to_string(),
    })
}

/// Joins a base URL and a path without doubling slashes.
pub(crate) fn endpoint(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_cleanly() {
        assert_eq!(
            endpoint("http://localhost:11434/", "/api/chat"),
            "http://localhost:11434/api/chat"
        );
        assert_eq!(
            endpoint("https://api.telegra.ph", "createPage"),
            "https://api.telegra.ph/createPage"
        );
    }
}

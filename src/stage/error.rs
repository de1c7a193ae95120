//! Stage executor errors and their retry classification.

use std::time::Duration;

use thiserror::Error;
use tracing::instrument;

use crate::record::ErrorKind;
use crate::throttle::parse_retry_after;

/// Errors returned by stage executors.
#[derive(Debug, Clone, Error)]
pub enum StageError {
    /// The request did not complete in time.
    #[error("request to {url} timed out")]
    Timeout {
        /// Endpoint that timed out
        url: String,
    },

    /// Connection-level failure.
    #[error("network error for {url}: {message}")]
    Network {
        /// Endpoint being contacted
        url: String,
        /// Transport message
        message: String,
    },

    /// Non-success HTTP status.
    #[error("HTTP {status} from {url}")]
    HttpStatus {
        /// Endpoint that answered
        url: String,
        /// Status code
        status: u16,
        /// Raw `Retry-After` header, when present
        retry_after: Option<String>,
    },

    /// The service asked us to slow down without an HTTP 429.
    #[error("{service} rate limited the request")]
    RateLimited {
        /// Backend name
        service: String,
        /// Delay the service asked for
        retry_after: Option<Duration>,
    },

    /// The service is temporarily not serving requests.
    #[error("{service} is unavailable: {message}")]
    Unavailable {
        /// Backend name
        service: String,
        /// Details
        message: String,
    },

    /// The post has no caption to work with.
    #[error("no caption found for {url}")]
    MissingCaption {
        /// Post URL
        url: String,
    },

    /// The response could not be decoded.
    #[error("malformed response from {service}: {message}")]
    Malformed {
        /// Backend name
        service: String,
        /// Decoder message
        message: String,
    },

    /// The decoded recipe is missing required fields.
    #[error("recipe failed validation: {0}")]
    Schema(String),

    /// The service refused the request for a reason retrying will not fix.
    #[error("{service} rejected the request: {message}")]
    Rejected {
        /// Backend name
        service: String,
        /// Reason given
        message: String,
    },
}

impl StageError {
    /// Builds an `HttpStatus` error.
    #[must_use]
    pub fn http_status(url: impl Into<String>, status: u16, retry_after: Option<String>) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Coarse kind stored on the record.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Network { .. } => ErrorKind::Network,
            Self::HttpStatus { status, .. } => match status {
                401 | 403 | 407 => ErrorKind::Auth,
                404 | 410 => ErrorKind::NotFound,
                408 => ErrorKind::Timeout,
                429 => ErrorKind::RateLimited,
                500..=599 => ErrorKind::ServerError,
                _ => ErrorKind::Rejected,
            },
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Unavailable { .. } => ErrorKind::Unavailable,
            Self::MissingCaption { .. } => ErrorKind::MissingCaption,
            Self::Malformed { .. } => ErrorKind::Malformed,
            Self::Schema(_) => ErrorKind::Schema,
            Self::Rejected { .. } => ErrorKind::Rejected,
        }
    }

    /// Server-mandated delay before the next attempt, if the backend gave one.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::HttpStatus {
                retry_after: Some(raw),
                ..
            } => parse_retry_after(raw),
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Classification of stage failures for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    Transient,
    /// Failure that will not succeed regardless of retries.
    Permanent,
    /// Credentials are missing or were refused; treated as permanent.
    NeedsAuth,
    /// Backend rate limiting; retried with backoff or the server's delay.
    RateLimited,
}

impl FailureType {
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::RateLimited)
    }
}

/// Classifies a stage error into a failure type.
///
/// | Error | Type |
/// |-------|------|
/// | Timeout, Network, Unavailable | Transient |
/// | HTTP 408, 5xx | Transient |
/// | HTTP 429, `RateLimited` | RateLimited |
/// | HTTP 401, 403, 407 | NeedsAuth |
/// | other HTTP 4xx | Permanent |
/// | MissingCaption, Malformed, Schema, Rejected | Permanent |
#[instrument(level = "debug")]
pub fn classify_error(error: &StageError) -> FailureType {
    match error {
        StageError::Timeout { .. } | StageError::Network { .. } | StageError::Unavailable { .. } => {
            FailureType::Transient
        }
        StageError::HttpStatus { status, .. } => classify_http_status(*status),
        StageError::RateLimited { .. } => FailureType::RateLimited,
        StageError::MissingCaption { .. }
        | StageError::Malformed { .. }
        | StageError::Schema(_)
        | StageError::Rejected { .. } => FailureType::Permanent,
    }
}

#[allow(clippy::match_same_arms)]
fn classify_http_status(status: u16) -> FailureType {
    match status {
        401 | 403 | 407 => FailureType::NeedsAuth,
        408 => FailureType::Transient,
        429 => FailureType::RateLimited,
        400..=499 => FailureType::Permanent,
        500..=599 => FailureType::Transient,
        // Redirect loops or informational codes reaching us are not worth retrying
        _ => FailureType::Permanent,
    }
}

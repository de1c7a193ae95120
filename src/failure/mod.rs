//! Failure classification and user-facing descriptors for failed records.

use recipe_pipeline_core::record::{ErrorKind, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FailureCategory {
    Credentials,
    Source,
    Model,
    Network,
    Other,
}

impl FailureCategory {
    #[must_use]
    pub fn icon(self) -> &'static str {
        match self {
            Self::Credentials => "🔐",
            Self::Source => "❌",
            Self::Model => "🤖",
            Self::Network => "🌐",
            Self::Other => "⚠️",
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Credentials => "Credentials",
            Self::Source => "Source post",
            Self::Model => "Recipe extraction",
            Self::Network => "Network",
            Self::Other => "Other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureDescriptor {
    pub category: FailureCategory,
    pub what: &'static str,
    pub why: &'static str,
    pub fix: &'static str,
}

/// Maps a stored failure to a descriptor.
///
/// The stage matters for a few kinds: a 404 while fetching means the post is
/// gone, while the same status from a model server means a wrong model name.
#[must_use]
pub fn describe_failure(stage: Stage, kind: ErrorKind) -> FailureDescriptor {
    match (stage, kind) {
        (_, ErrorKind::Auth) => FailureDescriptor {
            category: FailureCategory::Credentials,
            what: "Credentials rejected",
            why: "The backend refused the API key or access token.",
            fix: "Check GOOGLE_API_KEY / TELEGRAPH_ACCESS_TOKEN, then run with --reset-failed.",
        },
        (Stage::Fetch, ErrorKind::NotFound) => FailureDescriptor {
            category: FailureCategory::Source,
            what: "Post not found",
            why: "The post page returned 404; it was deleted or made private.",
            fix: "Remove the post from the input or provide its caption inline.",
        },
        (_, ErrorKind::NotFound) => FailureDescriptor {
            category: FailureCategory::Model,
            what: "Model or endpoint not found",
            why: "The backend answered 404 for the configured model or URL.",
            fix: "Check the model name and server URL in the config file.",
        },
        (_, ErrorKind::MissingCaption) => FailureDescriptor {
            category: FailureCategory::Source,
            what: "No caption",
            why: "The post has no caption text to extract a recipe from.",
            fix: "Provide the caption inline in the input file, or drop the post.",
        },
        (_, ErrorKind::Malformed | ErrorKind::Schema) => FailureDescriptor {
            category: FailureCategory::Model,
            what: "Model output unusable",
            why: "The model reply was not a recipe matching the expected JSON shape.",
            fix: "Try a larger model or another extractor, then run with --reset-failed.",
        },
        (_, ErrorKind::Rejected) => FailureDescriptor {
            category: FailureCategory::Other,
            what: "Request rejected",
            why: "The backend refused the request content.",
            fix: "Inspect the failure log message for the backend's reason.",
        },
        (_, ErrorKind::RateLimited) => FailureDescriptor {
            category: FailureCategory::Network,
            what: "Rate limited",
            why: "The backend kept throttling requests past the retry limit.",
            fix: "Raise --max-retries or the fetch delay, then run with --reset-failed.",
        },
        (_, ErrorKind::Timeout | ErrorKind::Network) => FailureDescriptor {
            category: FailureCategory::Network,
            what: "Network request failed",
            why: "Connectivity, DNS, TLS or a stopped local model server interrupted the request.",
            fix: "Check that the backend is reachable, then run with --reset-failed.",
        },
        (_, ErrorKind::ServerError | ErrorKind::Unavailable) => FailureDescriptor {
            category: FailureCategory::Network,
            what: "Backend unavailable",
            why: "The backend kept answering with server errors.",
            fix: "Wait for the service to recover, then run with --reset-failed.",
        },
    }
}

/// Returns a generic descriptor for a category (used in summary grouping).
#[must_use]
pub fn category_failure_descriptor(category: FailureCategory) -> FailureDescriptor {
    match category {
        FailureCategory::Credentials => FailureDescriptor {
            category,
            what: "Credential issue",
            why: "A backend refused the configured key or token.",
            fix: "Check the secret environment variables, then run with --reset-failed.",
        },
        FailureCategory::Source => FailureDescriptor {
            category,
            what: "Source post issue",
            why: "The post is gone or has no caption to work from.",
            fix: "Fix or remove these posts in the input file.",
        },
        FailureCategory::Model => FailureDescriptor {
            category,
            what: "Extraction issue",
            why: "The model could not produce a valid recipe.",
            fix: "Check the model configuration or switch extractor, then run with --reset-failed.",
        },
        FailureCategory::Network => FailureDescriptor {
            category,
            what: "Network issue",
            why: "Connectivity or backend availability problems outlasted the retries.",
            fix: "Check the backends are reachable, then run with --reset-failed.",
        },
        FailureCategory::Other => FailureDescriptor {
            category,
            what: "Unhandled issue",
            why: "The failure did not match a specific known category.",
            fix: "Inspect the failure log for details.",
        },
    }
}

//! File configuration and resolved run settings.
//!
//! The configuration file uses `key = value` lines. Strings are
//! double-quoted, integers are bare, `#` starts a comment outside strings.
//! Unknown keys are rejected so typos do not silently fall back to defaults.
//!
//! ```text
//! extractor = "ollama"          # ollama | lmstudio | gemini
//! ollama_model = "llama3"
//! input = "saved_collections.json"
//! collection = "Food"
//! concurrency = 4
//! ```
//!
//! [`FileConfig`] holds what the file (plus command-line overrides) said;
//! [`Settings::resolve`] fills defaults and validates the combination.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::retry::{DEFAULT_MAX_RETRIES, RetryPolicy};

/// Default number of records worked on at once.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default cap on concurrent extract calls; local models serve one at a time.
pub const DEFAULT_EXTRACT_CONCURRENCY: usize = 1;

/// Default cap on concurrent publish calls.
pub const DEFAULT_PUBLISH_CONCURRENCY: usize = 2;

/// Default minimum spacing between post page fetches.
pub const DEFAULT_FETCH_DELAY: Duration = Duration::from_secs(5);

/// Default random extra spacing between post page fetches.
pub const DEFAULT_FETCH_JITTER: Duration = Duration::from_secs(5);

pub const DEFAULT_CHECKPOINT_PATH: &str = "output/processing_progress.json";
pub const DEFAULT_OUTPUT_PATH: &str = "output/recipes.json";
pub const DEFAULT_FAILURE_LOG_PATH: &str = "output/failed.json";

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
const DEFAULT_MAX_DELAY_MS: u64 = 32_000;
const DEFAULT_RETRY_JITTER_MS: u64 = 500;
const DEFAULT_MAX_SERVER_DELAY_MS: u64 = 3_600_000;
const BACKOFF_MULTIPLIER: f32 = 2.0;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3";
pub const DEFAULT_LMSTUDIO_URL: &str = "http://localhost:1234";
pub const DEFAULT_LMSTUDIO_MODEL: &str = "local-model";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_GEMINI_KEY_ENV: &str = "GOOGLE_API_KEY";
pub const DEFAULT_TELEGRAPH_TOKEN_ENV: &str = "TELEGRAPH_ACCESS_TOKEN";

/// Configuration errors. All of them stop the run before any record is
/// processed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config syntax on line {line}: expected key = value")]
    Syntax { line: usize },

    #[error("invalid `{key}` value on line {line}: {reason}")]
    InvalidValue {
        key: String,
        line: usize,
        reason: String,
    },

    #[error("unknown configuration key: '{key}' on line {line}")]
    UnknownKey { key: String, line: usize },

    #[error("invalid config value for `{key}`: {value}. Expected range: {expected}")]
    OutOfRange {
        key: &'static str,
        value: u64,
        expected: &'static str,
    },

    #[error("no {role} backend configured\n  Suggestion: Set `{role} = \"...\"` in the config file or pass --{role}")]
    MissingBackend { role: &'static str },

    #[error("unknown {role} backend '{value}'\n  Suggestion: Use one of: {expected}")]
    UnknownBackend {
        role: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("environment variable {var} is not set (required by the {backend} backend)\n  Suggestion: Export {var} before running")]
    MissingSecret { var: String, backend: &'static str },

    #[error("no input collection given\n  Suggestion: Set `input = \"...\"` in the config file or pass --input")]
    MissingInput,

    #[error("failed to build HTTP client for {backend}: {source}")]
    Client {
        backend: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

/// Values read from a configuration file. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    pub fetcher: Option<String>,
    pub extractor: Option<String>,
    pub publisher: Option<String>,

    pub input: Option<PathBuf>,
    pub collection: Option<String>,
    pub checkpoint: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub failure_log: Option<PathBuf>,

    pub concurrency: Option<u64>,
    pub extract_concurrency: Option<u64>,
    pub publish_concurrency: Option<u64>,

    pub max_retries: Option<u64>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub jitter_ms: Option<u64>,
    pub max_server_delay_ms: Option<u64>,

    pub fetch_delay_ms: Option<u64>,
    pub fetch_jitter_ms: Option<u64>,
    pub request_timeout_secs: Option<u64>,

    pub ollama_url: Option<String>,
    pub ollama_model: Option<String>,
    pub lmstudio_url: Option<String>,
    pub lmstudio_model: Option<String>,
    pub gemini_url: Option<String>,
    pub gemini_model: Option<String>,
    pub gemini_api_key_env: Option<String>,
    pub telegraph_url: Option<String>,
    pub telegraph_token_env: Option<String>,
    pub telegraph_author: Option<String>,
}

impl FileConfig {
    /// Reads and parses a config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or any parse/validation error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "parsing config file");
        Self::parse(&raw)
    }

    /// Parses config text.
    ///
    /// # Errors
    ///
    /// Returns the first syntax, value, or range error.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        for (index, raw_line) in raw.lines().enumerate() {
            let line_no = index + 1;
            let line = strip_inline_comment(raw_line).trim();
            if line.is_empty() {
                continue;
            }
            let Some((raw_key, raw_value)) = line.split_once('=') else {
                return Err(ConfigError::Syntax { line: line_no });
            };
            cfg.assign(raw_key.trim(), raw_value.trim(), line_no)?;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    fn assign(&mut self, key: &str, value: &str, line: usize) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidValue {
            key: key.to_string(),
            line,
            reason: reason.to_string(),
        };
        let string = || parse_string_literal(value).map_err(invalid);
        let integer = || parse_integer_u64(value).map_err(invalid);

        match key {
            "fetcher" => self.fetcher = Some(string()?),
            "extractor" => self.extractor = Some(string()?),
            "publisher" => self.publisher = Some(string()?),
            "input" => self.input = Some(PathBuf::from(string()?)),
            "collection" => self.collection = Some(string()?),
            "checkpoint" => self.checkpoint = Some(PathBuf::from(string()?)),
            "output" => self.output = Some(PathBuf::from(string()?)),
            "failure_log" => self.failure_log = Some(PathBuf::from(string()?)),
            "concurrency" => self.concurrency = Some(integer()?),
            "extract_concurrency" => self.extract_concurrency = Some(integer()?),
            "publish_concurrency" => self.publish_concurrency = Some(integer()?),
            "max_retries" => self.max_retries = Some(integer()?),
            "base_delay_ms" => self.base_delay_ms = Some(integer()?),
            "max_delay_ms" => self.max_delay_ms = Some(integer()?),
            "jitter_ms" => self.jitter_ms = Some(integer()?),
            "max_server_delay_ms" => self.max_server_delay_ms = Some(integer()?),
            "fetch_delay_ms" => self.fetch_delay_ms = Some(integer()?),
            "fetch_jitter_ms" => self.fetch_jitter_ms = Some(integer()?),
            "request_timeout_secs" => self.request_timeout_secs = Some(integer()?),
            "ollama_url" => self.ollama_url = Some(string()?),
            "ollama_model" => self.ollama_model = Some(string()?),
            "lmstudio_url" => self.lmstudio_url = Some(string()?),
            "lmstudio_model" => self.lmstudio_model = Some(string()?),
            "gemini_url" => self.gemini_url = Some(string()?),
            "gemini_model" => self.gemini_model = Some(string()?),
            "gemini_api_key_env" => self.gemini_api_key_env = Some(string()?),
            "telegraph_url" => self.telegraph_url = Some(string()?),
            "telegraph_token_env" => self.telegraph_token_env = Some(string()?),
            "telegraph_author" => self.telegraph_author = Some(string()?),
            unknown => {
                return Err(ConfigError::UnknownKey {
                    key: unknown.to_string(),
                    line,
                });
            }
        }
        Ok(())
    }

    /// Validates numeric ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] for the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("concurrency", self.concurrency, 1, 100, "1..=100")?;
        check_range("extract_concurrency", self.extract_concurrency, 1, 100, "1..=100")?;
        check_range("publish_concurrency", self.publish_concurrency, 1, 100, "1..=100")?;
        check_range("max_retries", self.max_retries, 1, 10, "1..=10")?;
        check_range("base_delay_ms", self.base_delay_ms, 0, 600_000, "0..=600000")?;
        check_range("max_delay_ms", self.max_delay_ms, 0, 3_600_000, "0..=3600000")?;
        check_range("jitter_ms", self.jitter_ms, 0, 60_000, "0..=60000")?;
        check_range(
            "max_server_delay_ms",
            self.max_server_delay_ms,
            0,
            3_600_000,
            "0..=3600000",
        )?;
        check_range("fetch_delay_ms", self.fetch_delay_ms, 0, 600_000, "0..=600000")?;
        check_range("fetch_jitter_ms", self.fetch_jitter_ms, 0, 600_000, "0..=600000")?;
        check_range("request_timeout_secs", self.request_timeout_secs, 1, 3600, "1..=3600")?;
        Ok(())
    }
}

fn check_range(
    key: &'static str,
    value: Option<u64>,
    min: u64,
    max: u64,
    expected: &'static str,
) -> Result<(), ConfigError> {
    match value {
        Some(value) if !(min..=max).contains(&value) => Err(ConfigError::OutOfRange {
            key,
            value,
            expected,
        }),
        _ => Ok(()),
    }
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String, &'static str> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        return Err("expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u64(raw_value: &str) -> Result<u64, &'static str> {
    let token = raw_value.trim();
    if token.is_empty() {
        return Err("expected integer value");
    }
    let value = token.parse::<i128>().map_err(|_| "expected integer value")?;
    if value < 0 {
        return Err("expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| "integer value out of range for u64")
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/recipe-pipeline/config.toml`
/// 2. `$HOME/.config/recipe-pipeline/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("recipe-pipeline")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("recipe-pipeline")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Fetch backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetcherKind {
    Http,
    Inline,
}

/// Extract backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractorKind {
    Ollama,
    LmStudio,
    Gemini,
}

/// Publish backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherKind {
    Telegraph,
}

impl FetcherKind {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value {
            "http" => Ok(Self::Http),
            "inline" => Ok(Self::Inline),
            other => Err(ConfigError::UnknownBackend {
                role: "fetcher",
                value: other.to_string(),
                expected: "http, inline",
            }),
        }
    }
}

impl ExtractorKind {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value {
            "ollama" => Ok(Self::Ollama),
            "lmstudio" => Ok(Self::LmStudio),
            "gemini" => Ok(Self::Gemini),
            other => Err(ConfigError::UnknownBackend {
                role: "extractor",
                value: other.to_string(),
                expected: "ollama, lmstudio, gemini",
            }),
        }
    }
}

impl PublisherKind {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value {
            "telegraph" => Ok(Self::Telegraph),
            other => Err(ConfigError::UnknownBackend {
                role: "publisher",
                value: other.to_string(),
                expected: "telegraph",
            }),
        }
    }
}

/// Endpoint and model of one language-model backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelEndpoint {
    pub url: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiSettings {
    pub url: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegraphSettings {
    pub url: String,
    /// Name of the environment variable holding the access token.
    pub token_env: String,
    pub author: String,
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub fetcher: FetcherKind,
    pub extractor: ExtractorKind,
    pub publisher: PublisherKind,

    pub input: Option<PathBuf>,
    pub collection: Option<String>,
    pub checkpoint: PathBuf,
    pub output: PathBuf,
    pub failure_log: PathBuf,

    pub concurrency: usize,
    pub extract_concurrency: usize,
    pub publish_concurrency: usize,

    pub retry: RetryPolicy,
    pub fetch_delay: Duration,
    pub fetch_jitter: Duration,
    pub request_timeout: Duration,

    pub ollama: ModelEndpoint,
    pub lmstudio: ModelEndpoint,
    pub gemini: GeminiSettings,
    pub telegraph: TelegraphSettings,
}

impl Settings {
    /// Applies defaults to a file configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingBackend`] when no extractor is selected,
    /// [`ConfigError::UnknownBackend`] for unsupported names, and range
    /// errors from [`FileConfig::validate`].
    pub fn resolve(file: &FileConfig) -> Result<Self, ConfigError> {
        file.validate()?;

        let extractor = file
            .extractor
            .as_deref()
            .ok_or(ConfigError::MissingBackend { role: "extractor" })
            .and_then(ExtractorKind::parse)?;
        let fetcher = FetcherKind::parse(file.fetcher.as_deref().unwrap_or("http"))?;
        let publisher = PublisherKind::parse(file.publisher.as_deref().unwrap_or("telegraph"))?;

        let retry = RetryPolicy::new(
            to_u32(file.max_retries).unwrap_or(DEFAULT_MAX_RETRIES),
            millis(file.base_delay_ms, DEFAULT_BASE_DELAY_MS),
            millis(file.max_delay_ms, DEFAULT_MAX_DELAY_MS),
            BACKOFF_MULTIPLIER,
        )
        .with_jitter(millis(file.jitter_ms, DEFAULT_RETRY_JITTER_MS))
        .with_max_server_delay(millis(
            file.max_server_delay_ms,
            DEFAULT_MAX_SERVER_DELAY_MS,
        ));

        Ok(Self {
            fetcher,
            extractor,
            publisher,
            input: file.input.clone(),
            collection: file.collection.clone(),
            checkpoint: path_or(file.checkpoint.as_ref(), DEFAULT_CHECKPOINT_PATH),
            output: path_or(file.output.as_ref(), DEFAULT_OUTPUT_PATH),
            failure_log: path_or(file.failure_log.as_ref(), DEFAULT_FAILURE_LOG_PATH),
            concurrency: to_usize(file.concurrency).unwrap_or(DEFAULT_CONCURRENCY),
            extract_concurrency: to_usize(file.extract_concurrency)
                .unwrap_or(DEFAULT_EXTRACT_CONCURRENCY),
            publish_concurrency: to_usize(file.publish_concurrency)
                .unwrap_or(DEFAULT_PUBLISH_CONCURRENCY),
            retry,
            fetch_delay: file
                .fetch_delay_ms
                .map_or(DEFAULT_FETCH_DELAY, Duration::from_millis),
            fetch_jitter: file
                .fetch_jitter_ms
                .map_or(DEFAULT_FETCH_JITTER, Duration::from_millis),
            request_timeout: Duration::from_secs(
                file.request_timeout_secs.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
            ollama: ModelEndpoint {
                url: string_or(file.ollama_url.as_ref(), DEFAULT_OLLAMA_URL),
                model: string_or(file.ollama_model.as_ref(), DEFAULT_OLLAMA_MODEL),
            },
            lmstudio: ModelEndpoint {
                url: string_or(file.lmstudio_url.as_ref(), DEFAULT_LMSTUDIO_URL),
                model: string_or(file.lmstudio_model.as_ref(), DEFAULT_LMSTUDIO_MODEL),
            },
            gemini: GeminiSettings {
                url: string_or(file.gemini_url.as_ref(), crate::stage::extract::DEFAULT_GEMINI_URL),
                model: string_or(file.gemini_model.as_ref(), DEFAULT_GEMINI_MODEL),
                api_key_env: string_or(file.gemini_api_key_env.as_ref(), DEFAULT_GEMINI_KEY_ENV),
            },
            telegraph: TelegraphSettings {
                url: string_or(file.telegraph_url.as_ref(), crate::stage::DEFAULT_TELEGRAPH_URL),
                token_env: string_or(
                    file.telegraph_token_env.as_ref(),
                    DEFAULT_TELEGRAPH_TOKEN_ENV,
                ),
                author: string_or(file.telegraph_author.as_ref(), crate::stage::DEFAULT_AUTHOR_NAME),
            },
        })
    }

    /// The input path, required for a processing run.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingInput`] when none was configured.
    pub fn require_input(&self) -> Result<&Path, ConfigError> {
        self.input.as_deref().ok_or(ConfigError::MissingInput)
    }
}

fn millis(value: Option<u64>, default_ms: u64) -> Duration {
    Duration::from_millis(value.unwrap_or(default_ms))
}

fn to_u32(value: Option<u64>) -> Option<u32> {
    value.and_then(|v| u32::try_from(v).ok())
}

fn to_usize(value: Option<u64>) -> Option<usize> {
    value.and_then(|v| usize::try_from(v).ok())
}

fn path_or(value: Option<&PathBuf>, default: &str) -> PathBuf {
    value.cloned().unwrap_or_else(|| PathBuf::from(default))
}

fn string_or(value: Option<&String>, default: &str) -> String {
    value.cloned().unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== Parsing Tests ====================

    #[test]
    fn test_parse_config_partial_fields() {
        let cfg = FileConfig::parse(
            r#"
extractor = "ollama"
concurrency = 8
"#,
        )
        .unwrap();
        assert_eq!(cfg.extractor.as_deref(), Some("ollama"));
        assert_eq!(cfg.concurrency, Some(8));
        assert!(cfg.input.is_none());
    }

    #[test]
    fn test_parse_config_supports_inline_comments() {
        let cfg = FileConfig::parse(
            r#"
collection = "Food # and drinks" # saved collection name
max_retries = 5 # per stage
"#,
        )
        .unwrap();
        assert_eq!(cfg.collection.as_deref(), Some("Food # and drinks"));
        assert_eq!(cfg.max_retries, Some(5));
    }

    #[test]
    fn test_parse_config_rejects_unknown_keys() {
        let err = FileConfig::parse("unknown_key = 123").unwrap_err();
        assert!(err.to_string().contains("unknown configuration key"));
        assert!(err.to_string().contains("unknown_key"));
    }

    #[test]
    fn test_parse_config_rejects_missing_equals() {
        let err = FileConfig::parse("\n\nconcurrency 4").unwrap_err();
        assert!(matches!(err, ConfigError::Syntax { line: 3 }));
    }

    #[test]
    fn test_parse_config_rejects_unquoted_string() {
        let err = FileConfig::parse("extractor = ollama").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, line: 1, .. } if key == "extractor"));
    }

    #[test]
    fn test_parse_config_rejects_trailing_tokens() {
        let err = FileConfig::parse("concurrency = 4 trailing").unwrap_err();
        assert!(err.to_string().contains("concurrency"));
    }

    #[test]
    fn test_parse_config_rejects_out_of_range() {
        for raw in ["concurrency = 0", "concurrency = 101", "max_retries = 11", "request_timeout_secs = 0"] {
            let err = FileConfig::parse(raw).unwrap_err();
            assert!(matches!(err, ConfigError::OutOfRange { .. }), "{raw}: {err}");
        }
    }

    // ==================== Resolution Tests ====================

    #[test]
    fn test_resolve_requires_extractor() {
        let err = Settings::resolve(&FileConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingBackend { role: "extractor" }));
        assert!(err.to_string().contains("Suggestion"));
    }

    #[test]
    fn test_resolve_rejects_unknown_backend() {
        let cfg = FileConfig {
            extractor: Some("gpt".to_string()),
            ..FileConfig::default()
        };
        assert!(matches!(
            Settings::resolve(&cfg),
            Err(ConfigError::UnknownBackend { role: "extractor", .. })
        ));
    }

    #[test]
    fn test_resolve_defaults() {
        let cfg = FileConfig::parse(r#"extractor = "gemini""#).unwrap();
        let settings = Settings::resolve(&cfg).unwrap();

        assert_eq!(settings.extractor, ExtractorKind::Gemini);
        assert_eq!(settings.fetcher, FetcherKind::Http);
        assert_eq!(settings.publisher, PublisherKind::Telegraph);
        assert_eq!(settings.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(settings.extract_concurrency, 1);
        assert_eq!(settings.publish_concurrency, 2);
        assert_eq!(settings.retry.max_retries(), DEFAULT_MAX_RETRIES);
        assert_eq!(settings.checkpoint, PathBuf::from(DEFAULT_CHECKPOINT_PATH));
        assert_eq!(settings.fetch_delay, DEFAULT_FETCH_DELAY);
        assert_eq!(settings.gemini.api_key_env, "GOOGLE_API_KEY");
        assert_eq!(settings.telegraph.token_env, "TELEGRAPH_ACCESS_TOKEN");
        assert!(matches!(settings.require_input(), Err(ConfigError::MissingInput)));
    }

    #[test]
    fn test_resolve_overrides() {
        let cfg = FileConfig::parse(
            r#"
extractor = "lmstudio"
fetcher = "inline"
lmstudio_model = "qwen"
input = "posts.json"
max_retries = 5
fetch_delay_ms = 0
"#,
        )
        .unwrap();
        let settings = Settings::resolve(&cfg).unwrap();

        assert_eq!(settings.fetcher, FetcherKind::Inline);
        assert_eq!(settings.lmstudio.model, "qwen");
        assert_eq!(settings.lmstudio.url, DEFAULT_LMSTUDIO_URL);
        assert_eq!(settings.retry.max_retries(), 5);
        assert_eq!(settings.fetch_delay, Duration::ZERO);
        assert_eq!(settings.require_input().unwrap(), Path::new("posts.json"));
    }

    #[test]
    fn test_resolve_bounds_server_retry_delay() {
        use crate::record::ErrorKind;
        use crate::retry::RetryDecision;
        use crate::stage::{FailureInfo, StageOutcome};

        let cfg = FileConfig::parse(
            "extractor = \"ollama\"\nmax_server_delay_ms = 90000\n",
        )
        .unwrap();
        let settings = Settings::resolve(&cfg).unwrap();
        let outcome = StageOutcome::TransientFailure(
            FailureInfo::new(ErrorKind::RateLimited, "429")
                .with_retry_after(Duration::from_secs(600)),
        );

        assert_eq!(
            settings.retry.decide(1, &outcome),
            RetryDecision::RetryAfter {
                delay: Duration::from_secs(90)
            }
        );
        assert!(FileConfig::parse("max_server_delay_ms = 3600001").is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = FileConfig::load(Path::new("/no/such/config.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}

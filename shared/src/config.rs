//! Configuration management for Lambda functions.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::{Error, Result};

/// Default Gemini model used for chat.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-preview-05-20";

/// Default Gemini REST base URL.
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Apology returned when every upstream attempt fails.
pub const DEFAULT_FALLBACK_MESSAGE: &str =
    "Sorry, I couldn't reach the nutrition assistant right now. Please try again in a moment.";

/// Where the Gemini API key comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiKeySource {
    /// Key supplied directly in the environment.
    Inline(String),
    /// ARN of a Secrets Manager secret holding the key.
    Secret(String),
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Gemini API key location
    pub api_key: ApiKeySource,
    /// Gemini model name
    pub model: String,
    /// Gemini REST base URL (overridable for tests and proxies)
    pub api_base: String,
    /// Per-attempt request timeout
    pub request_timeout: Duration,
    /// Retry/backoff policy for upstream calls
    pub retry: RetryPolicy,
    /// Text returned to the caller when retries are exhausted
    pub fallback_message: String,
    /// AWS region
    pub aws_region: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = match (var("GEMINI_API_KEY"), var("GEMINI_API_KEY_SECRET_ARN")) {
            (Some(key), _) => ApiKeySource::Inline(key),
            (None, Some(arn)) => ApiKeySource::Secret(arn),
            (None, None) => {
                return Err(Error::Config(
                    "GEMINI_API_KEY or GEMINI_API_KEY_SECRET_ARN must be set".to_string(),
                ))
            }
        };

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: parse_or(&var, "CHAT_MAX_ATTEMPTS", defaults.max_attempts)?,
            base_delay: Duration::from_millis(parse_or(
                &var,
                "CHAT_BACKOFF_BASE_MS",
                defaults.base_delay.as_millis() as u64,
            )?),
            max_delay: Duration::from_millis(parse_or(
                &var,
                "CHAT_BACKOFF_CAP_MS",
                defaults.max_delay.as_millis() as u64,
            )?),
            max_jitter: Duration::from_millis(parse_or(
                &var,
                "CHAT_BACKOFF_JITTER_MS",
                defaults.max_jitter.as_millis() as u64,
            )?),
        };

        if retry.max_attempts == 0 {
            return Err(Error::Config("CHAT_MAX_ATTEMPTS must be at least 1".to_string()));
        }

        let timeout_secs: u64 = parse_or(&var, "GEMINI_TIMEOUT_SECS", 30)?;
        if timeout_secs == 0 {
            return Err(Error::Config("GEMINI_TIMEOUT_SECS must be at least 1".to_string()));
        }

        Ok(Self {
            api_key,
            model: var("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_base: var("GEMINI_API_BASE")
                .map(|base| base.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            request_timeout: Duration::from_secs(timeout_secs),
            retry,
            fallback_message: var("CHAT_FALLBACK_MESSAGE")
                .unwrap_or_else(|| DEFAULT_FALLBACK_MESSAGE.to_string()),
            aws_region: var("AWS_REGION").unwrap_or_else(|| "us-east-1".to_string()),
        })
    }
}

fn parse_or<T: FromStr>(var: impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("Invalid {}: {}", key, e))),
        None => Ok(default),
    }
}

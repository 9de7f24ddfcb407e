//! Shared library for NutriMate Lambda functions.
//!
//! This crate holds the nutrition chat proxy: profile-grounded prompt
//! building, the Gemini client, response normalization and the retry loop,
//! plus the config, error and HTTP helpers the Lambdas share.

pub mod auth;
pub mod chat;
pub mod config;
pub mod error;
pub mod gemini;
pub mod http;
pub mod models;
pub mod normalize;
pub mod prompt;
pub mod retry;
pub mod secrets;

pub use auth::{extract_user_from_context, AuthenticatedUser};
pub use chat::{ChatOutcome, ChatService};
pub use config::{ApiKeySource, Config};
pub use error::{Error, Result};
pub use gemini::{GeminiClient, GenerateContent, UpstreamError};
pub use http::ErrorBody;
pub use models::{ChatRequest, ChatResponse, Source, UserContext};
pub use prompt::Prompt;
pub use retry::RetryPolicy;
pub use secrets::{get_secret, resolve_api_key};

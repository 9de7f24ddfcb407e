//! Chat Lambda - Handles POST /v1/chat endpoint.
//!
//! This Lambda reads the caller from the Cognito authorizer claims, grounds the
//! question in the submitted health profile, and answers it through Gemini.
//! The upstream retry loop is cancelled shortly before the invocation deadline.

use lambda_http::{run, service_fn, Body, Error, Request, RequestExt, Response};
use shared::http::{error_response, json_response};
use shared::{
    extract_user_from_context, parse_body, resolve_api_key, ApiKeySource, AuthenticatedUser,
    ChatOutcome, ChatRequest, ChatService, Config, GeminiClient,
};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Time kept in reserve to write the response before Lambda kills the invocation.
const DEADLINE_MARGIN: Duration = Duration::from_millis(750);

/// Application state shared across requests.
struct AppState {
    chat: ChatService<GeminiClient>,
}

impl AppState {
    async fn new() -> Result<Self, Error> {
        let config = Config::from_env()?;

        // Only load AWS config when the key lives in Secrets Manager; it adds cold-start latency.
        let api_key = match &config.api_key {
            ApiKeySource::Inline(key) => key.clone(),
            ApiKeySource::Secret(_) => {
                let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
                    .region(aws_config::Region::new(config.aws_region.clone()))
                    .load()
                    .await;
                let secrets_client = aws_sdk_secretsmanager::Client::new(&aws_config);
                resolve_api_key(&secrets_client, &config.api_key).await?
            }
        };

        let client = GeminiClient::new(
            &config.api_base,
            &config.model,
            api_key,
            config.request_timeout,
        )?;

        info!(
            model = %config.model,
            max_attempts = config.retry.max_attempts,
            "Chat Lambda initialized"
        );

        Ok(Self {
            chat: ChatService::from_config(client, &config),
        })
    }
}

/// Extract the caller from the Cognito authorizer claims.
fn authenticated_user(event: &Request) -> shared::Result<AuthenticatedUser> {
    let claims = event
        .request_context_ref()
        .and_then(|ctx| ctx.authorizer())
        .and_then(|authorizer| authorizer.fields.get("claims"))
        .ok_or_else(|| shared::Error::Auth("Missing authorizer claims".to_string()))?;

    extract_user_from_context(claims)
}

/// Time left before `deadline_ms` (epoch millis), less the response margin.
///
/// `None` when no deadline is known.
fn time_budget(deadline_ms: u64, now: SystemTime) -> Option<Duration> {
    if deadline_ms == 0 {
        return None;
    }
    let now_ms = now.duration_since(UNIX_EPOCH).ok()?.as_millis() as u64;
    let remaining = Duration::from_millis(deadline_ms.saturating_sub(now_ms));
    Some(remaining.saturating_sub(DEADLINE_MARGIN))
}

fn outcome_response(outcome: ChatOutcome) -> Result<Response<Body>, Error> {
    match outcome {
        ChatOutcome::Answered(response) => json_response(200, &response),
        ChatOutcome::Exhausted(fallback) => json_response(503, &fallback),
        ChatOutcome::Cancelled => error_response(504, "The assistant took too long to respond"),
        ChatOutcome::Rejected(reason) => error_response(400, reason),
    }
}

async fn handler(state: Arc<AppState>, event: Request) -> Result<Response<Body>, Error> {
    let user = match authenticated_user(&event) {
        Ok(user) => user,
        Err(e) => {
            warn!("Rejected unauthenticated chat request: {}", e);
            return error_response(401, "Authentication required");
        }
    };

    let request: ChatRequest = parse_body!(event.body());

    info!(user_id = %user.user_id, "Processing chat request");

    let cancel = CancellationToken::new();
    let watchdog = event
        .lambda_context_ref()
        .and_then(|ctx| time_budget(ctx.deadline, SystemTime::now()))
        .map(|budget| {
            let token = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(budget).await;
                token.cancel();
            })
        });

    let outcome = state
        .chat
        .answer(&request.user_query, &request.user_data, &cancel)
        .await;

    if let Some(watchdog) = watchdog {
        watchdog.abort();
    }

    outcome_response(outcome)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let state = Arc::new(AppState::new().await?);

    run(service_fn(move |event| {
        let state = Arc::clone(&state);
        async move { handler(state, event).await }
    }))
    .await
}

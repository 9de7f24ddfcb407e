//! Chat service: validation, prompt assembly, and the upstream retry loop.

use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::gemini::{GenerateContent, GenerateContentRequest};
use crate::models::{ChatResponse, UserContext};
use crate::normalize::normalize;
use crate::prompt::Prompt;
use crate::retry::RetryPolicy;
use crate::Config;

/// Terminal state of one chat call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatOutcome {
    /// The assistant answered.
    Answered(ChatResponse),
    /// Every attempt failed; carries the fallback body.
    Exhausted(ChatResponse),
    /// The caller's cancellation token fired first.
    Cancelled,
    /// The request was invalid and nothing was sent upstream.
    Rejected(String),
}

/// Answers user questions through a [`GenerateContent`] backend.
pub struct ChatService<U> {
    upstream: U,
    policy: RetryPolicy,
    fallback_message: String,
}

impl<U: GenerateContent> ChatService<U> {
    pub fn new(upstream: U, policy: RetryPolicy, fallback_message: impl Into<String>) -> Self {
        Self {
            upstream,
            policy,
            fallback_message: fallback_message.into(),
        }
    }

    /// Create a service using the retry and fallback settings in `config`.
    pub fn from_config(upstream: U, config: &Config) -> Self {
        Self::new(upstream, config.retry, config.fallback_message.clone())
    }

    /// Answer `query` for `user`.
    ///
    /// Never fails: upstream errors are retried per the policy and then
    /// degrade to [`ChatOutcome::Exhausted`].
    pub async fn answer(
        &self,
        query: &str,
        user: &UserContext,
        cancel: &CancellationToken,
    ) -> ChatOutcome {
        if query.trim().is_empty() {
            return ChatOutcome::Rejected("Query cannot be empty".to_string());
        }

        let span = info_span!("chat", call_id = %Uuid::new_v4());
        self.run(Prompt::build(query, user), cancel)
            .instrument(span)
            .await
    }

    async fn run(&self, prompt: Prompt, cancel: &CancellationToken) -> ChatOutcome {
        let request = GenerateContentRequest::from(&prompt);

        for attempt in 0..self.policy.max_attempts {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(attempt, "Chat cancelled during upstream call");
                    return ChatOutcome::Cancelled;
                }
                result = self.upstream.generate(&request) => result.and_then(normalize),
            };

            match result {
                Ok(response) => {
                    info!(
                        attempts = attempt + 1,
                        sources = response.sources.len(),
                        "Chat answered"
                    );
                    return ChatOutcome::Answered(response);
                }
                Err(e) => warn!(attempt, error = %e, "Upstream attempt failed"),
            }

            if !self.policy.has_next(attempt) {
                break;
            }

            let delay = self.policy.delay(attempt);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(attempt, "Chat cancelled during backoff");
                    return ChatOutcome::Cancelled;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        error!(
            attempts = self.policy.max_attempts,
            "Upstream attempts exhausted, returning fallback"
        );
        ChatOutcome::Exhausted(ChatResponse::fallback(self.fallback_message.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gemini::{GeminiClient, GenerateContentResponse, UpstreamError};
    use crate::models::Source;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::time::Instant;

    const FALLBACK: &str = "Sorry, please try again.";

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            max_jitter: Duration::ZERO,
        }
    }

    fn valid_payload() -> GenerateContentResponse {
        serde_json::from_value(json!({
            "candidates": [{
                "content": { "parts": [{ "text": "Have curd rice." }] },
                "groundingMetadata": {
                    "groundingAttributions": [
                        { "web": { "uri": "https://partial.test" } },
                        { "web": { "uri": "https://curd.test", "title": "Curd" } }
                    ]
                }
            }]
        }))
        .unwrap()
    }

    /// Replays a fixed script of results, then keeps failing.
    #[derive(Clone, Default)]
    struct ScriptedUpstream {
        script: Arc<Mutex<VecDeque<Result<GenerateContentResponse, UpstreamError>>>>,
        calls: Arc<AtomicU32>,
        call_times: Arc<Mutex<Vec<Instant>>>,
        last_request: Arc<Mutex<Option<serde_json::Value>>>,
    }

    impl ScriptedUpstream {
        fn new(script: Vec<Result<GenerateContentResponse, UpstreamError>>) -> Self {
            Self {
                script: Arc::new(Mutex::new(script.into())),
                ..Self::default()
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GenerateContent for ScriptedUpstream {
        async fn generate(
            &self,
            request: &GenerateContentRequest,
        ) -> Result<GenerateContentResponse, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.call_times.lock().unwrap().push(Instant::now());
            *self.last_request.lock().unwrap() = Some(serde_json::to_value(request).unwrap());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(UpstreamError::Transport("connection refused".to_string())))
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_four_failures() {
        let upstream = ScriptedUpstream::new(vec![
            Err(UpstreamError::Transport("reset".to_string())),
            Err(UpstreamError::Status { status: 500, body: String::new() }),
            Err(UpstreamError::Shape("no candidates".to_string())),
            Ok(GenerateContentResponse::default()),
            Ok(valid_payload()),
        ]);
        let service = ChatService::new(upstream.clone(), fast_policy(), FALLBACK);

        let outcome = service
            .answer("dinner ideas?", &UserContext::default(), &CancellationToken::new())
            .await;

        assert_eq!(
            outcome,
            ChatOutcome::Answered(ChatResponse {
                text: "Have curd rice.".to_string(),
                sources: vec![Source {
                    uri: "https://curd.test".to_string(),
                    title: "Curd".to_string(),
                }],
            })
        );
        assert_eq!(upstream.calls(), 5);
    }

    #[tokio::test]
    async fn test_exhausts_to_fallback() {
        let upstream = ScriptedUpstream::new(vec![]);
        let service = ChatService::new(upstream.clone(), fast_policy(), FALLBACK);

        let outcome = service
            .answer("dinner ideas?", &UserContext::default(), &CancellationToken::new())
            .await;

        assert_eq!(outcome, ChatOutcome::Exhausted(ChatResponse::fallback(FALLBACK)));
        assert_eq!(upstream.calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_gaps_double_between_attempts() {
        let upstream = ScriptedUpstream::new(vec![]);
        let policy = RetryPolicy {
            max_jitter: Duration::ZERO,
            ..RetryPolicy::default()
        };
        let service = ChatService::new(upstream.clone(), policy, FALLBACK);

        let outcome = service
            .answer("dinner ideas?", &UserContext::default(), &CancellationToken::new())
            .await;

        assert_eq!(outcome, ChatOutcome::Exhausted(ChatResponse::fallback(FALLBACK)));
        let times = upstream.call_times.lock().unwrap().clone();
        let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_query_never_dispatched() {
        let upstream = ScriptedUpstream::new(vec![Ok(valid_payload())]);
        let service = ChatService::new(upstream.clone(), fast_policy(), FALLBACK);

        for query in ["", "   ", "\n\t"] {
            let outcome = service
                .answer(query, &UserContext::default(), &CancellationToken::new())
                .await;
            assert!(matches!(outcome, ChatOutcome::Rejected(_)));
        }
        assert_eq!(upstream.calls(), 0);
    }

    #[tokio::test]
    async fn test_sends_instruction_and_query_separately() {
        let upstream = ScriptedUpstream::new(vec![Ok(valid_payload())]);
        let service = ChatService::new(upstream.clone(), fast_policy(), FALLBACK);
        let user = UserContext {
            allergies: vec!["Peanuts".to_string(), "Soy".to_string()],
            ..UserContext::default()
        };

        service
            .answer("  snack ideas  ", &user, &CancellationToken::new())
            .await;

        let body = upstream.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(body["contents"][0]["parts"][0]["text"], "snack ideas");
        let instruction = body["systemInstruction"]["parts"][0]["text"].as_str().unwrap();
        assert!(instruction.contains("- Allergies: Peanuts, Soy"));
        assert!(!instruction.contains("snack ideas"));
    }

    #[tokio::test]
    async fn test_cancel_during_backoff() {
        let upstream = ScriptedUpstream::new(vec![]);
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
            ..fast_policy()
        };
        let service = ChatService::new(upstream.clone(), policy, FALLBACK);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let outcome = service
            .answer("lunch?", &UserContext::default(), &cancel)
            .await;

        assert_eq!(outcome, ChatOutcome::Cancelled);
        assert_eq!(upstream.calls(), 1);
    }

    /// Never answers within a test's lifetime.
    #[derive(Clone, Default)]
    struct StalledUpstream {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl GenerateContent for StalledUpstream {
        async fn generate(
            &self,
            _request: &GenerateContentRequest,
        ) -> Result<GenerateContentResponse, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(valid_payload())
        }
    }

    #[tokio::test]
    async fn test_cancel_during_upstream_call() {
        let upstream = StalledUpstream::default();
        let service = ChatService::new(upstream.clone(), fast_policy(), FALLBACK);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            service.answer("lunch?", &UserContext::default(), &cancel),
        )
        .await
        .expect("cancellation should abort the pending call");

        assert_eq!(outcome, ChatOutcome::Cancelled);
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_already_cancelled_makes_no_call() {
        let upstream = ScriptedUpstream::new(vec![Ok(valid_payload())]);
        let service = ChatService::new(upstream.clone(), fast_policy(), FALLBACK);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = service
            .answer("lunch?", &UserContext::default(), &cancel)
            .await;

        assert_eq!(outcome, ChatOutcome::Cancelled);
        assert_eq!(upstream.calls(), 0);
    }

    #[tokio::test]
    async fn test_http_500_exhausts_after_five_calls() {
        use httpmock::prelude::*;

        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/models/test-model:generateContent")
                    .query_param("key", "test-key");
                then.status(500).body("internal");
            })
            .await;

        let client = GeminiClient::new(
            &server.base_url(),
            "test-model",
            "test-key".to_string(),
            Duration::from_secs(5),
        )
        .unwrap();
        let service = ChatService::new(client, fast_policy(), FALLBACK);

        let outcome = service
            .answer("dinner ideas?", &UserContext::default(), &CancellationToken::new())
            .await;

        assert_eq!(outcome, ChatOutcome::Exhausted(ChatResponse::fallback(FALLBACK)));
        mock.assert_calls_async(5).await;
    }
}

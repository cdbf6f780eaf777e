//! Step invoker - one model call under the engine's timeout/retry policy.
//!
//! Each attempt is bounded by `attempt_timeout`. Timeouts and transient
//! service failures are retried immediately, up to `max_retries` extra
//! attempts; a fatal failure stops at once. The invoker never touches step
//! or workflow state.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::InvokerConfig;
use crate::workflow::model_service::{ModelService, ModelServiceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationErrorKind {
    /// Every allowed attempt failed transiently or timed out.
    Exhausted,
    /// The service reported a non-retryable failure.
    Fatal,
}

impl fmt::Display for InvocationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted => f.write_str("retries exhausted"),
            Self::Fatal => f.write_str("fatal"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("model invocation failed ({kind}) after {attempts} attempt(s): {detail}")]
pub struct InvocationError {
    pub kind: InvocationErrorKind,
    pub detail: String,
    pub attempts: u32,
}

#[derive(Clone)]
pub struct StepInvoker {
    service: Arc<dyn ModelService>,
    config: InvokerConfig,
}

impl StepInvoker {
    pub fn new(service: Arc<dyn ModelService>, config: InvokerConfig) -> Self {
        Self { service, config }
    }

    pub fn config(&self) -> &InvokerConfig {
        &self.config
    }

    pub async fn invoke(&self, model: &str, prompt: &str) -> Result<String, InvocationError> {
        if model.trim().is_empty() {
            return Err(InvocationError {
                kind: InvocationErrorKind::Fatal,
                detail: "no model identifier configured for this step".to_string(),
                attempts: 0,
            });
        }

        let max_attempts = self.config.max_retries + 1;
        let mut last_failure = String::new();

        for attempt in 1..=max_attempts {
            let call = self.service.generate(model, prompt);
            match tokio::time::timeout(self.config.attempt_timeout, call).await {
                Ok(Ok(text)) => {
                    tracing::debug!(
                        "[Invoker] {} answered on attempt {}/{} ({} chars)",
                        model,
                        attempt,
                        max_attempts,
                        text.len()
                    );
                    return Ok(text);
                }
                Ok(Err(ModelServiceError::Fatal(detail))) => {
                    tracing::warn!("[Invoker] {} failed fatally: {}", model, detail);
                    return Err(InvocationError {
                        kind: InvocationErrorKind::Fatal,
                        detail,
                        attempts: attempt,
                    });
                }
                Ok(Err(ModelServiceError::Transient(detail))) => {
                    tracing::warn!(
                        "[Invoker] {} attempt {}/{} failed: {}",
                        model,
                        attempt,
                        max_attempts,
                        detail
                    );
                    last_failure = detail;
                }
                Err(_) => {
                    tracing::warn!(
                        "[Invoker] {} attempt {}/{} timed out after {:?}",
                        model,
                        attempt,
                        max_attempts,
                        self.config.attempt_timeout
                    );
                    last_failure = format!(
                        "timed out after {}ms",
                        self.config.attempt_timeout.as_millis()
                    );
                }
            }
        }

        Err(InvocationError {
            kind: InvocationErrorKind::Exhausted,
            detail: last_failure,
            attempts: max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedModelService;
    use std::time::Duration;

    fn invoker(service: Arc<ScriptedModelService>, timeout_ms: u64) -> StepInvoker {
        StepInvoker::new(
            service,
            InvokerConfig {
                attempt_timeout: Duration::from_millis(timeout_ms),
                max_retries: 2,
            },
        )
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let service = Arc::new(ScriptedModelService::new());
        service.reply("m", "hello");
        let text = invoker(service.clone(), 1000).invoke("m", "hi").await.unwrap();
        assert_eq!(text, "hello");
        assert_eq!(service.call_count("m"), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let service = Arc::new(ScriptedModelService::new());
        service.fail_transient("m", "503");
        service.fail_transient("m", "503");
        service.reply("m", "third time lucky");
        let text = invoker(service.clone(), 1000).invoke("m", "p").await.unwrap();
        assert_eq!(text, "third time lucky");
        assert_eq!(service.call_count("m"), 3);
    }

    #[tokio::test]
    async fn test_exhausted_after_max_retries() {
        let service = Arc::new(ScriptedModelService::new());
        for _ in 0..4 {
            service.fail_transient("m", "rate limited");
        }
        let err = invoker(service.clone(), 1000).invoke("m", "p").await.unwrap_err();
        assert_eq!(err.kind, InvocationErrorKind::Exhausted);
        assert_eq!(err.attempts, 3);
        assert_eq!(err.detail, "rate limited");
        assert_eq!(service.call_count("m"), 3);
    }

    #[tokio::test]
    async fn test_fatal_short_circuits() {
        let service = Arc::new(ScriptedModelService::new());
        service.fail_fatal("bogus-model", "unknown model");
        service.reply("bogus-model", "never reached");
        let err = invoker(service.clone(), 1000)
            .invoke("bogus-model", "p")
            .await
            .unwrap_err();
        assert_eq!(err.kind, InvocationErrorKind::Fatal);
        assert_eq!(err.attempts, 1);
        assert_eq!(service.call_count("bogus-model"), 1);
    }

    #[tokio::test]
    async fn test_timeouts_count_as_transient() {
        let service = Arc::new(ScriptedModelService::new());
        service.set_delay("slow", Duration::from_millis(200));
        let err = invoker(service.clone(), 20).invoke("slow", "p").await.unwrap_err();
        assert_eq!(err.kind, InvocationErrorKind::Exhausted);
        assert!(err.detail.contains("timed out"));
        assert_eq!(service.call_count("slow"), 3);
    }

    #[tokio::test]
    async fn test_blank_model_is_fatal_without_calling() {
        let service = Arc::new(ScriptedModelService::new());
        let err = invoker(service.clone(), 1000).invoke(" ", "p").await.unwrap_err();
        assert_eq!(err.kind, InvocationErrorKind::Fatal);
        assert!(service.calls().is_empty());
    }
}

//! Model-invocation service - the opaque "prompt in, text out" collaborator.
//!
//! The engine only sees the [`ModelService`] trait. The shipped
//! implementation, [`HttpModelService`], calls an OpenAI-compatible
//! chat-completions endpoint directly over HTTP.

use async_trait::async_trait;

use crate::config::ModelServiceConfig;

/// Failure reported by a model service, pre-classified for retry policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelServiceError {
    /// Worth retrying: network trouble, rate limiting, server-side errors.
    #[error("transient model service failure: {0}")]
    Transient(String),
    /// Retrying cannot help: unknown model, bad credentials, rejected request.
    #[error("model service rejected the request: {0}")]
    Fatal(String),
}

#[async_trait]
pub trait ModelService: Send + Sync {
    /// Generate a completion for `prompt` using the backend named by `model`.
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, ModelServiceError>;
}

/// Calls an OpenAI-compatible chat-completions API.
///
/// POST {api_url}
/// Headers:
///   Authorization: Bearer {api_key}
///   content-type: application/json
pub struct HttpModelService {
    client: reqwest::Client,
    config: ModelServiceConfig,
}

impl HttpModelService {
    pub fn new(config: ModelServiceConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(config.request_timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            config,
        }
    }
}

#[async_trait]
impl ModelService for HttpModelService {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, ModelServiceError> {
        let body = serde_json::json!({
            "model": model,
            "messages": [
                {
                    "role": "user",
                    "content": prompt
                }
            ]
        });

        tracing::info!(
            "[ModelService] Calling {} (model: {})",
            self.config.api_url,
            model
        );

        let mut request = self
            .client
            .post(&self.config.api_url)
            .header("content-type", "application/json")
            .json(&body);
        if !self.config.api_key.is_empty() {
            request = request.header("Authorization", format!("Bearer {}", self.config.api_key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| ModelServiceError::Transient(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let response_text = response.text().await.map_err(|e| {
            ModelServiceError::Transient(format!("Failed to read response body: {}", e))
        })?;

        if !status.is_success() {
            let detail = format!("API returned {}: {}", status, response_text);
            return Err(classify_status(status.as_u16(), detail));
        }

        extract_content(&response_text)
    }
}

/// Map a non-success HTTP status onto the retry taxonomy.
pub fn classify_status(status: u16, detail: String) -> ModelServiceError {
    match status {
        408 | 409 | 425 | 429 | 500..=599 => ModelServiceError::Transient(detail),
        _ => ModelServiceError::Fatal(detail),
    }
}

/// Pull `choices[0].message.content` out of a chat-completions response.
fn extract_content(response_text: &str) -> Result<String, ModelServiceError> {
    let json: serde_json::Value = serde_json::from_str(response_text).map_err(|e| {
        ModelServiceError::Transient(format!("Failed to parse response JSON: {}", e))
    })?;

    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|msg| msg.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| {
            ModelServiceError::Transient("Response has no choices[0].message.content".to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(429, "slow down".into()),
            ModelServiceError::Transient(_)
        ));
        assert!(matches!(
            classify_status(503, "down".into()),
            ModelServiceError::Transient(_)
        ));
        assert!(matches!(
            classify_status(404, "unknown model".into()),
            ModelServiceError::Fatal(_)
        ));
        assert!(matches!(
            classify_status(401, "bad key".into()),
            ModelServiceError::Fatal(_)
        ));
    }

    #[test]
    fn test_extract_content() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"hello"}}]}"#;
        assert_eq!(extract_content(body).unwrap(), "hello");
        assert!(matches!(
            extract_content(r#"{"choices":[]}"#),
            Err(ModelServiceError::Transient(_))
        ));
        assert!(matches!(
            extract_content("not json"),
            Err(ModelServiceError::Transient(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transient() {
        let service = HttpModelService::new(ModelServiceConfig {
            api_url: "http://127.0.0.1:9/v1/chat/completions".to_string(),
            api_key: String::new(),
            request_timeout: std::time::Duration::from_secs(2),
        });
        let err = service.generate("m", "p").await.unwrap_err();
        assert!(matches!(err, ModelServiceError::Transient(_)));
    }
}

//! HTTP embedding providers.
//!
//! Every provider implements [`EmbeddingProvider`] from `memory-harness-core`:
//!
//! | id | Endpoint | Default model | Dims |
//! |----|----------|---------------|------|
//! | `openai` | `POST {base}/embeddings` | `text-embedding-3-small` | 1536 |
//! | `ollama` | `POST {url}/api/embed` | `nomic-embed-text` | 768 |
//! | `gemini` | `POST {base}/models/{model}:batchEmbedContents` | `gemini-embedding-001` | 768 |
//!
//! Returned vectors are unit-normalized, so cosine similarity between a
//! query and a chunk is a plain dot product regardless of backend.
//!
//! # Retry Strategy
//!
//! All providers share [`post_json_with_retry`]:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

pub mod gemini;
pub mod ollama;
pub mod openai;

use anyhow::{bail, Result};
use std::time::Duration;
use tracing::debug;

use crate::config::EmbeddingConfig;

pub use gemini::GeminiProvider;
pub use memory_harness_core::embedding::EmbeddingProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAIProvider;

/// Build the shared HTTP client for a provider.
pub(crate) fn http_client(config: &EmbeddingConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

/// Strip trailing slashes so `{base}/path` joins cleanly.
pub(crate) fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// POST `body` as JSON to `url`, retrying transient failures.
///
/// `label` names the backend in error messages (e.g. `"OpenAI"`).
/// `bearer` adds an `Authorization: Bearer` header when set.
///
/// # Errors
///
/// Returns the first non-retryable HTTP error, or the last transient error
/// once `max_retries` additional attempts are exhausted.
pub(crate) async fn post_json_with_retry(
    client: &reqwest::Client,
    label: &str,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            debug!(provider = label, attempt, ?delay, "retrying embedding request");
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    let json: serde_json::Value = response.json().await?;
                    return Ok(json);
                }

                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!(
                        "{} API error {}: {}",
                        label,
                        status,
                        body_text
                    ));
                    continue;
                }

                let body_text = response.text().await.unwrap_or_default();
                bail!("{} API error {}: {}", label, status, body_text);
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} embedding failed after retries", label)))
}

/// Read a JSON number array as an `f32` vector.
pub(crate) fn parse_vector(label: &str, value: &serde_json::Value) -> Result<Vec<f32>> {
    let items = value
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("Invalid {} response: embedding is not an array", label))?;

    items
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| anyhow::anyhow!("Invalid {} response: non-numeric value", label))
        })
        .collect()
}

/// Fail unless the backend returned one vector per input.
pub(crate) fn ensure_count(label: &str, expected: usize, got: usize) -> Result<()> {
    if expected != got {
        bail!(
            "{} returned {} embeddings for {} inputs",
            label,
            got,
            expected
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_retries_server_error_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embed"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let json = post_json_with_retry(
            &client,
            "Test",
            &format!("{}/embed", server.uri()),
            None,
            &serde_json::json!({}),
            1,
        )
        .await
        .unwrap();
        assert_eq!(json["ok"], true);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embed"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let err = post_json_with_retry(
            &client,
            "Test",
            &format!("{}/embed", server.uri()),
            Some("sk"),
            &serde_json::json!({}),
            3,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("401"));
        assert!(err.to_string().contains("bad key"));
    }

    #[test]
    fn test_parse_vector_rejects_strings() {
        assert!(parse_vector("Test", &serde_json::json!([1.0, "x"])).is_err());
        assert_eq!(
            parse_vector("Test", &serde_json::json!([1.0, 2])).unwrap(),
            vec![1.0, 2.0]
        );
    }

    #[test]
    fn test_trim_base() {
        assert_eq!(trim_base("http://h:1/v1/"), "http://h:1/v1");
    }
}

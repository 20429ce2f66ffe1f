//! Google Gemini embeddings.
//!
//! Queries use `:embedContent` with task type `RETRIEVAL_QUERY`; batches use
//! `:batchEmbedContents` with `RETRIEVAL_DOCUMENT`. The key travels in the
//! `key` query parameter. Every request asks for `outputDimensionality`
//! equal to the declared width, since the model's native width is larger.

use anyhow::Result;
use async_trait::async_trait;

use memory_harness_core::embedding::{normalize, EmbeddingProvider};

use super::{ensure_count, http_client, parse_vector, post_json_with_retry, trim_base};
use crate::config::EmbeddingConfig;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-embedding-001";
pub const DEFAULT_DIMS: usize = 768;

pub struct GeminiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl GeminiProvider {
    /// # Errors
    ///
    /// Fails when no API key was configured.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            anyhow::anyhow!(
                "Gemini API key is required; set embedding.api_key or embedding.api_key_env"
            )
        })?;

        Ok(Self {
            client: http_client(config)?,
            base_url: trim_base(config.url.as_deref().unwrap_or(DEFAULT_BASE_URL)),
            api_key,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            dims: config.dims.unwrap_or(DEFAULT_DIMS),
            max_retries: config.max_retries,
        })
    }

    fn endpoint(&self, method: &str) -> String {
        format!(
            "{}/models/{}:{}?key={}",
            self.base_url, self.model, method, self.api_key
        )
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiProvider {
    fn id(&self) -> &str {
        "gemini"
    }
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "content": { "parts": [{ "text": text }] },
            "taskType": "RETRIEVAL_QUERY",
            "outputDimensionality": self.dims,
        });
        let json = post_json_with_retry(
            &self.client,
            "Gemini",
            &self.endpoint("embedContent"),
            None,
            &body,
            self.max_retries,
        )
        .await?;

        let values = json
            .get("embedding")
            .and_then(|e| e.get("values"))
            .ok_or_else(|| anyhow::anyhow!("Invalid Gemini response: missing embedding.values"))?;
        Ok(normalize(parse_vector("Gemini", values)?))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let requests: Vec<serde_json::Value> = texts
            .iter()
            .map(|text| {
                serde_json::json!({
                    "model": format!("models/{}", self.model),
                    "content": { "parts": [{ "text": text }] },
                    "taskType": "RETRIEVAL_DOCUMENT",
                    "outputDimensionality": self.dims,
                })
            })
            .collect();
        let body = serde_json::json!({ "requests": requests });

        let json = post_json_with_retry(
            &self.client,
            "Gemini",
            &self.endpoint("batchEmbedContents"),
            None,
            &body,
            self.max_retries,
        )
        .await?;

        let embeddings = json
            .get("embeddings")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid Gemini response: missing embeddings array"))?;

        let vecs = embeddings
            .iter()
            .map(|e| {
                let values = e.get("values").ok_or_else(|| {
                    anyhow::anyhow!("Invalid Gemini response: embedding without values")
                })?;
                parse_vector("Gemini", values).map(normalize)
            })
            .collect::<Result<Vec<_>>>()?;

        ensure_count("Gemini", texts.len(), vecs.len())?;
        Ok(vecs)
    }
}

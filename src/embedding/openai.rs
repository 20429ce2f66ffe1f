//! OpenAI embeddings (`POST {base}/embeddings`).
//!
//! The base URL defaults to `https://api.openai.com/v1` and may point at any
//! OpenAI-compatible gateway through `embedding.url`.

use anyhow::Result;
use async_trait::async_trait;

use memory_harness_core::embedding::{normalize, EmbeddingProvider};

use super::{ensure_count, http_client, parse_vector, post_json_with_retry, trim_base};
use crate::config::EmbeddingConfig;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_DIMS: usize = 1536;

pub struct OpenAIProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dims: usize,
    /// Sent as `dimensions` when the config overrides the model's width.
    requested_dims: Option<usize>,
    max_retries: u32,
}

impl OpenAIProvider {
    /// # Errors
    ///
    /// Fails when no API key was configured.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            anyhow::anyhow!(
                "OpenAI API key is required; set embedding.api_key or embedding.api_key_env"
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
            requested_dims: config.dims,
            max_retries: config.max_retries,
        })
    }

    async fn request(&self, input: serde_json::Value) -> Result<Vec<Vec<f32>>> {
        let mut body = serde_json::json!({
            "model": self.model,
            "input": input,
        });
        if let Some(dims) = self.requested_dims {
            body["dimensions"] = serde_json::json!(dims);
        }
        let json = post_json_with_retry(
            &self.client,
            "OpenAI",
            &format!("{}/embeddings", self.base_url),
            Some(&self.api_key),
            &body,
            self.max_retries,
        )
        .await?;
        parse_openai_response(&json)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn id(&self) -> &str {
        "openai"
    }
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vecs = self.request(serde_json::json!(text)).await?;
        ensure_count("OpenAI", 1, vecs.len())?;
        Ok(vecs.remove(0))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vecs = self.request(serde_json::json!(texts)).await?;
        ensure_count("OpenAI", texts.len(), vecs.len())?;
        Ok(vecs)
    }
}

/// Extract `data[].embedding`, ordered by each row's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut rows: Vec<(u64, Vec<f32>)> = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .unwrap_or(pos as u64);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;
        rows.push((index, normalize(parse_vector("OpenAI", embedding)?)));
    }

    rows.sort_by_key(|(index, _)| *index);
    Ok(rows.into_iter().map(|(_, v)| v).collect())
}

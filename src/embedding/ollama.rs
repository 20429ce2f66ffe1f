//! Ollama embeddings via a local or remote Ollama server.
//!
//! Calls `POST {url}/api/embed` with `{"model", "input"}` and reads the
//! `embeddings` array. No credentials are needed.

use anyhow::Result;
use async_trait::async_trait;

use memory_harness_core::embedding::{normalize, EmbeddingProvider};

use super::{ensure_count, http_client, parse_vector, post_json_with_retry, trim_base};
use crate::config::EmbeddingConfig;

pub const DEFAULT_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "nomic-embed-text";
pub const DEFAULT_DIMS: usize = 768;

pub struct OllamaProvider {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            url: trim_base(config.url.as_deref().unwrap_or(DEFAULT_URL)),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            dims: config.dims.unwrap_or(DEFAULT_DIMS),
            max_retries: config.max_retries,
        })
    }

    async fn call_embed(&self, input: serde_json::Value) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": input,
        });
        let json = post_json_with_retry(
            &self.client,
            "Ollama",
            &format!("{}/api/embed", self.url),
            None,
            &body,
            self.max_retries,
        )
        .await?;
        parse_ollama_response(&json)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn id(&self) -> &str {
        "ollama"
    }
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vecs = self.call_embed(serde_json::json!(text)).await?;
        ensure_count("Ollama", 1, vecs.len())?;
        Ok(vecs.remove(0))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vecs = self.call_embed(serde_json::json!(texts)).await?;
        ensure_count("Ollama", texts.len(), vecs.len())?;
        Ok(vecs)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|e| parse_vector("Ollama", e).map(normalize))
        .collect()
}

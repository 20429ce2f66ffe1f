//! Embedding provider registry.
//!
//! A registry maps provider ids to factories. It is built once at process
//! start and handed by reference to whatever needs to turn a configured
//! `embedding.provider` into a live [`EmbeddingProvider`]:
//!
//! ```rust,no_run
//! # use memory_harness::config::EmbeddingConfig;
//! # use memory_harness::registry::EmbeddingRegistry;
//! let registry = EmbeddingRegistry::with_builtins();
//! let provider = registry.resolve("ollama", &EmbeddingConfig::default()).unwrap();
//! assert_eq!(provider.id(), "ollama");
//! ```
//!
//! Providers are constructed lazily on first resolve and the instance is
//! cached per id, so every component resolving the same id with the same
//! `[embedding]` section shares one HTTP client. Resolving with a different
//! section rebuilds the provider and replaces the cached instance.

use anyhow::{bail, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use crate::config::EmbeddingConfig;
use crate::embedding::{EmbeddingProvider, GeminiProvider, OllamaProvider, OpenAIProvider};

/// Builds a provider from the `[embedding]` config section.
pub type ProviderFactory =
    Box<dyn Fn(&EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> + Send + Sync>;

pub struct EmbeddingRegistry {
    factories: BTreeMap<String, ProviderFactory>,
    instances: Mutex<HashMap<String, CachedProvider>>,
}

struct CachedProvider {
    config: EmbeddingConfig,
    provider: Arc<dyn EmbeddingProvider>,
}

impl EmbeddingRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// A registry with `openai`, `ollama`, and `gemini` registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("openai", |cfg| {
            Ok(Arc::new(OpenAIProvider::new(cfg)?) as Arc<dyn EmbeddingProvider>)
        });
        registry.register("ollama", |cfg| {
            Ok(Arc::new(OllamaProvider::new(cfg)?) as Arc<dyn EmbeddingProvider>)
        });
        registry.register("gemini", |cfg| {
            Ok(Arc::new(GeminiProvider::new(cfg)?) as Arc<dyn EmbeddingProvider>)
        });
        registry
    }

    /// Add or replace the factory for `id`.
    ///
    /// A cached instance for `id` is discarded so the next resolve uses the
    /// new factory.
    pub fn register<F>(&mut self, id: &str, factory: F)
    where
        F: Fn(&EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> + Send + Sync + 'static,
    {
        self.factories.insert(id.to_string(), Box::new(factory));
        if let Ok(mut instances) = self.instances.lock() {
            instances.remove(id);
        }
    }

    /// Registered ids in sorted order.
    pub fn ids(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Return the provider registered as `id`, constructing it on first use
    /// or when `config` differs from the one the cached instance was built
    /// from.
    ///
    /// # Errors
    ///
    /// Fails when `id` is unknown (the message lists the registered ids) or
    /// when the factory rejects `config`, e.g. a missing API key. Failed
    /// constructions are not cached.
    pub fn resolve(&self, id: &str, config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
        let mut instances = self
            .instances
            .lock()
            .map_err(|_| anyhow::anyhow!("embedding registry lock poisoned"))?;

        if let Some(cached) = instances.get(id) {
            if cached.config == *config {
                return Ok(cached.provider.clone());
            }
        }

        let Some(factory) = self.factories.get(id) else {
            bail!(
                "Unknown embedding provider '{}'. Registered providers: {}",
                id,
                self.ids().join(", ")
            );
        };

        let provider = factory(config)?;
        instances.insert(
            id.to_string(),
            CachedProvider {
                config: config.clone(),
                provider: provider.clone(),
            },
        );
        Ok(provider)
    }
}

impl Default for EmbeddingRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

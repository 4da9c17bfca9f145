//! Embedding providers.
//!
//! A provider turns texts into unit-norm vectors of a fixed dimension.
//! Two variants exist:
//!
//! - [`HttpProvider`]: posts `{model, input}` batches to a remote endpoint
//!   with retry, backoff and a bounded number of in-flight requests.
//! - [`LocalProvider`]: runs a sentence-transformer ONNX export from the
//!   Hugging Face cache in-process, one inference at a time.

mod http;
mod local;
mod models;
mod retry;

pub use http::HttpProvider;
pub use local::{hf_cache_root, model_cache_dir, LocalProvider};
pub use models::known_dimension;
pub use retry::RetryPolicy;

use crate::error::EmbeddingError;
use async_trait::async_trait;
use gcq_protocol::{ProviderHealth, ProviderInfo};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_BATCH_SIZE: usize = 32;
pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Capability every provider exposes to the indexer and the query engine.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed `texts`, returning one unit-norm vector per input in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Vector dimension; stable for the life of the provider.
    fn dimension(&self) -> usize;

    /// Provider family, e.g. `ollama` or `huggingface`.
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    async fn health(&self) -> ProviderHealth;

    /// Cancel in-flight work; later calls fail with `Cancelled`.
    async fn close(&self);
}

pub type SharedProvider = Arc<dyn EmbeddingProvider>;

/// Snapshot of a provider's identity and health for `status`.
pub async fn describe(provider: &dyn EmbeddingProvider) -> ProviderInfo {
    ProviderInfo {
        name: provider.name().to_string(),
        model: provider.model().to_string(),
        dimension: provider.dimension(),
        health: provider.health().await,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Ollama,
    #[serde(rename = "openai")]
    OpenAi,
    Http,
    #[serde(rename = "huggingface", alias = "local")]
    HuggingFace,
}

impl ProviderKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::OpenAi => "openai",
            Self::Http => "http",
            Self::HuggingFace => "huggingface",
        }
    }

    #[must_use]
    pub const fn is_remote(self) -> bool {
        !matches!(self, Self::HuggingFace)
    }

    /// Request path appended to `base_url` when none is configured.
    pub const fn default_endpoint(self) -> &'static str {
        match self {
            Self::Ollama => "/api/embeddings",
            Self::OpenAi => "/v1/embeddings",
            Self::Http => "/embed",
            Self::HuggingFace => "",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = EmbeddingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAi),
            "http" => Ok(Self::Http),
            "huggingface" | "hf" | "local" => Ok(Self::HuggingFace),
            other => Err(EmbeddingError::Config(format!(
                "unknown provider '{other}' (expected ollama, openai, http or huggingface)"
            ))),
        }
    }
}

/// Fully resolved provider settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSpec {
    pub kind: ProviderKind,
    pub model: String,
    pub base_url: Option<String>,
    /// Request path override for remote providers
    pub endpoint: Option<String>,
    pub token: Option<String>,
    pub dimensions: Option<usize>,
    pub batch_size: usize,
    pub max_in_flight: usize,
}

impl ProviderSpec {
    pub fn new(kind: ProviderKind, model: impl Into<String>) -> Self {
        Self {
            kind,
            model: model.into(),
            base_url: None,
            endpoint: None,
            token: None,
            dimensions: None,
            batch_size: DEFAULT_BATCH_SIZE,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }

    /// `kind:model` label used in logs.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}:{}", self.kind, self.model)
    }

    /// Dimension known without contacting the provider.
    #[must_use]
    pub fn static_dimension(&self) -> Option<usize> {
        self.dimensions.or_else(|| known_dimension(&self.model))
    }
}

/// Construct the provider described by `spec`.
///
/// Remote providers with an unknown dimension are probed once.
pub async fn build_provider(
    spec: &ProviderSpec,
    cancel: CancellationToken,
) -> Result<SharedProvider, EmbeddingError> {
    if spec.model.trim().is_empty() {
        return Err(EmbeddingError::Config(format!(
            "{} provider requires a model",
            spec.kind
        )));
    }
    if spec.kind.is_remote() {
        let provider = HttpProvider::connect(spec.clone(), cancel).await?;
        Ok(Arc::new(provider))
    } else {
        let provider = LocalProvider::new(spec.clone(), hf_cache_root(), cancel)?;
        Ok(Arc::new(provider))
    }
}

/// Scale `vector` to unit length. Returns false for zero or non-finite input.
pub fn l2_normalize(vector: &mut [f32]) -> bool {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if !norm.is_finite() || norm <= f32::EPSILON {
        return false;
    }
    for x in vector.iter_mut() {
        *x /= norm;
    }
    true
}

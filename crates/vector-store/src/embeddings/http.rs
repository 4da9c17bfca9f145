use super::{
    l2_normalize, EmbeddingProvider, ProviderKind, ProviderSpec, RetryPolicy, DEFAULT_OLLAMA_URL,
};
use crate::error::EmbeddingError;
use async_trait::async_trait;
use gcq_protocol::{ProviderHealth, ProviderStatus};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const PING_TIMEOUT: Duration = Duration::from_secs(3);
const PROBE_TEXT: &str = "dimension probe";

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EmbedResponse {
    Batch { embeddings: Vec<Vec<f32>> },
    Single { embedding: Vec<f32> },
    OpenAi { data: Vec<OpenAiItem> },
}

#[derive(Deserialize)]
struct OpenAiItem {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

impl EmbedResponse {
    fn into_vectors(self) -> Vec<Vec<f32>> {
        match self {
            Self::Batch { embeddings } => embeddings,
            Self::Single { embedding } => vec![embedding],
            Self::OpenAi { mut data } => {
                if data.iter().all(|item| item.index.is_some()) {
                    data.sort_by_key(|item| item.index);
                }
                data.into_iter().map(|item| item.embedding).collect()
            }
        }
    }
}

/// Remote embedding endpoint speaking `{model, input}` JSON.
pub struct HttpProvider {
    spec: ProviderSpec,
    base_url: String,
    url: String,
    client: reqwest::Client,
    dimension: usize,
    permits: Semaphore,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl HttpProvider {
    /// Build the provider, probing the endpoint once when the model's
    /// dimension is not known up front.
    pub async fn connect(spec: ProviderSpec, cancel: CancellationToken) -> Result<Self, EmbeddingError> {
        let mut provider = Self::new(spec, cancel)?;
        if provider.dimension == 0 {
            provider.dimension = provider.probe_dimension().await?;
            log::info!(
                "Probed {} dimension: {}",
                provider.spec.label(),
                provider.dimension
            );
        }
        Ok(provider)
    }

    /// Build without network access. The dimension stays 0 when unknown.
    pub fn new(spec: ProviderSpec, cancel: CancellationToken) -> Result<Self, EmbeddingError> {
        if !spec.kind.is_remote() {
            return Err(EmbeddingError::Config(format!(
                "{} is not a remote provider",
                spec.kind
            )));
        }
        let base_url = match spec.base_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url.trim_end_matches('/').to_string(),
            _ if spec.kind == ProviderKind::Ollama => DEFAULT_OLLAMA_URL.to_string(),
            _ => {
                return Err(EmbeddingError::Config(format!(
                    "{} provider requires base_url",
                    spec.kind
                )))
            }
        };
        let endpoint = spec
            .endpoint
            .clone()
            .unwrap_or_else(|| spec.kind.default_endpoint().to_string());
        let url = if endpoint.starts_with('/') {
            format!("{base_url}{endpoint}")
        } else {
            format!("{base_url}/{endpoint}")
        };

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| EmbeddingError::Config(format!("http client: {e}")))?;

        Ok(Self {
            dimension: spec.static_dimension().unwrap_or(0),
            permits: Semaphore::new(spec.max_in_flight.max(1)),
            spec,
            base_url,
            url,
            client,
            retry: RetryPolicy::default(),
            cancel,
        })
    }

    #[must_use]
    pub const fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn probe_dimension(&self) -> Result<usize, EmbeddingError> {
        let input = [PROBE_TEXT.to_string()];
        let vectors = self.post_once(&input, Some(PING_TIMEOUT)).await.map_err(|e| {
            EmbeddingError::Config(format!(
                "cannot determine dimension of {} ({e}); set `dimensions` in config",
                self.spec.label()
            ))
        })?;
        match vectors.first() {
            Some(v) if !v.is_empty() => Ok(v.len()),
            _ => Err(EmbeddingError::Config(format!(
                "{} returned an empty probe vector",
                self.spec.label()
            ))),
        }
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let _permit = tokio::select! {
            permit = self.permits.acquire() => permit.map_err(|_| EmbeddingError::Cancelled)?,
            () = self.cancel.cancelled() => return Err(EmbeddingError::Cancelled),
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = tokio::select! {
                result = self.post_once(batch, None) => result,
                () = self.cancel.cancelled() => return Err(EmbeddingError::Cancelled),
            };
            match outcome {
                Ok(vectors) => return self.finish(batch.len(), vectors),
                Err(EmbeddingError::Transient(msg)) => {
                    if attempt >= self.retry.max_attempts {
                        return Err(EmbeddingError::Unavailable(format!(
                            "{msg} (gave up after {attempt} attempts)"
                        )));
                    }
                    let delay = self.retry.delay(attempt - 1);
                    log::debug!(
                        "{} attempt {attempt} failed: {msg}; retrying in {delay:?}",
                        self.spec.label()
                    );
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = self.cancel.cancelled() => return Err(EmbeddingError::Cancelled),
                    }
                }
                Err(other) => return Err(other),
            }
        }
    }

    async fn post_once(
        &self,
        batch: &[String],
        timeout: Option<Duration>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut request = self.client.post(&self.url).json(&EmbedRequest {
            model: &self.spec.model,
            input: batch,
        });
        if let Some(token) = self.spec.token.as_deref().filter(|t| !t.is_empty()) {
            request = request.bearer_auth(token);
        }
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EmbeddingError::Transient(format!("request to {} failed: {e}", self.url)))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Transient(format!("{status}: {body}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::BadRequest(format!("{status}: {body}")));
        }

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::BadRequest(format!("malformed response: {e}")))?;
        Ok(body.into_vectors())
    }

    fn finish(
        &self,
        expected: usize,
        mut vectors: Vec<Vec<f32>>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if vectors.len() != expected {
            return Err(EmbeddingError::BadRequest(format!(
                "expected {expected} embeddings, got {}",
                vectors.len()
            )));
        }
        for vector in &mut vectors {
            if vector.len() != self.dimension {
                return Err(EmbeddingError::BadRequest(format!(
                    "expected dimension {}, got {}",
                    self.dimension,
                    vector.len()
                )));
            }
            if !l2_normalize(vector) {
                return Err(EmbeddingError::BadRequest("provider returned a zero vector".into()));
            }
        }
        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.spec.batch_size.max(1)) {
            if self.cancel.is_cancelled() {
                return Err(EmbeddingError::Cancelled);
            }
            out.extend(self.embed_batch(batch).await?);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        self.spec.kind.as_str()
    }

    fn model(&self) -> &str {
        &self.spec.model
    }

    async fn health(&self) -> ProviderHealth {
        if self.cancel.is_cancelled() {
            return ProviderHealth::with_detail(ProviderStatus::Error, "provider closed");
        }
        match self
            .client
            .get(&self.base_url)
            .timeout(PING_TIMEOUT)
            .send()
            .await
        {
            Ok(_) => ProviderHealth::ready(),
            Err(e) => ProviderHealth::with_detail(
                ProviderStatus::Unreachable,
                format!("{}: {e}", self.base_url),
            ),
        }
    }

    async fn close(&self) {
        self.cancel.cancel();
        self.permits.close();
    }
}

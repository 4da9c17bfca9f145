use super::{l2_normalize, EmbeddingProvider, ProviderSpec};
use crate::error::EmbeddingError;
use async_trait::async_trait;
use gcq_protocol::{ProviderHealth, ProviderStatus};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokenizers::{Tokenizer, TruncationParams};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

const DEFAULT_ORG: &str = "sentence-transformers";
const MAX_SEQUENCE_LEN: usize = 512;
const MODEL_FILES: [&str; 2] = ["onnx/model.onnx", "model.onnx"];
const TOKENIZER_FILE: &str = "tokenizer.json";

/// Root of the Hugging Face hub cache.
///
/// `HF_HUB_CACHE`, else `HF_HOME/hub`, else `~/.cache/huggingface/hub`.
pub fn hf_cache_root() -> PathBuf {
    if let Some(dir) = non_empty_env("HF_HUB_CACHE") {
        return PathBuf::from(dir);
    }
    if let Some(home) = non_empty_env("HF_HOME") {
        return PathBuf::from(home).join("hub");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".cache")
        .join("huggingface")
        .join("hub")
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Cache directory of `model`: `models--<org>--<name>`. Bare names belong
/// to `sentence-transformers`.
pub fn model_cache_dir(cache_root: &Path, model: &str) -> PathBuf {
    let model = model.trim();
    let repo = if model.contains('/') {
        model.to_string()
    } else {
        format!("{DEFAULT_ORG}/{model}")
    };
    cache_root.join(format!("models--{}", repo.replace('/', "--")))
}

/// Resolve the snapshot directory: `refs/main` when present, else the
/// first snapshot in name order.
fn find_snapshot(model_dir: &Path) -> Option<PathBuf> {
    let snapshots = model_dir.join("snapshots");
    if let Ok(reference) = std::fs::read_to_string(model_dir.join("refs").join("main")) {
        let candidate = snapshots.join(reference.trim());
        if candidate.is_dir() {
            return Some(candidate);
        }
    }
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(&snapshots)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();
    dirs.into_iter().next()
}

fn cache_status(cache_root: &Path, model: &str) -> ProviderHealth {
    if model.trim().is_empty() {
        return ProviderHealth::with_detail(ProviderStatus::Error, "model is not configured");
    }
    let model_dir = model_cache_dir(cache_root, model);
    if !model_dir.is_dir() {
        return ProviderHealth::with_detail(
            ProviderStatus::Missing,
            format!("{} not found", model_dir.display()),
        );
    }
    match find_snapshot(&model_dir) {
        Some(_) => ProviderHealth::ready(),
        None => ProviderHealth::with_detail(
            ProviderStatus::Downloading,
            format!("no snapshot in {}", model_dir.join("snapshots").display()),
        ),
    }
}

/// Reads `hidden_size` from the snapshot's `config.json`.
fn snapshot_hidden_size(model_dir: &Path) -> Option<usize> {
    let snapshot = find_snapshot(model_dir)?;
    let raw = std::fs::read(snapshot.join("config.json")).ok()?;
    let config: serde_json::Value = serde_json::from_slice(&raw).ok()?;
    config
        .get("hidden_size")
        .and_then(serde_json::Value::as_u64)
        .and_then(|d| usize::try_from(d).ok())
}

struct LoadedModel {
    session: Session,
    tokenizer: Tokenizer,
    wants_token_types: bool,
}

impl LoadedModel {
    fn load(model_dir: &Path) -> Result<Self, EmbeddingError> {
        let snapshot = find_snapshot(model_dir).ok_or_else(|| {
            EmbeddingError::Unavailable(format!(
                "model snapshot not downloaded yet: {}",
                model_dir.display()
            ))
        })?;
        let model_path = MODEL_FILES
            .iter()
            .map(|rel| snapshot.join(rel))
            .find(|path| path.is_file())
            .ok_or_else(|| {
                EmbeddingError::Unavailable(format!("no ONNX export in {}", snapshot.display()))
            })?;

        let mut tokenizer = Tokenizer::from_file(snapshot.join(TOKENIZER_FILE))
            .map_err(|e| EmbeddingError::Unavailable(format!("load tokenizer: {e}")))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_SEQUENCE_LEN,
                ..TruncationParams::default()
            }))
            .map_err(|e| EmbeddingError::Config(format!("tokenizer truncation: {e}")))?;

        let load_err = |e: &dyn std::fmt::Display| {
            EmbeddingError::Unavailable(format!("load {}: {e}", model_path.display()))
        };
        let session = Session::builder()
            .map_err(|e| load_err(&e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| load_err(&e))?
            .commit_from_file(&model_path)
            .map_err(|e| load_err(&e))?;
        let wants_token_types = session
            .inputs
            .iter()
            .any(|input| input.name == "token_type_ids");

        log::info!("Loaded local model from {}", model_path.display());
        Ok(Self {
            session,
            tokenizer,
            wants_token_types,
        })
    }

    /// Tokenize, run, mean-pool over the attention mask, normalize.
    fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| EmbeddingError::BadRequest(format!("tokenize: {e}")))?;

        let batch = encodings.len();
        let seq = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(1)
            .max(1);

        let mut ids = vec![0i64; batch * seq];
        let mut mask = vec![0i64; batch * seq];
        let mut types = vec![0i64; batch * seq];
        for (row, enc) in encodings.iter().enumerate() {
            for (col, (&id, &ty)) in enc.get_ids().iter().zip(enc.get_type_ids()).enumerate() {
                ids[row * seq + col] = i64::from(id);
                mask[row * seq + col] = 1;
                types[row * seq + col] = i64::from(ty);
            }
        }

        let tensor = |data: Vec<i64>| {
            Tensor::from_array(([batch, seq], data))
                .map_err(|e| EmbeddingError::BadRequest(format!("input tensor: {e}")))
        };
        let mut inputs = ort::inputs![
            "input_ids" => tensor(ids)?,
            "attention_mask" => tensor(mask.clone())?,
        ];
        if self.wants_token_types {
            inputs.push(("token_type_ids".into(), tensor(types)?.into()));
        }

        let outputs = self
            .session
            .run(inputs)
            .map_err(|e| EmbeddingError::Unavailable(format!("inference: {e}")))?;
        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbeddingError::Unavailable(format!("inference output: {e}")))?;
        let dims: Vec<usize> = shape.iter().map(|&d| usize::try_from(d).unwrap_or(0)).collect();

        let mut vectors = match dims.as_slice() {
            [b, hidden] if *b == batch && *hidden > 0 => data.chunks(*hidden).map(<[f32]>::to_vec).collect(),
            [b, s, hidden] if *b == batch && *s == seq => {
                mean_pool(data, &mask, batch, seq, *hidden)
            }
            other => {
                return Err(EmbeddingError::Unavailable(format!(
                    "unexpected output shape {other:?}"
                )))
            }
        };
        for vector in &mut vectors {
            if !l2_normalize(vector) {
                return Err(EmbeddingError::BadRequest("model produced a zero vector".into()));
            }
        }
        Ok(vectors)
    }
}

fn mean_pool(data: &[f32], mask: &[i64], batch: usize, seq: usize, hidden: usize) -> Vec<Vec<f32>> {
    (0..batch)
        .map(|row| {
            let mut sum = vec![0f32; hidden];
            let mut count = 0f32;
            for col in 0..seq {
                if mask[row * seq + col] == 0 {
                    continue;
                }
                let offset = (row * seq + col) * hidden;
                for (acc, &v) in sum.iter_mut().zip(&data[offset..offset + hidden]) {
                    *acc += v;
                }
                count += 1.0;
            }
            if count > 0.0 {
                for x in &mut sum {
                    *x /= count;
                }
            }
            sum
        })
        .collect()
}

/// In-process sentence-transformer running from the Hugging Face cache.
pub struct LocalProvider {
    spec: ProviderSpec,
    cache_root: PathBuf,
    model_dir: PathBuf,
    dimension: usize,
    model: Arc<Mutex<Option<LoadedModel>>>,
    permit: Semaphore,
    cancel: CancellationToken,
}

impl LocalProvider {
    pub fn new(
        spec: ProviderSpec,
        cache_root: PathBuf,
        cancel: CancellationToken,
    ) -> Result<Self, EmbeddingError> {
        if spec.model.trim().is_empty() {
            return Err(EmbeddingError::Config(
                "huggingface provider requires a model".into(),
            ));
        }
        let model_dir = model_cache_dir(&cache_root, &spec.model);
        let dimension = spec
            .static_dimension()
            .or_else(|| snapshot_hidden_size(&model_dir))
            .ok_or_else(|| {
                EmbeddingError::Config(format!(
                    "unknown dimension for {}; set `dimensions` in config",
                    spec.model
                ))
            })?;

        Ok(Self {
            spec,
            cache_root,
            model_dir,
            dimension,
            model: Arc::new(Mutex::new(None)),
            permit: Semaphore::new(1),
            cancel,
        })
    }

    #[must_use]
    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }
}

#[async_trait]
impl EmbeddingProvider for LocalProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let _permit = tokio::select! {
            permit = self.permit.acquire() => permit.map_err(|_| EmbeddingError::Cancelled)?,
            () = self.cancel.cancelled() => return Err(EmbeddingError::Cancelled),
        };

        let model = Arc::clone(&self.model);
        let model_dir = self.model_dir.clone();
        let texts = texts.to_vec();
        let batch_size = self.spec.batch_size.max(1);
        let cancel = self.cancel.clone();

        let vectors = tokio::task::spawn_blocking(move || {
            let mut guard = model.lock().unwrap_or_else(PoisonError::into_inner);
            if guard.is_none() {
                *guard = Some(LoadedModel::load(&model_dir)?);
            }
            let Some(loaded) = guard.as_mut() else {
                return Err(EmbeddingError::Unavailable("model not loaded".into()));
            };
            let mut out = Vec::with_capacity(texts.len());
            for batch in texts.chunks(batch_size) {
                if cancel.is_cancelled() {
                    return Err(EmbeddingError::Cancelled);
                }
                out.extend(loaded.embed(batch)?);
            }
            Ok(out)
        })
        .await
        .map_err(|e| EmbeddingError::Unavailable(format!("inference task failed: {e}")))??;

        if let Some(v) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(EmbeddingError::Config(format!(
                "model produced dimension {}, expected {}",
                v.len(),
                self.dimension
            )));
        }
        Ok(vectors)
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
        cache_status(&self.cache_root, &self.spec.model)
    }

    async fn close(&self) {
        self.cancel.cancel();
        self.permit.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::ProviderKind;

    fn spec(model: &str) -> ProviderSpec {
        ProviderSpec::new(ProviderKind::HuggingFace, model)
    }

    #[test]
    fn bare_model_names_map_to_sentence_transformers() {
        let root = Path::new("/cache");
        assert_eq!(
            model_cache_dir(root, "all-MiniLM-L6-v2"),
            PathBuf::from("/cache/models--sentence-transformers--all-MiniLM-L6-v2")
        );
        assert_eq!(
            model_cache_dir(root, "BAAI/bge-small-en-v1.5"),
            PathBuf::from("/cache/models--BAAI--bge-small-en-v1.5")
        );
    }

    #[test]
    fn cache_status_tracks_download_progress() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path();
        let model = "all-MiniLM-L6-v2";

        assert_eq!(cache_status(root, "").status, ProviderStatus::Error);
        assert_eq!(cache_status(root, model).status, ProviderStatus::Missing);

        let snapshots = model_cache_dir(root, model).join("snapshots");
        std::fs::create_dir_all(&snapshots).expect("mkdir snapshots");
        assert_eq!(cache_status(root, model).status, ProviderStatus::Downloading);

        std::fs::create_dir_all(snapshots.join("abc123")).expect("mkdir snapshot");
        assert_eq!(cache_status(root, model).status, ProviderStatus::Ready);
    }

    #[test]
    fn unknown_model_reads_hidden_size_from_snapshot() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let snapshot = model_cache_dir(tmp.path(), "acme/tiny-embed")
            .join("snapshots")
            .join("rev1");
        std::fs::create_dir_all(&snapshot).expect("mkdir");
        std::fs::write(snapshot.join("config.json"), r#"{"hidden_size": 64}"#).expect("write");

        let provider = LocalProvider::new(
            spec("acme/tiny-embed"),
            tmp.path().to_path_buf(),
            CancellationToken::new(),
        )
        .expect("provider");
        assert_eq!(provider.dimension(), 64);
        assert_eq!(provider.name(), "huggingface");
    }

    #[test]
    fn unknown_model_without_snapshot_is_config_error() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let result = LocalProvider::new(
            spec("acme/unknown"),
            tmp.path().to_path_buf(),
            CancellationToken::new(),
        );
        assert!(matches!(result, Err(EmbeddingError::Config(_))));
    }

    #[tokio::test]
    async fn embedding_without_snapshot_is_unavailable() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let provider = LocalProvider::new(
            spec("all-MiniLM-L6-v2"),
            tmp.path().to_path_buf(),
            CancellationToken::new(),
        )
        .expect("provider");
        let err = provider
            .embed(&["hello".to_string()])
            .await
            .expect_err("no model on disk");
        assert!(matches!(err, EmbeddingError::Unavailable(_)));
    }

    #[test]
    fn mean_pool_ignores_padding() {
        // batch 1, seq 3, hidden 2; last token is padding
        let data = [1.0, 0.0, 3.0, 2.0, 100.0, 100.0];
        let pooled = mean_pool(&data, &[1, 1, 0], 1, 3, 2);
        assert_eq!(pooled, vec![vec![2.0, 1.0]]);
    }
}

//! `config.yaml` loading.
//!
//! Only [`GcqConfig`] leaves this module. The file may use the nested
//! schema (`warm.*`, `search.*`) or the older flat keys (`provider`,
//! `ollama_model`, `hf_model`, ...); flat keys are folded into `warm` once,
//! here, and nowhere else.

use crate::error::{DaemonError, Result};
use gcq_code_chunker::ChunkerConfig;
use gcq_search::QueryConfig;
use gcq_vector_store::embeddings::{DEFAULT_BATCH_SIZE, DEFAULT_MAX_IN_FLIGHT, DEFAULT_OLLAMA_URL};
use gcq_vector_store::{ProviderKind, ProviderSpec};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "config.yaml";
pub const DEFAULT_TCP_PORT: u16 = 9847;
pub const DEFAULT_OLLAMA_MODEL: &str = "nomic-embed-text";
pub const DEFAULT_HF_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";
pub const DEFAULT_DIRTY_THRESHOLD: usize = 20;
pub const DEFAULT_DEBOUNCE_MS: u64 = 5_000;
pub const DEFAULT_INDEXER_PARALLELISM: usize = 4;
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5_000;

/// One provider block as written in YAML. Blank means unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProviderSection {
    /// `ollama`, `openai`, `http`, `huggingface`/`local`, or `kind:model`
    pub provider: String,
    pub model: String,
    pub base_url: String,
    pub endpoint: String,
    pub token: String,
    pub dimensions: Option<usize>,
    pub batch_size: Option<usize>,
    pub max_in_flight: Option<usize>,
}

impl ProviderSection {
    /// Split a `kind:model` shorthand into its two fields.
    fn expand_shorthand(&mut self) {
        if let Some((kind, model)) = self.provider.split_once(':') {
            if self.model.trim().is_empty() {
                self.model = model.trim().to_string();
            }
            self.provider = kind.trim().to_string();
        }
    }

    /// Fill every blank field from `base`.
    fn inherit(&mut self, base: &Self) {
        fill(&mut self.provider, &base.provider);
        fill(&mut self.model, &base.model);
        fill(&mut self.base_url, &base.base_url);
        fill(&mut self.endpoint, &base.endpoint);
        fill(&mut self.token, &base.token);
        self.dimensions = self.dimensions.or(base.dimensions);
        self.batch_size = self.batch_size.or(base.batch_size);
        self.max_in_flight = self.max_in_flight.or(base.max_in_flight);
    }

    fn resolve(&self, role: &str) -> Result<ProviderSpec> {
        let kind_name = if self.provider.trim().is_empty() {
            ProviderKind::Ollama.as_str()
        } else {
            self.provider.trim()
        };
        let kind: ProviderKind = kind_name
            .parse()
            .map_err(|e| DaemonError::config(format!("{role}.provider: {e}")))?;

        let model = match (self.model.trim(), kind) {
            ("", ProviderKind::Ollama) => DEFAULT_OLLAMA_MODEL,
            ("", ProviderKind::HuggingFace) => DEFAULT_HF_MODEL,
            ("", _) => {
                return Err(DaemonError::config(format!(
                    "{role}.model is required for the {kind} provider"
                )))
            }
            (model, _) => model,
        };

        let base_url = match (non_blank(&self.base_url), kind) {
            (Some(url), _) => Some(url),
            (None, ProviderKind::Ollama) => Some(DEFAULT_OLLAMA_URL.to_string()),
            (None, ProviderKind::HuggingFace) => None,
            (None, _) => {
                return Err(DaemonError::config(format!(
                    "{role}.base_url is required for the {kind} provider"
                )))
            }
        };

        let batch_size = self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
        let max_in_flight = self.max_in_flight.unwrap_or(DEFAULT_MAX_IN_FLIGHT);
        if batch_size == 0 || max_in_flight == 0 {
            return Err(DaemonError::config(format!(
                "{role}.batch_size and {role}.max_in_flight must be positive"
            )));
        }
        if self.dimensions == Some(0) {
            return Err(DaemonError::config(format!("{role}.dimensions must be positive")));
        }

        Ok(ProviderSpec {
            kind,
            model: model.to_string(),
            base_url,
            endpoint: non_blank(&self.endpoint),
            token: non_blank(&self.token),
            dimensions: self.dimensions,
            batch_size,
            max_in_flight,
        })
    }
}

fn fill(target: &mut String, fallback: &str) {
    if target.trim().is_empty() {
        *target = fallback.to_string();
    }
}

fn non_blank(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// `config.yaml` as written, before translation and validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub warm: ProviderSection,
    pub search: ProviderSection,
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
    pub threshold_similarity: Option<f32>,
    pub threshold_min_score: Option<f32>,
    pub max_context_chunks: Option<usize>,
    pub include_context: Option<bool>,
    pub socket_path: Option<PathBuf>,
    pub tcp_port: Option<u16>,
    pub dirty_threshold: Option<usize>,
    pub debounce_ms: Option<u64>,
    pub indexer_parallelism: Option<usize>,
    pub shutdown_timeout_ms: Option<u64>,
    pub verbose: Option<bool>,

    // Flat keys from the single-provider layout
    provider: String,
    ollama_model: String,
    ollama_base_url: String,
    ollama_api_key: String,
    hf_model: String,
    hf_token: String,
}

impl FileConfig {
    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yml::from_str(text).map_err(|e| DaemonError::config(format!("invalid YAML: {e}")))
    }

    /// Fold the flat keys into `warm` wherever `warm` is blank.
    fn translate_legacy(&mut self) {
        fill(&mut self.warm.provider, &self.provider);
        self.warm.expand_shorthand();

        match self.warm.provider.trim().parse::<ProviderKind>() {
            Ok(ProviderKind::HuggingFace) => {
                fill(&mut self.warm.model, &self.hf_model);
                fill(&mut self.warm.token, &self.hf_token);
            }
            Ok(ProviderKind::Ollama) => self.fill_ollama(),
            Err(_) if self.warm.provider.trim().is_empty() => self.fill_ollama(),
            _ => {}
        }
    }

    fn fill_ollama(&mut self) {
        fill(&mut self.warm.model, &self.ollama_model);
        fill(&mut self.warm.base_url, &self.ollama_base_url);
        fill(&mut self.warm.token, &self.ollama_api_key);
    }
}

/// Validated daemon configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct GcqConfig {
    pub warm: ProviderSpec,
    pub search: ProviderSpec,
    pub chunker: ChunkerConfig,
    pub query: QueryConfig,
    pub socket_path: Option<PathBuf>,
    pub tcp_port: u16,
    pub dirty_threshold: usize,
    pub debounce: Duration,
    pub indexer_parallelism: usize,
    pub shutdown_timeout: Duration,
    pub verbose: bool,
}

impl Default for GcqConfig {
    fn default() -> Self {
        let warm = ProviderSpec {
            base_url: Some(DEFAULT_OLLAMA_URL.to_string()),
            ..ProviderSpec::new(ProviderKind::Ollama, DEFAULT_OLLAMA_MODEL)
        };
        Self {
            search: warm.clone(),
            warm,
            chunker: ChunkerConfig::default(),
            query: QueryConfig::default(),
            socket_path: None,
            tcp_port: DEFAULT_TCP_PORT,
            dirty_threshold: DEFAULT_DIRTY_THRESHOLD,
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            indexer_parallelism: DEFAULT_INDEXER_PARALLELISM,
            shutdown_timeout: Duration::from_millis(DEFAULT_SHUTDOWN_TIMEOUT_MS),
            verbose: false,
        }
    }
}

impl GcqConfig {
    /// Load `path` if it exists (it must when `required`), then apply
    /// `GCQ_*` environment overrides and validate.
    pub fn load(path: &Path, required: bool) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound && !required => String::new(),
            Err(err) => {
                return Err(DaemonError::config(format!(
                    "cannot read {}: {err}",
                    path.display()
                )))
            }
        };
        let file = FileConfig::from_yaml(&text)?;
        Self::build(file, |key| std::env::var(key).ok())
    }

    /// Translate, override from `env`, and validate.
    pub fn build(mut file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        file.translate_legacy();
        apply_env(&mut file, &env)?;

        let warm = file.warm.resolve("warm")?;
        let mut search_section = file.search.clone();
        search_section.expand_shorthand();
        search_section.inherit(&file.warm);
        let search = search_section.resolve("search")?;

        let defaults = Self::default();
        let chunker = ChunkerConfig {
            chunk_size: file.chunk_size.unwrap_or(defaults.chunker.chunk_size),
            chunk_overlap: file.chunk_overlap.unwrap_or(defaults.chunker.chunk_overlap),
        };
        chunker
            .validate()
            .map_err(|e| DaemonError::config(e.to_string()))?;

        let query = QueryConfig {
            max_context_chunks: file
                .max_context_chunks
                .unwrap_or(defaults.query.max_context_chunks),
            threshold_similarity: file
                .threshold_similarity
                .unwrap_or(defaults.query.threshold_similarity),
            threshold_min_score: file
                .threshold_min_score
                .unwrap_or(defaults.query.threshold_min_score),
            include_context: file.include_context.unwrap_or(defaults.query.include_context),
        };

        let config = Self {
            warm,
            search,
            chunker,
            query,
            socket_path: file.socket_path,
            tcp_port: file.tcp_port.unwrap_or(DEFAULT_TCP_PORT),
            dirty_threshold: file.dirty_threshold.unwrap_or(DEFAULT_DIRTY_THRESHOLD),
            debounce: Duration::from_millis(file.debounce_ms.unwrap_or(DEFAULT_DEBOUNCE_MS)),
            indexer_parallelism: file
                .indexer_parallelism
                .unwrap_or(DEFAULT_INDEXER_PARALLELISM),
            shutdown_timeout: Duration::from_millis(
                file.shutdown_timeout_ms.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_MS),
            ),
            verbose: file.verbose.unwrap_or(false),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("threshold_similarity", self.query.threshold_similarity),
            ("threshold_min_score", self.query.threshold_min_score),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(DaemonError::config(format!(
                    "{name} must be between 0 and 1, got {value}"
                )));
            }
        }
        for (name, value) in [
            ("max_context_chunks", self.query.max_context_chunks),
            ("dirty_threshold", self.dirty_threshold),
            ("indexer_parallelism", self.indexer_parallelism),
        ] {
            if value == 0 {
                return Err(DaemonError::config(format!("{name} must be positive")));
            }
        }
        Ok(())
    }

    /// Log configuration that is legal but probably unintended.
    pub fn warn_suspicious(&self) {
        if self.query.threshold_similarity == 0.0 && self.query.threshold_min_score == 0.0 {
            log::warn!(
                "threshold_similarity and threshold_min_score are both 0; every indexed chunk can match"
            );
        }
    }
}

fn apply_env(file: &mut FileConfig, env: &impl Fn(&str) -> Option<String>) -> Result<()> {
    fn parse<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
        raw.trim()
            .parse()
            .map_err(|_| DaemonError::config(format!("{key}: cannot parse '{raw}'")))
    }

    let get = |key: &str| env(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = get("GCQ_SOCKET_PATH") {
        file.socket_path = Some(PathBuf::from(v));
    }
    if let Some(v) = get("GCQ_TCP_PORT") {
        file.tcp_port = Some(parse("GCQ_TCP_PORT", &v)?);
    }
    if let Some(v) = get("GCQ_CHUNK_SIZE") {
        file.chunk_size = Some(parse("GCQ_CHUNK_SIZE", &v)?);
    }
    if let Some(v) = get("GCQ_CHUNK_OVERLAP") {
        file.chunk_overlap = Some(parse("GCQ_CHUNK_OVERLAP", &v)?);
    }
    if let Some(v) = get("GCQ_THRESHOLD_SIMILARITY") {
        file.threshold_similarity = Some(parse("GCQ_THRESHOLD_SIMILARITY", &v)?);
    }
    if let Some(v) = get("GCQ_THRESHOLD_MIN_SCORE") {
        file.threshold_min_score = Some(parse("GCQ_THRESHOLD_MIN_SCORE", &v)?);
    }
    if let Some(v) = get("GCQ_MAX_CONTEXT_CHUNKS") {
        file.max_context_chunks = Some(parse("GCQ_MAX_CONTEXT_CHUNKS", &v)?);
    }
    if let Some(v) = get("GCQ_VERBOSE") {
        file.verbose = Some(is_truthy(&v));
    }
    Ok(())
}

pub fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn build(yaml: &str) -> Result<GcqConfig> {
        GcqConfig::build(FileConfig::from_yaml(yaml)?, no_env)
    }

    #[test]
    fn empty_file_yields_defaults() {
        let config = build("").expect("defaults");
        assert_eq!(config, GcqConfig::default());
        assert_eq!(config.warm.label(), "ollama:nomic-embed-text");
        assert_eq!(config.chunker.chunk_size, 512);
        assert_eq!(config.chunker.chunk_overlap, 100);
    }

    #[test]
    fn nested_schema_with_search_fallback() {
        let config = build(
            r"
warm:
  provider: openai
  model: text-embedding-3-small
  base_url: https://api.example.com
  token: secret
search:
  model: text-embedding-3-large
chunk_size: 256
chunk_overlap: 0
",
        )
        .expect("config");

        assert_eq!(config.warm.kind, ProviderKind::OpenAi);
        assert_eq!(config.warm.token.as_deref(), Some("secret"));
        assert_eq!(config.search.kind, ProviderKind::OpenAi);
        assert_eq!(config.search.model, "text-embedding-3-large");
        assert_eq!(config.search.base_url.as_deref(), Some("https://api.example.com"));
        assert_eq!(config.chunker, ChunkerConfig { chunk_size: 256, chunk_overlap: 0 });
    }

    #[test]
    fn shorthand_sets_provider_and_model() {
        let config = build(
            r#"
warm:
  provider: "ollama:mxbai-embed-large"
search:
  provider: "huggingface:all-MiniLM-L6-v2"
"#,
        )
        .expect("config");
        assert_eq!(config.warm.label(), "ollama:mxbai-embed-large");
        assert_eq!(config.search.label(), "huggingface:all-MiniLM-L6-v2");
        assert_eq!(config.warm.base_url.as_deref(), Some(DEFAULT_OLLAMA_URL));
        assert_eq!(config.search.base_url, None);
    }

    #[test]
    fn legacy_flat_keys_are_translated() {
        let config = build(
            r"
provider: ollama
ollama_model: all-minilm
ollama_base_url: http://gpu-box:11434
ollama_api_key: k
",
        )
        .expect("config");
        assert_eq!(config.warm.model, "all-minilm");
        assert_eq!(config.warm.base_url.as_deref(), Some("http://gpu-box:11434"));
        assert_eq!(config.warm.token.as_deref(), Some("k"));
        assert_eq!(config.search, config.warm);

        let config = build("provider: huggingface\nhf_model: BAAI/bge-small-en-v1.5\nhf_token: t\n")
            .expect("config");
        assert_eq!(config.warm.kind, ProviderKind::HuggingFace);
        assert_eq!(config.warm.model, "BAAI/bge-small-en-v1.5");
        assert_eq!(config.warm.token.as_deref(), Some("t"));
    }

    #[test]
    fn nested_values_win_over_flat_keys() {
        let config = build("ollama_model: old\nwarm:\n  model: new\n").expect("config");
        assert_eq!(config.warm.model, "new");
    }

    #[test]
    fn env_overrides_file() {
        let file = FileConfig::from_yaml("chunk_size: 100\nchunk_overlap: 10\n").expect("yaml");
        let config = GcqConfig::build(file, |key| match key {
            "GCQ_CHUNK_SIZE" => Some("64".into()),
            "GCQ_THRESHOLD_SIMILARITY" => Some("0.25".into()),
            "GCQ_SOCKET_PATH" => Some("/tmp/x.sock".into()),
            "GCQ_VERBOSE" => Some("yes".into()),
            _ => None,
        })
        .expect("config");
        assert_eq!(config.chunker.chunk_size, 64);
        assert_eq!(config.chunker.chunk_overlap, 10);
        assert_eq!(config.query.threshold_similarity, 0.25);
        assert_eq!(config.socket_path, Some(PathBuf::from("/tmp/x.sock")));
        assert!(config.verbose);
    }

    #[test]
    fn invalid_values_are_config_errors() {
        for yaml in [
            "warm:\n  provider: carrier-pigeon\n",
            "warm:\n  provider: openai\n  base_url: http://x\n",
            "warm:\n  provider: http\n  model: m\n",
            "chunk_size: 10\nchunk_overlap: 10\n",
            "chunk_size: 0\n",
            "threshold_similarity: 1.5\n",
            "threshold_min_score: -0.1\n",
            "max_context_chunks: 0\n",
            "dirty_threshold: 0\n",
            "indexer_parallelism: 0\n",
            "warm: [not, a, map]\n",
        ] {
            let err = build(yaml).expect_err(yaml);
            assert_eq!(err.kind(), gcq_protocol::ErrorKind::ConfigError, "{yaml}");
        }
    }

    #[test]
    fn unparsable_env_is_config_error() {
        let err = GcqConfig::build(FileConfig::default(), |key| {
            (key == "GCQ_TCP_PORT").then(|| "ninety".to_string())
        })
        .expect_err("bad port");
        assert!(matches!(err, DaemonError::Config(_)));
    }

    #[test]
    fn required_file_must_exist() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("config.yaml");
        assert!(GcqConfig::load(&missing, true).is_err());
        assert!(GcqConfig::load(&missing, false).is_ok());
    }
}

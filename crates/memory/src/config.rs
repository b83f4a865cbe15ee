use std::path::{Path, PathBuf};

use {
    serde::{Deserialize, Serialize},
    tracing::debug,
};

use crate::error::Error;

/// Config file names checked during discovery, in order.
const CONFIG_FILENAMES: &[&str] = &["mnemo.toml", "mnemo.json"];

/// Which embedding backend produces vectors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    /// Deterministic hash vectors; no network, no semantic meaning.
    #[default]
    Local,
    /// OpenAI-compatible `/v1/embeddings` endpoint.
    OpenAi,
}

impl EmbeddingProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::OpenAi => "openai",
        }
    }
}

/// Configuration for the memory subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Path to the SQLite database file (or `:memory:` for tests).
    pub db_path: String,
    /// Directories to scan for markdown files.
    pub source_dirs: Vec<PathBuf>,
    /// Maximum chunk length in characters.
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks.
    pub chunk_overlap: usize,
    pub embedding_provider: EmbeddingProviderKind,
    pub embedding_model: String,
    /// API key for the remote provider. Falls back to `OPENAI_API_KEY` when loading from file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_api_key: Option<String>,
    pub embedding_base_url: String,
    /// Vector length; the remote model must produce this many components.
    pub embedding_dimensions: usize,
    /// Default number of results returned by `search`.
    pub top_k: usize,
    /// Re-sync dirty sources at conversation-turn start.
    pub sync_on_session_start: bool,
    /// Weight for vector similarity in hybrid search (0.0–1.0).
    pub vector_weight: f64,
    /// Weight for keyword similarity in hybrid search (0.0–1.0).
    pub keyword_weight: f64,
    /// Per-request timeout for remote embedding calls.
    pub request_timeout_secs: u64,
    /// Retries after the first attempt for transient remote failures.
    pub max_retries: u32,
    /// Texts longer than this are truncated before being sent to the remote provider.
    pub max_chunk_chars: usize,
    pub mmr: MmrConfig,
    pub decay: DecayConfig,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: "memory.db".into(),
            source_dirs: vec![PathBuf::from("memory")],
            chunk_size: 1600,
            chunk_overlap: 320,
            embedding_provider: EmbeddingProviderKind::Local,
            embedding_model: "text-embedding-3-small".into(),
            embedding_api_key: None,
            embedding_base_url: "https://api.openai.com".into(),
            embedding_dimensions: 1536,
            top_k: 6,
            sync_on_session_start: true,
            vector_weight: 0.7,
            keyword_weight: 0.3,
            request_timeout_secs: 30,
            max_retries: 2,
            max_chunk_chars: 8000,
            mmr: MmrConfig::default(),
            decay: DecayConfig::default(),
        }
    }
}

/// Maximal-marginal-relevance reranking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MmrConfig {
    pub enabled: bool,
    /// 1.0 = pure relevance, 0.0 = pure diversity.
    pub lambda: f64,
    /// Penalty per already-selected result from the same source.
    pub source_penalty_weight: f64,
    /// Same-source count after which the penalty slope doubles.
    pub max_per_source_soft: usize,
    /// Token-overlap (Jaccard) above which a candidate is treated as a near duplicate.
    pub similarity_threshold: f64,
}

impl Default for MmrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lambda: 0.7,
            source_penalty_weight: 0.05,
            max_per_source_soft: 2,
            similarity_threshold: 0.8,
        }
    }
}

/// Age-based score decay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    pub enabled: bool,
    /// Half-life for queries with no (or mixed) temporal intent.
    pub half_life_days: f64,
    /// Half-life for "what's the latest" style queries.
    pub temporal_half_life_days: f64,
    /// Half-life for stable facts (birthdays, preferences).
    pub evergreen_half_life_days: f64,
    /// Floor for the multiplier so old facts are never zeroed out.
    pub min_multiplier: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            half_life_days: 30.0,
            temporal_half_life_days: 7.0,
            evergreen_half_life_days: 365.0,
            min_multiplier: 0.2,
        }
    }
}

impl MemoryConfig {
    /// Check invariants that the rest of the engine relies on.
    pub fn validate(&self) -> Result<(), Error> {
        if self.chunk_size == 0 {
            return Err(Error::config("chunk_size must be greater than zero"));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(Error::config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.embedding_dimensions == 0 {
            return Err(Error::config("embedding_dimensions must be greater than zero"));
        }
        if self.max_chunk_chars == 0 {
            return Err(Error::config("max_chunk_chars must be greater than zero"));
        }
        for (name, value) in [
            ("vector_weight", self.vector_weight),
            ("keyword_weight", self.keyword_weight),
            ("mmr.lambda", self.mmr.lambda),
            ("mmr.similarity_threshold", self.mmr.similarity_threshold),
            ("decay.min_multiplier", self.decay.min_multiplier),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::config(format!("{name} must be within 0.0..=1.0, got {value}")));
            }
        }
        if self.mmr.source_penalty_weight < 0.0 {
            return Err(Error::config("mmr.source_penalty_weight must not be negative"));
        }
        if self.mmr.max_per_source_soft == 0 {
            return Err(Error::config("mmr.max_per_source_soft must be at least 1"));
        }
        for (name, value) in [
            ("decay.half_life_days", self.decay.half_life_days),
            ("decay.temporal_half_life_days", self.decay.temporal_half_life_days),
            ("decay.evergreen_half_life_days", self.decay.evergreen_half_life_days),
        ] {
            if value.is_nan() || value <= 0.0 {
                return Err(Error::config(format!("{name} must be positive, got {value}")));
            }
        }
        Ok(())
    }

    /// Load and validate a config file (`.toml` or `.json`).
    ///
    /// `${VAR}` placeholders are substituted from the environment before parsing,
    /// and a missing `embedding_api_key` falls back to `OPENAI_API_KEY`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        let raw = substitute_env(&raw, |name| std::env::var(name).ok());
        let mut config = parse_config(&raw, path)?;
        if config.embedding_api_key.is_none() {
            config.embedding_api_key = std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|k| !k.is_empty());
        }
        config.validate()?;
        debug!(path = %path.display(), "loaded memory config");
        Ok(config)
    }

    /// Find the first config file in standard locations.
    ///
    /// Search order: `./mnemo.{toml,json}`, then `~/.config/mnemo/mnemo.{toml,json}`.
    pub fn discover() -> Option<PathBuf> {
        let local = CONFIG_FILENAMES.iter().map(PathBuf::from);
        let global = directories::BaseDirs::new()
            .map(|d| d.home_dir().join(".config").join("mnemo"))
            .into_iter()
            .flat_map(|dir| CONFIG_FILENAMES.iter().map(move |n| dir.join(n)));
        local.chain(global).find(|p| p.exists())
    }
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<MemoryConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

/// Replace `${VAR}` placeholders using `lookup`; unresolvable ones are left as-is.
fn substitute_env(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' || chars.peek() != Some(&'{') {
            result.push(ch);
            continue;
        }
        chars.next();
        let mut name = String::new();
        let mut closed = false;
        for c in chars.by_ref() {
            if c == '}' {
                closed = true;
                break;
            }
            name.push(c);
        }
        match (closed && !name.is_empty()).then(|| lookup(&name)).flatten() {
            Some(value) => result.push_str(&value),
            None => {
                result.push_str("${");
                result.push_str(&name);
                if closed {
                    result.push('}');
                }
            },
        }
    }

    result
}

//! Configuration module for the job matcher.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file (`.jobmatch/settings.toml`)
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `JM_` and use double underscores
//! to separate nested levels:
//! - `JM_INDEX__KIND=flat` sets `index.kind`
//! - `JM_SEARCH__NPROBE=16` sets `search.nprobe`
//! - `JM_EMBEDDING__BATCH_SIZE=64` sets `embedding.batch_size`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory holding settings, the job database and the index.
pub const CONFIG_DIR: &str = ".jobmatch";

/// Prefix for environment overrides.
const ENV_PREFIX: &str = "JM_";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Directory relative paths are resolved against (where .jobmatch is located)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    /// Worker threads for embedding and index training
    #[serde(default = "default_threads")]
    pub threads: usize,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// How inputs longer than the model window are handled.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LongTextStrategy {
    /// Let the tokenizer cut the text at `max_length` tokens.
    Truncate,
    /// Embed fixed-size character chunks and average them.
    ChunkMean,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EmbeddingConfig {
    /// fastembed model name
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Where downloaded model files are cached
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Postings embedded per model call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Token window passed to the tokenizer
    #[serde(default = "default_max_length")]
    pub max_length: usize,

    #[serde(default = "default_long_text")]
    pub long_text: LongTextStrategy,

    /// Chunk size in characters for `chunk_mean`
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,

    #[serde(default = "default_true")]
    pub show_download_progress: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StoreConfig {
    /// SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

/// Which index structure a build produces.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IndexKindSetting {
    /// IVF-PQ; builds fail below `min_training_vectors`
    Ivfpq,
    /// Exhaustive search, never trained
    Flat,
    /// IVF-PQ when there is enough data, flat otherwise
    Auto,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct IndexConfig {
    /// Directory holding the index artifact
    #[serde(default = "default_index_path")]
    pub path: PathBuf,

    #[serde(default = "default_index_kind")]
    pub kind: IndexKindSetting,

    /// Fewest embeddings an IVF-PQ index is trained on
    #[serde(default = "default_vectors_per_cluster")]
    pub min_training_vectors: usize,

    /// Target corpus size per coarse cluster
    #[serde(default = "default_vectors_per_cluster")]
    pub vectors_per_cluster: usize,

    #[serde(default = "default_min_clusters")]
    pub min_clusters: usize,

    #[serde(default = "default_max_clusters")]
    pub max_clusters: usize,

    /// Upper bound on PQ sub-quantizers; the actual count divides the dimension
    #[serde(default = "default_subquantizers")]
    pub subquantizers: usize,

    /// Bits per PQ code (codebook size is 2^bits, at most 8)
    #[serde(default = "default_quantization_bits")]
    pub quantization_bits: u32,

    /// Training sample cap for very large corpora
    #[serde(default = "default_max_training_sample")]
    pub max_training_sample: usize,

    #[serde(default = "default_kmeans_iterations")]
    pub kmeans_iterations: usize,

    /// Seed for sampling and k-means initialization
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Cells probed per query, capped at the cluster count
    #[serde(default = "default_nprobe")]
    pub default_nprobe: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SearchConfig {
    /// Overrides the nprobe stored in the index
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nprobe: Option<usize>,

    /// Initial candidate window as a multiple of top_k
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,

    /// Results per page when the CLI is not given --limit
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    /// Ranked results that paged searches are cut from
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_threads() -> usize {
    num_cpus::get()
}
fn default_true() -> bool {
    true
}
fn default_embedding_model() -> String {
    "AllMiniLML6V2".to_string()
}
fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("jobmatch").join("models"))
        .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join("models"))
}
fn default_batch_size() -> usize {
    32
}
fn default_max_length() -> usize {
    512
}
fn default_long_text() -> LongTextStrategy {
    LongTextStrategy::Truncate
}
fn default_chunk_chars() -> usize {
    512
}
fn default_database_path() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("jobs.db")
}
fn default_index_path() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("index")
}
fn default_index_kind() -> IndexKindSetting {
    IndexKindSetting::Ivfpq
}
fn default_vectors_per_cluster() -> usize {
    39
}
fn default_min_clusters() -> usize {
    4
}
fn default_max_clusters() -> usize {
    256
}
fn default_subquantizers() -> usize {
    8
}
fn default_quantization_bits() -> u32 {
    8
}
fn default_max_training_sample() -> usize {
    65_536
}
fn default_kmeans_iterations() -> usize {
    25
}
fn default_seed() -> u64 {
    42
}
fn default_nprobe() -> usize {
    8
}
fn default_candidate_multiplier() -> usize {
    2
}
fn default_top_k() -> usize {
    10
}
fn default_max_results() -> usize {
    200
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            workspace_root: None,
            threads: default_threads(),
            embedding: EmbeddingConfig::default(),
            store: StoreConfig::default(),
            index: IndexConfig::default(),
            search: SearchConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            cache_dir: default_cache_dir(),
            batch_size: default_batch_size(),
            max_length: default_max_length(),
            long_text: default_long_text(),
            chunk_chars: default_chunk_chars(),
            show_download_progress: true,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
            kind: default_index_kind(),
            min_training_vectors: default_vectors_per_cluster(),
            vectors_per_cluster: default_vectors_per_cluster(),
            min_clusters: default_min_clusters(),
            max_clusters: default_max_clusters(),
            subquantizers: default_subquantizers(),
            quantization_bits: default_quantization_bits(),
            max_training_sample: default_max_training_sample(),
            kmeans_iterations: default_kmeans_iterations(),
            seed: default_seed(),
            default_nprobe: default_nprobe(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            nprobe: None,
            candidate_multiplier: default_candidate_multiplier(),
            default_top_k: default_top_k(),
            max_results: default_max_results(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join("settings.toml"));

        Self::layered(&config_path, ENV_PREFIX).map(|mut settings| {
            if settings.workspace_root.is_none() {
                settings.workspace_root = Self::workspace_root();
            }
            settings
        })
    }

    /// Load configuration from a specific file, still honouring `JM_` overrides
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Self::layered(path.as_ref(), ENV_PREFIX)
    }

    fn layered(path: &Path, env_prefix: &str) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            // double underscore separates nesting; single underscores stay in field names
            .merge(Env::prefixed(env_prefix).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Find the workspace config by looking for a .jobmatch directory
    /// from the current directory up to the filesystem root
    fn find_workspace_config() -> Option<PathBuf> {
        Self::workspace_root().map(|root| root.join(CONFIG_DIR).join("settings.toml"))
    }

    /// Get the workspace root directory (where .jobmatch is located)
    pub fn workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        current
            .ancestors()
            .find(|ancestor| ancestor.join(CONFIG_DIR).is_dir())
            .map(Path::to_path_buf)
    }

    /// Resolves a configured path against the workspace root.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        match &self.workspace_root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.resolve_path(&self.store.database_path)
    }

    pub fn index_dir(&self) -> PathBuf {
        self.resolve_path(&self.index.path)
    }

    pub fn model_cache_dir(&self) -> PathBuf {
        self.resolve_path(&self.embedding.cache_dir)
    }

    /// Checks values the type system cannot.
    pub fn validate(&self) -> Result<(), String> {
        if self.embedding.batch_size == 0 {
            return Err("embedding.batch_size must be at least 1".to_string());
        }
        if self.embedding.chunk_chars == 0 {
            return Err("embedding.chunk_chars must be at least 1".to_string());
        }
        if !(1..=8).contains(&self.index.quantization_bits) {
            return Err("index.quantization_bits must be between 1 and 8".to_string());
        }
        if self.index.subquantizers == 0 {
            return Err("index.subquantizers must be at least 1".to_string());
        }
        if self.index.min_clusters == 0 || self.index.min_clusters > self.index.max_clusters {
            return Err("index.min_clusters must be between 1 and index.max_clusters".to_string());
        }
        if self.index.vectors_per_cluster == 0 {
            return Err("index.vectors_per_cluster must be at least 1".to_string());
        }
        if self.index.min_training_vectors == 0 {
            return Err("index.min_training_vectors must be at least 1".to_string());
        }
        if self.index.default_nprobe == 0 || self.search.nprobe == Some(0) {
            return Err("nprobe must be at least 1".to_string());
        }
        if self.search.max_results == 0 {
            return Err("search.max_results must be at least 1".to_string());
        }
        if self.search.candidate_multiplier == 0 {
            return Err("search.candidate_multiplier must be at least 1".to_string());
        }
        Ok(())
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file with helpful comments
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        Self::write_template(Path::new(CONFIG_DIR), force)
    }

    fn write_template(config_dir: &Path, force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = config_dir.join("settings.toml");

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        std::fs::create_dir_all(config_dir)?;

        let template = format!(
            r#"# jobmatch configuration
# Relative paths are resolved against the directory containing .jobmatch/.
# Any key can be overridden with JM_<SECTION>__<KEY>, e.g. JM_INDEX__KIND=flat

version = 1

# Worker threads for embedding and index training (defaults to CPU count)
# threads = {threads}

[embedding]
# fastembed model; changing it requires a rebuild (jobmatch build)
model = "AllMiniLML6V2"
# cache_dir = "{cache_dir}"
batch_size = 32
# Token window; longer descriptions are truncated
max_length = 512
# "truncate" or "chunk_mean" (average of {chunk}-character chunks)
long_text = "truncate"
chunk_chars = {chunk}
show_download_progress = true

[store]
database_path = ".jobmatch/jobs.db"

[index]
path = ".jobmatch/index"
# "ivfpq", "flat" or "auto" (flat below min_training_vectors)
kind = "ivfpq"
min_training_vectors = 39
vectors_per_cluster = 39
min_clusters = 4
max_clusters = 256
subquantizers = 8
quantization_bits = 8
max_training_sample = 65536
kmeans_iterations = 25
seed = 42
default_nprobe = 8

[search]
# nprobe = 8
candidate_multiplier = 2
default_top_k = 10
# Pages are cut from this many ranked results
max_results = 200

[logging]
# Overridden by RUST_LOG when set
level = "info"
"#,
            threads = default_threads(),
            cache_dir = default_cache_dir().display(),
            chunk = default_chunk_chars(),
        );

        std::fs::write(&config_path, template)?;
        Ok(config_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.store.database_path, PathBuf::from(".jobmatch/jobs.db"));
        assert_eq!(settings.index.path, PathBuf::from(".jobmatch/index"));
        assert_eq!(settings.index.kind, IndexKindSetting::Ivfpq);
        assert_eq!(settings.index.min_training_vectors, 39);
        assert_eq!(settings.embedding.long_text, LongTextStrategy::Truncate);
        assert_eq!(settings.search.max_results, 200);
        assert!(settings.threads > 0);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        let toml_content = r#"
[embedding]
model = "BGESmallENV15"
long_text = "chunk_mean"

[index]
kind = "auto"
max_clusters = 64

[search]
nprobe = 12
"#;
        fs::write(&config_path, toml_content).unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.embedding.model, "BGESmallENV15");
        assert_eq!(settings.embedding.long_text, LongTextStrategy::ChunkMean);
        assert_eq!(settings.index.kind, IndexKindSetting::Auto);
        assert_eq!(settings.index.max_clusters, 64);
        assert_eq!(settings.search.nprobe, Some(12));
        // untouched values keep defaults
        assert_eq!(settings.index.seed, 42);
        assert_eq!(settings.embedding.batch_size, 32);
    }

    #[test]
    fn test_save_settings() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        let mut settings = Settings::default();
        settings.index.kind = IndexKindSetting::Flat;
        settings.search.candidate_multiplier = 4;

        settings.save(&config_path).unwrap();

        let loaded = Settings::load_from(&config_path).unwrap();
        assert_eq!(loaded.index.kind, IndexKindSetting::Flat);
        assert_eq!(loaded.search.candidate_multiplier, 4);
    }

    #[test]
    fn test_env_overrides_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");
        fs::write(
            &config_path,
            "[index]\ndefault_nprobe = 4\nkind = \"flat\"\n",
        )
        .unwrap();

        // private prefix so parallel tests never observe it
        unsafe {
            std::env::set_var("JMTEST_ENV_INDEX__DEFAULT_NPROBE", "16");
            std::env::set_var("JMTEST_ENV_SEARCH__CANDIDATE_MULTIPLIER", "3");
        }

        let settings = Settings::layered(&config_path, "JMTEST_ENV_").unwrap();
        assert_eq!(settings.index.default_nprobe, 16);
        assert_eq!(settings.search.candidate_multiplier, 3);
        assert_eq!(settings.index.kind, IndexKindSetting::Flat);

        unsafe {
            std::env::remove_var("JMTEST_ENV_INDEX__DEFAULT_NPROBE");
            std::env::remove_var("JMTEST_ENV_SEARCH__CANDIDATE_MULTIPLIER");
        }
    }

    #[test]
    fn test_template_parses() {
        let temp_dir = TempDir::new().unwrap();
        let config_dir = temp_dir.path().join(CONFIG_DIR);

        let path = Settings::write_template(&config_dir, false).unwrap();
        assert!(Settings::write_template(&config_dir, false).is_err());
        assert!(Settings::write_template(&config_dir, true).is_ok());

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.index.kind, IndexKindSetting::Ivfpq);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut settings = Settings::default();
        settings.index.quantization_bits = 9;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.search.nprobe = Some(0);
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.index.min_clusters = 300;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.search.max_results = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_resolve_path() {
        let settings = Settings {
            workspace_root: Some(PathBuf::from("/srv/jobs")),
            ..Settings::default()
        };
        assert_eq!(
            settings.database_path(),
            PathBuf::from("/srv/jobs/.jobmatch/jobs.db")
        );
        assert_eq!(
            settings.resolve_path(Path::new("/abs/index")),
            PathBuf::from("/abs/index")
        );
    }
}

//! Environment-driven runtime configuration.
//!
//! Configuration is loaded once at process start (`init_config`) and cached
//! in a `OnceLock`; a `.env` file is honored when present.
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the Taonga pipeline server and workers.
#[derive(Debug)]
pub struct Config {
    /// Whether runs execute in the caller's context or via broker lanes.
    pub execution_mode: ExecutionMode,
    /// Base URL of the queue broker (required in distributed mode).
    pub broker_url: Option<String>,
    /// Base URL of the durable job tracking service; defaults to the broker
    /// URL so a single coordination service can host both.
    pub job_store_url: Option<String>,
    /// Base URL of the vector store that receives chunk embeddings.
    pub vector_store_url: String,
    /// Vector store collection used for chunk storage.
    pub vector_collection_name: String,
    /// Optional API key required by the vector store.
    pub vector_store_api_key: Option<String>,
    /// Base URL of the embedding provider; unset selects the deterministic client.
    pub embedding_url: Option<String>,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Base URL of the remote object store; unset keeps artifacts local only.
    pub object_store_url: Option<String>,
    /// Root directory for local artifact persistence.
    pub storage_root: PathBuf,
    /// Base URL of the vision OCR fallback service.
    pub ocr_fallback_url: Option<String>,
    /// Path to the tesseract binary for offline OCR.
    pub tesseract_path: Option<String>,
    /// Summarization provider selection.
    pub summary_provider: SummaryProvider,
    /// Base URL override for the Ollama summarization runtime.
    pub ollama_url: Option<String>,
    /// Model used for summary generation.
    pub summary_model: String,
    /// Maximum number of PDF pages scanned per document.
    pub max_pdf_pages: usize,
    /// Maximum character budget per text chunk.
    pub chunk_char_budget: usize,
    /// Maximum inline data-URI images OCR'd per markup document.
    pub max_inline_image_ocr: usize,
    /// Maximum automatic retries for a failed distributed-mode job.
    pub max_job_retries: u32,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
    /// Optional per-lane timeout overrides, in seconds.
    pub lane_timeout_secs: LaneOverrides,
    /// Optional per-lane result retention overrides, in seconds.
    pub lane_retention_secs: LaneOverrides,
}

/// Per-lane duration overrides loaded from the environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct LaneOverrides {
    /// Override for the `urgent` lane.
    pub urgent: Option<u64>,
    /// Override for the `default` lane.
    pub default: Option<u64>,
    /// Override for the `slow` lane.
    pub slow: Option<u64>,
    /// Override for the `dead` lane.
    pub dead: Option<u64>,
}

/// Execution substrate for pipeline runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Run the pipeline synchronously in the caller's context, no broker.
    Embedded,
    /// Hand jobs to broker lanes consumed by separate worker processes.
    Distributed,
}

/// Supported summarization backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SummaryProvider {
    /// Summaries disabled; run summaries stay null.
    None,
    /// Local Ollama runtime.
    Ollama,
}

const DEFAULT_MAX_PDF_PAGES: usize = 10;
const DEFAULT_CHUNK_CHAR_BUDGET: usize = 800;
const DEFAULT_MAX_INLINE_IMAGE_OCR: usize = 5;
const DEFAULT_MAX_JOB_RETRIES: u32 = 3;

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let execution_mode = match load_env_optional("EXECUTION_MODE") {
            Some(value) => value
                .parse()
                .map_err(|()| ConfigError::InvalidValue("EXECUTION_MODE".to_string()))?,
            None => ExecutionMode::Embedded,
        };
        let broker_url = load_env_optional("BROKER_URL");
        if execution_mode == ExecutionMode::Distributed && broker_url.is_none() {
            return Err(ConfigError::MissingVariable("BROKER_URL".to_string()));
        }

        Ok(Self {
            execution_mode,
            broker_url,
            job_store_url: load_env_optional("JOB_STORE_URL"),
            vector_store_url: load_env("VECTOR_STORE_URL")?,
            vector_collection_name: load_env("VECTOR_COLLECTION_NAME")?,
            vector_store_api_key: load_env_optional("VECTOR_STORE_API_KEY"),
            embedding_url: load_env_optional("EMBEDDING_URL"),
            embedding_model: load_env("EMBEDDING_MODEL")?,
            embedding_dimension: load_env("EMBEDDING_DIMENSION")?
                .parse()
                .map_err(|_| ConfigError::InvalidValue("EMBEDDING_DIMENSION".to_string()))?,
            object_store_url: load_env_optional("OBJECT_STORE_URL"),
            storage_root: load_env_optional("STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data")),
            ocr_fallback_url: load_env_optional("OCR_FALLBACK_URL"),
            tesseract_path: load_env_optional("TESSERACT_PATH"),
            summary_provider: match load_env_optional("SUMMARY_PROVIDER") {
                Some(value) => value
                    .parse()
                    .map_err(|()| ConfigError::InvalidValue("SUMMARY_PROVIDER".to_string()))?,
                None => SummaryProvider::None,
            },
            ollama_url: load_env_optional("OLLAMA_URL"),
            summary_model: load_env_optional("SUMMARY_MODEL")
                .unwrap_or_else(|| "llama3.2".to_string()),
            max_pdf_pages: load_env_usize("MAX_PDF_PAGES", DEFAULT_MAX_PDF_PAGES)?,
            chunk_char_budget: load_env_usize("CHUNK_CHAR_BUDGET", DEFAULT_CHUNK_CHAR_BUDGET)?,
            max_inline_image_ocr: load_env_usize(
                "MAX_INLINE_IMAGE_OCR",
                DEFAULT_MAX_INLINE_IMAGE_OCR,
            )?,
            max_job_retries: load_env_optional("MAX_JOB_RETRIES")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("MAX_JOB_RETRIES".to_string()))
                })
                .transpose()?
                .unwrap_or(DEFAULT_MAX_JOB_RETRIES),
            server_port: load_env_optional("SERVER_PORT")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".into()))
                })
                .transpose()?,
            lane_timeout_secs: load_lane_overrides("TIMEOUT")?,
            lane_retention_secs: load_lane_overrides("RETENTION")?,
        })
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn load_env_usize(key: &str, default: usize) -> Result<usize, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
        .map(|value| value.unwrap_or(default))
}

fn load_lane_overrides(suffix: &str) -> Result<LaneOverrides, ConfigError> {
    let mut overrides = LaneOverrides::default();
    for (lane, slot) in [
        ("URGENT", &mut overrides.urgent),
        ("DEFAULT", &mut overrides.default),
        ("SLOW", &mut overrides.slow),
        ("DEAD", &mut overrides.dead),
    ] {
        let key = format!("LANE_{lane}_{suffix}_SECS");
        *slot = load_env_optional(&key)
            .map(|value| {
                value
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue(key.clone()))
            })
            .transpose()?;
    }
    Ok(overrides)
}

impl std::str::FromStr for ExecutionMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "embedded" | "inline" => Ok(Self::Embedded),
            "distributed" | "queue" => Ok(Self::Distributed),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for SummaryProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "ollama" => Ok(Self::Ollama),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        mode = ?config.execution_mode,
        vector_store = %config.vector_store_url,
        collection = %config.vector_collection_name,
        server_port = ?config.server_port,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_mode_parses_aliases() {
        assert_eq!(
            "inline".parse::<ExecutionMode>(),
            Ok(ExecutionMode::Embedded)
        );
        assert_eq!(
            "DISTRIBUTED".parse::<ExecutionMode>(),
            Ok(ExecutionMode::Distributed)
        );
        assert!("turbo".parse::<ExecutionMode>().is_err());
    }

    #[test]
    fn summary_provider_parses_known_values() {
        assert_eq!("none".parse::<SummaryProvider>(), Ok(SummaryProvider::None));
        assert_eq!(
            "Ollama".parse::<SummaryProvider>(),
            Ok(SummaryProvider::Ollama)
        );
    }
}

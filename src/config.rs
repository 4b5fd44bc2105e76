//! Configuration
//!
//! One immutable `Config` is built at process start (defaults, then `.env` /
//! environment overrides), validated eagerly and shared by reference with
//! every component.

use crate::error::{Result, SageError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl LlmConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string; takes precedence over `data_dir`
    pub url: Option<String>,
    /// Directory holding CSV/Parquet files for the embedded engine
    pub data_dir: Option<PathBuf>,
    pub schema_path: PathBuf,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    pub sql_threshold: f64,
    pub lookup_threshold: f64,
    /// Below this best score the question is fanned out to several agents
    pub multi_agent_threshold: f64,
    /// Minimum score for an agent to be considered in multi-agent mode
    pub multi_agent_floor: f64,
    pub max_parallel_agents: usize,
    pub agent_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            sql_threshold: 0.7,
            lookup_threshold: 0.7,
            multi_agent_threshold: 0.6,
            multi_agent_floor: 0.2,
            max_parallel_agents: 3,
            agent_timeout: Duration::from_secs(45),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Preview cap (P)
    pub preview_rows: usize,
    /// Counting ceiling (MAX_CACHE_ROWS)
    pub max_cache_rows: u64,
    pub retention: Duration,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            preview_rows: 20,
            max_cache_rows: 100,
            retention: Duration::from_secs(60 * 60),
            max_entries: 512,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    pub token_budget: usize,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self { token_budget: 2000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub llm: LlmConfig,
    pub database: DatabaseConfig,
    pub router: RouterConfig,
    pub cache: CacheConfig,
    pub synthesis: SynthesisConfig,
}

impl Config {
    /// Defaults for everything except the model credentials.
    pub fn new(llm: LlmConfig) -> Self {
        Self {
            llm,
            database: DatabaseConfig {
                schema_path: PathBuf::from("metadata/schema.json"),
                max_connections: 5,
                ..DatabaseConfig::default()
            },
            router: RouterConfig::default(),
            cache: CacheConfig::default(),
            synthesis: SynthesisConfig::default(),
        }
    }

    /// Build from `.env` and the process environment, then validate.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| SageError::Config("OPENAI_API_KEY is not set".to_string()))?;
        let mut config = Config::new(LlmConfig::new(api_key));

        if let Ok(model) = std::env::var("OPENAI_MODEL") {
            config.llm.model = model;
        }
        if let Ok(base_url) = std::env::var("OPENAI_BASE_URL") {
            config.llm.base_url = base_url;
        }
        if let Some(secs) = env_parse::<u64>("SQLSAGE_LLM_TIMEOUT_SECS")? {
            config.llm.timeout = Duration::from_secs(secs);
        }

        config.database.url = std::env::var("DATABASE_URL").ok();
        config.database.data_dir = std::env::var("SQLSAGE_DATA_DIR").ok().map(PathBuf::from);
        if let Ok(path) = std::env::var("SQLSAGE_SCHEMA_PATH") {
            config.database.schema_path = PathBuf::from(path);
        }

        let router = &mut config.router;
        override_with(&mut router.sql_threshold, "SQLSAGE_SQL_THRESHOLD")?;
        override_with(&mut router.lookup_threshold, "SQLSAGE_LOOKUP_THRESHOLD")?;
        override_with(&mut router.multi_agent_threshold, "SQLSAGE_MULTI_AGENT_THRESHOLD")?;
        override_with(&mut router.multi_agent_floor, "SQLSAGE_MULTI_AGENT_FLOOR")?;
        override_with(&mut router.max_parallel_agents, "SQLSAGE_MAX_PARALLEL_AGENTS")?;
        if let Some(secs) = env_parse::<u64>("SQLSAGE_AGENT_TIMEOUT_SECS")? {
            router.agent_timeout = Duration::from_secs(secs);
        }

        let cache = &mut config.cache;
        override_with(&mut cache.preview_rows, "SQLSAGE_PREVIEW_ROWS")?;
        override_with(&mut cache.max_cache_rows, "SQLSAGE_MAX_CACHE_ROWS")?;
        override_with(&mut cache.max_entries, "SQLSAGE_CACHE_MAX_ENTRIES")?;
        if let Some(secs) = env_parse::<u64>("SQLSAGE_CACHE_RETENTION_SECS")? {
            cache.retention = Duration::from_secs(secs);
        }

        override_with(&mut config.synthesis.token_budget, "SQLSAGE_TOKEN_BUDGET")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.llm.api_key.trim().is_empty() {
            return Err(SageError::Config("LLM api key is empty".to_string()));
        }
        if self.llm.timeout.is_zero() {
            return Err(SageError::Config("LLM timeout must be positive".to_string()));
        }

        let r = &self.router;
        for (name, value) in [
            ("sql_threshold", r.sql_threshold),
            ("lookup_threshold", r.lookup_threshold),
            ("multi_agent_threshold", r.multi_agent_threshold),
            ("multi_agent_floor", r.multi_agent_floor),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SageError::Config(format!("{} must be within [0, 1], got {}", name, value)));
            }
        }
        if r.multi_agent_threshold > r.sql_threshold || r.multi_agent_threshold > r.lookup_threshold {
            return Err(SageError::Config(format!(
                "multi_agent_threshold ({}) must not exceed the sql ({}) or lookup ({}) thresholds",
                r.multi_agent_threshold, r.sql_threshold, r.lookup_threshold
            )));
        }
        if r.max_parallel_agents == 0 {
            return Err(SageError::Config("max_parallel_agents must be at least 1".to_string()));
        }
        if r.agent_timeout.is_zero() {
            return Err(SageError::Config("agent_timeout must be positive".to_string()));
        }

        let c = &self.cache;
        if c.preview_rows == 0 || c.preview_rows as u64 > c.max_cache_rows {
            return Err(SageError::Config(format!(
                "preview_rows ({}) must be between 1 and max_cache_rows ({})",
                c.preview_rows, c.max_cache_rows
            )));
        }
        if c.max_entries == 0 {
            return Err(SageError::Config("cache max_entries must be at least 1".to_string()));
        }

        if self.synthesis.token_budget == 0 {
            return Err(SageError::Config("token_budget must be positive".to_string()));
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| SageError::Config(format!("{}={:?}: {}", key, raw, e))),
        Err(_) => Ok(None),
    }
}

fn override_with<T: FromStr>(slot: &mut T, key: &str) -> Result<()>
where
    T::Err: std::fmt::Display,
{
    if let Some(value) = env_parse::<T>(key)? {
        *slot = value;
    }
    Ok(())
}

//! Configuration resolution for threadlens-annotator
//!
//! Priority, highest first: command line → environment → TOML file → default.
//!
//! ```toml
//! database_path = "/var/lib/threadlens/threadlens.db"
//!
//! [oracle]
//! endpoint = "https://generativelanguage.googleapis.com/v1beta"
//! model = "gemini-2.0-flash"
//! api_key = "..."
//! request_timeout_secs = 60
//!
//! [retry]
//! max_attempts = 3
//! base_delay_ms = 1500
//!
//! [sentiment]
//! contract_version = "sentiment_v0.2"
//! batch_limit = 300
//!
//! [explain]
//! contract_version = "thread_state_v0.1"
//! batch_limit = 50
//!
//! [logging]
//! level = "info"
//! ```

use crate::oracle::gemini::{DEFAULT_ENDPOINT, DEFAULT_MODEL};
use crate::oracle::retry::{RetryPolicy, DEFAULT_BASE_DELAY, MAX_RETRIES};
use crate::tasks::{sentiment, status_explain};
use serde::Deserialize;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use threadlens_common::config::{default_data_dir, load_toml, resolve_config_file};
use threadlens_common::{Error, Result};
use tracing::info;

pub const CONFIG_ENV_VAR: &str = "THREADLENS_CONFIG";
pub const CONFIG_FILE_NAME: &str = "annotator.toml";

const ENV_DATABASE: &str = "THREADLENS_DATABASE";
const ENV_ORACLE_ENDPOINT: &str = "THREADLENS_ORACLE_ENDPOINT";
const ENV_ORACLE_MODEL: &str = "THREADLENS_ORACLE_MODEL";
const ENV_ORACLE_API_KEY: &str = "THREADLENS_ORACLE_API_KEY";
const ENV_SENTIMENT_BATCH_LIMIT: &str = "THREADLENS_SENTIMENT_BATCH_LIMIT";
const ENV_EXPLAIN_BATCH_LIMIT: &str = "THREADLENS_EXPLAIN_BATCH_LIMIT";

const DEFAULT_SENTIMENT_BATCH_LIMIT: usize = 300;
const DEFAULT_EXPLAIN_BATCH_LIMIT: usize = 50;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
const DEFAULT_DATABASE_FILE: &str = "threadlens.db";

/// On-disk TOML layout; every key optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub database_path: Option<PathBuf>,
    pub oracle: OracleSection,
    pub retry: RetrySection,
    pub sentiment: TaskSection,
    pub explain: TaskSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OracleSection {
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySection {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TaskSection {
    pub contract_version: Option<String>,
    pub batch_limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    pub level: Option<String>,
}

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
    /// Applies to every task the invocation runs
    pub batch_limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OracleSettings {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskSettings {
    pub contract_version: String,
    pub batch_limit: NonZeroUsize,
}

/// Fully resolved and validated configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatorConfig {
    pub database_path: PathBuf,
    pub oracle: OracleSettings,
    pub retry: RetryPolicy,
    pub sentiment: TaskSettings,
    pub explain: TaskSettings,
    pub log_level: Option<String>,
}

impl AnnotatorConfig {
    /// Locate and read the config file, then layer environment and CLI on top
    pub fn load(cli: &CliOverrides) -> Result<Self> {
        let file = match resolve_config_file(cli.config_path.as_deref(), CONFIG_ENV_VAR, CONFIG_FILE_NAME)? {
            Some(path) => {
                info!("Using config file: {}", path.display());
                load_toml::<FileConfig>(&path)?
            }
            None => FileConfig::default(),
        };

        Self::from_sources(file, cli)
    }

    /// Resolve every setting from `file`, the process environment and `cli`
    pub fn from_sources(file: FileConfig, cli: &CliOverrides) -> Result<Self> {
        let database_path = cli
            .database_path
            .clone()
            .or_else(|| env_var(ENV_DATABASE).map(PathBuf::from))
            .or(file.database_path)
            .unwrap_or_else(|| default_data_dir().join(DEFAULT_DATABASE_FILE));

        let timeout_secs = file
            .oracle
            .request_timeout_secs
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(Error::Config("oracle.request_timeout_secs must be positive".to_string()));
        }

        let oracle = OracleSettings {
            endpoint: env_var(ENV_ORACLE_ENDPOINT)
                .or(file.oracle.endpoint)
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            model: env_var(ENV_ORACLE_MODEL)
                .or(file.oracle.model)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_key: env_var(ENV_ORACLE_API_KEY)
                .or(file.oracle.api_key)
                .filter(|k| is_valid_key(k)),
            request_timeout: Duration::from_secs(timeout_secs),
        };

        let max_attempts = file.retry.max_attempts.unwrap_or(MAX_RETRIES);
        if max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".to_string()));
        }
        let base_delay = file
            .retry
            .base_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_BASE_DELAY);

        let sentiment = resolve_task(
            "sentiment",
            file.sentiment,
            ENV_SENTIMENT_BATCH_LIMIT,
            cli.batch_limit,
            sentiment::DEFAULT_CONTRACT_VERSION,
            DEFAULT_SENTIMENT_BATCH_LIMIT,
        )?;
        let explain = resolve_task(
            "explain",
            file.explain,
            ENV_EXPLAIN_BATCH_LIMIT,
            cli.batch_limit,
            status_explain::DEFAULT_CONTRACT_VERSION,
            DEFAULT_EXPLAIN_BATCH_LIMIT,
        )?;

        Ok(Self {
            database_path,
            oracle,
            retry: RetryPolicy::new(max_attempts, base_delay),
            sentiment,
            explain,
            log_level: file.logging.level,
        })
    }

    /// API key for runs that will call the oracle
    pub fn require_api_key(&self) -> Result<&str> {
        self.oracle.api_key.as_deref().ok_or_else(|| {
            Error::Config(format!(
                "Oracle API key not configured. Set {} or `api_key` under [oracle] in {}",
                ENV_ORACLE_API_KEY, CONFIG_FILE_NAME
            ))
        })
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }
}

/// Non-empty, non-whitespace
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn resolve_task(
    section_name: &str,
    section: TaskSection,
    batch_limit_env: &str,
    cli_batch_limit: Option<usize>,
    default_version: &str,
    default_limit: usize,
) -> Result<TaskSettings> {
    let env_limit = match env_var(batch_limit_env) {
        Some(raw) => Some(raw.trim().parse::<usize>().map_err(|_| {
            Error::Config(format!("{} must be a positive integer, got {:?}", batch_limit_env, raw))
        })?),
        None => None,
    };

    let limit = cli_batch_limit
        .or(env_limit)
        .or(section.batch_limit)
        .unwrap_or(default_limit);
    let batch_limit = NonZeroUsize::new(limit).ok_or_else(|| {
        Error::Config(format!("{}.batch_limit must be positive", section_name))
    })?;

    let contract_version = section
        .contract_version
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default_version.to_string());

    Ok(TaskSettings {
        contract_version,
        batch_limit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    const ALL_ENV: &[&str] = &[
        CONFIG_ENV_VAR,
        ENV_DATABASE,
        ENV_ORACLE_ENDPOINT,
        ENV_ORACLE_MODEL,
        ENV_ORACLE_API_KEY,
        ENV_SENTIMENT_BATCH_LIMIT,
        ENV_EXPLAIN_BATCH_LIMIT,
    ];

    fn clear_env() {
        for name in ALL_ENV {
            std::env::remove_var(name);
        }
    }

    fn parse(toml_text: &str) -> FileConfig {
        toml::from_str(toml_text).unwrap()
    }

    #[test]
    #[serial]
    fn test_defaults_without_any_source() {
        clear_env();
        let config = AnnotatorConfig::from_sources(FileConfig::default(), &CliOverrides::default()).unwrap();

        assert_eq!(config.sentiment.batch_limit.get(), 300);
        assert_eq!(config.sentiment.contract_version, "sentiment_v0.2");
        assert_eq!(config.explain.batch_limit.get(), 50);
        assert_eq!(config.explain.contract_version, "thread_state_v0.1");
        assert_eq!(config.oracle.model, "gemini-2.0-flash");
        assert_eq!(config.retry, RetryPolicy::default());
        assert!(config.database_path.ends_with("threadlens.db"));
        assert!(config.require_api_key().is_err());
    }

    #[test]
    #[serial]
    fn test_toml_values_applied() {
        clear_env();
        let file = parse(
            r#"
            database_path = "/tmp/tl.db"

            [oracle]
            model = "gemini-1.5-pro"
            api_key = "from-toml"

            [retry]
            max_attempts = 5
            base_delay_ms = 10

            [explain]
            contract_version = "thread_state_v0.2"
            batch_limit = 7
            "#,
        );

        let config = AnnotatorConfig::from_sources(file, &CliOverrides::default()).unwrap();

        assert_eq!(config.database_path, PathBuf::from("/tmp/tl.db"));
        assert_eq!(config.oracle.model, "gemini-1.5-pro");
        assert_eq!(config.require_api_key().unwrap(), "from-toml");
        assert_eq!(config.retry, RetryPolicy::new(5, Duration::from_millis(10)));
        assert_eq!(config.explain.contract_version, "thread_state_v0.2");
        assert_eq!(config.explain.batch_limit.get(), 7);
        assert_eq!(config.sentiment.batch_limit.get(), 300);
    }

    #[test]
    #[serial]
    fn test_priority_cli_over_env_over_toml() {
        clear_env();
        std::env::set_var(ENV_DATABASE, "/env/tl.db");
        std::env::set_var(ENV_ORACLE_API_KEY, "from-env");
        std::env::set_var(ENV_SENTIMENT_BATCH_LIMIT, "20");

        let file = parse(
            r#"
            database_path = "/toml/tl.db"
            [oracle]
            api_key = "from-toml"
            [sentiment]
            batch_limit = 10
            "#,
        );

        let env_wins = AnnotatorConfig::from_sources(file.clone(), &CliOverrides::default()).unwrap();
        assert_eq!(env_wins.database_path, PathBuf::from("/env/tl.db"));
        assert_eq!(env_wins.require_api_key().unwrap(), "from-env");
        assert_eq!(env_wins.sentiment.batch_limit.get(), 20);

        let cli = CliOverrides {
            database_path: Some(PathBuf::from("/cli/tl.db")),
            batch_limit: Some(3),
            ..Default::default()
        };
        let cli_wins = AnnotatorConfig::from_sources(file, &cli).unwrap();
        assert_eq!(cli_wins.database_path, PathBuf::from("/cli/tl.db"));
        assert_eq!(cli_wins.sentiment.batch_limit.get(), 3);
        assert_eq!(cli_wins.explain.batch_limit.get(), 3);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_values_rejected() {
        clear_env();
        let zero_limit = CliOverrides {
            batch_limit: Some(0),
            ..Default::default()
        };
        assert!(AnnotatorConfig::from_sources(FileConfig::default(), &zero_limit).is_err());

        let zero_attempts = parse("[retry]\nmax_attempts = 0\n");
        assert!(AnnotatorConfig::from_sources(zero_attempts, &CliOverrides::default()).is_err());

        std::env::set_var(ENV_EXPLAIN_BATCH_LIMIT, "lots");
        assert!(AnnotatorConfig::from_sources(FileConfig::default(), &CliOverrides::default()).is_err());
        clear_env();
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(toml::from_str::<FileConfig>("[oracle]\nmodle = \"x\"\n").is_err());
    }

    #[test]
    #[serial]
    fn test_load_reads_named_file() {
        clear_env();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sentiment]\nbatch_limit = 12").unwrap();

        let cli = CliOverrides {
            config_path: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let config = AnnotatorConfig::load(&cli).unwrap();
        assert_eq!(config.sentiment.batch_limit.get(), 12);

        let missing = CliOverrides {
            config_path: Some(PathBuf::from("/nonexistent/annotator.toml")),
            ..Default::default()
        };
        assert!(AnnotatorConfig::load(&missing).is_err());
    }
}

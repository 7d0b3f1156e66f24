//! Build configuration module
//!
//! Handles loading and validating configuration from environment variables.

use crate::repository::RevisionIdentifier;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load environment variables: {0}")]
    EnvLoad(#[from] dotenvy::Error),

    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_pool_size: usize,
    pub require_tls: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            database: "postgres".to_string(),
            max_pool_size: 4,
            require_tls: false,
        }
    }
}

/// Version control system backing the script directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VcsKind {
    None,
    Git,
    Hg,
}

impl VcsKind {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(VcsKind::None),
            "git" => Ok(VcsKind::Git),
            "hg" | "mercurial" => Ok(VcsKind::Hg),
            other => Err(ConfigError::InvalidValue(format!("Unknown VCS '{}'", other))),
        }
    }

    fn default_executable(&self) -> Option<&'static str> {
        match self {
            VcsKind::None => None,
            VcsKind::Git => Some("git"),
            VcsKind::Hg => Some("hg"),
        }
    }
}

/// Script repository configuration
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    pub script_directory: PathBuf,
    pub ignore_unsupported_subdirectories: bool,
    pub vcs: VcsKind,
    pub vcs_executable: Option<PathBuf>,
    pub source_revision: Option<RevisionIdentifier>,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            script_directory: PathBuf::from("."),
            ignore_unsupported_subdirectories: true,
            vcs: VcsKind::None,
            vcs_executable: None,
            source_revision: None,
        }
    }
}

/// Complete build settings
#[derive(Debug, Clone)]
pub struct Settings {
    /// Logical server name used in object identity
    pub server_name: String,
    pub database: DatabaseConfig,
    pub repository: RepositoryConfig,
    pub dependency_query_timeout: Duration,
}

impl Settings {
    pub const DEFAULT_DEPENDENCY_QUERY_TIMEOUT: Duration = Duration::from_secs(60);

    /// Load settings from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        env_file_loaded(dotenvy::dotenv())?;
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let max_pool_size = lookup("DB_MAX_CONNECTIONS")
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| DatabaseConfig::default().max_pool_size);
        let force_tls = lookup("DB_REQUIRE_TLS")
            .map(|s| parse_bool(&s))
            .transpose()?
            .unwrap_or(false);

        // Try DATABASE_URL first, fall back to individual vars
        let mut database = if let Some(database_url) = lookup("DATABASE_URL") {
            Self::parse_database_url(&database_url, max_pool_size)?
        } else {
            let defaults = DatabaseConfig::default();
            DatabaseConfig {
                host: lookup("DB_HOST").unwrap_or(defaults.host),
                port: lookup("DB_PORT")
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(defaults.port),
                user: lookup("DB_USER").unwrap_or(defaults.user),
                password: lookup("DB_PASSWORD").unwrap_or_default(),
                database: lookup("DB_NAME")
                    .ok_or_else(|| ConfigError::MissingVar("DATABASE_URL or DB_NAME".to_string()))?,
                max_pool_size,
                require_tls: false,
            }
        };
        database.require_tls |= force_tls;

        let server_name = lookup("SERVER_NAME").unwrap_or_else(|| database.host.clone());

        let vcs = lookup("VCS")
            .map(|v| VcsKind::parse(&v))
            .transpose()?
            .unwrap_or(VcsKind::None);
        let vcs_executable = lookup("VCS_EXECUTABLE")
            .map(PathBuf::from)
            .or_else(|| vcs.default_executable().map(PathBuf::from));
        let source_revision = lookup("SOURCE_REVISION")
            .filter(|s| !s.trim().is_empty())
            .map(|s| {
                s.parse::<RevisionIdentifier>()
                    .map_err(|e| ConfigError::InvalidValue(e.to_string()))
            })
            .transpose()?;

        let repository = RepositoryConfig {
            script_directory: lookup("SCRIPT_DIRECTORY")
                .map(PathBuf::from)
                .unwrap_or_else(|| RepositoryConfig::default().script_directory),
            ignore_unsupported_subdirectories: lookup("IGNORE_UNSUPPORTED_SUBDIRECTORIES")
                .map(|s| parse_bool(&s))
                .transpose()?
                .unwrap_or(true),
            vcs,
            vcs_executable,
            source_revision,
        };

        let dependency_query_timeout = lookup("DEPENDENCY_QUERY_TIMEOUT_SECS")
            .map(|s| {
                s.trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| {
                        ConfigError::InvalidValue(format!(
                            "DEPENDENCY_QUERY_TIMEOUT_SECS must be a number of seconds, got '{}'",
                            s
                        ))
                    })
            })
            .transpose()?
            .unwrap_or(Self::DEFAULT_DEPENDENCY_QUERY_TIMEOUT);

        Ok(Self {
            server_name,
            database,
            repository,
            dependency_query_timeout,
        })
    }

    /// Parse a DATABASE_URL connection string (postgresql://...)
    fn parse_database_url(url: &str, max_pool_size: usize) -> Result<DatabaseConfig, ConfigError> {
        let parsed = url::Url::parse(url).map_err(|_| {
            ConfigError::InvalidValue(
                "Invalid DATABASE_URL format (expected postgresql://...)".to_string(),
            )
        })?;

        let host = parsed
            .host_str()
            .ok_or_else(|| ConfigError::InvalidValue("Missing host in DATABASE_URL".to_string()))?
            .to_string();

        let database = parsed.path().trim_start_matches('/').to_string();
        if database.is_empty() {
            return Err(ConfigError::InvalidValue(
                "Missing database name in DATABASE_URL".to_string(),
            ));
        }

        let user = if parsed.username().is_empty() {
            DatabaseConfig::default().user
        } else {
            parsed.username().to_string()
        };

        let require_tls = parsed
            .query_pairs()
            .any(|(k, v)| k == "sslmode" && v == "require");

        Ok(DatabaseConfig {
            host,
            port: parsed.port().unwrap_or(5432),
            user,
            password: parsed.password().map(|p| p.to_string()).unwrap_or_default(),
            database,
            max_pool_size,
            require_tls,
        })
    }
}

/// A missing .env file is fine; an unreadable or malformed one is not
fn env_file_loaded<T>(result: Result<T, dotenvy::Error>) -> Result<(), ConfigError> {
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.not_found() => Ok(()),
        Err(e) => Err(ConfigError::EnvLoad(e)),
    }
}

fn parse_bool(value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue(format!(
            "Expected a boolean, got '{}'",
            other
        ))),
    }
}

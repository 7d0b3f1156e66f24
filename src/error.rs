//! Error handling module
//!
//! Connection, repository and facade errors. Problems with individual
//! scripts are not errors at this level; they are recorded on build items
//! as [`BuildError`](crate::build::BuildError) values.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Faults raised by the database connection layer
#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("Failed to create pool: {0}")]
    CreatePool(String),

    #[error("Command timed out after {0:?}")]
    Timeout(Duration),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("{}", join_messages(.0))]
    Aggregate(Vec<DbError>),

    #[error("Unexpected value: {0}")]
    UnexpectedValue(String),
}

impl DbError {
    /// Message without the variant prefix, preferring the server's own text
    pub fn detail(&self) -> String {
        match self {
            DbError::Postgres(e) => e
                .as_db_error()
                .map(|db| db.message().to_string())
                .unwrap_or_else(|| e.to_string()),
            DbError::Aggregate(errors) => join_messages(errors),
            DbError::NotSupported(msg) | DbError::UnexpectedValue(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

fn join_messages(errors: &[DbError]) -> String {
    errors
        .iter()
        .map(DbError::detail)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Failure of an external version-control executable
#[derive(Error, Debug)]
pub enum ExternalProcessError {
    #[error("The executable located at '{}' exited with code {exit_code}. The error text follows:\n{stderr}", .executable.display())]
    Failed {
        executable: PathBuf,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("Failed to start executable '{}': {source}", .executable.display())]
    Spawn {
        executable: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Faults raised by script repositories
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    ExternalProcess(#[from] ExternalProcessError),

    #[error("Object {0} does not belong to this repository's database")]
    ForeignObject(String),

    #[error("Failed to scan script directory: {0}")]
    Walk(String),
}

/// Errors surfaced by the database facade
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("Cannot convert object type code {0}")]
    UnknownObjectType(String),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

impl From<tokio_postgres::Error> for DatabaseError {
    fn from(e: tokio_postgres::Error) -> Self {
        DatabaseError::Db(DbError::Postgres(e))
    }
}

/// Result type alias for facade operations
pub type DatabaseResult<T> = Result<T, DatabaseError>;

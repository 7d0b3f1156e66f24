//! Database connection layer
//!
//! The build only needs three things from a database: text-valued query
//! results for catalog introspection, statement execution, and transaction
//! control. [`Connector`] and [`Connection`] describe exactly that; the
//! PostgreSQL implementation sits on a `deadpool-postgres` pool.

use crate::config::DatabaseConfig;
use crate::error::DbError;
use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Object, Pool, PoolConfig, RecyclingMethod, Runtime};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_postgres::error::SqlState;
use tokio_postgres::NoTls;
use tracing::{debug, info, warn};

/// One result row, every column rendered as text (NULL becomes an empty string)
pub type TextRow = Vec<String>;

/// Opens connections to one database
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Connection>, DbError>;
}

/// An open connection, optionally inside a transaction
#[async_trait]
pub trait Connection: Send + Sync {
    /// Run a catalog query; `timeout` bounds this command only
    async fn query(&self, sql: &str, timeout: Option<Duration>) -> Result<Vec<TextRow>, DbError>;

    /// Execute a DDL statement
    async fn execute(&self, sql: &str) -> Result<(), DbError>;

    async fn begin(&self) -> Result<(), DbError>;

    async fn commit(&self) -> Result<(), DbError>;

    async fn rollback(&self) -> Result<(), DbError>;
}

/// Connector backed by a PostgreSQL connection pool
#[derive(Clone)]
pub struct PgConnector {
    pool: Pool,
}

impl PgConnector {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create a pool from configuration, with TLS when the server requires it
    pub fn from_config(config: &DatabaseConfig) -> Result<Self, DbError> {
        let mut cfg = Config::new();
        cfg.host = Some(config.host.clone());
        cfg.port = Some(config.port);
        cfg.user = Some(config.user.clone());
        cfg.password = Some(config.password.clone());
        cfg.dbname = Some(config.database.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(PoolConfig::new(config.max_pool_size));

        let pool = if config.require_tls {
            let certs = rustls_native_certs::load_native_certs();
            let mut root_store = rustls::RootCertStore::empty();
            for cert in certs.certs {
                root_store.add(cert).ok();
            }

            let tls_config = rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth();

            let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);
            cfg.create_pool(Some(Runtime::Tokio1), tls)
                .map_err(|e| DbError::CreatePool(e.to_string()))?
        } else {
            cfg.create_pool(Some(Runtime::Tokio1), NoTls)
                .map_err(|e| DbError::CreatePool(e.to_string()))?
        };

        info!(
            "Created connection pool for {}:{}/{} (TLS: {})",
            config.host, config.port, config.database, config.require_tls
        );
        Ok(Self { pool })
    }
}

#[async_trait]
impl Connector for PgConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>, DbError> {
        let client = self.pool.get().await?;
        debug!("Acquired pooled connection");
        Ok(Box::new(PgConnection {
            client: Some(client),
            in_transaction: AtomicBool::new(false),
        }))
    }
}

/// A pooled PostgreSQL connection.
///
/// PostgreSQL aborts the whole transaction after a failed statement, so
/// statements executed inside a transaction run under a savepoint that is
/// rolled back on failure. Later statements of the same build still run.
///
/// `tokio_postgres::Transaction` borrows the client mutably for its whole
/// lifetime, so it cannot live next to the pooled client behind `&self`;
/// transaction state is tracked here and driven with plain statements.
pub struct PgConnection {
    client: Option<Object>,
    in_transaction: AtomicBool,
}

impl PgConnection {
    fn client(&self) -> Result<&Object, DbError> {
        self.client
            .as_ref()
            .ok_or_else(|| DbError::UnexpectedValue("connection already released".to_string()))
    }
}

const STATEMENT_SAVEPOINT: &str = "schemabuild_statement";

/// Server-side limit for the next command. Inside a transaction the
/// setting ends with it; outside, the caller resets it.
fn statement_timeout_sql(limit: Duration, in_transaction: bool) -> String {
    let scope = if in_transaction { "SET LOCAL" } else { "SET" };
    format!("{} statement_timeout = {}", scope, limit.as_millis().max(1))
}

#[async_trait]
impl Connection for PgConnection {
    async fn query(&self, sql: &str, timeout: Option<Duration>) -> Result<Vec<TextRow>, DbError> {
        let client = self.client()?;
        let rows = match timeout {
            Some(limit) => {
                let in_transaction = self.in_transaction.load(Ordering::SeqCst);
                client
                    .batch_execute(&statement_timeout_sql(limit, in_transaction))
                    .await?;
                let result = client.query(sql, &[]).await;
                if !in_transaction {
                    client.batch_execute("RESET statement_timeout").await?;
                }
                match result {
                    Err(e) if e.code() == Some(&SqlState::QUERY_CANCELED) => {
                        warn!("Query cancelled by the server after {:?}", limit);
                        return Err(DbError::Timeout(limit));
                    }
                    other => other?,
                }
            }
            None => client.query(sql, &[]).await?,
        };

        rows.iter()
            .map(|row| {
                (0..row.len())
                    .map(|i| {
                        row.try_get::<_, Option<String>>(i)
                            .map(Option::unwrap_or_default)
                            .map_err(DbError::from)
                    })
                    .collect()
            })
            .collect()
    }

    async fn execute(&self, sql: &str) -> Result<(), DbError> {
        let client = self.client()?;
        if !self.in_transaction.load(Ordering::SeqCst) {
            client.batch_execute(sql).await?;
            return Ok(());
        }

        client
            .batch_execute(&format!("SAVEPOINT {}", STATEMENT_SAVEPOINT))
            .await?;
        match client.batch_execute(sql).await {
            Ok(()) => {
                client
                    .batch_execute(&format!("RELEASE SAVEPOINT {}", STATEMENT_SAVEPOINT))
                    .await?;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback_err) = client
                    .batch_execute(&format!("ROLLBACK TO SAVEPOINT {}", STATEMENT_SAVEPOINT))
                    .await
                {
                    warn!("Failed to roll back statement savepoint: {}", rollback_err);
                    return Err(DbError::Aggregate(vec![e.into(), rollback_err.into()]));
                }
                Err(e.into())
            }
        }
    }

    async fn begin(&self) -> Result<(), DbError> {
        self.client()?.batch_execute("BEGIN").await?;
        self.in_transaction.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn commit(&self) -> Result<(), DbError> {
        self.client()?.batch_execute("COMMIT").await?;
        self.in_transaction.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> Result<(), DbError> {
        self.client()?.batch_execute("ROLLBACK").await?;
        self.in_transaction.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for PgConnection {
    fn drop(&mut self) {
        // A connection with an open transaction must not go back to the pool
        if self.in_transaction.load(Ordering::SeqCst) {
            if let Some(client) = self.client.take() {
                warn!("Discarding connection with an open transaction");
                drop(Object::take(client));
            }
        }
    }
}

//! Script executors for the two build phases

use super::{BuildAction, BuildItem, BuildStatus};
use crate::connection::Connection;
use crate::error::DbError;
use async_trait::async_trait;
use tracing::debug;

/// Runs the statement one phase needs for one item
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    /// Phase name for log output
    fn phase(&self) -> &'static str;

    async fn execute(&self, item: &BuildItem, conn: &dyn Connection) -> Result<(), DbError>;
}

/// Drops items whose action is `Drop` or `DropAndCreate`
pub struct DropExecutor;

#[async_trait]
impl ScriptExecutor for DropExecutor {
    fn phase(&self) -> &'static str {
        "drop"
    }

    async fn execute(&self, item: &BuildItem, conn: &dyn Connection) -> Result<(), DbError> {
        if item.status() == BuildStatus::ScriptError {
            return Ok(());
        }
        match item.action() {
            BuildAction::Drop | BuildAction::DropAndCreate => {
                let sql = item.object().drop_statement();
                debug!("Executing: {}", sql);
                conn.execute(&sql).await
            }
            BuildAction::Create | BuildAction::Alter => Ok(()),
        }
    }
}

/// Creates or alters items from their parsed scripts
pub struct CreateExecutor;

#[async_trait]
impl ScriptExecutor for CreateExecutor {
    fn phase(&self) -> &'static str {
        "create"
    }

    async fn execute(&self, item: &BuildItem, conn: &dyn Connection) -> Result<(), DbError> {
        let sql = match item.action() {
            BuildAction::Drop => return Ok(()),
            action => {
                let parsed = item.script().sql().ok_or_else(|| {
                    DbError::NotSupported(format!("no parsed script for {}", item.object()))
                })?;
                let script = if action == BuildAction::Alter {
                    parsed.alter_script()
                } else {
                    parsed.create_script()
                };
                script.map_err(|e| DbError::NotSupported(e.to_string()))?
            }
        };

        debug!("Executing: {}", sql);
        conn.execute(&sql).await
    }
}

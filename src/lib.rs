//! schemabuild - incremental deployment of SQL programmability objects
//!
//! Views, functions, procedures and types are kept as one script per object
//! in a `<schema>/<ObjectType>/<name>.sql` tree. A build:
//! - collects the scripts to deploy (all of them, or those changed since a revision)
//! - adds every live object that depends on one of them
//! - orders everything by the merged script and catalog dependencies
//! - drops and recreates (or alters) the objects inside one transaction,
//!   rolling back if any item fails

pub mod build;
pub mod config;
pub mod connection;
pub mod database;
pub mod error;
pub mod introspection;
pub mod logging;
pub mod object;
pub mod repository;
pub mod script;
pub mod walker;

#[cfg(test)]
mod testing;

pub use build::{BuildAction, BuildError, BuildGraph, BuildItem, BuildStatus, Builder, ItemId, StatusTransition};
pub use config::Settings;
pub use connection::{Connection, Connector, PgConnector};
pub use database::Database;
pub use error::{DatabaseError, DatabaseResult, DbError, RepositoryError};
pub use object::{DatabaseObject, ObjectType, TypedDatabaseObject};
pub use repository::{FileSystemScriptRepository, RevisionIdentifier, ScriptRepository};
pub use script::{ParsedScript, ScriptAction, ScriptFile, SqlParser};

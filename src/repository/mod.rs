//! Script repositories
//!
//! A repository supplies build scripts: all of them, the ones changed since
//! a revision, or the one for a given object.

pub mod diff;
pub mod file_system;
pub mod process;

pub use diff::{DiffProvider, GitDiffProvider, HgDiffProvider, RevisionIdentifier, RevisionParseError};
pub use file_system::FileSystemScriptRepository;
pub use process::{ExternalProcess, ProcessRunner};

use crate::error::RepositoryError;
use crate::object::TypedDatabaseObject;
use crate::script::ScriptFile;
use async_trait::async_trait;

#[async_trait]
pub trait ScriptRepository: Send + Sync {
    /// Where the scripts live, for log output
    fn repository_description(&self) -> String;

    /// What the changed scripts are compared against.
    ///
    /// Fails with [`RepositoryError::NotSupported`] when the repository does
    /// not track changes.
    fn change_source_description(&self) -> Result<String, RepositoryError>;

    async fn get_all_scripts(&self) -> Result<Vec<ScriptFile>, RepositoryError>;

    async fn get_changed_scripts(&self) -> Result<Vec<ScriptFile>, RepositoryError>;

    /// Script for one object.
    ///
    /// Objects from another database come back carrying a missing-script
    /// error; a script that no longer exists comes back as a drop script.
    async fn get_script(&self, object: &TypedDatabaseObject) -> Result<ScriptFile, RepositoryError>;
}

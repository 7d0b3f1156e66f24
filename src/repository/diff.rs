//! Change detection through version control
//!
//! A [`DiffProvider`] lists the files changed since a revision. The
//! file-system repository uses one to answer "which scripts changed".

use super::process::ProcessRunner;
use crate::error::RepositoryError;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

static CHANGESET_HEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{40}$").expect("changeset pattern is valid")
});

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RevisionParseError {
    #[error("Revision identifier cannot be empty")]
    Empty,

    #[error("Changeset id must be 40 hexadecimal characters, got '{0}'")]
    InvalidChangeset(String),
}

/// A revision to diff against: a tag/branch name or a full changeset hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevisionIdentifier {
    Tag(String),
    Changeset([u8; 20]),
}

impl RevisionIdentifier {
    pub fn changeset_from_hex(hex: &str) -> Result<Self, RevisionParseError> {
        let hex = hex.trim();
        if !CHANGESET_HEX.is_match(hex) {
            return Err(RevisionParseError::InvalidChangeset(hex.to_string()));
        }
        let mut hash = [0u8; 20];
        for (index, byte) in hash.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[index * 2..index * 2 + 2], 16)
                .map_err(|_| RevisionParseError::InvalidChangeset(hex.to_string()))?;
        }
        Ok(RevisionIdentifier::Changeset(hash))
    }
}

impl FromStr for RevisionIdentifier {
    type Err = RevisionParseError;

    /// 40 hex characters parse as a changeset, anything else as a tag
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            Err(RevisionParseError::Empty)
        } else if CHANGESET_HEX.is_match(s) {
            Self::changeset_from_hex(s)
        } else {
            Ok(RevisionIdentifier::Tag(s.to_string()))
        }
    }
}

impl fmt::Display for RevisionIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevisionIdentifier::Tag(name) => f.write_str(name),
            RevisionIdentifier::Changeset(hash) => {
                for b in hash {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

/// Lists files changed since a revision
#[async_trait]
pub trait DiffProvider: Send + Sync {
    /// Tool name used in log messages
    fn name(&self) -> &'static str;

    /// Changed files under `script_root`, as paths joined onto the working tree
    async fn changed_files(
        &self,
        script_root: &Path,
        revision: &RevisionIdentifier,
    ) -> Result<Vec<PathBuf>, RepositoryError>;
}

fn output_lines(output: &str) -> impl Iterator<Item = &str> {
    output
        .split(['\n', '\r'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
}

/// Diffs with `git diff --name-only <rev> HEAD`
pub struct GitDiffProvider {
    git: Box<dyn ProcessRunner>,
}

impl GitDiffProvider {
    pub fn new(git: impl ProcessRunner + 'static) -> Self {
        Self { git: Box::new(git) }
    }

    async fn repository_root(&self, script_root: &Path) -> Result<PathBuf, RepositoryError> {
        let output = self
            .git
            .run(&["rev-parse".to_string(), "--show-toplevel".to_string()], script_root)
            .await?;
        Ok(PathBuf::from(output.trim()))
    }
}

#[async_trait]
impl DiffProvider for GitDiffProvider {
    fn name(&self) -> &'static str {
        "git"
    }

    async fn changed_files(
        &self,
        script_root: &Path,
        revision: &RevisionIdentifier,
    ) -> Result<Vec<PathBuf>, RepositoryError> {
        let repo_root = self.repository_root(script_root).await?;
        let args = [
            "diff".to_string(),
            "--name-only".to_string(),
            revision.to_string(),
            "HEAD".to_string(),
            ".".to_string(),
        ];
        let output = self.git.run(&args, script_root).await?;

        // git reports paths relative to the top of the working tree
        Ok(output_lines(&output).map(|line| repo_root.join(line)).collect())
    }
}

/// Diffs with `hg status --no-status --rev <rev>`
pub struct HgDiffProvider {
    hg: Box<dyn ProcessRunner>,
}

impl HgDiffProvider {
    pub fn new(hg: impl ProcessRunner + 'static) -> Self {
        Self { hg: Box::new(hg) }
    }
}

#[async_trait]
impl DiffProvider for HgDiffProvider {
    fn name(&self) -> &'static str {
        "hg"
    }

    async fn changed_files(
        &self,
        script_root: &Path,
        revision: &RevisionIdentifier,
    ) -> Result<Vec<PathBuf>, RepositoryError> {
        let args = [
            "status".to_string(),
            "--no-status".to_string(),
            "--rev".to_string(),
            revision.to_string(),
            script_root.display().to_string(),
        ];
        let output = self.hg.run(&args, script_root).await?;
        Ok(output_lines(&output).map(|line| script_root.join(line)).collect())
    }
}

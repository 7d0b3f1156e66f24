//! Script parser contract
//!
//! Parsing SQL text is left to an external dialect parser. The build only
//! relies on what a parser reports about one script: which object it defines,
//! what it wants done, what it depends on, and the DDL to run.

use crate::build::BuildError;
use crate::object::{DatabaseObject, ObjectType};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Debug;
use thiserror::Error;

/// Statement kind found in a script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScriptAction {
    Create,
    Alter,
    Drop,
}

/// Errors reported by a parser
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Script contains no SQL")]
    EmptyText,

    #[error("Script contains {count} statements, but only {allotment} allowed")]
    MultipleStatement { count: usize, allotment: usize },

    #[error("Unexpected object type {type_name}")]
    UnexpectedObjectType { type_name: String },

    #[error("{message}")]
    SqlParse { message: String },

    /// The script lacks what is needed to produce the requested DDL
    #[error("Not supported: {message}")]
    NotSupported { message: String },
}

impl From<ParseError> for BuildError {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::EmptyText => BuildError::EmptyText,
            ParseError::MultipleStatement { count, allotment } => {
                BuildError::MultipleStatement { count, allotment }
            }
            ParseError::UnexpectedObjectType { type_name } => {
                BuildError::UnexpectedObjectType { type_name }
            }
            ParseError::SqlParse { message } | ParseError::NotSupported { message } => {
                BuildError::SqlParse { message }
            }
        }
    }
}

/// A successfully parsed script
pub trait ParsedScript: Debug + Send + Sync {
    fn original_text(&self) -> &str;

    fn schema_name(&self) -> &str;

    fn object_name(&self) -> &str;

    fn object_type(&self) -> ObjectType;

    fn script_action(&self) -> ScriptAction;

    /// Objects referenced by the script; server and database may be blank
    fn dependencies(&self) -> &HashSet<DatabaseObject>;

    fn create_script(&self) -> Result<String, ParseError>;

    fn alter_script(&self) -> Result<String, ParseError>;
}

/// Turns script text into a [`ParsedScript`]
pub trait SqlParser: Send + Sync {
    fn parse_sql_script(&self, sql: &str) -> Result<Box<dyn ParsedScript>, ParseError>;
}

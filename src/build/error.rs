//! Build item errors
//!
//! Every way a build item can fail, as one sum type. The variant decides
//! the item status; the `Display` text is what gets shown to the user.

use super::BuildStatus;
use crate::error::DbError;
use crate::object::{ObjectType, TypedDatabaseObject};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BuildError {
    #[error("No sql query exists in script.")]
    EmptyText,

    #[error("{}", multiple_statement_message(.count, .allotment))]
    MultipleStatement { count: usize, allotment: usize },

    #[error("Not expecting a sql script for type {type_name}.")]
    UnexpectedObjectType { type_name: String },

    #[error("{message}")]
    SqlParse { message: String },

    #[error("Cannot use script for object {actual} when expecting {expected}.")]
    MismatchedObjectName { expected: String, actual: String },

    #[error("Cannot use script of type {actual} for {object_name} when expecting type {expected}.")]
    MismatchedObjectType {
        object_name: String,
        expected: ObjectType,
        actual: ObjectType,
    },

    #[error("Cannot use script of schema {actual} for {object_name} when expecting schema {expected}.")]
    MismatchedSchema {
        object_name: String,
        expected: String,
        actual: String,
    },

    #[error("Cannot retrieve script file for object {object}.")]
    MissingScriptFile { object: TypedDatabaseObject },

    /// The database rejected the generated statement
    #[error("{message}")]
    Build { message: String },

    /// `path` runs from an item back to itself; `None` when no cycle could be walked
    #[error("{}", circular_message(.path.as_deref()))]
    CircularDependency {
        path: Option<Vec<TypedDatabaseObject>>,
    },

    /// `failure_chain` starts at the item that failed and ends at this one
    #[error("{}", dependency_message(.failure_chain, .root_error_type))]
    Dependency {
        failure_chain: Vec<TypedDatabaseObject>,
        root_error_type: &'static str,
    },
}

impl BuildError {
    /// Wrap a database fault raised while executing an item's statement
    pub fn from_fault(fault: &DbError) -> Self {
        BuildError::Build {
            message: fault.detail(),
        }
    }

    pub fn status(&self) -> BuildStatus {
        match self {
            BuildError::Build { .. } => BuildStatus::BuildError,
            BuildError::CircularDependency { .. } => BuildStatus::CircularDependencyError,
            BuildError::Dependency { .. } => BuildStatus::DependencyError,
            _ => BuildStatus::ScriptError,
        }
    }

    /// Short category shown next to the message
    pub fn error_type(&self) -> &'static str {
        match self {
            BuildError::EmptyText => "Empty Script",
            BuildError::MultipleStatement { .. } => "Multiple Sql Statements",
            BuildError::UnexpectedObjectType { .. } => "Unexpected Object Type",
            BuildError::SqlParse { .. } => "Sql Parse Failure",
            BuildError::MismatchedObjectName { .. } => "Mismatched Object Name",
            BuildError::MismatchedObjectType { .. } => "Mismatched Object Type",
            BuildError::MismatchedSchema { .. } => "Mismatched Schema",
            BuildError::MissingScriptFile { .. } => "Missing Script File",
            BuildError::Build { .. } => "Build Error",
            BuildError::CircularDependency { .. } => "Circular Dependency",
            BuildError::Dependency { .. } => "Dependency Error",
        }
    }
}

fn multiple_statement_message(count: &usize, allotment: &usize) -> String {
    if *allotment == 1 {
        format!(
            "No batch separators are allowed.  Script contains too many statements.  Contains {}, but only {} is allowed.",
            count, allotment
        )
    } else {
        format!(
            "Script contains too many statements, separated by batch separators.  Contains {}, but only {} is allowed.",
            count, allotment
        )
    }
}

fn circular_message(path: Option<&[TypedDatabaseObject]>) -> String {
    match path {
        Some(path) if !path.is_empty() => path
            .iter()
            .map(|o| o.object_name().to_string())
            .collect::<Vec<_>>()
            .join(" depends on\n"),
        _ => "Unable to determine the circular dependency path.".to_string(),
    }
}

fn dependency_message(chain: &[TypedDatabaseObject], root_error_type: &str) -> String {
    let Some((root, dependents)) = chain.split_first() else {
        return format!("A dependency failed because of a {}.", root_error_type);
    };
    let mut message = String::new();
    for item in dependents.iter().rev() {
        message.push_str(&format!(
            "{}.{} depends on\n",
            item.schema_name(),
            item.object_name()
        ));
    }
    message.push_str(&format!(
        "{}.{} which failed because of a {}.",
        root.schema_name(),
        root.object_name(),
        root_error_type
    ));
    message
}

//! Build scripts
//!
//! A [`ScriptFile`] is one script as read from a repository: the object it is
//! expected to define, its raw text, the parse result, and the first problem
//! found with it.

pub mod parser;

pub use parser::{ParseError, ParsedScript, ScriptAction, SqlParser};

use crate::build::BuildError;
use crate::object::{trim_object_name, DatabaseObject, TypedDatabaseObject};
use std::collections::HashSet;

#[derive(Debug)]
pub struct ScriptFile {
    object: TypedDatabaseObject,
    content: Option<String>,
    sql: Option<Box<dyn ParsedScript>>,
    error: Option<BuildError>,
    existing_dependencies: HashSet<TypedDatabaseObject>,
}

impl ScriptFile {
    /// Parse `content` and check that it defines `object`.
    ///
    /// Parse failures and identity mismatches are recorded on the script,
    /// never returned.
    pub fn parse(
        object: TypedDatabaseObject,
        content: impl Into<String>,
        parser: &dyn SqlParser,
    ) -> Self {
        let content = content.into();
        let (sql, error) = match parser.parse_sql_script(&content) {
            Ok(sql) => match Self::check_identity(&object, sql.as_ref()) {
                None => (Some(sql), None),
                Some(mismatch) => (None, Some(mismatch)),
            },
            Err(e) => (None, Some(BuildError::from(e))),
        };

        Self {
            object,
            content: Some(content),
            sql,
            error,
            existing_dependencies: HashSet::new(),
        }
    }

    /// A script that failed before its content could be parsed
    pub fn with_error(object: TypedDatabaseObject, error: BuildError) -> Self {
        Self {
            object,
            content: None,
            sql: None,
            error: Some(error),
            existing_dependencies: HashSet::new(),
        }
    }

    pub fn object(&self) -> &TypedDatabaseObject {
        &self.object
    }

    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    /// Parse result; `None` when the script is invalid
    pub fn sql(&self) -> Option<&dyn ParsedScript> {
        self.sql.as_deref()
    }

    pub fn error(&self) -> Option<&BuildError> {
        self.error.as_ref()
    }

    pub fn script_action(&self) -> Option<ScriptAction> {
        self.sql.as_ref().map(|s| s.script_action())
    }

    /// Objects this script needs.
    ///
    /// Valid non-drop scripts report their parsed dependencies. Otherwise the
    /// object's dependencies in the live database are used, so objects that
    /// currently depend on it are still rebuilt (and fail) with it.
    pub fn dependencies(&self) -> Vec<DatabaseObject> {
        match &self.sql {
            Some(sql) if sql.script_action() != ScriptAction::Drop => {
                sql.dependencies().iter().cloned().collect()
            }
            _ => self
                .existing_dependencies
                .iter()
                .map(|d| d.object.clone())
                .collect(),
        }
    }

    pub fn assign_existing_dependencies(&mut self, dependencies: HashSet<TypedDatabaseObject>) {
        self.existing_dependencies = dependencies;
    }

    fn check_identity(object: &TypedDatabaseObject, sql: &dyn ParsedScript) -> Option<BuildError> {
        let same = |a: &str, b: &str| trim_object_name(a).to_lowercase() == trim_object_name(b).to_lowercase();

        if !same(object.object_name(), sql.object_name()) {
            Some(BuildError::MismatchedObjectName {
                expected: object.object_name().to_string(),
                actual: sql.object_name().to_string(),
            })
        } else if object.object_type != sql.object_type() {
            Some(BuildError::MismatchedObjectType {
                object_name: object.object_name().to_string(),
                expected: object.object_type,
                actual: sql.object_type(),
            })
        } else if !same(object.schema_name(), sql.schema_name()) {
            Some(BuildError::MismatchedSchema {
                object_name: object.object_name().to_string(),
                expected: object.schema_name().to_string(),
                actual: sql.schema_name().to_string(),
            })
        } else {
            None
        }
    }
}

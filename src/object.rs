//! Database object identifiers
//!
//! Identifies views, functions, procedures and types by server, database,
//! schema and name. Names compare case-insensitively after trimming
//! whitespace and identifier quoting, so `[Foo] ` and ` foo` are the same object.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Object types that can be built from scripts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectType {
    View,
    Procedure,
    Function,
    Type,
}

impl ObjectType {
    pub const ALL: [ObjectType; 4] = [
        ObjectType::View,
        ObjectType::Procedure,
        ObjectType::Function,
        ObjectType::Type,
    ];

    /// Folder name used by script repositories (`<schema>/<ObjectType>/<name>.sql`)
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::View => "View",
            ObjectType::Procedure => "Procedure",
            ObjectType::Function => "Function",
            ObjectType::Type => "Type",
        }
    }

    /// Keyword used in DDL statements
    pub fn keyword(&self) -> &'static str {
        match self {
            ObjectType::View => "VIEW",
            ObjectType::Procedure => "PROCEDURE",
            ObjectType::Function => "FUNCTION",
            ObjectType::Type => "TYPE",
        }
    }

    /// Match a folder name case-insensitively
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(name.trim()))
    }

    /// Convert a catalog type code emitted by the introspection queries
    pub fn from_catalog_code(code: &str) -> Option<Self> {
        match code.trim() {
            "V" => Some(ObjectType::View),
            "P" => Some(ObjectType::Procedure),
            "FN" | "IF" | "TF" => Some(ObjectType::Function),
            "TT" => Some(ObjectType::Type),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remove surrounding whitespace and identifier quoting (`[name]` or `"name"`).
///
/// Layers are stripped until the name is stable, so applying this twice
/// gives the same result as applying it once.
pub fn trim_object_name(name: &str) -> String {
    let mut current = name.trim();
    loop {
        let stripped = current
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .or_else(|| {
                if current.len() >= 2 {
                    current.strip_prefix('"').and_then(|s| s.strip_suffix('"'))
                } else {
                    None
                }
            });
        match stripped {
            Some(inner) => current = inner.trim(),
            None => return current.to_string(),
        }
    }
}

/// Quote an identifier for PostgreSQL DDL
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn normalize(name: &str) -> String {
    trim_object_name(name).to_lowercase()
}

/// A database object on a specific server, database and schema
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseObject {
    pub server_name: String,
    pub database_name: String,
    pub schema_name: String,
    pub object_name: String,
}

impl DatabaseObject {
    pub fn new(
        server_name: impl Into<String>,
        database_name: impl Into<String>,
        schema_name: impl Into<String>,
        object_name: impl Into<String>,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            database_name: database_name.into(),
            schema_name: schema_name.into(),
            object_name: object_name.into(),
        }
    }

    /// Same object with server and database filled in when they are blank
    pub fn with_database_if_unspecified(&self, server_name: &str, database_name: &str) -> Self {
        let pick = |own: &str, fallback: &str| {
            if own.trim().is_empty() {
                fallback.to_string()
            } else {
                own.to_string()
            }
        };
        Self {
            server_name: pick(&self.server_name, server_name),
            database_name: pick(&self.database_name, database_name),
            schema_name: self.schema_name.clone(),
            object_name: self.object_name.clone(),
        }
    }

    /// Whether this object lives on the given server and database
    pub fn is_in_database(&self, server_name: &str, database_name: &str) -> bool {
        normalize(&self.server_name) == normalize(server_name)
            && normalize(&self.database_name) == normalize(database_name)
    }

    /// `"schema"."name"`
    pub fn qualified_name(&self) -> String {
        format!(
            "{}.{}",
            quote_identifier(&self.schema_name),
            quote_identifier(&self.object_name)
        )
    }

    pub fn with_type(self, object_type: ObjectType) -> TypedDatabaseObject {
        TypedDatabaseObject {
            object: self,
            object_type,
        }
    }

    fn key(&self) -> [String; 4] {
        [
            normalize(&self.server_name),
            normalize(&self.database_name),
            normalize(&self.schema_name),
            normalize(&self.object_name),
        ]
    }
}

impl PartialEq for DatabaseObject {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for DatabaseObject {}

impl Hash for DatabaseObject {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for DatabaseObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = [
            &self.server_name,
            &self.database_name,
            &self.schema_name,
        ];
        for part in parts.into_iter().filter(|p| !p.trim().is_empty()) {
            write!(f, "{}.", part)?;
        }
        f.write_str(&self.object_name)
    }
}

/// A database object together with its type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedDatabaseObject {
    #[serde(flatten)]
    pub object: DatabaseObject,
    pub object_type: ObjectType,
}

impl TypedDatabaseObject {
    pub fn new(
        server_name: impl Into<String>,
        database_name: impl Into<String>,
        schema_name: impl Into<String>,
        object_name: impl Into<String>,
        object_type: ObjectType,
    ) -> Self {
        DatabaseObject::new(server_name, database_name, schema_name, object_name)
            .with_type(object_type)
    }

    pub fn schema_name(&self) -> &str {
        &self.object.schema_name
    }

    pub fn object_name(&self) -> &str {
        &self.object.object_name
    }

    /// `DROP <TYPE> "schema"."name"`
    pub fn drop_statement(&self) -> String {
        format!(
            "DROP {} {}",
            self.object_type.keyword(),
            self.object.qualified_name()
        )
    }
}

impl std::ops::Deref for TypedDatabaseObject {
    type Target = DatabaseObject;

    fn deref(&self) -> &Self::Target {
        &self.object
    }
}

impl fmt::Display for TypedDatabaseObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.object, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::collections::HashSet;

    fn hash_of<T: Hash>(value: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_names_compare_ignoring_case_and_brackets() {
        let a = DatabaseObject::new("Server", "Db", "[dbo]", "[Foo] ");
        let b = DatabaseObject::new(" server", "DB", "DBO", " foo");

        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn test_different_names_are_different_objects() {
        let a = DatabaseObject::new("s", "d", "dbo", "foo");
        let b = DatabaseObject::new("s", "d", "dbo", "bar");
        assert_ne!(a, b);
    }

    #[test]
    fn test_typed_objects_require_matching_type() {
        let view = TypedDatabaseObject::new("s", "d", "dbo", "thing", ObjectType::View);
        let func = TypedDatabaseObject::new("s", "d", "DBO", "[Thing]", ObjectType::Function);
        let same = TypedDatabaseObject::new("S", "D", "dbo", "THING", ObjectType::View);

        assert_ne!(view, func);
        assert_eq!(view, same);
        assert_eq!(hash_of(&view), hash_of(&same));

        let set: HashSet<_> = [view, func, same].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_trim_object_name() {
        assert_eq!(trim_object_name("[Foo] "), "Foo");
        assert_eq!(trim_object_name(" foo"), "foo");
        assert_eq!(trim_object_name("\"Quoted\""), "Quoted");
        assert_eq!(trim_object_name("[ spaced ]"), "spaced");
        assert_eq!(trim_object_name("plain"), "plain");
        assert_eq!(trim_object_name("\""), "\"");
    }

    #[test]
    fn test_trim_object_name_is_idempotent() {
        for name in ["[Foo] ", " foo", "[[nested]]", "\"[mixed]\"", "  ", "[", "a]"] {
            let once = trim_object_name(name);
            assert_eq!(trim_object_name(&once), once, "input {:?}", name);
        }
        assert_eq!(
            normalize(&trim_object_name("[Foo] ")),
            normalize(&trim_object_name(" foo"))
        );
    }

    #[test]
    fn test_catalog_codes() {
        assert_eq!(ObjectType::from_catalog_code("V"), Some(ObjectType::View));
        assert_eq!(ObjectType::from_catalog_code("P "), Some(ObjectType::Procedure));
        assert_eq!(ObjectType::from_catalog_code("IF"), Some(ObjectType::Function));
        assert_eq!(ObjectType::from_catalog_code("TF"), Some(ObjectType::Function));
        assert_eq!(ObjectType::from_catalog_code("TT"), Some(ObjectType::Type));
        assert_eq!(ObjectType::from_catalog_code("U"), None);
        assert_eq!(ObjectType::from_name("procedure"), Some(ObjectType::Procedure));
        assert_eq!(ObjectType::from_name("foobar"), None);
    }

    #[test]
    fn test_database_defaults_and_display() {
        let dep = DatabaseObject::new("", " ", "dbo", "foo");
        let filled = dep.with_database_if_unspecified("srv", "db");
        assert_eq!(filled.to_string(), "srv.db.dbo.foo");
        assert!(filled.is_in_database("SRV", "[db]"));

        let other = DatabaseObject::new("elsewhere", "", "dbo", "foo")
            .with_database_if_unspecified("srv", "db");
        assert!(!other.is_in_database("srv", "db"));
    }

    #[test]
    fn test_drop_statement_quotes_identifiers() {
        let obj = TypedDatabaseObject::new("s", "d", "dbo", "my\"view", ObjectType::View);
        assert_eq!(obj.drop_statement(), "DROP VIEW \"dbo\".\"my\"\"view\"");
    }
}

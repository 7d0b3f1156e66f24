//! Schema Introspection Module
//!
//! Reads the live database catalog: which buildable objects exist, and which
//! of them depend on which. The live state is what decides between create
//! and alter, and which unchanged objects must be rebuilt.

use crate::connection::{Connection, TextRow};
use crate::error::{DatabaseError, DbError};
use crate::object::{trim_object_name, DatabaseObject, ObjectType, TypedDatabaseObject};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};

/// Views, routines and user-defined types outside the system schemas.
///
/// Columns: schema name, object name, catalog type code.
pub const EXISTING_OBJECTS_QUERY: &str = r#"
    SELECT n.nspname::text, c.relname::text, 'V'::text
    FROM pg_class c
    JOIN pg_namespace n ON n.oid = c.relnamespace
    WHERE c.relkind = 'v'
      AND n.nspname NOT LIKE 'pg\_%'
      AND n.nspname <> 'information_schema'
    UNION ALL
    SELECT n.nspname::text, p.proname::text,
           CASE WHEN p.prokind = 'p' THEN 'P' WHEN p.proretset THEN 'TF' ELSE 'FN' END
    FROM pg_proc p
    JOIN pg_namespace n ON n.oid = p.pronamespace
    WHERE p.prokind IN ('f', 'p')
      AND n.nspname NOT LIKE 'pg\_%'
      AND n.nspname <> 'information_schema'
      AND NOT EXISTS (
          SELECT 1 FROM pg_depend d
          WHERE d.classid = 'pg_proc'::regclass AND d.objid = p.oid AND d.deptype = 'e'
      )
    UNION ALL
    SELECT n.nspname::text, t.typname::text, 'TT'
    FROM pg_type t
    JOIN pg_namespace n ON n.oid = t.typnamespace
    LEFT JOIN pg_class c ON c.oid = t.typrelid
    WHERE (t.typtype = 'e' OR (t.typtype = 'c' AND c.relkind = 'c'))
      AND n.nspname NOT LIKE 'pg\_%'
      AND n.nspname <> 'information_schema'
    ORDER BY 1, 2
"#;

/// Dependency edges between the objects listed by [`EXISTING_OBJECTS_QUERY`].
///
/// Views depend through their rewrite rule, routines through their
/// signature and body, composite types through their attributes.
/// Columns follow [`DependencyRecord`].
pub const DEPENDENCIES_QUERY: &str = r#"
    WITH objects AS (
        SELECT 'pg_class'::regclass::oid AS classid, c.oid AS objid,
               n.nspname::text AS schema_name, c.relname::text AS object_name, 'V'::text AS type_code
        FROM pg_class c
        JOIN pg_namespace n ON n.oid = c.relnamespace
        WHERE c.relkind = 'v'
        UNION ALL
        SELECT 'pg_proc'::regclass::oid, p.oid, n.nspname::text, p.proname::text,
               CASE WHEN p.prokind = 'p' THEN 'P' WHEN p.proretset THEN 'TF' ELSE 'FN' END
        FROM pg_proc p
        JOIN pg_namespace n ON n.oid = p.pronamespace
        WHERE p.prokind IN ('f', 'p')
        UNION ALL
        SELECT 'pg_type'::regclass::oid, t.oid, n.nspname::text, t.typname::text, 'TT'
        FROM pg_type t
        JOIN pg_namespace n ON n.oid = t.typnamespace
        LEFT JOIN pg_class c ON c.oid = t.typrelid
        WHERE t.typtype = 'e' OR (t.typtype = 'c' AND c.relkind = 'c')
    ),
    edges AS (
        SELECT 'pg_class'::regclass::oid AS classid, r.ev_class AS objid, d.refclassid, d.refobjid
        FROM pg_depend d
        JOIN pg_rewrite r ON d.classid = 'pg_rewrite'::regclass::oid AND d.objid = r.oid
        UNION ALL
        SELECT d.classid, d.objid, d.refclassid, d.refobjid
        FROM pg_depend d
        WHERE d.classid = 'pg_proc'::regclass::oid AND d.deptype = 'n'
        UNION ALL
        SELECT 'pg_type'::regclass::oid, t.oid, d.refclassid, d.refobjid
        FROM pg_depend d
        JOIN pg_type t ON d.classid = 'pg_class'::regclass::oid AND d.objid = t.typrelid
        WHERE t.typtype = 'c' AND d.deptype = 'n'
    )
    SELECT DISTINCT o.object_name, o.schema_name, o.type_code,
                    r.object_name, r.schema_name, r.type_code
    FROM edges e
    JOIN objects o ON o.classid = e.classid AND o.objid = e.objid
    JOIN objects r ON r.classid = e.refclassid AND r.objid = e.refobjid
    WHERE NOT (o.classid = r.classid AND o.objid = r.objid)
      AND o.schema_name NOT LIKE 'pg\_%'
      AND o.schema_name <> 'information_schema'
      AND r.schema_name NOT LIKE 'pg\_%'
      AND r.schema_name <> 'information_schema'
"#;

/// One live dependency edge: `object` depends on `dependency`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyRecord {
    pub object_name: String,
    pub schema_name: String,
    pub object_type: String,
    pub dependency_name: String,
    pub dependency_schema_name: String,
    pub dependency_type: String,
}

impl DependencyRecord {
    fn from_row(row: TextRow) -> Result<Self, DbError> {
        let [object_name, schema_name, object_type, dependency_name, dependency_schema_name, dependency_type]: [String; 6] =
            row.try_into().map_err(|row: TextRow| {
                DbError::UnexpectedValue(format!(
                    "dependency row has {} columns, expected 6",
                    row.len()
                ))
            })?;
        Ok(Self {
            object_name,
            schema_name,
            object_type,
            dependency_name,
            dependency_schema_name,
            dependency_type,
        })
    }

    /// The dependent side, placed on `server_name`.`database_name`
    pub fn object(
        &self,
        server_name: &str,
        database_name: &str,
    ) -> Result<TypedDatabaseObject, DatabaseError> {
        typed_object(
            server_name,
            database_name,
            &self.schema_name,
            &self.object_name,
            &self.object_type,
        )
    }

    /// The side being depended on
    pub fn dependency(
        &self,
        server_name: &str,
        database_name: &str,
    ) -> Result<TypedDatabaseObject, DatabaseError> {
        typed_object(
            server_name,
            database_name,
            &self.dependency_schema_name,
            &self.dependency_name,
            &self.dependency_type,
        )
    }
}

fn typed_object(
    server_name: &str,
    database_name: &str,
    schema_name: &str,
    object_name: &str,
    type_code: &str,
) -> Result<TypedDatabaseObject, DatabaseError> {
    let object_type = ObjectType::from_catalog_code(type_code)
        .ok_or_else(|| DatabaseError::UnknownObjectType(type_code.trim().to_string()))?;
    Ok(DatabaseObject::new(
        server_name,
        database_name,
        trim_object_name(schema_name),
        trim_object_name(object_name),
    )
    .with_type(object_type))
}

/// Catalog reader for one database
pub struct SchemaIntrospector;

impl SchemaIntrospector {
    /// Every buildable object currently in the database
    pub async fn existing_objects(
        conn: &dyn Connection,
        server_name: &str,
        database_name: &str,
    ) -> Result<HashSet<TypedDatabaseObject>, DatabaseError> {
        debug!("Querying existing objects of {}.{}", server_name, database_name);
        let rows = conn.query(EXISTING_OBJECTS_QUERY, None).await?;

        let mut objects = HashSet::with_capacity(rows.len());
        for row in rows {
            let [schema_name, object_name, type_code]: [String; 3] =
                row.try_into().map_err(|row: TextRow| {
                    DbError::UnexpectedValue(format!(
                        "object row has {} columns, expected 3",
                        row.len()
                    ))
                })?;
            objects.insert(typed_object(
                server_name,
                database_name,
                &schema_name,
                &object_name,
                &type_code,
            )?);
        }

        info!("Found {} existing objects", objects.len());
        Ok(objects)
    }

    /// Every dependency edge between existing objects
    pub async fn dependencies(
        conn: &dyn Connection,
        timeout: Duration,
    ) -> Result<Vec<DependencyRecord>, DatabaseError> {
        debug!("Querying object dependencies (timeout {:?})", timeout);
        let rows = conn.query(DEPENDENCIES_QUERY, Some(timeout)).await?;
        let records = rows
            .into_iter()
            .map(DependencyRecord::from_row)
            .collect::<Result<Vec<_>, _>>()?;

        info!("Found {} existing dependencies", records.len());
        Ok(records)
    }
}

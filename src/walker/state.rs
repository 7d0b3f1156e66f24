//! Database State Walker
//!
//! Builds a graph of the live database's own dependencies, and uses it to
//! find objects that must be rebuilt because something they depend on is
//! being rebuilt.

use crate::error::DatabaseError;
use crate::introspection::DependencyRecord;
use crate::object::TypedDatabaseObject;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;

/// One live object and its edges
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphNode {
    pub object: TypedDatabaseObject,
    /// Objects this one needs
    pub dependencies: HashSet<TypedDatabaseObject>,
    /// Objects that need this one
    pub referenced_by: HashSet<TypedDatabaseObject>,
}

impl GraphNode {
    fn new(object: TypedDatabaseObject) -> Self {
        Self {
            object,
            dependencies: HashSet::new(),
            referenced_by: HashSet::new(),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct DatabaseState {
    nodes: HashMap<TypedDatabaseObject, GraphNode>,
}

impl DatabaseState {
    /// Build the graph from `(dependent, dependency)` pairs
    pub fn from_edges<I>(edges: I) -> Self
    where
        I: IntoIterator<Item = (TypedDatabaseObject, TypedDatabaseObject)>,
    {
        let mut nodes: HashMap<TypedDatabaseObject, GraphNode> = HashMap::new();
        for (object, dependency) in edges {
            nodes
                .entry(dependency.clone())
                .or_insert_with(|| GraphNode::new(dependency.clone()))
                .referenced_by
                .insert(object.clone());
            nodes
                .entry(object.clone())
                .or_insert_with(|| GraphNode::new(object))
                .dependencies
                .insert(dependency);
        }
        Self { nodes }
    }

    pub fn get(&self, object: &TypedDatabaseObject) -> Option<&GraphNode> {
        self.nodes.get(object)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Live dependencies of `object`; empty when the database does not know it
    pub fn dependencies_of(&self, object: &TypedDatabaseObject) -> HashSet<TypedDatabaseObject> {
        self.nodes
            .get(object)
            .map(|node| node.dependencies.clone())
            .unwrap_or_default()
    }

    /// Objects outside the change set that depend, directly or transitively,
    /// on something inside it.
    pub fn affected_objects<F>(&self, is_in_change_set: F) -> HashSet<TypedDatabaseObject>
    where
        F: Fn(&TypedDatabaseObject) -> bool,
    {
        let mut affected: HashSet<TypedDatabaseObject> = HashSet::new();
        let mut queue: VecDeque<&GraphNode> = self
            .nodes
            .values()
            .filter(|node| {
                !is_in_change_set(&node.object) && node.dependencies.iter().any(&is_in_change_set)
            })
            .collect();

        while let Some(node) = queue.pop_front() {
            if !affected.insert(node.object.clone()) {
                continue;
            }
            for referencer in &node.referenced_by {
                if affected.contains(referencer) || is_in_change_set(referencer) {
                    continue;
                }
                if let Some(next) = self.nodes.get(referencer) {
                    queue.push_back(next);
                }
            }
        }

        affected
    }
}

pub struct DatabaseStateWalker;

impl DatabaseStateWalker {
    /// Build the live dependency graph for `server_name`.`database_name`
    pub fn walk_dependencies(
        records: &[DependencyRecord],
        server_name: &str,
        database_name: &str,
    ) -> Result<DatabaseState, DatabaseError> {
        let edges = records
            .iter()
            .map(|record| {
                Ok((
                    record.object(server_name, database_name)?,
                    record.dependency(server_name, database_name)?,
                ))
            })
            .collect::<Result<Vec<_>, DatabaseError>>()?;

        let state = DatabaseState::from_edges(edges);
        debug!(
            "Walked {} dependency records into {} graph nodes",
            records.len(),
            state.len()
        );
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectType;
    use crate::testing::typed;
    use pretty_assertions::assert_eq;

    fn view(name: &str) -> TypedDatabaseObject {
        typed("dbo", name, ObjectType::View)
    }

    fn record(object: &str, dependency: &str) -> DependencyRecord {
        DependencyRecord {
            object_name: object.to_string(),
            schema_name: "dbo".to_string(),
            object_type: "V".to_string(),
            dependency_name: dependency.to_string(),
            dependency_schema_name: "dbo".to_string(),
            dependency_type: "V".to_string(),
        }
    }

    #[test]
    fn test_edges_are_recorded_both_ways() {
        let state =
            DatabaseStateWalker::walk_dependencies(&[record("b", "a")], "srv", "db").unwrap();

        let a = state.get(&view("a")).unwrap();
        let b = state.get(&view("b")).unwrap();
        assert!(a.referenced_by.contains(&view("b")));
        assert!(a.dependencies.is_empty());
        assert!(b.dependencies.contains(&view("a")));
        assert_eq!(state.dependencies_of(&view("missing")), HashSet::new());
    }

    #[test]
    fn test_affected_objects_follow_referencers_transitively() {
        // C depends on B depends on A
        let state = DatabaseStateWalker::walk_dependencies(
            &[record("b", "a"), record("c", "b")],
            "srv",
            "db",
        )
        .unwrap();

        let changed: HashSet<_> = [view("a")].into_iter().collect();
        let affected = state.affected_objects(|o| changed.contains(o));

        let expected: HashSet<_> = [view("b"), view("c")].into_iter().collect();
        assert_eq!(affected, expected);
    }

    #[test]
    fn test_affected_objects_exclude_change_set() {
        let state = DatabaseState::from_edges([
            (view("b"), view("a")),
            (view("c"), view("b")),
            (view("d"), view("c")),
            (view("b"), view("d")),
        ]);

        let changed: HashSet<_> = [view("a"), view("c")].into_iter().collect();
        let affected = state.affected_objects(|o| changed.contains(o));

        assert!(affected.iter().all(|o| !changed.contains(o)));
        let expected: HashSet<_> = [view("b"), view("d")].into_iter().collect();
        assert_eq!(affected, expected);
    }

    #[test]
    fn test_unknown_type_code_fails_walk() {
        let mut bad = record("b", "a");
        bad.dependency_type = "U".to_string();
        assert!(DatabaseStateWalker::walk_dependencies(&[bad], "srv", "db").is_err());
    }
}

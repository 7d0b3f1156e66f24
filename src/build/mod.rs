//! Build items and the build graph
//!
//! Every script of a build becomes a [`BuildItem`] in an arena owned by
//! [`BuildGraph`]. Items refer to each other by [`ItemId`]; each edge is
//! recorded once as a dependency and once as a referencer.

pub mod builder;
pub mod error;
pub mod executor;

pub use builder::Builder;
pub use error::BuildError;
pub use executor::{CreateExecutor, DropExecutor, ScriptExecutor};

use crate::object::{DatabaseObject, ObjectType, TypedDatabaseObject};
use crate::script::{ScriptAction, ScriptFile};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuildStatus {
    None,
    ScriptError,
    CircularDependencyError,
    BuildError,
    DependencyError,
    Success,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuildAction {
    Create,
    Alter,
    DropAndCreate,
    Drop,
}

impl BuildAction {
    /// Pick the action for a script given whether its object exists now.
    ///
    /// Types cannot be altered in place, so an existing type is dropped and
    /// recreated.
    pub fn for_script(script: &ScriptFile, exists: bool) -> Self {
        if script.script_action() == Some(ScriptAction::Drop) {
            BuildAction::Drop
        } else if exists && script.sql().is_some() && script.object().object_type == ObjectType::Type {
            BuildAction::DropAndCreate
        } else if exists {
            BuildAction::Alter
        } else {
            BuildAction::Create
        }
    }
}

/// Index of an item in its [`BuildGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(usize);

impl ItemId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug)]
pub struct BuildItem {
    script: ScriptFile,
    dependencies: Vec<ItemId>,
    referencers: Vec<ItemId>,
    dependency_depth: usize,
    action: BuildAction,
    status: BuildStatus,
    error: Option<BuildError>,
}

impl BuildItem {
    pub fn script(&self) -> &ScriptFile {
        &self.script
    }

    pub fn object(&self) -> &TypedDatabaseObject {
        self.script.object()
    }

    /// Items this one requires
    pub fn dependencies(&self) -> &[ItemId] {
        &self.dependencies
    }

    /// Items that require this one
    pub fn referencers(&self) -> &[ItemId] {
        &self.referencers
    }

    /// Length of the longest chain of referencers below this item
    pub fn dependency_depth(&self) -> usize {
        self.dependency_depth
    }

    pub fn action(&self) -> BuildAction {
        self.action
    }

    pub fn status(&self) -> BuildStatus {
        self.status
    }

    pub fn error(&self) -> Option<&BuildError> {
        self.error.as_ref()
    }
}

/// A status change, as seen by [`BuildGraph::subscribe`] receivers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTransition {
    pub item: ItemId,
    pub object: TypedDatabaseObject,
    pub old: BuildStatus,
    pub new: BuildStatus,
    pub at: DateTime<Utc>,
}

/// Serializable snapshot of one item for display
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildItemSummary {
    pub object: String,
    pub object_type: ObjectType,
    pub action: BuildAction,
    pub status: BuildStatus,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
    pub dependency_depth: usize,
}

#[derive(Debug, Default)]
pub struct BuildGraph {
    items: Vec<BuildItem>,
    subscribers: Vec<UnboundedSender<StatusTransition>>,
}

impl BuildGraph {
    /// Build the item graph.
    ///
    /// `script_dependencies` pairs each script with the objects of the build
    /// it depends on; `existing_objects` lists what the database has now.
    pub fn from_scripts(
        script_dependencies: Vec<(ScriptFile, HashSet<DatabaseObject>)>,
        existing_objects: &HashSet<DatabaseObject>,
    ) -> Self {
        let mut by_object: HashMap<DatabaseObject, Vec<ItemId>> = HashMap::new();
        let mut wanted = Vec::with_capacity(script_dependencies.len());
        let mut items = Vec::with_capacity(script_dependencies.len());

        for (index, (script, dependencies)) in script_dependencies.into_iter().enumerate() {
            let action =
                BuildAction::for_script(&script, existing_objects.contains(&script.object().object));
            let error = script.error().cloned();
            let status = error.as_ref().map_or(BuildStatus::None, BuildError::status);

            by_object
                .entry(script.object().object.clone())
                .or_default()
                .push(ItemId(index));
            wanted.push(dependencies);
            items.push(BuildItem {
                script,
                dependencies: Vec::new(),
                referencers: Vec::new(),
                dependency_depth: 0,
                action,
                status,
                error,
            });
        }

        let mut edges: HashSet<(ItemId, ItemId)> = HashSet::new();
        for (index, dependencies) in wanted.iter().enumerate() {
            let item = ItemId(index);
            for dependency in dependencies {
                for &target in by_object.get(dependency).into_iter().flatten() {
                    if target != item && edges.insert((item, target)) {
                        items[item.0].dependencies.push(target);
                        items[target.0].referencers.push(item);
                    }
                }
            }
        }

        let mut graph = Self {
            items,
            subscribers: Vec::new(),
        };
        graph.compute_dependency_depths();

        for id in graph.ids() {
            if graph.items[id.0].status == BuildStatus::ScriptError {
                graph.propagate_dependency_error(id);
            }
        }
        for id in graph.ids() {
            if graph.items[id.0].action == BuildAction::DropAndCreate {
                graph.escalate_drop_and_create(id);
            }
        }

        debug!("Created {} build items with {} edges", graph.len(), edges.len());
        graph
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ItemId> {
        (0..self.items.len()).map(ItemId)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ItemId, &BuildItem)> {
        self.items.iter().enumerate().map(|(i, item)| (ItemId(i), item))
    }

    pub fn item(&self, id: ItemId) -> &BuildItem {
        &self.items[id.0]
    }

    pub fn get(&self, id: ItemId) -> Option<&BuildItem> {
        self.items.get(id.0)
    }

    pub fn find(&self, object: &TypedDatabaseObject) -> Option<ItemId> {
        self.iter()
            .find(|(_, item)| item.object() == object)
            .map(|(id, _)| id)
    }

    /// Whether any item ended up with an error
    pub fn has_errors(&self) -> bool {
        self.items.iter().any(|item| item.error.is_some())
    }

    /// Receive every status change made from now on
    pub fn subscribe(&mut self) -> UnboundedReceiver<StatusTransition> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn summaries(&self) -> Vec<BuildItemSummary> {
        self.items
            .iter()
            .map(|item| BuildItemSummary {
                object: item.object().to_string(),
                object_type: item.object().object_type,
                action: item.action,
                status: item.status,
                error_type: item.error.as_ref().map(|e| e.error_type().to_string()),
                error_message: item.error.as_ref().map(|e| e.to_string()),
                dependency_depth: item.dependency_depth,
            })
            .collect()
    }

    /// Record a failure on an item that has not failed yet.
    ///
    /// Returns false when the item already carried an error.
    pub fn report_error(&mut self, id: ItemId, error: BuildError) -> bool {
        if self.items[id.0].error.is_some() {
            return false;
        }
        let status = error.status();
        self.items[id.0].error = Some(error);
        self.set_status(id, status);
        true
    }

    pub fn report_success(&mut self, id: ItemId) {
        self.set_status(id, BuildStatus::Success);
    }

    fn set_status(&mut self, id: ItemId, new: BuildStatus) {
        let item = &mut self.items[id.0];
        let old = item.status;
        if old == new {
            return;
        }
        item.status = new;

        let transition = StatusTransition {
            item: id,
            object: item.object().clone(),
            old,
            new,
            at: Utc::now(),
        };
        self.subscribers
            .retain(|tx| tx.send(transition.clone()).is_ok());
    }

    /// Mark every referencer of `root` still in `None`, transitively, with a
    /// dependency error whose chain runs from `root` to that referencer.
    pub fn propagate_dependency_error(&mut self, root: ItemId) {
        let root_error_type = self.items[root.0]
            .error
            .as_ref()
            .map_or("Build Error", BuildError::error_type);
        let root_chain = vec![self.items[root.0].object().clone()];

        let mut stack: Vec<(ItemId, Vec<TypedDatabaseObject>)> = self.items[root.0]
            .referencers
            .iter()
            .rev()
            .map(|&r| (r, root_chain.clone()))
            .collect();

        while let Some((id, mut chain)) = stack.pop() {
            if self.items[id.0].status != BuildStatus::None {
                continue;
            }
            chain.push(self.items[id.0].object().clone());
            self.report_error(
                id,
                BuildError::Dependency {
                    failure_chain: chain.clone(),
                    root_error_type,
                },
            );
            for &referencer in self.items[id.0].referencers.iter().rev() {
                stack.push((referencer, chain.clone()));
            }
        }
    }

    /// Turn `Alter` referencers of a dropped-and-recreated item into
    /// `DropAndCreate`, transitively.
    fn escalate_drop_and_create(&mut self, root: ItemId) {
        let mut stack = self.items[root.0].referencers.clone();
        while let Some(id) = stack.pop() {
            let item = &mut self.items[id.0];
            if item.action != BuildAction::Alter {
                continue;
            }
            item.action = BuildAction::DropAndCreate;
            stack.extend(item.referencers.iter().copied());
        }
    }

    fn compute_dependency_depths(&mut self) {
        let count = self.items.len();
        let mut depths: Vec<Option<usize>> = vec![None; count];
        let mut on_stack = vec![false; count];

        for start in 0..count {
            if depths[start].is_some() {
                continue;
            }
            // (item, next referencer to visit)
            let mut stack = vec![(start, 0usize)];
            on_stack[start] = true;

            while let Some(&(index, next)) = stack.last() {
                let referencers = &self.items[index].referencers;
                if let Some(referencer) = referencers.get(next) {
                    let top = stack.len() - 1;
                    stack[top].1 += 1;
                    // an edge back onto the stack closes a cycle; it adds no depth
                    if depths[referencer.0].is_none() && !on_stack[referencer.0] {
                        on_stack[referencer.0] = true;
                        stack.push((referencer.0, 0));
                    }
                } else {
                    depths[index] = Some(
                        referencers
                            .iter()
                            .filter_map(|r| depths[r.0])
                            .map(|d| d + 1)
                            .max()
                            .unwrap_or(0),
                    );
                    on_stack[index] = false;
                    stack.pop();
                }
            }
        }

        for (item, depth) in self.items.iter_mut().zip(depths) {
            item.dependency_depth = depth.unwrap_or(0);
        }
    }
}

//! Database facade
//!
//! Ties a script repository to one live database: collects the scripts to
//! build, widens them with the live objects they would break, turns the
//! result into a [`BuildGraph`] and runs it inside a single transaction.

use crate::build::{BuildGraph, Builder};
use crate::config::Settings;
use crate::connection::{Connection, Connector, PgConnector};
use crate::error::DatabaseResult;
use crate::introspection::SchemaIntrospector;
use crate::object::{trim_object_name, DatabaseObject, TypedDatabaseObject};
use crate::repository::ScriptRepository;
use crate::script::ScriptFile;
use crate::walker::{DatabaseStateWalker, ScriptDependencyWalker};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub struct Database {
    server_name: String,
    database_name: String,
    connector: Arc<dyn Connector>,
    dependency_query_timeout: Duration,
}

impl Database {
    pub fn new(server_name: &str, database_name: &str, connector: Arc<dyn Connector>) -> Self {
        Self {
            server_name: trim_object_name(server_name),
            database_name: trim_object_name(database_name),
            connector,
            dependency_query_timeout: Settings::DEFAULT_DEPENDENCY_QUERY_TIMEOUT,
        }
    }

    /// PostgreSQL-backed database described by `settings`
    pub fn connect(settings: &Settings) -> DatabaseResult<Self> {
        let connector = PgConnector::from_config(&settings.database)?;
        info!(
            "Using database {} on {}:{}",
            settings.database.database, settings.database.host, settings.database.port
        );
        Ok(Self::new(&settings.server_name, &settings.database.database, Arc::new(connector))
            .with_dependency_query_timeout(settings.dependency_query_timeout))
    }

    /// PostgreSQL-backed database configured from the environment and an optional .env file
    pub fn from_env() -> DatabaseResult<Self> {
        Self::connect(&Settings::load()?)
    }

    pub fn from_lookup<F>(lookup: F) -> DatabaseResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::connect(&Settings::from_lookup(lookup)?)
    }

    pub fn with_dependency_query_timeout(mut self, timeout: Duration) -> Self {
        self.dependency_query_timeout = timeout;
        self
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    /// Build items for every script in `repository`
    pub async fn get_all_build_items(
        &self,
        repository: &dyn ScriptRepository,
    ) -> DatabaseResult<BuildGraph> {
        info!("Loading all scripts from {}", repository.repository_description());
        let scripts = repository.get_all_scripts().await?;
        self.get_build_items(repository, scripts).await
    }

    /// Build items for the scripts changed since the repository's revision,
    /// plus every live object depending on them.
    pub async fn get_changed_build_items(
        &self,
        repository: &dyn ScriptRepository,
    ) -> DatabaseResult<BuildGraph> {
        info!(
            "Loading changed scripts from {} since {}",
            repository.repository_description(),
            repository.change_source_description()?
        );
        let scripts = repository.get_changed_scripts().await?;
        self.get_build_items(repository, scripts).await
    }

    async fn get_build_items(
        &self,
        repository: &dyn ScriptRepository,
        scripts: Vec<ScriptFile>,
    ) -> DatabaseResult<BuildGraph> {
        info!("Loaded {} scripts", scripts.len());

        let mut order: Vec<TypedDatabaseObject> = Vec::with_capacity(scripts.len());
        let mut by_object: HashMap<TypedDatabaseObject, ScriptFile> = HashMap::new();
        for script in scripts {
            let object = script.object().clone();
            if by_object.contains_key(&object) {
                warn!("Ignoring duplicate script for {}", object);
                continue;
            }
            order.push(object.clone());
            by_object.insert(object, script);
        }

        let conn = self.connector.connect().await?;
        let records = SchemaIntrospector::dependencies(conn.as_ref(), self.dependency_query_timeout).await?;
        let state = DatabaseStateWalker::walk_dependencies(&records, &self.server_name, &self.database_name)?;

        let mut affected: Vec<TypedDatabaseObject> = state
            .affected_objects(|object| by_object.contains_key(object))
            .into_iter()
            .collect();
        affected.sort_by_key(|object| object.to_string());
        info!("{} existing objects depend on the changed scripts", affected.len());

        for object in affected {
            debug!("Loading script for affected object {}", object);
            let script = repository.get_script(&object).await?;
            order.push(object.clone());
            by_object.insert(object, script);
        }

        let mut scripts = Vec::with_capacity(order.len());
        for object in order {
            if let Some(mut script) = by_object.remove(&object) {
                if state.get(&object).is_some() {
                    script.assign_existing_dependencies(state.dependencies_of(&object));
                }
                scripts.push(script);
            }
        }

        let walked = ScriptDependencyWalker::walk(scripts);
        let existing: HashSet<DatabaseObject> =
            SchemaIntrospector::existing_objects(conn.as_ref(), &self.server_name, &self.database_name)
                .await?
                .into_iter()
                .map(|object| object.object)
                .collect();

        let graph = BuildGraph::from_scripts(walked, &existing);
        info!("Created {} build items", graph.len());
        Ok(graph)
    }

    /// Build `graph` in a fresh transaction.
    ///
    /// Returns `Ok(false)` when any item failed or the commit was rejected;
    /// nothing is kept in either case.
    pub async fn build(&self, graph: &mut BuildGraph) -> DatabaseResult<bool> {
        let conn = self.connector.connect().await?;
        conn.begin().await?;
        info!("Started transaction on {}", self);

        if !self.build_with_connection(graph, conn.as_ref()).await {
            return Ok(false);
        }

        match conn.commit().await {
            Ok(()) => {
                info!("Committed transaction on {}", self);
                Ok(true)
            }
            Err(e) => {
                error!("Commit failed on {}: {}", self, e);
                Ok(false)
            }
        }
    }

    /// Build `graph` on a connection whose transaction the caller owns.
    ///
    /// The transaction is rolled back when any item fails and left open
    /// otherwise.
    pub async fn build_with_connection(&self, graph: &mut BuildGraph, conn: &dyn Connection) -> bool {
        Builder::new(conn).build(graph).await
    }
}

impl fmt::Display for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.server_name, self.database_name)
    }
}

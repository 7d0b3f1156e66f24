//! Script Dependency Walker
//!
//! Narrows each script's dependencies to the other scripts of the same
//! build. Anything else is assumed to exist already and stay as it is.

use crate::object::DatabaseObject;
use crate::script::ScriptFile;
use std::collections::HashSet;
use tracing::debug;

pub struct ScriptDependencyWalker;

impl ScriptDependencyWalker {
    /// Pair every script with the objects of the build set it depends on.
    ///
    /// Blank server and database names default to the script's own;
    /// dependencies on other databases are dropped.
    pub fn walk(scripts: Vec<ScriptFile>) -> Vec<(ScriptFile, HashSet<DatabaseObject>)> {
        let build_set: HashSet<DatabaseObject> =
            scripts.iter().map(|s| s.object().object.clone()).collect();

        let walked: Vec<_> = scripts
            .into_iter()
            .map(|script| {
                let own = &script.object().object;
                let dependencies: HashSet<DatabaseObject> = script
                    .dependencies()
                    .into_iter()
                    .map(|d| d.with_database_if_unspecified(&own.server_name, &own.database_name))
                    .filter(|d| d.is_in_database(&own.server_name, &own.database_name))
                    .filter(|d| d != own && build_set.contains(d))
                    .collect();
                (script, dependencies)
            })
            .collect();

        debug!(
            "Resolved {} in-build dependencies across {} scripts",
            walked.iter().map(|(_, deps)| deps.len()).sum::<usize>(),
            walked.len()
        );
        walked
    }
}

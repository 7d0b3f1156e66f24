//! Dependency walking
//!
//! Two views of the same question, "what depends on what": the live
//! database's catalog and the scripts about to be built.

pub mod scripts;
pub mod state;

pub use scripts::ScriptDependencyWalker;
pub use state::{DatabaseState, DatabaseStateWalker, GraphNode};

//! Build executor
//!
//! Runs a [`BuildGraph`] against one open transaction: first a drop phase
//! that walks the graph from the referencers down, then a create/alter phase
//! that walks it from the dependencies up. Each phase repeatedly runs every
//! item whose blockers are done until nothing is left or nothing can move.

use super::executor::{CreateExecutor, DropExecutor, ScriptExecutor};
use super::{BuildError, BuildGraph, BuildItem, BuildStatus, ItemId};
use crate::connection::Connection;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Drop,
    Create,
}

impl Phase {
    /// Items that must finish before `item` may run
    fn blockers(self, item: &BuildItem) -> &[ItemId] {
        match self {
            Phase::Drop => item.referencers(),
            Phase::Create => item.dependencies(),
        }
    }

    /// Items waiting on `item`
    fn unblocks(self, item: &BuildItem) -> &[ItemId] {
        match self {
            Phase::Drop => item.dependencies(),
            Phase::Create => item.referencers(),
        }
    }

    fn is_eligible(self, item: &BuildItem) -> bool {
        match self {
            Phase::Drop => true,
            Phase::Create => item.status() == BuildStatus::None,
        }
    }
}

type BlockerQueue = BTreeMap<ItemId, HashSet<ItemId>>;

pub struct Builder<'a> {
    conn: &'a dyn Connection,
}

impl<'a> Builder<'a> {
    /// Builder over a connection whose transaction is already open
    pub fn new(conn: &'a dyn Connection) -> Self {
        Self { conn }
    }

    /// Build every item of `graph`.
    ///
    /// Returns true when no item carries an error. Otherwise the transaction
    /// is rolled back and false is returned; committing a successful build is
    /// left to the caller.
    pub async fn build(&self, graph: &mut BuildGraph) -> bool {
        let build_id = Uuid::new_v4();
        let span = info_span!("build", %build_id);

        async {
            let started = chrono::Utc::now();
            info!("Building {} items", graph.len());

            self.run_phase(graph, Phase::Drop).await;
            self.run_phase(graph, Phase::Create).await;

            let failed = graph.iter().filter(|(_, item)| item.error().is_some()).count();
            let elapsed = chrono::Utc::now() - started;
            if failed == 0 {
                info!("Built {} items in {} ms", graph.len(), elapsed.num_milliseconds());
                return true;
            }

            warn!("{} of {} items failed, rolling back", failed, graph.len());
            if let Err(e) = self.conn.rollback().await {
                error!(critical = true, "Rollback failed: {}", e);
            }
            false
        }
        .instrument(span)
        .await
    }

    async fn run_phase(&self, graph: &mut BuildGraph, phase: Phase) {
        let executor: &dyn ScriptExecutor = match phase {
            Phase::Drop => &DropExecutor,
            Phase::Create => &CreateExecutor,
        };
        debug!("Starting {} phase", executor.phase());

        let mut queue: BlockerQueue = graph
            .iter()
            .map(|(id, item)| (id, phase.blockers(item).iter().copied().collect()))
            .collect();

        loop {
            let ready: Vec<ItemId> = queue
                .iter()
                .filter(|(_, blockers)| blockers.is_empty())
                .map(|(&id, _)| id)
                .collect();

            if ready.is_empty() {
                if !queue.is_empty() {
                    resolve_stuck(graph, phase, &queue);
                }
                break;
            }

            for id in ready {
                queue.remove(&id);
                if !phase.is_eligible(graph.item(id)) {
                    continue;
                }

                match executor.execute(graph.item(id), self.conn).await {
                    Ok(()) => {
                        if phase == Phase::Create {
                            graph.report_success(id);
                        }
                        for next in phase.unblocks(graph.item(id)) {
                            if let Some(blockers) = queue.get_mut(next) {
                                blockers.remove(&id);
                            }
                        }
                    }
                    Err(fault) => {
                        warn!(
                            "Failed to {} {}: {}",
                            executor.phase(),
                            graph.item(id).object(),
                            fault.detail()
                        );
                        graph.report_error(id, BuildError::from_fault(&fault));
                        graph.propagate_dependency_error(id);
                    }
                }
            }
        }
    }
}

/// Fail the items left in `queue` when no item can run anymore
fn resolve_stuck(graph: &mut BuildGraph, phase: Phase, queue: &BlockerQueue) {
    let cycles: Vec<(ItemId, Vec<ItemId>)> = {
        let graph: &BuildGraph = graph;
        queue
            .keys()
            .copied()
            .filter(|&id| is_pending(graph, id))
            .filter_map(|id| find_cycle(id, queue).map(|path| (id, path)))
            .collect()
    };

    for (id, path) in &cycles {
        let mut path: Vec<_> = path.iter().map(|&p| graph.item(p).object().clone()).collect();
        // drop-phase edges point from dependency to dependent
        if phase == Phase::Drop {
            path.reverse();
        }
        warn!("Circular dependency at {}", graph.item(*id).object());
        graph.report_error(*id, BuildError::CircularDependency { path: Some(path) });
    }
    for (id, _) in &cycles {
        graph.propagate_dependency_error(*id);
    }

    // In the create phase a failed blocker has already failed everything
    // waiting on it. In the drop phase the waiting items are its
    // dependencies, which propagation never reaches.
    let untraced: Vec<ItemId> = {
        let graph: &BuildGraph = graph;
        queue
            .keys()
            .copied()
            .filter(|&id| {
                is_pending(graph, id)
                    && (phase == Phase::Drop || !blocked_by_failure(graph, id, queue))
            })
            .collect()
    };
    for &id in &untraced {
        if phase == Phase::Drop && blocked_by_failure(graph, id, queue) {
            warn!(
                "{} was not dropped because an object referencing it failed",
                graph.item(id).object()
            );
        } else {
            warn!(
                "{} can never be built and no dependency cycle was found",
                graph.item(id).object()
            );
        }
        graph.report_error(id, BuildError::CircularDependency { path: None });
    }
    for &id in &untraced {
        graph.propagate_dependency_error(id);
    }
}

fn is_pending(graph: &BuildGraph, id: ItemId) -> bool {
    graph.item(id).status() == BuildStatus::None
}

/// Shortest walk along blocker edges from `start` back to itself, as
/// `[start, .., start]`
fn find_cycle(start: ItemId, queue: &BlockerQueue) -> Option<Vec<ItemId>> {
    let mut parent: HashMap<ItemId, ItemId> = HashMap::new();
    let mut pending: VecDeque<ItemId> = VecDeque::from([start]);

    while let Some(current) = pending.pop_front() {
        for &blocker in queue.get(&current).into_iter().flatten() {
            if blocker == start {
                let mut path = vec![start];
                let mut step = current;
                while step != start {
                    path.push(step);
                    match parent.get(&step) {
                        Some(&previous) => step = previous,
                        None => break,
                    }
                }
                // collected backwards from the closing edge
                path[1..].reverse();
                path.push(start);
                return Some(path);
            }
            if queue.contains_key(&blocker) && !parent.contains_key(&blocker) {
                parent.insert(blocker, current);
                pending.push_back(blocker);
            }
        }
    }
    None
}

/// Whether anything `id` waits on, directly or transitively, has already failed
fn blocked_by_failure(graph: &BuildGraph, id: ItemId, queue: &BlockerQueue) -> bool {
    let mut visited: HashSet<ItemId> = HashSet::from([id]);
    let mut pending = vec![id];

    while let Some(current) = pending.pop() {
        for &blocker in queue.get(&current).into_iter().flatten() {
            if !queue.contains_key(&blocker) || !is_pending(graph, blocker) {
                return true;
            }
            if visited.insert(blocker) {
                pending.push(blocker);
            }
        }
    }
    false
}

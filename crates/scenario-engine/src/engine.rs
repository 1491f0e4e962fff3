//! Branch execution loop.
//!
//! A branch walks the scenario graph from its entry point: it records the
//! execution point, runs the node, and follows `next_nodes[result]`. The
//! branch ends when a node has no successor, when it joins itself, or when
//! the run token is cancelled. The end of the main branch stops the run.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::error::ScenarioError;
use crate::nodes::{NodeContext, NodeKind};
use crate::scenario::{Scenario, MAIN_BRANCH};
use crate::signal::Signal;
use crate::types::ExecutionPoint;

/// Start a branch as a new task with a fresh completion handle
pub(crate) fn spawn_branch(
    scenario: &Arc<Scenario>,
    branch: &str,
    entry: ExecutionPoint,
    token: CancellationToken,
) {
    let done = Signal::new();
    scenario.register_branch(branch, done.clone());
    log::debug!("Spawning branch '{}' at '{}'", branch, entry.node_id);
    tokio::spawn(run_branch(scenario.clone(), branch.to_string(), entry, token, done));
}

/// Restart a branch interrupted by a pause, keeping its completion handle
pub(crate) fn resume_branch(
    scenario: &Arc<Scenario>,
    branch: &str,
    point: ExecutionPoint,
    token: CancellationToken,
) {
    let done = match scenario.branch(branch).filter(|done| !done.is_resolved()) {
        Some(done) => done,
        None => {
            let done = Signal::new();
            scenario.register_branch(branch, done.clone());
            done
        }
    };
    log::debug!("Resuming branch '{}' at '{}'", branch, point.node_id);
    tokio::spawn(run_branch(scenario.clone(), branch.to_string(), point, token, done));
}

/// Boxed so that nodes spawning branches do not make the future type recursive
fn run_branch(
    scenario: Arc<Scenario>,
    branch: String,
    entry: ExecutionPoint,
    token: CancellationToken,
    done: Signal,
) -> BoxFuture<'static, ()> {
    async move {
        let mut point = entry;

        loop {
            if !scenario.enter(&point, &token) {
                log::debug!("Branch '{}' suspended at '{}'", branch, point.node_id);
                return;
            }

            // Find the current node
            let Some(def) = scenario.node(&point.node_id) else {
                log::warn!("Branch '{}' reached unknown node '{}'", branch, point.node_id);
                finish(&scenario, &branch, &done).await;
                return;
            };

            let outcome = match NodeKind::from_def(def) {
                Ok(kind) if kind.ends_branch(&branch) => {
                    log::debug!("Branch '{}' joined itself at '{}'", branch, point.node_id);
                    done.resolve(0);
                    return;
                }
                Ok(kind) => {
                    let ctx = NodeContext {
                        scenario: &scenario,
                        branch: &branch,
                        node_id: &point.node_id,
                        def,
                        token: &token,
                    };
                    kind.execute(&ctx).await
                }
                Err(e) => Err(e),
            };

            match outcome {
                Ok(result) => {
                    log::debug!(
                        "Node '{}' ({}) returned {}",
                        point.node_id,
                        def.primitive_name,
                        result
                    );
                    // Follow the edge selected by the result code
                    let Some(next) = def.next_node(result) else {
                        finish(&scenario, &branch, &done).await;
                        return;
                    };
                    point = ExecutionPoint {
                        node_id: next.to_string(),
                        prev_result: Some(result),
                    };
                }
                Err(ScenarioError::Cancelled) => {
                    log::debug!("Branch '{}' interrupted at '{}'", branch, point.node_id);
                    return;
                }
                Err(e) => {
                    log::error!(
                        "Node '{}' ({}) failed in branch '{}': {}",
                        point.node_id,
                        def.primitive_name,
                        branch,
                        e
                    );
                    done.resolve(0);
                    scenario.stop(Some(e)).await;
                    return;
                }
            }
        }
    }
    .boxed()
}

/// A branch ran out of nodes; the main branch takes the run down with it
async fn finish(scenario: &Arc<Scenario>, branch: &str, done: &Signal) {
    done.resolve(0);
    if branch == MAIN_BRANCH {
        scenario.stop(None).await;
    } else {
        log::debug!("Branch '{}' finished", branch);
    }
}

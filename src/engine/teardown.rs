//! Explicit teardown of a deployed graph.
//!
//! Waves are deleted last-first so dependants go before the resources they
//! reference. Siblings are deleted concurrently; a failure stops the waves
//! that remain.

use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::graph::{NodeFailure, NodeId, ResourceGraph, ResourceKind};
use crate::planner::ExecutionPlan;
use crate::provider::{DeleteStatus, Provider};

use super::barrier::WaveGate;
use super::retry::Retrier;

/// Result of deleting one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownOutcome {
    /// The resource existed and is gone.
    Deleted,
    /// The resource did not exist.
    Absent,
    /// Deletion failed.
    Failed,
    /// Never attempted because an earlier wave failed or the run was cancelled.
    Skipped,
}

/// Teardown result of one node.
#[derive(Debug, Clone, Serialize)]
pub struct TeardownEntry {
    /// Node identity.
    pub node: NodeId,
    /// Provider-facing name.
    pub name: String,
    /// Outcome.
    pub outcome: TeardownOutcome,
    /// Delete and poll calls made.
    pub attempts: u32,
    /// Error kind, when failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    /// Error message, when failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Outcome of a teardown run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TeardownReport {
    /// Run identifier.
    pub run_id: String,
    /// One entry per node, in deletion order.
    pub nodes: Vec<TeardownEntry>,
    /// True if a failure or cancellation stopped the teardown.
    pub aborted: bool,
}

impl TeardownReport {
    /// Returns true if every resource is gone.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.aborted
            && self
                .nodes
                .iter()
                .all(|n| matches!(n.outcome, TeardownOutcome::Deleted | TeardownOutcome::Absent))
    }

    /// Counts nodes by outcome.
    #[must_use]
    pub fn count(&self, outcome: TeardownOutcome) -> usize {
        self.nodes.iter().filter(|n| n.outcome == outcome).count()
    }

    /// Returns a one-line summary.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} deleted, {} already absent, {} failed, {} skipped",
            self.count(TeardownOutcome::Deleted),
            self.count(TeardownOutcome::Absent),
            self.count(TeardownOutcome::Failed),
            self.count(TeardownOutcome::Skipped)
        )
    }
}

/// Deletes the resources of a graph.
pub struct TeardownEngine {
    provider: Arc<dyn Provider>,
    config: EngineConfig,
    cancel: CancellationToken,
}

impl TeardownEngine {
    /// Creates a teardown engine.
    #[must_use]
    pub fn new(provider: Arc<dyn Provider>, config: EngineConfig) -> Self {
        Self {
            provider,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Uses an externally owned cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Deletes every node of `plan`, last wave first.
    pub async fn teardown(&self, graph: &ResourceGraph, plan: &ExecutionPlan) -> TeardownReport {
        let mut report = TeardownReport {
            run_id: Uuid::new_v4().to_string(),
            ..TeardownReport::default()
        };

        let waves = plan.reversed();
        info!("Teardown {} starting: {} waves", report.run_id, waves.len());

        for wave in &waves {
            let targets: Vec<(NodeId, String)> = wave
                .nodes
                .iter()
                .filter_map(|id| graph.get(id).map(|n| (id.clone(), n.name.clone())))
                .collect();

            if report.aborted || self.cancel.is_cancelled() {
                report.aborted = true;
                report.nodes.extend(targets.into_iter().map(|(node, name)| TeardownEntry {
                    node,
                    name,
                    outcome: TeardownOutcome::Skipped,
                    attempts: 0,
                    error_kind: None,
                    message: None,
                }));
                continue;
            }

            info!("Deleting wave {} ({} nodes)", wave.index, targets.len());
            let entries = self.delete_wave(targets).await;

            if entries.iter().any(|e| e.outcome == TeardownOutcome::Failed) {
                warn!("Wave {} had failures; remaining waves are kept", wave.index);
                report.aborted = true;
            }
            report.nodes.extend(entries);
        }

        info!("Teardown {} finished: {}", report.run_id, report.summary());
        report
    }

    async fn delete_wave(&self, targets: Vec<(NodeId, String)>) -> Vec<TeardownEntry> {
        let gate = WaveGate::new(targets.len());
        let mut dispatched = Vec::with_capacity(targets.len());

        for (id, name) in targets {
            let Some(reporter) = gate.reporter() else {
                continue;
            };
            let provider = Arc::clone(&self.provider);
            let retrier = Retrier::new(&self.config, self.cancel.clone());
            dispatched.push((id.clone(), name.clone()));

            tokio::spawn(async move {
                let mut attempts = 0;
                let result = delete_one(provider.as_ref(), &retrier, id.kind, &name, &mut attempts).await;
                let (outcome, error_kind, message) = match result {
                    Ok(outcome) => (outcome, None, None),
                    Err(failure) => {
                        error!("Deleting {} failed: {}", id, failure.message);
                        (TeardownOutcome::Failed, Some(failure.error_kind), Some(failure.message))
                    }
                };
                reporter.report(TeardownEntry {
                    node: id,
                    name,
                    outcome,
                    attempts,
                    error_kind,
                    message,
                });
            });
        }

        let mut entries = gate.wait().await;
        for (id, name) in dispatched {
            if !entries.iter().any(|e| e.node == id) {
                entries.push(TeardownEntry {
                    node: id,
                    name,
                    outcome: TeardownOutcome::Failed,
                    attempts: 0,
                    error_kind: Some(String::from("worker_lost")),
                    message: Some(String::from("Worker task ended without reporting")),
                });
            }
        }
        entries
    }
}

async fn delete_one(
    provider: &dyn Provider,
    retrier: &Retrier,
    kind: ResourceKind,
    name: &str,
    attempts: &mut u32,
) -> Result<TeardownOutcome, NodeFailure> {
    let label = format!("{kind}/{name}");
    let status = retrier
        .call(&label, attempts, || provider.delete(kind, name))
        .await?;

    match status {
        DeleteStatus::Deleted => Ok(TeardownOutcome::Deleted),
        DeleteStatus::NotFound => Ok(TeardownOutcome::Absent),
        DeleteStatus::Accepted => {
            let label = label.as_str();
            let reads = AtomicU32::new(0);
            let reads_ref = &reads;
            let outcome = retrier
                .poll(label, move || async move {
                    let mut calls = 0;
                    let live = retrier.call(label, &mut calls, || provider.get(kind, name)).await;
                    reads_ref.fetch_add(calls, Ordering::Relaxed);
                    Ok(live?.is_none().then_some(TeardownOutcome::Deleted))
                })
                .await;
            *attempts += reads.load(Ordering::Relaxed);
            outcome
        }
    }
}

impl std::fmt::Debug for TeardownEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeardownEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

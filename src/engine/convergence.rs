//! The convergence engine.
//!
//! Waves run strictly in order. Every node of a wave gets its own task; the
//! engine waits at a [`WaveGate`] until each task has reported, applies the
//! reports to the graph, and stops before the next wave if any node failed.
//! Nothing is rolled back.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{Result, VpnError};
use crate::graph::{FailureCause, NodeFailure, NodeId, ProviderHandle, ResourceGraph, ResourceNode};
use crate::planner::{DiffEngine, DiffType, ExecutionPlan};
use crate::provider::{Provider, ProvisionStatus, ProvisioningState, ResourceRequest};

use super::barrier::WaveGate;
use super::report::{NodeAction, NodeReport, RunReport};
use super::retry::Retrier;

/// Drives a graph to convergence against a provider.
pub struct ConvergenceEngine {
    provider: Arc<dyn Provider>,
    config: EngineConfig,
    cancel: CancellationToken,
}

/// What a worker hands back through the gate.
#[derive(Debug)]
struct WorkerOutcome {
    id: NodeId,
    result: std::result::Result<ProviderHandle, NodeFailure>,
    action: NodeAction,
    attempts: u32,
    create_calls: u32,
}

/// Converges one node. Owns everything it needs so it can run as a task.
struct NodeWorker {
    provider: Arc<dyn Provider>,
    retrier: Retrier,
    node: ResourceNode,
    request: ResourceRequest,
}

impl ConvergenceEngine {
    /// Creates an engine.
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

    /// Returns the token that aborts this engine's runs.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs every wave of `plan` against `graph`.
    ///
    /// Node failures do not make this return `Err`; they are recorded in the
    /// graph and the report.
    ///
    /// # Errors
    ///
    /// Returns an error only if the plan names nodes missing from the graph.
    pub async fn converge(&self, graph: &mut ResourceGraph, plan: &ExecutionPlan) -> Result<RunReport> {
        let mut report = RunReport {
            run_id: Uuid::new_v4().to_string(),
            waves_total: plan.len(),
            ..RunReport::default()
        };

        for wave in &plan.waves {
            for id in &wave.nodes {
                let node = graph
                    .get(id)
                    .ok_or_else(|| VpnError::internal(format!("Unknown node {id}")))?;
                report.nodes.push(NodeReport {
                    node: id.clone(),
                    name: node.name.clone(),
                    wave: wave.index,
                    state: node.state,
                    action: NodeAction::None,
                    attempts: 0,
                    create_calls: 0,
                    cause: None,
                    error_kind: None,
                    message: None,
                });
            }
        }

        info!("Run {} starting: {} waves", report.run_id, plan.len());

        for wave in &plan.waves {
            if self.cancel.is_cancelled() {
                warn!("Run cancelled before wave {}", wave.index);
                report.aborted = true;
                break;
            }

            info!("Dispatching wave {} ({} nodes)", wave.index, wave.nodes.len());
            let outcomes = self.run_wave(graph, &wave.nodes).await?;
            report.waves_dispatched += 1;

            let mut wave_failed = false;
            for outcome in outcomes {
                if let Some(entry) = report.nodes.iter_mut().find(|n| n.node == outcome.id) {
                    entry.action = outcome.action;
                    entry.attempts = outcome.attempts;
                    entry.create_calls = outcome.create_calls;
                }

                match outcome.result {
                    Ok(handle) => {
                        info!("{} converged ({})", outcome.id, outcome.action);
                        graph.mark_created(&outcome.id, handle)?;
                    }
                    Err(failure) => {
                        error!("{} failed: {}", outcome.id, failure.message);
                        graph.mark_failed(&outcome.id, failure)?;
                        wave_failed = true;
                    }
                }
            }

            if wave_failed {
                warn!("Wave {} had failures; later waves are not dispatched", wave.index);
                report.aborted = true;
                break;
            }
        }

        report.sync_from_graph(graph);
        info!("Run {} finished: {}", report.run_id, report.summary());
        Ok(report)
    }

    async fn run_wave(&self, graph: &mut ResourceGraph, nodes: &[NodeId]) -> Result<Vec<WorkerOutcome>> {
        let gate = WaveGate::new(nodes.len());
        let mut outcomes = Vec::new();
        let mut dispatched = Vec::with_capacity(nodes.len());

        for id in nodes {
            let Some(node) = graph.get(id).cloned() else {
                continue;
            };

            let mut resolved = Vec::with_capacity(node.references.len());
            let mut unresolved = None;
            for reference in &node.references {
                match graph.resolve(reference) {
                    Ok(handle) => resolved.push((reference.role, handle.clone())),
                    Err(e) => {
                        unresolved = Some(e);
                        break;
                    }
                }
            }

            graph.mark_creating(id)?;

            if let Some(e) = unresolved {
                outcomes.push(WorkerOutcome {
                    id: id.clone(),
                    result: Err(NodeFailure::new(
                        FailureCause::Permanent,
                        "unresolved_reference",
                        e.to_string(),
                    )),
                    action: NodeAction::None,
                    attempts: 0,
                    create_calls: 0,
                });
                continue;
            }

            let Some(reporter) = gate.reporter() else {
                continue;
            };

            let worker = NodeWorker {
                provider: Arc::clone(&self.provider),
                retrier: Retrier::new(&self.config, self.cancel.clone()),
                request: ResourceRequest {
                    kind: node.kind(),
                    name: node.name.clone(),
                    properties: node.bound_properties(&resolved),
                },
                node,
            };

            dispatched.push(id.clone());
            tokio::spawn(async move {
                let outcome = worker.run().await;
                reporter.report(outcome);
            });
        }

        // Closes once every spawned worker has reported or dropped its reporter.
        let mut reports = gate.wait().await;

        for id in dispatched {
            if !reports.iter().any(|o| o.id == id) {
                error!("Worker for {} ended without reporting", id);
                reports.push(WorkerOutcome {
                    id,
                    result: Err(NodeFailure::new(
                        FailureCause::WorkerLost,
                        "worker_lost",
                        "Worker task ended without reporting",
                    )),
                    action: NodeAction::None,
                    attempts: 0,
                    create_calls: 0,
                });
            }
        }

        outcomes.extend(reports);
        Ok(outcomes)
    }
}

impl NodeWorker {
    async fn run(self) -> WorkerOutcome {
        let mut attempts = 0;
        let mut create_calls = 0;
        let (action, result) = self.converge(&mut attempts, &mut create_calls).await;

        WorkerOutcome {
            id: self.node.id.clone(),
            result,
            action,
            attempts,
            create_calls,
        }
    }

    async fn converge(
        &self,
        attempts: &mut u32,
        create_calls: &mut u32,
    ) -> (NodeAction, std::result::Result<ProviderHandle, NodeFailure>) {
        let kind = self.node.kind();
        let name = self.node.name.as_str();
        let label = self.node.id.to_string();

        let live = match self
            .retrier
            .call(&label, attempts, || self.provider.get(kind, name))
            .await
        {
            Ok(live) => live,
            Err(failure) => return (NodeAction::None, Err(failure)),
        };

        // Bound references are compared too, so a gateway whose IP
        // configurations drifted is written again.
        let diff = DiffEngine::new().diff_properties(name, &self.request.properties, live.as_ref());
        let action = match diff.diff_type {
            DiffType::NoChange => {
                let handle = live.map(|l| l.handle).unwrap_or_default();
                return (NodeAction::Unchanged, Ok(handle));
            }
            DiffType::Create => NodeAction::Created,
            DiffType::Update => {
                info!("{} drifted: {}", label, diff);
                NodeAction::Updated
            }
        };

        let mut writes = 0;
        let status = self
            .retrier
            .call(&label, &mut writes, || self.provider.create_or_update(&self.request))
            .await;
        *attempts += writes;
        *create_calls += writes;

        let result = match status {
            Ok(ProvisionStatus::Succeeded(handle)) => Ok(handle),
            Ok(ProvisionStatus::Accepted) => self.wait_provisioned(&label, attempts).await,
            Err(failure) => Err(failure),
        };

        (action, result)
    }

    async fn wait_provisioned(
        &self,
        label: &str,
        attempts: &mut u32,
    ) -> std::result::Result<ProviderHandle, NodeFailure> {
        let kind = self.node.kind();
        let name = self.node.name.as_str();
        let retrier = &self.retrier;
        let provider = &self.provider;
        let reads = AtomicU32::new(0);
        let reads_ref = &reads;

        let result = retrier
            .poll(label, move || {
                async move {
                    let mut calls = 0;
                    let live = retrier.call(label, &mut calls, || provider.get(kind, name)).await;
                    reads_ref.fetch_add(calls, Ordering::Relaxed);
                    match live? {
                        Some(live) => match live.provisioning_state {
                            ProvisioningState::Succeeded => Ok(Some(live.handle)),
                            ProvisioningState::Failed => Err(NodeFailure::new(
                                FailureCause::Permanent,
                                "provisioning_failed",
                                format!("{label} reached provisioning state Failed"),
                            )),
                            ProvisioningState::InProgress => Ok(None),
                        },
                        // Not visible yet.
                        None => Ok(None),
                    }
                }
            })
            .await;

        *attempts += reads.load(Ordering::Relaxed);
        result
    }
}

impl std::fmt::Debug for ConvergenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConvergenceEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

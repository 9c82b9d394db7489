//! Wires configuration, graph, engine, state and outputs into runs.
//!
//! Every command goes through the same preparation: validate the
//! configuration, build and finalize the graph, then order it into waves.
//! Configuration errors surface here, before any provider call.

use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ConfigHasher, ConfigValidator, DeployConfig};
use crate::engine::{ConvergenceEngine, Retrier, RunReport, TeardownEngine, TeardownReport};
use crate::error::{ProvisionError, Result, StateError, VpnError};
use crate::graph::{FailureCause, GraphBuilder, ResourceGraph};
use crate::outputs::{OutputMap, OutputProjector};
use crate::planner::{DependencyResolver, DeploymentPlan, DiffEngine, ExecutionPlan, PlannedChange};
use crate::provider::Provider;
use crate::state::{DeploymentHistoryEntry, DeploymentOperation, DeploymentState, StateStore};
use crate::verifier::{LiveValidator, VerificationReport};

/// Result of an apply run.
#[derive(Debug, Serialize)]
pub struct ApplyResult {
    /// Per-node outcome.
    pub report: RunReport,
    /// Outputs, present only when the graph converged.
    pub outputs: Option<OutputMap>,
}

/// Runs orchestrator commands against one configuration.
pub struct Orchestrator<'a, S: StateStore> {
    /// Configuration.
    config: &'a DeployConfig,
    /// State store.
    state_store: &'a S,
    /// Control plane.
    provider: Arc<dyn Provider>,
    /// Aborts in-flight runs.
    cancel: CancellationToken,
    /// Configuration hasher.
    hasher: ConfigHasher,
}

impl<'a, S: StateStore> Orchestrator<'a, S> {
    /// Creates an orchestrator.
    #[must_use]
    pub fn new(config: &'a DeployConfig, state_store: &'a S, provider: Arc<dyn Provider>) -> Self {
        Self {
            config,
            state_store,
            provider,
            cancel: CancellationToken::new(),
            hasher: ConfigHasher::new(),
        }
    }

    /// Uses an externally owned cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Validates the configuration and builds the ordered graph.
    ///
    /// # Errors
    ///
    /// Returns validation, graph or ordering errors.
    pub fn prepare(&self) -> Result<(ResourceGraph, ExecutionPlan)> {
        let validation = ConfigValidator::new().validate(self.config)?;
        for warning in &validation.warnings {
            warn!("{}", warning);
        }

        let graph = GraphBuilder::from_config(self.config)?;
        let plan = DependencyResolver::new().resolve(&graph)?;
        debug!("Execution plan:\n{}", plan);
        Ok((graph, plan))
    }

    /// Reads live resources and reports what `apply` would change.
    ///
    /// # Errors
    ///
    /// Returns preparation errors, or a provisioning error if a read fails
    /// after retries.
    pub async fn plan(&self) -> Result<DeploymentPlan> {
        let (graph, execution) = self.prepare()?;
        let retrier = Retrier::new(&self.config.engine, self.cancel.clone());
        let diff_engine = DiffEngine::new();
        let mut changes = Vec::with_capacity(graph.len());

        for wave in &execution.waves {
            for id in &wave.nodes {
                let Some(node) = graph.get(id) else {
                    continue;
                };
                let label = id.to_string();
                let mut calls = 0;
                let live = retrier
                    .call(&label, &mut calls, || self.provider.get(node.kind(), &node.name))
                    .await
                    .map_err(|failure| {
                        let error = if failure.cause == FailureCause::Cancelled {
                            ProvisionError::Aborted {
                                reason: failure.message,
                            }
                        } else {
                            ProvisionError::ProvisioningFailure {
                                node: label.clone(),
                                reason: failure.message,
                            }
                        };
                        VpnError::Provision(error)
                    })?;

                let diff = diff_engine.diff_node(node, live.as_ref());
                changes.push(PlannedChange::from_diff(id.clone(), wave.index, &diff));
            }
        }

        let plan = DeploymentPlan::new(&self.hasher.hash_config(self.config), execution, changes);
        info!("Plan: {}", plan.summary());
        Ok(plan)
    }

    /// Converges the declared resources and records the result.
    ///
    /// Node failures are reported in the result, not as `Err`.
    ///
    /// # Errors
    ///
    /// Returns preparation or state errors.
    pub async fn apply(&self) -> Result<ApplyResult> {
        let (mut graph, execution) = self.prepare()?;
        let config_hash = self.hasher.hash_config(self.config);
        let mut state = self.load_state().await?;

        if state.config_hash != config_hash && !state.config_hash.is_empty() {
            info!(
                "Configuration changed since last apply ({} -> {})",
                ConfigHasher::short_hash(&state.config_hash),
                ConfigHasher::short_hash(&config_hash)
            );
        }
        Self::restore(&mut graph, &state)?;

        let engine = ConvergenceEngine::new(Arc::clone(&self.provider), self.config.engine.clone())
            .with_cancellation(self.cancel.clone());
        let report = engine.converge(&mut graph, &execution).await?;

        let outputs = if graph.is_converged() {
            Some(OutputProjector::new().project(&graph, self.config)?)
        } else {
            None
        };

        state.record_graph(&graph);
        state.config_hash.clone_from(&config_hash);
        state.last_run_id = Some(report.run_id.clone());
        state.outputs.clone_from(&outputs);
        state.add_history(DeploymentHistoryEntry::new(
            DeploymentOperation::Apply,
            &report.run_id,
            &config_hash,
            report.summary(),
            report.is_success(),
        ));
        self.state_store.save(&state).await?;

        Ok(ApplyResult { report, outputs })
    }

    /// Projects outputs from the recorded state.
    ///
    /// # Errors
    ///
    /// Returns `IncompleteGraph` unless the last run left every node `Created`.
    pub async fn outputs(&self) -> Result<OutputMap> {
        let (mut graph, _) = self.prepare()?;
        let state = self.load_state().await?;
        Self::restore(&mut graph, &state)?;
        OutputProjector::new().project(&graph, self.config)
    }

    /// Re-reads live resources and checks them against the configuration.
    ///
    /// # Errors
    ///
    /// Returns preparation or state errors.
    pub async fn verify(&self) -> Result<VerificationReport> {
        let (mut graph, _) = self.prepare()?;
        let validator = LiveValidator::new(Arc::clone(&self.provider), self.config);
        let mut report = validator.verify(&graph, self.config).await;

        let state = self.load_state().await?;
        Self::restore(&mut graph, &state)?;
        if let Ok(outputs) = OutputProjector::new().project(&graph, self.config) {
            LiveValidator::verify_outputs(&mut report, &outputs);
        }

        Ok(report)
    }

    /// Deletes every declared resource, last wave first.
    ///
    /// The state file is removed only when the teardown completes.
    ///
    /// # Errors
    ///
    /// Returns preparation or state errors.
    pub async fn destroy(&self) -> Result<TeardownReport> {
        let (graph, execution) = self.prepare()?;
        let engine = TeardownEngine::new(Arc::clone(&self.provider), self.config.engine.clone())
            .with_cancellation(self.cancel.clone());
        let report = engine.teardown(&graph, &execution).await;

        if report.is_success() {
            self.state_store.delete().await?;
        } else if let Some(mut state) = self.state_store.load().await? {
            let entry = DeploymentHistoryEntry::new(
                DeploymentOperation::Destroy,
                &report.run_id,
                &state.config_hash,
                report.summary(),
                false,
            );
            state.add_history(entry);
            self.state_store.save(&state).await?;
        }

        Ok(report)
    }

    /// Loads the recorded state, or a fresh one.
    ///
    /// # Errors
    ///
    /// Returns an error if the state belongs to another deployment or
    /// cannot be read.
    pub async fn load_state(&self) -> Result<DeploymentState> {
        let Some(state) = self.state_store.load().await? else {
            return Ok(DeploymentState::new(
                &self.config.resource_group_name,
                &self.config.vpn_gateway_name,
            ));
        };

        if state.resource_group != self.config.resource_group_name
            || state.gateway_name != self.config.vpn_gateway_name
        {
            return Err(VpnError::State(StateError::Corrupted {
                message: format!(
                    "State belongs to {}/{}, not {}/{}",
                    state.resource_group,
                    state.gateway_name,
                    self.config.resource_group_name,
                    self.config.vpn_gateway_name
                ),
            }));
        }

        Ok(state)
    }

    fn restore(graph: &mut ResourceGraph, state: &DeploymentState) -> Result<()> {
        for (id, handle) in state.created_handles() {
            if graph.get(&id).is_some() {
                graph.restore_created(&id, handle)?;
            } else {
                debug!("{} is recorded but no longer declared", id);
            }
        }
        Ok(())
    }
}

impl<S: StateStore> std::fmt::Debug for Orchestrator<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("gateway", &self.config.vpn_gateway_name)
            .field("backend", &self.state_store.backend_type())
            .finish_non_exhaustive()
    }
}

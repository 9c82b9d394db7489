//! Output formatting for CLI commands.
//!
//! Every formatter renders either a colored text view or pretty JSON for
//! scripting, depending on the selected `OutputFormat`.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{ConfigHasher, ValidationResult};
use crate::engine::{NodeAction, RunReport, TeardownOutcome, TeardownReport};
use crate::graph::NodeState;
use crate::orchestrator::ApplyResult;
use crate::outputs::OutputMap;
use crate::planner::{DeploymentPlan, DiffType, ExecutionPlan};
use crate::state::DeploymentState;
use crate::verifier::VerificationReport;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan row for table display.
#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "Wave")]
    wave: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Name")]
    name: String,
}

/// Run row for table display.
#[derive(Tabled)]
struct RunRow {
    #[tabled(rename = "Wave")]
    wave: usize,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Attempts")]
    attempts: u32,
}

/// Teardown row for table display.
#[derive(Tabled)]
struct TeardownRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
}

/// State node row for table display.
#[derive(Tabled)]
struct StateRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "ID")]
    id: String,
}

#[derive(Serialize)]
struct ValidationJson<'a> {
    valid: bool,
    errors: Vec<String>,
    warnings: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    execution: Option<&'a ExecutionPlan>,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a validation result and, when valid, the execution waves.
    #[must_use]
    pub fn format_validation(
        &self,
        result: &ValidationResult,
        execution: Option<&ExecutionPlan>,
        show_warnings: bool,
    ) -> String {
        match self.format {
            OutputFormat::Json => to_json(&ValidationJson {
                valid: result.errors.is_empty(),
                errors: result.errors.iter().map(ToString::to_string).collect(),
                warnings: &result.warnings,
                execution,
            }),
            OutputFormat::Text => {
                let mut output = String::new();

                if result.errors.is_empty() {
                    let _ = writeln!(output, "{} Configuration is valid", "✓".green());
                } else {
                    let _ = writeln!(
                        output,
                        "{} Configuration has {} error(s):",
                        "✗".red(),
                        result.error_count()
                    );
                    for error in &result.errors {
                        let _ = writeln!(output, "   - {error}");
                    }
                }

                if !result.warnings.is_empty() {
                    if show_warnings {
                        let _ = writeln!(output, "\n{} Warnings:", "⚠".yellow());
                        for warning in &result.warnings {
                            let _ = writeln!(output, "   - {warning}");
                        }
                    } else {
                        let _ = writeln!(
                            output,
                            "{} {} warning(s), use --warnings to show",
                            "⚠".yellow(),
                            result.warning_count()
                        );
                    }
                }

                if let Some(execution) = execution {
                    let _ = write!(
                        output,
                        "\nExecution plan ({} resources):\n{execution}",
                        execution.node_count()
                    );
                }

                output
            }
        }
    }

    /// Formats a deployment plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &DeploymentPlan, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => to_json(plan),
            OutputFormat::Text => Self::format_plan_text(plan, detailed),
        }
    }

    fn format_plan_text(plan: &DeploymentPlan, detailed: bool) -> String {
        if !plan.has_changes() {
            return format!(
                "{} No changes required, {} resources match the configuration.\n",
                "✓".green(),
                plan.changes.len()
            );
        }

        let mut output = String::new();
        let _ = writeln!(output, "\nDeployment Plan");
        let _ = write!(
            output,
            "   Config hash: {}\n\n",
            ConfigHasher::short_hash(&plan.config_hash)
        );

        let rows: Vec<PlanRow> = plan
            .changes
            .iter()
            .filter(|c| detailed || c.action != DiffType::NoChange)
            .map(|c| PlanRow {
                wave: c.wave,
                action: Self::format_diff_type(c.action),
                resource: c.node.to_string(),
                name: c.name.clone(),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        if detailed {
            for change in plan.changes.iter().filter(|c| c.action == DiffType::Update) {
                let _ = writeln!(
                    output,
                    "   ~ {}: {}",
                    change.node,
                    change.fields.join(", ")
                );
            }
        }

        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} unchanged\n",
            plan.count(DiffType::Create).to_string().green(),
            plan.count(DiffType::Update).to_string().yellow(),
            plan.count(DiffType::NoChange)
        );

        output
    }

    /// Formats the result of an apply run.
    #[must_use]
    pub fn format_apply(&self, result: &ApplyResult) -> String {
        match self.format {
            OutputFormat::Json => to_json(result),
            OutputFormat::Text => {
                let mut output = Self::format_run_text(&result.report);
                if let Some(outputs) = &result.outputs {
                    let _ = write!(output, "\nOutputs:\n{outputs}\n");
                }
                output
            }
        }
    }

    fn format_run_text(report: &RunReport) -> String {
        let status = if report.is_success() {
            format!("{} Apply complete", "✓".green())
        } else {
            format!("{} Apply incomplete", "✗".red())
        };

        let mut output = format!("{status} (run {})\n\n", report.run_id);

        let rows: Vec<RunRow> = report
            .nodes
            .iter()
            .map(|n| RunRow {
                wave: n.wave,
                resource: n.node.to_string(),
                state: Self::format_node_state(n.state),
                action: Self::format_node_action(n.action),
                attempts: n.attempts,
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let failed = report.failed();
        if !failed.is_empty() {
            let _ = write!(output, "\n{} Failures:\n", "⚠".yellow());
            for node in failed {
                let _ = writeln!(
                    output,
                    "   - {} [{}]: {}",
                    node.node,
                    node.error_kind.as_deref().unwrap_or("unknown"),
                    node.message.as_deref().unwrap_or("")
                );
            }
        }

        let _ = writeln!(output, "\n{}", report.summary());
        output
    }

    /// Formats projected outputs.
    #[must_use]
    pub fn format_outputs(&self, outputs: &OutputMap) -> String {
        match self.format {
            OutputFormat::Json => to_json(outputs),
            OutputFormat::Text => format!("{outputs}\n"),
        }
    }

    /// Formats a verification report.
    #[must_use]
    pub fn format_verification(&self, report: &VerificationReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(report),
            OutputFormat::Text => {
                let status = if report.passed() {
                    format!("{} Verification passed", "✓".green())
                } else {
                    format!("{} Verification failed", "✗".red())
                };
                format!("{report}\n\n{status}\n")
            }
        }
    }

    /// Formats a teardown report.
    #[must_use]
    pub fn format_teardown(&self, report: &TeardownReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(report),
            OutputFormat::Text => {
                let status = if report.is_success() {
                    format!("{} Destroy complete", "✓".green())
                } else {
                    format!("{} Destroy incomplete", "✗".red())
                };
                let mut output = format!("{status} (run {})\n\n", report.run_id);

                let rows: Vec<TeardownRow> = report
                    .nodes
                    .iter()
                    .map(|n| TeardownRow {
                        resource: n.node.to_string(),
                        name: n.name.clone(),
                        outcome: Self::format_teardown_outcome(n.outcome),
                    })
                    .collect();
                output.push_str(&Table::new(rows).to_string());
                output.push('\n');

                for node in report
                    .nodes
                    .iter()
                    .filter(|n| n.outcome == TeardownOutcome::Failed)
                {
                    let _ = writeln!(
                        output,
                        "   - {} [{}]: {}",
                        node.node,
                        node.error_kind.as_deref().unwrap_or("unknown"),
                        node.message.as_deref().unwrap_or("")
                    );
                }

                let _ = writeln!(output, "\n{}", report.summary());
                output
            }
        }
    }

    /// Formats deployment state.
    #[must_use]
    pub fn format_state(&self, state: &DeploymentState) -> String {
        match self.format {
            OutputFormat::Json => to_json(state),
            OutputFormat::Text => {
                let mut output = String::new();

                let _ = write!(
                    output,
                    "\nState: {}/{}\n\n",
                    state.resource_group, state.gateway_name
                );
                let _ = writeln!(output, "   Version: {}", state.version);
                let _ = writeln!(
                    output,
                    "   Config hash: {}",
                    ConfigHasher::short_hash(&state.config_hash)
                );
                let _ = writeln!(output, "   Last updated: {}", state.last_updated);
                if let Some(run_id) = &state.last_run_id {
                    let _ = writeln!(output, "   Last run: {run_id}");
                }

                if !state.nodes.is_empty() {
                    let rows: Vec<StateRow> = state
                        .nodes
                        .iter()
                        .map(|(key, record)| StateRow {
                            resource: key.clone(),
                            name: record.name.clone(),
                            state: Self::format_node_state(record.state),
                            id: record
                                .handle
                                .as_ref()
                                .map_or_else(|| String::from("-"), |h| h.id.clone()),
                        })
                        .collect();
                    output.push('\n');
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                if !state.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", state.history.len());
                    for entry in state.history.iter().rev().take(5) {
                        let status = if entry.success { "✓" } else { "✗" };
                        let _ = writeln!(
                            output,
                            "     {status} {} - {} ({})",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            entry.summary
                        );
                    }
                }

                output
            }
        }
    }

    fn format_diff_type(diff_type: DiffType) -> String {
        match diff_type {
            DiffType::Create => "+create".green().to_string(),
            DiffType::Update => "~update".yellow().to_string(),
            DiffType::NoChange => "unchanged".dimmed().to_string(),
        }
    }

    fn format_node_state(state: NodeState) -> String {
        match state {
            NodeState::Created => "created".green().to_string(),
            NodeState::Creating => "creating".yellow().to_string(),
            NodeState::Failed => "failed".red().to_string(),
            NodeState::Pending => "pending".dimmed().to_string(),
        }
    }

    fn format_node_action(action: NodeAction) -> String {
        match action {
            NodeAction::Created => "+created".green().to_string(),
            NodeAction::Updated => "~updated".yellow().to_string(),
            NodeAction::Unchanged | NodeAction::None => action.to_string().dimmed().to_string(),
        }
    }

    fn format_teardown_outcome(outcome: TeardownOutcome) -> String {
        match outcome {
            TeardownOutcome::Deleted => "deleted".red().to_string(),
            TeardownOutcome::Absent => "absent".dimmed().to_string(),
            TeardownOutcome::Failed => "failed".red().bold().to_string(),
            TeardownOutcome::Skipped => "skipped".yellow().to_string(),
        }
    }

    /// Formats a success message.
    #[must_use]
    pub fn success(&self, message: &str) -> String {
        self.message("success", &"✓".green().to_string(), message)
    }

    /// Formats an error message.
    #[must_use]
    pub fn error(&self, message: &str) -> String {
        self.message("error", &"✗".red().to_string(), message)
    }

    /// Formats a warning message.
    #[must_use]
    pub fn warning(&self, message: &str) -> String {
        self.message("warning", &"⚠".yellow().to_string(), message)
    }

    fn message(&self, status: &str, mark: &str, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                to_json(&serde_json::json!({ "status": status, "message": message }))
            }
            OutputFormat::Text => format!("{mark} {message}"),
        }
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

//! Halldyll VPN CLI entrypoint.
//!
//! This is the main entrypoint for the halldyll-vpn command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use halldyll_vpn_gateway::cli::{Cli, Commands, OutputFormatter, StateCommands};
use halldyll_vpn_gateway::config::{find_config_file, ConfigParser, ConfigValidator, DeployConfig};
use halldyll_vpn_gateway::error::Result;
use halldyll_vpn_gateway::graph::GraphBuilder;
use halldyll_vpn_gateway::orchestrator::Orchestrator;
use halldyll_vpn_gateway::planner::DependencyResolver;
use halldyll_vpn_gateway::provider::{AzureProvider, Provider, SimulatedProvider};
use halldyll_vpn_gateway::state::{LocalStateStore, StateStore, STATE_DIR};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Subscription id reported by the simulated control plane.
const SIMULATED_SUBSCRIPTION: &str = "00000000-0000-0000-0000-000000000000";

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse_args();

    init_logging(cli.verbose, cli.log_json);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling in-flight work");
            signal_token.cancel();
        }
    });

    match runtime.block_on(run(cli, cancel)) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e}");
            if e.is_configuration() {
                eprintln!("Run 'halldyll-vpn validate --warnings' for a full report.");
            }
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point. Returns whether the command succeeded.
async fn run(cli: Cli, cancel: CancellationToken) -> Result<bool> {
    let formatter = OutputFormatter::new(cli.output);
    let config_file = resolve_config_path(cli.config.as_ref())?;

    if let Commands::Validate { warnings } = cli.command {
        return cmd_validate(&config_file, warnings, &formatter);
    }

    let config = load_config(&config_file)?;
    let state_store = state_store_for(&config, &config_file);
    let provider = create_provider(&config, cli.simulate)?;
    let orchestrator =
        Orchestrator::new(&config, &state_store, provider).with_cancellation(cancel);

    match cli.command {
        Commands::Validate { .. } => Ok(true),
        Commands::Plan { detailed } => {
            let plan = orchestrator.plan().await?;
            emit(&formatter.format_plan(&plan, detailed))?;
            Ok(true)
        }
        Commands::Apply { yes } => cmd_apply(&orchestrator, yes, &formatter).await,
        Commands::Outputs => {
            let outputs = orchestrator.outputs().await?;
            emit(&formatter.format_outputs(&outputs))?;
            Ok(true)
        }
        Commands::Verify => {
            let report = orchestrator.verify().await?;
            emit(&formatter.format_verification(&report))?;
            Ok(report.passed())
        }
        Commands::Destroy { yes } => cmd_destroy(&orchestrator, &config, yes, &formatter).await,
        Commands::State { command } => match command {
            StateCommands::Show => {
                if let Some(state) = state_store.load().await? {
                    emit(&formatter.format_state(&state))?;
                } else {
                    eprintln!("No state found at {}", state_store.path().display());
                }
                Ok(true)
            }
        },
    }
}

/// Validates configuration and shows the execution waves.
fn cmd_validate(config_file: &Path, show_warnings: bool, formatter: &OutputFormatter) -> Result<bool> {
    info!("Validating configuration: {}", config_file.display());
    let config = parse_config(config_file)?;

    let result = ConfigValidator::new().check(&config);
    if !result.errors.is_empty() {
        emit(&formatter.format_validation(&result, None, show_warnings))?;
        return Ok(false);
    }

    let graph = GraphBuilder::from_config(&config)?;
    let execution = DependencyResolver::new().resolve(&graph)?;
    emit(&formatter.format_validation(&result, Some(&execution), show_warnings))?;
    Ok(true)
}

/// Shows the plan, asks for confirmation, then converges.
async fn cmd_apply<S: StateStore>(
    orchestrator: &Orchestrator<'_, S>,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<bool> {
    if !auto_approve {
        let plan = orchestrator.plan().await?;
        emit(&formatter.format_plan(&plan, false))?;

        if !plan.has_changes() {
            eprintln!("Re-applying will only re-verify existing resources.");
        }
        if !confirm("Do you want to apply this plan? [y/N]: ", "y")? {
            eprintln!("Apply cancelled.");
            return Ok(true);
        }
    }

    let result = orchestrator.apply().await?;
    emit(&formatter.format_apply(&result))?;
    Ok(result.report.is_success())
}

/// Deletes every declared resource after confirmation.
async fn cmd_destroy<S: StateStore>(
    orchestrator: &Orchestrator<'_, S>,
    config: &DeployConfig,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<bool> {
    if !auto_approve {
        eprintln!(
            "Every resource of gateway '{}' in '{}' will be deleted.",
            config.vpn_gateway_name, config.resource_group_name
        );
        if !confirm("This action is IRREVERSIBLE. Type 'destroy' to confirm: ", "destroy")? {
            eprintln!("Destruction cancelled.");
            return Ok(true);
        }
    }

    let report = orchestrator.destroy().await?;
    emit(&formatter.format_teardown(&report))?;
    Ok(report.is_success())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Resolves the configuration file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

fn config_dir(config_file: &Path) -> &Path {
    config_file.parent().unwrap_or_else(|| Path::new("."))
}

/// Parses the configuration with `.env` and `HALLDYLL_*` overrides applied.
fn parse_config(config_file: &Path) -> Result<DeployConfig> {
    let parser = ConfigParser::new().with_base_path(config_dir(config_file));
    parser.load_dotenv()?;
    parser.load_with_env(config_file)
}

/// Loads and validates the configuration.
fn load_config(config_file: &Path) -> Result<DeployConfig> {
    debug!("Loading configuration from: {}", config_file.display());
    let config = parse_config(config_file)?;
    ConfigValidator::new().validate(&config)?;
    Ok(config)
}

/// Creates the state store next to the config file unless a path is configured.
fn state_store_for(config: &DeployConfig, config_file: &Path) -> LocalStateStore {
    let dir = config
        .state
        .path
        .as_ref()
        .map_or_else(|| config_dir(config_file).join(STATE_DIR), PathBuf::from);
    LocalStateStore::for_deployment(dir, &config.resource_group_name, &config.vpn_gateway_name)
}

/// Creates the Azure client, or the simulated control plane.
fn create_provider(config: &DeployConfig, simulate: bool) -> Result<Arc<dyn Provider>> {
    if simulate {
        info!("Using the simulated control plane");
        return Ok(Arc::new(SimulatedProvider::new(
            SIMULATED_SUBSCRIPTION,
            &config.resource_group_name,
        )));
    }
    Ok(Arc::new(AzureProvider::from_env(&config.resource_group_name)?))
}

/// Prompts on stderr and compares the answer.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case(expected))
}

/// Writes command output to stdout.
fn emit(output: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{output}")?;
    Ok(())
}

//! autopilot - run one coding task against a repository checkout.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use autopilot::{
    Executor, GeneratorConfig, GitCli, HttpGenerator, Orchestrator, ShellRunner,
};
use autopilot_core::{AuditLog, Config, GeneratorProvider, Id, RunOutcome, SafetyGate};
use clap::Parser;
use eyre::WrapErr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "autopilot", about = "Autonomous coding agent turn loop", version)]
struct Cli {
    /// Task description
    task: String,

    /// Repository checkout to work in
    #[arg(long, default_value = ".")]
    workspace: PathBuf,

    /// Extra config file layered over the workspace config
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run identifier (defaults to a time-ordered id)
    #[arg(long)]
    run_id: Option<String>,

    #[arg(long)]
    max_turns: Option<u32>,

    #[arg(long)]
    max_minutes: Option<u64>,

    /// Generation provider (anthropic or gemini)
    #[arg(long)]
    provider: Option<String>,

    #[arg(long)]
    model: Option<String>,

    /// Enable debug logging when RUST_LOG is unset
    #[arg(long)]
    debug: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to create tokio runtime: {}", e);
            return ExitCode::from(2);
        }
    };

    runtime.block_on(async {
        let mut orchestrator = match setup(&cli) {
            Ok(orchestrator) => orchestrator,
            Err(e) => {
                error!("failed to initialize run: {:#}", e);
                return ExitCode::from(2);
            }
        };

        let cancel = orchestrator.cancellation_token();
        let signals = tokio::spawn(cancel_on_signal(cancel));

        let outcome = orchestrator.execute_task(&cli.task).await;
        signals.abort();

        print_outcome(&outcome);
        if outcome.success {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }
    })
}

fn setup(cli: &Cli) -> eyre::Result<Orchestrator> {
    let root = cli
        .workspace
        .canonicalize()
        .wrap_err_with(|| format!("workspace not found: {}", cli.workspace.display()))?;

    let mut config = Config::for_workspace(&root, cli.config.as_deref())
        .wrap_err("failed to load configuration")?;
    for key in &config.unknown_keys {
        warn!(key = %key, "ignoring unknown config key");
    }
    apply_overrides(&mut config, cli)?;

    let run_id = cli
        .run_id
        .as_ref()
        .map_or_else(Id::new, |id| Id::from_string(id.clone()));

    let audit = AuditLog::create(&config.log_dir, &run_id).wrap_err_with(|| {
        format!("failed to create audit log in {}", config.log_dir.display())
    })?;
    info!(run_id = %run_id, audit_log = %audit.path().display(), "audit log opened");

    let generator = HttpGenerator::new(
        GeneratorConfig::from_config(&config).wrap_err("failed to configure generator")?,
    )
    .wrap_err("failed to build http client")?;

    let log_dir = config
        .log_dir
        .canonicalize()
        .unwrap_or_else(|_| config.log_dir.clone());
    let excluded = log_dir
        .strip_prefix(&root)
        .ok()
        .filter(|relative| !relative.as_os_str().is_empty())
        .map(|relative| vec![relative.to_string_lossy().into_owned()])
        .unwrap_or_default();

    let executor = Executor::new(
        SafetyGate::new(&root).with_protected(&log_dir),
        Arc::new(ShellRunner::new(config.command_timeout())),
        Arc::new(GitCli::new(&root).with_excluded(excluded)),
    );

    Ok(Orchestrator::new(config, Arc::new(generator), executor, audit, run_id))
}

/// CLI flags take precedence over every config file.
fn apply_overrides(config: &mut Config, cli: &Cli) -> eyre::Result<()> {
    if let Some(provider) = &cli.provider {
        config.provider = GeneratorProvider::parse(provider)
            .ok_or_else(|| eyre::eyre!("unknown provider: {provider}"))?;
    }
    if let Some(model) = &cli.model {
        config.model.clone_from(model);
    }
    if let Some(max_turns) = cli.max_turns {
        config.max_turns = max_turns;
    }
    if let Some(max_minutes) = cli.max_minutes {
        config.max_minutes = max_minutes;
    }
    Ok(())
}

fn print_outcome(outcome: &RunOutcome) {
    match serde_json::to_string(outcome) {
        Ok(json) => println!("{json}"),
        Err(e) => error!("failed to serialize outcome: {}", e),
    }
}

/// Cancel the run on SIGINT/SIGTERM; the loop stops at the next turn boundary.
async fn cancel_on_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                (Err(e), _) | (_, Err(e)) => {
                    warn!("failed to register signal handlers: {}", e);
                    return;
                }
            };

        tokio::select! {
            _ = sigint.recv() => {
                info!("received SIGINT, cancelling after the current turn");
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, cancelling after the current turn");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {}", e);
            return;
        }
        info!("received SIGINT, cancelling after the current turn");
    }

    cancel.cancel();
}

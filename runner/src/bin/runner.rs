use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use runner_core::config::Config;
use runner_core::kernel::control_plane::ControlPlaneClient;
use runner_core::kernel::jobs::advisors::{HeuristicProbabilityOracle, NoopFormFieldMapper, PassthroughDescriptionCustomizer};
use runner_core::kernel::jobs::catalog::DirectoryCatalog;
use runner_core::kernel::jobs::driver::EscalatingDriver;
use runner_core::kernel::jobs::health::HealthMonitorConfig;
use runner_core::kernel::jobs::resilience::RetryPolicy;
use runner_core::kernel::jobs::runner::{JobRunner, JobRunnerConfig};
use runner_core::kernel::jobs::scheduler::SchedulerConfig;
use runner_core::kernel::traits::{SubmissionDriver, SubmissionOutcome};

#[derive(Debug, Parser)]
#[command(name = "autobolt-runner", about = "Directory submission job runner")]
struct Cli {
    /// Path to an env file; defaults to `.env` in the current directory.
    #[arg(long, env = "AUTOBOLT_ENV_FILE")]
    config: Option<String>,

    /// Path to the directory catalog JSON file; overrides the default search path.
    #[arg(long, env = "DIRECTORY_LIST_PATH")]
    catalog: Option<String>,

    /// Poll once, run at most one job, then exit. Useful for one-shot invocations.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    if let Some(path) = &cli.config {
        dotenvy::from_path(path).with_context(|| format!("loading env file at {path}"))?;
    }

    let config = Config::from_env().context("loading configuration")?;
    let catalog_path = cli.catalog.as_deref().or(config.directory_list_path.as_deref());
    let catalog = Arc::new(DirectoryCatalog::load(catalog_path).context("loading directory catalog")?);
    info!(directories = catalog.len(), "directory catalog loaded");

    let control_plane = Arc::new(
        ControlPlaneClient::new(config.api_base.clone(), config.api_key.clone())
            .context("building control-plane client")?,
    );

    let driver: Arc<dyn SubmissionDriver> = Arc::new(EscalatingDriver::new(
        NotImplementedDriver,
        NotImplementedDriver,
        config.escalation_threshold,
    ));
    let oracle = Arc::new(HeuristicProbabilityOracle);
    let description_customizer = Arc::new(PassthroughDescriptionCustomizer);
    let form_field_mapper = Arc::new(NoopFormFieldMapper);

    let runner = JobRunner::new(
        JobRunnerConfig {
            worker_id: config.worker_id.clone(),
            poll_interval: config.poll_interval,
            heartbeat_interval: config.heartbeat_interval,
            scheduler: SchedulerConfig {
                max_concurrent_attempts: config.max_concurrent_attempts,
                attempt_timeout: config.attempt_timeout,
                dir_delay_min: config.dir_delay_min,
                dir_delay_max: config.dir_delay_max,
                ai_probability_threshold: config.ai_probability_threshold,
                escalation_threshold: config.escalation_threshold,
            },
            health: HealthMonitorConfig {
                ewma_alpha: config.health_ewma_alpha,
                unhealthy_success_rate: config.health_unhealthy_success_rate,
                unhealthy_observation_count: config.health_unhealthy_observation_count,
                recovery_success_rate: config.health_recovery_success_rate,
                recovery_streak_required: config.health_recovery_streak_required,
            },
            retry_policy: RetryPolicy::default(),
        },
        control_plane,
        catalog,
        driver,
        oracle,
        description_customizer,
        form_field_mapper,
    );

    let shutdown = CancellationToken::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to install signal handler");
            return;
        }
        info!("shutdown signal received");
        signal_shutdown.cancel();
    });

    if cli.once {
        runner.run_once(shutdown).await;
    } else {
        runner.run(shutdown).await;
    }

    Ok(())
}

/// Placeholder driver wired in on both sides of the escalation split until a
/// production submission backend (a headless-browser or HTTP-form driver) is
/// supplied by the deployment.
struct NotImplementedDriver;

#[async_trait::async_trait]
impl SubmissionDriver for NotImplementedDriver {
    async fn submit(
        &self,
        _directory: &runner_core::kernel::jobs::directory::DirectoryDescriptor,
        _profile: &runner_core::kernel::jobs::job::BusinessProfile,
    ) -> SubmissionOutcome {
        SubmissionOutcome::failure("driver_not_configured")
    }
}

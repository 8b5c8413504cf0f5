//! turbo-controller — ACC-Turbo control plane agent.
//!
//! Connects to the switch, loads the pipeline, then periodically re-ranks
//! cluster priorities by traffic volume and records per-channel throughput.
//!
//! # Usage
//!
//! ```bash
//! turbo-controller --p4info build/accturbo.p4info.txt --bmv2-json build/accturbo.json \
//!     --rank-interval 5
//!
//! # With a config file and environment overrides
//! TURBO_THROUGHPUT_INTERVAL_SECS=3 turbo-controller --config config/turbo.toml \
//!     --p4info build/accturbo.p4info.txt --bmv2-json build/accturbo.json
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use tracing::{info, warn};

use turbo_control::Controller;
use turbo_core::config::load_dotenv;
use turbo_core::{Backend, ControllerConfig, PipelineArtifacts, SimulatedSwitch};

/// ACC-Turbo control plane agent.
#[derive(Parser, Debug)]
#[command(name = "turbo-controller", version, about)]
struct Cli {
    /// P4Info descriptor produced by the P4 compiler.
    #[arg(long, env = "TURBO_P4INFO")]
    p4info: PathBuf,

    /// BMv2 JSON device program produced by the P4 compiler.
    #[arg(long = "bmv2-json", env = "TURBO_BMV2_JSON")]
    bmv2_json: PathBuf,

    /// Optional TOML config file; defaults plus TURBO_* variables otherwise.
    #[arg(long, env = "TURBO_CONFIG")]
    config: Option<PathBuf>,

    /// Seconds between priority re-rankings (required, here or in config).
    #[arg(long)]
    rank_interval: Option<u64>,

    /// Seconds between throughput samples.
    #[arg(long)]
    throughput_interval: Option<u64>,

    /// Longest the loop sleeps between checks, in milliseconds.
    #[arg(long)]
    tick_millis: Option<u64>,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<ControllerConfig> {
        let mut config = match &self.config {
            Some(path) => ControllerConfig::from_file(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => ControllerConfig::from_env()?,
        };

        if let Some(secs) = self.rank_interval {
            config.schedule.rank_interval_secs = Some(secs);
        }
        if let Some(secs) = self.throughput_interval {
            config.schedule.throughput_interval_secs = secs;
        }
        if let Some(millis) = self.tick_millis {
            config.schedule.tick_millis = millis;
        }

        config.validate()?;
        Ok(config)
    }

    fn artifacts(&self) -> PipelineArtifacts {
        PipelineArtifacts {
            p4info: self.p4info.clone(),
            device_config: self.bmv2_json.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();
    let artifacts = cli.artifacts();
    if let Err(e) = artifacts.verify() {
        Cli::command().error(ErrorKind::ValueValidation, e).exit();
    }

    info!(?cli, "starting turbo-controller");
    let config = cli.load_config()?;
    config.log_summary();

    let device = match config.device.backend {
        Backend::Simulated => SimulatedSwitch::with_pipeline(
            &config.layout,
            config.clusters.num_clusters,
            &config.clusters.features,
        ),
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            warn!(error = %e, "failed to install signal handlers");
            return;
        }
        info!("shutdown signal received");
        flag.store(true, Ordering::Relaxed);
    });

    // Device calls block, so the loop gets its own thread.
    let outcome = tokio::task::spawn_blocking(move || {
        let mut controller = Controller::initialize(device, &config, &artifacts)?;
        let result = controller.run(&shutdown);
        match serde_json::to_string(controller.metrics()) {
            Ok(json) => info!(metrics = %json, "final scheduler metrics"),
            Err(e) => warn!(error = %e, "failed to serialize scheduler metrics"),
        }
        result
    })
    .await?;

    outcome?;
    info!("turbo-controller exited cleanly");
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            res = ctrl_c => res?,
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }

    Ok(())
}

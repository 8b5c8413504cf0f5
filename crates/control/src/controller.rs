//! Controller lifecycle: bring the device into a known state, run the
//! control loop, then drain and tear down.
//!
//! ```text
//! Initializing ──start──▶ Running ──stop──▶ Draining ──▶ Stopped
//! ```
//!
//! Every exit from [`Controller::run`] passes through `Draining` (sinks
//! flushed) and `Stopped` (device session closed), including error exits.

use std::fmt;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use serde::Serialize;
use tracing::{error, info, warn};
use turbo_core::{ControllerConfig, DeviceLayout, PipelineArtifacts, SwitchControl};

use crate::error::{ControlError, RegistryError};
use crate::ranker;
use crate::registry::ClusterRegistry;
use crate::scheduler::{RankTask, Scheduler, SchedulerConfig, SchedulerMetrics, ThroughputTask};
use crate::sink::ThroughputSinks;

/// Feature minimum written on first start; any observed value replaces it.
const FEATURE_MIN_RESET: u64 = 255;
const FEATURE_MAX_RESET: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Initializing,
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Initializing => "initializing",
            Phase::Running => "running",
            Phase::Draining => "draining",
            Phase::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

pub struct Controller<S: SwitchControl> {
    device: S,
    scheduler: Scheduler,
    phase: Phase,
}

impl<S: SwitchControl> Controller<S> {
    /// Open a session on `device`, load the pipeline and the cluster state,
    /// reset the device counters and build the scheduler.
    ///
    /// The configuration is validated before the device is touched. If any
    /// later step fails the session is torn down before the error returns.
    pub fn initialize(
        mut device: S,
        config: &ControllerConfig,
        artifacts: &PipelineArtifacts,
    ) -> Result<Self, ControlError> {
        config.validate()?;

        device.establish_session()?;
        info!(device = %config.device.name, address = %config.device.address, "device session established");

        match prepare(&mut device, config, artifacts) {
            Ok(scheduler) => Ok(Self {
                device,
                scheduler,
                phase: Phase::Initializing,
            }),
            Err(e) => {
                error!(error = %e, "initialization failed");
                if let Err(td) = device.teardown() {
                    warn!(error = %td, "teardown after failed initialization");
                }
                Err(e)
            }
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn metrics(&self) -> &SchedulerMetrics {
        self.scheduler.metrics()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn device(&self) -> &S {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut S {
        &mut self.device
    }

    pub fn into_device(self) -> S {
        self.device
    }

    /// Enter `Running` and arm every task relative to `now`.
    pub fn start(&mut self, now: Instant) -> Result<(), ControlError> {
        match self.phase {
            Phase::Initializing => {
                self.scheduler.start(now);
                self.phase = Phase::Running;
                info!(tasks = ?self.scheduler.task_names(), "controller running");
                Ok(())
            }
            Phase::Running => Ok(()),
            phase => Err(ControlError::Lifecycle {
                phase,
                operation: "start",
            }),
        }
    }

    /// One scheduling pass at `now`. Returns how many tasks ran.
    pub fn run_pending(&mut self, now: Instant) -> Result<usize, ControlError> {
        if self.phase != Phase::Running {
            return Err(ControlError::Lifecycle {
                phase: self.phase,
                operation: "run tasks",
            });
        }
        self.scheduler.run_pending(now, &mut self.device)
    }

    /// Drain every task, then close the device session. Returns the first
    /// error of the two; both steps always run. No-op once stopped.
    pub fn stop(&mut self) -> Result<(), ControlError> {
        if self.phase == Phase::Stopped {
            return Ok(());
        }

        self.phase = Phase::Draining;
        let drained = self.scheduler.drain();

        self.phase = Phase::Stopped;
        let closed = self.device.teardown().map_err(ControlError::from);
        if let Err(e) = &closed {
            warn!(error = %e, "device teardown failed");
        }

        info!(
            ticks = self.scheduler.metrics().ticks,
            "controller stopped"
        );
        drained.and(closed)
    }

    /// Run until `shutdown` is set or a task fails, then stop.
    ///
    /// Blocks the calling thread. Returns the loop's error if it had one,
    /// otherwise the first error from stopping.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<(), ControlError> {
        let result = self
            .start(Instant::now())
            .and_then(|()| self.scheduler.run(&mut self.device, shutdown));
        if let Err(e) = &result {
            error!(error = %e, "control loop failed");
        }
        let stopped = self.stop();
        result.and(stopped)
    }
}

/// Everything between session establishment and the first pass.
fn prepare<S: SwitchControl>(
    device: &mut S,
    config: &ControllerConfig,
    artifacts: &PipelineArtifacts,
) -> Result<Scheduler, ControlError> {
    device.push_config(artifacts)?;
    info!(
        p4info = %artifacts.p4info.display(),
        device_config = %artifacts.device_config.display(),
        "pipeline config pushed"
    );

    let names = &config.layout;
    let features = &config.clusters.features;
    let rows = device.read_table_entries(&names.priority_table)?;
    let (registry, repaired) = match ClusterRegistry::load(&names.priority_table, &rows, features) {
        Ok(registry) => (registry, false),
        Err(RegistryError::InconsistentPriorities { expected, found }) => {
            warn!(
                expected,
                ?found,
                "priority table is not a permutation, reassigning by load order"
            );
            let registry = ClusterRegistry::load_reassigning(&names.priority_table, &rows, features)?;
            (registry, true)
        }
        Err(e) => return Err(e.into()),
    };

    if registry.len() != config.clusters.num_clusters {
        return Err(RegistryError::CardinalityMismatch {
            expected: config.clusters.num_clusters,
            found: registry.len(),
        }
        .into());
    }
    info!(clusters = registry.len(), ids = ?registry.ids(), "cluster registry loaded");

    let layout = DeviceLayout::resolve(names.clone(), &registry.ids(), features);
    reset_device(device, &layout, registry.len())?;

    if repaired {
        for cluster in registry.iter() {
            device.write_table_entry(&ranker::priority_write(&layout, cluster.id(), cluster.priority()))?;
        }
        info!(clusters = registry.len(), "repaired priorities pushed");
    }

    let mut scheduler = Scheduler::new(SchedulerConfig::from(&config.schedule));
    let rank_interval = config.schedule.rank_interval()?;
    scheduler.register_task(Box::new(RankTask::new(registry, layout, rank_interval)));

    if config.throughput.enabled {
        let sinks = ThroughputSinks::create(
            &config.throughput.benign_path,
            &config.throughput.malicious_path,
        )?;
        scheduler.register_task(Box::new(ThroughputTask::new(
            sinks,
            names.clone(),
            config.throughput.timestamp_shift,
            config.schedule.throughput_interval(),
        )));
    } else {
        info!("throughput measurement disabled");
    }

    Ok(scheduler)
}

/// Put the device into a known state for the first ranking.
///
/// Feature ranges are only reset on a device that was never initialised, so a
/// restarted controller keeps the ranges already learned.
fn reset_device(
    device: &mut dyn SwitchControl,
    layout: &DeviceLayout,
    num_queues: usize,
) -> Result<(), ControlError> {
    let names = layout.names();

    if device.read_register(&names.init_register)? == 0 {
        for (_, registers) in layout.feature_registers_by_cluster() {
            for regs in registers.values() {
                device.write_register(&regs.min, FEATURE_MIN_RESET)?;
                device.write_register(&regs.max, FEATURE_MAX_RESET)?;
            }
        }
        info!(features = layout.features().len(), "feature ranges reset");
    } else {
        info!("device already initialised, keeping feature ranges");
    }

    device.write_register(&names.init_register, 1)?;
    device.write_register(&names.update_clusters_register, 0)?;
    ranker::clear_queue_counters(device, layout, num_queues)?;
    Ok(())
}

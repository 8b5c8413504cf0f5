//! End-to-end runs of the controller against the simulated switch.

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use turbo_control::{ControlError, Controller, Phase, RegistryError};
use turbo_core::{
    ControllerConfig, DeviceError, DeviceOp, LayoutNames, PipelineArtifacts, SimulatedSwitch,
    SwitchControl, TableEntry,
};

const PORT: &str = "standard_metadata.egress_port";

fn config(dir: &Path) -> ControllerConfig {
    let mut config = ControllerConfig::default();
    config.schedule.rank_interval_secs = Some(5);
    config.schedule.throughput_interval_secs = 3;
    config.throughput.benign_path = dir.join("benign.dat");
    config.throughput.malicious_path = dir.join("malicious.dat");
    config
}

fn artifacts() -> PipelineArtifacts {
    PipelineArtifacts {
        p4info: "accturbo.p4info.txt".into(),
        device_config: "accturbo.json".into(),
    }
}

fn device(config: &ControllerConfig) -> SimulatedSwitch {
    SimulatedSwitch::with_pipeline(
        &config.layout,
        config.clusters.num_clusters,
        &config.clusters.features,
    )
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

/// Number of this process's open descriptors pointing into `dir`.
#[cfg(target_os = "linux")]
fn open_files_under(dir: &Path) -> usize {
    let dir = dir.canonicalize().unwrap();
    std::fs::read_dir("/proc/self/fd")
        .unwrap()
        .filter_map(|entry| std::fs::read_link(entry.ok()?.path()).ok())
        .filter(|target| target.starts_with(&dir))
        .count()
}

#[test]
fn ranks_measures_and_drains() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path());
    let names = LayoutNames::default();

    let mut controller = Controller::initialize(device(&config), &config, &artifacts()).unwrap();
    let t0 = Instant::now();
    controller.start(t0).unwrap();

    // Queue q carries cluster q + 1 after the seeded mapping.
    let sim = controller.device_mut();
    for (qid, bytes) in [(0, 50), (1, 10), (2, 30), (3, 5)] {
        assert!(sim.add_bytes(&names.queue_counter_table, &names.queue_id_field, qid, bytes));
    }
    sim.add_bytes(&names.malicious_counter_table, PORT, 1, 1200);
    sim.add_bytes(&names.benign_counter_table, PORT, 2, 400);
    sim.set_register(&names.timestamp_register, 5);

    // t=3: throughput only.
    assert_eq!(controller.run_pending(t0 + secs(3)).unwrap(), 1);
    // t=5: rank.
    assert_eq!(controller.run_pending(t0 + secs(5)).unwrap(), 1);

    let sim = controller.device_mut();
    assert_eq!(sim.priority_of(&names, 1), Some(3));
    assert_eq!(sim.priority_of(&names, 3), Some(2));
    assert_eq!(sim.priority_of(&names, 2), Some(1));
    assert_eq!(sim.priority_of(&names, 4), Some(0));
    assert!(sim
        .entries(&names.queue_counter_table)
        .iter()
        .all(|e| e.counter.byte_count == 0));

    sim.add_bytes(&names.malicious_counter_table, PORT, 1, 1800);
    sim.set_register(&names.timestamp_register, 9);
    // t=6: throughput again.
    assert_eq!(controller.run_pending(t0 + secs(6)).unwrap(), 1);

    controller.stop().unwrap();
    assert_eq!(controller.phase(), Phase::Stopped);
    assert!(!controller.device().is_session_open());
    assert_eq!(controller.metrics().executions("rank"), 1);
    assert_eq!(controller.metrics().executions("throughput"), 2);

    let delta = 4u64 << 16;
    assert_eq!(
        read(&dir.path().join("malicious.dat")),
        format!("# Timestamp(ns),Bits\n0,9600\n{delta},14400\n")
    );
    assert_eq!(
        read(&dir.path().join("benign.dat")),
        format!("# Timestamp(ns),Bits\n0,3200\n{delta},0\n")
    );
}

#[cfg(target_os = "linux")]
#[test]
fn stop_releases_sink_files() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path());

    let mut controller = Controller::initialize(device(&config), &config, &artifacts()).unwrap();
    assert_eq!(open_files_under(dir.path()), 2);

    controller.start(Instant::now()).unwrap();
    controller.stop().unwrap();
    assert_eq!(open_files_under(dir.path()), 0);
    assert_eq!(read(&dir.path().join("benign.dat")), "# Timestamp(ns),Bits\n");
}

#[test]
fn restart_keeps_learned_feature_ranges() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path());
    let names = LayoutNames::default();

    let mut sim = device(&config);
    sim.set_register(&names.init_register, 1);
    sim.set_register("MyIngress.cluster2_dst1_min", 17);
    sim.set_register("MyIngress.cluster2_dst1_max", 80);
    sim.add_bytes(&names.queue_counter_table, &names.queue_id_field, 1, 999);

    let controller = Controller::initialize(sim, &config, &artifacts()).unwrap();
    let sim = controller.device();
    assert_eq!(sim.register("MyIngress.cluster2_dst1_min"), Some(17));
    assert_eq!(sim.register("MyIngress.cluster2_dst1_max"), Some(80));
    assert_eq!(sim.register(&names.init_register), Some(1));
    assert_eq!(sim.entries(&names.queue_counter_table)[1].counter.byte_count, 0);
}

#[test]
fn repairs_inconsistent_priorities() {
    let dir = TempDir::new().unwrap();
    let mut config = config(dir.path());
    config.clusters.num_clusters = 3;
    config.throughput.enabled = false;
    let names = LayoutNames::default();

    // Two clusters claim queue 2, none holds queue 0.
    let mut sim = SimulatedSwitch::with_pipeline(&names, 0, &config.clusters.features);
    sim.set_register(&names.init_register, 1);
    for (id, qid) in [(7, 2), (8, 2), (9, 1)] {
        let mut entry = TableEntry::default();
        entry.match_fields.insert(names.cluster_id_field.clone(), id);
        entry.action_params.insert(names.priority_param.clone(), qid);
        sim.insert_entry(&names.priority_table, entry);
    }
    for qid in 0..3 {
        let mut entry = TableEntry::default();
        entry.match_fields.insert(names.queue_id_field.clone(), qid);
        sim.insert_entry(&names.queue_counter_table, entry);
    }

    let controller = Controller::initialize(sim, &config, &artifacts()).unwrap();
    let sim = controller.device();
    assert_eq!(sim.priority_of(&names, 7), Some(2));
    assert_eq!(sim.priority_of(&names, 8), Some(1));
    assert_eq!(sim.priority_of(&names, 9), Some(0));
}

#[test]
fn duplicate_cluster_ids_are_fatal() {
    let dir = TempDir::new().unwrap();
    let mut config = config(dir.path());
    config.clusters.num_clusters = 2;
    let names = LayoutNames::default();

    let mut sim = SimulatedSwitch::with_pipeline(&names, 0, &config.clusters.features);
    for qid in 0..2 {
        let mut entry = TableEntry::default();
        entry.match_fields.insert(names.cluster_id_field.clone(), 4);
        entry.action_params.insert(names.priority_param.clone(), qid);
        sim.insert_entry(&names.priority_table, entry);
    }

    let err = Controller::initialize(sim, &config, &artifacts()).err().unwrap();
    assert!(matches!(
        err,
        ControlError::Registry(RegistryError::DuplicateId { id: 4, .. })
    ));
    assert!(!dir.path().join("benign.dat").exists());
}

#[test]
fn write_failure_ends_loop_and_still_drains() {
    let dir = TempDir::new().unwrap();
    let mut config = config(dir.path());
    config.schedule.rank_interval_secs = Some(1);
    config.schedule.tick_millis = 10;

    let mut sim = device(&config);
    sim.fail_next(DeviceOp::WriteTableEntry);

    let mut controller = Controller::initialize(sim, &config, &artifacts()).unwrap();
    let shutdown = AtomicBool::new(false);
    let err = controller.run(&shutdown).unwrap_err();

    assert!(matches!(err, ControlError::Device(DeviceError::Write { .. })));
    assert!(err.to_string().contains("MyIngress.cluster_to_prio"));
    assert_eq!(controller.phase(), Phase::Stopped);
    assert!(!controller.device().is_session_open());
    assert_eq!(controller.metrics().tasks_failed["rank"], 1);
    assert_eq!(read(&dir.path().join("benign.dat")), "# Timestamp(ns),Bits\n");
}

#[test]
fn shutdown_before_first_pass_stops_cleanly() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path());

    let mut controller = Controller::initialize(device(&config), &config, &artifacts()).unwrap();
    let shutdown = AtomicBool::new(true);
    controller.run(&shutdown).unwrap();

    assert_eq!(controller.phase(), Phase::Stopped);
    let mut sim = controller.into_device();
    assert!(sim.teardown().is_err());
    assert_eq!(read(&dir.path().join("malicious.dat")), "# Timestamp(ns),Bits\n");
}

#[test]
fn missing_rank_interval_is_rejected_before_connecting() {
    let dir = TempDir::new().unwrap();
    let mut config = config(dir.path());
    config.schedule.rank_interval_secs = None;

    let mut sim = device(&config);
    sim.fail_next(DeviceOp::EstablishSession);

    let err = Controller::initialize(sim, &config, &artifacts()).err().unwrap();
    assert!(matches!(err, ControlError::Config(_)));
}

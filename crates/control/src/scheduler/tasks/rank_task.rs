use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use turbo_core::{DeviceLayout, SwitchControl};

use crate::error::ControlError;
use crate::ranker;
use crate::registry::{ClusterRegistry, FeatureRange, Priority};
use crate::scheduler::task::ControlTask;
use crate::scheduler::types::TaskReport;

/// Reads cluster statistics, re-ranks priorities and pushes them back.
///
/// Owns the cluster registry: nothing else mutates it while the loop runs.
pub struct RankTask {
    registry: ClusterRegistry,
    layout: DeviceLayout,
    interval: Duration,
}

impl RankTask {
    pub fn new(registry: ClusterRegistry, layout: DeviceLayout, interval: Duration) -> Self {
        Self {
            registry,
            layout,
            interval,
        }
    }

    pub fn registry(&self) -> &ClusterRegistry {
        &self.registry
    }

    /// Refresh every cluster's feature ranges. Diagnostic only; the ranking
    /// does not use them.
    fn read_feature_ranges(&mut self, device: &mut dyn SwitchControl) -> Result<(), ControlError> {
        for (cluster, registers) in self.layout.feature_registers_by_cluster() {
            for (feature, regs) in registers {
                let range = FeatureRange {
                    min: device.read_register(&regs.min)?,
                    max: device.read_register(&regs.max)?,
                };
                debug!(cluster, feature, min = range.min, max = range.max, "feature range");
                self.registry.record_feature_range(cluster, feature, range);
            }
        }
        Ok(())
    }

    /// Load this interval's per-queue byte counts into the registry.
    fn read_queue_counters(&mut self, device: &mut dyn SwitchControl) -> Result<(), ControlError> {
        let names = self.layout.names();
        let entries = device.read_table_entries(&names.queue_counter_table)?;

        self.registry.reset_byte_counts();
        for entry in entries {
            let Some(qid) = entry
                .match_fields
                .get(&names.queue_id_field)
                .copied()
                .or_else(|| entry.first_match())
            else {
                warn!(table = %names.queue_counter_table, "counter entry without queue id");
                continue;
            };
            let bytes = entry.counter.byte_count;
            match Priority::try_from(qid)
                .ok()
                .and_then(|p| self.registry.record_byte_count(p, bytes))
            {
                Some(cluster) => debug!(cluster, qid, bytes, "queue byte count"),
                None => warn!(qid, bytes, "byte count for a queue no cluster holds"),
            }
        }
        Ok(())
    }
}

impl ControlTask for RankTask {
    fn name(&self) -> &str {
        "rank"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn execute(&mut self, device: &mut dyn SwitchControl) -> Result<TaskReport, ControlError> {
        let start = Instant::now();

        self.read_feature_ranges(device)?;
        self.read_queue_counters(device)?;

        let outcome = ranker::rank(&mut self.registry);
        ranker::apply(device, &self.layout, &outcome, self.registry.len())?;

        let changed = outcome.changed();
        let duration = start.elapsed();
        info!(
            clusters = self.registry.len(),
            changed,
            "priorities recomputed in {:.1}ms",
            duration.as_secs_f64() * 1000.0
        );

        Ok(TaskReport {
            task_name: self.name().to_string(),
            duration,
            items_processed: outcome.assignments.len(),
            summary: Some(format!(
                "Ranked {} clusters, {} priorities changed",
                outcome.assignments.len(),
                changed
            )),
        })
    }
}

#[cfg(test)]
mod tests {
    use turbo_core::{DeviceError, DeviceOp, LayoutNames, SimulatedSwitch};

    use super::*;

    fn features() -> Vec<String> {
        vec!["dst0".to_string(), "dst1".to_string()]
    }

    fn setup(num_clusters: usize) -> (SimulatedSwitch, RankTask, LayoutNames) {
        let names = LayoutNames::default();
        let mut sim = SimulatedSwitch::with_pipeline(&names, num_clusters, &features());
        sim.establish_session().unwrap();

        let rows = sim.read_table_entries(&names.priority_table).unwrap();
        let registry = ClusterRegistry::load(&names.priority_table, &rows, &features()).unwrap();
        let layout = DeviceLayout::resolve(names.clone(), &registry.ids(), &features());
        let task = RankTask::new(registry, layout, Duration::from_secs(5));
        (sim, task, names)
    }

    fn traffic(sim: &mut SimulatedSwitch, names: &LayoutNames, qid: u64, bytes: u64) {
        assert!(sim.add_bytes(&names.queue_counter_table, &names.queue_id_field, qid, bytes));
    }

    #[test]
    fn ranks_by_queue_bytes_and_clears_counters() {
        // Seeded mapping: cluster id -> queue id - 1.
        let (mut sim, mut task, names) = setup(4);
        traffic(&mut sim, &names, 0, 50);
        traffic(&mut sim, &names, 1, 10);
        traffic(&mut sim, &names, 2, 30);
        traffic(&mut sim, &names, 3, 5);

        let report = task.execute(&mut sim).unwrap();
        assert_eq!(report.items_processed, 4);

        assert_eq!(sim.priority_of(&names, 1), Some(3));
        assert_eq!(sim.priority_of(&names, 3), Some(2));
        assert_eq!(sim.priority_of(&names, 2), Some(1));
        assert_eq!(sim.priority_of(&names, 4), Some(0));
        assert!(sim
            .entries(&names.queue_counter_table)
            .iter()
            .all(|e| e.counter.byte_count == 0));
        assert_eq!(task.registry().by_id(1).unwrap().byte_count(), 50);
    }

    #[test]
    fn next_interval_reads_counts_through_new_queues() {
        let (mut sim, mut task, names) = setup(2);
        traffic(&mut sim, &names, 1, 100);
        task.execute(&mut sim).unwrap();
        // Busier cluster 2 keeps the top queue.
        assert_eq!(sim.priority_of(&names, 2), Some(1));

        traffic(&mut sim, &names, 0, 700);
        task.execute(&mut sim).unwrap();
        assert_eq!(task.registry().by_id(1).unwrap().byte_count(), 700);
        assert_eq!(sim.priority_of(&names, 1), Some(1));
        assert_eq!(sim.priority_of(&names, 2), Some(0));
    }

    #[test]
    fn stores_feature_ranges() {
        let (mut sim, mut task, _) = setup(2);
        sim.set_register("MyIngress.cluster2_dst1_min", 12);
        sim.set_register("MyIngress.cluster2_dst1_max", 99);

        task.execute(&mut sim).unwrap();

        let range = task.registry().by_id(2).unwrap().features()["dst1"];
        assert_eq!(range, FeatureRange { min: 12, max: 99 });
    }

    #[test]
    fn register_read_failure_is_fatal() {
        let (mut sim, mut task, _) = setup(2);
        sim.fail_next(DeviceOp::ReadRegister);
        let err = task.execute(&mut sim).unwrap_err();
        assert!(matches!(err, ControlError::Device(DeviceError::Read { .. })));
        assert!(err.to_string().contains("MyIngress.cluster1_dst0_min"));
    }

    #[test]
    fn clear_failure_is_fatal() {
        let (mut sim, mut task, _) = setup(2);
        sim.fail_next(DeviceOp::ClearCounter);
        let err = task.execute(&mut sim).unwrap_err();
        assert!(err.to_string().contains("MyIngress.do_bytes_count[queue_id=0]"));
    }
}

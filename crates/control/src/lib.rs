pub mod controller;
pub mod error;
pub mod ranker;
pub mod registry;
pub mod scheduler;
pub mod sink;
pub mod tracker;

pub use controller::{Controller, Phase};
pub use error::{ControlError, RegistryError};
pub use ranker::{PriorityAssignment, RankOutcome};
pub use registry::{Cluster, ClusterRegistry, FeatureRange, Priority};
pub use scheduler::{ControlTask, Scheduler, SchedulerConfig, SchedulerMetrics, TaskReport};
pub use sink::{ThroughputSink, ThroughputSinks};
pub use tracker::{Channel, ChannelTotals, Observation, ThroughputRecord, ThroughputTracker};

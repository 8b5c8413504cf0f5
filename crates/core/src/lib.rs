pub mod config;
pub mod error;
pub mod layout;
pub mod sim;
pub mod switch;

pub use config::{
    Backend, ClusterConfig, ControllerConfig, DeviceConfig, ScheduleConfig, ThroughputConfig,
};
pub use error::*;
pub use layout::{ClusterId, DeviceLayout, FeatureRegisters, LayoutNames};
pub use sim::SimulatedSwitch;
pub use switch::{CounterData, PipelineArtifacts, SwitchControl, TableEntry, TableWrite};

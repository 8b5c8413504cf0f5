//! Control scheduler runner.
//!
//! Split into focused submodules:
//! - `core`: Scheduler struct, constructor, registration, and accessor methods
//! - `scheduling`: due-task selection and wake-up computation
//! - `execution`: running due tasks, the blocking loop, and draining

mod core;
mod execution;
mod scheduling;

pub use self::core::Scheduler;

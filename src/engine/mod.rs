//! Core engine: the per-region report pass and the weekly trigger.

pub mod orchestrator;
pub mod scheduler;

pub use orchestrator::Orchestrator;
pub use scheduler::Scheduler;

//! Core orchestration logic.
//!
//! This module contains:
//! - Registry: unit definitions and validation
//! - Store: per-run Result Store and issues
//! - Scheduler: concurrent, dependency-ordered unit execution
//! - Assembler: report construction from a store snapshot
//! - Redaction: text-level removal of sensitive values
//! - Delivery: local save and upload
//! - Orchestrator: one logical run end to end

pub mod assembler;
pub mod context;
pub mod delivery;
pub mod orchestrator;
pub mod redaction;
pub mod registry;
pub mod scheduler;
pub mod store;

// Re-export commonly used types
pub use assembler::Assembler;
pub use context::{UnitAction, UnitContext, UnitError};
pub use delivery::{Delivery, DeliveryError, DEFAULT_OUTPUT};
pub use orchestrator::Orchestrator;
pub use redaction::{RedactionError, RedactionRule, Redactor, PLACEHOLDER};
pub use registry::{Registry, RegistryError, UnitDef, UnitRegistry, UnitSpec};
pub use scheduler::{Completion, ScheduledRun, Scheduler, SchedulerSettings};
pub use store::{Fields, Issues, ResultStore, StoreSnapshot};

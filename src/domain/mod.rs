//! Domain types for the collector.
//!
//! This module contains the core data structures:
//! - Unit: collection unit lifecycle state and failure causes
//! - Fields: well-known store field names and report categories
//! - Report: the assembled document
//! - Outcome: terminal result of a logical run

pub mod fields;
pub mod outcome;
pub mod report;
pub mod unit;

// Re-export commonly used types
pub use fields::Category;
pub use outcome::Outcome;
pub use report::{
    BasicInfo, FatalReport, HardwareInfo, NetworkInfo, OutputProcess, Record, Report, ReportMeta,
    ScheduledTask, SecurityInfo, SystemInfo, TaskState, TaskTrigger,
};
pub use unit::{FailureCause, UnitState, UnitSummary};

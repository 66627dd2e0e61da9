//! specify - system report collector
//!
//! Runs many independent, possibly interdependent collection units
//! concurrently, assembles their results into one report, redacts
//! sensitive values and delivers the report by upload or local save.
//!
//! # Architecture
//!
//! One logical run flows through:
//! - Scheduler: one task per unit, dependency waits on watch channels
//! - Result Store: write-once fields, per-category success flags, issues
//! - Assembler: immutable report from a store snapshot
//! - Redaction: text-level substitution, rule disabled and restart on failure
//! - Delivery: upload with local fallback, exactly one outcome to the shell
//!
//! # Modules
//!
//! - `adapters`: upload transport and shell signal
//! - `core`: registry, scheduler, store, assembler, redaction, delivery
//! - `domain`: unit state, report document, outcome
//! - `probes`: host data sources
//! - `units`: the default collection units
//! - `cli`: command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Collect and upload
//! specify run
//!
//! # Save locally with the username removed
//! specify run --local-only --redact-username
//!
//! # Show registered units
//! specify units
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod probes;
pub mod units;

// Re-export main types at crate root for convenience
pub use core::{Orchestrator, Registry, Scheduler, UnitRegistry, UnitSpec};
pub use domain::{Outcome, Report, UnitState};

//! The report document.
//!
//! A [`Report`] is built once per assembly pass from a store snapshot and
//! never mutated afterwards. Its canonical serialized form (see
//! [`Report::to_canonical_json`]) is what gets redacted and delivered.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::unit::UnitSummary;

/// Open-ended probe record (vendor data, driver lists, raw key/value dumps)
pub type Record = BTreeMap<String, serde_json::Value>;

/// The complete report document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Report {
    /// Version of the collector that produced the report
    pub version: String,

    pub meta: ReportMeta,
    pub basic_info: BasicInfo,
    pub system: SystemInfo,
    pub hardware: HardwareInfo,
    pub security: SecurityInfo,
    pub network: NetworkInfo,

    /// Problems gathering the data itself. No diagnosis is made here.
    pub issues: Vec<String>,
}

impl Report {
    /// Serialize with stable key order, two-space indentation and a
    /// trailing newline.
    pub fn to_canonical_json(&self) -> serde_json::Result<String> {
        let mut text = serde_json::to_string_pretty(self)?;
        text.push('\n');
        Ok(text)
    }
}

/// Run-level metadata, fixed once per logical run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ReportMeta {
    pub run_id: Uuid,

    /// Milliseconds from scheduler start to overall completion
    pub elapsed_time: u64,

    pub generation_date: DateTime<Utc>,

    /// Final state of every registered unit, in registration order
    pub units: Vec<UnitSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BasicInfo {
    pub write_success: bool,
    pub edition: Option<String>,
    pub version: Option<String>,
    pub uptime: Option<u64>,
    pub hostname: Option<String>,
    pub username: Option<String>,
    pub domain: Option<String>,
    pub boot_mode: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SystemInfo {
    pub write_success: bool,
    pub user_variables: BTreeMap<String, String>,
    pub system_variables: BTreeMap<String, String>,
    pub running_processes: Vec<OutputProcess>,
    pub startup_tasks: Vec<ScheduledTask>,
    pub username_special_characters: Option<bool>,
    pub one_drive_commercial_path_length: Option<u64>,
    pub one_drive_commercial_name_length: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HardwareInfo {
    pub write_success: bool,
    pub cpu: Option<Record>,
    pub memory: Option<Record>,
    pub storage: Vec<Record>,
    pub drivers: Vec<Record>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SecurityInfo {
    pub write_success: bool,
    pub av_list: Vec<String>,
    pub fw_list: Vec<String>,
    pub secure_boot_enabled: Option<bool>,
    pub tpm: Option<Record>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkInfo {
    pub write_success: bool,
    pub adapters: Vec<Record>,
    pub routes: Vec<Record>,
    pub hosts_file: Option<String>,
    pub hosts_file_hash: Option<String>,
}

/// A running process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OutputProcess {
    pub process_name: String,
    pub exe_path: Option<String>,
    pub id: u32,
    /// Resident set size in bytes
    pub working_set: u64,
}

/// A scheduled task as reported by the platform task source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScheduledTask {
    pub name: String,
    pub path: String,
    pub author: Option<String>,
    pub state: TaskState,
    pub triggers: Vec<TaskTrigger>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Unknown,
    Disabled,
    Queued,
    Ready,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskTrigger {
    Boot,
    Logon,
    Time,
    Other,
}

/// Minimal document written when the pipeline hits an internal defect
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FatalReport {
    pub version: String,
    pub issues: Vec<String>,
    pub diagnostic: String,
}

//! Report assembly from a store snapshot.
//!
//! Assembly never blocks and never fails: a field that is absent or has
//! the wrong shape becomes an empty or default value. The problems behind
//! those gaps were already recorded as issues by the units themselves.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;

use crate::domain::fields;
use crate::domain::{
    BasicInfo, Category, HardwareInfo, NetworkInfo, Record, Report, ReportMeta, SecurityInfo,
    SystemInfo,
};

use super::store::StoreSnapshot;

/// Builds [`Report`] documents
#[derive(Debug, Clone)]
pub struct Assembler {
    version: String,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new(env!("CARGO_PKG_VERSION"))
    }
}

impl Assembler {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Build one immutable report from a snapshot
    pub fn assemble(&self, snapshot: &StoreSnapshot, meta: &ReportMeta) -> Report {
        Report {
            version: self.version.clone(),
            meta: meta.clone(),
            basic_info: basic_info(snapshot),
            system: system(snapshot),
            hardware: hardware(snapshot),
            security: security(snapshot),
            network: network(snapshot),
            issues: snapshot.issues().to_vec(),
        }
    }
}

fn list<T: DeserializeOwned>(snapshot: &StoreSnapshot, field: &str) -> Vec<T> {
    snapshot.get_as(field).unwrap_or_default()
}

fn text(snapshot: &StoreSnapshot, field: &str) -> Option<String> {
    snapshot.get_str(field).map(str::to_string)
}

fn basic_info(snapshot: &StoreSnapshot) -> BasicInfo {
    let os: Option<Record> = snapshot.get_as(fields::OS);
    let os_text = |key: &str| {
        os.as_ref()
            .and_then(|record| record.get(key))
            .and_then(|value| value.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    BasicInfo {
        write_success: snapshot.category_success(Category::BasicInfo),
        edition: os_text("Caption"),
        version: os_text("Version"),
        uptime: snapshot.get_as(fields::UPTIME),
        hostname: text(snapshot, fields::HOSTNAME),
        username: text(snapshot, fields::USERNAME),
        domain: text(snapshot, fields::DOMAIN),
        boot_mode: text(snapshot, fields::BOOT_MODE),
    }
}

fn system(snapshot: &StoreSnapshot) -> SystemInfo {
    SystemInfo {
        write_success: snapshot.category_success(Category::System),
        user_variables: snapshot
            .get_as::<BTreeMap<String, String>>(fields::USER_VARIABLES)
            .unwrap_or_default(),
        system_variables: snapshot
            .get_as::<BTreeMap<String, String>>(fields::SYSTEM_VARIABLES)
            .unwrap_or_default(),
        running_processes: list(snapshot, fields::RUNNING_PROCESSES),
        startup_tasks: list(snapshot, fields::STARTUP_TASKS),
        username_special_characters: snapshot.get_as(fields::USERNAME_SPECIAL_CHARACTERS),
        one_drive_commercial_path_length: snapshot.get_as(fields::ONEDRIVE_COMMERCIAL_PATH_LENGTH),
        one_drive_commercial_name_length: snapshot.get_as(fields::ONEDRIVE_COMMERCIAL_NAME_LENGTH),
    }
}

fn hardware(snapshot: &StoreSnapshot) -> HardwareInfo {
    HardwareInfo {
        write_success: snapshot.category_success(Category::Hardware),
        cpu: snapshot.get_as(fields::CPU),
        memory: snapshot.get_as(fields::MEMORY),
        storage: list(snapshot, fields::STORAGE),
        drivers: list(snapshot, fields::DRIVERS),
    }
}

fn security(snapshot: &StoreSnapshot) -> SecurityInfo {
    SecurityInfo {
        write_success: snapshot.category_success(Category::Security),
        av_list: list(snapshot, fields::AV_LIST),
        fw_list: list(snapshot, fields::FW_LIST),
        secure_boot_enabled: snapshot.get_as(fields::SECURE_BOOT_ENABLED),
        tpm: snapshot.get_as(fields::TPM),
    }
}

fn network(snapshot: &StoreSnapshot) -> NetworkInfo {
    NetworkInfo {
        write_success: snapshot.category_success(Category::Network),
        adapters: list(snapshot, fields::NET_ADAPTERS),
        routes: list(snapshot, fields::ROUTES),
        hosts_file: text(snapshot, fields::HOSTS_FILE),
        hosts_file_hash: text(snapshot, fields::HOSTS_FILE_HASH),
    }
}

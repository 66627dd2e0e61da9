//! The default collection units.
//!
//! Each unit gathers one category by calling probes, recovering from
//! partial misses through its [`UnitContext`], and returns the fields it
//! owns.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::core::{Fields, Registry, RegistryError, UnitContext, UnitError, UnitRegistry, UnitSpec};
use crate::domain::{fields, Category};
use crate::probes::{basic, hardware, network, security, system, HostFs};

pub const MAIN_DATA: &str = "MainData";
pub const SYSTEM_DATA: &str = "SystemData";
pub const HARDWARE_DATA: &str = "HardwareData";
pub const SECURITY_DATA: &str = "SecurityData";
pub const NETWORK_DATA: &str = "NetworkData";
pub const DUMMY_TIMER: &str = "DummyTimer";

/// How long the diagnostic placeholder unit sleeps
pub const DUMMY_TIMER_DELAY: Duration = Duration::from_secs(5);

/// The machine being described
#[derive(Debug, Clone)]
pub struct Host {
    pub fs: HostFs,
    pub env: Arc<BTreeMap<String, String>>,
}

impl Host {
    pub fn new(fs: HostFs, env: BTreeMap<String, String>) -> Self {
        Self {
            fs,
            env: Arc::new(env),
        }
    }

    /// The local machine and this process's environment. Variables that
    /// are not valid UTF-8 are skipped.
    pub fn current() -> Self {
        let env = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect();
        Self::new(HostFs::default(), env)
    }
}

/// Register every default unit
pub fn default_registry(host: Host) -> Result<Registry, RegistryError> {
    let mut registry = UnitRegistry::new();

    let h = host.clone();
    registry.register(
        UnitSpec::new(MAIN_DATA, move |ctx| main_data(h.clone(), ctx))
            .category(Category::BasicInfo)
            .owns([
                fields::OS,
                fields::HOSTNAME,
                fields::USERNAME,
                fields::DOMAIN,
                fields::BOOT_MODE,
                fields::UPTIME,
            ]),
    )?;

    let h = host.clone();
    registry.register(
        UnitSpec::new(SYSTEM_DATA, move |ctx| system_data(h.clone(), ctx))
            .depends_on([MAIN_DATA])
            .category(Category::System)
            .owns([
                fields::USER_VARIABLES,
                fields::SYSTEM_VARIABLES,
                fields::RUNNING_PROCESSES,
                fields::STARTUP_TASKS,
                fields::USERNAME_SPECIAL_CHARACTERS,
                fields::ONEDRIVE_COMMERCIAL_PATH_LENGTH,
                fields::ONEDRIVE_COMMERCIAL_NAME_LENGTH,
            ]),
    )?;

    let h = host.clone();
    registry.register(
        UnitSpec::new(HARDWARE_DATA, move |ctx| hardware_data(h.clone(), ctx))
            .category(Category::Hardware)
            .owns([fields::CPU, fields::MEMORY, fields::STORAGE, fields::DRIVERS]),
    )?;

    let h = host.clone();
    registry.register(
        UnitSpec::new(SECURITY_DATA, move |ctx| security_data(h.clone(), ctx))
            .category(Category::Security)
            .owns([
                fields::AV_LIST,
                fields::FW_LIST,
                fields::SECURE_BOOT_ENABLED,
                fields::TPM,
            ]),
    )?;

    let h = host;
    registry.register(
        UnitSpec::new(NETWORK_DATA, move |ctx| network_data(h.clone(), ctx))
            .category(Category::Network)
            .owns([
                fields::NET_ADAPTERS,
                fields::ROUTES,
                fields::HOSTS_FILE,
                fields::HOSTS_FILE_HASH,
            ]),
    )?;

    registry.register(
        UnitSpec::new(DUMMY_TIMER, |_ctx| async {
            tokio::time::sleep(DUMMY_TIMER_DELAY).await;
            Ok(Fields::new())
        })
        .non_blocking(),
    )?;

    registry.build()
}

async fn main_data(host: Host, ctx: UnitContext) -> Result<Fields, UnitError> {
    let fs = &host.fs;
    let mut out = Fields::new();

    let os = ctx.recover("OS information", basic::os_record(fs).await)?;
    out.insert_some(fields::OS, os.as_ref())?;

    let hostname = ctx.recover("Hostname", basic::hostname(fs).await)?;
    out.insert_some(fields::HOSTNAME, hostname.as_ref())?;

    let username = ctx.recover("Username", basic::username(&host.env))?;
    out.insert_some(fields::USERNAME, username.as_ref())?;

    let domain = ctx.recover("Domain", basic::domain(fs).await)?.flatten();
    out.insert_some(fields::DOMAIN, domain.as_ref())?;

    out.insert_value(fields::BOOT_MODE, basic::boot_mode(fs).await);

    let uptime = ctx.recover("Uptime", basic::uptime(fs).await)?;
    out.insert_some(fields::UPTIME, uptime.as_ref())?;

    Ok(out)
}

async fn system_data(host: Host, ctx: UnitContext) -> Result<Fields, UnitError> {
    let fs = &host.fs;
    let mut out = Fields::new();

    let user_variables = system::user_variables(
        host.env.iter().map(|(k, v)| (k.clone(), v.clone())),
    );
    out.insert(fields::USER_VARIABLES, &user_variables)?;

    let system_variables = ctx.recover("System variables", system::system_variables(fs).await)?;
    out.insert_some(fields::SYSTEM_VARIABLES, system_variables.as_ref())?;

    let processes = ctx.recover("Running processes", system::running_processes(fs).await)?;
    out.insert_some(fields::RUNNING_PROCESSES, processes.as_ref())?;

    let tasks = ctx.recover("Startup tasks", system::startup_tasks(fs).await)?;
    out.insert_some(fields::STARTUP_TASKS, tasks.as_ref())?;

    if let Some(username) = ctx.read_as::<String>(fields::USERNAME)? {
        out.insert(
            fields::USERNAME_SPECIAL_CHARACTERS,
            &system::username_special_characters(&username),
        )?;
    }

    if let Some(path) = user_variables.get(fields::ONEDRIVE_COMMERCIAL_VAR) {
        let (path_len, name_len) = system::onedrive_commercial_lengths(path);
        out.insert(fields::ONEDRIVE_COMMERCIAL_PATH_LENGTH, &path_len)?;
        out.insert(fields::ONEDRIVE_COMMERCIAL_NAME_LENGTH, &name_len)?;
    }

    Ok(out)
}

async fn hardware_data(host: Host, ctx: UnitContext) -> Result<Fields, UnitError> {
    let fs = &host.fs;
    let mut out = Fields::new();

    let cpu = ctx.recover("CPU", hardware::cpu(fs).await)?;
    out.insert_some(fields::CPU, cpu.as_ref())?;

    let memory = ctx.recover("Memory", hardware::memory(fs).await)?;
    out.insert_some(fields::MEMORY, memory.as_ref())?;

    let storage = ctx.recover("Storage", hardware::storage(fs).await)?;
    out.insert_some(fields::STORAGE, storage.as_ref())?;

    let drivers = ctx.recover("Drivers", hardware::drivers(fs).await)?;
    out.insert_some(fields::DRIVERS, drivers.as_ref())?;

    Ok(out)
}

async fn security_data(host: Host, ctx: UnitContext) -> Result<Fields, UnitError> {
    let fs = &host.fs;
    let mut out = Fields::new();

    let av = ctx.recover("Antivirus", security::av_list(fs).await)?;
    out.insert_some(fields::AV_LIST, av.as_ref())?;

    let fw = ctx.recover("Firewall", security::fw_list(fs).await)?;
    out.insert_some(fields::FW_LIST, fw.as_ref())?;

    let secure_boot = ctx.recover("Secure Boot", security::secure_boot_enabled(fs).await)?;
    out.insert_some(fields::SECURE_BOOT_ENABLED, secure_boot.as_ref())?;

    let tpm = ctx.recover("TPM", security::tpm(fs).await)?;
    out.insert_some(fields::TPM, tpm.as_ref())?;

    Ok(out)
}

async fn network_data(host: Host, ctx: UnitContext) -> Result<Fields, UnitError> {
    let fs = &host.fs;
    let mut out = Fields::new();

    let adapters = ctx.recover("Network adapters", network::adapters(fs).await)?;
    out.insert_some(fields::NET_ADAPTERS, adapters.as_ref())?;

    let routes = ctx.recover("Routes", network::routes(fs).await)?;
    out.insert_some(fields::ROUTES, routes.as_ref())?;

    if let Some(hosts) = ctx.recover("Hosts file", network::hosts_file(fs).await)? {
        out.insert(fields::HOSTS_FILE, &hosts.text)?;
        out.insert(fields::HOSTS_FILE_HASH, &hosts.hash)?;
    }

    Ok(out)
}

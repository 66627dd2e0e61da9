//! Basic machine identity: OS, hostname, user, domain, boot mode, uptime.

use std::collections::BTreeMap;

use serde_json::json;

use crate::domain::Record;

use super::{parse_key_values, HostFs, ProbeError};

/// OS description from `/etc/os-release` plus the running kernel
pub async fn os_record(fs: &HostFs) -> Result<Record, ProbeError> {
    let text = fs.read_to_string("etc/os-release").await?;
    let pairs: BTreeMap<String, String> = parse_key_values(&text, '=').into_iter().collect();

    let mut record = Record::new();
    let caption = pairs
        .get("PRETTY_NAME")
        .or_else(|| pairs.get("NAME"))
        .ok_or_else(|| ProbeError::unavailable("os-release has no NAME"))?;
    record.insert("Caption".to_string(), json!(caption));

    for (key, label) in [("VERSION_ID", "Version"), ("ID", "Id"), ("NAME", "Name")] {
        if let Some(value) = pairs.get(key) {
            record.insert(label.to_string(), json!(value));
        }
    }

    if let Ok(kernel) = fs.read_line("proc/sys/kernel/osrelease").await {
        record.insert("KernelVersion".to_string(), json!(kernel));
    }
    Ok(record)
}

pub async fn hostname(fs: &HostFs) -> Result<String, ProbeError> {
    let name = match fs.read_line("proc/sys/kernel/hostname").await {
        Ok(name) => name,
        Err(_) => fs.read_line("etc/hostname").await?,
    };
    if name.is_empty() {
        return Err(ProbeError::unavailable("hostname is empty"));
    }
    Ok(name)
}

/// Login name of the user running the collector
pub fn username(env: &BTreeMap<String, String>) -> Result<String, ProbeError> {
    ["USER", "LOGNAME", "USERNAME"]
        .iter()
        .filter_map(|key| env.get(*key))
        .find(|value| !value.is_empty())
        .cloned()
        .ok_or_else(|| ProbeError::unavailable("no USER or LOGNAME in the environment"))
}

/// NIS/YP domain name; `None` when the machine has no domain
pub async fn domain(fs: &HostFs) -> Result<Option<String>, ProbeError> {
    let name = fs.read_line("proc/sys/kernel/domainname").await?;
    if name.is_empty() || name == "(none)" {
        return Ok(None);
    }
    Ok(Some(name))
}

pub async fn boot_mode(fs: &HostFs) -> String {
    if fs.exists("sys/firmware/efi").await {
        "UEFI".to_string()
    } else {
        "Legacy".to_string()
    }
}

/// Seconds since boot
pub async fn uptime(fs: &HostFs) -> Result<u64, ProbeError> {
    let line = fs.read_line("proc/uptime").await?;
    line.split_whitespace()
        .next()
        .and_then(|secs| secs.parse::<f64>().ok())
        .map(|secs| secs as u64)
        .ok_or_else(|| ProbeError::unavailable(format!("unexpected /proc/uptime contents: {}", line)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probes::fixture::FixtureHost;

    #[tokio::test]
    async fn test_os_record() {
        let host = FixtureHost::new();
        host.write(
            "etc/os-release",
            "NAME=\"Ubuntu\"\nVERSION_ID=\"24.04\"\nID=ubuntu\nPRETTY_NAME=\"Ubuntu 24.04 LTS\"\n",
        )
        .write("proc/sys/kernel/osrelease", "6.8.0-31-generic\n");

        let record = os_record(&host.fs).await.unwrap();
        assert_eq!(record["Caption"], json!("Ubuntu 24.04 LTS"));
        assert_eq!(record["Version"], json!("24.04"));
        assert_eq!(record["KernelVersion"], json!("6.8.0-31-generic"));
    }

    #[tokio::test]
    async fn test_hostname_falls_back_to_etc() {
        let host = FixtureHost::new();
        host.write("etc/hostname", "workstation\n");
        assert_eq!(hostname(&host.fs).await.unwrap(), "workstation");
    }

    #[tokio::test]
    async fn test_domain() {
        let host = FixtureHost::new();
        assert!(matches!(domain(&host.fs).await, Err(ProbeError::Unavailable(_))));

        host.write("proc/sys/kernel/domainname", "(none)\n");
        assert_eq!(domain(&host.fs).await.unwrap(), None);

        host.write("proc/sys/kernel/domainname", "corp.example\n");
        assert_eq!(domain(&host.fs).await.unwrap().as_deref(), Some("corp.example"));
    }

    #[tokio::test]
    async fn test_uptime_and_boot_mode() {
        let host = FixtureHost::new();
        host.write("proc/uptime", "12345.67 54321.00\n");
        assert_eq!(uptime(&host.fs).await.unwrap(), 12345);
        assert_eq!(boot_mode(&host.fs).await, "Legacy");

        host.mkdir("sys/firmware/efi");
        assert_eq!(boot_mode(&host.fs).await, "UEFI");
    }

    #[test]
    fn test_username_from_env() {
        let mut env = BTreeMap::new();
        assert!(username(&env).is_err());
        env.insert("LOGNAME".to_string(), "alice".to_string());
        assert_eq!(username(&env).unwrap(), "alice");
    }
}

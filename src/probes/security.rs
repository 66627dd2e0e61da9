//! Security posture: antivirus, firewall, Secure Boot and TPM.

use serde_json::json;

use crate::domain::Record;

use super::{HostFs, ProbeError};

/// EFI variable holding the Secure Boot state
const SECURE_BOOT_VAR: &str =
    "sys/firmware/efi/efivars/SecureBoot-8be4df61-93ca-11d2-aa0d-00e098032b8c";

/// Antivirus products and a path their installation leaves behind
const AV_MARKERS: [(&str, &str); 5] = [
    ("ClamAV", "usr/bin/clamscan"),
    ("Microsoft Defender for Endpoint", "opt/microsoft/mdatp"),
    ("CrowdStrike Falcon", "opt/CrowdStrike"),
    ("ESET Endpoint Antivirus", "opt/eset"),
    ("Sophos Protection", "opt/sophos-spl"),
];

/// Firewall front ends and their binaries
const FW_MARKERS: [(&str, &str); 4] = [
    ("ufw", "usr/sbin/ufw"),
    ("firewalld", "usr/sbin/firewalld"),
    ("nftables", "usr/sbin/nft"),
    ("iptables", "usr/sbin/iptables"),
];

async fn installed(fs: &HostFs, markers: &[(&str, &str)]) -> Vec<String> {
    let mut found = Vec::new();
    for (name, path) in markers {
        if fs.exists(path).await {
            found.push(name.to_string());
        }
    }
    found
}

pub async fn av_list(fs: &HostFs) -> Result<Vec<String>, ProbeError> {
    Ok(installed(fs, &AV_MARKERS).await)
}

/// Installed firewalls. Having none is reported as unavailable.
pub async fn fw_list(fs: &HostFs) -> Result<Vec<String>, ProbeError> {
    let found = installed(fs, &FW_MARKERS).await;
    if found.is_empty() {
        return Err(ProbeError::unavailable("no firewall front end found"));
    }
    Ok(found)
}

/// Secure Boot state from its EFI variable. The first four bytes are
/// attributes; the fifth is the value.
pub async fn secure_boot_enabled(fs: &HostFs) -> Result<bool, ProbeError> {
    if !fs.exists("sys/firmware/efi").await {
        return Err(ProbeError::unavailable("system was not booted with UEFI"));
    }
    let bytes = fs.read_bytes(SECURE_BOOT_VAR).await?;
    match bytes.get(4) {
        Some(value) => Ok(*value == 1),
        None => Err(ProbeError::unavailable("SecureBoot variable is truncated")),
    }
}

pub async fn tpm(fs: &HostFs) -> Result<Record, ProbeError> {
    let base = "sys/class/tpm/tpm0";
    if !fs.exists(base).await {
        return Err(ProbeError::unavailable("no TPM device present"));
    }

    let mut record = Record::new();
    record.insert("IsEnabled".to_string(), json!(true));
    if let Ok(major) = fs.read_line(&format!("{}/tpm_version_major", base)).await {
        record.insert("SpecVersion".to_string(), json!(major));
    }
    if let Ok(description) = fs.read_line(&format!("{}/device/description", base)).await {
        record.insert("ManufacturerVersionInfo".to_string(), json!(description));
    }
    Ok(record)
}

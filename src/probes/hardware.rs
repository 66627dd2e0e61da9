//! CPU, memory, storage and kernel module probes.

use serde_json::json;

use crate::domain::Record;

use super::{parse_key_values, HostFs, ProbeError};

/// Block devices that are not physical storage
const VIRTUAL_BLOCK_PREFIXES: [&str; 4] = ["loop", "ram", "zram", "dm-"];

/// First processor block of `/proc/cpuinfo` plus the logical CPU count
pub async fn cpu(fs: &HostFs) -> Result<Record, ProbeError> {
    let text = fs.read_to_string("proc/cpuinfo").await?;
    let logical = text
        .lines()
        .filter(|line| line.starts_with("processor"))
        .count();
    let first_block = text.split("\n\n").next().unwrap_or("");
    let pairs = parse_key_values(first_block, ':');
    let get = |key: &str| {
        pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    };

    let mut record = Record::new();
    let name = get("model name")
        .or_else(|| get("Model"))
        .ok_or_else(|| ProbeError::unavailable("cpuinfo has no model name"))?;
    record.insert("Name".to_string(), json!(name));
    if let Some(vendor) = get("vendor_id") {
        record.insert("Manufacturer".to_string(), json!(vendor));
    }
    if let Some(cores) = get("cpu cores").and_then(|v| v.parse::<u64>().ok()) {
        record.insert("NumberOfCores".to_string(), json!(cores));
    }
    if let Some(mhz) = get("cpu MHz").and_then(|v| v.parse::<f64>().ok()) {
        record.insert("CurrentClockSpeed".to_string(), json!(mhz.round() as u64));
    }
    record.insert("NumberOfLogicalProcessors".to_string(), json!(logical));
    Ok(record)
}

/// Memory totals in bytes
pub async fn memory(fs: &HostFs) -> Result<Record, ProbeError> {
    let text = fs.read_to_string("proc/meminfo").await?;
    let pairs = parse_key_values(&text, ':');

    let mut record = Record::new();
    for (key, label) in [
        ("MemTotal", "TotalPhysical"),
        ("MemAvailable", "AvailablePhysical"),
        ("SwapTotal", "TotalSwap"),
        ("SwapFree", "AvailableSwap"),
    ] {
        let bytes = pairs
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, v)| v.split_whitespace().next())
            .and_then(|n| n.parse::<u64>().ok())
            .map(|kib| kib * 1024);
        if let Some(bytes) = bytes {
            record.insert(label.to_string(), json!(bytes));
        }
    }

    if !record.contains_key("TotalPhysical") {
        return Err(ProbeError::unavailable("meminfo has no MemTotal"));
    }
    Ok(record)
}

/// Physical block devices from `/sys/block`
pub async fn storage(fs: &HostFs) -> Result<Vec<Record>, ProbeError> {
    let mut disks = Vec::new();

    for name in fs.list_dir("sys/block").await? {
        if VIRTUAL_BLOCK_PREFIXES.iter().any(|p| name.starts_with(p)) {
            continue;
        }
        let base = format!("sys/block/{}", name);

        let mut record = Record::new();
        record.insert("DeviceName".to_string(), json!(name));
        if let Some(sectors) = fs
            .read_line(&format!("{}/size", base))
            .await
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            record.insert("Size".to_string(), json!(sectors * 512));
        }
        if let Ok(model) = fs.read_line(&format!("{}/device/model", base)).await {
            record.insert("Model".to_string(), json!(model));
        }
        if let Ok(rotational) = fs.read_line(&format!("{}/queue/rotational", base)).await {
            let media = if rotational == "1" { "HDD" } else { "SSD" };
            record.insert("MediaType".to_string(), json!(media));
        }
        disks.push(record);
    }

    Ok(disks)
}

/// Loaded kernel modules from `/proc/modules`
pub async fn drivers(fs: &HostFs) -> Result<Vec<Record>, ProbeError> {
    let text = fs.read_to_string("proc/modules").await?;

    let modules = text
        .lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 5 {
                return None;
            }
            let used_by: Vec<&str> = cols[3]
                .split(',')
                .filter(|m| !m.is_empty() && *m != "-")
                .collect();

            let mut record = Record::new();
            record.insert("Name".to_string(), json!(cols[0]));
            record.insert("Size".to_string(), json!(cols[1].parse::<u64>().unwrap_or(0)));
            record.insert("UsedBy".to_string(), json!(used_by));
            record.insert("State".to_string(), json!(cols[4]));
            Some(record)
        })
        .collect();

    Ok(modules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probes::fixture::FixtureHost;

    const CPUINFO: &str = "processor\t: 0\nvendor_id\t: GenuineIntel\nmodel name\t: Intel(R) Core(TM) i7\ncpu MHz\t\t: 2399.998\ncpu cores\t: 2\n\nprocessor\t: 1\nvendor_id\t: GenuineIntel\nmodel name\t: Intel(R) Core(TM) i7\n";

    #[tokio::test]
    async fn test_cpu_record() {
        let host = FixtureHost::new();
        host.write("proc/cpuinfo", CPUINFO);

        let record = cpu(&host.fs).await.unwrap();
        assert_eq!(record["Name"], json!("Intel(R) Core(TM) i7"));
        assert_eq!(record["NumberOfLogicalProcessors"], json!(2));
        assert_eq!(record["NumberOfCores"], json!(2));
        assert_eq!(record["CurrentClockSpeed"], json!(2400));
    }

    #[tokio::test]
    async fn test_memory_in_bytes() {
        let host = FixtureHost::new();
        host.write("proc/meminfo", "MemTotal:       16000 kB\nMemAvailable:    8000 kB\n");

        let record = memory(&host.fs).await.unwrap();
        assert_eq!(record["TotalPhysical"], json!(16000 * 1024));
        assert!(!record.contains_key("TotalSwap"));
    }

    #[tokio::test]
    async fn test_storage_skips_virtual_devices() {
        let host = FixtureHost::new();
        host.write("sys/block/sda/size", "1000\n")
            .write("sys/block/sda/queue/rotational", "0\n")
            .write("sys/block/loop0/size", "10\n");

        let disks = storage(&host.fs).await.unwrap();
        assert_eq!(disks.len(), 1);
        assert_eq!(disks[0]["Size"], json!(512_000));
        assert_eq!(disks[0]["MediaType"], json!("SSD"));
    }

    #[tokio::test]
    async fn test_drivers() {
        let host = FixtureHost::new();
        host.write(
            "proc/modules",
            "snd 110592 2 snd_pcm,snd_timer, Live 0x0000000000000000\nkvm 1028096 0 - Live 0x0000000000000000\n",
        );

        let modules = drivers(&host.fs).await.unwrap();
        assert_eq!(modules.len(), 2);
        assert_eq!(modules[0]["UsedBy"], json!(["snd_pcm", "snd_timer"]));
        assert_eq!(modules[1]["UsedBy"], json!([]));
    }
}

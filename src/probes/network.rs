//! Network adapters, routes and the hosts file.

use std::net::Ipv4Addr;

use serde_json::json;
use sha2::{Digest, Sha256};

use crate::domain::Record;

use super::{HostFs, ProbeError};

/// Interfaces from `/sys/class/net`, loopback excluded
pub async fn adapters(fs: &HostFs) -> Result<Vec<Record>, ProbeError> {
    let mut adapters = Vec::new();

    for name in fs.list_dir("sys/class/net").await? {
        if name == "lo" {
            continue;
        }
        let base = format!("sys/class/net/{}", name);

        let mut record = Record::new();
        record.insert("Name".to_string(), json!(name));
        if let Ok(mac) = fs.read_line(&format!("{}/address", base)).await {
            record.insert("MacAddress".to_string(), json!(mac.to_uppercase()));
        }
        if let Ok(state) = fs.read_line(&format!("{}/operstate", base)).await {
            record.insert("Status".to_string(), json!(state));
        }
        if let Some(mtu) = read_number(fs, &format!("{}/mtu", base)).await {
            record.insert("Mtu".to_string(), json!(mtu));
        }
        // Mbit/s; virtual and down links report -1 or fail to read
        if let Some(speed) = read_number(fs, &format!("{}/speed", base)).await {
            if speed > 0 {
                record.insert("Speed".to_string(), json!(speed as u64 * 1_000_000));
            }
        }
        adapters.push(record);
    }

    Ok(adapters)
}

async fn read_number(fs: &HostFs, relative: &str) -> Option<i64> {
    fs.read_line(relative).await.ok()?.parse().ok()
}

/// IPv4 routing table from `/proc/net/route`
pub async fn routes(fs: &HostFs) -> Result<Vec<Record>, ProbeError> {
    let text = fs.read_to_string("proc/net/route").await?;
    Ok(parse_routes(&text))
}

pub fn parse_routes(text: &str) -> Vec<Record> {
    text.lines()
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 8 {
                return None;
            }
            let mut record = Record::new();
            record.insert("InterfaceName".to_string(), json!(cols[0]));
            record.insert("Destination".to_string(), json!(hex_ipv4(cols[1])?.to_string()));
            record.insert("NextHop".to_string(), json!(hex_ipv4(cols[2])?.to_string()));
            record.insert("Metric".to_string(), json!(cols[6].parse::<u64>().ok()?));
            record.insert("Mask".to_string(), json!(hex_ipv4(cols[7])?.to_string()));
            Some(record)
        })
        .collect()
}

/// `/proc/net/route` stores addresses as little-endian hex
fn hex_ipv4(value: &str) -> Option<Ipv4Addr> {
    let raw = u32::from_str_radix(value, 16).ok()?;
    Some(Ipv4Addr::from(raw.swap_bytes()))
}

/// Hosts file text, one `\n` per line
/// The hosts file as reported, with the digest of the same bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostsFile {
    /// Contents with line endings normalized to `\n`
    pub text: String,

    /// Uppercase hex SHA-256 of the raw bytes
    pub hash: String,
}

/// Read the hosts file once and hash exactly what was read
pub async fn hosts_file(fs: &HostFs) -> Result<HostsFile, ProbeError> {
    let bytes = fs
        .read_bytes("etc/hosts")
        .await
        .map_err(|_| ProbeError::unavailable("Hosts file not found."))?;

    let hash = sha256_upper(&bytes);
    let raw = String::from_utf8(bytes)
        .map_err(|_| ProbeError::unavailable("Hosts file is not valid UTF-8."))?;
    let text = raw.lines().map(|line| format!("{}\n", line)).collect();

    Ok(HostsFile { text, hash })
}

fn sha256_upper(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode_upper(hasher.finalize())
}

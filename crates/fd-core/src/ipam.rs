//! IPv4 address management: CIDR parsing and subnet utilisation scans.
//!
//! [`scan_addresses`] is a pure function over a parsed network, an optional
//! gateway and the set of assets that carry an IP. [`SubnetScanner`] wires
//! it to the repositories.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::models::Subnet;

/// Smallest prefix a scan accepts. A /20 has 4094 usable hosts.
pub const MIN_SCAN_PREFIX: u8 = 20;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CidrError {
    #[error("CIDR '{0}' is missing a /prefix")]
    MissingPrefix(String),

    #[error("'{0}' is not a valid IPv4 address")]
    InvalidAddress(String),

    #[error("'{0}' is not a valid prefix length (0-32)")]
    InvalidPrefix(String),
}

/// An IPv4 network in CIDR notation, always normalised to its network
/// address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4Cidr {
    network: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Cidr {
    /// Parses `a.b.c.d/n`. Host bits are cleared, so `192.168.1.7/24`
    /// becomes `192.168.1.0/24`.
    pub fn parse(s: &str) -> Result<Self, CidrError> {
        let s = s.trim();
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| CidrError::MissingPrefix(s.to_string()))?;

        let addr = parse_ipv4(addr)?;
        let prefix: u8 = prefix
            .trim()
            .parse()
            .ok()
            .filter(|p| *p <= 32)
            .ok_or_else(|| CidrError::InvalidPrefix(prefix.to_string()))?;

        let network = Ipv4Addr::from(u32::from(addr) & mask_for(prefix));
        Ok(Self { network, prefix })
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn mask(&self) -> Ipv4Addr {
        Ipv4Addr::from(mask_for(self.prefix))
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network) | !mask_for(self.prefix))
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & mask_for(self.prefix) == u32::from(self.network)
    }

    /// First and last usable host. /31 uses both addresses and /32 the
    /// single one; larger networks exclude network and broadcast.
    fn host_bounds(&self) -> (u32, u32) {
        let net = u32::from(self.network);
        let bcast = u32::from(self.broadcast());
        match self.prefix {
            31 | 32 => (net, bcast),
            _ => (net + 1, bcast - 1),
        }
    }

    pub fn host_count(&self) -> u64 {
        let (first, last) = self.host_bounds();
        u64::from(last - first) + 1
    }

    /// Usable host addresses in ascending order.
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> {
        let (first, last) = self.host_bounds();
        (first..=last).map(Ipv4Addr::from)
    }
}

fn mask_for(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

impl FromStr for Ipv4Cidr {
    type Err = CidrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Ipv4Cidr {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Parses a dotted-quad address, tolerating surrounding whitespace.
pub fn parse_ipv4(s: &str) -> Result<Ipv4Addr, CidrError> {
    s.trim()
        .parse()
        .map_err(|_| CidrError::InvalidAddress(s.trim().to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AddressStatus {
    Gateway,
    Used,
    Free,
}

/// An asset carrying an IP, as loaded for a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkDevice {
    pub asset_id: Uuid,
    pub asset_tag: String,
    pub name: String,
    pub hostname: Option<String>,
    pub ip_address: String,
    /// Full name of the assigned employee, if any.
    pub assigned_to: Option<String>,
}

/// Identity of the device occupying an address.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceRef {
    pub asset_id: Uuid,
    pub asset_tag: String,
    pub name: String,
    pub hostname: Option<String>,
    pub assigned_to: Option<String>,
}

impl From<&NetworkDevice> for DeviceRef {
    fn from(d: &NetworkDevice) -> Self {
        Self {
            asset_id: d.asset_id,
            asset_tag: d.asset_tag.clone(),
            name: d.name.clone(),
            hostname: d.hostname.clone(),
            assigned_to: d.assigned_to.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AddressEntry {
    pub address: Ipv4Addr,
    pub status: AddressStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceRef>,
}

/// Two assets that store the same IP. The first by asset tag is shown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IpConflict {
    pub address: Ipv4Addr,
    pub kept: String,
    pub ignored: String,
}

/// Per-address view of one network.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AddressScan {
    pub network: Ipv4Cidr,
    pub prefix: u8,
    pub entries: Vec<AddressEntry>,
    pub used: usize,
    pub free: usize,
    pub gateway: usize,
    pub total: usize,
    pub utilization_percent: f64,
    pub conflicts: Vec<IpConflict>,
}

/// Scan result for a stored subnet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanReport {
    pub subnet: Subnet,
    #[serde(flatten)]
    pub scan: AddressScan,
}

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Subnet not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid CIDR: {0}")]
    InvalidCidr(#[from] CidrError),

    #[error("/{prefix} has {hosts} usable addresses; scans are limited to /{min} or smaller", min = MIN_SCAN_PREFIX)]
    RangeTooLarge { prefix: u8, hosts: u64 },

    #[cfg(feature = "database")]
    #[error(transparent)]
    Database(#[from] crate::db::DbError),
}

/// Classifies every usable address of `cidr`.
///
/// Gateway wins over a device on the same address. Devices whose stored IP
/// does not parse are skipped.
pub fn scan_addresses(
    cidr: &Ipv4Cidr,
    gateway: Option<Ipv4Addr>,
    devices: &[NetworkDevice],
) -> Result<AddressScan, ScanError> {
    if cidr.prefix() < MIN_SCAN_PREFIX {
        return Err(ScanError::RangeTooLarge {
            prefix: cidr.prefix(),
            hosts: cidr.host_count(),
        });
    }

    let mut ordered: Vec<&NetworkDevice> = devices.iter().collect();
    ordered.sort_by(|a, b| a.asset_tag.cmp(&b.asset_tag));

    let mut by_ip: HashMap<Ipv4Addr, &NetworkDevice> = HashMap::new();
    let mut conflicts = Vec::new();
    for device in ordered {
        let Ok(ip) = parse_ipv4(&device.ip_address) else {
            tracing::debug!(
                asset_tag = %device.asset_tag,
                ip = %device.ip_address,
                "Ignoring unparsable asset IP"
            );
            continue;
        };
        if !cidr.contains(ip) {
            continue;
        }
        match by_ip.get(&ip) {
            Some(kept) => conflicts.push(IpConflict {
                address: ip,
                kept: kept.asset_tag.clone(),
                ignored: device.asset_tag.clone(),
            }),
            None => {
                by_ip.insert(ip, device);
            }
        }
    }

    let mut entries = Vec::with_capacity(cidr.host_count() as usize);
    let (mut used, mut free, mut gw) = (0, 0, 0);
    for address in cidr.hosts() {
        let entry = if Some(address) == gateway {
            gw += 1;
            AddressEntry {
                address,
                status: AddressStatus::Gateway,
                device: None,
            }
        } else if let Some(device) = by_ip.get(&address) {
            used += 1;
            AddressEntry {
                address,
                status: AddressStatus::Used,
                device: Some(DeviceRef::from(*device)),
            }
        } else {
            free += 1;
            AddressEntry {
                address,
                status: AddressStatus::Free,
                device: None,
            }
        };
        entries.push(entry);
    }

    let total = entries.len();
    let utilization_percent = (((used + gw) as f64 * 100.0 / total as f64) * 10.0).round() / 10.0;

    Ok(AddressScan {
        network: *cidr,
        prefix: cidr.prefix(),
        entries,
        used,
        free,
        gateway: gw,
        total,
        utilization_percent,
        conflicts,
    })
}

#[cfg(feature = "database")]
mod scanner {
    use super::*;
    use crate::db::{create_asset_repository, create_subnet_repository, AssetRepository, DbPool, SubnetRepository};
    use tracing::{info, instrument, warn};

    /// Runs scans against stored subnets and assets.
    pub struct SubnetScanner {
        subnets: Box<dyn SubnetRepository>,
        assets: Box<dyn AssetRepository>,
    }

    impl SubnetScanner {
        pub fn new(pool: &DbPool) -> Self {
            Self {
                subnets: create_subnet_repository(pool),
                assets: create_asset_repository(pool),
            }
        }

        #[instrument(skip(self))]
        pub async fn scan(&self, subnet_id: Uuid) -> Result<ScanReport, ScanError> {
            let subnet = self
                .subnets
                .get(subnet_id)
                .await?
                .ok_or(ScanError::NotFound(subnet_id))?;

            let cidr = Ipv4Cidr::parse(&subnet.cidr)?;
            let gateway = match subnet.gateway.as_deref() {
                Some(g) => match parse_ipv4(g) {
                    Ok(ip) => Some(ip),
                    Err(e) => {
                        warn!(subnet = %subnet.name, error = %e, "Ignoring invalid stored gateway");
                        None
                    }
                },
                None => None,
            };

            let devices = self.assets.list_network_devices().await?;
            let scan = scan_addresses(&cidr, gateway, &devices)?;

            metrics::counter!("fleetdesk_subnet_scans_total").increment(1);
            info!(
                subnet = %subnet.name,
                cidr = %cidr,
                used = scan.used,
                free = scan.free,
                utilization = scan.utilization_percent,
                "Subnet scanned"
            );
            if !scan.conflicts.is_empty() {
                warn!(subnet = %subnet.name, conflicts = scan.conflicts.len(), "Duplicate IPs found");
            }

            Ok(ScanReport { subnet, scan })
        }
    }
}

#[cfg(feature = "database")]
pub use scanner::SubnetScanner;

#[cfg(test)]
mod tests {
    use super::*;

    fn device(tag: &str, ip: &str) -> NetworkDevice {
        NetworkDevice {
            asset_id: Uuid::new_v4(),
            asset_tag: tag.to_string(),
            name: format!("{tag} name"),
            hostname: Some(tag.to_lowercase()),
            ip_address: ip.to_string(),
            assigned_to: Some("Ada Lovelace".to_string()),
        }
    }

    #[test]
    fn test_parse_normalises_host_bits() {
        let cidr = Ipv4Cidr::parse("192.168.1.7/24").unwrap();
        assert_eq!(cidr.to_string(), "192.168.1.0/24");
        assert_eq!(cidr.broadcast(), Ipv4Addr::new(192, 168, 1, 255));
        assert_eq!(cidr.mask(), Ipv4Addr::new(255, 255, 255, 0));
        assert!(cidr.contains(Ipv4Addr::new(192, 168, 1, 200)));
        assert!(!cidr.contains(Ipv4Addr::new(192, 168, 2, 1)));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            Ipv4Cidr::parse("10.0.0.0"),
            Err(CidrError::MissingPrefix(_))
        ));
        assert!(matches!(
            Ipv4Cidr::parse("10.0.0/24"),
            Err(CidrError::InvalidAddress(_))
        ));
        assert!(matches!(
            Ipv4Cidr::parse("10.0.0.0/33"),
            Err(CidrError::InvalidPrefix(_))
        ));
        assert!(Ipv4Cidr::parse("0.0.0.0/0").is_ok());
    }

    #[test]
    fn test_host_counts_by_prefix() {
        let count = |s| Ipv4Cidr::parse(s).unwrap().host_count();
        assert_eq!(count("10.0.0.0/24"), 254);
        assert_eq!(count("10.0.0.0/30"), 2);
        assert_eq!(count("10.0.0.0/31"), 2);
        assert_eq!(count("10.0.0.5/32"), 1);
        assert_eq!(count("10.0.0.0/16"), 65534);
    }

    #[test]
    fn test_scan_slash_24_with_gateway_and_devices() {
        let cidr = Ipv4Cidr::parse("192.168.1.0/24").unwrap();
        let devices = vec![
            device("LAP-001", "192.168.1.10"),
            device("SRV-001", "192.168.1.20"),
            device("OUT-001", "10.0.0.10"),
            device("PRN-001", "192.168.1.100 "),
        ];
        let scan = scan_addresses(&cidr, Some(Ipv4Addr::new(192, 168, 1, 1)), &devices).unwrap();

        assert_eq!(scan.total, 254);
        assert_eq!(scan.entries.len(), 254);
        assert_eq!(scan.entries[0].address, Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(scan.entries[0].status, AddressStatus::Gateway);
        assert_eq!(scan.entries[253].address, Ipv4Addr::new(192, 168, 1, 254));

        let ten = &scan.entries[9];
        assert_eq!(ten.address, Ipv4Addr::new(192, 168, 1, 10));
        assert_eq!(ten.status, AddressStatus::Used);
        let dev = ten.device.as_ref().unwrap();
        assert_eq!(dev.asset_tag, "LAP-001");
        assert_eq!(dev.assigned_to.as_deref(), Some("Ada Lovelace"));

        assert_eq!(scan.used, 3);
        assert_eq!(scan.gateway, 1);
        assert_eq!(scan.free, 250);
        assert_eq!(scan.used + scan.free + scan.gateway, scan.total);
        assert_eq!(scan.utilization_percent, 1.6);
        assert!(scan.conflicts.is_empty());
    }

    #[test]
    fn test_scan_requires_exact_match() {
        let cidr = Ipv4Cidr::parse("192.168.1.0/24").unwrap();
        let devices = vec![device("LAP-001", "192.168.1.100")];
        let scan = scan_addresses(&cidr, None, &devices).unwrap();

        assert_eq!(scan.entries[0].status, AddressStatus::Free);
        assert_eq!(scan.entries[9].status, AddressStatus::Free);
        assert_eq!(scan.entries[99].status, AddressStatus::Used);
        assert_eq!(scan.used, 1);
    }

    #[test]
    fn test_scan_small_prefixes() {
        let scan = |s: &str| {
            scan_addresses(&Ipv4Cidr::parse(s).unwrap(), None, &[])
                .unwrap()
                .entries
                .iter()
                .map(|e| e.address.to_string())
                .collect::<Vec<_>>()
        };
        assert_eq!(scan("10.1.1.0/30"), vec!["10.1.1.1", "10.1.1.2"]);
        assert_eq!(scan("10.1.1.0/31"), vec!["10.1.1.0", "10.1.1.1"]);
        assert_eq!(scan("10.1.1.9/32"), vec!["10.1.1.9"]);
    }

    #[test]
    fn test_scan_rejects_large_ranges() {
        let cidr = Ipv4Cidr::parse("10.0.0.0/16").unwrap();
        match scan_addresses(&cidr, None, &[]) {
            Err(ScanError::RangeTooLarge { prefix, hosts }) => {
                assert_eq!(prefix, 16);
                assert_eq!(hosts, 65534);
            }
            other => panic!("expected RangeTooLarge, got {other:?}"),
        }
        assert!(scan_addresses(&Ipv4Cidr::parse("10.0.0.0/20").unwrap(), None, &[]).is_ok());
    }

    #[test]
    fn test_duplicate_ip_first_tag_wins() {
        let cidr = Ipv4Cidr::parse("172.16.0.0/28").unwrap();
        let devices = vec![
            device("ZZZ-9", "172.16.0.5"),
            device("AAA-1", "172.16.0.5"),
            device("BAD-1", "not-an-ip"),
        ];
        let scan = scan_addresses(&cidr, None, &devices).unwrap();

        let five = scan
            .entries
            .iter()
            .find(|e| e.address == Ipv4Addr::new(172, 16, 0, 5))
            .unwrap();
        assert_eq!(five.device.as_ref().unwrap().asset_tag, "AAA-1");
        assert_eq!(scan.used, 1);
        assert_eq!(
            scan.conflicts,
            vec![IpConflict {
                address: Ipv4Addr::new(172, 16, 0, 5),
                kept: "AAA-1".into(),
                ignored: "ZZZ-9".into()
            }]
        );
    }

    #[test]
    fn test_gateway_outranks_device() {
        let cidr = Ipv4Cidr::parse("10.9.0.0/29").unwrap();
        let gw = Ipv4Addr::new(10, 9, 0, 1);
        let scan = scan_addresses(&cidr, Some(gw), &[device("RTR-1", "10.9.0.1")]).unwrap();
        assert_eq!(scan.entries[0].status, AddressStatus::Gateway);
        assert_eq!(scan.used, 0);
        assert_eq!(scan.total, 6);
        assert_eq!(scan.utilization_percent, 16.7);
    }

    #[test]
    fn test_entry_serialization() {
        let cidr = Ipv4Cidr::parse("10.0.0.0/30").unwrap();
        let scan = scan_addresses(&cidr, Some(Ipv4Addr::new(10, 0, 0, 1)), &[]).unwrap();
        let json = serde_json::to_value(&scan).unwrap();
        assert_eq!(json["network"], "10.0.0.0/30");
        assert_eq!(json["entries"][0]["status"], "GATEWAY");
        assert_eq!(json["entries"][0]["address"], "10.0.0.1");
        assert_eq!(json["entries"][1]["status"], "FREE");
        assert!(json["entries"][1].get("device").is_none());
    }
}

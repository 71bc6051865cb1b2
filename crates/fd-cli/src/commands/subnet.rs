//! Offline subnet scan.

use anyhow::{Context, Result};
use colored::{ColoredString, Colorize};
use uuid::Uuid;

use fd_core::db::DbPool;
use fd_core::{AddressEntry, AddressStatus, ScanReport, SubnetScanner};

use crate::OutputFormat;

/// Prints the address table and usage for one subnet. Runs outside the API
/// and is not audited.
pub async fn scan_subnet(pool: &DbPool, id: Uuid, format: OutputFormat) -> Result<ScanReport> {
    let report = SubnetScanner::new(pool)
        .scan(id)
        .await
        .with_context(|| format!("Failed to scan subnet {}", id))?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_report(&report),
    }

    Ok(report)
}

fn print_report(report: &ScanReport) {
    let scan = &report.scan;
    println!(
        "{} {} ({})",
        "Subnet".bold(),
        report.subnet.name.cyan(),
        scan.network
    );
    println!("─────────────────────────────────────────────");

    for entry in &scan.entries {
        println!(
            "  {:<16} {} {}",
            entry.address.to_string(),
            status_label(entry.status),
            device_label(entry)
        );
    }

    println!();
    println!(
        "  Used: {}  Free: {}  Gateway: {}  Total: {}  ({:.1}% utilised)",
        scan.used, scan.free, scan.gateway, scan.total, scan.utilization_percent
    );

    if !scan.conflicts.is_empty() {
        println!();
        println!("{}", "IP conflicts:".yellow().bold());
        for conflict in &scan.conflicts {
            println!(
                "  {} {} shown, {} ignored",
                conflict.address, conflict.kept, conflict.ignored
            );
        }
    }
}

fn status_label(status: AddressStatus) -> ColoredString {
    match status {
        AddressStatus::Gateway => format!("{:<8}", "GATEWAY").blue(),
        AddressStatus::Used => format!("{:<8}", "USED").yellow(),
        AddressStatus::Free => format!("{:<8}", "FREE").green(),
    }
}

fn device_label(entry: &AddressEntry) -> String {
    match &entry.device {
        Some(device) => {
            let mut label = format!("{} {}", device.asset_tag, device.name);
            if let Some(owner) = &device.assigned_to {
                label.push_str(&format!(" ({owner})"));
            }
            label
        }
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::scratch_database;
    use fd_core::db::{create_asset_repository, create_subnet_repository};
    use fd_core::{Asset, AssetType, Subnet};

    #[tokio::test]
    async fn test_scan_reports_usage() {
        let (_dir, pool) = scratch_database().await;
        let mut subnet = Subnet::new("Office", "10.1.0.0/29");
        subnet.gateway = Some("10.1.0.1".to_string());
        let subnet = create_subnet_repository(&pool).create(&subnet).await.unwrap();

        let mut printer = Asset::new("PRN-001", "Lobby printer", AssetType::Printer);
        printer.ip_address = Some("10.1.0.5".to_string());
        create_asset_repository(&pool).create(&printer).await.unwrap();

        let report = scan_subnet(&pool, subnet.id, OutputFormat::Text).await.unwrap();
        assert_eq!(report.scan.total, 6);
        assert_eq!(report.scan.gateway, 1);
        assert_eq!(report.scan.used, 1);
        assert_eq!(report.scan.free, 4);

        let used = report
            .scan
            .entries
            .iter()
            .find(|e| e.status == AddressStatus::Used)
            .unwrap();
        assert_eq!(device_label(used), "PRN-001 Lobby printer");
    }

    #[tokio::test]
    async fn test_unknown_subnet() {
        let (_dir, pool) = scratch_database().await;
        assert!(scan_subnet(&pool, Uuid::new_v4(), OutputFormat::Json)
            .await
            .is_err());
    }
}

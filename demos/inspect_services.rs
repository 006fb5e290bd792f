//! List the GATT services of every device found in a short scan
//!
//! Run with: cargo run --example inspect_services

use heartlink_ble::ble::service_name;
use heartlink_ble::{Config, DeviceManager, Result, ScanConfig};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("heartlink_ble=info".parse().unwrap()),
        )
        .init();

    // No service filter: inspect everything in range.
    let config = Config::default().with_scan(
        ScanConfig::default()
            .with_service_filter(Vec::new())
            .with_default_duration(Duration::from_secs(5)),
    );
    let manager = DeviceManager::with_config(config).await?;
    manager.wait_for_powered_on(Duration::from_secs(10)).await?;

    let devices = manager.scan_default().await;
    println!("Found {} device(s)\n", devices.len());

    for device in &devices {
        println!("{}", device);
        match manager.inspect_services(device).await {
            Ok(services) => {
                for uuid in services {
                    println!("  {} {}", uuid, service_name(&uuid).unwrap_or(""));
                }
            }
            Err(e) => println!("  could not inspect: {}", e),
        }
    }

    Ok(())
}

//! Basic example: Discover nearby heart-rate and fitness sensors
//!
//! Run with: cargo run --example discover_devices

use heartlink_ble::{DeviceManager, Result};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("heartlink_ble=debug".parse().unwrap()),
        )
        .init();

    println!("Starting BLE sensor discovery...");
    println!("Wake your sensor up (put the strap on, spin the crank)!\n");

    let manager = DeviceManager::new().await?;
    manager.wait_for_powered_on(Duration::from_secs(10)).await?;

    let _power = manager
        .on_power_state_changed(|state| println!("\nBluetooth is now {}", state))
        .await?;

    println!("Scanning for 10 seconds...\n");
    let devices = manager.scan(Duration::from_secs(10)).await;

    println!("--- Scan Complete ---");
    println!("Total devices found: {}", devices.len());

    for device in &devices {
        println!("\n{}", device);
        println!("  RSSI: {:?} dBm", device.rssi);
        println!("  Last seen: {}", device.last_seen.format("%H:%M:%S"));
        let names = device.service_names();
        if names.is_empty() {
            println!("  Services: {:?}", device.service_uuids);
        } else {
            println!("  Services: {}", names.join(", "));
        }
    }

    println!("\nDone!");
    Ok(())
}

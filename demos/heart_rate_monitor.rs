//! Real-time heart rate monitoring example
//!
//! Run with: cargo run --example heart_rate_monitor

use heartlink_ble::{
    ConnectionState, DeviceManager, DeviceObserver, Error, MonitorConfiguration, Result,
    ValueFormat,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (minimal)
    tracing_subscriber::fmt().with_env_filter("warn").init();

    println!("Heart Rate Monitor");
    println!("==================\n");
    println!("Looking for sensors...\n");

    let manager = DeviceManager::new().await?;
    manager.wait_for_powered_on(Duration::from_secs(10)).await?;

    let devices = manager.scan_default().await;
    let device = devices
        .iter()
        .find(|d| d.advertises(&heartlink_ble::ble::HEART_RATE_SERVICE_UUID))
        .ok_or_else(|| Error::DeviceNotFound {
            identifier: "any heart rate sensor".to_string(),
        })?;

    println!("Found sensor: {}", device);
    println!("Connecting...\n");

    let heart_rate = MonitorConfiguration::heart_rate(|measurement| match measurement {
        Ok(m) => {
            let width = match m.format {
                ValueFormat::Uint8 => "8-bit",
                ValueFormat::Uint16 => "16-bit",
            };
            println!("Heart rate: {:>3} bpm ({})", m.value, width);
        }
        Err(e) => println!("Bad measurement: {}", e),
    });

    let on_connected: DeviceObserver = Arc::new(|id: &str| println!("Connected to {}", id));
    let on_disconnected: DeviceObserver =
        Arc::new(|id: &str| println!("Lost {}, will retry...", id));

    let handle = manager
        .connect_and_monitor(
            device,
            vec![heart_rate],
            Some(on_connected),
            Some(on_disconnected),
        )
        .await?;

    println!("Monitoring. Press Ctrl+C to exit.\n");

    let mut events = handle.events();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nExiting...");
                break;
            }
            Ok(event) = events.recv() => {
                if event.state == ConnectionState::AwaitingReconnect {
                    println!("Waiting for {} to come back", event.identifier);
                }
            }
        }
    }

    handle.disconnect().await?;

    Ok(())
}

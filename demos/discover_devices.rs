//! Basic example: Discover nearby provisioning devices
//!
//! Run with: cargo run --example discover_devices -- [prefix]

use esp_ble_prov::{ProvisionConfig, Provisioner, Result, SecurityLevel, StreamEvent};
use std::time::Duration;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("esp_ble_prov=debug".parse().unwrap()),
        )
        .init();

    let prefix = std::env::args().nth(1).unwrap_or_else(|| "PROV_".to_string());
    let provisioner = Provisioner::ble(ProvisionConfig::default());

    println!("Scanning for devices starting with {:?}...\n", prefix);

    let names = provisioner
        .list_devices(&prefix, SecurityLevel::Secure1)
        .await?;
    if names.is_empty() {
        println!("No devices found in the scan window.");
    }
    for name in &names {
        println!("  {}", name);
    }

    println!("\nWatching for devices for 20 seconds (Ctrl+C to stop)...");

    let (sink, mut events) = mpsc::channel(32);
    let handle = provisioner.start_device_discovery(&prefix, sink);

    let watch = async {
        while let Some(event) = events.recv().await {
            match event {
                StreamEvent::Device(name) => println!("  discovered {}", name),
                StreamEvent::Error(e) => println!("  discovery failed: {}", e),
                StreamEvent::Network { .. } => {}
            }
        }
    };

    tokio::select! {
        _ = watch => {}
        _ = tokio::time::sleep(Duration::from_secs(20)) => {}
        _ = tokio::signal::ctrl_c() => {}
    }

    handle.stop().await;
    println!("Done.");
    Ok(())
}

//! Discover every light on the network and paint them all one color.
//!
//! This example demonstrates:
//! - Opening a transport and letting discovery run for a few seconds
//! - Refreshing the state of everything that answered
//! - Selecting all online lights and sending one color to them
//!
//! Run with: cargo run --example discover_and_paint

use std::sync::Arc;
use std::time::Duration;

use lan_lights_rs::{Hsbk, Registry, StateStore, StoreConfig, Transport, TransportConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Discovering lights on the network...");

    let registry = Arc::new(Registry::new());
    let transport = Transport::open(TransportConfig::default(), Arc::clone(&registry)).await?;
    let config = StoreConfig {
        refresh_on_discovery: false,
        ..StoreConfig::default()
    };
    let store = StateStore::new(Arc::new(transport.clone()), registry, config);

    tokio::time::sleep(Duration::from_secs(3)).await;
    store.refresh_all().await;

    let devices = store.devices();
    if devices.is_empty() {
        println!("No lights found on the network.");
        transport.close();
        return Ok(());
    }

    println!("Found {} device(s):", devices.len());
    for device in &devices {
        println!(
            "  - {} ({}) at {} [{:?}{}]",
            device.label,
            device.identity,
            device.address,
            device.class,
            if device.online { "" } else { ", offline" }
        );
    }

    let red = Hsbk::from_hsv(0.0, 1.0, 1.0, Hsbk::DEFAULT_KELVIN);
    println!("\nSetting all lights to red...");
    store.select_all();
    store.set_color(red, Some(Duration::from_millis(500))).await;

    transport.close();
    println!("\nDone!");
    Ok(())
}

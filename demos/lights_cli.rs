//! CLI application for discovering and driving LAN lights.
//!
//! Every command opens a transport, waits for discovery, refreshes the
//! devices that answered and then acts on the selected ones.
//!
//! Run with: cargo run --example lights_cli -- --help

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use lan_lights_rs::dj::{DjConfigUpdate, Pattern, Scheduler};
use lan_lights_rs::{
    Hsbk, Identity, Registry, StateStore, StoreConfig, Transport, TransportConfig,
};

#[derive(Parser)]
#[command(name = "lights-cli")]
#[command(about = "Discover and control smart lights on the local network", long_about = None)]
struct Cli {
    /// Seconds to listen for devices before acting
    #[arg(short, long, global = true, default_value = "3")]
    wait: u64,

    /// Only act on this device (defaults to every online device)
    #[arg(short, long, global = true)]
    device: Option<Identity>,

    /// Only act on the group with this label
    #[arg(short, long, global = true, conflicts_with = "device")]
    group: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every device and group that answered
    Discover,

    /// Set a color as "hue,saturation,brightness,kelvin" (each 0-65535)
    Color {
        color: Hsbk,
        /// Fade time in milliseconds
        #[arg(short, long, default_value = "250")]
        fade: u64,
    },

    /// Turn the lights on
    On,

    /// Turn the lights off
    Off,

    /// Turn the lights off if any is on, otherwise on
    Toggle,

    /// Run a beat-synchronized pattern
    Dj {
        /// Pattern: chase, strobe, alternate, wave, random, pulse or blackout
        #[arg(short, long, default_value = "chase")]
        pattern: Pattern,
        /// Beats per minute (30-300)
        #[arg(short, long, default_value = "120")]
        bpm: u16,
        /// Brightness scale (0.0-1.0)
        #[arg(short, long, default_value = "1.0")]
        intensity: f32,
        /// How long to run, in seconds
        #[arg(short = 's', long, default_value = "30")]
        seconds: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let registry = Arc::new(Registry::new());
    let transport = Transport::open(TransportConfig::default(), Arc::clone(&registry)).await?;
    let store = StateStore::new(
        Arc::new(transport.clone()),
        registry,
        StoreConfig {
            refresh_on_discovery: false,
            ..StoreConfig::default()
        },
    );

    println!("Listening for devices ({}s)...", cli.wait);
    tokio::time::sleep(Duration::from_secs(cli.wait)).await;
    store.refresh_all().await;

    if let Commands::Discover = cli.command {
        print_inventory(&store);
        transport.close();
        return Ok(());
    }

    match (&cli.device, &cli.group) {
        (Some(identity), _) => {
            if store.device(identity).is_none() {
                transport.close();
                return Err(format!("device {identity} did not answer").into());
            }
            store.select_only(identity);
        }
        (None, Some(label)) => {
            let group = store
                .sorted_groups()
                .into_iter()
                .find(|g| g.label.eq_ignore_ascii_case(label));
            match group {
                Some(group) => store.select_group(&group.id),
                None => {
                    transport.close();
                    return Err(format!("no group labelled {label:?}").into());
                }
            }
        }
        (None, None) => store.select_all(),
    }

    let selection = store.selection();
    if selection.is_empty() {
        println!("No lights to act on.");
        transport.close();
        return Ok(());
    }
    println!("Acting on {} device(s)", selection.len());

    match cli.command {
        Commands::Discover => unreachable!(),
        Commands::Color { color, fade } => {
            store
                .set_color(color.clamped(), Some(Duration::from_millis(fade)))
                .await;
        }
        Commands::On => store.set_power(true, None).await,
        Commands::Off => store.set_power(false, None).await,
        Commands::Toggle => store.toggle_power().await,
        Commands::Dj {
            pattern,
            bpm,
            intensity,
            seconds,
        } => {
            let dj = Scheduler::new(Arc::new(transport.clone()));
            dj.start(
                store.color_targets(),
                Some(DjConfigUpdate {
                    bpm: Some(bpm),
                    pattern: Some(pattern),
                    intensity: Some(intensity),
                    ..DjConfigUpdate::default()
                }),
            );
            let config = dj.config();
            println!("Running {} at {} bpm for {}s", config.pattern, config.bpm, seconds);
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            dj.stop();
            println!("Stopped after {} beats", dj.beat());
        }
    }

    transport.close();
    Ok(())
}

fn print_inventory(store: &StateStore) {
    let devices = store.devices();
    if devices.is_empty() {
        println!("No lights found on the network.");
        return;
    }

    println!("\nFound {} device(s):", devices.len());
    for group in store.sorted_groups() {
        println!("\n{}", group.label);
        for device in store.group_devices(&group.id) {
            let state = if !device.online {
                "offline".to_string()
            } else if device.power {
                format!("on  {:>5.0}°", device.color.hue_degrees())
            } else {
                "off".to_string()
            };
            println!("  {}  {:20}  {}", device.identity, device.label, state);
        }
    }

    let others: Vec<_> = devices.iter().filter(|d| !d.class.is_light()).collect();
    if !others.is_empty() {
        println!("\nOther devices");
        for device in others {
            println!("  {}  {:20}  {:?}", device.identity, device.label, device.class);
        }
    }
}

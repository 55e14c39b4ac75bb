//! # lan_lights_rs
//!
//! An async Rust engine for discovering and driving smart lights on the LAN.
//!
//! This crate is **runtime-agnostic**. It finds devices with UDP broadcasts,
//! keeps a live model of each device's power, color and group, and runs a
//! beat-synchronized pattern engine on top of it.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use lan_lights_rs::{Hsbk, Registry, StateStore, StoreConfig, Transport, TransportConfig};
//!
//! async fn paint_everything_blue() -> Result<(), lan_lights_rs::Error> {
//!     let registry = Arc::new(Registry::new());
//!     let transport = Transport::open(TransportConfig::default(), Arc::clone(&registry)).await?;
//!     let store = StateStore::new(Arc::new(transport.clone()), registry, StoreConfig::default());
//!
//!     // Give discovery a moment, then query whatever answered.
//!     lan_lights_rs::runtime::sleep(std::time::Duration::from_secs(2)).await;
//!     store.refresh_all().await;
//!
//!     store.select_all();
//!     store.set_color(Hsbk::from_hsv(240.0, 1.0, 1.0, 3500), None).await;
//!     transport.close();
//!     Ok(())
//! }
//! ```
//!
//! ## Components
//!
//! - [`Transport`]: one UDP socket for discovery broadcasts, unicast commands
//!   and reply routing
//! - [`Registry`]: every device that has answered, keyed by [`Identity`]
//! - [`StateStore`]: cached device state, groups and selection, with
//!   deduplicated refresh and optimistic commands
//! - [`dj::Scheduler`]: beat clock evaluating a [`dj::Pattern`] over a set of
//!   devices
//! - [`commands`]: builders turning lighting intents into [`Message`]s
//!
//! The store and the scheduler only talk to devices through the [`Client`]
//! trait, which [`Transport`] implements.
//!
//! ## Communication
//!
//! Every datagram is one JSON [`Frame`] on UDP port [`PORT`]. See the
//! [`protocol`] module for the framing.
//!
//! ## Feature Flags
//!
//! - `runtime-tokio` (default): Use the tokio async runtime
//! - `runtime-async-std`: Use the async-std runtime
//! - `runtime-smol`: Use the smol runtime

pub mod commands;
mod config;
pub mod dj;
mod errors;
pub mod protocol;
mod registry;
pub mod runtime;
mod state;
mod store;
#[cfg(test)]
mod testing;
mod transport;
mod types;

// Re-export public API
pub use config::{DeviceClass, ProductCatalog, StoreConfig, TransportConfig};
pub use errors::Error;
pub use protocol::{Frame, GroupId, Identity, Message, PORT};
pub use registry::{DeviceHandle, Devices, DiscoveryCallback, Registry};
pub use state::{DeviceState, Group, Snapshot, StoreEvent, UNGROUPED_LABEL};
pub use store::{StateStore, Subscription};
pub use transport::{Client, Transport};
pub use types::{Hsbk, Waveform};

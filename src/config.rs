//! Device classification and runtime settings.

use std::collections::BTreeSet;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};

use crate::protocol::PORT;

/// Classification of a device by what it can be addressed with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceClass {
    /// Color capable light
    Light,
    /// Relay switch; never color addressed
    Switch,
    /// Version not reported yet
    #[default]
    Unknown,
}

impl DeviceClass {
    pub fn is_light(&self) -> bool {
        matches!(self, DeviceClass::Light)
    }

    pub fn is_switch(&self) -> bool {
        matches!(self, DeviceClass::Switch)
    }
}

/// Product ids known to belong to switches.
///
/// Anything not on the list is classified as a light, so newer switch models
/// should be added here rather than in code.
///
/// # Examples
///
/// ```
/// use lan_lights_rs::{DeviceClass, ProductCatalog};
///
/// let catalog = ProductCatalog::default();
/// assert_eq!(catalog.classify(70), DeviceClass::Switch);
/// assert_eq!(catalog.classify(27), DeviceClass::Light);
///
/// let catalog = ProductCatalog::with_switches([27]);
/// assert_eq!(catalog.classify(27), DeviceClass::Switch);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductCatalog {
    pub switch_products: BTreeSet<u32>,
}

impl Default for ProductCatalog {
    fn default() -> Self {
        Self::with_switches([70, 71, 89, 115])
    }
}

impl ProductCatalog {
    pub fn with_switches(products: impl IntoIterator<Item = u32>) -> Self {
        ProductCatalog {
            switch_products: products.into_iter().collect(),
        }
    }

    pub fn classify(&self, product: u32) -> DeviceClass {
        if self.switch_products.contains(&product) {
            DeviceClass::Switch
        } else {
            DeviceClass::Light
        }
    }
}

/// Socket and discovery settings for [`crate::Transport`].
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransportConfig {
    pub bind: SocketAddr,
    /// Where discovery requests are broadcast.
    pub broadcast: SocketAddr,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub discovery_interval: Duration,
    /// How long a single request attempt waits for its reply.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub request_timeout: Duration,
    pub retries: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub retry_delay: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            bind: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)),
            broadcast: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, PORT)),
            discovery_interval: Duration::from_millis(500),
            request_timeout: Duration::from_millis(1000),
            retries: 2,
            retry_delay: Duration::from_millis(250),
        }
    }
}

/// Behaviour of [`crate::StateStore`].
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreConfig {
    pub catalog: ProductCatalog,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub color_duration: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub power_duration: Duration,
    /// Query a device's state as soon as it is discovered.
    pub refresh_on_discovery: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            catalog: ProductCatalog::default(),
            color_duration: Duration::from_millis(250),
            power_duration: Duration::ZERO,
            refresh_on_discovery: true,
        }
    }
}

//! Registry of devices seen on the network.

use std::net::{IpAddr, SocketAddr};

use log::info;
use parking_lot::{Mutex, RwLock};

use crate::protocol::Identity;

/// Called once for every newly discovered device.
pub type DiscoveryCallback = Box<dyn Fn(&DeviceHandle) + Send + Sync + 'static>;

/// Where and how to reach one physical device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    pub identity: Identity,
    pub address: SocketAddr,
    /// Raw 8-byte target field the device announced itself with.
    pub target: [u8; 8],
}

/// Known devices keyed by identity, kept in registration order.
///
/// # Example
///
/// ```
/// use std::net::{IpAddr, Ipv4Addr};
/// use lan_lights_rs::{Identity, Registry};
///
/// let registry = Registry::new();
/// let id: Identity = "d073d5000001".parse().unwrap();
/// let ip = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20));
///
/// assert!(registry.register(id, 56700, ip, id.target()));
/// // Rediscovery only refreshes the address.
/// assert!(!registry.register(id, 56701, ip, id.target()));
/// assert_eq!(registry.len(), 1);
/// assert_eq!(registry.get(&id).unwrap().address.port(), 56701);
/// ```
#[derive(Default)]
pub struct Registry {
    devices: RwLock<Vec<DeviceHandle>>,
    callbacks: Mutex<Vec<DiscoveryCallback>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a device announcement.
    ///
    /// Returns `true` if the device was new, in which case every discovery
    /// callback has been invoked with its handle.
    pub fn register(&self, identity: Identity, port: u16, address: IpAddr, target: [u8; 8]) -> bool {
        let address = SocketAddr::new(address, port);
        let handle = {
            let mut devices = self.devices.write();
            if let Some(known) = devices.iter_mut().find(|d| d.identity == identity) {
                known.address = address;
                known.target = target;
                return false;
            }
            let handle = DeviceHandle {
                identity,
                address,
                target,
            };
            devices.push(handle.clone());
            handle
        };

        info!("Discovered device {} at {}", identity, address);
        for callback in self.callbacks.lock().iter() {
            callback(&handle);
        }
        true
    }

    pub fn on_discovered<F: Fn(&DeviceHandle) + Send + Sync + 'static>(&self, callback: F) {
        self.callbacks.lock().push(Box::new(callback));
    }

    pub fn get(&self, identity: &Identity) -> Option<DeviceHandle> {
        self.devices
            .read()
            .iter()
            .find(|d| d.identity == *identity)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    /// Iterate over known devices in registration order.
    ///
    /// The iterator reads the live registry on every step, so devices
    /// registered while iterating are still yielded. Call again to restart.
    pub fn iter(&self) -> Devices<'_> {
        Devices {
            registry: self,
            position: 0,
        }
    }
}

impl<'a> IntoIterator for &'a Registry {
    type Item = DeviceHandle;
    type IntoIter = Devices<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Live iterator over a [`Registry`].
pub struct Devices<'a> {
    registry: &'a Registry,
    position: usize,
}

impl Iterator for Devices<'_> {
    type Item = DeviceHandle;

    fn next(&mut self) -> Option<Self::Item> {
        let device = self.registry.devices.read().get(self.position).cloned()?;
        self.position += 1;
        Some(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn id(n: u8) -> Identity {
        Identity::new([0xd0, 0x73, 0xd5, 0, 0, n])
    }

    fn ip(n: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, n))
    }

    #[test]
    fn test_callback_fires_once_per_identity() {
        let registry = Registry::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        registry.on_discovered(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        registry.register(id(1), 56700, ip(1), id(1).target());
        registry.register(id(1), 56700, ip(9), id(1).target());
        registry.register(id(2), 56700, ip(2), id(2).target());

        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(registry.get(&id(1)).unwrap().address.ip(), ip(9));
    }

    #[test]
    fn test_iteration_is_live_and_restartable() {
        let registry = Registry::new();
        registry.register(id(1), 56700, ip(1), id(1).target());

        let mut iter = registry.iter();
        assert_eq!(iter.next().unwrap().identity, id(1));
        registry.register(id(2), 56700, ip(2), id(2).target());
        assert_eq!(iter.next().unwrap().identity, id(2));
        assert!(iter.next().is_none());

        let order: Vec<_> = registry.iter().map(|d| d.identity).collect();
        assert_eq!(order, vec![id(1), id(2)]);
    }

    #[test]
    fn test_callback_can_read_registry() {
        let registry = Arc::new(Registry::new());
        let inner = Arc::clone(&registry);
        let found = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&found);
        registry.on_discovered(move |handle| {
            if inner.get(&handle.identity).is_some() {
                flag.fetch_add(1, Ordering::SeqCst);
            }
        });
        registry.register(id(3), 56700, ip(3), id(3).target());
        assert_eq!(found.load(Ordering::SeqCst), 1);
    }
}

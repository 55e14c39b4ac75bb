//! Read model owned by the [`StateStore`](crate::StateStore).

use std::net::SocketAddr;

use chrono::{DateTime, Utc};

use crate::config::DeviceClass;
use crate::protocol::{GroupId, Identity};
use crate::registry::DeviceHandle;
use crate::types::Hsbk;

/// Label of the pseudo-group holding devices that report no group.
pub const UNGROUPED_LABEL: &str = "Ungrouped";

/// Everything the store knows about one device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    pub identity: Identity,
    pub address: SocketAddr,
    pub label: String,
    /// Last time any state query succeeded.
    pub last_seen: Option<DateTime<Utc>>,
    /// Cleared only when every query of a refresh fails.
    pub online: bool,
    pub power: bool,
    /// Only meaningful for [`DeviceClass::Light`].
    pub color: Hsbk,
    pub group: Option<GroupId>,
    pub group_label: Option<String>,
    pub class: DeviceClass,
    pub product: Option<u32>,
    pub selected: bool,
}

impl DeviceState {
    pub(crate) fn new(handle: &DeviceHandle) -> Self {
        DeviceState {
            identity: handle.identity,
            address: handle.address,
            label: handle.identity.to_string(),
            last_seen: Some(Utc::now()),
            online: true,
            power: false,
            color: Hsbk::default(),
            group: None,
            group_label: None,
            class: DeviceClass::Unknown,
            product: None,
            selected: false,
        }
    }

    pub fn handle(&self) -> DeviceHandle {
        DeviceHandle {
            identity: self.identity,
            address: self.address,
            target: self.identity.target(),
        }
    }
}

/// Devices reporting the same group, in the order they joined.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub id: GroupId,
    pub label: String,
    pub members: Vec<Identity>,
    /// UI-only disclosure flag.
    pub expanded: bool,
}

/// Change notifications emitted after each atomic store update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Device(Identity),
    Group(GroupId),
    Selection,
    Scanning,
}

/// Immutable copy of the store at one version.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub version: u64,
    pub devices: Vec<DeviceState>,
    pub groups: Vec<Group>,
    /// Selected devices in registration order.
    pub selection: Vec<Identity>,
    pub scanning: bool,
}

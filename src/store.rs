//! Central device state: refresh, selection and commands.
//!
//! The [`StateStore`] is the single source of truth for every device the
//! registry has seen. Each change happens as one atomic update that bumps the
//! store [`version`](StateStore::version) once and then notifies every
//! [`subscriber`](StateStore::subscribe) with what changed.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::channel::mpsc;
use futures::future::join_all;
use log::debug;
use parking_lot::Mutex;

use crate::commands;
use crate::config::StoreConfig;
use crate::errors::Error;
use crate::protocol::{GroupId, Identity, Message};
use crate::registry::{DeviceHandle, Registry};
use crate::runtime;
use crate::state::{DeviceState, Group, Snapshot, StoreEvent, UNGROUPED_LABEL};
use crate::transport::Client;
use crate::types::Hsbk;

type Result<T> = std::result::Result<T, Error>;

/// Stream of change notifications returned by [`StateStore::subscribe`].
pub type Subscription = mpsc::UnboundedReceiver<StoreEvent>;

/// Observable state of every known device.
///
/// Built on top of a [`Client`] and a [`Registry`]. The store attaches itself
/// to the registry, so every discovered device shows up here (and is queried,
/// if [`refresh_on_discovery`](StoreConfig::refresh_on_discovery) is set).
///
/// Commands are optimistic: the cached state changes first, then unicast
/// commands go out to every targeted device concurrently. Command failures
/// are logged and otherwise ignored.
pub struct StateStore {
    client: Arc<dyn Client>,
    registry: Arc<Registry>,
    config: StoreConfig,
    state: Mutex<StoreState>,
    refreshing: Mutex<HashSet<Identity>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<StoreEvent>>>,
}

#[derive(Default)]
struct StoreState {
    /// Registration order.
    devices: Vec<DeviceState>,
    /// Never holds an empty group.
    groups: Vec<Group>,
    ungrouped_expanded: bool,
    scans: usize,
    version: u64,
}

impl StoreState {
    fn device(&self, identity: &Identity) -> Option<&DeviceState> {
        self.devices.iter().find(|d| d.identity == *identity)
    }

    fn device_mut(&mut self, identity: &Identity) -> Option<&mut DeviceState> {
        self.devices.iter_mut().find(|d| d.identity == *identity)
    }

    fn is_light(&self, identity: &Identity) -> bool {
        self.device(identity).is_some_and(|d| d.class.is_light())
    }

    fn members(&self, id: &GroupId) -> Vec<Identity> {
        if id.is_ungrouped() {
            return self
                .devices
                .iter()
                .filter(|d| d.group.is_none())
                .map(|d| d.identity)
                .collect();
        }
        self.groups
            .iter()
            .find(|g| g.id == *id)
            .map(|g| g.members.clone())
            .unwrap_or_default()
    }

    fn ungrouped(&self) -> Group {
        Group {
            id: GroupId::UNGROUPED,
            label: UNGROUPED_LABEL.to_string(),
            members: self.members(&GroupId::UNGROUPED),
            expanded: self.ungrouped_expanded,
        }
    }

    fn selection(&self) -> Vec<Identity> {
        self.devices
            .iter()
            .filter(|d| d.selected)
            .map(|d| d.identity)
            .collect()
    }

    /// Move `identity` into group `id`, dropping groups left empty.
    fn join_group(&mut self, identity: Identity, id: GroupId, label: String, events: &mut Events) {
        for group in self.groups.iter_mut().filter(|g| g.id != id) {
            if let Some(position) = group.members.iter().position(|m| *m == identity) {
                group.members.remove(position);
                events.push(StoreEvent::Group(group.id));
            }
        }
        self.groups.retain(|g| !g.members.is_empty());

        if id.is_ungrouped() {
            return;
        }
        match self.groups.iter_mut().find(|g| g.id == id) {
            Some(group) => {
                if group.label != label {
                    group.label = label;
                    events.push(StoreEvent::Group(id));
                }
                if !group.members.contains(&identity) {
                    group.members.push(identity);
                    events.push(StoreEvent::Group(id));
                }
            }
            None => {
                self.groups.push(Group {
                    id,
                    label,
                    members: vec![identity],
                    expanded: false,
                });
                events.push(StoreEvent::Group(id));
            }
        }
    }
}

/// Events collected during one update, without duplicates.
#[derive(Default)]
struct Events(Vec<StoreEvent>);

impl Events {
    fn push(&mut self, event: StoreEvent) {
        if !self.0.contains(&event) {
            self.0.push(event);
        }
    }

    fn select(&mut self, device: &mut DeviceState, selected: bool) {
        if device.selected != selected {
            device.selected = selected;
            self.push(StoreEvent::Device(device.identity));
            self.push(StoreEvent::Selection);
        }
    }
}

/// Outcome of one state query round; `None` marks a failed query.
#[derive(Default)]
struct Report {
    color: Option<(Hsbk, bool)>,
    label: Option<String>,
    group: Option<(GroupId, String)>,
    product: Option<u32>,
}

impl Report {
    fn is_empty(&self) -> bool {
        self.color.is_none() && self.label.is_none() && self.group.is_none() && self.product.is_none()
    }
}

fn unexpected(expected: &'static str, got: &Message) -> Error {
    Error::UnexpectedReply {
        expected,
        got: got.name(),
    }
}

fn color_reply(reply: Result<Message>) -> Result<(Hsbk, bool)> {
    match reply? {
        Message::StateColor { color, power, .. } => Ok((color, power)),
        other => Err(unexpected("stateColor", &other)),
    }
}

fn label_reply(reply: Result<Message>) -> Result<String> {
    match reply? {
        Message::StateLabel { label } => Ok(label),
        other => Err(unexpected("stateLabel", &other)),
    }
}

fn group_reply(reply: Result<Message>) -> Result<(GroupId, String)> {
    match reply? {
        Message::StateGroup { group, label } => Ok((group, label)),
        other => Err(unexpected("stateGroup", &other)),
    }
}

fn version_reply(reply: Result<Message>) -> Result<u32> {
    match reply? {
        Message::StateVersion { product, .. } => Ok(product),
        other => Err(unexpected("stateVersion", &other)),
    }
}

fn keep<T>(identity: &Identity, result: Result<T>) -> Option<T> {
    result
        .map_err(|e| debug!("Query of {} failed: {}", identity, e))
        .ok()
}

impl StateStore {
    /// Create a store fed by `registry` and talking through `client`.
    ///
    /// Devices already in the registry are adopted immediately.
    pub fn new(client: Arc<dyn Client>, registry: Arc<Registry>, config: StoreConfig) -> Arc<Self> {
        let store = Arc::new(StateStore {
            client,
            registry: Arc::clone(&registry),
            config,
            state: Mutex::new(StoreState::default()),
            refreshing: Mutex::new(HashSet::new()),
            subscribers: Mutex::new(Vec::new()),
        });

        let weak = Arc::downgrade(&store);
        registry.on_discovered(move |handle| {
            if let Some(store) = weak.upgrade() {
                store.adopt(handle);
            }
        });
        for handle in registry.iter() {
            store.adopt(&handle);
        }
        store
    }

    fn adopt(self: &Arc<Self>, handle: &DeviceHandle) {
        self.register_device(handle);
        if self.config.refresh_on_discovery {
            let store = Arc::clone(self);
            let identity = handle.identity;
            runtime::spawn(async move { store.query_device_state(&identity).await }).detach();
        }
    }

    /// Subscribe to change notifications.
    ///
    /// Every atomic update delivers its events to each live subscription.
    /// Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Incremented once per update that changed anything.
    pub fn version(&self) -> u64 {
        self.state.lock().version
    }

    pub fn snapshot(&self) -> Snapshot {
        let state = self.state.lock();
        Snapshot {
            version: state.version,
            devices: state.devices.clone(),
            groups: state.groups.clone(),
            selection: state.selection(),
            scanning: state.scans > 0,
        }
    }

    pub fn device(&self, identity: &Identity) -> Option<DeviceState> {
        self.state.lock().device(identity).cloned()
    }

    /// Every known device in registration order.
    pub fn devices(&self) -> Vec<DeviceState> {
        self.state.lock().devices.clone()
    }

    /// Selected devices in registration order.
    pub fn selection(&self) -> Vec<Identity> {
        self.state.lock().selection()
    }

    /// Handles of every selected, online device that takes colors.
    ///
    /// This is the device list to hand to a [`Scheduler`](crate::dj::Scheduler);
    /// switches are left out like in [`set_color`](Self::set_color).
    pub fn color_targets(&self) -> Vec<DeviceHandle> {
        self.state
            .lock()
            .devices
            .iter()
            .filter(|d| d.selected && d.online && !d.class.is_switch())
            .map(DeviceState::handle)
            .collect()
    }

    /// Whether a [`refresh_all`](Self::refresh_all) is running.
    pub fn is_scanning(&self) -> bool {
        self.state.lock().scans > 0
    }

    /// A reported group, or the ungrouped pseudo-group for [`GroupId::UNGROUPED`].
    pub fn group(&self, id: &GroupId) -> Option<Group> {
        let state = self.state.lock();
        if id.is_ungrouped() {
            return Some(state.ungrouped());
        }
        state.groups.iter().find(|g| g.id == *id).cloned()
    }

    /// Groups containing at least one light, sorted by label.
    ///
    /// Lights reporting no group are collected in a trailing pseudo-group
    /// labelled [`UNGROUPED_LABEL`].
    pub fn sorted_groups(&self) -> Vec<Group> {
        let state = self.state.lock();
        let mut groups: Vec<Group> = state
            .groups
            .iter()
            .filter(|g| g.members.iter().any(|m| state.is_light(m)))
            .cloned()
            .collect();
        groups.sort_by_cached_key(|g| g.label.to_lowercase());

        let ungrouped = state.ungrouped();
        if ungrouped.members.iter().any(|m| state.is_light(m)) {
            groups.push(ungrouped);
        }
        groups
    }

    /// Lights in group `id`, sorted by label.
    pub fn group_devices(&self, id: &GroupId) -> Vec<DeviceState> {
        let state = self.state.lock();
        let mut devices: Vec<DeviceState> = state
            .members(id)
            .iter()
            .filter_map(|m| state.device(m))
            .filter(|d| d.class.is_light())
            .cloned()
            .collect();
        devices.sort_by_cached_key(|d| d.label.to_lowercase());
        devices
    }

    /// Add a device or refresh its address. Unlike registry discovery this
    /// never queries the device.
    pub fn register_device(&self, handle: &DeviceHandle) {
        self.update(|state, events| match state.device_mut(&handle.identity) {
            Some(device) => {
                if device.address != handle.address {
                    device.address = handle.address;
                    events.push(StoreEvent::Device(handle.identity));
                }
            }
            None => {
                state.devices.push(DeviceState::new(handle));
                events.push(StoreEvent::Device(handle.identity));
            }
        })
    }

    /// Query color, label, group and version of one device concurrently and
    /// apply whatever came back as a single update.
    ///
    /// Does nothing for unknown devices or while another query of the same
    /// device is still running. A device is only marked offline when all
    /// four queries fail.
    pub async fn query_device_state(&self, identity: &Identity) {
        let Some(known) = self.state.lock().device(identity).map(DeviceState::handle) else {
            debug!("Not querying unknown device {}", identity);
            return;
        };
        let Some(_refresh) = self.begin_refresh(identity) else {
            debug!("Query of {} already in flight", identity);
            return;
        };
        let handle = self.registry.get(identity).unwrap_or(known);

        let (color, label, group, version) = futures::join!(
            self.client.request(&handle, Message::GetColor),
            self.client.request(&handle, Message::GetLabel),
            self.client.request(&handle, Message::GetGroup),
            self.client.request(&handle, Message::GetVersion),
        );
        let report = Report {
            color: keep(identity, color_reply(color)),
            label: keep(identity, label_reply(label)),
            group: keep(identity, group_reply(group)),
            product: keep(identity, version_reply(version)),
        };
        self.apply(&handle, report);
    }

    fn begin_refresh(&self, identity: &Identity) -> Option<Refresh<'_>> {
        if !self.refreshing.lock().insert(*identity) {
            return None;
        }
        Some(Refresh {
            store: self,
            identity: *identity,
        })
    }

    fn apply(&self, handle: &DeviceHandle, report: Report) {
        let catalog = &self.config.catalog;
        self.update(|state, events| {
            let Some(device) = state.device_mut(&handle.identity) else {
                return;
            };
            if report.is_empty() {
                debug!("Device {} is offline", handle.identity);
                if device.online {
                    device.online = false;
                    events.push(StoreEvent::Device(handle.identity));
                }
                return;
            }

            device.online = true;
            device.last_seen = Some(Utc::now());
            device.address = handle.address;
            if let Some(product) = report.product {
                device.product = Some(product);
                device.class = catalog.classify(product);
            }
            if let Some((color, power)) = report.color {
                if !device.class.is_switch() {
                    device.color = color;
                    device.power = power;
                }
            }
            if let Some(label) = report.label {
                device.label = label;
            }
            let group = report.group.map(|(id, label)| {
                if id.is_ungrouped() {
                    device.group = None;
                    device.group_label = None;
                } else {
                    device.group = Some(id);
                    device.group_label = Some(label.clone());
                }
                (id, label)
            });
            events.push(StoreEvent::Device(handle.identity));

            if let Some((id, label)) = group {
                state.join_group(handle.identity, id, label, events);
            }
        });
    }

    /// Re-query every known device one after another.
    ///
    /// [`is_scanning`](Self::is_scanning) holds while any refresh runs.
    pub async fn refresh_all(&self) {
        let identities: Vec<Identity> = self.update(|state, events| {
            state.scans += 1;
            if state.scans == 1 {
                events.push(StoreEvent::Scanning);
            }
            state.devices.iter().map(|d| d.identity).collect()
        });
        let _scan = Scan { store: self };
        for identity in identities {
            self.query_device_state(&identity).await;
        }
    }

    pub fn toggle_select(&self, identity: &Identity) {
        self.update(|state, events| {
            if let Some(device) = state.device_mut(identity) {
                let selected = !device.selected;
                events.select(device, selected);
            }
        })
    }

    /// Select exactly one device.
    pub fn select_only(&self, identity: &Identity) {
        self.update(|state, events| {
            for device in state.devices.iter_mut() {
                let selected = device.identity == *identity;
                events.select(device, selected);
            }
        })
    }

    /// Select every online device and deselect the rest.
    pub fn select_all(&self) {
        self.update(|state, events| {
            for device in state.devices.iter_mut() {
                let selected = device.online;
                events.select(device, selected);
            }
        })
    }

    pub fn select_none(&self) {
        self.update(|state, events| {
            for device in state.devices.iter_mut() {
                events.select(device, false);
            }
        })
    }

    /// Deselect group `id` if all of its members are selected, otherwise
    /// select all of its online members.
    pub fn select_group(&self, id: &GroupId) {
        self.update(|state, events| {
            let members = state.members(id);
            if members.is_empty() {
                return;
            }
            let all_selected = members
                .iter()
                .all(|m| state.device(m).is_some_and(|d| d.selected));
            for device in state.devices.iter_mut() {
                if !members.contains(&device.identity) {
                    continue;
                }
                if all_selected {
                    events.select(device, false);
                } else if device.online {
                    events.select(device, true);
                }
            }
        })
    }

    /// Flip the disclosure flag of a group.
    pub fn toggle_group(&self, id: &GroupId) {
        self.update(|state, events| {
            if id.is_ungrouped() {
                state.ungrouped_expanded = !state.ungrouped_expanded;
                events.push(StoreEvent::Group(*id));
            } else if let Some(group) = state.groups.iter_mut().find(|g| g.id == *id) {
                group.expanded = !group.expanded;
                events.push(StoreEvent::Group(*id));
            }
        })
    }

    /// Paint every selected, online light.
    ///
    /// Falls back to [`color_duration`](StoreConfig::color_duration) when no
    /// duration is given. Switches are never color addressed.
    pub async fn set_color(&self, color: Hsbk, duration: Option<Duration>) {
        let targets = self.update(|state, events| {
            let mut targets = Vec::new();
            for device in state
                .devices
                .iter_mut()
                .filter(|d| d.selected && d.online && !d.class.is_switch())
            {
                if device.color != color {
                    device.color = color;
                    events.push(StoreEvent::Device(device.identity));
                }
                targets.push(device.handle());
            }
            targets
        });
        let duration = duration.unwrap_or(self.config.color_duration);
        self.dispatch(&targets, commands::set_color(&color, duration))
            .await;
    }

    /// Switch every selected, online device on or off.
    pub async fn set_power(&self, on: bool, duration: Option<Duration>) {
        let targets = self.update(|state, events| {
            let mut targets = Vec::new();
            for device in state.devices.iter_mut().filter(|d| d.selected && d.online) {
                if device.power != on {
                    device.power = on;
                    events.push(StoreEvent::Device(device.identity));
                }
                targets.push(device.handle());
            }
            targets
        });
        let duration = duration.unwrap_or(self.config.power_duration);
        self.dispatch(&targets, commands::set_power(on, duration))
            .await;
    }

    /// Turn the selection off if any selected online device is on, otherwise on.
    ///
    /// Offline devices are ignored: their cached power is stale and they
    /// would not receive the command anyway.
    pub async fn toggle_power(&self) {
        let any_on = self
            .state
            .lock()
            .devices
            .iter()
            .any(|d| d.selected && d.online && d.power);
        self.set_power(!any_on, None).await;
    }

    async fn dispatch(&self, targets: &[DeviceHandle], message: Message) {
        if targets.is_empty() {
            return;
        }
        let sends = targets
            .iter()
            .map(|device| self.client.send(device, message.clone()));
        for (device, result) in targets.iter().zip(join_all(sends).await) {
            if let Err(e) = result {
                debug!("{} to {} failed: {}", message.name(), device.identity, e);
            }
        }
    }

    /// Run `f` under the state lock, then notify subscribers of what changed.
    fn update<R>(&self, f: impl FnOnce(&mut StoreState, &mut Events) -> R) -> R {
        let mut events = Events::default();
        let result = {
            let mut state = self.state.lock();
            let result = f(&mut state, &mut events);
            if !events.0.is_empty() {
                state.version += 1;
            }
            result
        };
        if !events.0.is_empty() {
            self.subscribers
                .lock()
                .retain(|tx| events.0.iter().all(|e| tx.unbounded_send(e.clone()).is_ok()));
        }
        result
    }
}

/// Marks a device query as in flight until dropped.
struct Refresh<'a> {
    store: &'a StateStore,
    identity: Identity,
}

impl Drop for Refresh<'_> {
    fn drop(&mut self) {
        self.store.refreshing.lock().remove(&self.identity);
    }
}

/// Holds the scanning flag until dropped.
struct Scan<'a> {
    store: &'a StateStore,
}

impl Drop for Scan<'_> {
    fn drop(&mut self) {
        self.store.update(|state, events| {
            state.scans -= 1;
            if state.scans == 0 {
                events.push(StoreEvent::Scanning);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockClient, handle, identity};
    use std::net::{IpAddr, Ipv4Addr};
    use uuid::Uuid;

    fn quiet() -> StoreConfig {
        StoreConfig {
            refresh_on_discovery: false,
            ..StoreConfig::default()
        }
    }

    fn store_with(client: &Arc<MockClient>, devices: u8) -> Arc<StateStore> {
        let store = StateStore::new(client.clone(), Arc::new(Registry::new()), quiet());
        for n in 1..=devices {
            store.register_device(&handle(n));
        }
        store
    }

    fn group(label: &str) -> (GroupId, String) {
        (GroupId::new(Uuid::new_v4()), label.to_string())
    }

    fn answer(client: &MockClient, n: u8, label: &str, group: &(GroupId, String), product: u32) {
        let id = identity(n);
        client.reply_for(
            id,
            "getColor",
            Message::StateColor {
                color: Hsbk::new(0, 0, 32768, 3500),
                power: false,
                label: label.into(),
            },
        );
        client.reply_for(id, "getLabel", Message::StateLabel { label: label.into() });
        client.reply_for(
            id,
            "getGroup",
            Message::StateGroup {
                group: group.0,
                label: group.1.clone(),
            },
        );
        client.reply_for(id, "getVersion", Message::StateVersion { vendor: 1, product });
    }

    fn powered(client: &MockClient, n: u8, power: bool) {
        client.reply_for(
            identity(n),
            "getColor",
            Message::StateColor {
                color: Hsbk::default(),
                power,
                label: String::new(),
            },
        );
    }

    #[tokio::test]
    async fn test_discover_refresh_select_group_and_paint() {
        let client = Arc::new(MockClient::new());
        let living = group("Living Room");
        answer(&client, 1, "Lamp", &living, 27);

        let registry = Arc::new(Registry::new());
        let store = StateStore::new(client.clone(), Arc::clone(&registry), quiet());
        registry.register(
            identity(1),
            56700,
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            identity(1).target(),
        );
        assert_eq!(store.devices().len(), 1);

        store.query_device_state(&identity(1)).await;
        let groups = store.sorted_groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].label, "Living Room");
        assert_eq!(store.device(&identity(1)).unwrap().label, "Lamp");

        store.select_group(&groups[0].id);
        assert_eq!(store.selection(), vec![identity(1)]);

        let blue = Hsbk::new(43690, 65535, 65535, 3500);
        store.set_color(blue, None).await;
        assert_eq!(store.device(&identity(1)).unwrap().color, blue);
        assert_eq!(
            client.sent(),
            vec![(
                identity(1),
                Message::SetColor {
                    color: blue,
                    duration: 250
                }
            )]
        );
    }

    #[tokio::test]
    async fn test_concurrent_queries_are_deduplicated() {
        let client = Arc::new(MockClient::with_latency(Duration::from_millis(20)));
        answer(&client, 1, "Lamp", &group("Den"), 27);
        let store = store_with(&client, 1);

        let id = identity(1);
        futures::join!(
            store.query_device_state(&id),
            store.query_device_state(&id),
            store.query_device_state(&id),
        );
        assert_eq!(client.request_count("getColor"), 1);

        store.query_device_state(&id).await;
        assert_eq!(client.request_count("getColor"), 2);
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_device_online() {
        let client = Arc::new(MockClient::new());
        let den = group("Den");
        answer(&client, 1, "Lamp", &den, 27);
        client.forget("getLabel");
        let store = store_with(&client, 1);

        store.query_device_state(&identity(1)).await;
        let device = store.device(&identity(1)).unwrap();
        assert!(device.online);
        assert_eq!(device.label, identity(1).to_string());
        assert_eq!(device.color, Hsbk::new(0, 0, 32768, 3500));
        assert_eq!(device.group, Some(den.0));
        assert!(device.class.is_light());
    }

    #[tokio::test]
    async fn test_total_failure_marks_offline() {
        let client = Arc::new(MockClient::new());
        let store = store_with(&client, 1);
        let before = store.device(&identity(1)).unwrap();

        store.query_device_state(&identity(1)).await;
        let after = store.device(&identity(1)).unwrap();
        assert!(!after.online);
        assert_eq!(after.last_seen, before.last_seen);

        store.select_all();
        assert!(store.selection().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_device_is_ignored() {
        let client = Arc::new(MockClient::new());
        let store = store_with(&client, 1);
        store.query_device_state(&identity(9)).await;
        assert_eq!(client.request_count("getColor"), 0);
    }

    #[tokio::test]
    async fn test_switch_is_never_painted() {
        let client = Arc::new(MockClient::new());
        let hall = group("Hall");
        answer(&client, 1, "Switch", &hall, 70);
        answer(&client, 2, "Bulb", &group("Den"), 27);
        let store = store_with(&client, 2);
        store.refresh_all().await;

        let switch = store.device(&identity(1)).unwrap();
        assert!(switch.class.is_switch());
        assert_eq!(switch.color, Hsbk::default());
        assert!(store.sorted_groups().iter().all(|g| g.id != hall.0));

        store.select_all();
        store.set_color(Hsbk::new(1, 2, 3, 3500), None).await;
        let painted: Vec<_> = client.sent().into_iter().map(|(id, _)| id).collect();
        assert_eq!(painted, vec![identity(2)]);

        client.clear_sent();
        store.set_power(false, None).await;
        assert_eq!(client.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_select_group_toggles() {
        let client = Arc::new(MockClient::new());
        let den = group("Den");
        answer(&client, 1, "A", &den, 27);
        answer(&client, 2, "B", &den, 27);
        let store = store_with(&client, 3);
        store.refresh_all().await;

        store.select_group(&den.0);
        assert_eq!(store.selection(), vec![identity(1), identity(2)]);
        store.select_group(&den.0);
        assert!(store.selection().is_empty());

        // One member already selected: the group is completed, not cleared.
        store.toggle_select(&identity(2));
        store.select_group(&den.0);
        assert_eq!(store.selection(), vec![identity(1), identity(2)]);
    }

    #[tokio::test]
    async fn test_select_group_skips_offline_members() {
        let client = Arc::new(MockClient::new());
        let den = group("Den");
        answer(&client, 1, "A", &den, 27);
        answer(&client, 2, "B", &den, 27);
        let store = store_with(&client, 2);
        store.refresh_all().await;

        for request in ["getColor", "getLabel", "getGroup", "getVersion"] {
            client.forget(request);
        }
        store.query_device_state(&identity(2)).await;
        assert!(!store.device(&identity(2)).unwrap().online);

        store.select_group(&den.0);
        assert_eq!(store.selection(), vec![identity(1)]);
    }

    #[tokio::test]
    async fn test_ungrouped_pseudo_group() {
        let client = Arc::new(MockClient::new());
        answer(&client, 1, "Lonely", &(GroupId::UNGROUPED, String::new()), 27);
        answer(&client, 2, "b lamp", &group("bedroom"), 27);
        answer(&client, 3, "a lamp", &group("Attic"), 27);
        let store = store_with(&client, 3);
        store.refresh_all().await;

        let labels: Vec<_> = store.sorted_groups().into_iter().map(|g| g.label).collect();
        assert_eq!(labels, vec!["Attic", "bedroom", UNGROUPED_LABEL]);

        store.select_group(&GroupId::UNGROUPED);
        assert_eq!(store.selection(), vec![identity(1)]);

        store.toggle_group(&GroupId::UNGROUPED);
        assert!(store.group(&GroupId::UNGROUPED).unwrap().expanded);
    }

    #[tokio::test]
    async fn test_moving_group_prunes_empty_group() {
        let client = Arc::new(MockClient::new());
        let (old, new) = (group("Old"), group("New"));
        answer(&client, 1, "Lamp", &old, 27);
        let store = store_with(&client, 1);
        store.query_device_state(&identity(1)).await;
        assert!(store.group(&old.0).is_some());

        answer(&client, 1, "Lamp", &new, 27);
        store.query_device_state(&identity(1)).await;
        assert!(store.group(&old.0).is_none());
        assert_eq!(store.group(&new.0).unwrap().members, vec![identity(1)]);
        assert_eq!(store.snapshot().groups.len(), 1);
    }

    #[tokio::test]
    async fn test_group_devices_sorted_by_label() {
        let client = Arc::new(MockClient::new());
        let den = group("Den");
        answer(&client, 1, "zeta", &den, 27);
        answer(&client, 2, "Alpha", &den, 27);
        let store = store_with(&client, 2);
        store.refresh_all().await;

        let labels: Vec<_> = store
            .group_devices(&den.0)
            .into_iter()
            .map(|d| d.label)
            .collect();
        assert_eq!(labels, vec!["Alpha", "zeta"]);
    }

    #[tokio::test]
    async fn test_toggle_power() {
        let client = Arc::new(MockClient::new());
        powered(&client, 1, true);
        powered(&client, 2, false);
        let store = store_with(&client, 2);
        store.refresh_all().await;
        store.select_all();

        store.toggle_power().await;
        assert!(store.devices().iter().all(|d| !d.power));
        assert!(
            client
                .sent()
                .iter()
                .all(|(_, m)| *m == Message::SetPower { on: false, duration: 0 })
        );

        client.clear_sent();
        store.toggle_power().await;
        assert!(store.devices().iter().all(|d| d.power));
        assert_eq!(client.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_toggle_power_ignores_offline_devices() {
        let client = Arc::new(MockClient::new());
        powered(&client, 1, true);
        powered(&client, 2, false);
        let store = store_with(&client, 2);
        store.refresh_all().await;

        for request in ["getColor", "getLabel", "getGroup", "getVersion"] {
            client.forget(request);
        }
        store.query_device_state(&identity(1)).await;
        let stale = store.device(&identity(1)).unwrap();
        assert!(!stale.online);
        assert!(stale.power);

        store.toggle_select(&identity(1));
        store.toggle_select(&identity(2));
        store.toggle_power().await;
        assert_eq!(
            client.sent(),
            vec![(identity(2), Message::SetPower { on: true, duration: 0 })]
        );
    }

    #[tokio::test]
    async fn test_color_targets_skip_switches() {
        let client = Arc::new(MockClient::new());
        answer(&client, 1, "Switch", &group("Hall"), 70);
        answer(&client, 2, "Bulb", &group("Hall"), 27);
        let store = store_with(&client, 2);
        store.refresh_all().await;
        store.select_all();
        assert_eq!(store.selection(), vec![identity(1), identity(2)]);

        let targets: Vec<_> = store.color_targets().into_iter().map(|h| h.identity).collect();
        assert_eq!(targets, vec![identity(2)]);

        let dj = crate::dj::Scheduler::new(client.clone());
        dj.start(
            store.color_targets(),
            Some(crate::dj::DjConfigUpdate::bpm(300)),
        );
        crate::runtime::sleep(Duration::from_millis(500)).await;
        dj.stop();
        assert!(dj.beat() >= 1);
        let sent = client.sent();
        assert!(!sent.is_empty());
        assert!(sent.iter().all(|(id, _)| *id != identity(1)));
    }

    #[tokio::test]
    async fn test_command_failures_are_swallowed() {
        let client = Arc::new(MockClient::new());
        client.unreachable(identity(1));
        let store = store_with(&client, 2);
        store.select_all();

        let red = Hsbk::new(0, 65535, 65535, 3500);
        store.set_color(red, Some(Duration::ZERO)).await;
        assert!(store.devices().iter().all(|d| d.color == red));
        assert_eq!(
            client.sent(),
            vec![(identity(2), Message::SetColor { color: red, duration: 0 })]
        );
    }

    #[tokio::test]
    async fn test_empty_selection_sends_nothing() {
        let client = Arc::new(MockClient::new());
        let store = store_with(&client, 2);
        store.set_color(Hsbk::default(), None).await;
        store.toggle_power().await;
        assert!(client.sent().is_empty());
    }

    #[test]
    fn test_selection_follows_registration_order() {
        let client = Arc::new(MockClient::new());
        let store = store_with(&client, 3);
        store.toggle_select(&identity(3));
        store.toggle_select(&identity(1));
        assert_eq!(store.selection(), vec![identity(1), identity(3)]);

        store.select_only(&identity(2));
        assert_eq!(store.selection(), vec![identity(2)]);
        store.select_none();
        assert!(store.selection().is_empty());
    }

    #[test]
    fn test_updates_notify_subscribers_once_per_version() {
        let client = Arc::new(MockClient::new());
        let store = store_with(&client, 2);
        let mut events = store.subscribe();
        let version = store.version();

        store.select_all();
        assert_eq!(store.version(), version + 1);
        let mut seen = Vec::new();
        while let Ok(Some(event)) = events.try_next() {
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                StoreEvent::Device(identity(1)),
                StoreEvent::Selection,
                StoreEvent::Device(identity(2)),
            ]
        );

        // No change, no version bump.
        store.select_all();
        assert_eq!(store.version(), version + 1);

        drop(events);
        store.select_none();
        assert!(store.subscribers.lock().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_all_reports_scanning() {
        let client = Arc::new(MockClient::new());
        client.reply("getVersion", Message::StateVersion { vendor: 1, product: 27 });
        let store = store_with(&client, 3);
        let mut events = store.subscribe();

        store.refresh_all().await;
        assert!(!store.is_scanning());
        assert_eq!(client.request_count("getVersion"), 3);
        assert!(store.devices().iter().all(|d| d.online && d.class.is_light()));

        let mut scanning = 0;
        while let Ok(Some(event)) = events.try_next() {
            if event == StoreEvent::Scanning {
                scanning += 1;
            }
        }
        assert_eq!(scanning, 2);
    }
}

//! In-memory [`Client`] for unit tests.

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use parking_lot::Mutex;

use crate::errors::Error;
use crate::protocol::{Identity, Message, PORT};
use crate::registry::DeviceHandle;
use crate::runtime::{self, BoxFuture};
use crate::transport::Client;

type Result<T> = std::result::Result<T, Error>;

pub(crate) fn identity(n: u8) -> Identity {
    Identity::new([0xd0, 0x73, 0xd5, 0x00, 0x00, n])
}

pub(crate) fn handle(n: u8) -> DeviceHandle {
    DeviceHandle {
        identity: identity(n),
        address: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, n)), PORT),
        target: identity(n).target(),
    }
}

/// Scripted replies keyed by request name, optionally per device.
#[derive(Default)]
pub(crate) struct MockClient {
    replies: Mutex<HashMap<(Option<Identity>, &'static str), Message>>,
    latency: Duration,
    requests: Mutex<Vec<(Identity, &'static str)>>,
    sent: Mutex<Vec<(Identity, Message)>>,
    unreachable: Mutex<HashSet<Identity>>,
}

impl MockClient {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_latency(latency: Duration) -> Self {
        MockClient {
            latency,
            ..Self::default()
        }
    }

    /// Answer `request` from any device with `message`.
    pub(crate) fn reply(&self, request: &'static str, message: Message) {
        self.replies.lock().insert((None, request), message);
    }

    pub(crate) fn reply_for(&self, device: Identity, request: &'static str, message: Message) {
        self.replies.lock().insert((Some(device), request), message);
    }

    pub(crate) fn forget(&self, request: &'static str) {
        self.replies.lock().retain(|(_, name), _| *name != request);
    }

    /// Make every send to `device` fail.
    pub(crate) fn unreachable(&self, device: Identity) {
        self.unreachable.lock().insert(device);
    }

    pub(crate) fn request_count(&self, request: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|(_, name)| *name == request)
            .count()
    }

    pub(crate) fn sent(&self) -> Vec<(Identity, Message)> {
        self.sent.lock().clone()
    }

    pub(crate) fn clear_sent(&self) {
        self.sent.lock().clear();
    }
}

impl Client for MockClient {
    /// Sends are logged once they complete, after the configured latency.
    fn send<'a>(&'a self, device: &'a DeviceHandle, message: Message) -> BoxFuture<'a, Result<()>> {
        let reachable = !self.unreachable.lock().contains(&device.identity);
        let latency = self.latency;
        Box::pin(async move {
            if !latency.is_zero() {
                runtime::sleep(latency).await;
            }
            if reachable {
                self.sent.lock().push((device.identity, message));
                Ok(())
            } else {
                Err(Error::socket(
                    "send_to",
                    std::io::Error::new(std::io::ErrorKind::HostUnreachable, "unreachable"),
                ))
            }
        })
    }

    fn request<'a>(
        &'a self,
        device: &'a DeviceHandle,
        message: Message,
    ) -> BoxFuture<'a, Result<Message>> {
        let name = message.name();
        self.requests.lock().push((device.identity, name));
        let reply = {
            let replies = self.replies.lock();
            replies
                .get(&(Some(device.identity), name))
                .or_else(|| replies.get(&(None, name)))
                .cloned()
        };
        let latency = self.latency;
        Box::pin(async move {
            if !latency.is_zero() {
                runtime::sleep(latency).await;
            }
            reply.ok_or_else(|| Error::timeout(&device.identity, name))
        })
    }
}

//! UDP transport: discovery broadcasts, unicast commands and reply routing.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use futures::channel::oneshot;
use futures::future::{AbortHandle, abortable};
use log::{debug, warn};
use parking_lot::{Mutex, RwLock};

use crate::config::TransportConfig;
use crate::errors::Error;
use crate::protocol::{self, Frame, Identity, Message, SERVICE_UDP};
use crate::registry::{DeviceHandle, Registry};
use crate::runtime::{self, AsyncUdpSocket, BoxFuture, UdpSocket};

type Result<T> = std::result::Result<T, Error>;

/// Sends messages to devices on behalf of the store and the scheduler.
pub trait Client: Send + Sync {
    /// Fire-and-forget unicast to `device`.
    fn send<'a>(&'a self, device: &'a DeviceHandle, message: Message) -> BoxFuture<'a, Result<()>>;

    /// Unicast to `device` and wait for its reply.
    fn request<'a>(
        &'a self,
        device: &'a DeviceHandle,
        message: Message,
    ) -> BoxFuture<'a, Result<Message>>;
}

/// An open UDP endpoint shared by every component that talks to devices.
///
/// Opening the transport binds the socket and starts two background loops:
/// one broadcasting discovery requests every
/// [`discovery_interval`](TransportConfig::discovery_interval), and one
/// decoding inbound datagrams. Every reply that carries a device identity is
/// registered with the [`Registry`] and handed to whichever request is waiting
/// for it.
///
/// Clones share the same socket.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

struct Inner {
    config: TransportConfig,
    registry: Arc<Registry>,
    local_addr: SocketAddr,
    socket: RwLock<Option<Arc<UdpSocket>>>,
    in_flight: AtomicUsize,
    closing: AtomicBool,
    sequence: AtomicU8,
    waiters: Mutex<HashMap<(Identity, u8), Waiter>>,
    loops: Mutex<Vec<AbortHandle>>,
}

impl Transport {
    /// Bind the socket and start discovery.
    ///
    /// Failing to bind or to enable broadcast is the only fatal transport error.
    pub async fn open(config: TransportConfig, registry: Arc<Registry>) -> Result<Self> {
        let socket = UdpSocket::bind(config.bind)
            .await
            .map_err(|e| Error::socket("bind", e))?;
        socket
            .set_broadcast(true)
            .map_err(|e| Error::socket("set_broadcast", e))?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| Error::socket("local_addr", e))?;
        let socket = Arc::new(socket);

        let inner = Arc::new(Inner {
            config,
            registry,
            local_addr,
            socket: RwLock::new(Some(Arc::clone(&socket))),
            in_flight: AtomicUsize::new(0),
            closing: AtomicBool::new(false),
            sequence: AtomicU8::new(0),
            waiters: Mutex::new(HashMap::new()),
            loops: Mutex::new(Vec::new()),
        });

        let (receive, receive_handle) = abortable(receive_loop(socket, Arc::downgrade(&inner)));
        let (discover, discover_handle) = abortable(discovery_loop(Arc::downgrade(&inner)));
        inner.loops.lock().extend([receive_handle, discover_handle]);
        runtime::spawn(receive).detach();
        runtime::spawn(discover).detach();

        debug!("Transport listening on {}", local_addr);
        Ok(Transport { inner })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    /// Number of sends currently waiting on the socket.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.socket.read().is_none()
    }

    /// Send a frame to `address`.
    pub async fn send_frame(&self, frame: &Frame, address: SocketAddr) -> Result<()> {
        self.inner.send_to(frame, address).await
    }

    /// Broadcast a discovery request now, outside the periodic schedule.
    pub async fn discover(&self) -> Result<()> {
        self.inner.broadcast(Message::GetService).await
    }

    /// Stop the transport.
    ///
    /// New sends fail with [`Error::Closed`] from this point on. The socket is
    /// released right away if nothing is in flight, otherwise as soon as the
    /// last pending send completes. Calling this again has no effect.
    pub fn close(&self) {
        if self.inner.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        let pending = self.inner.in_flight.load(Ordering::SeqCst);
        if pending == 0 {
            self.inner.release();
        } else {
            debug!("Deferring close until {} send(s) drain", pending);
        }
    }

    async fn request_reply(&self, device: &DeviceHandle, message: Message) -> Result<Message> {
        let method = message.name();
        let retries = self.inner.config.retries;

        for attempt in 0..=retries {
            let sequence = self.inner.next_sequence();
            let key = (device.identity, sequence);
            let (reply_tx, rx) = oneshot::channel();
            let waiter = Waiter {
                expects: message.expected_reply(),
                reply_tx,
            };
            self.inner.waiters.lock().insert(key, waiter);
            let _pending = PendingReply {
                inner: &self.inner,
                key,
            };

            let frame = Frame::to(device.identity, sequence, message.clone());
            match self.inner.send_to(&frame, device.address).await {
                Ok(()) => {
                    let reply = runtime::timeout(self.inner.config.request_timeout, rx).await;
                    if let Ok(Ok(reply)) = reply {
                        return Ok(reply);
                    }
                }
                Err(Error::Closed) => return Err(Error::Closed),
                Err(e) => debug!("{} to {} failed: {}", method, device.identity, e),
            }

            if attempt < retries {
                runtime::sleep(self.inner.config.retry_delay).await;
            }
        }

        Err(Error::timeout(&device.identity, method))
    }
}

impl Client for Transport {
    fn send<'a>(&'a self, device: &'a DeviceHandle, message: Message) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let frame = Frame::to(device.identity, self.inner.next_sequence(), message);
            self.inner.send_to(&frame, device.address).await
        })
    }

    fn request<'a>(
        &'a self,
        device: &'a DeviceHandle,
        message: Message,
    ) -> BoxFuture<'a, Result<Message>> {
        Box::pin(self.request_reply(device, message))
    }
}

impl Inner {
    fn next_sequence(&self) -> u8 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Reserve the socket for one send. Returns `None` once closing started.
    fn acquire(self: &Arc<Self>) -> Option<(Arc<UdpSocket>, InFlight)> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = InFlight {
            inner: Arc::clone(self),
        };
        if self.closing.load(Ordering::SeqCst) {
            return None;
        }
        let socket = self.socket.read().clone()?;
        Some((socket, guard))
    }

    async fn send_to(self: &Arc<Self>, frame: &Frame, address: SocketAddr) -> Result<()> {
        let bytes = protocol::encode(frame)?;
        let (socket, _guard) = self.acquire().ok_or(Error::Closed)?;
        socket
            .send_to(&bytes, address)
            .await
            .map(|_| ())
            .map_err(|e| Error::socket("send_to", e))
    }

    async fn broadcast(self: &Arc<Self>, message: Message) -> Result<()> {
        self.send_to(&Frame::broadcast(message), self.config.broadcast)
            .await
    }

    fn route(&self, bytes: &[u8], from: SocketAddr) {
        let frame = match protocol::decode(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Dropping datagram from {}: {}", from, e);
                return;
            }
        };
        let Some(identity) = frame.target else {
            return;
        };
        if !frame.message.is_reply() {
            return;
        }

        let port = match frame.message {
            Message::StateService {
                service: SERVICE_UDP,
                port,
            } => port,
            _ => from.port(),
        };
        self.registry
            .register(identity, port, from.ip(), identity.target());

        let key = (identity, frame.sequence);
        let waiter = {
            let mut waiters = self.waiters.lock();
            let wanted = waiters
                .get(&key)
                .is_some_and(|w| w.expects == Some(frame.message.name()));
            if wanted { waiters.remove(&key) } else { None }
        };
        if let Some(waiter) = waiter {
            let _ = waiter.reply_tx.send(frame.message);
        }
    }

    fn release(&self) {
        let Some(_socket) = self.socket.write().take() else {
            return;
        };
        for handle in self.loops.lock().drain(..) {
            handle.abort();
        }
        // Dropping the senders fails every outstanding request.
        self.waiters.lock().clear();
        debug!("Transport on {} closed", self.local_addr);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for handle in self.loops.get_mut().drain(..) {
            handle.abort();
        }
    }
}

/// A request waiting for its reply.
struct Waiter {
    expects: Option<&'static str>,
    reply_tx: oneshot::Sender<Message>,
}

/// Counts one pending send; the last one out finishes a deferred close.
struct InFlight {
    inner: Arc<Inner>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let remaining = self.inner.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0 && self.inner.closing.load(Ordering::SeqCst) {
            self.inner.release();
        }
    }
}

/// Removes a reply waiter however the request ends.
struct PendingReply<'a> {
    inner: &'a Inner,
    key: (Identity, u8),
}

impl Drop for PendingReply<'_> {
    fn drop(&mut self) {
        self.inner.waiters.lock().remove(&self.key);
    }
}

async fn receive_loop(socket: Arc<UdpSocket>, weak: Weak<Inner>) {
    let mut buffer = [0u8; 4096];
    loop {
        let received = socket.recv_from(&mut buffer).await;
        let Some(inner) = weak.upgrade() else {
            break;
        };
        match received {
            Ok((size, from)) => inner.route(&buffer[..size], from),
            Err(e) => warn!("Receive error on {}: {}", inner.local_addr, e),
        }
    }
}

async fn discovery_loop(weak: Weak<Inner>) {
    loop {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        let interval = inner.config.discovery_interval;
        if let Err(e) = inner.broadcast(Message::GetService).await {
            warn!("Discovery broadcast failed: {}", e);
        }
        drop(inner);
        runtime::sleep(interval).await;
    }
}

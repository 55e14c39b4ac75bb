use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::channel::mpsc;
use futures::future::{AbortHandle, abortable, join_all};
use log::debug;
use parking_lot::Mutex;

use super::{DjConfig, DjConfigUpdate, pattern};
use crate::protocol::Message;
use crate::registry::DeviceHandle;
use crate::runtime::{self, Instant};
use crate::transport::Client;

/// Shortest and longest gap between two taps that still counts as a tempo.
const TAP_MIN: Duration = Duration::from_millis(200);
const TAP_MAX: Duration = Duration::from_millis(2000);

/// Stream of configurations returned by [`Scheduler::subscribe`].
pub type ConfigSubscription = mpsc::UnboundedReceiver<DjConfig>;

/// Beat clock driving a [`Pattern`](super::Pattern) over a fixed device list.
///
/// The scheduler is either stopped or running. While running, a background
/// task ticks once per [`DjConfig::interval`]; each tick advances the beat
/// counter, evaluates [`pattern::frame`] and sends the resulting commands.
/// Ticks of one run never overlap, and a device that fails to receive its
/// command is skipped without affecting the clock or the other devices.
/// Stopping or retuning cancels the wait for the next beat; a tick already
/// sending finishes its sends.
///
/// Clones share the same clock.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    client: Arc<dyn Client>,
    state: Mutex<State>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<DjConfig>>>,
}

#[derive(Default)]
struct State {
    config: DjConfig,
    devices: Vec<DeviceHandle>,
    beat: u64,
    last_tap: Option<Instant>,
    running: bool,
    /// Bumped on every arm and disarm; a clock task exits once it no longer matches.
    generation: u64,
    sleeper: Option<AbortHandle>,
}

impl State {
    fn disarm(&mut self) -> bool {
        if let Some(sleeper) = self.sleeper.take() {
            sleeper.abort();
        }
        if !self.running {
            return false;
        }
        self.running = false;
        self.generation += 1;
        true
    }
}

impl Scheduler {
    pub fn new(client: Arc<dyn Client>) -> Self {
        Self::with_config(client, DjConfig::default())
    }

    pub fn with_config(client: Arc<dyn Client>, config: DjConfig) -> Self {
        Scheduler {
            inner: Arc::new(Inner {
                client,
                state: Mutex::new(State {
                    config: config.clamped(),
                    ..State::default()
                }),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Start ticking over `devices`, replacing any previous run.
    ///
    /// The beat counter restarts at zero.
    pub fn start(&self, devices: Vec<DeviceHandle>, overrides: Option<DjConfigUpdate>) {
        let changed = {
            let mut state = self.inner.state.lock();
            state.disarm();
            state.devices = devices;
            state.beat = 0;
            let changed = overrides.map(|update| {
                state.config.merge(update);
                state.config.clone()
            });
            self.arm(&mut state);
            debug!(
                "Pattern {} started on {} devices at {} bpm",
                state.config.pattern,
                state.devices.len(),
                state.config.bpm
            );
            changed
        };
        if let Some(config) = changed {
            self.inner.notify(config);
        }
    }

    /// Stop ticking. Safe to call in any state.
    pub fn stop(&self) {
        if self.inner.state.lock().disarm() {
            debug!("Pattern stopped");
        }
    }

    /// Merge `update` into the live configuration.
    ///
    /// A running clock is restarted at the new interval, so the beat phase
    /// resets while the beat counter carries on.
    pub fn update_config(&self, update: DjConfigUpdate) {
        let config = {
            let mut state = self.inner.state.lock();
            state.config.merge(update);
            if state.disarm() {
                self.arm(&mut state);
                debug!("Pattern retuned to {} bpm", state.config.bpm);
            }
            state.config.clone()
        };
        self.inner.notify(config);
    }

    /// Register a tap at the current time. See [`tap_tempo_at`](Self::tap_tempo_at).
    pub fn tap_tempo(&self) -> Option<u16> {
        self.tap_tempo_at(Instant::now())
    }

    /// Register a tap at `now`.
    ///
    /// If the previous tap lies strictly between 200ms and 2s before `now`,
    /// the tempo becomes one beat per gap and the new bpm is returned.
    /// Every tap becomes the anchor for the next one.
    ///
    /// ```
    /// use std::sync::Arc;
    /// use std::time::Duration;
    /// # use lan_lights_rs::{Client, DeviceHandle, Message, Error};
    /// # use lan_lights_rs::runtime::BoxFuture;
    /// use lan_lights_rs::dj::Scheduler;
    /// use lan_lights_rs::runtime::Instant;
    /// # struct Silent;
    /// # impl Client for Silent {
    /// #     fn send<'a>(&'a self, _: &'a DeviceHandle, _: Message) -> BoxFuture<'a, Result<(), Error>> {
    /// #         Box::pin(async { Ok(()) })
    /// #     }
    /// #     fn request<'a>(&'a self, d: &'a DeviceHandle, m: Message) -> BoxFuture<'a, Result<Message, Error>> {
    /// #         Box::pin(async move { Err(Error::timeout(&d.identity, m.name())) })
    /// #     }
    /// # }
    ///
    /// let dj = Scheduler::new(Arc::new(Silent));
    /// let start = Instant::now();
    /// assert_eq!(dj.tap_tempo_at(start), None);
    /// assert_eq!(dj.tap_tempo_at(start + Duration::from_millis(500)), Some(120));
    /// assert_eq!(dj.config().bpm, 120);
    /// ```
    pub fn tap_tempo_at(&self, now: Instant) -> Option<u16> {
        let previous = self.inner.state.lock().last_tap.replace(now)?;
        let gap = now.duration_since(previous);
        if gap <= TAP_MIN || gap >= TAP_MAX {
            return None;
        }
        let bpm = (60.0 / gap.as_secs_f64()).round() as u16;
        self.update_config(DjConfigUpdate::bpm(bpm));
        Some(self.config().bpm)
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().running
    }

    pub fn config(&self) -> DjConfig {
        self.inner.state.lock().config.clone()
    }

    /// Ticks since the last [`start`](Self::start).
    pub fn beat(&self) -> u64 {
        self.inner.state.lock().beat
    }

    pub fn devices(&self) -> Vec<DeviceHandle> {
        self.inner.state.lock().devices.clone()
    }

    /// Receive the configuration after every change.
    pub fn subscribe(&self) -> ConfigSubscription {
        let (tx, rx) = mpsc::unbounded();
        self.inner.subscribers.lock().push(tx);
        rx
    }

    fn arm(&self, state: &mut State) {
        state.running = true;
        state.generation += 1;
        let clock = run(
            Arc::downgrade(&self.inner),
            state.config.interval(),
            state.generation,
        );
        runtime::spawn(clock).detach();
    }
}

async fn run(inner: Weak<Inner>, interval: Duration, generation: u64) {
    let mut next = Instant::now() + interval;
    loop {
        let wait = {
            let Some(strong) = inner.upgrade() else {
                break;
            };
            let mut state = strong.state.lock();
            if state.generation != generation {
                break;
            }
            let (wait, sleeper) = abortable(runtime::sleep(next.duration_since(Instant::now())));
            state.sleeper = Some(sleeper);
            wait
        };
        if wait.await.is_err() {
            break;
        }
        let Some(inner) = inner.upgrade() else {
            break;
        };
        if !inner.tick_armed(generation).await {
            break;
        }
        next = next_deadline(next, interval, Instant::now());
    }
}

/// Deadline of the beat after the one due at `previous`.
///
/// When a tick overran by more than an interval the clock restarts from
/// `now` instead of firing the missed beats back to back.
fn next_deadline(previous: Instant, interval: Duration, now: Instant) -> Instant {
    let next = previous + interval;
    if next.duration_since(now).is_zero() {
        now
    } else {
        next
    }
}

type Frame = (Vec<DeviceHandle>, Vec<pattern::Cue>);

impl Inner {
    /// Run one beat for the clock task of `generation`.
    ///
    /// Returns `false` without touching the beat when that run was stopped.
    async fn tick_armed(self: &Arc<Self>, generation: u64) -> bool {
        let frame = {
            let mut state = self.state.lock();
            if state.generation != generation {
                return false;
            }
            Self::advance(&mut state)
        };
        self.dispatch(frame).await;
        true
    }

    #[cfg(test)]
    async fn tick(self: &Arc<Self>) {
        let frame = Self::advance(&mut self.state.lock());
        self.dispatch(frame).await;
    }

    fn advance(state: &mut State) -> Frame {
        state.beat += 1;
        let cues = pattern::frame(state.beat, state.devices.len(), &state.config);
        (state.devices.clone(), cues)
    }

    async fn dispatch(self: &Arc<Self>, (devices, cues): Frame) {
        let mut immediate = Vec::new();
        for cue in cues {
            let Some(device) = devices.get(cue.device).cloned() else {
                continue;
            };
            if cue.delay.is_zero() {
                immediate.push((device, cue.message));
                continue;
            }
            let inner = Arc::clone(self);
            runtime::spawn(async move {
                runtime::sleep(cue.delay).await;
                inner.send(&device, cue.message).await;
            })
            .detach();
        }
        join_all(
            immediate
                .into_iter()
                .map(|(device, message)| async move { self.send(&device, message).await }),
        )
        .await;
    }

    async fn send(&self, device: &DeviceHandle, message: Message) {
        let name = message.name();
        if let Err(e) = self.client.send(device, message).await {
            debug!("{} to {} failed: {}", name, device.identity, e);
        }
    }

    fn notify(&self, config: DjConfig) {
        self.subscribers
            .lock()
            .retain(|tx| tx.unbounded_send(config.clone()).is_ok());
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.state.get_mut().disarm();
    }
}

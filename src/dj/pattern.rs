//! Pattern frames: what each device shows on a given beat.

use std::f64::consts::TAU;
use std::time::Duration;

use rand::Rng;
use rand::seq::SliceRandom;

use super::{DjConfig, Pattern};
use crate::commands::{self, WaveformParams};
use crate::protocol::Message;
use crate::types::{Hsbk, Waveform};

/// Delay between the flash and the dark phase of [`Pattern::Blackout`].
pub const BLACKOUT_DELAY: Duration = Duration::from_millis(100);

/// Brightness of [`Pattern::Pulse`] on odd beats.
const PULSE_FLOOR: f64 = 0.2;

/// One command for one device within a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Cue {
    /// Index into the scheduler's device list.
    pub device: usize,
    /// Sent this long after the tick.
    pub delay: Duration,
    pub message: Message,
}

impl Cue {
    fn now(device: usize, message: Message) -> Self {
        Cue {
            device,
            delay: Duration::ZERO,
            message,
        }
    }
}

/// Evaluate `config.pattern` for `beat` over `devices` targets.
///
/// Every pattern but [`Pattern::Random`] depends on its arguments only.
/// Each device gets one cue, except under [`Pattern::Blackout`] where a
/// second cue darkens it after [`BLACKOUT_DELAY`].
///
/// # Examples
///
/// ```
/// use lan_lights_rs::dj::{DjConfig, pattern};
/// use lan_lights_rs::Message;
///
/// let frame = pattern::frame(5, 3, &DjConfig::default());
/// let lit: Vec<usize> = frame
///     .iter()
///     .filter(|cue| matches!(cue.message, Message::SetColor { color, .. } if color.brightness > 0))
///     .map(|cue| cue.device)
///     .collect();
/// assert_eq!(lit, vec![2]);
/// ```
pub fn frame(beat: u64, devices: usize, config: &DjConfig) -> Vec<Cue> {
    let interval = config.interval();
    let base = palette(config, beat);
    let snap = Duration::ZERO;

    match config.pattern {
        Pattern::Chase => (0..devices)
            .map(|i| {
                let on = beat % devices as u64 == i as u64;
                Cue::now(i, set(base, config, on as u8 as f64, snap))
            })
            .collect(),
        Pattern::Alternate => (0..devices)
            .map(|i| {
                let on = (i as u64 + beat) % 2 == 0;
                Cue::now(i, set(base, config, on as u8 as f64, snap))
            })
            .collect(),
        Pattern::Strobe => {
            let params = WaveformParams {
                transient: true,
                color: scaled(base, config.intensity as f64),
                period: interval / 2,
                cycles: 1.0,
                skew_ratio: 0.5,
                waveform: Waveform::Pulse,
            };
            (0..devices)
                .map(|i| Cue::now(i, commands::set_waveform(&params)))
                .collect()
        }
        Pattern::Wave => (0..devices)
            .map(|i| {
                let phase = (beat as f64 + i as f64) / devices as f64;
                let level = 0.5 + 0.5 * (phase * TAU).cos();
                let offset = (i as u64 * 65536 / devices as u64) as u16;
                let color = Hsbk {
                    hue: base.hue.wrapping_add(offset),
                    ..base
                };
                Cue::now(i, set(color, config, level, interval))
            })
            .collect(),
        Pattern::Random => {
            let mut rng = rand::thread_rng();
            (0..devices)
                .map(|i| {
                    let color = config.colors.choose(&mut rng).copied().unwrap_or(base);
                    let level = rng.gen_range(0.25..=1.0);
                    Cue::now(i, set(color, config, level, snap))
                })
                .collect()
        }
        Pattern::Pulse => {
            let level = if beat % 2 == 0 { 1.0 } else { PULSE_FLOOR };
            (0..devices)
                .map(|i| Cue::now(i, set(base, config, level, interval / 2)))
                .collect()
        }
        Pattern::Blackout => {
            let mut cues: Vec<Cue> = (0..devices)
                .map(|i| Cue::now(i, set(base, config, 1.0, snap)))
                .collect();
            cues.extend((0..devices).map(|i| Cue {
                device: i,
                delay: BLACKOUT_DELAY,
                message: set(base, config, 0.0, snap),
            }));
            cues
        }
    }
}

/// Palette entry for `beat`, cycling through the configured colors.
fn palette(config: &DjConfig, beat: u64) -> Hsbk {
    if config.colors.is_empty() {
        return Hsbk::default();
    }
    config.colors[(beat % config.colors.len() as u64) as usize]
}

fn scaled(color: Hsbk, level: f64) -> Hsbk {
    let brightness = (color.brightness as f64 * level.clamp(0.0, 1.0)).round() as u16;
    color.with_brightness(brightness)
}

fn set(color: Hsbk, config: &DjConfig, level: f64, duration: Duration) -> Message {
    commands::set_color(&scaled(color, config.intensity as f64 * level), duration)
}

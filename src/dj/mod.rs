//! Beat-synchronized pattern engine.
//!
//! A [`Scheduler`] ticks on a beat clock and, on every tick, evaluates the
//! active [`Pattern`] over its target devices with [`pattern::frame`].

pub mod pattern;
mod scheduler;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::types::Hsbk;

pub use pattern::Cue;
pub use scheduler::{ConfigSubscription, Scheduler};

pub const BPM_MIN: u16 = 30;
pub const BPM_MAX: u16 = 300;
pub const SUBDIVISION_MAX: u8 = 16;

/// Lighting pattern evaluated on each beat.
///
/// # Examples
///
/// ```
/// use lan_lights_rs::dj::Pattern;
/// use strum::IntoEnumIterator;
///
/// assert_eq!("strobe".parse::<Pattern>().unwrap(), Pattern::Strobe);
/// assert_eq!(Pattern::Blackout.to_string(), "blackout");
/// assert_eq!(Pattern::iter().count(), 7);
/// ```
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Pattern {
    /// One lit device walking along the device list
    #[default]
    Chase,
    /// Every device flashes once per beat
    Strobe,
    /// Even and odd devices take turns
    Alternate,
    /// Brightness and hue roll across the devices
    Wave,
    /// Random palette color and level per device
    Random,
    /// Everything breathes between full and dim
    Pulse,
    /// Flash, then dark
    Blackout,
}

/// Live configuration of the pattern engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DjConfig {
    pub bpm: u16,
    pub pattern: Pattern,
    /// Palette patterns pick from, in order.
    pub colors: Vec<Hsbk>,
    /// Scales every brightness, 0.0 to 1.0.
    pub intensity: f32,
    /// Ticks per beat.
    pub subdivision: u8,
}

impl Default for DjConfig {
    fn default() -> Self {
        DjConfig {
            bpm: 120,
            pattern: Pattern::Chase,
            colors: default_palette(),
            intensity: 1.0,
            subdivision: 1,
        }
    }
}

fn default_palette() -> Vec<Hsbk> {
    vec![
        Hsbk::new(0, 65535, 65535, Hsbk::DEFAULT_KELVIN),
        Hsbk::new(21845, 65535, 65535, Hsbk::DEFAULT_KELVIN),
        Hsbk::new(43690, 65535, 65535, Hsbk::DEFAULT_KELVIN),
    ]
}

impl DjConfig {
    /// Time between two ticks: `60s / bpm / subdivision`.
    ///
    /// ```
    /// use std::time::Duration;
    /// use lan_lights_rs::dj::DjConfig;
    ///
    /// let config = DjConfig { bpm: 120, subdivision: 2, ..DjConfig::default() };
    /// assert_eq!(config.interval(), Duration::from_millis(250));
    /// ```
    pub fn interval(&self) -> Duration {
        let bpm = u64::from(self.bpm.clamp(BPM_MIN, BPM_MAX));
        let subdivision = u64::from(self.subdivision.clamp(1, SUBDIVISION_MAX));
        Duration::from_nanos(60_000_000_000 / (bpm * subdivision))
    }

    /// Bring every field back into its valid range.
    pub fn clamped(mut self) -> Self {
        self.bpm = self.bpm.clamp(BPM_MIN, BPM_MAX);
        self.subdivision = self.subdivision.clamp(1, SUBDIVISION_MAX);
        self.intensity = if self.intensity.is_nan() {
            1.0
        } else {
            self.intensity.clamp(0.0, 1.0)
        };
        if self.colors.is_empty() {
            self.colors = default_palette();
        }
        self
    }

    /// Merge the fields set in `update`, then clamp.
    pub fn merge(&mut self, update: DjConfigUpdate) {
        if let Some(bpm) = update.bpm {
            self.bpm = bpm;
        }
        if let Some(pattern) = update.pattern {
            self.pattern = pattern;
        }
        if let Some(colors) = update.colors {
            self.colors = colors;
        }
        if let Some(intensity) = update.intensity {
            self.intensity = intensity;
        }
        if let Some(subdivision) = update.subdivision {
            self.subdivision = subdivision;
        }
        *self = std::mem::take(self).clamped();
    }
}

/// Partial [`DjConfig`]; unset fields are left alone by [`DjConfig::merge`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DjConfigUpdate {
    pub bpm: Option<u16>,
    pub pattern: Option<Pattern>,
    pub colors: Option<Vec<Hsbk>>,
    pub intensity: Option<f32>,
    pub subdivision: Option<u8>,
}

impl DjConfigUpdate {
    pub fn bpm(bpm: u16) -> Self {
        DjConfigUpdate {
            bpm: Some(bpm),
            ..Self::default()
        }
    }

    pub fn pattern(pattern: Pattern) -> Self {
        DjConfigUpdate {
            pattern: Some(pattern),
            ..Self::default()
        }
    }
}

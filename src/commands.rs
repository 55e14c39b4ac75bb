//! Builders mapping a lighting intent to a protocol message.
//!
//! Builders do not validate ranges; callers pass pre-clamped values.

use std::time::Duration;

use crate::protocol::Message;
use crate::types::{Hsbk, Waveform};

/// Parameters for [`set_waveform`].
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformParams {
    /// Return to the original color once the cycles complete.
    pub transient: bool,
    pub color: Hsbk,
    pub period: Duration,
    pub cycles: f32,
    /// Fraction of each cycle spent on the target color (pulse only).
    pub skew_ratio: f32,
    pub waveform: Waveform,
}

impl Default for WaveformParams {
    fn default() -> Self {
        WaveformParams {
            transient: true,
            color: Hsbk::default(),
            period: Duration::from_millis(1000),
            cycles: 1.0,
            skew_ratio: 0.5,
            waveform: Waveform::Sine,
        }
    }
}

/// Build a set-color message ramping over `duration`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use lan_lights_rs::{Hsbk, Message, commands};
///
/// let color = Hsbk::new(43690, 65535, 65535, 3500);
/// let msg = commands::set_color(&color, Duration::from_millis(250));
/// assert_eq!(msg, Message::SetColor { color, duration: 250 });
/// ```
pub fn set_color(color: &Hsbk, duration: Duration) -> Message {
    Message::SetColor {
        color: *color,
        duration: millis(duration),
    }
}

/// Build a set-power message.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use lan_lights_rs::{Message, commands};
///
/// let msg = commands::set_power(false, Duration::ZERO);
/// assert_eq!(msg, Message::SetPower { on: false, duration: 0 });
/// ```
pub fn set_power(on: bool, duration: Duration) -> Message {
    Message::SetPower {
        on,
        duration: millis(duration),
    }
}

pub fn set_waveform(params: &WaveformParams) -> Message {
    Message::SetWaveform {
        transient: params.transient,
        color: params.color,
        period: millis(params.period),
        cycles: params.cycles,
        skew_ratio: params.skew_ratio,
        waveform: params.waveform,
    }
}

fn millis(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waveform_builder() {
        let params = WaveformParams {
            color: Hsbk::new(100, 200, 300, 4000),
            period: Duration::from_millis(125),
            waveform: Waveform::Pulse,
            ..WaveformParams::default()
        };
        assert_eq!(
            set_waveform(&params),
            Message::SetWaveform {
                transient: true,
                color: Hsbk::new(100, 200, 300, 4000),
                period: 125,
                cycles: 1.0,
                skew_ratio: 0.5,
                waveform: Waveform::Pulse,
            }
        );
    }

    #[test]
    fn test_duration_saturates() {
        let msg = set_power(true, Duration::from_secs(u64::MAX / 4));
        assert_eq!(msg, Message::SetPower { on: true, duration: u32::MAX });
    }
}

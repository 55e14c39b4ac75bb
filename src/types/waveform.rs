//! Waveform shapes for transient effects.

use serde::{Deserialize, Serialize};

/// Shape of the brightness/color curve a device plays for a waveform command.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Waveform {
    Saw,
    Sine,
    HalfSine,
    Triangle,
    /// Square wave; the duty cycle follows the skew ratio.
    Pulse,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names() {
        assert_eq!(serde_json::to_string(&Waveform::HalfSine).unwrap(), "\"halfSine\"");
        let pulse: Waveform = serde_json::from_str("\"pulse\"").unwrap();
        assert_eq!(pulse, Waveform::Pulse);
    }
}

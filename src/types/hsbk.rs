//! Device-native HSBK color.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A color in the protocol's native hue/saturation/brightness/kelvin form.
///
/// Hue, saturation and brightness span the full `u16` range (0-65535).
/// Kelvin is only meaningful from 1500K to 9000K and is used when saturation
/// is zero (white light).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hsbk {
    pub hue: u16,
    pub saturation: u16,
    pub brightness: u16,
    pub kelvin: u16,
}

impl Default for Hsbk {
    fn default() -> Self {
        Hsbk::new(0, 0, u16::MAX, Self::DEFAULT_KELVIN)
    }
}

impl Hsbk {
    pub const KELVIN_MIN: u16 = 1500;
    pub const KELVIN_MAX: u16 = 9000;
    pub const DEFAULT_KELVIN: u16 = 3500;

    /// Create a color from raw values without validation.
    pub const fn new(hue: u16, saturation: u16, brightness: u16, kelvin: u16) -> Self {
        Hsbk {
            hue,
            saturation,
            brightness,
            kelvin,
        }
    }

    /// Create a color, returning `None` if kelvin is outside 1500-9000.
    ///
    /// # Examples
    ///
    /// ```
    /// use lan_lights_rs::Hsbk;
    ///
    /// assert!(Hsbk::create(0, 0, 65535, 1499).is_none());
    /// assert!(Hsbk::create(0, 0, 65535, 1500).is_some());
    /// assert!(Hsbk::create(0, 0, 65535, 9000).is_some());
    /// assert!(Hsbk::create(0, 0, 65535, 9001).is_none());
    /// ```
    pub fn create(hue: u16, saturation: u16, brightness: u16, kelvin: u16) -> Option<Self> {
        if (Self::KELVIN_MIN..=Self::KELVIN_MAX).contains(&kelvin) {
            Some(Hsbk::new(hue, saturation, brightness, kelvin))
        } else {
            None
        }
    }

    /// Create a color from hue in degrees and saturation/value in `0.0..=1.0`.
    ///
    /// # Examples
    ///
    /// ```
    /// use lan_lights_rs::Hsbk;
    ///
    /// let blue = Hsbk::from_hsv(240.0, 1.0, 1.0, 3500);
    /// assert_eq!(blue.hue, 43690);
    /// assert_eq!(blue.saturation, 65535);
    /// ```
    pub fn from_hsv(hue: f32, saturation: f32, value: f32, kelvin: u16) -> Self {
        let hue = hue.rem_euclid(360.0) / 360.0;
        Hsbk::new(
            scale(hue),
            scale(saturation),
            scale(value),
            kelvin.clamp(Self::KELVIN_MIN, Self::KELVIN_MAX),
        )
    }

    /// Hue as degrees on the color wheel.
    pub fn hue_degrees(&self) -> f32 {
        self.hue as f32 * 360.0 / 65536.0
    }

    /// The same color with kelvin pulled into the valid range.
    pub fn clamped(self) -> Self {
        Hsbk {
            kelvin: self.kelvin.clamp(Self::KELVIN_MIN, Self::KELVIN_MAX),
            ..self
        }
    }

    pub fn with_brightness(self, brightness: u16) -> Self {
        Hsbk { brightness, ..self }
    }
}

fn scale(fraction: f32) -> u16 {
    (fraction.clamp(0.0, 1.0) * u16::MAX as f32).round() as u16
}

impl FromStr for Hsbk {
    type Err = String;

    /// Parse from comma-separated string (e.g., "43690,65535,32768,3500").
    fn from_str(s: &str) -> Result<Self, String> {
        let parts = s
            .split(',')
            .map(|c| c.trim().parse::<u16>().map_err(|e| format!("{c:?}: {e}")))
            .collect::<Result<Vec<_>, _>>()?;
        match parts[..] {
            [h, s, b, k] => Ok(Hsbk::new(h, s, b, k).clamped()),
            _ => Err("Expected format: hue,saturation,brightness,kelvin".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let color: Hsbk = "43690, 65535, 32768, 3500".parse().unwrap();
        assert_eq!(color, Hsbk::new(43690, 65535, 32768, 3500));
        assert!("1,2,3".parse::<Hsbk>().is_err());
        assert!("a,2,3,4".parse::<Hsbk>().is_err());
    }

    #[test]
    fn test_parse_clamps_kelvin() {
        let color: Hsbk = "0,0,65535,20000".parse().unwrap();
        assert_eq!(color.kelvin, Hsbk::KELVIN_MAX);
    }

    #[test]
    fn test_hue_degrees() {
        let red = Hsbk::from_hsv(0.0, 1.0, 1.0, 3500);
        assert_eq!(red.hue, 0);
        let green = Hsbk::from_hsv(120.0, 1.0, 0.5, 3500);
        assert!((green.hue_degrees() - 120.0).abs() < 0.01);
        assert_eq!(green.brightness, 32768);
    }
}

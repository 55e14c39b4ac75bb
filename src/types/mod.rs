//! Value types for light control parameters.

mod hsbk;
mod waveform;

pub use hsbk::Hsbk;
pub use waveform::Waveform;

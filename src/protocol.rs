//! Datagram framing for the LAN lighting protocol.
//!
//! Every datagram is a single JSON [`Frame`]. Requests carry a `target` and a
//! `sequence`; devices echo both back in their `state*` replies so a reply can
//! be routed to whoever asked. Discovery requests go out without a target.
//!
//! ```json
//! {"target":"d073d5001337","sequence":7,"message":{"method":"setColor","params":{...}}}
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use strum_macros::IntoStaticStr;
use uuid::Uuid;

use crate::errors::Error;
use crate::types::{Hsbk, Waveform};

type Result<T> = std::result::Result<T, Error>;

/// UDP port devices listen on.
pub const PORT: u16 = 56700;

/// Service id a device reports for its UDP endpoint.
pub const SERVICE_UDP: u8 = 1;

/// Stable serial of one physical device.
///
/// # Examples
///
/// ```
/// use lan_lights_rs::Identity;
///
/// let id: Identity = "d073d5001337".parse().unwrap();
/// assert_eq!(id.to_string(), "d073d5001337");
/// assert_eq!(Identity::from_target(id.target()), id);
/// assert!("d073d5".parse::<Identity>().is_err());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, SerializeDisplay, DeserializeFromStr)]
pub struct Identity([u8; 6]);

impl Identity {
    pub const fn new(serial: [u8; 6]) -> Self {
        Identity(serial)
    }

    /// Build an identity from the 8-byte target field of a frame header.
    pub fn from_target(target: [u8; 8]) -> Self {
        let mut serial = [0u8; 6];
        serial.copy_from_slice(&target[..6]);
        Identity(serial)
    }

    /// The 8-byte target field addressing this device (serial, zero padded).
    pub fn target(&self) -> [u8; 8] {
        let mut target = [0u8; 8];
        target[..6].copy_from_slice(&self.0);
        target
    }

    pub fn serial(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.iter().try_for_each(|b| write!(f, "{b:02x}"))
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({self})")
    }
}

impl FromStr for Identity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != 12 || !s.is_ascii() {
            return Err(Error::InvalidIdentity(s.to_string()));
        }
        let mut serial = [0u8; 6];
        for (i, byte) in serial.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| Error::InvalidIdentity(s.to_string()))?;
        }
        Ok(Identity(serial))
    }
}

/// Identity of a device group as reported by the devices themselves.
///
/// The nil UUID is reserved for the "ungrouped" pseudo-group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(Uuid);

impl GroupId {
    pub const UNGROUPED: GroupId = GroupId(Uuid::nil());

    pub fn new(id: Uuid) -> Self {
        GroupId(id)
    }

    pub fn is_ungrouped(&self) -> bool {
        self.0.is_nil()
    }

    pub fn uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Message bodies, both requests and the `state*` replies devices send back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, IntoStaticStr)]
#[serde(tag = "method", content = "params", rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum Message {
    GetService,
    StateService {
        service: u8,
        port: u16,
    },
    GetColor,
    StateColor {
        color: Hsbk,
        power: bool,
        label: String,
    },
    GetPower,
    StatePower {
        on: bool,
    },
    GetLabel,
    StateLabel {
        label: String,
    },
    GetGroup,
    StateGroup {
        group: GroupId,
        label: String,
    },
    GetVersion,
    StateVersion {
        vendor: u32,
        product: u32,
    },
    SetColor {
        color: Hsbk,
        /// Ramp time in milliseconds.
        duration: u32,
    },
    SetPower {
        on: bool,
        duration: u32,
    },
    SetWaveform {
        transient: bool,
        color: Hsbk,
        /// Length of one cycle in milliseconds.
        period: u32,
        cycles: f32,
        #[serde(rename = "skewRatio")]
        skew_ratio: f32,
        waveform: Waveform,
    },
}

impl Message {
    /// Wire name of this message, e.g. `"getColor"`.
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// Wire name of the reply a device sends for this request, if any.
    pub fn expected_reply(&self) -> Option<&'static str> {
        match self {
            Message::GetService => Some("stateService"),
            Message::GetColor => Some("stateColor"),
            Message::GetPower => Some("statePower"),
            Message::GetLabel => Some("stateLabel"),
            Message::GetGroup => Some("stateGroup"),
            Message::GetVersion => Some("stateVersion"),
            _ => None,
        }
    }

    /// Whether this message is a device reply rather than a request.
    pub fn is_reply(&self) -> bool {
        matches!(
            self,
            Message::StateService { .. }
                | Message::StateColor { .. }
                | Message::StatePower { .. }
                | Message::StateLabel { .. }
                | Message::StateGroup { .. }
                | Message::StateVersion { .. }
        )
    }
}

/// One datagram: routing header plus message body.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub target: Option<Identity>,
    #[serde(default)]
    pub sequence: u8,
    pub message: Message,
}

impl Frame {
    /// A frame addressed to every device on the segment.
    pub fn broadcast(message: Message) -> Self {
        Frame {
            target: None,
            sequence: 0,
            message,
        }
    }

    /// A frame addressed to a single device.
    pub fn to(target: Identity, sequence: u8, message: Message) -> Self {
        Frame {
            target: Some(target),
            sequence,
            message,
        }
    }
}

pub fn encode(frame: &Frame) -> Result<Vec<u8>> {
    serde_json::to_vec(frame).map_err(Error::JsonDump)
}

pub fn decode(bytes: &[u8]) -> Result<Frame> {
    let text = std::str::from_utf8(bytes).map_err(Error::Utf8Decode)?;
    serde_json::from_str(text).map_err(Error::JsonLoad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_format() {
        let id: Identity = "d073d5001337".parse().unwrap();
        let bytes = encode(&Frame::to(id, 9, Message::GetColor)).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            value,
            json!({"target": "d073d5001337", "sequence": 9, "message": {"method": "getColor"}})
        );
    }

    #[test]
    fn test_broadcast_has_no_target() {
        let bytes = encode(&Frame::broadcast(Message::GetService)).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(value.get("target").is_none());
    }

    #[test]
    fn test_decode_state_color() {
        let raw = json!({
            "target": "d073d5000001",
            "sequence": 3,
            "message": {
                "method": "stateColor",
                "params": {
                    "color": {"hue": 0, "saturation": 0, "brightness": 32768, "kelvin": 3500},
                    "power": true,
                    "label": "Lamp"
                }
            }
        });
        let frame = decode(raw.to_string().as_bytes()).unwrap();
        assert_eq!(frame.target, Some("d073d5000001".parse().unwrap()));
        assert_eq!(frame.sequence, 3);
        assert_eq!(
            frame.message,
            Message::StateColor {
                color: Hsbk::new(0, 0, 32768, 3500),
                power: true,
                label: "Lamp".into(),
            }
        );
        assert!(frame.message.is_reply());
    }

    #[test]
    fn test_decode_waveform_field_names() {
        let raw = r#"{"message":{"method":"setWaveform","params":{"transient":true,
            "color":{"hue":1,"saturation":2,"brightness":3,"kelvin":3500},
            "period":250,"cycles":1.0,"skewRatio":0.5,"waveform":"pulse"}}}"#;
        let frame = decode(raw.as_bytes()).unwrap();
        let Message::SetWaveform { skew_ratio, waveform, .. } = frame.message else {
            panic!("wrong message kind");
        };
        assert_eq!(skew_ratio, 0.5);
        assert_eq!(waveform, Waveform::Pulse);
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(decode(b"not json"), Err(Error::JsonLoad(_))));
        assert!(matches!(decode(&[0xff, 0xfe]), Err(Error::Utf8Decode(_))));
        assert!(decode(br#"{"message":{"method":"selfDestruct"}}"#).is_err());
    }

    #[test]
    fn test_message_names() {
        assert_eq!(Message::GetVersion.name(), "getVersion");
        assert_eq!(
            Message::SetPower { on: true, duration: 0 }.name(),
            "setPower"
        );
        assert!(!Message::GetGroup.is_reply());
        assert_eq!(Message::GetGroup.expected_reply(), Some("stateGroup"));
        assert_eq!(Message::SetPower { on: true, duration: 0 }.expected_reply(), None);
    }
}

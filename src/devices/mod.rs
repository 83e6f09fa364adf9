//! Device model and the type-dispatched transition rule.
//!
//! Each device carries a fixed kind tag; the set of mutable fields is
//! fully determined by that kind and enforced by construction through the
//! closed `DeviceState` enum. Adding a kind extends the enum and every
//! `match` below stops compiling until the new arm exists.

pub mod engine;
pub mod store;

use serde::{Deserialize, Serialize};

/// The six controllable device kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Light,
    Lock,
    Temp,
    Garage,
    Music,
    Blinds,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Lock => "lock",
            Self::Temp => "temp",
            Self::Garage => "garage",
            Self::Music => "music",
            Self::Blinds => "blinds",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "light" => Some(Self::Light),
            "lock" => Some(Self::Lock),
            "temp" => Some(Self::Temp),
            "garage" => Some(Self::Garage),
            "music" => Some(Self::Music),
            "blinds" => Some(Self::Blinds),
            _ => None,
        }
    }
}

/// Mutable device state. One variant per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Light { on: bool, brightness: i64 },
    Lock { locked: bool },
    Temp { on: bool, target: i64 },
    Garage { open: bool },
    Music { on: bool, volume: i64 },
    Blinds { position: i64 },
}

/// A requested state change in the uniform request shape: an explicit
/// integer target, or a bare toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Toggle,
    Set(i64),
}

impl DeviceState {
    pub fn kind(&self) -> DeviceKind {
        match self {
            Self::Light { .. } => DeviceKind::Light,
            Self::Lock { .. } => DeviceKind::Lock,
            Self::Temp { .. } => DeviceKind::Temp,
            Self::Garage { .. } => DeviceKind::Garage,
            Self::Music { .. } => DeviceKind::Music,
            Self::Blinds { .. } => DeviceKind::Blinds,
        }
    }

    /// Compute the successor state. Total over every kind/mutation pair.
    ///
    /// A toggle flips the kind's single boolean; blinds have none, so a
    /// toggle leaves them untouched (intentional asymmetry in the type
    /// table, preserved from the fleet's observed behavior). A direct set
    /// writes the kind's value verbatim, with no clamping; range policy
    /// belongs to the caller. Lock and garage carry no value, so a set
    /// leaves them untouched.
    pub fn apply(&self, mutation: Mutation) -> DeviceState {
        match (*self, mutation) {
            (Self::Light { on, brightness }, Mutation::Toggle) => Self::Light {
                on: !on,
                brightness,
            },
            (Self::Light { on, .. }, Mutation::Set(v)) => Self::Light { on, brightness: v },

            (Self::Lock { locked }, Mutation::Toggle) => Self::Lock { locked: !locked },
            (state @ Self::Lock { .. }, Mutation::Set(_)) => state,

            (Self::Temp { on, target }, Mutation::Toggle) => Self::Temp { on: !on, target },
            (Self::Temp { on, .. }, Mutation::Set(v)) => Self::Temp { on, target: v },

            (Self::Garage { open }, Mutation::Toggle) => Self::Garage { open: !open },
            (state @ Self::Garage { .. }, Mutation::Set(_)) => state,

            (Self::Music { on, volume }, Mutation::Toggle) => Self::Music { on: !on, volume },
            (Self::Music { on, .. }, Mutation::Set(v)) => Self::Music { on, volume: v },

            (state @ Self::Blinds { .. }, Mutation::Toggle) => state,
            (Self::Blinds { .. }, Mutation::Set(v)) => Self::Blinds { position: v },
        }
    }
}

/// A registered device. Created at provisioning time, mutated only through
/// the transition engine, never deleted during normal operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: i64,
    pub name: String,
    pub state: DeviceState,
}

/// JSON wire shape. Fields that do not exist for the device's kind are
/// omitted entirely rather than serialized as null.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireDevice {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: DeviceKind,
    #[serde(rename = "isOn", default, skip_serializing_if = "Option::is_none")]
    pub is_on: Option<bool>,
    #[serde(rename = "isLocked", default, skip_serializing_if = "Option::is_none")]
    pub is_locked: Option<bool>,
    #[serde(rename = "isOpen", default, skip_serializing_if = "Option::is_none")]
    pub is_open: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<i64>,
}

impl From<&Device> for WireDevice {
    fn from(device: &Device) -> Self {
        let (is_on, is_locked, is_open, value) = match device.state {
            DeviceState::Light { on, brightness } => (Some(on), None, None, Some(brightness)),
            DeviceState::Lock { locked } => (None, Some(locked), None, None),
            DeviceState::Temp { on, target } => (Some(on), None, None, Some(target)),
            DeviceState::Garage { open } => (None, None, Some(open), None),
            DeviceState::Music { on, volume } => (Some(on), None, None, Some(volume)),
            DeviceState::Blinds { position } => (None, None, None, Some(position)),
        };
        Self {
            id: device.id,
            name: device.name.clone(),
            kind: device.state.kind(),
            is_on,
            is_locked,
            is_open,
            value,
        }
    }
}

//! Local device registry and sensor sink seams, plus the synthetic key scheme
//! every emitted signal is addressed by.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Readings whose temperatures differ by less than this are the same reading.
const TEMPERATURE_TOLERANCE: f64 = 0.01;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Switch,
    Setpoint,
    TempHum,
}

impl SensorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SensorKind::Switch => "switch",
            SensorKind::Setpoint => "setpoint",
            SensorKind::TempHum => "temp_hum",
        }
    }
}

/// Composite local key: `<kind>` plus the hex node id the host addresses the
/// device by (`%X%02X%02X%02X` over the four id bytes).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceKey {
    pub kind: SensorKind,
    pub id: String,
}

impl DeviceKey {
    fn from_bytes(kind: SensorKind, id3: u8, id4: u8) -> Self {
        DeviceKey {
            kind,
            id: format!("{:X}{:02X}{:02X}{:02X}", 0, 0, id3, id4),
        }
    }

    /// Devices addressed by node id (switches, setpoints, climate sensors).
    /// `None` when the node does not fit the id byte.
    pub fn node(kind: SensorKind, node: u32) -> Option<Self> {
        let node = u8::try_from(node).ok()?;
        Some(Self::from_bytes(kind, 0, node))
    }

    /// Smoke/CO alarm units live in the third id byte.
    pub fn alarm_unit(unit: u32) -> Option<Self> {
        let unit = u8::try_from(unit).ok()?;
        Some(Self::from_bytes(SensorKind::Switch, unit, 0))
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind.as_str(), self.id)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reading {
    Switch { on: bool },
    Setpoint { temperature: f64 },
    TempHum { temperature: f64, humidity: i32 },
}

impl Reading {
    /// Equal for change-suppression purposes.
    pub fn same_as(&self, other: &Reading) -> bool {
        match (self, other) {
            (Reading::Switch { on: a }, Reading::Switch { on: b }) => a == b,
            (Reading::Setpoint { temperature: a }, Reading::Setpoint { temperature: b }) => {
                (a - b).abs() < TEMPERATURE_TOLERANCE
            }
            (
                Reading::TempHum {
                    temperature: a,
                    humidity: ha,
                },
                Reading::TempHum {
                    temperature: b,
                    humidity: hb,
                },
            ) => (a - b).abs() < TEMPERATURE_TOLERANCE && ha == hb,
            _ => false,
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::Switch { on: true } => write!(f, "on"),
            Reading::Switch { on: false } => write!(f, "off"),
            Reading::Setpoint { temperature } => write!(f, "{:.1}", temperature),
            Reading::TempHum { temperature, humidity } => write!(f, "{:.1};{}%", temperature, humidity),
        }
    }
}

/// Category assigned once, when the registry first creates the entity.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceCategory {
    SmokeDetector,
}

impl DeviceCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceCategory::SmokeDetector => "smoke_detector",
        }
    }
}

pub trait DeviceRegistry {
    /// Last stored reading for the key, if the entity exists.
    fn lookup(&mut self, key: &DeviceKey) -> Result<Option<Reading>, String>;

    /// Refresh the last-seen timestamp only.
    fn touch(&mut self, key: &DeviceKey, at: DateTime<Utc>) -> Result<(), String>;

    /// Create or update the entity. `category` and `label` apply on creation
    /// only; an existing entity keeps the ones it was created with.
    fn store(
        &mut self,
        key: &DeviceKey,
        reading: &Reading,
        label: &str,
        category: Option<DeviceCategory>,
        at: DateTime<Utc>,
    ) -> Result<(), String>;
}

pub trait SensorSink {
    fn emit(&mut self, key: &DeviceKey, reading: &Reading, label: &str, at: DateTime<Utc>) -> Result<(), String>;
}

/// Everything the reconciler needs from the host side.
pub trait Host: DeviceRegistry + SensorSink {}

impl<T: DeviceRegistry + SensorSink> Host for T {}

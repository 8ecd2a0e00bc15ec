//! Payload models for the Nest developer API (`structures.json`, `devices.json`).
//!
//! Notes
//! - Collections are keyed by opaque ids; `serde_json` keeps object members in
//!   key order, which is the traversal order the index relies on.
//! - Entries are kept as raw `Value`s inside the collections and decoded one by
//!   one, so a single malformed device does not discard the whole poll.
//! - Every field is optional on the wire; absent and empty are treated alike.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StructureId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThermostatSerial(pub String);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TemperatureScale {
    #[serde(rename = "C")]
    Celsius,
    #[serde(rename = "F")]
    Fahrenheit,
}

impl TemperatureScale {
    /// Case-insensitive `C` / `F`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "c" | "C" => Some(TemperatureScale::Celsius),
            "f" | "F" => Some(TemperatureScale::Fahrenheit),
            _ => None,
        }
    }

    /// Suffix used by the API for scale-specific fields.
    pub fn suffix(self) -> &'static str {
        match self {
            TemperatureScale::Celsius => "c",
            TemperatureScale::Fahrenheit => "f",
        }
    }

    pub fn target_field(self) -> String {
        format!("target_temperature_{}", self.suffix())
    }
}

/// Field decoder that never fails: absent, null or mistyped values become
/// the field's default, so one bad field does not discard the whole entry.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let raw = Value::deserialize(deserializer)?;
    Ok(T::deserialize(raw).unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Structure {
    #[serde(default, deserialize_with = "lenient")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub structure_id: Option<StructureId>,
    /// "home", "away" or "auto-away".
    #[serde(default, deserialize_with = "lenient")]
    pub away: Option<String>,
    /// Serials of the thermostats installed in this structure.
    #[serde(default, deserialize_with = "lenient")]
    pub thermostats: Vec<ThermostatSerial>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Thermostat {
    #[serde(default, deserialize_with = "lenient")]
    pub where_name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub can_heat: bool,
    #[serde(default, deserialize_with = "lenient")]
    pub can_cool: bool,
    #[serde(default, deserialize_with = "lenient")]
    pub temperature_scale: Option<String>,
    /// "heat", "cool", "heat-cool", "eco" or "off".
    #[serde(default, deserialize_with = "lenient")]
    pub hvac_mode: Option<String>,
    /// "heating", "cooling" or "off".
    #[serde(default, deserialize_with = "lenient")]
    pub hvac_state: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub humidity: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub target_temperature_c: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub target_temperature_f: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub ambient_temperature_c: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub ambient_temperature_f: Option<f64>,
}

impl Thermostat {
    pub fn scale(&self) -> Option<TemperatureScale> {
        self.temperature_scale.as_deref().and_then(TemperatureScale::parse)
    }

    pub fn target_temperature(&self, scale: TemperatureScale) -> Option<f64> {
        match scale {
            TemperatureScale::Celsius => self.target_temperature_c,
            TemperatureScale::Fahrenheit => self.target_temperature_f,
        }
    }

    pub fn ambient_temperature(&self, scale: TemperatureScale) -> Option<f64> {
        match scale {
            TemperatureScale::Celsius => self.ambient_temperature_c,
            TemperatureScale::Fahrenheit => self.ambient_temperature_f,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SmokeCoAlarm {
    #[serde(default, deserialize_with = "lenient")]
    pub where_name: Option<String>,
    /// "ok", "warning" or "emergency".
    #[serde(default, deserialize_with = "lenient")]
    pub smoke_alarm_state: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub co_alarm_state: Option<String>,
}

/// Outcome of looking up one device by id.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEntry<T> {
    Missing,
    /// Present under the id but not an object.
    Malformed,
    Present(T),
}

/// Body of `devices.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Devices {
    #[serde(default)]
    pub thermostats: Map<String, Value>,
    #[serde(default)]
    pub smoke_co_alarms: Map<String, Value>,
}

impl Devices {
    pub fn thermostat(&self, serial: &ThermostatSerial) -> DeviceEntry<Thermostat> {
        match self.thermostats.get(&serial.0) {
            None => DeviceEntry::Missing,
            Some(v) if v.is_object() => match Thermostat::deserialize(v) {
                Ok(t) => DeviceEntry::Present(t),
                Err(_) => DeviceEntry::Malformed,
            },
            Some(_) => DeviceEntry::Malformed,
        }
    }

    /// Alarms in payload order; entries that are not objects are skipped.
    pub fn smoke_co_alarms(&self) -> impl Iterator<Item = (&str, SmokeCoAlarm)> + '_ {
        self.smoke_co_alarms
            .iter()
            .filter(|(_, v)| v.is_object())
            .filter_map(|(id, v)| SmokeCoAlarm::deserialize(v).ok().map(|a| (id.as_str(), a)))
    }
}

/// Result of one successful `fetch_all`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// Body of `structures.json`, keyed by structure id.
    pub structures: Map<String, Value>,
    pub devices: Devices,
}

impl Snapshot {
    /// Structures in payload order; entries that are not objects are skipped.
    pub fn structures(&self) -> impl Iterator<Item = Structure> + '_ {
        self.structures
            .values()
            .filter(|v| v.is_object())
            .map(|v| Structure::deserialize(v).unwrap_or_default())
    }
}

//! Local commands pushed upstream as single-field PUTs.

use log::{error, info};
use serde_json::{json, Value};

use crate::client::NestClient;
use crate::error::SyncError;
use crate::index::IdentifierIndex;
use crate::models::nest::TemperatureScale;
use crate::session::Session;

/// Instruction as the host delivers it, addressed by node id.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Switch { node: u32, on: bool },
    Setpoint { node: u32, temperature: f64 },
}

/// Command after node id decoding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    SetAway { structure: usize, away: bool },
    SetManualEcoMode { thermostat: usize, enable: bool },
    SetSetpoint { thermostat: usize, temperature: f64 },
}

impl Command {
    /// Inverse of the node numbering used during reconciliation.
    pub fn route(self) -> Result<Action, SyncError> {
        match self {
            Command::Switch { node, on } if node >= 3 && (node - 3) % 3 == 0 => Ok(Action::SetAway {
                structure: ((node - 3) / 3) as usize,
                away: on,
            }),
            Command::Switch { node, on } if node >= 4 && (node - 4) % 3 == 0 => Ok(Action::SetManualEcoMode {
                thermostat: ((node - 4) / 3) as usize,
                enable: on,
            }),
            Command::Switch { node, .. } => Err(SyncError::UnknownCommand(node)),
            Command::Setpoint { node, temperature } if node >= 1 && (node - 1) % 3 == 0 => Ok(Action::SetSetpoint {
                thermostat: ((node - 1) / 3) as usize,
                temperature,
            }),
            Command::Setpoint { node, .. } => Err(SyncError::UnknownCommand(node)),
        }
    }
}

pub struct Dispatcher<'a> {
    pub client: &'a NestClient,
    pub session: &'a mut Session,
    pub index: &'a IdentifierIndex,
    /// Scale outbound setpoints are expressed in.
    pub scale: TemperatureScale,
}

impl Dispatcher<'_> {
    pub fn dispatch(&mut self, token: &str, action: Action) -> Result<(), SyncError> {
        match action {
            Action::SetAway { structure, away } => self.set_away(token, structure, away),
            Action::SetManualEcoMode { thermostat, enable } => self.set_manual_eco_mode(token, thermostat, enable),
            Action::SetSetpoint {
                thermostat,
                temperature,
            } => self.set_setpoint(token, thermostat, temperature),
        }
    }

    pub fn set_away(&mut self, token: &str, structure: usize, away: bool) -> Result<(), SyncError> {
        let record = self.index.resolve_structure(structure)?;
        let path = format!("structures/{}", record.remote_id.0);
        info!("Setting {} to {}", record.name, if away { "away" } else { "home" });
        self.push(token, &path, json!({ "away": if away { "away" } else { "home" } }), "away mode")
    }

    pub fn set_manual_eco_mode(&mut self, token: &str, thermostat: usize, enable: bool) -> Result<(), SyncError> {
        let record = self.index.resolve_thermostat(thermostat)?;
        let mode = if enable { "off" } else { record.restore_mode() };
        let path = format!("devices/thermostats/{}", record.remote_serial.0);
        info!("Setting {} hvac mode to {}", record.name, mode);
        self.push(token, &path, json!({ "hvac_mode": mode }), "manual eco mode")
    }

    pub fn set_setpoint(&mut self, token: &str, thermostat: usize, temperature: f64) -> Result<(), SyncError> {
        let record = self.index.resolve_thermostat(thermostat)?;
        let path = format!("devices/thermostats/{}", record.remote_serial.0);
        let mut body = serde_json::Map::new();
        body.insert(self.scale.target_field(), json!(temperature));
        info!(
            "Setting {} setpoint to {}°{}",
            record.name,
            temperature,
            self.scale.suffix().to_uppercase()
        );
        self.push(token, &path, Value::Object(body), "setpoint")
    }

    fn push(&mut self, token: &str, path: &str, body: Value, what: &str) -> Result<(), SyncError> {
        self.client.put_json(token, path, &body).map_err(|e| {
            error!("Error setting {}: {}", what, e);
            self.session.invalidate();
            match e {
                SyncError::Remote(_) => e,
                other => SyncError::Remote(other.to_string()),
            }
        })
    }
}

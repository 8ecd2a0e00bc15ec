//! Maps opaque remote ids to the small integer indices the synthetic device
//! keys are built from.
//!
//! Indices follow payload traversal order and the whole table is rebuilt on
//! every successful poll. Nothing ties an index to a remote id across polls:
//! if the service reorders structures or thermostats, the same index names a
//! different device after the next rebuild.

use log::warn;

use crate::error::SyncError;
use crate::models::nest::{DeviceEntry, Snapshot, StructureId, ThermostatSerial};

#[derive(Debug, Clone, PartialEq)]
pub struct StructureRecord {
    pub index: usize,
    pub name: String,
    pub remote_id: StructureId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThermostatRecord {
    pub index: usize,
    /// Display name, `"<structure> <where>"` or `"Thermostat"`.
    pub name: String,
    pub structure_id: StructureId,
    pub remote_serial: ThermostatSerial,
    pub can_heat: bool,
    pub can_cool: bool,
}

impl ThermostatRecord {
    /// HVAC mode to restore when leaving manual eco mode.
    pub fn restore_mode(&self) -> &'static str {
        match (self.can_heat, self.can_cool) {
            (true, true) => "heat-cool",
            (_, true) => "cool",
            _ => "heat",
        }
    }
}

#[derive(Debug, Default)]
pub struct IdentifierIndex {
    generation: u64,
    structures: Vec<StructureRecord>,
    thermostats: Vec<ThermostatRecord>,
}

impl IdentifierIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rebuilds so far; 0 until the first successful poll.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn structures(&self) -> &[StructureRecord] {
        &self.structures
    }

    pub fn thermostats(&self) -> &[ThermostatRecord] {
        &self.thermostats
    }

    pub fn rebuild(&mut self, snapshot: &Snapshot) {
        let mut structures = Vec::new();
        let mut thermostats = Vec::new();

        for structure in snapshot.structures() {
            let record = StructureRecord {
                index: structures.len(),
                name: structure.name.clone().unwrap_or_default(),
                remote_id: structure.structure_id.clone().unwrap_or(StructureId(String::new())),
            };

            for serial in &structure.thermostats {
                let device = match snapshot.devices.thermostat(serial) {
                    DeviceEntry::Present(device) => device,
                    DeviceEntry::Missing => {
                        warn!(
                            "Structure {} references thermostat {} but it was not found",
                            record.name, serial.0
                        );
                        continue;
                    }
                    DeviceEntry::Malformed => {
                        warn!("Thermostat {} in {} is not a JSON object; skipped", serial.0, record.name);
                        continue;
                    }
                };
                let name = match device.where_name.as_deref() {
                    Some(w) if !w.is_empty() => format!("{} {}", record.name, w),
                    _ => "Thermostat".to_string(),
                };
                thermostats.push(ThermostatRecord {
                    index: thermostats.len(),
                    name,
                    structure_id: record.remote_id.clone(),
                    remote_serial: serial.clone(),
                    can_heat: device.can_heat,
                    can_cool: device.can_cool,
                });
            }
            structures.push(record);
        }

        self.structures = structures;
        self.thermostats = thermostats;
        self.generation += 1;
    }

    pub fn resolve_structure(&self, index: usize) -> Result<&StructureRecord, SyncError> {
        self.structures
            .get(index)
            .filter(|s| !s.remote_id.0.is_empty())
            .ok_or_else(|| SyncError::NotReady(format!("structure {} has not been initialized yet", index)))
    }

    pub fn resolve_thermostat(&self, index: usize) -> Result<&ThermostatRecord, SyncError> {
        self.thermostats
            .get(index)
            .filter(|t| !t.remote_serial.0.is_empty())
            .ok_or_else(|| SyncError::NotReady(format!("thermostat {} has not been initialized yet", index)))
    }
}

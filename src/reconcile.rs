//! Derives per-device readings from a poll snapshot and publishes the ones
//! that changed.
//!
//! Node ids (the fourth byte of the host device id):
//! - structure `s`: away switch `3s + 3`
//! - thermostat `t`: setpoint `3t + 1`, temperature/humidity `3t + 2`,
//!   manual eco switch `3t + 4`, heating `113 + 3t`, cooling `114 + 3t`
//!
//! Smoke/CO alarms use the third byte instead: unit `2n + 1` for smoke and
//! `2n + 2` for CO, `n` counting named alarms in payload order.

use chrono::{DateTime, Utc};
use log::{debug, warn};

use crate::error::SyncError;
use crate::index::IdentifierIndex;
use crate::models::nest::{DeviceEntry, SmokeCoAlarm, Snapshot, Structure, Thermostat};
use crate::registry::{DeviceCategory, DeviceKey, Host, Reading, SensorKind};

pub fn away_node(structure: usize) -> u32 {
    structure as u32 * 3 + 3
}

pub fn setpoint_node(thermostat: usize) -> u32 {
    thermostat as u32 * 3 + 1
}

pub fn temp_hum_node(thermostat: usize) -> u32 {
    thermostat as u32 * 3 + 2
}

pub fn eco_node(thermostat: usize) -> u32 {
    thermostat as u32 * 3 + 4
}

pub fn heating_node(thermostat: usize) -> u32 {
    113 + thermostat as u32 * 3
}

pub fn cooling_node(thermostat: usize) -> u32 {
    114 + thermostat as u32 * 3
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub emitted: usize,
    pub unchanged: usize,
}

/// Unknown or missing alarm state counts as an active alarm.
pub fn alarm_active(state: Option<&str>) -> bool {
    state != Some("ok")
}

pub fn structure_away(structure: &Structure) -> Option<bool> {
    structure
        .away
        .as_deref()
        .filter(|a| !a.is_empty())
        .map(|a| a == "away" || a == "auto-away")
}

/// The API reports manual eco mode as hvac mode "off".
pub fn manual_eco_enabled(thermostat: &Thermostat) -> bool {
    thermostat.hvac_mode.as_deref() == Some("off")
}

struct Publisher<'a, H: Host + ?Sized> {
    host: &'a mut H,
    now: DateTime<Utc>,
    report: ReconcileReport,
}

impl<H: Host + ?Sized> Publisher<'_, H> {
    fn publish(
        &mut self,
        key: DeviceKey,
        reading: Reading,
        label: &str,
        category: Option<DeviceCategory>,
    ) -> Result<(), SyncError> {
        let previous = self.host.lookup(&key).map_err(SyncError::Storage)?;
        match previous {
            Some(prev) if prev.same_as(&reading) => {
                self.host.touch(&key, self.now).map_err(SyncError::Storage)?;
                self.report.unchanged += 1;
            }
            _ => {
                debug!("{} ({}) -> {}", label, key, reading);
                self.host
                    .emit(&key, &reading, label, self.now)
                    .map_err(SyncError::Storage)?;
                self.host
                    .store(&key, &reading, label, category, self.now)
                    .map_err(SyncError::Storage)?;
                self.report.emitted += 1;
            }
        }
        Ok(())
    }

    /// Publish under a node id; ids past the key byte are skipped.
    fn publish_node(&mut self, kind: SensorKind, node: u32, reading: Reading, label: &str) -> Result<(), SyncError> {
        match DeviceKey::node(kind, node) {
            Some(key) => self.publish(key, reading, label, None),
            None => {
                warn!("{} needs node {} which does not fit a device id; not published", label, node);
                Ok(())
            }
        }
    }

    fn alarms<'s>(&mut self, alarms: impl Iterator<Item = (&'s str, SmokeCoAlarm)>) -> Result<(), SyncError> {
        let mut unit = 1;
        for (_, alarm) in alarms {
            let Some(place) = alarm.where_name.as_deref().filter(|w| !w.is_empty()) else {
                continue;
            };
            let (Some(smoke_key), Some(co_key)) = (DeviceKey::alarm_unit(unit), DeviceKey::alarm_unit(unit + 1)) else {
                warn!("No unit left for the {} smoke/CO alarm; not published", place);
                break;
            };
            let smoke = alarm_active(alarm.smoke_alarm_state.as_deref());
            let co = alarm_active(alarm.co_alarm_state.as_deref());
            self.publish(
                smoke_key,
                Reading::Switch { on: smoke },
                &format!("{} Smoke Alarm", place),
                Some(DeviceCategory::SmokeDetector),
            )?;
            self.publish(
                co_key,
                Reading::Switch { on: co },
                &format!("{} CO Alarm", place),
                Some(DeviceCategory::SmokeDetector),
            )?;
            unit += 2;
        }
        Ok(())
    }

    fn thermostat(&mut self, index: usize, name: &str, caps: (bool, bool), device: &Thermostat) -> Result<(), SyncError> {
        let (can_heat, can_cool) = caps;
        match device.scale() {
            Some(scale) => {
                if let Some(target) = device.target_temperature(scale) {
                    self.publish_node(
                        SensorKind::Setpoint,
                        setpoint_node(index),
                        Reading::Setpoint { temperature: target },
                        &format!("{} Setpoint", name),
                    )?;
                }
                if let Some(ambient) = device.ambient_temperature(scale) {
                    let humidity = device.humidity.unwrap_or_default().round() as i32;
                    self.publish_node(
                        SensorKind::TempHum,
                        temp_hum_node(index),
                        Reading::TempHum {
                            temperature: ambient,
                            humidity,
                        },
                        &format!("{} TempHum", name),
                    )?;
                }
            }
            None => debug!("{} reports no usable temperature scale", name),
        }

        if let Some(state) = device.hvac_state.as_deref().filter(|s| !s.is_empty()) {
            if can_heat {
                self.publish_node(
                    SensorKind::Switch,
                    heating_node(index),
                    Reading::Switch { on: state == "heating" },
                    &format!("{} HeatingOn", name),
                )?;
            }
            if can_cool {
                self.publish_node(
                    SensorKind::Switch,
                    cooling_node(index),
                    Reading::Switch { on: state == "cooling" },
                    &format!("{} CoolingOn", name),
                )?;
            }
        }

        self.publish_node(
            SensorKind::Switch,
            eco_node(index),
            Reading::Switch {
                on: manual_eco_enabled(device),
            },
            &format!("{} Manual Eco Mode", name),
        )
    }
}

/// One reconciliation pass over a snapshot. `index` must have been rebuilt
/// from the same snapshot.
pub fn reconcile<H: Host + ?Sized>(
    snapshot: &Snapshot,
    index: &IdentifierIndex,
    host: &mut H,
    now: DateTime<Utc>,
) -> Result<ReconcileReport, SyncError> {
    let mut publisher = Publisher {
        host,
        now,
        report: ReconcileReport::default(),
    };

    publisher.alarms(snapshot.devices.smoke_co_alarms())?;

    for (record, structure) in index.structures().iter().zip(snapshot.structures()) {
        if let Some(away) = structure_away(&structure) {
            publisher.publish_node(
                SensorKind::Switch,
                away_node(record.index),
                Reading::Switch { on: away },
                &format!("{} Away", record.name),
            )?;
        }
    }

    for record in index.thermostats() {
        let DeviceEntry::Present(device) = snapshot.devices.thermostat(&record.remote_serial) else {
            continue;
        };
        publisher.thermostat(record.index, &record.name, (record.can_heat, record.can_cool), &device)?;
    }

    Ok(publisher.report)
}

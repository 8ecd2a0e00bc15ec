//! PostgreSQL-backed registry and sink.

use chrono::{DateTime, Utc};
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::query_builder::QueryFragment;
use diesel::query_dsl::methods::ExecuteDsl;
use diesel::PgConnection;
use log::warn;

use crate::db::models::{NewRegistryDevice, NewSensorEvent, RegistryDevice};
use crate::registry::{DeviceCategory, DeviceKey, DeviceRegistry, Reading, SensorSink};
use crate::schema;

pub struct PgStore {
    conn: PgConnection,
}

impl PgStore {
    pub fn new(conn: PgConnection) -> Self {
        PgStore { conn }
    }

    /// Devices created by earlier runs, oldest first.
    pub fn known_devices(&mut self) -> Result<Vec<RegistryDevice>, String> {
        use schema::registry_devices::dsl as R;

        R::registry_devices
            .order(R::created_at.asc())
            .select(RegistryDevice::as_select())
            .load(&mut self.conn)
            .map_err(|e| format!("load registry failed: {}", e))
    }
}

/// Insert, or on an existing key refresh the reading and timestamps.
/// Name and category stay as created.
fn upsert_device(row: &NewRegistryDevice, at: DateTime<Utc>) -> impl ExecuteDsl<PgConnection> + QueryFragment<Pg> {
    use schema::registry_devices::dsl as R;

    diesel::insert_into(R::registry_devices)
        .values(row)
        .on_conflict((R::kind, R::device_key))
        .do_update()
        .set((
            R::reading.eq(row.reading.clone()),
            R::updated_at.eq(at),
            R::last_seen.eq(at),
        ))
}

fn reading_json(reading: &Reading) -> Result<serde_json::Value, String> {
    serde_json::to_value(reading).map_err(|e| format!("encode reading failed: {}", e))
}

impl DeviceRegistry for PgStore {
    fn lookup(&mut self, key: &DeviceKey) -> Result<Option<Reading>, String> {
        use schema::registry_devices::dsl as R;

        let stored: Option<serde_json::Value> = R::registry_devices
            .filter(R::kind.eq(key.kind.as_str()).and(R::device_key.eq(&key.id)))
            .select(R::reading)
            .first(&mut self.conn)
            .optional()
            .map_err(|e| format!("lookup {} failed: {}", key, e))?;

        Ok(stored.and_then(|v| match serde_json::from_value(v) {
            Ok(reading) => Some(reading),
            Err(e) => {
                // an unreadable row is replaced by the next store
                warn!("Stored reading for {} is unreadable: {}", key, e);
                None
            }
        }))
    }

    fn touch(&mut self, key: &DeviceKey, at: DateTime<Utc>) -> Result<(), String> {
        use schema::registry_devices::dsl as R;

        diesel::update(R::registry_devices.filter(R::kind.eq(key.kind.as_str()).and(R::device_key.eq(&key.id))))
            .set(R::last_seen.eq(at))
            .execute(&mut self.conn)
            .map(|_| ())
            .map_err(|e| format!("touch {} failed: {}", key, e))
    }

    fn store(
        &mut self,
        key: &DeviceKey,
        reading: &Reading,
        label: &str,
        category: Option<DeviceCategory>,
        at: DateTime<Utc>,
    ) -> Result<(), String> {
        let row = NewRegistryDevice {
            kind: key.kind.as_str().to_string(),
            device_key: key.id.clone(),
            name: label.to_string(),
            category: category.map(|c| c.as_str().to_string()),
            reading: reading_json(reading)?,
            last_seen: at,
        };

        ExecuteDsl::execute(upsert_device(&row, at), &mut self.conn)
            .map(|_| ())
            .map_err(|e| format!("store {} failed: {}", key, e))
    }
}

impl SensorSink for PgStore {
    fn emit(&mut self, key: &DeviceKey, reading: &Reading, label: &str, at: DateTime<Utc>) -> Result<(), String> {
        use schema::sensor_events::dsl as E;

        let row = NewSensorEvent {
            time: at,
            kind: key.kind.as_str().to_string(),
            device_key: key.id.clone(),
            label: label.to_string(),
            reading: reading_json(reading)?,
        };
        diesel::insert_into(E::sensor_events)
            .values(&row)
            .execute(&mut self.conn)
            .map(|_| ())
            .map_err(|e| format!("insert event for {} failed: {}", key, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_keeps_name_and_category() {
        let at = Utc::now();
        let row = NewRegistryDevice {
            kind: "switch".into(),
            device_key: "0000100".into(),
            name: "Hall Smoke Alarm".into(),
            category: Some("smoke_detector".into()),
            reading: serde_json::json!({"type": "switch", "on": true}),
            last_seen: at,
        };
        let sql = diesel::debug_query::<Pg, _>(&upsert_device(&row, at)).to_string();

        assert!(sql.starts_with("INSERT INTO \"registry_devices\""), "{sql}");
        assert!(sql.contains("ON CONFLICT (\"kind\", \"device_key\")"), "{sql}");
        let set_list = sql
            .split("DO UPDATE SET")
            .nth(1)
            .and_then(|rest| rest.split("-- binds").next())
            .unwrap_or_default();
        for column in ["\"reading\"", "\"updated_at\"", "\"last_seen\""] {
            assert!(set_list.contains(column), "{column} missing from {set_list}");
        }
        for column in ["\"name\"", "\"category\"", "\"created_at\""] {
            assert!(!set_list.contains(column), "{column} updated in {set_list}");
        }
    }
}

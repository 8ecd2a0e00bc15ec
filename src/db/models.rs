//! Diesel model structs for the device registry and the emitted-event log.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema;

// One row per synthetic device key
#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = schema::registry_devices)]
pub struct RegistryDevice {
    pub id: i64,
    pub kind: String,
    pub device_key: String,
    pub name: String,
    pub category: Option<String>,
    pub reading: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::registry_devices)]
pub struct NewRegistryDevice {
    pub kind: String,
    pub device_key: String,
    pub name: String,
    pub category: Option<String>,
    pub reading: serde_json::Value,
    pub last_seen: DateTime<Utc>,
}

// Append-only: every emission the sink received
#[derive(Debug, Clone, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::sensor_events)]
pub struct NewSensorEvent {
    pub time: DateTime<Utc>,
    pub kind: String,
    pub device_key: String,
    pub label: String,
    pub reading: serde_json::Value,
}

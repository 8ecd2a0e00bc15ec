//! Test doubles: scripted transport, in-memory host and credential store.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::credentials::CredentialStore;
use crate::models::nest::{Devices, Snapshot};
use crate::registry::{DeviceCategory, DeviceKey, DeviceRegistry, Reading, SensorSink};
use crate::transport::{Headers, HttpResponse, Transport, TransportError};

pub fn fixture(name: &str) -> String {
    std::fs::read_to_string(format!("tests/data/{}", name)).expect("fixture present")
}

pub fn snapshot_fixture() -> Snapshot {
    let structures = match serde_json::from_str::<serde_json::Value>(&fixture("structures.json")).expect("parse structures") {
        serde_json::Value::Object(map) => map,
        other => panic!("structures fixture is not an object: {other}"),
    };
    let devices: Devices = serde_json::from_str(&fixture("devices.json")).expect("parse devices");
    Snapshot { structures, devices }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: &'static str,
    pub url: String,
    pub body: String,
    pub headers: Vec<(String, String)>,
}

impl RecordedRequest {
    pub fn has_header(&self, key: &str, value: &str) -> bool {
        self.headers.iter().any(|(k, v)| k == key && v == value)
    }
}

struct Route {
    method: &'static str,
    pattern: String,
    responses: VecDeque<Result<HttpResponse, TransportError>>,
}

#[derive(Default)]
struct MockState {
    routes: Vec<Route>,
    requests: Vec<RecordedRequest>,
}

/// Responses are matched on method plus a URL substring. Each route replays
/// its responses in order and keeps repeating the last one.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, method: &'static str, pattern: &str, response: Result<HttpResponse, TransportError>) {
        let mut state = self.state.lock().unwrap();
        match state
            .routes
            .iter_mut()
            .find(|r| r.method == method && r.pattern == pattern)
        {
            Some(route) => route.responses.push_back(response),
            None => state.routes.push(Route {
                method,
                pattern: pattern.to_string(),
                responses: VecDeque::from([response]),
            }),
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn count(&self, method: &str, pattern: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == method && r.url.contains(pattern))
            .count()
    }

    fn respond(
        &self,
        method: &'static str,
        url: &str,
        body: String,
        headers: &Headers<'_>,
    ) -> Result<HttpResponse, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(RecordedRequest {
            method,
            url: url.to_string(),
            body,
            headers: headers.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        });
        let route = state
            .routes
            .iter_mut()
            .find(|r| r.method == method && url.contains(&r.pattern));
        match route {
            Some(route) if route.responses.len() > 1 => route.responses.pop_front().unwrap(),
            Some(route) => route.responses[0].clone(),
            None => Err(TransportError::Connection(format!("no mock route for {} {}", method, url))),
        }
    }
}

impl Transport for MockTransport {
    fn get(&self, url: &str, headers: &Headers<'_>) -> Result<HttpResponse, TransportError> {
        self.respond("GET", url, String::new(), headers)
    }

    fn post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
        headers: &Headers<'_>,
    ) -> Result<HttpResponse, TransportError> {
        let body = form
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        self.respond("POST", url, body, headers)
    }

    fn put(&self, url: &str, body: &str, headers: &Headers<'_>) -> Result<HttpResponse, TransportError> {
        self.respond("PUT", url, body.to_string(), headers)
    }
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub reading: Reading,
    pub label: String,
    pub category: Option<DeviceCategory>,
    pub last_seen: DateTime<Utc>,
}

/// Registry and sink in one, like the database-backed store.
#[derive(Debug, Default)]
pub struct MemoryHost {
    pub entries: BTreeMap<DeviceKey, Entry>,
    pub emitted: Vec<(DeviceKey, Reading, String)>,
    pub touched: Vec<DeviceKey>,
}

impl MemoryHost {
    pub fn reading(&self, key: &DeviceKey) -> Option<Reading> {
        self.entries.get(key).map(|e| e.reading)
    }

    pub fn label(&self, key: &DeviceKey) -> Option<&str> {
        self.entries.get(key).map(|e| e.label.as_str())
    }

    pub fn category(&self, key: &DeviceKey) -> Option<DeviceCategory> {
        self.entries.get(key).and_then(|e| e.category)
    }
}

impl DeviceRegistry for MemoryHost {
    fn lookup(&mut self, key: &DeviceKey) -> Result<Option<Reading>, String> {
        Ok(self.reading(key))
    }

    fn touch(&mut self, key: &DeviceKey, at: DateTime<Utc>) -> Result<(), String> {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.last_seen = at;
        }
        self.touched.push(key.clone());
        Ok(())
    }

    fn store(
        &mut self,
        key: &DeviceKey,
        reading: &Reading,
        label: &str,
        category: Option<DeviceCategory>,
        at: DateTime<Utc>,
    ) -> Result<(), String> {
        self.entries
            .entry(key.clone())
            .and_modify(|e| {
                e.reading = *reading;
                e.last_seen = at;
            })
            .or_insert_with(|| Entry {
                reading: *reading,
                label: label.to_string(),
                category,
                last_seen: at,
            });
        Ok(())
    }
}

impl SensorSink for MemoryHost {
    fn emit(&mut self, key: &DeviceKey, reading: &Reading, label: &str, _at: DateTime<Utc>) -> Result<(), String> {
        self.emitted.push((key.clone(), *reading, label.to_string()));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryCredentials {
    pub tokens: Vec<String>,
}

impl CredentialStore for MemoryCredentials {
    fn persist_token(&mut self, token: &str) -> Result<(), String> {
        self.tokens.push(token.to_string());
        Ok(())
    }
}

//! HTTP client for the Nest developer API.
//!
//! - Blocking, on top of an injected `Transport`.
//! - Reads authenticate with the `auth` query parameter, writes with a bearer
//!   header.
//! - No retries here: a failed call is reported once and the caller decides
//!   when to try again.

use log::{debug, warn};
use serde_json::{Map, Value};

use crate::error::SyncError;
use crate::models::nest::{Devices, Snapshot};
use crate::session::Provisioning;
use crate::transport::{HttpResponse, Transport};

pub const DEFAULT_API_BASE: &str = "https://developer-api.nest.com/";
pub const DEFAULT_TOKEN_URL: &str = "https://api.home.nest.com/oauth2/access_token";

pub struct NestClient {
    transport: Box<dyn Transport>,
    api_base: String,
    token_url: String,
}

impl NestClient {
    pub fn new(transport: Box<dyn Transport>, api_base: &str, token_url: &str) -> Self {
        let api_base = if api_base.ends_with('/') {
            api_base.to_string()
        } else {
            format!("{}/", api_base)
        };
        NestClient {
            transport,
            api_base,
            token_url: token_url.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path.trim_start_matches('/'))
    }

    fn read_url(&self, path: &str, token: &str) -> String {
        format!("{}?auth={}", self.url(path), token)
    }

    /// Exchange the PIN code for an access token (`authorization_code` grant).
    pub fn exchange_pin(&self, provisioning: &Provisioning) -> Result<String, SyncError> {
        let form = [
            ("code", provisioning.pin_code.trim()),
            ("client_id", provisioning.product_id.trim()),
            ("client_secret", provisioning.product_secret.trim()),
            ("grant_type", "authorization_code"),
        ];
        debug!("POST {} (authorization_code grant)", self.token_url);
        let resp = self
            .transport
            .post_form(&self.token_url, &form, &[])
            .map_err(|e| SyncError::Auth(format!("token request failed: {}", e)))?;
        if !resp.is_success() {
            return Err(SyncError::Auth(format!(
                "token request rejected with http {}: {}",
                resp.status.as_u16(),
                resp.body
            )));
        }
        if resp.body.trim().is_empty() {
            return Err(SyncError::Auth("empty response from token endpoint".to_string()));
        }

        let root = parse_object(&resp.body).map_err(|e| SyncError::Auth(format!("token response: {}", e)))?;
        match root.get("access_token").and_then(Value::as_str) {
            Some(token) if !token.is_empty() => Ok(token.to_string()),
            _ => Err(SyncError::Auth("token response carries no access_token".to_string())),
        }
    }

    /// Cheap authenticated read used to check a token: the first structure
    /// must come back with a name.
    pub fn validate_token(&self, token: &str) -> Result<(), SyncError> {
        let resp = self
            .transport
            .get(&self.read_url("structures.json", token), &[])
            .map_err(|e| SyncError::Auth(format!("validation request failed: {}", e)))?;
        if !resp.is_success() || resp.body.trim().is_empty() {
            return Err(SyncError::Auth(format!(
                "validation got http {} with {} byte body",
                resp.status.as_u16(),
                resp.body.len()
            )));
        }
        let root = parse_object(&resp.body).map_err(|e| SyncError::Auth(format!("validation response: {}", e)))?;
        let first_named = root
            .values()
            .next()
            .and_then(|s| s.get("name"))
            .and_then(Value::as_str)
            .is_some_and(|name| !name.is_empty());
        if first_named {
            Ok(())
        } else {
            Err(SyncError::Auth("first structure has no name".to_string()))
        }
    }

    fn get_object(&self, path: &str, token: &str) -> Result<Map<String, Value>, SyncError> {
        let resp = self
            .transport
            .get(&self.read_url(path, token), &[])
            .map_err(|e| SyncError::Network(format!("GET {} failed: {}", path, e)))?;
        check_read(path, &resp)?;
        parse_map(&resp.body).map_err(|e| SyncError::Data(format!("{}: {}", path, e)))
    }

    pub fn fetch_structures(&self, token: &str) -> Result<Map<String, Value>, SyncError> {
        self.get_object("structures.json", token)
    }

    pub fn fetch_devices(&self, token: &str) -> Result<Devices, SyncError> {
        let root = self.get_object("devices.json", token)?;
        serde_path_to_error::deserialize(Value::Object(root))
            .map_err(|e| SyncError::Data(format!("devices.json invalid at {}: {}", e.path(), e.inner())))
    }

    /// Both reads. A poll without any thermostat and without any alarm is
    /// treated as a failed poll.
    pub fn fetch_all(&self, token: &str) -> Result<Snapshot, SyncError> {
        let structures = self.fetch_structures(token)?;
        let devices = self.fetch_devices(token)?;
        if devices.thermostats.is_empty() && devices.smoke_co_alarms.is_empty() {
            return Err(SyncError::Data(
                "no thermostat or smoke/CO alarm received".to_string(),
            ));
        }
        debug!(
            "Fetched {} structure(s), {} thermostat(s), {} alarm(s)",
            structures.len(),
            devices.thermostats.len(),
            devices.smoke_co_alarms.len()
        );
        Ok(Snapshot { structures, devices })
    }

    /// Single-field update on a structure or device.
    pub fn put_json(&self, token: &str, path: &str, body: &Value) -> Result<(), SyncError> {
        let bearer = format!("Bearer {}", token);
        let headers = [
            ("Authorization", bearer.as_str()),
            ("Content-Type", "application/json"),
        ];
        let payload = body.to_string();
        debug!("PUT {} {}", path, payload);
        let resp = self
            .transport
            .put(&self.url(path), &payload, &headers)
            .map_err(|e| SyncError::Remote(format!("PUT {} failed: {}", path, e)))?;
        if !resp.is_success() {
            warn!("PUT {} rejected: {}", path, resp.body);
            return Err(SyncError::Remote(format!(
                "PUT {} rejected with http {}",
                path,
                resp.status.as_u16()
            )));
        }
        Ok(())
    }
}

fn check_read(path: &str, resp: &HttpResponse) -> Result<(), SyncError> {
    if !resp.is_success() {
        return Err(SyncError::Network(format!(
            "GET {} returned http {}",
            path,
            resp.status.as_u16()
        )));
    }
    if resp.body.trim().is_empty() {
        return Err(SyncError::Data(format!("GET {} returned an empty body", path)));
    }
    Ok(())
}

/// Parse a body that must be a JSON object, possibly without members.
fn parse_map(body: &str) -> Result<Map<String, Value>, String> {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err("not a JSON object".to_string()),
        Err(e) => Err(format!("unparseable JSON: {}", e)),
    }
}

/// Like `parse_map`, for token responses that must carry members.
fn parse_object(body: &str) -> Result<Map<String, Value>, String> {
    let map = parse_map(body)?;
    if map.is_empty() {
        return Err("object has no members".to_string());
    }
    Ok(map)
}

//! One account's sync state: session, identifier index and host handle, with
//! the poll and command entry points the worker drives.

use chrono::Utc;
use log::{error, info, warn};

use crate::auth;
use crate::client::NestClient;
use crate::credentials::CredentialStore;
use crate::dispatch::{Command, Dispatcher};
use crate::error::SyncError;
use crate::index::IdentifierIndex;
use crate::models::nest::TemperatureScale;
use crate::reconcile::{self, ReconcileReport};
use crate::registry::Host;
use crate::session::Session;

pub struct SyncEngine<H: Host> {
    client: NestClient,
    session: Session,
    index: IdentifierIndex,
    host: H,
    credentials: Box<dyn CredentialStore>,
    setpoint_scale: TemperatureScale,
}

impl<H: Host> SyncEngine<H> {
    pub fn new(
        client: NestClient,
        session: Session,
        host: H,
        credentials: Box<dyn CredentialStore>,
        setpoint_scale: TemperatureScale,
    ) -> Self {
        SyncEngine {
            client,
            session,
            index: IdentifierIndex::new(),
            host,
            credentials,
            setpoint_scale,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn index(&self) -> &IdentifierIndex {
        &self.index
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// New credentials from outside replace the current token and force a
    /// validation before the next remote call.
    pub fn push_token(&mut self, token: String) {
        info!("Access token replaced; it will be validated on next use");
        self.session.replace_token(token);
    }

    /// One reconciliation pass: login if needed, fetch, rebuild, reconcile.
    pub fn poll(&mut self) -> Result<ReconcileReport, SyncError> {
        let token = auth::ensure_session(&mut self.session, &self.client, self.credentials.as_mut())?;

        let snapshot = match self.client.fetch_all(&token) {
            Ok(s) => s,
            Err(e) => {
                error!("Poll failed, forcing login on next cycle: {}", e);
                self.session.invalidate();
                return Err(e);
            }
        };

        self.index.rebuild(&snapshot);
        let report = reconcile::reconcile(&snapshot, &self.index, &mut self.host, Utc::now())?;
        info!(
            "Poll complete (structures={}, thermostats={}, emitted={}, unchanged={})",
            self.index.structures().len(),
            self.index.thermostats().len(),
            report.emitted,
            report.unchanged
        );
        Ok(report)
    }

    /// Push a command upstream, then refresh state right away.
    pub fn execute(&mut self, command: Command) -> Result<(), SyncError> {
        let action = command.route()?;
        let token = auth::ensure_session(&mut self.session, &self.client, self.credentials.as_mut())?;

        let mut dispatcher = Dispatcher {
            client: &self.client,
            session: &mut self.session,
            index: &self.index,
            scale: self.setpoint_scale,
        };
        dispatcher.dispatch(&token, action)?;

        if let Err(e) = self.poll() {
            warn!("Refresh after {:?} failed: {}", command, e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{DeviceKey, Reading, SensorKind};
    use crate::session::{Provisioning, SessionState};
    use crate::testing::{fixture, MemoryCredentials, MemoryHost, MockTransport};
    use crate::transport::{HttpResponse, TransportError};

    fn engine(mock: &MockTransport, session: Session) -> SyncEngine<MemoryHost> {
        let client = NestClient::new(Box::new(mock.clone()), "https://nest.test/", "https://auth.test/token");
        SyncEngine::new(
            client,
            session,
            MemoryHost::default(),
            Box::new(MemoryCredentials::default()),
            TemperatureScale::Celsius,
        )
    }

    fn serve_fixtures(mock: &MockTransport) {
        mock.on("GET", "structures.json", Ok(HttpResponse::ok(fixture("structures.json"))));
        mock.on("GET", "devices.json", Ok(HttpResponse::ok(fixture("devices.json"))));
    }

    #[test]
    fn provisioning_to_first_poll() {
        let mock = MockTransport::new();
        mock.on("POST", "auth.test/token", Ok(HttpResponse::ok(r#"{"access_token":"abc123"}"#)));
        serve_fixtures(&mock);
        let mut engine = engine(&mock, Session::new(None, Some(Provisioning::new("id", "secret", "1234"))));

        let report = engine.poll().unwrap();
        assert!(report.emitted > 0);
        assert_eq!(engine.session().state(), SessionState::Valid);
        assert_eq!(engine.session().access_token(), Some("abc123"));
        assert_eq!(engine.index().generation(), 1);

        let urls: Vec<_> = mock.requests().into_iter().map(|r| r.url).collect();
        assert_eq!(
            urls,
            vec![
                "https://auth.test/token",
                "https://nest.test/structures.json?auth=abc123",
                "https://nest.test/structures.json?auth=abc123",
                "https://nest.test/devices.json?auth=abc123",
            ]
        );
    }

    #[test]
    fn empty_collections_force_login() {
        let mock = MockTransport::new();
        mock.on("GET", "structures.json", Ok(HttpResponse::ok(fixture("structures.json"))));
        mock.on(
            "GET",
            "devices.json",
            Ok(HttpResponse::ok(r#"{"thermostats":{},"smoke_co_alarms":{}}"#)),
        );
        let mut engine = engine(&mock, Session::new(Some("tok".into()), None));

        assert!(matches!(engine.poll(), Err(SyncError::Data(_))));
        assert!(engine.session().needs_login());
        assert_eq!(engine.index().generation(), 0);
        assert!(engine.host().emitted.is_empty());
    }

    #[test]
    fn alarms_sync_without_any_structure() {
        let mock = MockTransport::new();
        // validation sees a named structure, the poll itself an empty object
        mock.on("GET", "structures.json", Ok(HttpResponse::ok(r#"{"S1":{"name":"Home"}}"#)));
        mock.on("GET", "structures.json", Ok(HttpResponse::ok("{}")));
        mock.on(
            "GET",
            "devices.json",
            Ok(HttpResponse::ok(
                r#"{"smoke_co_alarms":{"P1":{"where_name":"Hall","smoke_alarm_state":"emergency","co_alarm_state":"ok"}}}"#,
            )),
        );
        let mut engine = engine(&mock, Session::new(Some("tok".into()), None));

        let report = engine.poll().unwrap();
        assert_eq!(report.emitted, 2);
        assert_eq!(engine.session().state(), SessionState::Valid);
        assert!(engine.index().structures().is_empty());
        assert_eq!(
            engine.host().reading(&DeviceKey::alarm_unit(1).unwrap()),
            Some(Reading::Switch { on: true })
        );
        assert_eq!(
            engine.host().reading(&DeviceKey::alarm_unit(2).unwrap()),
            Some(Reading::Switch { on: false })
        );
    }

    #[test]
    fn network_failure_revalidates_next_cycle() {
        let mock = MockTransport::new();
        mock.on("GET", "structures.json", Ok(HttpResponse::ok(fixture("structures.json"))));
        mock.on("GET", "devices.json", Err(TransportError::Connection("timeout".into())));
        mock.on("GET", "devices.json", Ok(HttpResponse::ok(fixture("devices.json"))));
        let mut engine = engine(&mock, Session::new(Some("tok".into()), None));

        assert!(matches!(engine.poll(), Err(SyncError::Network(_))));
        assert_eq!(engine.session().state(), SessionState::Invalid);

        engine.poll().unwrap();
        // validation, structures, devices (failed), validation, structures, devices
        assert_eq!(mock.count("GET", "structures.json"), 4);
        assert_eq!(mock.count("GET", "devices.json"), 2);
    }

    #[test]
    fn setpoint_command_writes_then_refreshes() {
        let mock = MockTransport::new();
        serve_fixtures(&mock);
        mock.on("PUT", "devices/thermostats/T-living", Ok(HttpResponse::ok("{}")));
        let mut engine = engine(&mock, Session::new(Some("tok".into()), None));
        engine.poll().unwrap();
        let before = mock.requests().len();

        engine
            .execute(Command::Setpoint {
                node: 1,
                temperature: 21.5,
            })
            .unwrap();

        let after: Vec<_> = mock.requests().split_off(before);
        assert_eq!(after.len(), 3);
        assert_eq!(after[0].method, "PUT");
        assert_eq!(after[0].url, "https://nest.test/devices/thermostats/T-living");
        assert_eq!(after[0].body, r#"{"target_temperature_c":21.5}"#);
        assert!(after[0].has_header("Authorization", "Bearer tok"));
        assert!(after[1].url.contains("structures.json"));
        assert!(after[2].url.contains("devices.json"));
        assert_eq!(engine.index().generation(), 2);
    }

    #[test]
    fn command_before_first_poll_is_not_ready() {
        let mock = MockTransport::new();
        serve_fixtures(&mock);
        let mut engine = engine(&mock, Session::new(Some("tok".into()), None));

        let err = engine.execute(Command::Switch { node: 3, on: true }).unwrap_err();
        assert!(matches!(err, SyncError::NotReady(_)));
        assert_eq!(mock.count("PUT", ""), 0);
        assert_eq!(engine.session().state(), SessionState::Valid);
    }

    #[test]
    fn unknown_command_touches_nothing() {
        let mock = MockTransport::new();
        let mut engine = engine(&mock, Session::new(Some("tok".into()), None));
        assert_eq!(
            engine.execute(Command::Switch { node: 5, on: true }),
            Err(SyncError::UnknownCommand(5))
        );
        assert!(mock.requests().is_empty());
    }

    #[test]
    fn failed_command_forces_login() {
        let mock = MockTransport::new();
        serve_fixtures(&mock);
        mock.on("PUT", "structures/S-home", Ok(HttpResponse::new(http::StatusCode::UNAUTHORIZED, "")));
        let mut engine = engine(&mock, Session::new(Some("tok".into()), None));
        engine.poll().unwrap();

        let err = engine.execute(Command::Switch { node: 3, on: true }).unwrap_err();
        assert!(matches!(err, SyncError::Remote(_)));
        assert!(engine.session().needs_login());
    }

    #[test]
    fn repeated_polls_emit_once() {
        let mock = MockTransport::new();
        serve_fixtures(&mock);
        let mut engine = engine(&mock, Session::new(Some("tok".into()), None));
        let first = engine.poll().unwrap();
        let second = engine.poll().unwrap();
        assert_eq!(second.emitted, 0);
        assert_eq!(second.unchanged, first.emitted);
        assert_eq!(
            engine.host().reading(&DeviceKey::node(SensorKind::Switch, 3).unwrap()),
            Some(Reading::Switch { on: false })
        );
    }

    #[test]
    fn pushed_token_is_validated_before_use() {
        let mock = MockTransport::new();
        serve_fixtures(&mock);
        let mut engine = engine(&mock, Session::new(Some("old".into()), None));
        engine.poll().unwrap();

        engine.push_token("new".into());
        assert_eq!(engine.session().state(), SessionState::Invalid);
        engine.poll().unwrap();
        assert_eq!(mock.count("GET", "structures.json?auth=new"), 2);
    }
}

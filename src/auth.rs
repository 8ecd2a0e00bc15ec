//! Token lifecycle: first-token acquisition from provisioning secrets, token
//! validation and the login state transitions around them.

use log::{error, info, warn};

use crate::client::NestClient;
use crate::credentials::CredentialStore;
use crate::error::SyncError;
use crate::session::{token_hint, Provisioning, Session, SessionState};

/// Exchange provisioning secrets for an access token. Refuses to run when a
/// token already exists or when any secret is empty. The caller persists the
/// returned token.
pub fn fetch_token(
    client: &NestClient,
    current_token: Option<&str>,
    provisioning: &Provisioning,
) -> Result<String, SyncError> {
    if current_token.is_some() {
        return Err(SyncError::Config(
            "an access token is already configured; not fetching a new one".to_string(),
        ));
    }
    if !provisioning.is_complete() {
        return Err(SyncError::Config(
            "product id, product secret and PIN code are all required to obtain a token".to_string(),
        ));
    }
    info!("Requesting access token for product {}", provisioning.product_id.trim());
    client.exchange_pin(provisioning)
}

/// Make sure the session holds a validated token and return it.
///
/// Cheap once the session is valid: no network call is made until something
/// invalidates it again.
pub fn ensure_session(
    session: &mut Session,
    client: &NestClient,
    store: &mut dyn CredentialStore,
) -> Result<String, SyncError> {
    if session.state() == SessionState::Valid
        && let Some(token) = session.access_token()
    {
        return Ok(token.to_string());
    }

    if session.access_token().is_none() {
        match session.provisioning().filter(|p| p.is_complete()).cloned() {
            Some(provisioning) => match fetch_token(client, None, &provisioning) {
                Ok(token) => {
                    info!("Received access token {}", token_hint(&token));
                    if let Err(e) = store.persist_token(&token) {
                        warn!("Access token could not be persisted: {}", e);
                    }
                    session.install_fetched_token(token);
                }
                Err(e) => {
                    error!("Error retrieving access token: {}", e);
                    // never retry a PIN exchange that failed once
                    session.discard_provisioning();
                    return Err(SyncError::Auth(format!("token acquisition failed: {}", e)));
                }
            },
            None => {
                if session.provisioning().is_some() {
                    warn!("Access token missing and provisioning is incomplete; not requesting a token");
                }
            }
        }
    }

    let Some(token) = session.access_token().map(str::to_string) else {
        session.discard_provisioning();
        return Err(SyncError::Auth(
            "access token was not supplied and could not be fetched".to_string(),
        ));
    };

    match client.validate_token(&token) {
        Ok(()) => {
            session.mark_valid();
            info!("Login success, token {} validated", token_hint(&token));
            Ok(token)
        }
        Err(e) => {
            session.invalidate();
            error!("Login failed: {}", e);
            Err(e)
        }
    }
}

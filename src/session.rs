//! Session state owned by the sync engine: access token, login state and the
//! one-time provisioning secrets used to obtain a first token.

use std::fmt;

/// Product id, product secret and PIN code from the developer console.
/// Only ever used once, to exchange the PIN for an access token.
#[derive(Clone, PartialEq, Eq)]
pub struct Provisioning {
    pub product_id: String,
    pub product_secret: String,
    pub pin_code: String,
}

impl Provisioning {
    pub fn new(product_id: impl Into<String>, product_secret: impl Into<String>, pin_code: impl Into<String>) -> Self {
        Provisioning {
            product_id: product_id.into(),
            product_secret: product_secret.into(),
            pin_code: pin_code.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        [&self.product_id, &self.product_secret, &self.pin_code]
            .iter()
            .all(|s| !s.trim().is_empty())
    }
}

impl fmt::Debug for Provisioning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provisioning")
            .field("product_id", &self.product_id)
            .field("product_secret", &"<redacted>")
            .field("pin_code", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SessionState {
    NoToken,
    /// Token obtained or configured but never checked against the API.
    NeedsValidation,
    Valid,
    /// Token present but a remote failure forced a re-login.
    Invalid,
}

#[derive(Debug)]
pub struct Session {
    access_token: Option<String>,
    state: SessionState,
    provisioning: Option<Provisioning>,
}

impl Session {
    pub fn new(access_token: Option<String>, provisioning: Option<Provisioning>) -> Self {
        let access_token = access_token.filter(|t| !t.trim().is_empty());
        let state = if access_token.is_some() {
            SessionState::NeedsValidation
        } else {
            SessionState::NoToken
        };
        Session {
            access_token,
            state,
            provisioning,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn needs_login(&self) -> bool {
        self.state != SessionState::Valid
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    pub fn provisioning(&self) -> Option<&Provisioning> {
        self.provisioning.as_ref()
    }

    /// Drop the provisioning secrets for good.
    pub fn discard_provisioning(&mut self) {
        self.provisioning = None;
    }

    /// Store a token obtained through the PIN exchange. The secrets are
    /// discarded since the token is the durable credential from now on.
    pub fn install_fetched_token(&mut self, token: String) {
        self.access_token = Some(token);
        self.provisioning = None;
        self.state = SessionState::NeedsValidation;
    }

    /// New credentials pushed in from outside; they must be validated again.
    pub fn replace_token(&mut self, token: String) {
        if token.trim().is_empty() {
            self.access_token = None;
            self.state = SessionState::NoToken;
        } else {
            self.access_token = Some(token);
            self.state = SessionState::Invalid;
        }
    }

    pub fn mark_valid(&mut self) {
        if self.access_token.is_some() {
            self.state = SessionState::Valid;
        }
    }

    /// Force a login on the next opportunity.
    pub fn invalidate(&mut self) {
        self.state = if self.access_token.is_some() {
            SessionState::Invalid
        } else {
            SessionState::NoToken
        };
    }
}

/// Abbreviated token for log lines.
pub fn token_hint(token: &str) -> String {
    let prefix: String = token.chars().take(6).collect();
    format!("{}…", prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_token_means_no_token() {
        let s = Session::new(Some("  ".into()), None);
        assert_eq!(s.state(), SessionState::NoToken);
        assert!(s.needs_login());
        assert_eq!(s.access_token(), None);
    }

    #[test]
    fn configured_token_needs_validation() {
        let mut s = Session::new(Some("tok".into()), None);
        assert_eq!(s.state(), SessionState::NeedsValidation);
        s.mark_valid();
        assert!(!s.needs_login());
        s.invalidate();
        assert_eq!(s.state(), SessionState::Invalid);
        assert!(s.needs_login());
    }

    #[test]
    fn fetched_token_replaces_provisioning() {
        let mut s = Session::new(None, Some(Provisioning::new("id", "secret", "1234")));
        s.install_fetched_token("abc123".into());
        assert_eq!(s.state(), SessionState::NeedsValidation);
        assert!(s.provisioning().is_none());
        assert_eq!(s.access_token(), Some("abc123"));
    }

    #[test]
    fn mark_valid_requires_a_token() {
        let mut s = Session::new(None, None);
        s.mark_valid();
        assert_eq!(s.state(), SessionState::NoToken);
        s.invalidate();
        assert_eq!(s.state(), SessionState::NoToken);
    }

    #[test]
    fn pushed_token_forces_revalidation() {
        let mut s = Session::new(Some("old".into()), None);
        s.mark_valid();
        s.replace_token("new".into());
        assert_eq!(s.state(), SessionState::Invalid);
        assert_eq!(s.access_token(), Some("new"));
        s.replace_token(String::new());
        assert_eq!(s.state(), SessionState::NoToken);
    }

    #[test]
    fn incomplete_provisioning_is_detected() {
        assert!(Provisioning::new("a", "b", "c").is_complete());
        assert!(!Provisioning::new("a", " ", "c").is_complete());
        let dbg = format!("{:?}", Provisioning::new("a", "secret", "pin"));
        assert!(!dbg.contains("\"secret\""));
        assert!(!dbg.contains("\"pin\""));
    }
}

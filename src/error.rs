//! Error taxonomy shared by the session manager, the fetcher and the dispatcher.

use core::fmt;
use std::error::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum SyncError {
    /// Bad or missing provisioning input. Never retried.
    Config(String),
    /// Token missing, rejected or not obtainable.
    Auth(String),
    /// Transport failure or non-success status on a read.
    Network(String),
    /// Empty, unparseable or structurally empty response.
    Data(String),
    /// Command addressed an index no poll has populated yet.
    NotReady(String),
    /// A write call failed.
    Remote(String),
    /// Inbound instruction does not map to any command.
    UnknownCommand(u32),
    /// Registry or sink failure on the local side.
    Storage(String),
}

impl SyncError {
    /// Whether this failure must force a fresh login on the next opportunity.
    pub fn forces_login(&self) -> bool {
        matches!(
            self,
            SyncError::Auth(_) | SyncError::Network(_) | SyncError::Data(_) | SyncError::Remote(_)
        )
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::Config(s) => write!(f, "config error: {}", s),
            SyncError::Auth(s) => write!(f, "auth error: {}", s),
            SyncError::Network(s) => write!(f, "network error: {}", s),
            SyncError::Data(s) => write!(f, "data error: {}", s),
            SyncError::NotReady(s) => write!(f, "not ready: {}", s),
            SyncError::Remote(s) => write!(f, "remote error: {}", s),
            SyncError::UnknownCommand(node) => write!(f, "no command mapped to node {}", node),
            SyncError::Storage(s) => write!(f, "storage error: {}", s),
        }
    }
}

impl Error for SyncError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_remote_side_failures_force_login() {
        assert!(SyncError::Auth("x".into()).forces_login());
        assert!(SyncError::Network("x".into()).forces_login());
        assert!(SyncError::Data("x".into()).forces_login());
        assert!(SyncError::Remote("x".into()).forces_login());
        assert!(!SyncError::Config("x".into()).forces_login());
        assert!(!SyncError::NotReady("x".into()).forces_login());
        assert!(!SyncError::UnknownCommand(5).forces_login());
        assert!(!SyncError::Storage("x".into()).forces_login());
    }
}

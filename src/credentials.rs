//! Durable credential surface: once a token has been obtained it replaces the
//! provisioning secrets as the credential read at the next start.

use log::info;
use std::fs;
use std::path::PathBuf;

pub trait CredentialStore: Send {
    fn persist_token(&mut self, token: &str) -> Result<(), String>;
}

/// Stores the token in a plain file, read back by `Config::from_env`.
#[derive(Debug, Clone)]
pub struct TokenFile {
    path: PathBuf,
}

impl TokenFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        TokenFile { path: path.into() }
    }

    pub fn read(&self) -> Option<String> {
        match fs::read_to_string(&self.path) {
            Ok(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        }
    }
}

impl CredentialStore for TokenFile {
    fn persist_token(&mut self, token: &str) -> Result<(), String> {
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, format!("{}\n", token)).map_err(|e| format!("writing {} failed: {}", tmp.display(), e))?;
        fs::rename(&tmp, &self.path).map_err(|e| format!("replacing {} failed: {}", self.path.display(), e))?;
        info!("Access token stored in {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_file_round_trips() {
        let dir = std::env::temp_dir().join(format!("nest-bridge-token-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let mut store = TokenFile::new(dir.join("token.txt"));
        assert_eq!(store.read(), None);
        store.persist_token("abc123").unwrap();
        assert_eq!(store.read().as_deref(), Some("abc123"));
        fs::remove_dir_all(&dir).unwrap();
    }
}

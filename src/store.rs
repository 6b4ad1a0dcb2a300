//! Credential and server-address collaborators.
//!
//! The transport reads both at every connection attempt, so a token change or a
//! new server address takes effect on the next connect or reconnect.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, info};

use crate::{Result, StreamError};

/// Server address used when nothing has been configured
pub const DEFAULT_SERVER_URL: &str = "wss://example.ngrok-free.app/ws";

/// Source of the auth token appended to the connection URL
pub trait CredentialStore: Send + Sync + 'static {
    /// Current token; `None` when logged out
    fn token(&self) -> Option<String>;
}

/// Source of the server base URL
pub trait ServerConfigStore: Send + Sync + 'static {
    fn base_url(&self) -> String;

    /// Replace the base URL. Surrounding whitespace is trimmed.
    fn set_base_url(&self, url: &str) -> Result<()>;
}

/// In-process token holder
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    token: RwLock<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: RwLock::new(Some(token.into())) }
    }

    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(token.into());
    }

    /// Forget the token (logout)
    pub fn clear(&self) {
        *self.token.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .filter(|token| !token.trim().is_empty())
    }
}

/// In-process server address
#[derive(Debug)]
pub struct MemoryServerConfig {
    url: RwLock<String>,
}

impl MemoryServerConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: RwLock::new(url.into().trim().to_owned()) }
    }
}

impl Default for MemoryServerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_SERVER_URL)
    }
}

impl ServerConfigStore for MemoryServerConfig {
    fn base_url(&self) -> String {
        self.url.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    fn set_base_url(&self, url: &str) -> Result<()> {
        let url = validate_url(url)?;
        *self.url.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = url;
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ServerDocument {
    base_url: String,
}

/// Server address persisted as a small YAML document
#[derive(Debug)]
pub struct FileServerConfig {
    path: PathBuf,
    url: RwLock<String>,
}

impl FileServerConfig {
    /// Load from `path`, falling back to [`DEFAULT_SERVER_URL`] if the file does not exist
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let url = match std::fs::read_to_string(&path) {
            Ok(text) => {
                let document: ServerDocument = serde_yaml_ng::from_str(&text).map_err(|e| {
                    StreamError::config_error(path.display().to_string(), e.to_string())
                })?;
                validate_url(&document.base_url)?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No server config on disk, using default");
                DEFAULT_SERVER_URL.to_owned()
            }
            Err(e) => return Err(StreamError::store_error(path, e)),
        };

        Ok(Self { path, url: RwLock::new(url) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ServerConfigStore for FileServerConfig {
    fn base_url(&self) -> String {
        self.url.read().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    fn set_base_url(&self, url: &str) -> Result<()> {
        let url = validate_url(url)?;
        let document = serde_yaml_ng::to_string(&ServerDocument { base_url: url.clone() })
            .map_err(|e| StreamError::config_error("server config", e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StreamError::store_error(parent.to_path_buf(), e))?;
        }
        std::fs::write(&self.path, document).map_err(|e| StreamError::store_error(self.path.clone(), e))?;

        info!(path = %self.path.display(), "Server URL saved");
        *self.url.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = url;
        Ok(())
    }
}

fn validate_url(url: &str) -> Result<String> {
    let url = url.trim();
    if !(url.starts_with("ws://") || url.starts_with("wss://")) {
        return Err(StreamError::config_error("server url", format!("'{}' is not a ws:// or wss:// URL", url)));
    }
    Ok(url.to_owned())
}

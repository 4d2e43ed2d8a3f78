use crate::http::HttpEndpoint;
use crate::{Connector, Endpoint, RemoteError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_REMOTE: &str = "local";
pub const DEFAULT_URL: &str = "https://127.0.0.1:8443";

/// Connection settings for one named endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RemoteConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// PEM certificate of the endpoint, forwarded as its identity when it is
    /// the source of a migration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<PathBuf>,
}

impl RemoteConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.trim_end_matches('/').to_owned(),
            auth_token: None,
            certificate: None,
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_owned());
        self
    }

    #[must_use]
    pub fn with_certificate(mut self, path: &Path) -> Self {
        self.certificate = Some(path.to_path_buf());
        self
    }
}

/// Client configuration: the known remotes and which one is the default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClientConfig {
    pub default_remote: String,
    #[serde(default)]
    pub remotes: BTreeMap<String, RemoteConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let mut remotes = BTreeMap::new();
        remotes.insert(DEFAULT_REMOTE.to_owned(), RemoteConfig::new(DEFAULT_URL));
        Self {
            default_remote: DEFAULT_REMOTE.to_owned(),
            remotes,
        }
    }
}

impl ClientConfig {
    /// Load config from `~/.config/ferry/config.toml`, or the defaults if absent.
    pub fn load_default() -> Result<Self, RemoteError> {
        let path = default_config_path()?;
        Self::load_or_default(&path)
    }

    pub fn load_or_default(path: &Path) -> Result<Self, RemoteError> {
        if !path.exists() {
            debug!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn load(path: &Path) -> Result<Self, RemoteError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| RemoteError::Config(format!("invalid config {}: {e}", path.display())))?;
        if !config.remotes.contains_key(&config.default_remote) {
            return Err(RemoteError::Config(format!(
                "default remote '{}' is not defined",
                config.default_remote
            )));
        }
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), RemoteError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| RemoteError::Serialization(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn remote(&self, name: &str) -> Result<&RemoteConfig, RemoteError> {
        self.remotes
            .get(name)
            .ok_or_else(|| RemoteError::Config(format!("unknown remote '{name}'")))
    }

    pub fn add_remote(&mut self, name: &str, remote: RemoteConfig) -> Result<(), RemoteError> {
        if name.is_empty() || name.contains(crate::entity::REMOTE_DELIMITER) {
            return Err(RemoteError::Config(format!("invalid remote name '{name}'")));
        }
        if self.remotes.contains_key(name) {
            return Err(RemoteError::Config(format!("remote '{name}' already exists")));
        }
        self.remotes.insert(name.to_owned(), remote);
        Ok(())
    }

    pub fn remove_remote(&mut self, name: &str) -> Result<RemoteConfig, RemoteError> {
        if name == self.default_remote {
            return Err(RemoteError::Config(format!(
                "cannot remove the default remote '{name}'"
            )));
        }
        self.remotes
            .remove(name)
            .ok_or_else(|| RemoteError::Config(format!("unknown remote '{name}'")))
    }

    pub fn set_default(&mut self, name: &str) -> Result<(), RemoteError> {
        self.remote(name)?;
        name.clone_into(&mut self.default_remote);
        Ok(())
    }
}

impl Connector for ClientConfig {
    fn default_remote(&self) -> &str {
        &self.default_remote
    }

    fn connect(&self, remote: &str) -> Result<Arc<dyn Endpoint>, RemoteError> {
        let config = self.remote(remote)?;
        debug!("connecting to remote '{remote}' at {}", config.url);
        Ok(Arc::new(HttpEndpoint::connect(remote, config.clone())?))
    }
}

pub fn default_config_path() -> Result<PathBuf, RemoteError> {
    let home = std::env::var("HOME").map_err(|_| RemoteError::Config("HOME not set".to_owned()))?;
    Ok(PathBuf::from(home).join(".config/ferry/config.toml"))
}

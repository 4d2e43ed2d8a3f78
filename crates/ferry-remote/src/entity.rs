use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Separates a container name from a snapshot name: `c1/snap0`.
pub const SNAPSHOT_DELIMITER: char = '/';

/// Separates the remote from the entity name in a locator: `remote:c1`.
pub const REMOTE_DELIMITER: char = ':';

pub fn is_snapshot(name: &str) -> bool {
    name.contains(SNAPSHOT_DELIMITER)
}

/// A container or snapshot on a named remote, parsed from `[remote:]name[/snapshot]`.
///
/// `remote` is `None` when the locator names no remote; the caller decides which
/// endpoint that means.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityRef {
    pub remote: Option<String>,
    pub name: String,
}

impl EntityRef {
    pub fn new(remote: Option<&str>, name: &str) -> Self {
        Self {
            remote: remote.map(str::to_owned),
            name: name.to_owned(),
        }
    }

    pub fn parse(locator: &str) -> Self {
        match locator.split_once(REMOTE_DELIMITER) {
            Some((remote, name)) => Self {
                remote: (!remote.is_empty()).then(|| remote.to_owned()),
                name: name.to_owned(),
            },
            None => Self {
                remote: None,
                name: locator.to_owned(),
            },
        }
    }

    pub fn is_snapshot(&self) -> bool {
        is_snapshot(&self.name)
    }

    /// The container part of the name; the whole name for a live container.
    pub fn container_name(&self) -> &str {
        self.name
            .split_once(SNAPSHOT_DELIMITER)
            .map_or(self.name.as_str(), |(container, _)| container)
    }

    pub fn remote_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.remote.as_deref().unwrap_or(default)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.remote {
            Some(remote) => write!(f, "{remote}{REMOTE_DELIMITER}{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// The part of a container's definition that is carried over to its copy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicableState {
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub devices: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
    #[serde(default)]
    pub profiles: Vec<String>,
}

/// Container or snapshot metadata as returned by an endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    #[serde(flatten)]
    pub state: ReplicableState,
    #[serde(default)]
    pub ephemeral: bool,
}

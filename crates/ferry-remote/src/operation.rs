use crate::{ReplicableState, RemoteError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Path prefix of every API route.
pub const API_PREFIX: &str = "/1.0";

/// Reference to an asynchronous operation: its URL path on the endpoint,
/// e.g. `/1.0/operations/5e8f…`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationHandle(String);

impl OperationHandle {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn for_id(id: &str) -> Self {
        Self(format!("{API_PREFIX}/operations/{id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Operation id: the last path segment.
    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Fully-qualified URL of this operation when reached through `address`.
    pub fn url_at(&self, address: &str) -> String {
        format!("https://{address}{}", self.0)
    }
}

impl fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
    Pending,
    Running,
    Cancelling,
    Success,
    Failure,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl OperationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Cancelled)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Cancelling => "cancelling",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// An asynchronous operation as reported by an endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: String,
    #[serde(default)]
    pub class: String,
    pub status: OperationStatus,
    #[serde(default)]
    pub status_code: u16,
    /// Resources touched by the operation, keyed by kind (`containers`, `images`, …).
    #[serde(default)]
    pub resources: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
    /// Error text; empty unless the operation failed.
    #[serde(default)]
    pub err: String,
    #[serde(default)]
    pub may_cancel: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Operation {
    pub fn new(id: &str, status: OperationStatus) -> Self {
        Self {
            id: id.to_owned(),
            class: "task".to_owned(),
            status,
            status_code: 0,
            resources: BTreeMap::new(),
            metadata: None,
            err: String::new(),
            may_cancel: false,
            created_at: Some(Utc::now()),
        }
    }

    pub fn handle(&self) -> OperationHandle {
        OperationHandle::for_id(&self.id)
    }

    pub fn error(&self) -> Option<&str> {
        (!self.err.is_empty()).then_some(self.err.as_str())
    }

    /// Decode the migration secrets carried in this operation's metadata.
    pub fn secrets(&self) -> Result<Secrets, RemoteError> {
        let metadata = self.metadata.as_ref().ok_or_else(|| {
            RemoteError::Decode(format!("operation {} carries no metadata", self.id))
        })?;
        Secrets::from_metadata(metadata)
    }

    /// Turn a terminal failure into an error, passing successes through.
    pub fn into_result(self) -> Result<Self, RemoteError> {
        match self.status {
            OperationStatus::Failure | OperationStatus::Cancelled => {
                let reason = match self.error() {
                    Some(err) => err.to_owned(),
                    None => format!("operation {} {}", self.id, self.status),
                };
                Err(RemoteError::OperationFailed(reason))
            }
            _ => Ok(self),
        }
    }
}

/// Per-channel secrets of a migration session (`control`, `fs`, `criu`, …).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secrets(BTreeMap<String, String>);

impl Secrets {
    /// Every metadata value must be a string; anything else is rejected here
    /// rather than coerced.
    pub fn from_metadata(metadata: &Map<String, Value>) -> Result<Self, RemoteError> {
        let mut secrets = BTreeMap::new();
        for (channel, value) in metadata {
            match value {
                Value::String(secret) => {
                    secrets.insert(channel.clone(), secret.clone());
                }
                other => {
                    return Err(RemoteError::Decode(format!(
                        "migration secret '{channel}' is not a string: {other}"
                    )));
                }
            }
        }
        Ok(Self(secrets))
    }

    pub fn get(&self, channel: &str) -> Option<&str> {
        self.0.get(channel).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl<const N: usize> From<[(&str, &str); N]> for Secrets {
    fn from(pairs: [(&str, &str); N]) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect(),
        )
    }
}

/// Copy within one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalCopyRequest {
    pub source: String,
    /// Target name; the endpoint picks one when absent.
    pub name: Option<String>,
    pub config: BTreeMap<String, String>,
    pub profiles: Vec<String>,
    pub ephemeral: bool,
    pub container_only: bool,
}

/// Pull-mode migration handshake sent to the destination endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationRequest {
    /// Target name; the endpoint picks one when absent.
    pub name: Option<String>,
    /// Fully-qualified URL of the source's migration operation.
    pub operation_url: String,
    /// Source endpoint certificate the destination uses to authenticate the dial.
    pub certificate: String,
    pub secrets: Secrets,
    pub state: ReplicableState,
    pub base_image: Option<String>,
    pub ephemeral: bool,
    pub live: bool,
    pub container_only: bool,
}

impl MigrationRequest {
    /// Host (and port) part of the operation URL this request dials.
    pub fn address(&self) -> &str {
        let rest = self
            .operation_url
            .split_once("://")
            .map_or(self.operation_url.as_str(), |(_, rest)| rest);
        rest.split_once('/').map_or(rest, |(host, _)| host)
    }
}

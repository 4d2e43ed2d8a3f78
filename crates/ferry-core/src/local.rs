use crate::report::created_name;
use crate::CoreError;
use ferry_remote::{Endpoint, LocalCopyRequest, ReplicableState};
use tracing::{debug, info};

/// A copy within a single endpoint.
#[derive(Debug, Clone)]
pub struct LocalCopy<'a> {
    pub source: &'a str,
    /// `None` lets the endpoint pick a name.
    pub name: Option<&'a str>,
    pub state: &'a ReplicableState,
    pub ephemeral: bool,
    pub container_only: bool,
}

/// Copy `copy.source` to a new container on `endpoint` and return the new name.
pub fn copy_local(endpoint: &dyn Endpoint, copy: &LocalCopy<'_>) -> Result<String, CoreError> {
    if copy.name == Some(copy.source) {
        return Err(CoreError::SameName(copy.source.to_owned()));
    }

    let request = LocalCopyRequest {
        source: copy.source.to_owned(),
        name: copy.name.map(str::to_owned),
        config: copy.state.config.clone(),
        profiles: copy.state.profiles.clone(),
        ephemeral: copy.ephemeral,
        container_only: copy.container_only,
    };
    let op = endpoint.local_copy(&request)?;
    debug!("local copy of {} started as {}", copy.source, op.id);

    let done = endpoint.wait(&op.handle())?;
    let name = match copy.name {
        Some(name) => name.to_owned(),
        None => created_name(&done)?,
    };
    info!("copied {} to {name} on {}", copy.source, endpoint.name());
    Ok(name)
}

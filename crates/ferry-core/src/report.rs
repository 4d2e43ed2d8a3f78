use crate::CoreError;
use ferry_remote::Operation;

/// Resource kind under which operations list the containers they created.
pub const CONTAINERS_RESOURCE: &str = "containers";

/// Name of the container created by a completed operation: the last path segment
/// of the first `containers` resource.
pub fn created_name(operation: &Operation) -> Result<String, CoreError> {
    let path = operation
        .resources
        .get(CONTAINERS_RESOURCE)
        .and_then(|paths| paths.first())
        .ok_or(CoreError::MissingResource)?;
    let name = path.trim_end_matches('/').rsplit('/').next().unwrap_or("");
    if name.is_empty() {
        return Err(CoreError::MissingResource);
    }
    Ok(name.to_owned())
}

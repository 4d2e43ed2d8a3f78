use crate::CoreError;
use ferry_remote::Endpoint;
use std::collections::BTreeSet;
use tracing::debug;

/// Verify every profile in `profiles` exists on `destination`.
pub fn check_profiles(profiles: &[String], destination: &dyn Endpoint) -> Result<(), CoreError> {
    let available: BTreeSet<String> = destination.profiles()?.into_iter().collect();
    let missing: BTreeSet<&String> = profiles
        .iter()
        .filter(|p| !available.contains(*p))
        .collect();

    if missing.is_empty() {
        debug!(
            "all {} profiles present on {}",
            profiles.len(),
            destination.name()
        );
        return Ok(());
    }
    Err(CoreError::ProfileMismatch {
        missing: missing.into_iter().cloned().collect(),
    })
}

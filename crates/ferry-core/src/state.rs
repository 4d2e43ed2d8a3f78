use crate::CoreError;
use ferry_remote::{is_snapshot, ContainerInfo, Endpoint, RemoteError, ReplicableState};
use tracing::debug;

/// Config keys under this prefix are transient and owned by the endpoint.
pub const VOLATILE_PREFIX: &str = "volatile";

/// Image the container was created from. Volatile, but forwarded to a migration
/// destination for provenance.
pub const BASE_IMAGE_KEY: &str = "volatile.base_image";

/// Caller-supplied additions applied on top of the source's state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    /// Appended after the source's profiles, duplicates kept.
    pub profiles: Vec<String>,
    /// Applied in order; a repeated key takes the last value.
    pub config: Vec<(String, String)>,
}

impl Overrides {
    #[must_use]
    pub fn with_profile(mut self, profile: &str) -> Self {
        self.profiles.push(profile.to_owned());
        self
    }

    #[must_use]
    pub fn with_config(mut self, key: &str, value: &str) -> Self {
        self.config.push((key.to_owned(), value.to_owned()));
        self
    }

    /// Parse a `key=value` override. The value may itself contain `=`.
    pub fn parse_config(pair: &str) -> Result<(String, String), CoreError> {
        match pair.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_owned(), value.to_owned())),
            _ => Err(CoreError::Argument(format!(
                "invalid config override '{pair}': expected key=value"
            ))),
        }
    }
}

/// Source state ready to be sent to the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedState {
    pub state: ReplicableState,
    /// Value of [`BASE_IMAGE_KEY`] after overrides, captured before volatile keys
    /// are stripped.
    pub base_image: Option<String>,
    /// Whether the source entity is currently ephemeral.
    pub ephemeral: bool,
}

/// Fetch the replicable state of `name` (a container or `container/snapshot`) and
/// reconcile it with the caller's overrides.
pub fn resolve_state(
    endpoint: &dyn Endpoint,
    name: &str,
    overrides: &Overrides,
    keep_volatile: bool,
) -> Result<ResolvedState, CoreError> {
    let lookup = if is_snapshot(name) {
        endpoint.snapshot(name)
    } else {
        endpoint.container(name)
    };
    let ContainerInfo {
        mut state,
        ephemeral,
    } = lookup.map_err(|e| match e {
        RemoteError::NotFound(_) => CoreError::NotFound(format!("{}:{name}", endpoint.name())),
        other => CoreError::Remote(other),
    })?;

    state.profiles.extend(overrides.profiles.iter().cloned());
    for (key, value) in &overrides.config {
        state.config.insert(key.clone(), value.clone());
    }

    let base_image = state
        .config
        .get(BASE_IMAGE_KEY)
        .filter(|image| !image.is_empty())
        .cloned();

    if !keep_volatile {
        let before = state.config.len();
        state.config.retain(|key, _| !key.starts_with(VOLATILE_PREFIX));
        debug!(
            "stripped {} volatile config keys from {name}",
            before - state.config.len()
        );
    }

    Ok(ResolvedState {
        state,
        base_image,
        ephemeral,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_remote::mock::MockEndpoint;

    fn source() -> MockEndpoint {
        let mut state = ReplicableState {
            architecture: "x86_64".to_owned(),
            profiles: vec!["default".to_owned()],
            ..ReplicableState::default()
        };
        state
            .config
            .insert("limits.cpu".to_owned(), "2".to_owned());
        state
            .config
            .insert(BASE_IMAGE_KEY.to_owned(), "sha256-abc".to_owned());
        state
            .config
            .insert("volatile.eth0.hwaddr".to_owned(), "00:16:3e:aa".to_owned());
        let mut snap = state.clone();
        snap.config
            .insert("limits.cpu".to_owned(), "1".to_owned());
        MockEndpoint::new("src")
            .with_container(
                "web",
                ContainerInfo {
                    state,
                    ephemeral: true,
                },
            )
            .with_container(
                "web/snap0",
                ContainerInfo {
                    state: snap,
                    ephemeral: false,
                },
            )
    }

    #[test]
    fn strips_volatile_but_keeps_base_image() {
        let endpoint = source();
        let resolved = resolve_state(&endpoint, "web", &Overrides::default(), false).unwrap();
        assert!(resolved
            .state
            .config
            .keys()
            .all(|k| !k.starts_with(VOLATILE_PREFIX)));
        assert_eq!(resolved.state.config["limits.cpu"], "2");
        assert_eq!(resolved.base_image.as_deref(), Some("sha256-abc"));
        assert!(resolved.ephemeral);
    }

    #[test]
    fn keep_volatile_preserves_keys() {
        let endpoint = source();
        let resolved = resolve_state(&endpoint, "web", &Overrides::default(), true).unwrap();
        assert_eq!(resolved.state.config["volatile.eth0.hwaddr"], "00:16:3e:aa");
        assert_eq!(resolved.base_image.as_deref(), Some("sha256-abc"));
    }

    #[test]
    fn overrides_merge_and_append() {
        let endpoint = source();
        let overrides = Overrides::default()
            .with_profile("gpu")
            .with_profile("default")
            .with_config("limits.cpu", "4")
            .with_config("limits.cpu", "8")
            .with_config("security.nesting", "true");
        let resolved = resolve_state(&endpoint, "web", &overrides, false).unwrap();
        assert_eq!(resolved.state.profiles, vec!["default", "gpu", "default"]);
        assert_eq!(resolved.state.config["limits.cpu"], "8");
        assert_eq!(resolved.state.config["security.nesting"], "true");
    }

    #[test]
    fn override_of_base_image_is_forwarded() {
        let endpoint = source();
        let overrides = Overrides::default().with_config(BASE_IMAGE_KEY, "sha256-def");
        let resolved = resolve_state(&endpoint, "web", &overrides, false).unwrap();
        assert_eq!(resolved.base_image.as_deref(), Some("sha256-def"));
        assert!(!resolved.state.config.contains_key(BASE_IMAGE_KEY));
    }

    #[test]
    fn snapshot_uses_snapshot_lookup() {
        let endpoint = source();
        let resolved =
            resolve_state(&endpoint, "web/snap0", &Overrides::default(), false).unwrap();
        assert_eq!(resolved.state.config["limits.cpu"], "1");
        assert!(!resolved.ephemeral);
        assert_eq!(endpoint.call_count("snapshot web/snap0"), 1);
        assert_eq!(endpoint.call_count("container"), 0);
    }

    #[test]
    fn missing_source_is_not_found() {
        let endpoint = source();
        let err = resolve_state(&endpoint, "ghost", &Overrides::default(), false).unwrap_err();
        match err {
            CoreError::NotFound(what) => assert_eq!(what, "src:ghost"),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn parse_config_pairs() {
        assert_eq!(
            Overrides::parse_config("user.note=a=b").unwrap(),
            ("user.note".to_owned(), "a=b".to_owned())
        );
        assert_eq!(
            Overrides::parse_config("k=").unwrap(),
            ("k".to_owned(), String::new())
        );
        assert!(Overrides::parse_config("novalue").is_err());
        assert!(Overrides::parse_config("=v").is_err());
    }
}

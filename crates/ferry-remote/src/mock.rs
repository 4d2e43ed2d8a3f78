use crate::entity::SNAPSHOT_DELIMITER;
use crate::{
    is_snapshot, Connector, ContainerInfo, Endpoint, LocalCopyRequest, MigrationRequest,
    Operation, OperationHandle, OperationStatus, RemoteError, ReplicableState,
};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// What an operation does to the endpoint once it succeeds.
#[derive(Debug, Clone)]
enum Effect {
    Nothing,
    Create {
        name: String,
        info: ContainerInfo,
        snapshots: Vec<(String, ContainerInfo)>,
    },
    Rename {
        from: String,
        to: String,
    },
    Delete(String),
}

#[derive(Debug)]
struct MockOperation {
    op: Operation,
    failure: Option<String>,
    effect: Effect,
}

#[derive(Debug, Default)]
struct MockState {
    containers: BTreeMap<String, ContainerInfo>,
    profiles: Vec<String>,
    addresses: Vec<String>,
    refused: BTreeSet<String>,
    failing_transfers: BTreeMap<String, String>,
    source_failure: Option<String>,
    omit_resources: bool,
    wait_delay: Option<Duration>,
    operations: BTreeMap<String, MockOperation>,
    migration_requests: Vec<MigrationRequest>,
    local_copy_requests: Vec<LocalCopyRequest>,
    calls: Vec<String>,
    next_id: u64,
}

impl MockState {
    fn next_id(&mut self, endpoint: &str) -> String {
        self.next_id += 1;
        format!("{endpoint}-op{}", self.next_id)
    }

    fn generated_name(&mut self, base: &str) -> String {
        self.next_id += 1;
        format!("{base}-copy{}", self.next_id)
    }

    fn start(
        &mut self,
        endpoint: &str,
        resource: Option<&str>,
        failure: Option<String>,
        effect: Effect,
    ) -> Operation {
        let id = self.next_id(endpoint);
        let mut op = Operation::new(&id, OperationStatus::Running);
        op.status_code = 103;
        if let (Some(name), false) = (resource, self.omit_resources) {
            op.resources.insert(
                "containers".to_owned(),
                vec![format!("/1.0/containers/{name}")],
            );
        }
        self.operations.insert(
            id,
            MockOperation {
                op: op.clone(),
                failure,
                effect,
            },
        );
        op
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::Nothing => {}
            Effect::Create {
                name,
                info,
                snapshots,
            } => {
                self.containers.insert(name, info);
                self.containers.extend(snapshots);
            }
            Effect::Rename { from, to } => {
                let moved = self.take_with_snapshots(&from);
                for (name, info) in moved {
                    let renamed = match name.split_once(SNAPSHOT_DELIMITER) {
                        Some((_, snap)) => format!("{to}{SNAPSHOT_DELIMITER}{snap}"),
                        None => to.clone(),
                    };
                    self.containers.insert(renamed, info);
                }
            }
            Effect::Delete(name) => {
                self.take_with_snapshots(&name);
            }
        }
    }

    fn take_with_snapshots(&mut self, name: &str) -> Vec<(String, ContainerInfo)> {
        let prefix = format!("{name}{SNAPSHOT_DELIMITER}");
        let keys: Vec<String> = self
            .containers
            .keys()
            .filter(|k| *k == name || k.starts_with(&prefix))
            .cloned()
            .collect();
        keys.into_iter()
            .filter_map(|k| self.containers.remove(&k).map(|v| (k, v)))
            .collect()
    }
}

/// In-memory endpoint for tests.
///
/// Failures are scripted per address: a destination can refuse the handshake for
/// an address or accept it and fail the transfer later. A source can be told to
/// fail its migration operation. Every call is recorded in a call log.
pub struct MockEndpoint {
    name: String,
    certificate: String,
    state: Mutex<MockState>,
}

impl MockEndpoint {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            certificate: format!("-----BEGIN CERTIFICATE-----\n{name}\n-----END CERTIFICATE-----\n"),
            state: Mutex::new(MockState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: String) {
        self.lock().calls.push(call);
    }

    /// Add a container, or a snapshot when `name` is `container/snapshot`.
    #[must_use]
    pub fn with_container(self, name: &str, info: ContainerInfo) -> Self {
        self.lock().containers.insert(name.to_owned(), info);
        self
    }

    #[must_use]
    pub fn with_profiles(self, profiles: &[&str]) -> Self {
        self.lock().profiles = profiles.iter().map(|p| (*p).to_owned()).collect();
        self
    }

    #[must_use]
    pub fn with_addresses(self, addresses: &[&str]) -> Self {
        self.lock().addresses = addresses.iter().map(|a| (*a).to_owned()).collect();
        self
    }

    /// Reject migration handshakes dialing `address`.
    #[must_use]
    pub fn refuse_address(self, address: &str) -> Self {
        self.lock().refused.insert(address.to_owned());
        self
    }

    /// Accept handshakes dialing `address`, then fail the transfer with `reason`.
    #[must_use]
    pub fn fail_transfer_from(self, address: &str, reason: &str) -> Self {
        self.lock()
            .failing_transfers
            .insert(address.to_owned(), reason.to_owned());
        self
    }

    /// Fail every migration source operation with `reason`.
    #[must_use]
    pub fn fail_migration_source(self, reason: &str) -> Self {
        self.lock().source_failure = Some(reason.to_owned());
        self
    }

    /// Complete operations without reporting the resources they created.
    #[must_use]
    pub fn without_resources(self) -> Self {
        self.lock().omit_resources = true;
        self
    }

    /// Delay every `wait` call.
    #[must_use]
    pub fn with_wait_delay(self, delay: Duration) -> Self {
        self.lock().wait_delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Number of recorded calls whose log line starts with `prefix`.
    pub fn call_count(&self, prefix: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn migration_requests(&self) -> Vec<MigrationRequest> {
        self.lock().migration_requests.clone()
    }

    pub fn local_copy_requests(&self) -> Vec<LocalCopyRequest> {
        self.lock().local_copy_requests.clone()
    }

    pub fn has_container(&self, name: &str) -> bool {
        self.lock().containers.contains_key(name)
    }

    pub fn stored(&self, name: &str) -> Option<ContainerInfo> {
        self.lock().containers.get(name).cloned()
    }

    fn lookup(&self, name: &str) -> Result<ContainerInfo, RemoteError> {
        self.lock()
            .containers
            .get(name)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("{}: {name}", self.name)))
    }

    fn ensure_free(state: &MockState, name: &str) -> Result<(), RemoteError> {
        if state.containers.contains_key(name) {
            return Err(RemoteError::Http(format!(
                "container '{name}' already exists"
            )));
        }
        Ok(())
    }
}

impl Endpoint for MockEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn container(&self, name: &str) -> Result<ContainerInfo, RemoteError> {
        self.record(format!("container {name}"));
        self.lookup(name)
    }

    fn snapshot(&self, name: &str) -> Result<ContainerInfo, RemoteError> {
        self.record(format!("snapshot {name}"));
        self.lookup(name)
    }

    fn profiles(&self) -> Result<Vec<String>, RemoteError> {
        self.record("profiles".to_owned());
        Ok(self.lock().profiles.clone())
    }

    fn local_copy(&self, request: &LocalCopyRequest) -> Result<Operation, RemoteError> {
        self.record(format!("local_copy {}", request.source));
        let source = self.lookup(&request.source)?;
        let mut state = self.lock();
        state.local_copy_requests.push(request.clone());

        let base = request
            .source
            .split_once(SNAPSHOT_DELIMITER)
            .map_or(request.source.as_str(), |(c, _)| c)
            .to_owned();
        let name = match &request.name {
            Some(name) => name.clone(),
            None => state.generated_name(&base),
        };
        Self::ensure_free(&state, &name)?;

        let info = ContainerInfo {
            state: ReplicableState {
                architecture: source.state.architecture,
                devices: source.state.devices,
                config: request.config.clone(),
                profiles: request.profiles.clone(),
            },
            ephemeral: request.ephemeral,
        };
        let snapshots = if request.container_only || is_snapshot(&request.source) {
            Vec::new()
        } else {
            let prefix = format!("{}{SNAPSHOT_DELIMITER}", request.source);
            state
                .containers
                .iter()
                .filter_map(|(k, v)| {
                    k.strip_prefix(&prefix)
                        .map(|snap| (format!("{name}{SNAPSHOT_DELIMITER}{snap}"), v.clone()))
                })
                .collect()
        };
        Ok(state.start(
            &self.name,
            Some(&name),
            None,
            Effect::Create {
                name: name.clone(),
                info,
                snapshots,
            },
        ))
    }

    fn migration_source(
        &self,
        name: &str,
        live: bool,
        container_only: bool,
    ) -> Result<Operation, RemoteError> {
        self.record(format!("migration_source {name}"));
        self.lookup(name)?;
        let mut state = self.lock();
        let failure = state.source_failure.clone();
        let mut op = state.start(&self.name, None, failure, Effect::Nothing);

        let mut secrets = Map::new();
        secrets.insert("control".to_owned(), Value::from(format!("{}-control", op.id)));
        secrets.insert("fs".to_owned(), Value::from(format!("{}-fs", op.id)));
        if live {
            secrets.insert("criu".to_owned(), Value::from(format!("{}-criu", op.id)));
        }
        if !container_only {
            op.class = "websocket".to_owned();
        }
        op.metadata = Some(secrets);
        if let Some(stored) = state.operations.get_mut(&op.id) {
            stored.op = op.clone();
        }
        Ok(op)
    }

    fn addresses(&self) -> Result<Vec<String>, RemoteError> {
        self.record("addresses".to_owned());
        Ok(self.lock().addresses.clone())
    }

    fn migrate_from(&self, request: &MigrationRequest) -> Result<Operation, RemoteError> {
        let address = request.address().to_owned();
        self.record(format!("migrate_from {address}"));
        let mut state = self.lock();
        state.migration_requests.push(request.clone());

        if state.refused.contains(&address) {
            return Err(RemoteError::Http(format!(
                "websocket: bad handshake dialing {address}"
            )));
        }

        let name = match &request.name {
            Some(name) => name.clone(),
            None => state.generated_name("migrated"),
        };
        Self::ensure_free(&state, &name)?;

        let failure = state.failing_transfers.get(&address).cloned();
        let info = ContainerInfo {
            state: request.state.clone(),
            ephemeral: request.ephemeral,
        };
        Ok(state.start(
            &self.name,
            Some(&name),
            failure,
            Effect::Create {
                name: name.clone(),
                info,
                snapshots: Vec::new(),
            },
        ))
    }

    fn wait(&self, handle: &OperationHandle) -> Result<Operation, RemoteError> {
        self.record(format!("wait {}", handle.id()));
        let delay = self.lock().wait_delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        let mut state = self.lock();
        let entry = state
            .operations
            .get_mut(handle.id())
            .ok_or_else(|| RemoteError::NotFound(handle.to_string()))?;
        if let Some(reason) = entry.failure.clone() {
            entry.op.status = OperationStatus::Failure;
            entry.op.status_code = 400;
            entry.op.err.clone_from(&reason);
            return Err(RemoteError::OperationFailed(reason));
        }
        entry.op.status = OperationStatus::Success;
        entry.op.status_code = 200;
        let op = entry.op.clone();
        let effect = std::mem::replace(&mut entry.effect, Effect::Nothing);
        state.apply(effect);
        Ok(op)
    }

    fn operation(&self, handle: &OperationHandle) -> Result<Operation, RemoteError> {
        self.record(format!("operation {}", handle.id()));
        let state = self.lock();
        let entry = state
            .operations
            .get(handle.id())
            .ok_or_else(|| RemoteError::NotFound(handle.to_string()))?;
        let mut op = entry.op.clone();
        if let Some(reason) = &entry.failure {
            op.status = OperationStatus::Failure;
            op.err.clone_from(reason);
        }
        Ok(op)
    }

    fn certificate(&self) -> &str {
        &self.certificate
    }

    fn rename(&self, name: &str, new_name: &str) -> Result<Operation, RemoteError> {
        self.record(format!("rename {name} {new_name}"));
        self.lookup(name)?;
        let mut state = self.lock();
        Self::ensure_free(&state, new_name)?;
        Ok(state.start(
            &self.name,
            Some(new_name),
            None,
            Effect::Rename {
                from: name.to_owned(),
                to: new_name.to_owned(),
            },
        ))
    }

    fn delete(&self, name: &str) -> Result<Operation, RemoteError> {
        self.record(format!("delete {name}"));
        self.lookup(name)?;
        Ok(self
            .lock()
            .start(&self.name, Some(name), None, Effect::Delete(name.to_owned())))
    }
}

/// A set of named mock endpoints behind the [`Connector`] interface.
pub struct MockCluster {
    default_remote: String,
    endpoints: BTreeMap<String, Arc<MockEndpoint>>,
}

impl MockCluster {
    pub fn new(default_remote: &str) -> Self {
        Self {
            default_remote: default_remote.to_owned(),
            endpoints: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: &Arc<MockEndpoint>) -> Self {
        self.endpoints
            .insert(endpoint.name().to_owned(), Arc::clone(endpoint));
        self
    }
}

impl Connector for MockCluster {
    fn default_remote(&self) -> &str {
        &self.default_remote
    }

    fn connect(&self, remote: &str) -> Result<Arc<dyn Endpoint>, RemoteError> {
        let endpoint = self
            .endpoints
            .get(remote)
            .ok_or_else(|| RemoteError::Config(format!("unknown remote '{remote}'")))?;
        Ok(Arc::clone(endpoint) as Arc<dyn Endpoint>)
    }
}

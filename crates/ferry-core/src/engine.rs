use crate::local::{copy_local, LocalCopy};
use crate::migration::{MigrationOrchestrator, MigrationPlan};
use crate::profiles::check_profiles;
use crate::state::{resolve_state, Overrides};
use crate::CoreError;
use ferry_remote::{Connector, Endpoint, EntityRef, SNAPSHOT_DELIMITER};
use std::sync::Arc;
use tracing::{debug, info};

/// Everything a single copy needs. Built by the caller and threaded through the
/// whole transfer; nothing is read from process-wide state.
#[derive(Debug, Clone, Default)]
pub struct CopyRequest {
    /// `[remote:]name[/snapshot]`.
    pub source: String,
    /// `[remote:][name]`; the remote defaults to the source's. `None` copies
    /// within the source's remote under a name chosen by the endpoint.
    pub destination: Option<String>,
    pub overrides: Overrides,
    pub keep_volatile: bool,
    /// `None` takes the source's current setting.
    pub ephemeral: Option<bool>,
    /// Transfer runtime state along with the filesystem (migrations only).
    pub stateful: bool,
    /// Leave snapshots behind.
    pub container_only: bool,
}

impl CopyRequest {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.to_owned(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_destination(mut self, destination: &str) -> Self {
        self.destination = Some(destination.to_owned());
        self
    }

    #[must_use]
    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        self.overrides = overrides;
        self
    }

    #[must_use]
    pub fn with_ephemeral(mut self, ephemeral: bool) -> Self {
        self.ephemeral = Some(ephemeral);
        self
    }

    #[must_use]
    pub fn container_only(mut self) -> Self {
        self.container_only = true;
        self
    }
}

/// Source and destination of a transfer, resolved against the default remote
/// without contacting any endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPlan {
    pub source_remote: String,
    pub source: EntityRef,
    pub dest_remote: String,
    /// `None` when the endpoint picks the name.
    pub dest_name: Option<String>,
}

impl TransferPlan {
    pub fn resolve(request: &CopyRequest, default_remote: &str) -> Result<Self, CoreError> {
        let source = EntityRef::parse(&request.source);
        if source.name.is_empty() || source.container_name().is_empty() {
            return Err(CoreError::Argument(format!(
                "missing source container name in '{}'",
                request.source
            )));
        }
        let source_remote = source.remote_or(default_remote).to_owned();

        let (dest_remote, dest_name) = match &request.destination {
            None => (source_remote.clone(), None),
            Some(locator) => {
                let dest = EntityRef::parse(locator);
                let remote = dest.remote.unwrap_or_else(|| source_remote.clone());
                if dest.name.is_empty() {
                    // A defaulted name is the full source name, snapshot included.
                    if remote == source_remote {
                        return Err(CoreError::SameName(source.name.clone()));
                    }
                    (remote, Some(source.container_name().to_owned()))
                } else {
                    if dest.name.contains(SNAPSHOT_DELIMITER) {
                        return Err(CoreError::Argument(format!(
                            "destination '{locator}' can't be a snapshot"
                        )));
                    }
                    (remote, Some(dest.name))
                }
            }
        };

        let plan = Self {
            source_remote,
            source,
            dest_remote,
            dest_name,
        };
        if plan.is_local() && plan.dest_name.as_deref() == Some(plan.source.name.as_str()) {
            return Err(CoreError::SameName(plan.source.name.clone()));
        }
        Ok(plan)
    }

    pub fn is_local(&self) -> bool {
        self.source_remote == self.dest_remote
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyResult {
    pub remote: String,
    pub name: String,
    /// True when the endpoint chose `name`.
    pub name_generated: bool,
    /// Source address the destination pulled from, for migrations.
    pub address: Option<String>,
}

/// Copies and moves containers between the remotes a [`Connector`] knows.
pub struct Engine {
    connector: Box<dyn Connector>,
}

impl Engine {
    pub fn new(connector: impl Connector + 'static) -> Self {
        Self {
            connector: Box::new(connector),
        }
    }

    pub fn copy(&self, request: &CopyRequest) -> Result<CopyResult, CoreError> {
        let plan = TransferPlan::resolve(request, self.connector.default_remote())?;
        debug!(
            "copy {}:{} -> {}:{}",
            plan.source_remote,
            plan.source.name,
            plan.dest_remote,
            plan.dest_name.as_deref().unwrap_or("<generated>")
        );
        let (source, dest) = self.connect(&plan)?;
        self.transfer(&plan, request, source.as_ref(), dest.as_ref())
    }

    /// Move a container. Within one remote this is a rename; across remotes a
    /// stateful migration followed by deletion of the source.
    pub fn relocate(&self, source: &str, destination: &str) -> Result<CopyResult, CoreError> {
        let request = CopyRequest {
            keep_volatile: true,
            stateful: true,
            ..CopyRequest::new(source).with_destination(destination)
        };
        let plan = TransferPlan::resolve(&request, self.connector.default_remote())?;
        if plan.source.is_snapshot() {
            return Err(CoreError::Argument(format!(
                "can't move snapshot '{}'; copy it instead",
                plan.source
            )));
        }
        let (source_ep, dest_ep) = self.connect(&plan)?;

        let dest_name = plan.dest_name.clone().unwrap_or_default();
        if plan.is_local() {
            let op = source_ep.rename(&plan.source.name, &dest_name)?;
            source_ep.wait(&op.handle())?;
            info!(
                "renamed {} to {dest_name} on {}",
                plan.source.name, plan.source_remote
            );
            return Ok(CopyResult {
                remote: plan.dest_remote,
                name: dest_name,
                name_generated: false,
                address: None,
            });
        }

        let result = self.transfer(&plan, &request, source_ep.as_ref(), dest_ep.as_ref())?;
        let op = source_ep.delete(&plan.source.name)?;
        source_ep.wait(&op.handle())?;
        info!(
            "removed {} from {} after migration",
            plan.source.name, plan.source_remote
        );
        Ok(result)
    }

    fn connect(
        &self,
        plan: &TransferPlan,
    ) -> Result<(Arc<dyn Endpoint>, Arc<dyn Endpoint>), CoreError> {
        let source = self.connector.connect(&plan.source_remote)?;
        let dest = if plan.is_local() {
            Arc::clone(&source)
        } else {
            self.connector.connect(&plan.dest_remote)?
        };
        Ok((source, dest))
    }

    fn transfer(
        &self,
        plan: &TransferPlan,
        request: &CopyRequest,
        source: &dyn Endpoint,
        dest: &dyn Endpoint,
    ) -> Result<CopyResult, CoreError> {
        let resolved = resolve_state(
            source,
            &plan.source.name,
            &request.overrides,
            request.keep_volatile,
        )?;
        let ephemeral = request.ephemeral.unwrap_or(resolved.ephemeral);

        if plan.is_local() {
            let name = copy_local(
                source,
                &LocalCopy {
                    source: &plan.source.name,
                    name: plan.dest_name.as_deref(),
                    state: &resolved.state,
                    ephemeral,
                    container_only: request.container_only,
                },
            )?;
            return Ok(CopyResult {
                remote: plan.dest_remote.clone(),
                name,
                name_generated: plan.dest_name.is_none(),
                address: None,
            });
        }

        check_profiles(&resolved.state.profiles, dest)?;
        let migrated = MigrationOrchestrator::new(source, dest).run(&MigrationPlan {
            source: &plan.source.name,
            name: plan.dest_name.as_deref(),
            state: &resolved,
            ephemeral,
            live: request.stateful,
            container_only: request.container_only,
        })?;
        Ok(CopyResult {
            remote: plan.dest_remote.clone(),
            name: migrated.name,
            name_generated: plan.dest_name.is_none(),
            address: Some(migrated.address),
        })
    }
}

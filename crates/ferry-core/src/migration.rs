use crate::concurrency::shutdown_requested;
use crate::report::created_name;
use crate::state::ResolvedState;
use crate::CoreError;
use ferry_remote::{Endpoint, MigrationRequest, Operation, OperationHandle, RemoteError, Secrets};
use std::fmt;
use std::sync::mpsc;
use std::thread;
use thiserror::Error;
use tracing::{debug, info, warn};

/// A failed attempt that another address may still fix.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("handshake via {address} rejected: {source}")]
    Handshake {
        address: String,
        source: RemoteError,
    },
    #[error("transfer via {address} failed: {}", .source.reason())]
    DestinationOperation {
        address: String,
        source: RemoteError,
    },
    #[error("the source host reported no address to migrate from")]
    NoAddresses,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Source,
    Destination,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => f.write_str("source"),
            Self::Destination => f.write_str("destination"),
        }
    }
}

/// The source's half of a migration: its operation and the secrets that
/// authorise the destination to pull from it. Reused unchanged across attempts.
#[derive(Debug, Clone)]
pub struct MigrationSession {
    pub handle: OperationHandle,
    pub secrets: Secrets,
}

impl MigrationSession {
    pub fn negotiate(
        source: &dyn Endpoint,
        name: &str,
        live: bool,
        container_only: bool,
    ) -> Result<Self, CoreError> {
        let op = source.migration_source(name, live, container_only)?;
        let secrets = op.secrets()?;
        debug!(
            "migration session {} for {name} with {} channels",
            op.id,
            secrets.len()
        );
        Ok(Self {
            handle: op.handle(),
            secrets,
        })
    }
}

/// What to migrate and how.
#[derive(Debug, Clone)]
pub struct MigrationPlan<'a> {
    pub source: &'a str,
    /// `None` lets the destination pick a name.
    pub name: Option<&'a str>,
    pub state: &'a ResolvedState,
    pub ephemeral: bool,
    pub live: bool,
    pub container_only: bool,
}

#[derive(Debug, Clone)]
pub struct Migrated {
    pub name: String,
    /// Source address the destination pulled from.
    pub address: String,
    pub operation: Operation,
}

enum AttemptOutcome {
    Success(Operation),
    Retryable(AttemptError),
    Fatal(CoreError),
}

/// Drives a migration between two distinct endpoints.
pub struct MigrationOrchestrator<'a> {
    source: &'a dyn Endpoint,
    dest: &'a dyn Endpoint,
}

impl<'a> MigrationOrchestrator<'a> {
    pub fn new(source: &'a dyn Endpoint, dest: &'a dyn Endpoint) -> Self {
        Self { source, dest }
    }

    pub fn run(&self, plan: &MigrationPlan<'_>) -> Result<Migrated, CoreError> {
        let session =
            MigrationSession::negotiate(self.source, plan.source, plan.live, plan.container_only)?;
        let addresses = self.source.addresses()?;
        debug!(
            "{} candidate addresses on {}",
            addresses.len(),
            self.source.name()
        );

        let mut last_error = AttemptError::NoAddresses;
        for address in &addresses {
            if shutdown_requested() {
                warn!(
                    "interrupted; source operation {} left pending on {}",
                    session.handle,
                    self.source.name()
                );
                return Err(CoreError::Interrupted);
            }
            match self.attempt(plan, &session, address) {
                AttemptOutcome::Success(operation) => {
                    let name = match plan.name {
                        Some(name) => name.to_owned(),
                        None => created_name(&operation)?,
                    };
                    info!(
                        "migrated {} to {}:{name} via {address}",
                        plan.source,
                        self.dest.name()
                    );
                    return Ok(Migrated {
                        name,
                        address: address.clone(),
                        operation,
                    });
                }
                AttemptOutcome::Retryable(err) => {
                    warn!("{err}");
                    last_error = err;
                }
                AttemptOutcome::Fatal(err) => return Err(err),
            }
        }

        Err(self.attribute_exhaustion(&session, last_error))
    }

    fn attempt(
        &self,
        plan: &MigrationPlan<'_>,
        session: &MigrationSession,
        address: &str,
    ) -> AttemptOutcome {
        let request = MigrationRequest {
            name: plan.name.map(str::to_owned),
            operation_url: session.handle.url_at(address),
            certificate: self.source.certificate().to_owned(),
            secrets: session.secrets.clone(),
            state: plan.state.state.clone(),
            base_image: plan.state.base_image.clone(),
            ephemeral: plan.ephemeral,
            live: plan.live,
            container_only: plan.container_only,
        };
        debug!("dialing {} from {}", request.operation_url, self.dest.name());

        let accepted = match self.dest.migrate_from(&request) {
            Ok(op) => op,
            Err(source) => {
                return AttemptOutcome::Retryable(AttemptError::Handshake {
                    address: address.to_owned(),
                    source,
                })
            }
        };

        match self.await_both(&accepted.handle(), &session.handle) {
            (Err(source), _) => AttemptOutcome::Retryable(AttemptError::DestinationOperation {
                address: address.to_owned(),
                source,
            }),
            (Ok(_), Err(err)) => AttemptOutcome::Fatal(CoreError::SourceMigration(err.reason())),
            (Ok(done), Ok(_)) => AttemptOutcome::Success(done),
        }
    }

    /// Wait for the destination and source operations on two threads and return
    /// both results, destination first. Never returns before both have reported.
    fn await_both(
        &self,
        dest_op: &OperationHandle,
        source_op: &OperationHandle,
    ) -> (
        Result<Operation, RemoteError>,
        Result<Operation, RemoteError>,
    ) {
        let (dest, source) = (self.dest, self.source);
        thread::scope(|scope| {
            let (tx, rx) = mpsc::sync_channel(2);
            let dest_tx = tx.clone();
            scope.spawn(move || {
                let _ = dest_tx.send((Side::Destination, dest.wait(dest_op)));
            });
            scope.spawn(move || {
                let _ = tx.send((Side::Source, source.wait(source_op)));
            });

            let mut dest_result = None;
            let mut source_result = None;
            for (side, result) in rx.iter().take(2) {
                debug!("{side} wait finished: ok={}", result.is_ok());
                match side {
                    Side::Destination => dest_result = Some(result),
                    Side::Source => source_result = Some(result),
                }
            }
            (
                dest_result.unwrap_or_else(|| Err(unreported(Side::Destination))),
                source_result.unwrap_or_else(|| Err(unreported(Side::Source))),
            )
        })
    }

    fn attribute_exhaustion(&self, session: &MigrationSession, last: AttemptError) -> CoreError {
        match self.source.operation(&session.handle) {
            Ok(op) => {
                if let Some(err) = op.error() {
                    info!("source operation {} reports: {err}", op.id);
                    return CoreError::SourceMigration(err.to_owned());
                }
            }
            Err(e) => warn!("could not query source operation {}: {e}", session.handle),
        }
        CoreError::DestinationMigration(last)
    }
}

fn unreported(side: Side) -> RemoteError {
    RemoteError::OperationFailed(format!("{side} waiter exited without reporting"))
}

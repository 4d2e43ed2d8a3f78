//! Transfer core for ferry.
//!
//! The [`Engine`] copies or moves a container (or one of its snapshots) between
//! endpoints. Source state is fetched and reconciled by [`resolve_state`]; a
//! same-endpoint transfer is a single local copy, anything else goes through the
//! [`MigrationOrchestrator`], which negotiates a session with the source, tries the
//! source's addresses one at a time and waits on both sides of every accepted
//! attempt before deciding which side failed.

pub mod concurrency;
pub mod engine;
pub mod local;
pub mod migration;
pub mod profiles;
pub mod report;
pub mod state;

pub use concurrency::{install_signal_handler, request_shutdown, shutdown_requested};
pub use engine::{CopyRequest, CopyResult, Engine, TransferPlan};
pub use local::{copy_local, LocalCopy};
pub use migration::{
    AttemptError, Migrated, MigrationOrchestrator, MigrationPlan, MigrationSession, Side,
};
pub use profiles::check_profiles;
pub use report::created_name;
pub use state::{resolve_state, Overrides, ResolvedState, BASE_IMAGE_KEY, VOLATILE_PREFIX};

use ferry_remote::RemoteError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{0}")]
    Argument(String),
    #[error("can't copy to the same container name: {0}")]
    SameName(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("not all the profiles from the source exist on the target (missing: {})", .missing.join(", "))]
    ProfileMismatch { missing: Vec<String> },
    #[error("migration failed on source host: {0}")]
    SourceMigration(String),
    #[error("migration failed on target host: {0}")]
    DestinationMigration(#[source] AttemptError),
    #[error("didn't get any affected image, container or snapshot from server")]
    MissingResource,
    #[error("interrupted before the next migration attempt")]
    Interrupted,
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod cache;
mod caching;
mod changes;
mod config;
mod engine;
mod error;
mod fingerprint;
mod hash;
mod history;
mod identity;
mod overlap;
mod work;
mod workspace;

pub use crate::cache::{BuildCache, LocalBuildCache};
pub use crate::caching::{CacheKey, CachingDisabledReason, CachingInputs, CachingState, cache_key, resolve};
pub use crate::changes::{
    ChangeDetection, ChangeKind, CurrentState, FileChange, InputChanges, RebuildReason, diff,
    rebuild_reasons,
};
pub use crate::config::EngineConfig;
pub use crate::engine::{EngineBuilder, Execution, ExecutionEngine, ExecutionPath, ExecutionState};
pub use crate::error::*;
pub use crate::fingerprint::{
    DirectorySensitivity, EntryKind, FileCollection, FileEntry, FileNormalization,
    FileTreeFingerprint, LineEndingSensitivity, PathCase, PathSensitivity, PropertyFingerprint,
    Value, ValueFingerprint, fingerprint_files, fingerprint_input, snapshot_output,
};
pub use crate::hash::{Fingerprint, FingerprintHasher};
pub use crate::history::{ExecutionHistoryEntry, FsHistoryStore, HistoryStore, MemoryHistoryStore};
pub use crate::identity::{IdentityInputs, WorkIdentity, identify};
pub use crate::overlap::{Overlap, OutputRegistry, OverlappingOutputs};
pub use crate::work::{
    CancellationToken, ErrorDecorator, ExecutionRequest, ImplementationSnapshot,
    InputBehavior, InputChangeTrackingStrategy, InputProperty, InputValue, OutputProperty,
    OverlappingOutputHandling, SnapshotListener, TreeType, UnitOfWork, ValidationContext,
    WorkOptions, WorkOutput, WorkResult,
};
pub use crate::workspace::{Workspace, WorkspaceCoordinator};

/// Installs a `tracing` subscriber printing to stderr, filtered by the
/// `KURA_LOG` environment variable (`info` when unset).
#[cfg(feature = "logging")]
pub fn init_logging() -> Result<(), RuntimeError> {
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt};

    let filter = EnvFilter::try_from_env("KURA_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init()?;

    Ok(())
}

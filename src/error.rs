use std::time::Duration;

use camino::Utf8PathBuf;
use thiserror::Error;

pub use anyhow::Error as RuntimeError;

use crate::identity::WorkIdentity;

/// Failure to turn an input or an output into a fingerprint.
#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("Couldn't read '{path}'.\n{source}")]
    FileAccess {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Path '{0}' is not valid UTF-8")]
    NonUtf8Path(std::path::PathBuf),

    #[error("Unsupported value: {0}")]
    UnsupportedValue(String),

    #[error("Couldn't compile include pattern.\n{0}")]
    Pattern(#[from] glob::PatternError),
}

impl FingerprintError {
    pub(crate) fn file_access(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        Self::FileAccess {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("{kind}: identity input '{property}' has no value")]
    MissingInput { kind: String, property: String },

    #[error("{kind}: identity input '{property}' is declared more than once")]
    Ambiguous { kind: String, property: String },

    #[error("{kind}: couldn't fingerprint identity input '{property}'.\n{source}")]
    Fingerprint {
        kind: String,
        property: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Userland(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Couldn't access execution history at '{0}'.\n{1}")]
    Io(Utf8PathBuf, std::io::Error),

    #[error("Couldn't decode execution history at '{0}'.\n{1}")]
    Decode(Utf8PathBuf, String),

    #[error("Couldn't encode execution history for '{0}'.\n{1}")]
    Encode(WorkIdentity, String),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Cache entry {key} is corrupt: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Couldn't encode cache manifest.\n{0}")]
    Encode(String),
}

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Couldn't prepare workspace '{0}'.\n{1}")]
    Io(Utf8PathBuf, std::io::Error),
}

/// Every way a single execution attempt can fail.
///
/// None of these affect other identities: history and cache entries are only
/// ever replaced atomically.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Couldn't compute identity.\n{0}")]
    Identity(#[from] IdentityError),

    #[error("{work}: couldn't fingerprint input '{property}'.\n{source}")]
    Fingerprint {
        work: String,
        property: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{work}: invalid work definition:\n{}", .problems.join("\n"))]
    Validation { work: String, problems: Vec<String> },

    #[error("{work}: timed out after {timeout:?}")]
    Timeout { work: String, timeout: Duration },

    #[error(transparent)]
    Work(anyhow::Error),

    #[error("{work}: {message}")]
    Panic { work: String, message: String },

    #[error("{work}: couldn't snapshot output '{property}'.\n{source}")]
    OutputSnapshot {
        work: String,
        property: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("{work}: couldn't remove stale outputs.\n{source}")]
    Cleanup {
        work: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}

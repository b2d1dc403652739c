//! Persistent record of the last execution of every identity.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::HistoryError;
use crate::fingerprint::{FileTreeFingerprint, PropertyFingerprint};
use crate::hash::Fingerprint;
use crate::identity::WorkIdentity;

/// What the engine remembers about the previous execution of an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionHistoryEntry {
    pub identity: WorkIdentity,
    /// Combined implementation fingerprint, `None` when unknown.
    pub implementation: Option<Fingerprint>,
    pub inputs: BTreeMap<String, PropertyFingerprint>,
    pub outputs: BTreeMap<String, FileTreeFingerprint>,
    /// Failed executions are recorded too, so the next run knows which
    /// outputs they left behind; they are never up-to-date.
    pub successful: bool,
    pub cache_key: Option<Fingerprint>,
}

/// Storage for [`ExecutionHistoryEntry`], keyed by identity.
///
/// A `store` must replace the previous entry atomically: a concurrent or a
/// later `load` sees either the old or the new entry, never a mix.
pub trait HistoryStore: Send + Sync {
    fn load(&self, identity: &WorkIdentity) -> Result<Option<ExecutionHistoryEntry>, HistoryError>;

    fn store(&self, entry: &ExecutionHistoryEntry) -> Result<(), HistoryError>;

    fn remove(&self, identity: &WorkIdentity) -> Result<(), HistoryError>;
}

/// One CBOR file per identity, replaced via write-then-rename.
#[derive(Debug)]
pub struct FsHistoryStore {
    root: Utf8PathBuf,
    counter: AtomicU64,
}

impl FsHistoryStore {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn path_for(&self, identity: &WorkIdentity) -> Utf8PathBuf {
        self.root.join(format!("{}.bin", identity.fingerprint()))
    }

    fn temp_path(&self) -> Utf8PathBuf {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        self.root.join(format!(".tmp-{}-{n}", std::process::id()))
    }
}

impl HistoryStore for FsHistoryStore {
    fn load(&self, identity: &WorkIdentity) -> Result<Option<ExecutionHistoryEntry>, HistoryError> {
        let path = self.path_for(identity);
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(HistoryError::Io(path, e)),
        };

        let entry: ExecutionHistoryEntry = ciborium::from_reader(BufReader::new(file))
            .map_err(|e| HistoryError::Decode(path.clone(), e.to_string()))?;

        // Two identities sharing a file name would be a hash collision.
        if &entry.identity != identity {
            return Err(HistoryError::Decode(
                path,
                format!("entry belongs to '{}'", entry.identity),
            ));
        }

        Ok(Some(entry))
    }

    fn store(&self, entry: &ExecutionHistoryEntry) -> Result<(), HistoryError> {
        fs::create_dir_all(&self.root).map_err(|e| HistoryError::Io(self.root.clone(), e))?;

        let path = self.path_for(&entry.identity);
        let temp = self.temp_path();

        let written = (|| {
            let file = fs::File::create(&temp).map_err(|e| HistoryError::Io(temp.clone(), e))?;
            let mut writer = BufWriter::new(file);
            ciborium::into_writer(entry, &mut writer)
                .map_err(|e| HistoryError::Encode(entry.identity.clone(), e.to_string()))?;
            writer
                .flush()
                .map_err(|e| HistoryError::Io(temp.clone(), e))?;
            fs::rename(&temp, &path).map_err(|e| HistoryError::Io(path.clone(), e))
        })();

        if written.is_err() {
            let _ = fs::remove_file(&temp);
        }

        written
    }

    fn remove(&self, identity: &WorkIdentity) -> Result<(), HistoryError> {
        let path = self.path_for(identity);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(HistoryError::Io(path, e)),
        }
    }
}

/// Non-persistent store, mostly useful in tests.
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    entries: RwLock<HashMap<WorkIdentity, ExecutionHistoryEntry>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn load(&self, identity: &WorkIdentity) -> Result<Option<ExecutionHistoryEntry>, HistoryError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(identity).cloned())
    }

    fn store(&self, entry: &ExecutionHistoryEntry) -> Result<(), HistoryError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(entry.identity.clone(), entry.clone());
        Ok(())
    }

    fn remove(&self, identity: &WorkIdentity) -> Result<(), HistoryError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(identity);
        Ok(())
    }
}

//! Build cache backends.
//!
//! The cache is an optimization only. Every failure to load is reported to
//! the engine, which then executes the work as if the entry didn't exist.

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::sync::atomic::{AtomicU64, Ordering};

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::caching::CacheKey;
use crate::error::CacheError;
use crate::fingerprint::{EntryKind, FileTreeFingerprint};
use crate::hash::Fingerprint;
use crate::work::{OutputProperty, TreeType};

/// Storage for unit outputs, addressed by [`CacheKey`].
///
/// Stores of the same key must be idempotent, so concurrent writers of equal
/// content need no coordination.
pub trait BuildCache: Send + Sync {
    fn contains(&self, key: &CacheKey) -> bool;

    /// Replaces the declared outputs with the cached ones. Returns `false` on
    /// a cache miss, in which case the outputs were not touched.
    fn load(&self, key: &CacheKey, outputs: &[OutputProperty]) -> Result<bool, CacheError>;

    fn store(
        &self,
        key: &CacheKey,
        outputs: &[OutputProperty],
        snapshots: &BTreeMap<String, FileTreeFingerprint>,
    ) -> Result<(), CacheError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum StoredKind {
    File,
    Directory,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    relative: Utf8PathBuf,
    kind: EntryKind,
    content: Fingerprint,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredOutput {
    name: String,
    kind: StoredKind,
    present: bool,
    entries: Vec<StoredEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    key: CacheKey,
    outputs: Vec<StoredOutput>,
}

const MANIFEST: &str = "manifest.cbor";
const DATA: &str = "data";

/// A cache directory on the local filesystem.
///
/// Layout: `<root>/<key>/manifest.cbor` and `<root>/<key>/data/<n>`, where
/// `n` is the position of the output property in the manifest. Entries are
/// assembled in a temporary directory and renamed into place.
#[derive(Debug)]
pub struct LocalBuildCache {
    root: Utf8PathBuf,
    counter: AtomicU64,
}

impl LocalBuildCache {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn entry_dir(&self, key: &CacheKey) -> Utf8PathBuf {
        self.root.join(key.to_string())
    }

    fn temp_dir(&self) -> Utf8PathBuf {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        self.root.join(format!(".tmp-{}-{n}", std::process::id()))
    }

    fn read_manifest(&self, key: &CacheKey) -> Result<Option<Manifest>, CacheError> {
        let path = self.entry_dir(key).join(MANIFEST);
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let manifest: Manifest =
            ciborium::from_reader(BufReader::new(file)).map_err(|e| corrupt(key, e.to_string()))?;
        if manifest.key != *key {
            return Err(corrupt(key, format!("manifest belongs to {}", manifest.key)));
        }

        Ok(Some(manifest))
    }

    fn write_entry(
        &self,
        dir: &Utf8Path,
        key: &CacheKey,
        outputs: &[OutputProperty],
        snapshots: &BTreeMap<String, FileTreeFingerprint>,
    ) -> Result<(), CacheError> {
        let data = dir.join(DATA);
        fs::create_dir_all(&data)?;

        let mut stored = Vec::with_capacity(outputs.len());
        for (index, output) in outputs.iter().enumerate() {
            let kind = match output.kind {
                TreeType::File => StoredKind::File,
                TreeType::Directory => StoredKind::Directory,
                TreeType::Aggregate => {
                    return Err(CacheError::Encode(format!(
                        "output property '{}' isn't cacheable",
                        output.name
                    )));
                }
            };
            let target = data.join(index.to_string());
            let present = output.root.exists();
            let mut entries = Vec::new();

            if let Some(snapshot) = snapshots.get(&output.name) {
                for (path, entry) in &snapshot.entries {
                    let relative = match kind {
                        StoredKind::File => Utf8PathBuf::new(),
                        StoredKind::Directory => match path.strip_prefix(&output.root) {
                            Ok(relative) => relative.to_path_buf(),
                            Err(_) => continue,
                        },
                    };
                    let destination = locate(&target, &relative);

                    let content = match entry.kind {
                        EntryKind::Directory => {
                            fs::create_dir_all(&destination)?;
                            entry.content
                        }
                        EntryKind::File => {
                            if let Some(parent) = destination.parent() {
                                fs::create_dir_all(parent)?;
                            }
                            fs::copy(path, &destination)?;
                            Fingerprint::hash_file(&destination)?
                        }
                    };
                    entries.push(StoredEntry {
                        relative,
                        kind: entry.kind,
                        content,
                    });
                }
            }

            stored.push(StoredOutput {
                name: output.name.clone(),
                kind,
                present,
                entries,
            });
        }

        let manifest = Manifest {
            key: *key,
            outputs: stored,
        };
        let mut writer = BufWriter::new(fs::File::create(dir.join(MANIFEST))?);
        ciborium::into_writer(&manifest, &mut writer).map_err(|e| CacheError::Encode(e.to_string()))?;
        writer.flush()?;

        Ok(())
    }
}

fn corrupt(key: &CacheKey, reason: impl Into<String>) -> CacheError {
    CacheError::Corrupt {
        key: key.to_string(),
        reason: reason.into(),
    }
}

/// `base` itself for a file output, which is stored without a relative path.
fn locate(base: &Utf8Path, relative: &Utf8Path) -> Utf8PathBuf {
    if relative.as_str().is_empty() {
        base.to_path_buf()
    } else {
        base.join(relative)
    }
}

pub(crate) fn remove_path(path: &Utf8Path) -> std::io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

impl BuildCache for LocalBuildCache {
    fn contains(&self, key: &CacheKey) -> bool {
        self.entry_dir(key).join(MANIFEST).is_file()
    }

    fn load(&self, key: &CacheKey, outputs: &[OutputProperty]) -> Result<bool, CacheError> {
        let Some(manifest) = self.read_manifest(key)? else {
            return Ok(false);
        };
        let data = self.entry_dir(key).join(DATA);

        if manifest.outputs.len() != outputs.len() {
            return Err(corrupt(key, "number of output properties differs"));
        }

        // Verify the whole entry before touching any output.
        for (index, (stored, output)) in manifest.outputs.iter().zip(outputs).enumerate() {
            let expected = match output.kind {
                TreeType::File => Some(StoredKind::File),
                TreeType::Directory => Some(StoredKind::Directory),
                TreeType::Aggregate => None,
            };
            if stored.name != output.name || Some(stored.kind) != expected {
                return Err(corrupt(key, format!("output property '{}' doesn't match", output.name)));
            }

            let source = data.join(index.to_string());
            for entry in stored.entries.iter().filter(|entry| entry.kind == EntryKind::File) {
                let path = locate(&source, &entry.relative);
                let actual = Fingerprint::hash_file(&path)
                    .map_err(|e| corrupt(key, format!("'{path}' is unreadable: {e}")))?;
                if actual != entry.content {
                    return Err(corrupt(key, format!("'{path}' has unexpected content")));
                }
            }
        }

        for (index, (stored, output)) in manifest.outputs.iter().zip(outputs).enumerate() {
            let source = data.join(index.to_string());
            remove_path(&output.root)?;
            if !stored.present {
                continue;
            }

            if stored.kind == StoredKind::Directory {
                fs::create_dir_all(&output.root)?;
            }
            for entry in &stored.entries {
                let destination = locate(&output.root, &entry.relative);
                match entry.kind {
                    EntryKind::Directory => fs::create_dir_all(&destination)?,
                    EntryKind::File => {
                        if let Some(parent) = destination.parent() {
                            fs::create_dir_all(parent)?;
                        }
                        fs::copy(locate(&source, &entry.relative), &destination)?;
                    }
                }
            }
        }

        tracing::debug!("restored {} output properties from cache entry {}", outputs.len(), key);
        Ok(true)
    }

    fn store(
        &self,
        key: &CacheKey,
        outputs: &[OutputProperty],
        snapshots: &BTreeMap<String, FileTreeFingerprint>,
    ) -> Result<(), CacheError> {
        if self.contains(key) {
            return Ok(());
        }

        fs::create_dir_all(&self.root)?;
        let temp = self.temp_dir();
        let written = self.write_entry(&temp, key, outputs, snapshots);
        if let Err(e) = written {
            let _ = fs::remove_dir_all(&temp);
            return Err(e);
        }

        match fs::rename(&temp, self.entry_dir(key)) {
            Ok(()) => {
                tracing::debug!("stored cache entry {}", key);
                Ok(())
            }
            // Someone else stored the same key first.
            Err(_) if self.contains(key) => {
                let _ = fs::remove_dir_all(&temp);
                Ok(())
            }
            Err(e) => {
                let _ = fs::remove_dir_all(&temp);
                Err(e.into())
            }
        }
    }
}

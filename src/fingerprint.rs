//! Turning inputs and outputs into fingerprints.

mod files;
mod value;

pub use files::{
    DirectorySensitivity, EntryKind, FileCollection, FileEntry, FileNormalization,
    FileTreeFingerprint, LineEndingSensitivity, PathCase, PathSensitivity, fingerprint_files,
};
pub use value::{Value, ValueFingerprint};

use serde::{Deserialize, Serialize};

use crate::error::FingerprintError;
use crate::hash::Fingerprint;
use crate::work::{InputValue, OutputProperty, TreeType};

/// The recorded fingerprint of one input property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyFingerprint {
    Value {
        hash: Fingerprint,
        deterministic: bool,
    },
    Files(FileTreeFingerprint),
}

impl PropertyFingerprint {
    pub fn hash(&self) -> Fingerprint {
        match self {
            Self::Value { hash, .. } => *hash,
            Self::Files(tree) => tree.hash,
        }
    }

    /// Files are always deterministic; values are unless they contain
    /// something opaque.
    pub fn is_deterministic(&self) -> bool {
        match self {
            Self::Value { deterministic, .. } => *deterministic,
            Self::Files(_) => true,
        }
    }

    pub fn files(&self) -> Option<&FileTreeFingerprint> {
        match self {
            Self::Files(tree) => Some(tree),
            Self::Value { .. } => None,
        }
    }

    /// Only file collections can be empty.
    pub fn is_empty(&self) -> bool {
        self.files().is_some_and(FileTreeFingerprint::is_empty)
    }
}

impl From<ValueFingerprint> for PropertyFingerprint {
    fn from(value: ValueFingerprint) -> Self {
        Self::Value {
            hash: value.hash,
            deterministic: value.deterministic,
        }
    }
}

/// Fingerprints an input value. Absent values fingerprint like
/// [`Value::Null`].
pub fn fingerprint_input(value: &InputValue) -> Result<PropertyFingerprint, FingerprintError> {
    Ok(match value {
        InputValue::Value(value) => value.fingerprint()?.into(),
        InputValue::Files(collection) => PropertyFingerprint::Files(fingerprint_files(collection)?),
        InputValue::Fingerprint(hash) => PropertyFingerprint::Value {
            hash: *hash,
            deterministic: true,
        },
        InputValue::Absent => Value::Null.fingerprint()?.into(),
    })
}

/// Snapshots the current state of an output property on disk.
pub fn snapshot_output(output: &OutputProperty) -> Result<FileTreeFingerprint, FingerprintError> {
    let collection = match output.kind {
        TreeType::File | TreeType::Directory => FileCollection::new([output.root.clone()]),
        TreeType::Aggregate => FileCollection::new(output.files.iter().cloned()),
    };

    fingerprint_files(&collection)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use camino::Utf8PathBuf;

    use super::*;
    use crate::work::OutputProperty;

    #[test]
    fn test_absent_is_null() {
        let absent = fingerprint_input(&InputValue::Absent).unwrap();
        let null = fingerprint_input(&InputValue::Value(Value::Null)).unwrap();
        assert_eq!(absent, null);
        assert!(!absent.is_empty());
    }

    #[test]
    fn test_opaque_input_is_not_deterministic() {
        let fp = fingerprint_input(&InputValue::Value(Value::opaque::<fn()>())).unwrap();
        assert!(!fp.is_deterministic());
    }

    #[test]
    fn test_empty_collection() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let fp = fingerprint_input(&InputValue::Files(FileCollection::new([root]))).unwrap();
        assert!(fp.is_empty());
        assert!(fp.is_deterministic());
    }

    #[test]
    fn test_snapshot_directory_output() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let out = root.join("out");
        fs::create_dir(&out).unwrap();
        fs::write(out.join("a.class"), "bytecode").unwrap();

        let snapshot = snapshot_output(&OutputProperty::directory("classes", &out)).unwrap();
        assert_eq!(snapshot.entries.len(), 1);
        assert!(snapshot.entries.contains_key(&out.join("a.class")));

        let missing = snapshot_output(&OutputProperty::file("jar", root.join("app.jar"))).unwrap();
        assert!(missing.is_empty());
    }

    #[test]
    fn test_snapshot_aggregate_only_sees_its_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        fs::write(root.join("mine.xml"), "1").unwrap();
        fs::write(root.join("theirs.xml"), "2").unwrap();

        let output = OutputProperty::aggregate("reports", &root, [root.join("mine.xml")]);
        let snapshot = snapshot_output(&output).unwrap();
        let paths: Vec<_> = snapshot.entries.keys().cloned().collect();
        assert_eq!(paths, vec![root.join("mine.xml")]);
    }
}

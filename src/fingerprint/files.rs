use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;

use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use serde::{Deserialize, Serialize};

use crate::error::FingerprintError;
use crate::hash::{Fingerprint, FingerprintHasher};

/// How much of a file's path takes part in its fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PathSensitivity {
    /// The full path.
    #[default]
    Absolute,
    /// The path relative to the root it was found under.
    Relative,
    /// Only the file name.
    NameOnly,
    /// Only the content.
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LineEndingSensitivity {
    #[default]
    Sensitive,
    /// `\r\n` and `\r` are read as `\n` in text files. Files that look binary
    /// are hashed as they are.
    Normalize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DirectorySensitivity {
    /// Directories below a root are entries of their own, so an empty
    /// directory changes the fingerprint.
    #[default]
    Default,
    /// Only files count.
    IgnoreDirectories,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PathCase {
    #[default]
    Sensitive,
    Insensitive,
}

/// Normalization applied while fingerprinting a file collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FileNormalization {
    pub paths: PathSensitivity,
    pub line_endings: LineEndingSensitivity,
    pub directories: DirectorySensitivity,
    pub case: PathCase,
}

impl FileNormalization {
    pub fn paths(mut self, paths: PathSensitivity) -> Self {
        self.paths = paths;
        self
    }

    pub fn normalize_line_endings(mut self) -> Self {
        self.line_endings = LineEndingSensitivity::Normalize;
        self
    }

    pub fn ignore_directories(mut self) -> Self {
        self.directories = DirectorySensitivity::IgnoreDirectories;
        self
    }

    pub fn case_insensitive(mut self) -> Self {
        self.case = PathCase::Insensitive;
        self
    }
}

/// A set of files described by their roots.
///
/// Roots may be files or directories; roots that don't exist contribute
/// nothing. The roots themselves are never entries, only what they contain
/// (or, for a file root, the file).
#[derive(Debug, Clone, Default)]
pub struct FileCollection {
    pub roots: Vec<Utf8PathBuf>,
    /// Glob patterns matched against the path relative to the root. When
    /// empty, everything is included.
    pub include: Vec<String>,
    pub normalization: FileNormalization,
}

impl FileCollection {
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Utf8PathBuf>,
    {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn include(mut self, pattern: impl Into<String>) -> Self {
        self.include.push(pattern.into());
        self
    }

    pub fn normalization(mut self, normalization: FileNormalization) -> Self {
        self.normalization = normalization;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntryKind {
    File,
    Directory,
}

/// One file or directory inside a fingerprinted tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub kind: EntryKind,
    /// The path as seen through the collection's [`PathSensitivity`].
    pub normalized: String,
    pub content: Fingerprint,
}

/// Content-derived fingerprint of a file collection, together with the
/// per-path entries it was computed from.
///
/// Entries are keyed by their absolute path, which is what change detection
/// diffs on. The aggregate `hash` only depends on normalized paths and
/// contents, so it is independent of the order the filesystem returns
/// entries in.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileTreeFingerprint {
    pub hash: Fingerprint,
    pub entries: BTreeMap<Utf8PathBuf, FileEntry>,
}

impl FileTreeFingerprint {
    /// The fingerprint of a tree without entries.
    pub fn empty() -> Self {
        Self {
            hash: Fingerprint::EMPTY,
            entries: BTreeMap::new(),
        }
    }

    pub fn from_entries(entries: BTreeMap<Utf8PathBuf, FileEntry>) -> Self {
        if entries.is_empty() {
            return Self::empty();
        }

        let mut sorted: Vec<_> = entries.values().collect();
        sorted.sort_by(|a, b| {
            (&a.normalized, a.kind, a.content).cmp(&(&b.normalized, b.kind, b.content))
        });

        let mut hasher = FingerprintHasher::new();
        hasher.put_u64(sorted.len() as u64);
        for entry in sorted {
            let tag = match entry.kind {
                EntryKind::File => 0,
                EntryKind::Directory => 1,
            };
            hasher
                .put_tag(tag)
                .put_str(&entry.normalized)
                .put_fingerprint(&entry.content);
        }

        Self {
            hash: hasher.finish(),
            entries,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn files(&self) -> impl Iterator<Item = (&Utf8PathBuf, &FileEntry)> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.kind == EntryKind::File)
    }
}

struct Candidate {
    path: Utf8PathBuf,
    normalized: String,
    kind: EntryKind,
}

fn directory_signature() -> Fingerprint {
    Fingerprint::hash(b"kura:directory")
}

/// Fingerprints every file reachable from the collection's roots.
pub fn fingerprint_files(collection: &FileCollection) -> Result<FileTreeFingerprint, FingerprintError> {
    let patterns = collection
        .include
        .iter()
        .map(|pattern| Pattern::new(pattern))
        .collect::<Result<Vec<_>, _>>()?;

    let mut candidates = Vec::new();
    for root in &collection.roots {
        visit_root(root, collection, &patterns, &mut candidates)?;
    }

    let line_endings = collection.normalization.line_endings;
    let entries = candidates
        .into_par_iter()
        .map(|candidate| -> Result<_, FingerprintError> {
            let content = match candidate.kind {
                EntryKind::Directory => directory_signature(),
                EntryKind::File => hash_content(&candidate.path, line_endings)?,
            };
            let entry = FileEntry {
                kind: candidate.kind,
                normalized: candidate.normalized,
                content,
            };
            Ok((candidate.path, entry))
        })
        .collect::<Result<BTreeMap<_, _>, _>>()?;

    Ok(FileTreeFingerprint::from_entries(entries))
}

fn visit_root(
    root: &Utf8Path,
    collection: &FileCollection,
    patterns: &[Pattern],
    candidates: &mut Vec<Candidate>,
) -> Result<(), FingerprintError> {
    let metadata = match fs::metadata(root) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(FingerprintError::file_access(root, e)),
    };

    if metadata.is_file() {
        let relative = root.file_name().unwrap_or(root.as_str());
        if is_included(relative, patterns) {
            candidates.push(candidate(root, relative, EntryKind::File, collection));
        }
        return Ok(());
    }

    walk(root, root, collection, patterns, candidates)
}

fn walk(
    root: &Utf8Path,
    current: &Utf8Path,
    collection: &FileCollection,
    patterns: &[Pattern],
    candidates: &mut Vec<Candidate>,
) -> Result<(), FingerprintError> {
    let read_dir = fs::read_dir(current).map_err(|e| FingerprintError::file_access(current, e))?;

    for entry in read_dir {
        let entry = entry.map_err(|e| FingerprintError::file_access(current, e))?;
        let path = Utf8PathBuf::from_path_buf(entry.path()).map_err(FingerprintError::NonUtf8Path)?;
        let file_type = entry
            .file_type()
            .map_err(|e| FingerprintError::file_access(&path, e))?;

        // Symlinks are followed to files only, so the walk can't loop.
        let is_file = if file_type.is_symlink() {
            match fs::metadata(&path) {
                Ok(target) if target.is_file() => true,
                Ok(_) => continue,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(FingerprintError::file_access(&path, e)),
            }
        } else {
            file_type.is_file()
        };

        let relative = path
            .strip_prefix(root)
            .map(|relative| relative.as_str().replace('\\', "/"))
            .unwrap_or_else(|_| path.to_string());

        if is_file {
            if is_included(&relative, patterns) {
                candidates.push(candidate(&path, &relative, EntryKind::File, collection));
            }
        } else if file_type.is_dir() {
            let keep = patterns.is_empty()
                && collection.normalization.directories == DirectorySensitivity::Default;
            if keep {
                candidates.push(candidate(&path, &relative, EntryKind::Directory, collection));
            }
            walk(root, &path, collection, patterns, candidates)?;
        }
    }

    Ok(())
}

fn is_included(relative: &str, patterns: &[Pattern]) -> bool {
    patterns.is_empty() || patterns.iter().any(|pattern| pattern.matches(relative))
}

fn candidate(
    path: &Utf8Path,
    relative: &str,
    kind: EntryKind,
    collection: &FileCollection,
) -> Candidate {
    let normalization = &collection.normalization;
    let normalized = match normalization.paths {
        PathSensitivity::Absolute => path.as_str().to_string(),
        PathSensitivity::Relative => relative.to_string(),
        PathSensitivity::NameOnly => path.file_name().unwrap_or_default().to_string(),
        PathSensitivity::Ignored => String::new(),
    };
    let normalized = match normalization.case {
        PathCase::Sensitive => normalized,
        PathCase::Insensitive => normalized.to_lowercase(),
    };

    Candidate {
        path: path.to_owned(),
        normalized,
        kind,
    }
}

fn hash_content(path: &Utf8Path, line_endings: LineEndingSensitivity) -> Result<Fingerprint, FingerprintError> {
    match line_endings {
        LineEndingSensitivity::Sensitive => {
            Fingerprint::hash_file(path).map_err(|e| FingerprintError::file_access(path, e))
        }
        LineEndingSensitivity::Normalize => {
            let bytes = fs::read(path).map_err(|e| FingerprintError::file_access(path, e))?;
            Ok(Fingerprint::hash(normalize_line_endings(&bytes)))
        }
    }
}

fn normalize_line_endings(bytes: &[u8]) -> Vec<u8> {
    const SNIFF: usize = 8000;

    if bytes.iter().take(SNIFF).any(|&b| b == 0) {
        return bytes.to_vec();
    }

    let mut out = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter().peekable();
    while let Some(&byte) = iter.next() {
        if byte == b'\r' {
            if iter.peek() == Some(&&b'\n') {
                iter.next();
            }
            out.push(b'\n');
        } else {
            out.push(byte);
        }
    }
    out
}

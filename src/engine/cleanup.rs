use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;

use camino::{Utf8Path, Utf8PathBuf};

use crate::cache::remove_path;
use crate::fingerprint::{EntryKind, FileTreeFingerprint};
use crate::work::{OutputProperty, TreeType};

/// Removes what a previous execution recorded as its outputs. Directories
/// are only removed once empty, so files owned by someone else survive.
///
/// Returns the number of removed entries.
pub(crate) fn remove_recorded<'a, I>(snapshots: I) -> std::io::Result<usize>
where
    I: IntoIterator<Item = &'a FileTreeFingerprint>,
{
    let mut removed = 0;
    let mut directories = Vec::new();

    for snapshot in snapshots {
        for (path, entry) in &snapshot.entries {
            match entry.kind {
                EntryKind::File => {
                    if remove_file(path)? {
                        removed += 1;
                    }
                }
                EntryKind::Directory => directories.push(path.as_path()),
            }
        }
    }

    // Deepest first.
    directories.sort_by_key(|path| std::cmp::Reverse(path.components().count()));
    for directory in directories {
        match fs::remove_dir(directory) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) if e.kind() == ErrorKind::DirectoryNotEmpty => {}
            Err(e) => return Err(e),
        }
    }

    Ok(removed)
}

fn remove_file(path: &Utf8Path) -> std::io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Removes previously produced outputs which the unit no longer declares:
/// whole properties which disappeared, and files which fall outside every
/// declared path.
pub(crate) fn remove_stale(
    previous: &BTreeMap<String, FileTreeFingerprint>,
    outputs: &[OutputProperty],
) -> std::io::Result<usize> {
    let declared: Vec<&Utf8Path> = outputs.iter().flat_map(|output| output.claimed_paths()).collect();

    let mut stale = BTreeMap::new();
    for (name, snapshot) in previous {
        let entries = snapshot
            .entries
            .iter()
            .filter(|(path, _)| !declared.iter().any(|root| path.starts_with(root)))
            .map(|(path, entry)| (path.clone(), entry.clone()))
            .collect::<BTreeMap<_, _>>();

        if !entries.is_empty() {
            stale.insert(name.clone(), FileTreeFingerprint::from_entries(entries));
        }
    }

    remove_recorded(stale.values())
}

/// Wipes the local state of a unit, files and directories alike.
pub(crate) fn remove_local_state(paths: &[Utf8PathBuf]) -> std::io::Result<usize> {
    let mut removed = 0;
    for path in paths {
        if fs::symlink_metadata(path).is_ok() {
            remove_path(path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Prepares the declared outputs for a full execution.
///
/// Without overlaps the outputs belong to this unit alone and are wiped.
/// With overlaps only the files this unit produced last time are removed.
pub(crate) fn prepare_full(
    outputs: &[OutputProperty],
    previous: Option<&BTreeMap<String, FileTreeFingerprint>>,
    overlapping: bool,
) -> std::io::Result<()> {
    if overlapping {
        if let Some(previous) = previous {
            remove_recorded(previous.values())?;
        }
        return Ok(());
    }

    for output in outputs {
        match output.kind {
            TreeType::File => remove_path(&output.root)?,
            TreeType::Directory => {
                remove_path(&output.root)?;
                fs::create_dir_all(&output.root)?;
            }
            TreeType::Aggregate => {
                for file in &output.files {
                    remove_path(file)?;
                }
            }
        }
    }

    Ok(())
}

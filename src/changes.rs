//! Incremental change calculation and the reasons a unit is out of date.

use std::collections::BTreeMap;
use std::fmt::Display;

use camino::Utf8PathBuf;

use crate::fingerprint::{FileTreeFingerprint, PropertyFingerprint};
use crate::hash::Fingerprint;
use crate::history::ExecutionHistoryEntry;
use crate::work::InputBehavior;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub property: String,
    pub kind: ChangeKind,
    pub path: Utf8PathBuf,
    pub normalized: String,
}

/// The changes handed to a unit of work which tracks its inputs.
///
/// When `incremental` is false the unit has to rebuild everything, and the
/// changes list the whole current content as [`ChangeKind::Added`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InputChanges {
    pub incremental: bool,
    pub changes: Vec<FileChange>,
}

impl InputChanges {
    pub fn is_incremental(&self) -> bool {
        self.incremental
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn for_property<'a>(&'a self, property: &'a str) -> impl Iterator<Item = &'a FileChange> {
        self.changes
            .iter()
            .filter(move |change| change.property == property)
    }

    /// Everything in the tracked properties, reported as added.
    pub fn full(
        current: &BTreeMap<String, PropertyFingerprint>,
        behaviors: &BTreeMap<String, InputBehavior>,
    ) -> Self {
        let mut changes = Vec::new();
        for (property, fingerprint) in tracked(current, behaviors) {
            if let Some(tree) = fingerprint.files() {
                push_all(&mut changes, property, tree, ChangeKind::Added);
            }
        }

        Self {
            incremental: false,
            changes,
        }
    }
}

/// Outcome of comparing the previous and the current input fingerprints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeDetection {
    /// A primary input is empty: skip the work and remove its outputs.
    SkipEmpty { property: String },
    Changes(InputChanges),
}

fn tracked<'a>(
    current: &'a BTreeMap<String, PropertyFingerprint>,
    behaviors: &'a BTreeMap<String, InputBehavior>,
) -> impl Iterator<Item = (&'a String, &'a PropertyFingerprint)> {
    current.iter().filter(|(name, _)| {
        behaviors
            .get(name.as_str())
            .is_some_and(|behavior| behavior.tracks_changes())
    })
}

fn push_all(changes: &mut Vec<FileChange>, property: &str, tree: &FileTreeFingerprint, kind: ChangeKind) {
    for (path, entry) in tree.files() {
        changes.push(FileChange {
            property: property.to_string(),
            kind,
            path: path.clone(),
            normalized: entry.normalized.clone(),
        });
    }
}

/// Computes the file-level changes of the incremental and primary inputs.
///
/// Without `previous` every tracked property is reported as added and the
/// result is not incremental. An empty primary input wins over everything
/// else.
pub fn diff(
    previous: Option<&BTreeMap<String, PropertyFingerprint>>,
    current: &BTreeMap<String, PropertyFingerprint>,
    behaviors: &BTreeMap<String, InputBehavior>,
) -> ChangeDetection {
    let empty_primary = current.iter().find(|(name, fingerprint)| {
        fingerprint.is_empty()
            && behaviors
                .get(name.as_str())
                .is_some_and(|behavior| behavior.skips_when_empty())
    });
    if let Some((property, _)) = empty_primary {
        return ChangeDetection::SkipEmpty {
            property: property.clone(),
        };
    }

    let Some(previous) = previous else {
        return ChangeDetection::Changes(InputChanges::full(current, behaviors));
    };

    let mut incremental = true;
    let mut changes = Vec::new();

    for (property, fingerprint) in tracked(current, behaviors) {
        let before = previous.get(property);
        match (before.and_then(PropertyFingerprint::files), fingerprint.files()) {
            (Some(before), Some(after)) => diff_trees(&mut changes, property, before, after),
            (None, Some(after)) => {
                incremental = false;
                push_all(&mut changes, property, after, ChangeKind::Added);
            }
            // Values can't be diffed per file.
            (_, None) => {
                if before.map(PropertyFingerprint::hash) != Some(fingerprint.hash()) {
                    incremental = false;
                }
            }
        }
    }

    if !incremental {
        return ChangeDetection::Changes(InputChanges::full(current, behaviors));
    }

    ChangeDetection::Changes(InputChanges {
        incremental,
        changes,
    })
}

fn diff_trees(
    changes: &mut Vec<FileChange>,
    property: &str,
    before: &FileTreeFingerprint,
    after: &FileTreeFingerprint,
) {
    let mut found = Vec::new();

    for (path, entry) in after.files() {
        let kind = match before.entries.get(path) {
            None => ChangeKind::Added,
            Some(old) if old.content != entry.content => ChangeKind::Modified,
            Some(_) => continue,
        };
        found.push((path, kind, &entry.normalized));
    }

    for (path, entry) in before.files() {
        let gone = after
            .entries
            .get(path)
            .is_none_or(|now| now.kind != entry.kind);
        if gone {
            found.push((path, ChangeKind::Removed, &entry.normalized));
        }
    }

    found.sort_by(|a, b| a.0.cmp(b.0));
    changes.extend(found.into_iter().map(|(path, kind, normalized)| FileChange {
        property: property.to_string(),
        kind,
        path: path.clone(),
        normalized: normalized.clone(),
    }));
}

/// Why a unit of work isn't up-to-date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildReason {
    NoHistory,
    PreviousFailure,
    ImplementationChanged,
    ImplementationUnknown,
    InputAdded(String),
    InputRemoved(String),
    InputChanged { property: String, tracked: bool },
    NonDeterministicInput(String),
    OutputAdded(String),
    OutputRemoved(String),
    OutputChanged(String),
    /// The unit opted out of up-to-date checks.
    AlwaysRun,
}

impl RebuildReason {
    /// Only content changes of tracked file inputs can be executed
    /// incrementally; everything else needs a full rebuild.
    pub fn allows_incremental(&self) -> bool {
        matches!(self, Self::InputChanged { tracked: true, .. })
    }
}

impl Display for RebuildReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoHistory => f.write_str("no history is available"),
            Self::PreviousFailure => f.write_str("the previous execution failed"),
            Self::ImplementationChanged => f.write_str("the implementation has changed"),
            Self::ImplementationUnknown => f.write_str("the implementation is unknown"),
            Self::InputAdded(name) => write!(f, "input property '{name}' has been added"),
            Self::InputRemoved(name) => write!(f, "input property '{name}' has been removed"),
            Self::InputChanged { property, .. } => write!(f, "input property '{property}' has changed"),
            Self::NonDeterministicInput(name) => {
                write!(f, "input property '{name}' can't be fingerprinted reliably")
            }
            Self::OutputAdded(name) => write!(f, "output property '{name}' has been added"),
            Self::OutputRemoved(name) => write!(f, "output property '{name}' has been removed"),
            Self::OutputChanged(name) => write!(f, "output property '{name}' has changed"),
            Self::AlwaysRun => f.write_str("the work always runs"),
        }
    }
}

/// Current state of a unit, as compared against its history entry.
pub struct CurrentState<'a> {
    pub implementation: Option<Fingerprint>,
    pub inputs: &'a BTreeMap<String, PropertyFingerprint>,
    pub behaviors: &'a BTreeMap<String, InputBehavior>,
    pub outputs: &'a BTreeMap<String, FileTreeFingerprint>,
}

/// Lists every reason `current` differs from `previous`. An empty list means
/// the unit is up-to-date.
pub fn rebuild_reasons(previous: Option<&ExecutionHistoryEntry>, current: &CurrentState<'_>) -> Vec<RebuildReason> {
    let Some(previous) = previous else {
        return vec![RebuildReason::NoHistory];
    };

    let mut reasons = Vec::new();

    if !previous.successful {
        reasons.push(RebuildReason::PreviousFailure);
    }

    match current.implementation {
        None => reasons.push(RebuildReason::ImplementationUnknown),
        Some(now) if previous.implementation != Some(now) => {
            reasons.push(RebuildReason::ImplementationChanged)
        }
        Some(_) => {}
    }

    for (name, fingerprint) in current.inputs {
        if !fingerprint.is_deterministic() {
            reasons.push(RebuildReason::NonDeterministicInput(name.clone()));
            continue;
        }
        match previous.inputs.get(name) {
            None => reasons.push(RebuildReason::InputAdded(name.clone())),
            Some(before) if before.hash() != fingerprint.hash() => {
                let tracked = fingerprint.files().is_some()
                    && before.files().is_some()
                    && current
                        .behaviors
                        .get(name)
                        .is_some_and(|behavior| behavior.tracks_changes());
                reasons.push(RebuildReason::InputChanged {
                    property: name.clone(),
                    tracked,
                });
            }
            Some(_) => {}
        }
    }
    for name in previous.inputs.keys() {
        if !current.inputs.contains_key(name) {
            reasons.push(RebuildReason::InputRemoved(name.clone()));
        }
    }

    for (name, snapshot) in current.outputs {
        match previous.outputs.get(name) {
            None => reasons.push(RebuildReason::OutputAdded(name.clone())),
            Some(before) if before.hash != snapshot.hash || before.entries != snapshot.entries => {
                reasons.push(RebuildReason::OutputChanged(name.clone()))
            }
            Some(_) => {}
        }
    }
    for name in previous.outputs.keys() {
        if !current.outputs.contains_key(name) {
            reasons.push(RebuildReason::OutputRemoved(name.clone()));
        }
    }

    reasons
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::{EntryKind, FileEntry};
    use crate::identity::WorkIdentity;

    fn tree(files: &[(&str, &str)]) -> PropertyFingerprint {
        PropertyFingerprint::Files(FileTreeFingerprint::from_entries(
            files
                .iter()
                .map(|(path, content)| {
                    let entry = FileEntry {
                        kind: EntryKind::File,
                        normalized: path.to_string(),
                        content: Fingerprint::hash(content),
                    };
                    (Utf8PathBuf::from(*path), entry)
                })
                .collect(),
        ))
    }

    fn value(v: &str) -> PropertyFingerprint {
        PropertyFingerprint::Value {
            hash: Fingerprint::hash(v),
            deterministic: true,
        }
    }

    fn behaviors(pairs: &[(&str, InputBehavior)]) -> BTreeMap<String, InputBehavior> {
        pairs.iter().map(|(name, b)| (name.to_string(), *b)).collect()
    }

    fn changes(detection: ChangeDetection) -> InputChanges {
        match detection {
            ChangeDetection::Changes(changes) => changes,
            other => panic!("expected changes, got {other:?}"),
        }
    }

    #[test]
    fn test_no_history_reports_everything_added() {
        let current = BTreeMap::from([
            ("sources".to_string(), tree(&[("/src/b", "b"), ("/src/a", "a")])),
            ("flags".to_string(), value("-O2")),
        ]);
        let behaviors = behaviors(&[
            ("sources", InputBehavior::Incremental),
            ("flags", InputBehavior::NonIncremental),
        ]);

        let result = changes(diff(None, &current, &behaviors));
        assert!(!result.is_incremental());
        let paths: Vec<_> = result.changes.iter().map(|c| (c.kind, c.path.as_str())).collect();
        assert_eq!(paths, vec![(ChangeKind::Added, "/src/a"), (ChangeKind::Added, "/src/b")]);
    }

    #[test]
    fn test_structural_diff() {
        let previous = BTreeMap::from([(
            "sources".to_string(),
            tree(&[("/src/a", "a"), ("/src/b", "b"), ("/src/c", "c")]),
        )]);
        let current = BTreeMap::from([(
            "sources".to_string(),
            tree(&[("/src/a", "a"), ("/src/b", "B"), ("/src/d", "d")]),
        )]);
        let behaviors = behaviors(&[("sources", InputBehavior::Incremental)]);

        let result = changes(diff(Some(&previous), &current, &behaviors));
        assert!(result.is_incremental());
        let found: Vec<_> = result.changes.iter().map(|c| (c.kind, c.path.as_str())).collect();
        assert_eq!(
            found,
            vec![
                (ChangeKind::Modified, "/src/b"),
                (ChangeKind::Removed, "/src/c"),
                (ChangeKind::Added, "/src/d"),
            ]
        );
    }

    #[test]
    fn test_non_incremental_properties_do_not_participate() {
        let previous = BTreeMap::from([("config".to_string(), tree(&[("/c", "1")]))]);
        let current = BTreeMap::from([("config".to_string(), tree(&[("/c", "2")]))]);
        let behaviors = behaviors(&[("config", InputBehavior::NonIncremental)]);

        let result = changes(diff(Some(&previous), &current, &behaviors));
        assert!(result.is_empty());
    }

    #[test]
    fn test_empty_primary_short_circuits() {
        let previous = BTreeMap::from([("sources".to_string(), tree(&[("/src/a", "a")]))]);
        let current = BTreeMap::from([
            ("sources".to_string(), tree(&[])),
            ("other".to_string(), tree(&[("/x", "x")])),
        ]);
        let behaviors = behaviors(&[
            ("sources", InputBehavior::Primary),
            ("other", InputBehavior::Incremental),
        ]);

        assert_eq!(
            diff(Some(&previous), &current, &behaviors),
            ChangeDetection::SkipEmpty {
                property: "sources".into()
            }
        );
        assert_eq!(
            diff(None, &current, &behaviors),
            ChangeDetection::SkipEmpty {
                property: "sources".into()
            }
        );
    }

    #[test]
    fn test_new_tracked_property_is_not_incremental() {
        let previous = BTreeMap::from([("a".to_string(), tree(&[("/a", "a")]))]);
        let current = BTreeMap::from([
            ("a".to_string(), tree(&[("/a", "a")])),
            ("b".to_string(), tree(&[("/b", "b")])),
        ]);
        let behaviors = behaviors(&[("a", InputBehavior::Incremental), ("b", InputBehavior::Incremental)]);

        let result = changes(diff(Some(&previous), &current, &behaviors));
        assert!(!result.is_incremental());
        assert_eq!(result.changes.len(), 2);
    }

    fn entry(inputs: BTreeMap<String, PropertyFingerprint>) -> ExecutionHistoryEntry {
        ExecutionHistoryEntry {
            identity: WorkIdentity::new("w"),
            implementation: Some(Fingerprint::hash("impl")),
            inputs,
            outputs: BTreeMap::new(),
            successful: true,
            cache_key: None,
        }
    }

    #[test]
    fn test_rebuild_reasons() {
        let inputs = BTreeMap::from([
            ("sources".to_string(), tree(&[("/a", "a")])),
            ("flags".to_string(), value("-O2")),
        ]);
        let behaviors = behaviors(&[
            ("sources", InputBehavior::Incremental),
            ("flags", InputBehavior::NonIncremental),
        ]);
        let outputs = BTreeMap::new();
        let previous = entry(inputs.clone());

        let same = CurrentState {
            implementation: Some(Fingerprint::hash("impl")),
            inputs: &inputs,
            behaviors: &behaviors,
            outputs: &outputs,
        };
        assert!(rebuild_reasons(Some(&previous), &same).is_empty());
        assert_eq!(rebuild_reasons(None, &same), vec![RebuildReason::NoHistory]);

        let changed_inputs = BTreeMap::from([
            ("sources".to_string(), tree(&[("/a", "A")])),
            ("flags".to_string(), value("-O2")),
        ]);
        let changed = CurrentState {
            inputs: &changed_inputs,
            ..same
        };
        let reasons = rebuild_reasons(Some(&previous), &changed);
        assert_eq!(
            reasons,
            vec![RebuildReason::InputChanged {
                property: "sources".into(),
                tracked: true
            }]
        );
        assert!(reasons.iter().all(RebuildReason::allows_incremental));

        let new_impl = CurrentState {
            implementation: Some(Fingerprint::hash("impl2")),
            inputs: &inputs,
            behaviors: &behaviors,
            outputs: &outputs,
        };
        let reasons = rebuild_reasons(Some(&previous), &new_impl);
        assert_eq!(reasons, vec![RebuildReason::ImplementationChanged]);
        assert!(!reasons[0].allows_incremental());
    }

    #[test]
    fn test_failed_history_is_never_up_to_date() {
        let inputs = BTreeMap::new();
        let behaviors = BTreeMap::new();
        let outputs = BTreeMap::new();
        let mut previous = entry(BTreeMap::new());
        previous.successful = false;

        let current = CurrentState {
            implementation: Some(Fingerprint::hash("impl")),
            inputs: &inputs,
            behaviors: &behaviors,
            outputs: &outputs,
        };
        assert_eq!(
            rebuild_reasons(Some(&previous), &current),
            vec![RebuildReason::PreviousFailure]
        );
    }
}

//! Detection of outputs shared between units of work.
//!
//! Two sources of evidence are combined. The [`OutputRegistry`] knows which
//! paths every other unit in this build has claimed, and the previous
//! snapshot of a unit's own outputs tells which files on disk are *not* ours:
//! anything present before execution that we didn't leave behind last time
//! was put there by someone else.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::sync::RwLock;

use camino::{Utf8Path, Utf8PathBuf};

use crate::fingerprint::{EntryKind, FileTreeFingerprint};
use crate::identity::WorkIdentity;
use crate::work::OutputProperty;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overlap {
    /// The output property of the unit being checked.
    pub property: String,
    pub path: Utf8PathBuf,
    /// The unit that claimed the path, when known.
    pub owner: Option<WorkIdentity>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlappingOutputs {
    pub overlaps: Vec<Overlap>,
}

impl OverlappingOutputs {
    pub fn first(&self) -> Option<&Overlap> {
        self.overlaps.first()
    }
}

impl Display for OverlappingOutputs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Some(first) = self.first() else {
            return f.write_str("no overlapping outputs");
        };

        write!(f, "output property '{}' overlaps at '{}'", first.property, first.path)?;
        if let Some(owner) = &first.owner {
            write!(f, " (claimed by {owner})")?;
        }
        if self.overlaps.len() > 1 {
            write!(f, " and {} more", self.overlaps.len() - 1)?;
        }
        Ok(())
    }
}

/// Output footprints of every unit executed by one engine.
#[derive(Debug, Default)]
pub struct OutputRegistry {
    claims: RwLock<HashMap<WorkIdentity, Vec<Utf8PathBuf>>>,
}

impl OutputRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the paths claimed by `identity`, replacing earlier claims.
    pub fn claim(&self, identity: &WorkIdentity, outputs: &[OutputProperty]) {
        let mut claims = self.claims.write().unwrap_or_else(|e| e.into_inner());
        claims.insert(identity.clone(), claimed_paths(outputs));
    }

    pub fn claimed_by(&self, identity: &WorkIdentity) -> Vec<Utf8PathBuf> {
        let claims = self.claims.read().unwrap_or_else(|e| e.into_inner());
        claims.get(identity).cloned().unwrap_or_default()
    }

    /// Checks the declared outputs of `identity` against the other units'
    /// claims and against what's on disk right now.
    ///
    /// `previous` is the output snapshot recorded by the last execution,
    /// `current` the snapshot taken just before this one.
    pub fn detect(
        &self,
        identity: &WorkIdentity,
        outputs: &[OutputProperty],
        previous: Option<&BTreeMap<String, FileTreeFingerprint>>,
        current: &BTreeMap<String, FileTreeFingerprint>,
    ) -> Option<OverlappingOutputs> {
        let overlaps = {
            let claims = self.claims.read().unwrap_or_else(|e| e.into_inner());
            against_claims(&claims, identity, outputs)
        };

        with_foreign_files(overlaps, previous, current)
    }

    /// Like [`detect`](Self::detect), but records the claim of `identity`
    /// under the same lock, so of two units racing for one path the second
    /// always sees the first.
    pub fn detect_and_claim(
        &self,
        identity: &WorkIdentity,
        outputs: &[OutputProperty],
        previous: Option<&BTreeMap<String, FileTreeFingerprint>>,
        current: &BTreeMap<String, FileTreeFingerprint>,
    ) -> Option<OverlappingOutputs> {
        let overlaps = {
            let mut claims = self.claims.write().unwrap_or_else(|e| e.into_inner());
            let overlaps = against_claims(&claims, identity, outputs);
            claims.insert(identity.clone(), claimed_paths(outputs));
            overlaps
        };

        with_foreign_files(overlaps, previous, current)
    }
}

fn claimed_paths(outputs: &[OutputProperty]) -> Vec<Utf8PathBuf> {
    outputs
        .iter()
        .flat_map(|output| output.claimed_paths())
        .map(Utf8Path::to_path_buf)
        .collect()
}

fn against_claims(
    claims: &HashMap<WorkIdentity, Vec<Utf8PathBuf>>,
    identity: &WorkIdentity,
    outputs: &[OutputProperty],
) -> Vec<Overlap> {
    let mut overlaps = Vec::new();

    for output in outputs {
        for path in output.claimed_paths() {
            for (owner, claimed) in claims.iter().filter(|(owner, _)| *owner != identity) {
                let hit = claimed
                    .iter()
                    .any(|other| path.starts_with(other) || other.starts_with(path));
                if hit {
                    overlaps.push(Overlap {
                        property: output.name.clone(),
                        path: path.to_path_buf(),
                        owner: Some(owner.clone()),
                    });
                }
            }
        }
    }

    overlaps
}

/// Adds files on disk which the previous execution didn't leave behind.
fn with_foreign_files(
    mut overlaps: Vec<Overlap>,
    previous: Option<&BTreeMap<String, FileTreeFingerprint>>,
    current: &BTreeMap<String, FileTreeFingerprint>,
) -> Option<OverlappingOutputs> {
    for (property, snapshot) in current {
        let before = previous.and_then(|previous| previous.get(property));
        for (path, entry) in snapshot.files() {
            let ours = before
                .and_then(|before| before.entries.get(path))
                .is_some_and(|recorded| recorded.kind == EntryKind::File && recorded.content == entry.content);
            let known = overlaps.iter().any(|overlap| overlap.path == *path);
            if !ours && !known {
                overlaps.push(Overlap {
                    property: property.clone(),
                    path: path.clone(),
                    owner: None,
                });
            }
        }
    }

    if overlaps.is_empty() {
        None
    } else {
        Some(OverlappingOutputs { overlaps })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::FileEntry;
    use crate::hash::Fingerprint;

    fn tree(files: &[(&str, &str)]) -> FileTreeFingerprint {
        FileTreeFingerprint::from_entries(
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
        )
    }

    #[test]
    fn test_directory_containment_is_overlap() {
        let registry = OutputRegistry::new();
        let a = WorkIdentity::new("a");
        let b = WorkIdentity::new("b");
        registry.claim(&a, &[OutputProperty::directory("out", "/build/out")]);

        let nested = [OutputProperty::file("jar", "/build/out/app.jar")];
        let found = registry.detect(&b, &nested, None, &BTreeMap::new()).unwrap();
        assert_eq!(found.overlaps.len(), 1);
        assert_eq!(found.overlaps[0].owner, Some(a.clone()));

        let sibling = [OutputProperty::directory("out", "/build/output")];
        assert_eq!(registry.detect(&b, &sibling, None, &BTreeMap::new()), None);
    }

    #[test]
    fn test_own_claims_are_not_overlaps() {
        let registry = OutputRegistry::new();
        let a = WorkIdentity::new("a");
        let outputs = [OutputProperty::directory("out", "/build/out")];
        registry.claim(&a, &outputs);
        assert_eq!(registry.detect(&a, &outputs, None, &BTreeMap::new()), None);
        assert_eq!(registry.claimed_by(&a), vec![Utf8PathBuf::from("/build/out")]);
    }

    #[test]
    fn test_foreign_files_on_disk() {
        let registry = OutputRegistry::new();
        let a = WorkIdentity::new("a");
        let outputs = [OutputProperty::directory("out", "/build/out")];

        let previous = BTreeMap::from([("out".to_string(), tree(&[("/build/out/a", "1")]))]);

        let unchanged = BTreeMap::from([("out".to_string(), tree(&[("/build/out/a", "1")]))]);
        assert_eq!(registry.detect(&a, &outputs, Some(&previous), &unchanged), None);

        let foreign = BTreeMap::from([(
            "out".to_string(),
            tree(&[("/build/out/a", "1"), ("/build/out/b", "2")]),
        )]);
        let found = registry.detect(&a, &outputs, Some(&previous), &foreign).unwrap();
        assert_eq!(found.overlaps.len(), 1);
        assert_eq!(found.overlaps[0].path, Utf8PathBuf::from("/build/out/b"));
        assert_eq!(found.overlaps[0].owner, None);

        // without history nothing on disk can be ours
        assert!(registry.detect(&a, &outputs, None, &unchanged).is_some());
    }

    #[test]
    fn test_display() {
        let found = OverlappingOutputs {
            overlaps: vec![
                Overlap {
                    property: "out".into(),
                    path: "/build/out".into(),
                    owner: Some(WorkIdentity::new("compile:a")),
                },
                Overlap {
                    property: "out".into(),
                    path: "/build/out/x".into(),
                    owner: None,
                },
            ],
        };
        assert_eq!(
            found.to_string(),
            "output property 'out' overlaps at '/build/out' (claimed by compile:a) and 1 more"
        );
    }

    #[test]
    fn test_racing_claims_see_each_other() {
        use std::sync::Barrier;
        use std::thread;

        for _ in 0..200 {
            let registry = OutputRegistry::new();
            let barrier = Barrier::new(2);
            let outputs = [OutputProperty::directory("out", "/build/shared")];

            let found: Vec<_> = thread::scope(|scope| {
                let handles: Vec<_> = ["a", "b"]
                    .into_iter()
                    .map(|name| {
                        let (registry, barrier, outputs) = (&registry, &barrier, &outputs);
                        scope.spawn(move || {
                            barrier.wait();
                            registry.detect_and_claim(&WorkIdentity::new(name), outputs, None, &BTreeMap::new())
                        })
                    })
                    .collect();
                handles.into_iter().map(|handle| handle.join().unwrap()).collect()
            });

            assert_eq!(found.iter().filter(|found| found.is_some()).count(), 1);
        }
    }

    #[test]
    fn test_detect_and_claim_records_claim() {
        let registry = OutputRegistry::new();
        let a = WorkIdentity::new("a");
        let outputs = [OutputProperty::directory("out", "/build/out")];
        assert_eq!(registry.detect_and_claim(&a, &outputs, None, &BTreeMap::new()), None);
        assert_eq!(registry.claimed_by(&a), vec![Utf8PathBuf::from("/build/out")]);

        let b = WorkIdentity::new("b");
        let found = registry.detect_and_claim(&b, &outputs, None, &BTreeMap::new()).unwrap();
        assert_eq!(found.overlaps[0].owner, Some(a));
    }
}

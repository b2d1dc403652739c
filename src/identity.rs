use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::IdentityError;
use crate::hash::{Fingerprint, FingerprintHasher};

/// Fingerprints of the identity inputs, keyed by property name.
pub type IdentityInputs = BTreeMap<String, Fingerprint>;

/// Stable identifier of a unit of work.
///
/// Equal identities share one execution history, one workspace and are
/// never executed concurrently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkIdentity(Arc<str>);

impl WorkIdentity {
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(Arc::from(value.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fingerprint of the identity string, used to address on-disk state.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::hash(self.0.as_bytes())
    }
}

impl Display for WorkIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkIdentity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Default identity derivation: a hash over the work kind and the sorted
/// identity inputs.
pub fn identify(kind: &str, inputs: &IdentityInputs) -> Result<WorkIdentity, IdentityError> {
    let mut hasher = FingerprintHasher::new();
    hasher.put_str(kind).put_u64(inputs.len() as u64);
    for (name, fingerprint) in inputs {
        hasher.put_str(name).put_fingerprint(fingerprint);
    }

    Ok(WorkIdentity::new(format!("{kind}:{}", hasher.finish())))
}

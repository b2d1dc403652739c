//! Cache key computation and the decision whether a unit may use the cache.

use std::collections::BTreeMap;
use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::fingerprint::PropertyFingerprint;
use crate::hash::{Fingerprint, FingerprintHasher};
use crate::identity::WorkIdentity;
use crate::overlap::OverlappingOutputs;
use crate::work::{OutputProperty, TreeType};

/// Address of a unit's outputs in the build cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(pub Fingerprint);

impl CacheKey {
    pub fn fingerprint(&self) -> Fingerprint {
        self.0
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachingDisabledReason {
    OverlappingOutputs(String),
    /// Supplied by the unit of work itself.
    Disabled(String),
    NonDeterministicInput(String),
    UnknownImplementation,
    NonCacheableOutput(String),
    /// The unit may load from the cache but not store into it.
    StoreDisabled,
    /// Caching is turned off for the whole engine.
    CacheUnavailable,
}

impl Display for CachingDisabledReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OverlappingOutputs(detail) => write!(f, "overlapping outputs: {detail}"),
            Self::Disabled(reason) => write!(f, "caching disabled by the work: {reason}"),
            Self::NonDeterministicInput(name) => {
                write!(f, "input property '{name}' can't be fingerprinted reliably")
            }
            Self::UnknownImplementation => f.write_str("the implementation is unknown"),
            Self::NonCacheableOutput(name) => write!(f, "output property '{name}' isn't cacheable"),
            Self::StoreDisabled => f.write_str("storing into the cache is disabled"),
            Self::CacheUnavailable => f.write_str("no build cache is configured"),
        }
    }
}

/// Whether, and under which key, a single execution attempt uses the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachingState {
    pub key: Option<CacheKey>,
    pub disabled: Option<CachingDisabledReason>,
    /// Loading can stay allowed while caching is otherwise disabled, for
    /// units which only load.
    pub load_allowed: bool,
}

impl CachingState {
    pub fn eligible(&self) -> bool {
        self.disabled.is_none() && self.key.is_some()
    }

    pub fn can_load(&self) -> bool {
        self.key.is_some() && self.load_allowed
    }

    pub fn can_store(&self) -> bool {
        self.eligible()
    }

    pub fn disabled_reason(&self) -> Option<&CachingDisabledReason> {
        self.disabled.as_ref()
    }
}

/// Everything the resolver looks at, already fingerprinted.
pub struct CachingInputs<'a> {
    pub identity: &'a WorkIdentity,
    pub implementation: Option<Fingerprint>,
    pub inputs: &'a BTreeMap<String, PropertyFingerprint>,
    pub outputs: &'a [OutputProperty],
    pub overlap: Option<&'a OverlappingOutputs>,
    pub disabled: Option<&'a str>,
    pub allow_load: bool,
    pub allow_store: bool,
}

/// Computes the cache key over the identity, the implementation, the inputs
/// sorted by name and the declared output names and types.
pub fn cache_key(
    identity: &WorkIdentity,
    implementation: Fingerprint,
    inputs: &BTreeMap<String, PropertyFingerprint>,
    outputs: &[OutputProperty],
) -> CacheKey {
    let mut hasher = FingerprintHasher::new();
    hasher
        .put_str(identity.as_str())
        .put_fingerprint(&implementation)
        .put_u64(inputs.len() as u64);

    for (name, fingerprint) in inputs {
        hasher.put_str(name).put_fingerprint(&fingerprint.hash());
    }

    let mut declared: Vec<_> = outputs
        .iter()
        .map(|output| (output.name.as_str(), tree_tag(output.kind)))
        .collect();
    declared.sort_unstable();

    hasher.put_u64(declared.len() as u64);
    for (name, tag) in declared {
        hasher.put_str(name).put_tag(tag);
    }

    CacheKey(hasher.finish())
}

fn tree_tag(kind: TreeType) -> u8 {
    match kind {
        TreeType::File => 0,
        TreeType::Directory => 1,
        TreeType::Aggregate => 2,
    }
}

/// Decides the caching state of one attempt. The first applicable reason
/// wins; without a reliable implementation or reliable inputs there is no
/// key at all.
pub fn resolve(inputs: &CachingInputs<'_>) -> CachingState {
    let non_deterministic = inputs
        .inputs
        .iter()
        .find(|(_, fingerprint)| !fingerprint.is_deterministic())
        .map(|(name, _)| name.clone());

    let key = match (inputs.implementation, &non_deterministic) {
        (Some(implementation), None) => Some(cache_key(
            inputs.identity,
            implementation,
            inputs.inputs,
            inputs.outputs,
        )),
        _ => None,
    };

    let disabled = if let Some(overlap) = inputs.overlap {
        Some(CachingDisabledReason::OverlappingOutputs(overlap.to_string()))
    } else if let Some(reason) = inputs.disabled {
        Some(CachingDisabledReason::Disabled(reason.to_string()))
    } else if let Some(name) = non_deterministic {
        Some(CachingDisabledReason::NonDeterministicInput(name))
    } else if inputs.implementation.is_none() {
        Some(CachingDisabledReason::UnknownImplementation)
    } else if let Some(output) = inputs
        .outputs
        .iter()
        .find(|output| output.kind == TreeType::Aggregate)
    {
        Some(CachingDisabledReason::NonCacheableOutput(output.name.clone()))
    } else if !inputs.allow_store {
        Some(CachingDisabledReason::StoreDisabled)
    } else {
        None
    };

    // A load-only unit keeps loading; any other reason disables both ways.
    let load_allowed = inputs.allow_load
        && matches!(disabled, None | Some(CachingDisabledReason::StoreDisabled));

    CachingState {
        key,
        disabled,
        load_allowed,
    }
}

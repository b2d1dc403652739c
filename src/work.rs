//! The client side of the engine: how a unit of work describes itself.
//!
//! Every kind of work (compiling, running tests, unpacking an archive, ...)
//! implements [`UnitOfWork`]. The engine never looks at what the work *does*;
//! it only looks at what the work *declares*: its identity inputs, its
//! regular inputs, its outputs and the [`WorkOptions`] it runs under.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};

use crate::caching::CachingState;
use crate::changes::InputChanges;
use crate::error::{FingerprintError, IdentityError};
use crate::fingerprint::{FileCollection, FileTreeFingerprint, Value};
use crate::hash::{Fingerprint, FingerprintHasher};
use crate::identity::{self, IdentityInputs, WorkIdentity};

/// How changes to an input property are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputBehavior {
    /// Any change triggers a full rebuild, and the changes can't be queried.
    NonIncremental,
    /// Changes may be executed incrementally and are reported to the work.
    Incremental,
    /// Like [`InputBehavior::Incremental`], and additionally: when the
    /// property is empty, the work is skipped and its previous outputs are
    /// removed.
    Primary,
}

impl InputBehavior {
    pub fn tracks_changes(self) -> bool {
        matches!(self, Self::Incremental | Self::Primary)
    }

    pub fn skips_when_empty(self) -> bool {
        matches!(self, Self::Primary)
    }
}

/// The value of an input property.
#[derive(Debug, Clone)]
pub enum InputValue {
    Value(Value),
    Files(FileCollection),
    /// A fingerprint the client computed itself.
    Fingerprint(Fingerprint),
    /// The property has no value.
    Absent,
}

#[derive(Debug, Clone)]
pub struct InputProperty {
    pub name: String,
    pub behavior: InputBehavior,
    pub value: InputValue,
}

impl InputProperty {
    /// A non-incremental value property.
    pub fn value(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            behavior: InputBehavior::NonIncremental,
            value: InputValue::Value(value.into()),
        }
    }

    pub fn files(name: impl Into<String>, behavior: InputBehavior, files: FileCollection) -> Self {
        Self {
            name: name.into(),
            behavior,
            value: InputValue::Files(files),
        }
    }

    pub fn fingerprint(name: impl Into<String>, fingerprint: Fingerprint) -> Self {
        Self {
            name: name.into(),
            behavior: InputBehavior::NonIncremental,
            value: InputValue::Fingerprint(fingerprint),
        }
    }

    pub fn absent(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            behavior: InputBehavior::NonIncremental,
            value: InputValue::Absent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TreeType {
    File,
    Directory,
    /// A root with an explicit list of constituent paths below it.
    Aggregate,
}

#[derive(Debug, Clone)]
pub struct OutputProperty {
    pub name: String,
    pub kind: TreeType,
    pub root: Utf8PathBuf,
    /// Constituent paths, only used by [`TreeType::Aggregate`].
    pub files: Vec<Utf8PathBuf>,
}

impl OutputProperty {
    pub fn file(name: impl Into<String>, path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            name: name.into(),
            kind: TreeType::File,
            root: path.into(),
            files: Vec::new(),
        }
    }

    pub fn directory(name: impl Into<String>, path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            name: name.into(),
            kind: TreeType::Directory,
            root: path.into(),
            files: Vec::new(),
        }
    }

    pub fn aggregate<I, P>(name: impl Into<String>, root: impl Into<Utf8PathBuf>, files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Utf8PathBuf>,
    {
        Self {
            name: name.into(),
            kind: TreeType::Aggregate,
            root: root.into(),
            files: files.into_iter().map(Into::into).collect(),
        }
    }

    /// The paths this property claims on disk.
    pub fn claimed_paths(&self) -> Vec<&Utf8Path> {
        match self.kind {
            TreeType::File | TreeType::Directory => vec![self.root.as_path()],
            TreeType::Aggregate => self.files.iter().map(|file| file.as_path()).collect(),
        }
    }
}

/// Identifies the code which executes the work, so that changing that code
/// invalidates history and cache entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImplementationSnapshot {
    pub type_name: String,
    /// `None` when the implementation can't be identified reliably.
    pub fingerprint: Option<Fingerprint>,
}

impl ImplementationSnapshot {
    pub fn new(type_name: impl Into<String>, version: &str) -> Self {
        let type_name = type_name.into();
        let fingerprint = FingerprintHasher::new()
            .put_str(&type_name)
            .put_str(version)
            .finish();

        Self {
            type_name,
            fingerprint: Some(fingerprint),
        }
    }

    pub fn of<T: ?Sized>() -> Self {
        Self::new(std::any::type_name::<T>(), "")
    }

    pub fn unknown(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fingerprint: None,
        }
    }

    /// Combines snapshots in visitation order. Unknown if any part is unknown.
    pub fn combine(snapshots: &[ImplementationSnapshot]) -> Option<Fingerprint> {
        let mut hasher = FingerprintHasher::new();
        hasher.put_u64(snapshots.len() as u64);
        for snapshot in snapshots {
            hasher.put_fingerprint(snapshot.fingerprint.as_ref()?);
        }
        Some(hasher.finish())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputChangeTrackingStrategy {
    /// Nothing to track, the work is always executed in full.
    #[default]
    None,
    /// Changes of incremental and primary inputs are tracked.
    IncrementalParameters,
}

impl InputChangeTrackingStrategy {
    pub fn requires_input_changes(self) -> bool {
        matches!(self, Self::IncrementalParameters)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverlappingOutputHandling {
    DetectOverlaps,
    #[default]
    IgnoreOverlaps,
}

/// Rewraps a fingerprinting failure with work-specific context, or returns
/// `None` to downgrade it.
pub type ErrorDecorator = Arc<dyn Fn(FingerprintError) -> Option<anyhow::Error> + Send + Sync>;

/// Called once inputs are fingerprinted and the caching state is known.
pub type SnapshotListener = Arc<dyn Fn(&CachingState) + Send + Sync>;

/// Declarative execution behavior of a unit of work.
#[derive(Clone)]
pub struct WorkOptions {
    pub timeout: Option<Duration>,
    pub caching_disabled: Option<String>,
    pub allow_cache_load: bool,
    pub allow_cache_store: bool,
    pub overlapping_outputs: OverlappingOutputHandling,
    pub input_change_tracking: InputChangeTrackingStrategy,
    pub cleanup_outputs_on_non_incremental: bool,
    pub cleanup_stale_outputs: bool,
    pub skip_if_unchanged: bool,
    pub decorate_input_error: Option<ErrorDecorator>,
    pub decorate_output_error: Option<ErrorDecorator>,
    pub on_inputs_snapshotted: Option<SnapshotListener>,
}

impl Default for WorkOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            caching_disabled: None,
            allow_cache_load: true,
            allow_cache_store: true,
            overlapping_outputs: OverlappingOutputHandling::default(),
            input_change_tracking: InputChangeTrackingStrategy::default(),
            cleanup_outputs_on_non_incremental: true,
            cleanup_stale_outputs: false,
            skip_if_unchanged: true,
            decorate_input_error: None,
            decorate_output_error: None,
            on_inputs_snapshotted: None,
        }
    }
}

impl Debug for WorkOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkOptions")
            .field("timeout", &self.timeout)
            .field("caching_disabled", &self.caching_disabled)
            .field("allow_cache_load", &self.allow_cache_load)
            .field("allow_cache_store", &self.allow_cache_store)
            .field("overlapping_outputs", &self.overlapping_outputs)
            .field("input_change_tracking", &self.input_change_tracking)
            .field("cleanup_outputs_on_non_incremental", &self.cleanup_outputs_on_non_incremental)
            .field("cleanup_stale_outputs", &self.cleanup_stale_outputs)
            .field("skip_if_unchanged", &self.skip_if_unchanged)
            .finish_non_exhaustive()
    }
}

impl WorkOptions {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn disable_caching(mut self, reason: impl Into<String>) -> Self {
        self.caching_disabled = Some(reason.into());
        self
    }

    pub fn load_only(mut self) -> Self {
        self.allow_cache_store = false;
        self
    }

    pub fn store_only(mut self) -> Self {
        self.allow_cache_load = false;
        self
    }

    pub fn detect_overlaps(mut self) -> Self {
        self.overlapping_outputs = OverlappingOutputHandling::DetectOverlaps;
        self
    }

    pub fn incremental(mut self) -> Self {
        self.input_change_tracking = InputChangeTrackingStrategy::IncrementalParameters;
        self
    }

    pub fn cleanup_stale_outputs(mut self) -> Self {
        self.cleanup_stale_outputs = true;
        self
    }

    pub fn keep_outputs_on_non_incremental(mut self) -> Self {
        self.cleanup_outputs_on_non_incremental = false;
        self
    }

    pub fn always_run(mut self) -> Self {
        self.skip_if_unchanged = false;
        self
    }

    pub fn decorate_input_error<F>(mut self, decorator: F) -> Self
    where
        F: Fn(FingerprintError) -> Option<anyhow::Error> + Send + Sync + 'static,
    {
        self.decorate_input_error = Some(Arc::new(decorator));
        self
    }

    pub fn decorate_output_error<F>(mut self, decorator: F) -> Self
    where
        F: Fn(FingerprintError) -> Option<anyhow::Error> + Send + Sync + 'static,
    {
        self.decorate_output_error = Some(Arc::new(decorator));
        self
    }

    pub fn on_inputs_snapshotted<F>(mut self, listener: F) -> Self
    where
        F: Fn(&CachingState) + Send + Sync + 'static,
    {
        self.on_inputs_snapshotted = Some(Arc::new(listener));
        self
    }
}

/// Tripped when the work's declared timeout elapses. Long running work
/// should poll it and return early.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything the work receives when it is asked to execute.
pub struct ExecutionRequest<'a> {
    pub workspace: &'a Utf8Path,
    /// Present when the work tracks input changes.
    pub input_changes: Option<&'a InputChanges>,
    /// Outputs recorded by the previous execution, if there was one.
    pub previous_outputs: Option<&'a BTreeMap<String, FileTreeFingerprint>>,
    pub cancellation: &'a CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkResult {
    DidWork,
    DidNoWork,
}

#[derive(Debug, Clone)]
pub struct WorkOutput<T> {
    pub result: WorkResult,
    pub output: T,
}

impl<T> WorkOutput<T> {
    pub fn did_work(output: T) -> Self {
        Self {
            result: WorkResult::DidWork,
            output,
        }
    }

    pub fn did_no_work(output: T) -> Self {
        Self {
            result: WorkResult::DidNoWork,
            output,
        }
    }
}

/// Collects problems found while validating a work definition.
#[derive(Debug, Default)]
pub struct ValidationContext {
    problems: Vec<String>,
}

impl ValidationContext {
    pub fn problem(&mut self, message: impl Into<String>) {
        self.problems.push(message.into());
    }

    pub fn problems(&self) -> &[String] {
        &self.problems
    }

    pub(crate) fn into_problems(self) -> Vec<String> {
        self.problems
    }
}

/// A unit of work the engine can identify, fingerprint, execute and cache.
///
/// Only [`kind`](Self::kind), [`outputs`](Self::outputs),
/// [`execute`](Self::execute) and
/// [`load_restored_output`](Self::load_restored_output) are required; the
/// other capabilities have defaults matching the most common case.
pub trait UnitOfWork: Send + Sync {
    /// The opaque result handed back to the caller.
    type Output: Send;

    /// The kind of work, e.g. `"compile"`. Identities are unique per kind.
    fn kind(&self) -> &str;

    fn display_name(&self) -> String {
        self.kind().to_string()
    }

    /// Inputs which determine the identity. They are always fingerprinted,
    /// even when the execution is short-circuited later.
    fn identity_inputs(&self) -> Vec<InputProperty> {
        Vec::new()
    }

    fn identify(&self, inputs: &IdentityInputs) -> Result<WorkIdentity, IdentityError> {
        identity::identify(self.kind(), inputs)
    }

    /// Inputs used for up-to-date checks and the cache key, but not for the
    /// identity.
    fn inputs(&self) -> Vec<InputProperty> {
        Vec::new()
    }

    fn outputs(&self, workspace: &Utf8Path) -> Vec<OutputProperty>;

    /// Scratch paths the work keeps between executions. They are neither
    /// fingerprinted nor cached, and are wiped before every full execution
    /// and before outputs are restored from the cache.
    fn local_state(&self, _workspace: &Utf8Path) -> Vec<Utf8PathBuf> {
        Vec::new()
    }

    /// Implementations are combined in the order they are returned.
    fn implementations(&self) -> Vec<ImplementationSnapshot> {
        vec![ImplementationSnapshot::of::<Self>()]
    }

    fn options(&self) -> WorkOptions {
        WorkOptions::default()
    }

    fn validate(&self, _context: &mut ValidationContext) {}

    fn execute(&self, request: ExecutionRequest<'_>) -> anyhow::Result<WorkOutput<Self::Output>>;

    /// Rebuilds the output object from the outputs on disk, for executions
    /// which didn't invoke [`execute`](Self::execute).
    fn load_restored_output(&self, workspace: &Utf8Path) -> anyhow::Result<Self::Output>;
}

//! The execution orchestrator.
//!
//! One call to [`ExecutionEngine::execute`] drives a unit of work through
//! the state machine below, from identification to the history update:
//!
//! ```text
//! Identifying -> CheckingHistory -> { UpToDate | CacheHit | ExecutingFull
//!     | ExecutingIncremental | SkippingEmpty } -> SnapshottingOutputs
//!     -> UpdatingHistory -> Done
//! ```
//!
//! Any state can end in `Failed`. A failure only ever affects the unit being
//! executed; history and cache entries of other identities are untouched.

mod cleanup;
mod timeout;


use std::collections::{BTreeMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use camino::Utf8PathBuf;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use tracing::Level;

use crate::cache::{BuildCache, LocalBuildCache};
use crate::caching::{self, CachingDisabledReason, CachingInputs, CachingState};
use crate::changes::{self, ChangeDetection, CurrentState, InputChanges, RebuildReason};
use crate::config::EngineConfig;
use crate::error::{ExecutionError, FingerprintError, IdentityError};
use crate::fingerprint::{self, FileTreeFingerprint, PropertyFingerprint};
use crate::hash::{Fingerprint, FingerprintHasher};
use crate::history::{ExecutionHistoryEntry, FsHistoryStore, HistoryStore, MemoryHistoryStore};
use crate::identity::{IdentityInputs, WorkIdentity};
use crate::overlap::{OutputRegistry, OverlappingOutputs};
use crate::work::{
    CancellationToken, ErrorDecorator, ExecutionRequest, ImplementationSnapshot, InputBehavior,
    InputValue, OutputProperty, OverlappingOutputHandling, TreeType, UnitOfWork, ValidationContext,
    WorkOptions, WorkOutput, WorkResult,
};
use crate::workspace::WorkspaceCoordinator;

use self::timeout::Watchdog;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionState {
    Identifying,
    CheckingHistory,
    UpToDate,
    CacheHit,
    ExecutingFull,
    ExecutingIncremental,
    SkippingEmpty,
    SnapshottingOutputs,
    UpdatingHistory,
    Done,
    Failed,
}

/// The way a successful execution was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionPath {
    UpToDate,
    CacheHit,
    Full,
    Incremental,
    SkippedEmpty,
}

impl ExecutionPath {
    fn state(self) -> ExecutionState {
        match self {
            Self::UpToDate => ExecutionState::UpToDate,
            Self::CacheHit => ExecutionState::CacheHit,
            Self::Full => ExecutionState::ExecutingFull,
            Self::Incremental => ExecutionState::ExecutingIncremental,
            Self::SkippedEmpty => ExecutionState::SkippingEmpty,
        }
    }

    fn executed(self) -> bool {
        matches!(self, Self::Full | Self::Incremental)
    }
}

/// The report of one successful execution attempt.
#[derive(Debug)]
pub struct Execution<T> {
    pub identity: WorkIdentity,
    pub workspace: Utf8PathBuf,
    pub path: ExecutionPath,
    pub result: WorkResult,
    pub output: T,
    pub caching: CachingState,
    /// Why the unit wasn't up-to-date; empty for [`ExecutionPath::UpToDate`].
    pub reasons: Vec<RebuildReason>,
    /// The changes handed to the work, when it tracks them.
    pub input_changes: Option<InputChanges>,
    pub transitions: Vec<ExecutionState>,
}

impl<T> Execution<T> {
    pub fn into_work_output(self) -> WorkOutput<T> {
        WorkOutput {
            result: self.result,
            output: self.output,
        }
    }
}

struct Transitions {
    states: Vec<ExecutionState>,
}

impl Transitions {
    fn new() -> Self {
        Self { states: Vec::new() }
    }

    fn enter(&mut self, state: ExecutionState) {
        tracing::debug!("-> {:?}", state);
        self.states.push(state);
    }
}

/// Builds an [`ExecutionEngine`] from explicitly supplied collaborators.
pub struct EngineBuilder {
    history: Option<Arc<dyn HistoryStore>>,
    cache: Option<Arc<dyn BuildCache>>,
    workspaces: Option<Utf8PathBuf>,
    record_failures: bool,
}

impl EngineBuilder {
    pub fn history(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn BuildCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn workspaces(mut self, root: impl Into<Utf8PathBuf>) -> Self {
        self.workspaces = Some(root.into());
        self
    }

    pub fn record_failures(mut self, record: bool) -> Self {
        self.record_failures = record;
        self
    }

    /// Missing collaborators default to an in-memory history, no cache, and
    /// the default workspace directory.
    pub fn build(self) -> ExecutionEngine {
        let workspaces = self
            .workspaces
            .unwrap_or_else(|| EngineConfig::default().workspace_dir);

        ExecutionEngine {
            history: self
                .history
                .unwrap_or_else(|| Arc::new(MemoryHistoryStore::new())),
            cache: self.cache,
            workspaces: WorkspaceCoordinator::new(workspaces),
            registry: OutputRegistry::new(),
            record_failures: self.record_failures,
        }
    }
}

/// Executes units of work. One engine corresponds to one build: the output
/// registry it keeps for overlap detection lives as long as the engine.
pub struct ExecutionEngine {
    history: Arc<dyn HistoryStore>,
    cache: Option<Arc<dyn BuildCache>>,
    workspaces: WorkspaceCoordinator,
    registry: OutputRegistry,
    record_failures: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CacheLoad {
    Hit,
    Miss,
    /// The entry existed but couldn't be restored.
    Unusable,
}

/// What the checking phase found out about a unit.
struct Snapshot {
    previous: Option<ExecutionHistoryEntry>,
    implementation: Option<Fingerprint>,
    inputs: BTreeMap<String, PropertyFingerprint>,
    behaviors: BTreeMap<String, InputBehavior>,
    before: BTreeMap<String, FileTreeFingerprint>,
    overlap: Option<OverlappingOutputs>,
    caching: CachingState,
}

impl ExecutionEngine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder {
            history: None,
            cache: None,
            workspaces: None,
            record_failures: true,
        }
    }

    /// Wires the filesystem-backed history, cache and workspaces.
    pub fn from_config(config: &EngineConfig) -> Self {
        let mut builder = Self::builder()
            .history(Arc::new(FsHistoryStore::new(&config.history_dir)))
            .workspaces(&config.workspace_dir)
            .record_failures(config.record_failures);

        if config.cache_enabled {
            builder = builder.cache(Arc::new(LocalBuildCache::new(&config.cache_dir)));
        }

        builder.build()
    }

    pub fn registry(&self) -> &OutputRegistry {
        &self.registry
    }

    pub fn workspaces(&self) -> &WorkspaceCoordinator {
        &self.workspaces
    }

    /// Runs many units on the rayon pool. Units sharing an identity are
    /// serialized by their workspace.
    pub fn execute_all<W>(&self, works: &[W]) -> Vec<Result<Execution<W::Output>, ExecutionError>>
    where
        W: UnitOfWork,
    {
        works.par_iter().map(|work| self.execute(work)).collect()
    }

    pub fn execute<W>(&self, work: &W) -> Result<Execution<W::Output>, ExecutionError>
    where
        W: UnitOfWork,
    {
        let name = work.display_name();
        let span = tracing::span!(Level::INFO, "unit", work = %name);
        let _enter = span.enter();

        let mut transitions = Transitions::new();
        let result = self.run(work, &name, &mut transitions);

        match &result {
            Ok(execution) => {
                tracing::info!("{:?} ({:?})", execution.path, execution.result);
            }
            Err(e) => {
                transitions.enter(ExecutionState::Failed);
                tracing::error!("{}", e);
            }
        }

        result.map(|mut execution| {
            execution.transitions = transitions.states;
            execution
        })
    }

    fn run<W>(
        &self,
        work: &W,
        name: &str,
        transitions: &mut Transitions,
    ) -> Result<Execution<W::Output>, ExecutionError>
    where
        W: UnitOfWork,
    {
        let options = work.options();

        transitions.enter(ExecutionState::Identifying);
        let identity = self.identify(work, &options)?;
        tracing::debug!("identity {}", identity);

        let location = self.workspaces.path_for(&identity);
        let outputs = work.outputs(&location);
        let local_state = work.local_state(&location);
        validate(work, name, &outputs)?;

        let workspace = self.workspaces.acquire(&identity)?;

        transitions.enter(ExecutionState::CheckingHistory);
        let snapshot = self.check(work, name, &options, &identity, &outputs)?;

        let detection = changes::diff(
            snapshot
                .previous
                .as_ref()
                .filter(|previous| previous.successful)
                .map(|previous| &previous.inputs),
            &snapshot.inputs,
            &snapshot.behaviors,
        );

        let mut reasons = changes::rebuild_reasons(
            snapshot.previous.as_ref(),
            &CurrentState {
                implementation: snapshot.implementation,
                inputs: &snapshot.inputs,
                behaviors: &snapshot.behaviors,
                outputs: &snapshot.before,
            },
        );
        if !options.skip_if_unchanged {
            reasons.push(RebuildReason::AlwaysRun);
        }
        for reason in &reasons {
            tracing::debug!("not up-to-date: {}", reason);
        }

        let skipping = matches!(detection, ChangeDetection::SkipEmpty { .. });
        let cached = if !skipping && !reasons.is_empty() && snapshot.caching.can_load() {
            self.load_from_cache(&snapshot.caching, &outputs, &local_state)
        } else {
            CacheLoad::Miss
        };

        let tracking = options.input_change_tracking.requires_input_changes();
        let path = match &detection {
            ChangeDetection::SkipEmpty { property } => {
                tracing::debug!("primary input '{}' is empty", property);
                ExecutionPath::SkippedEmpty
            }
            _ if reasons.is_empty() => ExecutionPath::UpToDate,
            _ if cached == CacheLoad::Hit => ExecutionPath::CacheHit,
            ChangeDetection::Changes(changes)
                if tracking
                    && cached == CacheLoad::Miss
                    && snapshot.overlap.is_none()
                    && changes.is_incremental()
                    && reasons.iter().all(RebuildReason::allows_incremental) =>
            {
                ExecutionPath::Incremental
            }
            _ => ExecutionPath::Full,
        };

        transitions.enter(path.state());

        let input_changes = match (&detection, path) {
            (ChangeDetection::Changes(changes), ExecutionPath::Incremental) => Some(changes.clone()),
            (_, ExecutionPath::Full) if tracking => {
                Some(InputChanges::full(&snapshot.inputs, &snapshot.behaviors))
            }
            _ => None,
        };

        let previous_outputs = snapshot
            .previous
            .as_ref()
            .map(|previous| &previous.outputs);

        let (result, output) = match path {
            ExecutionPath::Full | ExecutionPath::Incremental => {
                if path == ExecutionPath::Full {
                    self.prepare_full(work, name, &options, &outputs, &local_state, &snapshot)?;
                }

                let cancellation = CancellationToken::new();
                let request = ExecutionRequest {
                    workspace: workspace.path(),
                    input_changes: input_changes.as_ref(),
                    previous_outputs,
                    cancellation: &cancellation,
                };
                let outcome = self.invoke(work, name, &options, request);

                match outcome {
                    Ok(outcome) => (outcome.result, Some(outcome.output)),
                    Err(e) => {
                        if !matches!(e, ExecutionError::Timeout { .. }) {
                            self.record_failure(&identity, &outputs, &snapshot);
                        }
                        return Err(e);
                    }
                }
            }
            ExecutionPath::SkippedEmpty => {
                let removed = match previous_outputs {
                    Some(previous) => cleanup::remove_recorded(previous.values()).map_err(|source| {
                        ExecutionError::Cleanup {
                            work: name.to_string(),
                            source,
                        }
                    })?,
                    None => 0,
                };
                tracing::debug!("removed {} previous outputs", removed);

                let result = if removed > 0 {
                    WorkResult::DidWork
                } else {
                    WorkResult::DidNoWork
                };
                (result, None)
            }
            ExecutionPath::UpToDate | ExecutionPath::CacheHit => (WorkResult::DidNoWork, None),
        };

        let (after, complete) = if path == ExecutionPath::SkippedEmpty {
            (BTreeMap::new(), true)
        } else {
            transitions.enter(ExecutionState::SnapshottingOutputs);
            self.snapshot_outputs(name, &options, &outputs)?
        };

        // A unit whose output can't be restored must not look up-to-date
        // next time.
        let output = match output {
            Some(output) => output,
            None => work
                .load_restored_output(workspace.path())
                .map_err(ExecutionError::Work)?,
        };

        transitions.enter(ExecutionState::UpdatingHistory);
        let entry = ExecutionHistoryEntry {
            identity: identity.clone(),
            implementation: snapshot.implementation,
            inputs: snapshot.inputs.clone(),
            outputs: after,
            successful: true,
            cache_key: snapshot.caching.key.map(|key| key.fingerprint()),
        };
        self.history.store(&entry)?;

        if path.executed() && complete && snapshot.caching.can_store() {
            self.store_in_cache(&snapshot.caching, &outputs, &entry.outputs);
        }

        transitions.enter(ExecutionState::Done);
        let workspace_path = workspace.path().to_path_buf();
        drop(workspace);

        if path == ExecutionPath::UpToDate {
            reasons.clear();
        }

        Ok(Execution {
            identity,
            workspace: workspace_path,
            path,
            result,
            output,
            caching: snapshot.caching,
            reasons,
            input_changes,
            transitions: Vec::new(),
        })
    }

    fn identify<W>(&self, work: &W, options: &WorkOptions) -> Result<WorkIdentity, ExecutionError>
    where
        W: UnitOfWork,
    {
        let mut seen = HashSet::new();
        let mut inputs = IdentityInputs::new();

        for property in work.identity_inputs() {
            if !seen.insert(property.name.clone()) {
                return Err(IdentityError::Ambiguous {
                    kind: work.kind().to_string(),
                    property: property.name,
                }
                .into());
            }
            if let InputValue::Absent = property.value {
                return Err(IdentityError::MissingInput {
                    kind: work.kind().to_string(),
                    property: property.name,
                }
                .into());
            }

            let fingerprint = fingerprint::fingerprint_input(&property.value).map_err(|e| {
                let source = decorate(options.decorate_input_error.as_ref(), e)
                    .unwrap_or_else(|| anyhow::anyhow!("identity inputs can't be downgraded"));
                IdentityError::Fingerprint {
                    kind: work.kind().to_string(),
                    property: property.name.clone(),
                    source,
                }
            })?;
            inputs.insert(property.name, fingerprint.hash());
        }

        Ok(work.identify(&inputs)?)
    }

    fn check<W>(
        &self,
        work: &W,
        name: &str,
        options: &WorkOptions,
        identity: &WorkIdentity,
        outputs: &[OutputProperty],
    ) -> Result<Snapshot, ExecutionError>
    where
        W: UnitOfWork,
    {
        let previous = match self.history.load(identity) {
            Ok(previous) => previous,
            Err(e) => {
                tracing::warn!("ignoring unreadable history: {}", e);
                None
            }
        };

        let mut inputs = BTreeMap::new();
        let mut behaviors = BTreeMap::new();
        for property in work.inputs() {
            let fingerprint = match fingerprint::fingerprint_input(&property.value) {
                Ok(fingerprint) => fingerprint,
                Err(e) => match decorate(options.decorate_input_error.as_ref(), e) {
                    Some(source) => {
                        return Err(ExecutionError::Fingerprint {
                            work: name.to_string(),
                            property: property.name,
                            source,
                        });
                    }
                    None => {
                        tracing::warn!("input '{}' couldn't be fingerprinted, treating it as volatile", property.name);
                        unreliable(&property.name)
                    }
                },
            };
            behaviors.insert(property.name.clone(), property.behavior);
            inputs.insert(property.name, fingerprint);
        }

        let implementation = ImplementationSnapshot::combine(&work.implementations());
        let (before, _) = self.snapshot_outputs(name, options, outputs)?;

        let overlap = match options.overlapping_outputs {
            OverlappingOutputHandling::DetectOverlaps => self.registry.detect_and_claim(
                identity,
                outputs,
                previous.as_ref().map(|previous| &previous.outputs),
                &before,
            ),
            OverlappingOutputHandling::IgnoreOverlaps => {
                self.registry.claim(identity, outputs);
                None
            }
        };
        if let Some(overlap) = &overlap {
            tracing::warn!("{}", overlap);
        }

        let mut caching = caching::resolve(&CachingInputs {
            identity,
            implementation,
            inputs: &inputs,
            outputs,
            overlap: overlap.as_ref(),
            disabled: options.caching_disabled.as_deref(),
            allow_load: options.allow_cache_load,
            allow_store: options.allow_cache_store,
        });
        if self.cache.is_none() {
            if caching.disabled.is_none() {
                caching.disabled = Some(CachingDisabledReason::CacheUnavailable);
            }
            caching.load_allowed = false;
        }
        if let Some(reason) = caching.disabled_reason() {
            tracing::debug!("caching disabled: {}", reason);
        }

        if let Some(listener) = &options.on_inputs_snapshotted {
            listener(&caching);
        }

        Ok(Snapshot {
            previous,
            implementation,
            inputs,
            behaviors,
            before,
            overlap,
            caching,
        })
    }

    /// Snapshots every declared output. The flag is false when a failure was
    /// downgraded, in which case the snapshot is incomplete.
    fn snapshot_outputs(
        &self,
        name: &str,
        options: &WorkOptions,
        outputs: &[OutputProperty],
    ) -> Result<(BTreeMap<String, FileTreeFingerprint>, bool), ExecutionError> {
        let mut snapshots = BTreeMap::new();
        let mut complete = true;

        for output in outputs {
            let snapshot = match fingerprint::snapshot_output(output) {
                Ok(snapshot) => snapshot,
                Err(e) => match decorate(options.decorate_output_error.as_ref(), e) {
                    Some(source) => {
                        return Err(ExecutionError::OutputSnapshot {
                            work: name.to_string(),
                            property: output.name.clone(),
                            source,
                        });
                    }
                    None => {
                        complete = false;
                        FileTreeFingerprint::empty()
                    }
                },
            };
            snapshots.insert(output.name.clone(), snapshot);
        }

        Ok((snapshots, complete))
    }

    /// Restores the outputs from the cache. Local state is wiped first, so
    /// anything but a miss leaves the unit without it.
    fn load_from_cache(
        &self,
        caching: &CachingState,
        outputs: &[OutputProperty],
        local_state: &[Utf8PathBuf],
    ) -> CacheLoad {
        let (Some(cache), Some(key)) = (&self.cache, caching.key) else {
            return CacheLoad::Miss;
        };
        if !cache.contains(&key) {
            return CacheLoad::Miss;
        }

        if let Err(e) = cleanup::remove_local_state(local_state) {
            tracing::warn!("couldn't remove local state, executing instead: {}", e);
            return CacheLoad::Unusable;
        }

        match cache.load(&key, outputs) {
            Ok(true) => CacheLoad::Hit,
            Ok(false) => CacheLoad::Unusable,
            Err(e) => {
                tracing::warn!("cache entry {} unusable, executing instead: {}", key, e);
                CacheLoad::Unusable
            }
        }
    }

    fn store_in_cache(
        &self,
        caching: &CachingState,
        outputs: &[OutputProperty],
        snapshots: &BTreeMap<String, FileTreeFingerprint>,
    ) {
        let (Some(cache), Some(key)) = (&self.cache, caching.key) else {
            return;
        };

        if let Err(e) = cache.store(&key, outputs, snapshots) {
            tracing::warn!("couldn't store cache entry {}: {}", key, e);
        }
    }

    fn prepare_full<W>(
        &self,
        work: &W,
        name: &str,
        options: &WorkOptions,
        outputs: &[OutputProperty],
        local_state: &[Utf8PathBuf],
        snapshot: &Snapshot,
    ) -> Result<(), ExecutionError>
    where
        W: UnitOfWork,
    {
        let previous = snapshot
            .previous
            .as_ref()
            .map(|previous| &previous.outputs);
        let failed = |source| ExecutionError::Cleanup {
            work: name.to_string(),
            source,
        };

        if options.cleanup_stale_outputs
            && let Some(previous) = previous
        {
            let removed = cleanup::remove_stale(previous, outputs).map_err(failed)?;
            tracing::debug!("removed {} stale outputs of {}", removed, work.kind());
        }

        cleanup::remove_local_state(local_state).map_err(failed)?;

        if options.cleanup_outputs_on_non_incremental {
            cleanup::prepare_full(outputs, previous, snapshot.overlap.is_some()).map_err(failed)?;
        }

        Ok(())
    }

    /// Runs the work's own callback, bounded by its timeout.
    fn invoke<W>(
        &self,
        work: &W,
        name: &str,
        options: &WorkOptions,
        request: ExecutionRequest<'_>,
    ) -> Result<WorkOutput<W::Output>, ExecutionError>
    where
        W: UnitOfWork,
    {
        let token = request.cancellation.clone();
        let watchdog = match options.timeout {
            Some(timeout) => Some(Watchdog::start(timeout, token.clone()).map_err(|e| {
                ExecutionError::Work(anyhow::Error::new(e).context("couldn't start the timeout watchdog"))
            })?),
            None => None,
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| work.execute(request)));
        drop(watchdog);

        if token.is_cancelled()
            && let Some(timeout) = options.timeout
        {
            return Err(ExecutionError::Timeout {
                work: name.to_string(),
                timeout,
            });
        }

        match outcome {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(ExecutionError::Work(e)),
            Err(panic) => {
                let message = if let Some(s) = panic.downcast_ref::<&str>() {
                    format!("work panicked: {s}")
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    format!("work panicked: {s}")
                } else {
                    String::from("work panicked with unknown payload")
                };
                Err(ExecutionError::Panic {
                    work: name.to_string(),
                    message,
                })
            }
        }
    }

    /// Stores a failed entry, so the next attempt rebuilds in full and knows
    /// what this one left behind.
    fn record_failure(&self, identity: &WorkIdentity, outputs: &[OutputProperty], snapshot: &Snapshot) {
        if !self.record_failures {
            return;
        }

        let mut after = BTreeMap::new();
        for output in outputs {
            match fingerprint::snapshot_output(output) {
                Ok(tree) => {
                    after.insert(output.name.clone(), tree);
                }
                Err(e) => {
                    tracing::warn!("not recording failure, output '{}' unreadable: {}", output.name, e);
                    return;
                }
            }
        }

        let entry = ExecutionHistoryEntry {
            identity: identity.clone(),
            implementation: snapshot.implementation,
            inputs: snapshot.inputs.clone(),
            outputs: after,
            successful: false,
            cache_key: None,
        };
        if let Err(e) = self.history.store(&entry) {
            tracing::warn!("couldn't record failure: {}", e);
        }
    }
}

fn decorate(decorator: Option<&ErrorDecorator>, error: FingerprintError) -> Option<anyhow::Error> {
    match decorator {
        Some(decorator) => decorator(error),
        None => Some(error.into()),
    }
}

/// Stand-in for an input whose fingerprinting failure was downgraded.
fn unreliable(property: &str) -> PropertyFingerprint {
    PropertyFingerprint::Value {
        hash: FingerprintHasher::new()
            .put_str("kura:unreliable")
            .put_str(property)
            .finish(),
        deterministic: false,
    }
}

fn validate<W>(work: &W, name: &str, outputs: &[OutputProperty]) -> Result<(), ExecutionError>
where
    W: UnitOfWork,
{
    let mut context = ValidationContext::default();

    let mut inputs = HashSet::new();
    for property in work.inputs() {
        if !inputs.insert(property.name.clone()) {
            context.problem(format!("input property '{}' is declared more than once", property.name));
        }
    }

    let mut names = HashSet::new();
    for output in outputs {
        if !names.insert(output.name.as_str()) {
            context.problem(format!("output property '{}' is declared more than once", output.name));
        }
        match output.kind {
            TreeType::File | TreeType::Directory if !output.files.is_empty() => {
                context.problem(format!(
                    "output property '{}' can't list constituent files",
                    output.name
                ));
            }
            TreeType::Aggregate if output.files.is_empty() => {
                context.problem(format!("aggregate output property '{}' lists no files", output.name));
            }
            _ => {}
        }
        if output.root.as_str().is_empty() {
            context.problem(format!("output property '{}' has no location", output.name));
        }
    }

    work.validate(&mut context);

    let problems = context.into_problems();
    if problems.is_empty() {
        Ok(())
    } else {
        Err(ExecutionError::Validation {
            work: name.to_string(),
            problems,
        })
    }
}

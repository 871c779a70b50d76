//! Pending-operation correlation registry.
//!
//! A [`PendingRegistry`] owns a table of outstanding deferred results keyed by
//! [`CorrelationId`]. A caller creates an operation, hands its id across
//! whatever boundary is relevant, and awaits it. Something else, possibly a
//! reaction fired by the [`EventDispatcher`](crate::EventDispatcher), later
//! completes it by id alone.
//!
//! # Lifecycle
//!
//! ```text
//!             create()
//!                │
//!                ▼
//!          ┌───────────┐  resolve(id) ──► Resolved
//!          │  Pending  │  reject(id)  ──► Rejected
//!          │ (in table)│  deadline    ──► Rejected (TimedOut)
//!          └───────────┘  cancel(id)  ──► Cancelled
//! ```
//!
//! An id is in the table if and only if its operation is still pending. Every
//! transition out of `Pending` removes the entry, cancels any deadline timer
//! and fulfils the waiter exactly once, all under the table lock, so a timer
//! can never race a resolution.
//!
//! # Example
//!
//! ```
//! use rendezvous_runtime::PendingRegistry;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry: PendingRegistry<String> = PendingRegistry::new();
//!
//! let operation = registry.create_with_timeout(Duration::from_secs(5))?;
//! let id = operation.id().clone();
//!
//! registry.resolve(&id, "done".to_string())?;
//! assert_eq!(operation.await?, "done");
//! assert!(registry.get(&id).is_none());
//!
//! // Completing twice is a protocol violation, not a silent no-op.
//! assert!(registry.resolve(&id, "again".to_string()).is_err());
//! # Ok(())
//! # }
//! ```

use crate::config::RegistryConfig;
use crate::error::{OperationError, RegistryError};
use crate::metrics::RegistryMetrics;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rendezvous_core::{CorrelationId, ErrorRecorder, OperationState, RecordedError, Trace};
use serde::Serialize;
use std::collections::HashMap;
use std::future::IntoFuture;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Name of errors synthesized by deadline timers
pub const TIMEOUT_ERROR_NAME: &str = "TimeoutError";

/// The registry's own frames, kept out of creation and timeout traces.
const REGISTRY_FRAME_PREFIXES: &[&str] = &["rendezvous_runtime::registry::"];

type Outcome<T> = Result<T, OperationError>;

/// Armed deadline for one entry.
///
/// `generation` identifies the arming; a timer whose generation no longer
/// matches its entry was replaced and must not fire.
struct Deadline {
    generation: u64,
    timer: JoinHandle<()>,
}

struct Entry<T> {
    completion: oneshot::Sender<Outcome<T>>,
    creation_trace: Trace,
    created_at: DateTime<Utc>,
    deadline: Option<Deadline>,
}

struct Table<T> {
    entries: HashMap<CorrelationId, Entry<T>>,
    next_generation: u64,
}

impl<T> Table<T> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_generation: 0,
        }
    }
}

impl<T> Drop for Table<T> {
    fn drop(&mut self) {
        // Waiters observe `Abandoned` once their senders drop with the table.
        for entry in self.entries.values_mut() {
            if let Some(deadline) = entry.deadline.take() {
                deadline.timer.abort();
            }
        }
        if !self.entries.is_empty() {
            RegistryMetrics::record_discarded(self.entries.len());
        }
    }
}

/// Snapshot of a live operation, returned by [`PendingRegistry::get`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationInfo {
    /// Correlation id
    pub id: CorrelationId,
    /// Current state (always `Pending` while the entry is live)
    pub state: OperationState,
    /// Where the operation was created
    pub creation_trace: Trace,
    /// When the operation was created
    pub created_at: DateTime<Utc>,
    /// Whether a deadline timer is armed
    pub has_deadline: bool,
}

/// A deferred result awaiting completion.
///
/// Await it directly (`operation.await`) or via [`wait`](Self::wait). Read the
/// [`id`](Self::id) first if it has to be handed to someone else.
///
/// Dropping the operation does not remove its registry entry; a later
/// completion is still accepted and its value discarded.
pub struct PendingOperation<T> {
    id: CorrelationId,
    creation_trace: Trace,
    completion: oneshot::Receiver<Outcome<T>>,
}

impl<T> PendingOperation<T> {
    /// Correlation id to hand to whoever will complete this operation
    #[must_use]
    pub const fn id(&self) -> &CorrelationId {
        &self.id
    }

    /// Trace captured when the operation was created
    #[must_use]
    pub const fn creation_trace(&self) -> &Trace {
        &self.creation_trace
    }

    /// Wait for the operation to complete.
    ///
    /// # Errors
    ///
    /// Returns the [`OperationError`] the operation was completed with, or
    /// [`OperationError::Abandoned`] if its registry was dropped first.
    pub async fn wait(self) -> Result<T, OperationError> {
        match self.completion.await {
            Ok(outcome) => outcome,
            Err(_) => Err(OperationError::Abandoned(self.id)),
        }
    }

    /// Take the outcome if the operation has already completed.
    ///
    /// Returns `None` while the operation is still pending. Once an outcome
    /// has been taken, further calls report the operation as abandoned.
    pub fn try_wait(&mut self) -> Option<Result<T, OperationError>> {
        match self.completion.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                Some(Err(OperationError::Abandoned(self.id.clone())))
            }
        }
    }
}

impl<T: Send + 'static> IntoFuture for PendingOperation<T> {
    type Output = Result<T, OperationError>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

impl<T> std::fmt::Debug for PendingOperation<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingOperation")
            .field("id", &self.id)
            .field("creation_trace_frames", &self.creation_trace.len())
            .finish_non_exhaustive()
    }
}

/// Table of outstanding operations keyed by correlation id.
///
/// Cloning is cheap and yields a handle to the same table. Construct one per
/// process, or one per test; there is no global instance.
///
/// Deadlines are driven by tokio timers, so arming one requires a running
/// tokio runtime. Everything else works without one.
pub struct PendingRegistry<T> {
    table: Arc<Mutex<Table<T>>>,
    config: Arc<RegistryConfig>,
}

impl<T> Clone for PendingRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
            config: Arc::clone(&self.config),
        }
    }
}

impl<T: Send + 'static> Default for PendingRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for PendingRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRegistry")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> PendingRegistry<T> {
    /// Create an empty registry with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create an empty registry with the given configuration
    #[must_use]
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            table: Arc::new(Mutex::new(Table::new())),
            config: Arc::new(config),
        }
    }

    /// Configuration in effect
    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Lock the table.
    ///
    /// # Panics
    ///
    /// Panics if the lock is poisoned (indicates a panic in another thread)
    fn table(&self) -> MutexGuard<'_, Table<T>> {
        lock_table(&self.table)
    }

    /// Create and register a new pending operation.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a panic in another thread)
    #[must_use]
    pub fn create(&self) -> PendingOperation<T> {
        let id = CorrelationId::generate();
        let creation_trace = if self.config.capture_traces {
            Trace::capture_excluding(REGISTRY_FRAME_PREFIXES, 0)
        } else {
            Trace::new()
        };
        let (sender, receiver) = oneshot::channel();

        let pending = {
            let mut table = self.table();
            table.entries.insert(
                id.clone(),
                Entry {
                    completion: sender,
                    creation_trace: creation_trace.clone(),
                    created_at: Utc::now(),
                    deadline: None,
                },
            );
            table.entries.len()
        };

        RegistryMetrics::record_created();
        debug!(operation_id = %id, pending, "Pending operation created");

        PendingOperation {
            id,
            creation_trace,
            completion: receiver,
        }
    }

    /// Create an operation and arm its deadline in one step.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::TimerUnavailable`] outside of a tokio runtime;
    /// the operation is not registered in that case.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a panic in another thread)
    pub fn create_with_timeout(&self, duration: Duration) -> Result<PendingOperation<T>, RegistryError> {
        let operation = self.create();
        if let Err(error) = self.start_timeout(operation.id(), duration) {
            self.discard(operation.id());
            return Err(error);
        }
        Ok(operation)
    }

    /// Arm a one-shot deadline for a pending operation.
    ///
    /// If the operation is still pending when `duration` elapses it is rejected
    /// with a `TimeoutError` whose trace is the timer's trace followed by the
    /// creation trace under a labeled separator. Arming again replaces the
    /// previous deadline.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::NotFound`] if `id` is not pending
    /// - [`RegistryError::TimerUnavailable`] outside of a tokio runtime
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a panic in another thread)
    pub fn start_timeout(&self, id: &CorrelationId, duration: Duration) -> Result<(), RegistryError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| RegistryError::TimerUnavailable(id.clone()))?;

        let mut table = self.table();
        if !table.entries.contains_key(id) {
            return Err(RegistryError::NotFound(id.clone()));
        }

        let generation = table.next_generation;
        table.next_generation = table.next_generation.wrapping_add(1);

        let timer = runtime.spawn({
            let table = Arc::downgrade(&self.table);
            let config = Arc::clone(&self.config);
            let id = id.clone();
            async move {
                tokio::time::sleep(duration).await;
                if let Some(table) = table.upgrade() {
                    fire_deadline(&table, &config, &id, generation);
                }
            }
        });

        let replaced = table
            .entries
            .get_mut(id)
            .and_then(|entry| entry.deadline.replace(Deadline { generation, timer }));
        drop(table);

        if let Some(previous) = replaced {
            previous.timer.abort();
            debug!(operation_id = %id, "Deadline re-armed");
        }
        debug!(operation_id = %id, timeout_ms = duration.as_millis(), "Deadline armed");
        Ok(())
    }

    /// Complete an operation with a value.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if `id` is not pending.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a panic in another thread)
    pub fn resolve(&self, id: &CorrelationId, value: T) -> Result<(), RegistryError> {
        self.complete(id, Ok(value), OperationState::Resolved)
    }

    /// Complete an operation with an error.
    ///
    /// Accepts a [`RecordedError`] or anything convertible into one, such as a
    /// [`PortableError`](rendezvous_core::PortableError) received from a peer.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if `id` is not pending.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a panic in another thread)
    pub fn reject(&self, id: &CorrelationId, error: impl Into<RecordedError>) -> Result<(), RegistryError> {
        self.complete(
            id,
            Err(OperationError::Rejected(error.into())),
            OperationState::Rejected,
        )
    }

    /// Withdraw an operation without a value.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if `id` is not pending.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a panic in another thread)
    pub fn cancel(&self, id: &CorrelationId) -> Result<(), RegistryError> {
        self.complete(
            id,
            Err(OperationError::Cancelled(id.clone())),
            OperationState::Cancelled,
        )
    }

    /// Cancel every pending operation, returning how many were cancelled.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a panic in another thread)
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<(CorrelationId, Entry<T>)> = self.table().entries.drain().collect();
        let count = drained.len();

        for (id, entry) in drained {
            finish(
                id,
                entry,
                |id| Err(OperationError::Cancelled(id)),
                OperationState::Cancelled,
            );
        }

        if count > 0 {
            debug!(cancelled = count, "Cancelled all pending operations");
        }
        count
    }

    /// Look up a live operation without failing.
    ///
    /// Returns `None` if the id was never registered or has already completed.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a panic in another thread)
    #[must_use]
    pub fn get(&self, id: &CorrelationId) -> Option<OperationInfo> {
        self.table().entries.get(id).map(|entry| OperationInfo {
            id: id.clone(),
            state: OperationState::Pending,
            creation_trace: entry.creation_trace.clone(),
            created_at: entry.created_at,
            has_deadline: entry.deadline.is_some(),
        })
    }

    /// Whether `id` is pending
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a panic in another thread)
    #[must_use]
    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.table().entries.contains_key(id)
    }

    /// Number of pending operations
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a panic in another thread)
    #[must_use]
    pub fn len(&self) -> usize {
        self.table().entries.len()
    }

    /// Whether no operations are pending
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a panic in another thread)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table().entries.is_empty()
    }

    /// Ids of all pending operations, sorted
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a panic in another thread)
    #[must_use]
    pub fn pending_ids(&self) -> Vec<CorrelationId> {
        let mut ids: Vec<CorrelationId> = self.table().entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn complete(
        &self,
        id: &CorrelationId,
        outcome: Outcome<T>,
        state: OperationState,
    ) -> Result<(), RegistryError> {
        let entry = self
            .table()
            .entries
            .remove(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;

        finish(id.clone(), entry, |_| outcome, state);
        Ok(())
    }

    /// Unregister an operation that never became observable to anyone else.
    fn discard(&self, id: &CorrelationId) {
        if self.table().entries.remove(id).is_some() {
            RegistryMetrics::record_discarded(1);
            debug!(operation_id = %id, "Pending operation discarded");
        }
    }
}

#[allow(clippy::expect_used)]
fn lock_table<T>(table: &Mutex<Table<T>>) -> MutexGuard<'_, Table<T>> {
    table
        .lock()
        .expect("Pending operation table lock poisoned - indicates a panic in another thread")
}

/// Fulfil a removed entry: stop its timer, deliver the outcome, record it.
fn finish<T, F>(id: CorrelationId, entry: Entry<T>, outcome: F, state: OperationState)
where
    F: FnOnce(CorrelationId) -> Outcome<T>,
{
    if let Some(deadline) = entry.deadline {
        deadline.timer.abort();
    }

    if entry.completion.send(outcome(id.clone())).is_err() {
        debug!(operation_id = %id, "Waiter dropped before completion; outcome discarded");
    }

    RegistryMetrics::record_completed(state);
    debug!(operation_id = %id, %state, "Pending operation completed");
}

/// Timer body: reject the entry if it is still pending under `generation`.
fn fire_deadline<T>(
    table: &Mutex<Table<T>>,
    config: &RegistryConfig,
    id: &CorrelationId,
    generation: u64,
) {
    let entry = {
        let mut table = lock_table(table);
        let armed = table
            .entries
            .get(id)
            .and_then(|entry| entry.deadline.as_ref())
            .is_some_and(|deadline| deadline.generation == generation);
        if !armed {
            return;
        }
        match table.entries.remove(id) {
            Some(entry) => entry,
            None => return,
        }
    };

    let fired_at = if config.capture_traces {
        Trace::capture_excluding(REGISTRY_FRAME_PREFIXES, 0)
    } else {
        Trace::new()
    };
    let error = RecordedError::untraced(TIMEOUT_ERROR_NAME, format!("operation timeout: {id}"))
        .with_trace(fired_at);
    let error = ErrorRecorder::append(
        error,
        &entry.creation_trace,
        &config.timeout_label,
        &config.separator,
    );

    warn!(operation_id = %id, "Pending operation timed out");
    RegistryMetrics::record_timed_out();

    // The timer is this task; dropping its handle detaches rather than aborts.
    let Entry {
        completion,
        deadline,
        ..
    } = entry;
    drop(deadline);
    if completion.send(Err(OperationError::TimedOut(error))).is_err() {
        debug!(operation_id = %id, "Waiter dropped before timeout; outcome discarded");
    }
    RegistryMetrics::record_completed(OperationState::Rejected);
}

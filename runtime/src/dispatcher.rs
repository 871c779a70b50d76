//! Sequential event dispatcher.
//!
//! Reactions subscribed to an event name are invoked one at a time, in
//! subscription order, each fully awaited before the next starts. Reaction
//! order is part of the public contract: `dispatch_first` considers the
//! first-registered reaction first, and a logging reaction registered before
//! a mutating one always observes the event first.
//!
//! Dispatch is fail-fast. The first reaction that returns an error aborts the
//! remaining reactions for that dispatch and the error is returned to the
//! caller. There is no partial-success mode and no isolation between
//! reactions.
//!
//! # Example
//!
//! ```
//! use rendezvous_runtime::EventDispatcher;
//! use rendezvous_core::{ReactionResult, Value};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let dispatcher = EventDispatcher::new();
//!
//! dispatcher.subscribe("lookup", |_args: Vec<Value>| async { ReactionResult::Ok(None) });
//! dispatcher.subscribe("lookup", |_args: Vec<Value>| async { ReactionResult::Ok(Some(json!("answer"))) });
//!
//! let answer = dispatcher.dispatch_first("lookup", vec![json!({})]).await?;
//! assert_eq!(answer, Some(json!("answer")));
//! # Ok(())
//! # }
//! ```

use crate::error::DispatchError;
use crate::metrics::DispatchMetrics;
use rendezvous_core::{FieldProjection, Projected, Reaction, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::debug;

type Subscribers = HashMap<String, Vec<Arc<dyn Reaction>>>;

/// Publish/subscribe surface whose subscribers are async reactions.
///
/// Cloning yields a handle to the same subscriber lists.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    subscribers: Arc<RwLock<Subscribers>>,
}

impl EventDispatcher {
    /// Create a dispatcher with no subscribers
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a reaction to `event`.
    ///
    /// The reaction receives the dispatch arguments unchanged.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a panic in another thread)
    pub fn subscribe(&self, event: impl Into<String>, reaction: impl Reaction + 'static) {
        self.subscribe_with(event, reaction, None);
    }

    /// Subscribe a reaction that receives projected event fields.
    ///
    /// Dispatched with `[event, trailing…]`, the reaction is invoked with
    /// `[event, event[f1], …, trailing…]`, using `null` for missing fields.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a panic in another thread)
    pub fn subscribe_projected<I, S>(
        &self,
        event: impl Into<String>,
        fields: I,
        reaction: impl Reaction + 'static,
    ) where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subscribe_with(event, reaction, Some(FieldProjection::new(fields)));
    }

    /// Subscribe a reaction with an optional field projection.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a panic in another thread)
    #[allow(clippy::expect_used)]
    pub fn subscribe_with(
        &self,
        event: impl Into<String>,
        reaction: impl Reaction + 'static,
        projection: Option<FieldProjection>,
    ) {
        let reaction: Arc<dyn Reaction> = Arc::new(reaction);
        let reaction: Arc<dyn Reaction> = match projection {
            Some(projection) => Arc::new(Projected::new(projection, reaction)),
            None => reaction,
        };

        let event = event.into();
        let mut subscribers = self
            .subscribers
            .write()
            .expect("Dispatcher lock poisoned - indicates a panic in another thread");
        let reactions = subscribers.entry(event.clone()).or_default();
        reactions.push(reaction);
        debug!(event = %event, position = reactions.len() - 1, "Reaction subscribed");
    }

    /// Invoke every reaction for `event` in subscription order.
    ///
    /// Each reaction is awaited before the next starts. Reactions subscribed
    /// while a dispatch is running are not part of that dispatch.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::ReactionFailed`] for the first failing reaction;
    /// later reactions are not invoked.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a panic in another thread)
    pub async fn dispatch_all(&self, event: &str, args: Vec<Value>) -> Result<(), DispatchError> {
        let reactions = self.snapshot(event);
        let started = Instant::now();
        debug!(event, reactions = reactions.len(), "Dispatching to all reactions");

        for (index, reaction) in reactions.iter().enumerate() {
            DispatchMetrics::record_reaction();
            if let Err(source) = reaction.react(args.clone()).await {
                return Err(failed(event, index, source));
            }
        }

        DispatchMetrics::record_dispatch(started.elapsed());
        Ok(())
    }

    /// Invoke reactions for `event` in subscription order until one answers.
    ///
    /// The first reaction returning `Some(value)` short-circuits the dispatch
    /// and its value is returned; later reactions are not invoked. Returns
    /// `None` if every reaction returned `None` or there are no reactions.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::ReactionFailed`] for the first failing reaction.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a panic in another thread)
    pub async fn dispatch_first(
        &self,
        event: &str,
        args: Vec<Value>,
    ) -> Result<Option<Value>, DispatchError> {
        let reactions = self.snapshot(event);
        let started = Instant::now();
        debug!(event, reactions = reactions.len(), "Dispatching until first answer");

        for (index, reaction) in reactions.iter().enumerate() {
            DispatchMetrics::record_reaction();
            match reaction.react(args.clone()).await {
                Ok(Some(answer)) => {
                    debug!(event, index, "Reaction answered");
                    DispatchMetrics::record_dispatch(started.elapsed());
                    return Ok(Some(answer));
                }
                Ok(None) => {}
                Err(source) => return Err(failed(event, index, source)),
            }
        }

        DispatchMetrics::record_dispatch(started.elapsed());
        Ok(None)
    }

    /// Number of reactions subscribed to `event`
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a panic in another thread)
    #[must_use]
    pub fn reaction_count(&self, event: &str) -> usize {
        self.read().get(event).map_or(0, Vec::len)
    }

    /// Event names with at least one reaction, sorted
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (indicates a panic in another thread)
    #[must_use]
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Copy the reaction list so no lock is held across awaits.
    fn snapshot(&self, event: &str) -> Vec<Arc<dyn Reaction>> {
        self.read().get(event).cloned().unwrap_or_default()
    }

    #[allow(clippy::expect_used)]
    fn read(&self) -> std::sync::RwLockReadGuard<'_, Subscribers> {
        self.subscribers
            .read()
            .expect("Dispatcher lock poisoned - indicates a panic in another thread")
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("events", &self.event_names())
            .finish()
    }
}

fn failed(event: &str, index: usize, source: anyhow::Error) -> DispatchError {
    DispatchMetrics::record_failure();
    debug!(event, index, error = %source, "Reaction failed; aborting dispatch");
    DispatchError::ReactionFailed {
        event: event.to_string(),
        index,
        source,
    }
}

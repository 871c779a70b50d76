//! # Rendezvous Runtime
//!
//! Runtime components for the Rendezvous correlation layer.
//!
//! ## Core Components
//!
//! - **`PendingRegistry`**: Table of outstanding deferred results keyed by
//!   correlation id, with optional per-operation deadlines
//! - **`EventDispatcher`**: Named events fanned out to async reactions strictly
//!   in subscription order
//!
//! The two are independent but usually composed: a reaction fired by the
//! dispatcher is what eventually calls `resolve(id, value)` on the registry.
//!
//! ## Example
//!
//! ```
//! use rendezvous_runtime::{EventDispatcher, PendingRegistry};
//! use rendezvous_core::{CorrelationId, ReactionResult, Value};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry: PendingRegistry<Value> = PendingRegistry::new();
//! let dispatcher = EventDispatcher::new();
//!
//! // A reaction that completes operations named by the event's `id` field.
//! let completions = registry.clone();
//! dispatcher.subscribe_projected("reply", ["id", "body"], move |args: Vec<Value>| {
//!     let completions = completions.clone();
//!     async move {
//!         let id = CorrelationId::from(args[1].as_str().unwrap_or_default());
//!         completions.resolve(&id, args[2].clone())?;
//!         ReactionResult::Ok(None)
//!     }
//! });
//!
//! let operation = registry.create();
//! let reply = json!({ "id": operation.id().as_str(), "body": "pong" });
//! dispatcher.dispatch_all("reply", vec![reply]).await?;
//!
//! assert_eq!(operation.await?, json!("pong"));
//! # Ok(())
//! # }
//! ```

/// Configuration for registries
pub mod config;

/// Sequential, fail-fast event dispatch
pub mod dispatcher;

/// Prometheus metrics for observability
pub mod metrics;

/// Pending-operation correlation registry
pub mod registry;

/// Error types for the runtime
pub mod error {
    use rendezvous_core::{CorrelationId, OperationState, RecordedError};
    use thiserror::Error;

    /// Errors returned by registry operations.
    ///
    /// `NotFound` signals a caller protocol violation (double completion or a
    /// stale id); it is never recovered from inside the registry.
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum RegistryError {
        /// No live operation is registered under the id
        #[error("No pending operation with id '{0}'")]
        NotFound(CorrelationId),

        /// A deadline was requested outside of a tokio runtime
        #[error("Cannot arm timeout for '{0}': no tokio runtime is running")]
        TimerUnavailable(CorrelationId),
    }

    /// Why an awaited operation did not produce a value.
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum OperationError {
        /// Rejected by a caller (possibly across a process boundary)
        #[error("Operation rejected: {0}")]
        Rejected(RecordedError),

        /// Rejected by the operation's own deadline timer
        #[error("Operation timed out: {0}")]
        TimedOut(RecordedError),

        /// Withdrawn without a value
        #[error("Operation '{0}' was cancelled")]
        Cancelled(CorrelationId),

        /// The registry was dropped while the operation was still pending
        #[error("Operation '{0}' was abandoned by its registry")]
        Abandoned(CorrelationId),
    }

    impl OperationError {
        /// The recorded error for rejections and timeouts
        #[must_use]
        pub const fn recorded(&self) -> Option<&RecordedError> {
            match self {
                Self::Rejected(error) | Self::TimedOut(error) => Some(error),
                Self::Cancelled(_) | Self::Abandoned(_) => None,
            }
        }

        /// Terminal state the operation reached
        #[must_use]
        pub const fn state(&self) -> OperationState {
            match self {
                Self::Rejected(_) | Self::TimedOut(_) => OperationState::Rejected,
                Self::Cancelled(_) | Self::Abandoned(_) => OperationState::Cancelled,
            }
        }

        /// Whether the deadline timer produced this error
        #[must_use]
        pub const fn is_timeout(&self) -> bool {
            matches!(self, Self::TimedOut(_))
        }
    }

    /// Errors surfaced by dispatch.
    ///
    /// The first failing reaction aborts the remaining reactions for that
    /// dispatch; its error is returned unchanged as the source.
    #[derive(Error, Debug)]
    pub enum DispatchError {
        /// A reaction returned an error
        #[error("Reaction {index} for event '{event}' failed: {source}")]
        ReactionFailed {
            /// Event being dispatched
            event: String,
            /// Position of the failing reaction in subscription order
            index: usize,
            /// The reaction's error
            #[source]
            source: anyhow::Error,
        },
    }
}

pub use config::{ConfigError, RegistryConfig};
pub use dispatcher::EventDispatcher;
pub use error::{DispatchError, OperationError, RegistryError};
pub use registry::{OperationInfo, PendingOperation, PendingRegistry, TIMEOUT_ERROR_NAME};

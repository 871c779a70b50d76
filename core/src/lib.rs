//! # Rendezvous Core
//!
//! Core types for the Rendezvous correlation layer.
//!
//! This crate contains the pure, runtime-independent pieces shared by the
//! pending-operation registry and the sequential event dispatcher in
//! `rendezvous-runtime`.
//!
//! ## Core Concepts
//!
//! - **Trace**: Ordered sequence of frame descriptors, spliceable across async hops
//! - **`RecordedError`**: Live error value carrying a name, message and trace
//! - **`PortableError`**: `{ message, name, trace }` record for crossing boundaries
//! - **`CorrelationId`**: Opaque id matching a later completion to its operation
//! - **Reaction**: Async subscriber invoked in subscription order
//!
//! ## Example
//!
//! ```
//! use rendezvous_core::{CorrelationId, ErrorRecorder, PortableError, RecordedError, Trace};
//!
//! // A remote peer rejects an operation by id with a portable error record.
//! let id = CorrelationId::from("call-7");
//! let record = PortableError {
//!     message: "denied".to_string(),
//!     name: "RemoteError".to_string(),
//!     trace: vec!["remote::handler".to_string()],
//! };
//!
//! let error: RecordedError = record.into();
//! assert_eq!(error.to_string(), "RemoteError: denied");
//!
//! // Later the error can be annotated with where the operation was created.
//! let annotated = ErrorRecorder::append(error, &Trace::from_lines(["local::create"]), "CREATE", "--------");
//! assert_eq!(annotated.trace().len(), 3);
//! # let _ = id;
//! ```

pub mod correlation;
pub mod error;
pub mod reaction;
pub mod trace;

pub use correlation::{CorrelationId, OperationState};
pub use error::{ErrorRecorder, PortableError, PortableErrorDecode, RecordedError};
pub use reaction::{FieldProjection, Projected, Reaction, ReactionFuture, ReactionResult};
pub use trace::{DEFAULT_SEPARATOR, Trace};

// Re-export the value type reactions exchange
pub use serde_json::Value;

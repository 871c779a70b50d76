//! # Rendezvous Testing
//!
//! Testing utilities and helpers for the Rendezvous correlation layer.
//!
//! This crate provides:
//! - Recording and failing reactions that log every invocation
//! - Tracing and error-record helpers
//! - Property-based testing strategies for registry and projection tests
//!
//! ## Example
//!
//! ```
//! use rendezvous_runtime::EventDispatcher;
//! use rendezvous_testing::mocks::{InvocationLog, RecordingReaction};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let log = InvocationLog::new();
//! let dispatcher = EventDispatcher::new();
//! dispatcher.subscribe("ping", RecordingReaction::new("first", &log));
//! dispatcher.subscribe("ping", RecordingReaction::new("second", &log).answering(json!("pong")));
//!
//! let answer = dispatcher.dispatch_first("ping", vec![json!({})]).await.unwrap();
//!
//! assert_eq!(answer, Some(json!("pong")));
//! assert_eq!(log.labels(), vec!["first", "second"]);
//! # }
//! ```

/// Mock reactions for dispatcher tests.
pub mod mocks {
    use rendezvous_core::{Reaction, ReactionFuture, Value};
    use std::sync::{Arc, Mutex, MutexGuard};
    use std::time::Duration;

    /// One recorded reaction invocation
    #[derive(Debug, Clone, PartialEq)]
    pub struct Invocation {
        /// Label of the reaction that ran
        pub label: String,
        /// Arguments it was invoked with
        pub args: Vec<Value>,
    }

    #[derive(Debug, Default)]
    struct LogState {
        invocations: Vec<Invocation>,
        timeline: Vec<String>,
    }

    /// Shared log of reaction invocations.
    ///
    /// Besides the invocations themselves the log keeps a timeline of
    /// `start:<label>` and `end:<label>` markers, which makes interleaving
    /// between reactions visible.
    #[derive(Debug, Clone, Default)]
    pub struct InvocationLog {
        state: Arc<Mutex<LogState>>,
    }

    impl InvocationLog {
        /// Create an empty log
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        #[allow(clippy::expect_used)]
        fn state(&self) -> MutexGuard<'_, LogState> {
            self.state
                .lock()
                .expect("Invocation log lock poisoned - indicates a panic in another thread")
        }

        fn started(&self, label: &str, args: &[Value]) {
            let mut state = self.state();
            state.invocations.push(Invocation {
                label: label.to_string(),
                args: args.to_vec(),
            });
            state.timeline.push(format!("start:{label}"));
        }

        fn ended(&self, label: &str) {
            self.state().timeline.push(format!("end:{label}"));
        }

        /// All invocations, in the order they started
        ///
        /// # Panics
        ///
        /// Panics if the internal lock is poisoned
        #[must_use]
        pub fn invocations(&self) -> Vec<Invocation> {
            self.state().invocations.clone()
        }

        /// Labels of all invocations, in the order they started
        ///
        /// # Panics
        ///
        /// Panics if the internal lock is poisoned
        #[must_use]
        pub fn labels(&self) -> Vec<String> {
            self.state()
                .invocations
                .iter()
                .map(|invocation| invocation.label.clone())
                .collect()
        }

        /// Start and end markers, in the order they happened
        ///
        /// # Panics
        ///
        /// Panics if the internal lock is poisoned
        #[must_use]
        pub fn timeline(&self) -> Vec<String> {
            self.state().timeline.clone()
        }

        /// Number of invocations
        ///
        /// # Panics
        ///
        /// Panics if the internal lock is poisoned
        #[must_use]
        pub fn len(&self) -> usize {
            self.state().invocations.len()
        }

        /// Whether nothing has been invoked
        ///
        /// # Panics
        ///
        /// Panics if the internal lock is poisoned
        #[must_use]
        pub fn is_empty(&self) -> bool {
            self.state().invocations.is_empty()
        }

        /// Forget everything recorded so far
        ///
        /// # Panics
        ///
        /// Panics if the internal lock is poisoned
        pub fn clear(&self) {
            let mut state = self.state();
            state.invocations.clear();
            state.timeline.clear();
        }
    }

    /// Reaction that records its invocations and answers with a fixed value.
    ///
    /// Defaults to answering `None` immediately.
    #[derive(Debug, Clone)]
    pub struct RecordingReaction {
        label: String,
        log: InvocationLog,
        answer: Option<Value>,
        delay: Option<Duration>,
    }

    impl RecordingReaction {
        /// Create a reaction recording into `log` under `label`
        #[must_use]
        pub fn new(label: impl Into<String>, log: &InvocationLog) -> Self {
            Self {
                label: label.into(),
                log: log.clone(),
                answer: None,
                delay: None,
            }
        }

        /// Answer with `value` instead of `None`
        #[must_use]
        pub fn answering(mut self, value: Value) -> Self {
            self.answer = Some(value);
            self
        }

        /// Sleep for `delay` between recording the start and answering
        #[must_use]
        pub const fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }
    }

    impl Reaction for RecordingReaction {
        fn react(&self, args: Vec<Value>) -> ReactionFuture<'_> {
            Box::pin(async move {
                self.log.started(&self.label, &args);
                if let Some(delay) = self.delay {
                    tokio::time::sleep(delay).await;
                }
                self.log.ended(&self.label);
                Ok(self.answer.clone())
            })
        }
    }

    /// Reaction that records its invocation and then fails.
    #[derive(Debug, Clone)]
    pub struct FailingReaction {
        label: String,
        log: InvocationLog,
        message: String,
    }

    impl FailingReaction {
        /// Create a reaction that fails with `message`
        #[must_use]
        pub fn new(label: impl Into<String>, log: &InvocationLog, message: impl Into<String>) -> Self {
            Self {
                label: label.into(),
                log: log.clone(),
                message: message.into(),
            }
        }
    }

    impl Reaction for FailingReaction {
        fn react(&self, args: Vec<Value>) -> ReactionFuture<'_> {
            Box::pin(async move {
                self.log.started(&self.label, &args);
                self.log.ended(&self.label);
                Err(anyhow::anyhow!("{}", self.message))
            })
        }
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use rendezvous_core::{PortableError, RecordedError, Trace};
    use rendezvous_runtime::OperationError;
    use tracing::subscriber::DefaultGuard;
    use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

    /// Route tracing output to the test writer for the current thread.
    ///
    /// Honors `RUST_LOG`, defaulting to `debug`. Keep the guard alive for the
    /// duration of the test.
    #[must_use]
    pub fn init_test_tracing() -> DefaultGuard {
        let subscriber = tracing_subscriber::registry()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
            .with(fmt::layer().with_test_writer());

        tracing::subscriber::set_default(subscriber)
    }

    /// Build a portable error record as a peer would send it
    #[must_use]
    pub fn portable_error(name: &str, message: &str, trace: &[&str]) -> PortableError {
        PortableError {
            message: message.to_string(),
            name: name.to_string(),
            trace: trace.iter().map(ToString::to_string).collect(),
        }
    }

    /// Unwrap a deadline rejection.
    ///
    /// # Panics
    ///
    /// Panics if `result` is anything other than [`OperationError::TimedOut`].
    #[allow(clippy::panic)]
    pub fn expect_timed_out<T: std::fmt::Debug>(result: Result<T, OperationError>) -> RecordedError {
        match result {
            Err(OperationError::TimedOut(error)) => error,
            other => panic!("expected a timeout, got {other:?}"),
        }
    }

    /// Lines following the `label` splice in `trace`, if present
    #[must_use]
    pub fn after_splice(trace: &Trace, label: &str, separator: &str) -> Option<Vec<String>> {
        trace
            .find_separator(label, separator)
            .map(|index| trace.lines()[index + 1..].to_vec())
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;
    use rendezvous_core::Value;

    /// One step of a registry workload.
    ///
    /// Indices select among operations created so far, modulo their count,
    /// and may point at operations that have already completed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum RegistryOp {
        /// Create a new operation
        Create,
        /// Resolve the selected operation
        Resolve(usize),
        /// Reject the selected operation
        Reject(usize),
        /// Cancel the selected operation
        Cancel(usize),
    }

    /// Strategy for a single registry step, biased towards creation
    pub fn registry_op() -> impl Strategy<Value = RegistryOp> {
        prop_oneof![
            3 => Just(RegistryOp::Create),
            2 => any::<usize>().prop_map(RegistryOp::Resolve),
            1 => any::<usize>().prop_map(RegistryOp::Reject),
            1 => any::<usize>().prop_map(RegistryOp::Cancel),
        ]
    }

    /// Strategy for a workload of up to `max_len` registry steps
    pub fn registry_ops(max_len: usize) -> impl Strategy<Value = Vec<RegistryOp>> {
        prop::collection::vec(registry_op(), 0..=max_len)
    }

    /// Strategy for short lowercase field names
    pub fn field_name() -> impl Strategy<Value = String> {
        "[a-e]{1,2}"
    }

    /// Strategy for scalar JSON values
    pub fn scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            "[a-z]{0,8}".prop_map(Value::from),
        ]
    }

    /// Strategy for flat event objects keyed by [`field_name`]
    pub fn event_object() -> impl Strategy<Value = Value> {
        prop::collection::btree_map(field_name(), scalar(), 0..5)
            .prop_map(|fields| Value::Object(fields.into_iter().collect()))
    }
}

pub use helpers::{expect_timed_out, init_test_tracing, portable_error};
pub use mocks::{FailingReaction, InvocationLog, Invocation, RecordingReaction};

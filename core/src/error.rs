//! Recorded errors and their portable (serializable) form.
//!
//! [`RecordedError`] is the live error value handed to whoever awaits a
//! rejected operation. It carries a name, a message and a [`Trace`].
//! [`PortableError`] is the plain structural record used when an error has to
//! cross a serialization boundary, such as a remote peer rejecting a pending
//! operation by correlation id.
//!
//! [`ErrorRecorder`] groups the trace operations that work on errors:
//! capturing, splicing and converting to and from the portable shape.
//!
//! # Example
//!
//! ```
//! use rendezvous_core::error::{ErrorRecorder, PortableError, RecordedError};
//! use rendezvous_core::trace::Trace;
//!
//! let error = RecordedError::new("Error", "boom").with_trace(Trace::from_lines(["L1", "L2"]));
//! let creation = Trace::from_lines(["C1", "C2"]);
//!
//! let error = ErrorRecorder::append(error, &creation, "CREATE", "--------");
//! assert_eq!(error.trace().len(), 5);
//!
//! let portable = ErrorRecorder::to_portable(&error);
//! let restored = ErrorRecorder::from_portable(portable);
//! assert_eq!(restored, error);
//! ```

use crate::trace::Trace;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Name given to errors that do not specify one.
pub const DEFAULT_ERROR_NAME: &str = "Error";

/// Frames the error helpers themselves contribute to a capture.
const ERROR_FRAME_PREFIXES: &[&str] = &["rendezvous_core::error::"];

/// A live error value with a diagnostic trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedError {
    name: String,
    message: String,
    trace: Trace,
}

impl RecordedError {
    /// Create an error, capturing the caller's execution context as its trace.
    #[must_use]
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            trace: Trace::capture_excluding(ERROR_FRAME_PREFIXES, 0),
        }
    }

    /// Create an error without capturing a trace.
    #[must_use]
    pub fn untraced(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            trace: Trace::new(),
        }
    }

    /// Record an arbitrary error.
    ///
    /// The message is the error's `Display`; each `source()` in its chain
    /// becomes a trailing `caused by:` line after the captured trace.
    #[must_use]
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        let mut recorded = Self::new(DEFAULT_ERROR_NAME, error.to_string());

        let mut source = error.source();
        while let Some(cause) = source {
            recorded.trace.push(format!("caused by: {cause}"));
            source = cause.source();
        }

        recorded
    }

    /// Replace the trace
    #[must_use]
    pub fn with_trace(mut self, trace: Trace) -> Self {
        self.trace = trace;
        self
    }

    /// Error name (kind)
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human readable message
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Diagnostic trace
    #[must_use]
    pub const fn trace(&self) -> &Trace {
        &self.trace
    }
}

impl fmt::Display for RecordedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for RecordedError {}

impl From<PortableError> for RecordedError {
    fn from(record: PortableError) -> Self {
        ErrorRecorder::from_portable(record)
    }
}

impl From<&RecordedError> for PortableError {
    fn from(error: &RecordedError) -> Self {
        ErrorRecorder::to_portable(error)
    }
}

/// Failure to decode a [`PortableError`] from JSON.
#[derive(Error, Debug)]
#[error("Failed to decode portable error: {0}")]
pub struct PortableErrorDecode(#[from] serde_json::Error);

/// Structural error record for crossing serialization boundaries.
///
/// The field names are the contract any remote caller must honor:
///
/// ```json
/// { "message": "operation timeout: …", "name": "TimeoutError", "trace": ["…"] }
/// ```
///
/// Round-tripping through this record preserves message, name and trace only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortableError {
    /// Human readable message
    pub message: String,
    /// Error name (kind)
    pub name: String,
    /// Trace lines, innermost first
    #[serde(default)]
    pub trace: Vec<String>,
}

impl PortableError {
    /// Encode as JSON
    ///
    /// # Errors
    ///
    /// Returns an error only if serialization fails, which cannot happen for
    /// this all-string record in practice.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode from JSON
    ///
    /// # Errors
    ///
    /// Returns [`PortableErrorDecode`] if `json` is not a valid record.
    pub fn from_json(json: &str) -> Result<Self, PortableErrorDecode> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Trace capture and splicing for errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorRecorder;

impl ErrorRecorder {
    /// Capture a trace.
    ///
    /// Without an error, captures the caller's execution context. With one,
    /// returns that error's own trace. Either way `frames_to_drop` leading
    /// frames are discarded.
    #[inline(never)]
    #[must_use]
    pub fn capture(error: Option<&RecordedError>, frames_to_drop: usize) -> Trace {
        match error {
            Some(error) => error.trace.clone().without_leading(frames_to_drop),
            None => Trace::capture_excluding(ERROR_FRAME_PREFIXES, frames_to_drop),
        }
    }

    /// Append `trace` to the error's own trace under a labeled separator.
    ///
    /// The resulting trace is `own ++ [separator + label + separator] ++ trace`.
    #[must_use]
    pub fn append(
        mut error: RecordedError,
        trace: &Trace,
        label: &str,
        separator: &str,
    ) -> RecordedError {
        error.trace = error.trace.splice(label, separator, trace);
        error
    }

    /// Convert a live error to its portable record
    #[must_use]
    pub fn to_portable(error: &RecordedError) -> PortableError {
        PortableError {
            message: error.message.clone(),
            name: error.name.clone(),
            trace: error.trace.lines().to_vec(),
        }
    }

    /// Reconstruct a live error from a portable record.
    ///
    /// The record's trace lines are kept verbatim.
    #[must_use]
    pub fn from_portable(record: PortableError) -> RecordedError {
        RecordedError {
            name: record.name,
            message: record.message,
            trace: Trace::from_raw(record.trace),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::DEFAULT_SEPARATOR;

    #[derive(Debug, Error)]
    #[error("outer failure")]
    struct Outer(#[source] Inner);

    #[derive(Debug, Error)]
    #[error("inner failure")]
    struct Inner;

    #[test]
    fn test_append_matches_expected_layout() {
        let error = RecordedError::untraced("Error", "x").with_trace(Trace::from_lines(["L1", "L2"]));
        let trace = Trace::from_lines(["C1", "C2"]);

        let error = ErrorRecorder::append(error, &trace, "CREATE", DEFAULT_SEPARATOR);

        assert_eq!(
            error.trace().lines(),
            ["L1", "L2", "--------CREATE--------", "C1", "C2"]
        );
    }

    #[test]
    fn test_capture_with_error_returns_own_trace_minus_dropped() {
        let error = RecordedError::untraced("Error", "x")
            .with_trace(Trace::from_lines(["a", "b", "c"]));

        assert_eq!(ErrorRecorder::capture(Some(&error), 0).lines(), ["a", "b", "c"]);
        assert_eq!(ErrorRecorder::capture(Some(&error), 2).lines(), ["c"]);
    }

    #[test]
    fn test_capture_without_error_excludes_recorder_frames() {
        let trace = ErrorRecorder::capture(None, 0);
        assert!(
            trace
                .iter()
                .all(|frame| !frame.starts_with("rendezvous_core::error::ErrorRecorder"))
        );
    }

    #[test]
    fn test_capture_without_error_drops_requested_frames() {
        let (full, dropped) = (ErrorRecorder::capture(None, 0), ErrorRecorder::capture(None, 1));

        if !full.is_empty() {
            assert_eq!(dropped.len() + 1, full.len());
            assert_eq!(dropped.lines(), &full.lines()[1..]);
        }
    }

    #[test]
    fn test_portable_round_trip_preserves_fields() {
        let error = RecordedError::untraced("TimeoutError", "operation timeout: abc")
            .with_trace(Trace::from_lines(["t1", "t2"]));

        let record = ErrorRecorder::to_portable(&error);
        assert_eq!(record.name, "TimeoutError");
        assert_eq!(record.message, "operation timeout: abc");
        assert_eq!(record.trace, vec!["t1", "t2"]);

        let restored = ErrorRecorder::from_portable(record);
        assert_eq!(restored, error);
    }

    #[test]
    fn test_portable_round_trip_keeps_peer_trace_verbatim() {
        let record = PortableError {
            message: "remote failure".to_string(),
            name: "RemoteError".to_string(),
            trace: vec![
                "    at f (x.js:1:1)".to_string(),
                String::new(),
                "tail".to_string(),
            ],
        };

        let error = ErrorRecorder::from_portable(record.clone());
        assert_eq!(error.trace().len(), 3);
        assert_eq!(ErrorRecorder::to_portable(&error), record);

        let via_into: RecordedError = record.clone().into();
        assert_eq!(PortableError::from(&via_into), record);
    }

    #[test]
    fn test_portable_json_shape() {
        let json = r#"{"message":"nope","name":"RemoteError","trace":["r1"]}"#;
        let record = PortableError::from_json(json).unwrap();

        let error: RecordedError = record.clone().into();
        assert_eq!(error.to_string(), "RemoteError: nope");
        assert_eq!(error.trace().lines(), ["r1"]);

        let encoded = record.to_json().unwrap();
        assert_eq!(PortableError::from_json(&encoded).unwrap(), record);
    }

    #[test]
    fn test_portable_json_trace_is_optional() {
        let record = PortableError::from_json(r#"{"message":"m","name":"n"}"#).unwrap();
        assert!(record.trace.is_empty());
    }

    #[test]
    fn test_portable_json_rejects_malformed_input() {
        let err = PortableError::from_json(r#"{"message":1}"#).unwrap_err();
        assert!(err.to_string().starts_with("Failed to decode portable error"));
    }

    #[test]
    fn test_from_error_records_source_chain() {
        let recorded = RecordedError::from_error(&Outer(Inner));

        assert_eq!(recorded.name(), DEFAULT_ERROR_NAME);
        assert_eq!(recorded.message(), "outer failure");
        assert_eq!(
            recorded.trace().lines().last().map(String::as_str),
            Some("caused by: inner failure")
        );
    }
}

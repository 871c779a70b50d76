//! Execution traces that survive asynchronous and cross-boundary hops.
//!
//! A [`Trace`] is an ordered sequence of opaque frame descriptors. Once
//! captured it is just a list of trimmed lines, and splicing two traces
//! together (for example "where the timer fired" + "where the operation was
//! created") is a pure sequence operation.
//!
//! # Example
//!
//! ```
//! use rendezvous_core::trace::{Trace, DEFAULT_SEPARATOR};
//!
//! let fired = Trace::from_lines(["L1", "L2"]);
//! let created = Trace::from_lines(["C1", "C2"]);
//!
//! let combined = fired.splice("CREATE", DEFAULT_SEPARATOR, &created);
//! assert_eq!(
//!     combined.lines(),
//!     ["L1", "L2", "--------CREATE--------", "C1", "C2"]
//! );
//! ```

use serde::{Deserialize, Serialize};
use std::backtrace::Backtrace;
use std::fmt;

/// Separator wrapped around splice labels unless the caller supplies one.
pub const DEFAULT_SEPARATOR: &str = "--------";

/// Frames belonging to the capture machinery itself; always discarded.
const CAPTURE_FRAME_PREFIXES: &[&str] = &[
    "std::backtrace",
    "std::backtrace_rs",
    "backtrace::",
    "rendezvous_core::trace::",
];

/// An ordered sequence of frame descriptors.
///
/// Captured and parsed traces hold trimmed, non-empty lines. Traces received
/// from a peer via [`Trace::from_raw`] keep their lines exactly as sent.
///
/// Serializes as a plain JSON array of strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Trace(Vec<String>);

impl Trace {
    /// Create an empty trace
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Wrap lines verbatim, without trimming or dropping blank lines.
    #[must_use]
    pub const fn from_raw(lines: Vec<String>) -> Self {
        Self(lines)
    }

    /// Build a trace from already-formatted lines.
    ///
    /// Lines are trimmed; empty lines are dropped.
    #[must_use]
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            lines
                .into_iter()
                .map(|line| line.as_ref().trim().to_string())
                .filter(|line| !line.is_empty())
                .collect(),
        )
    }

    /// Parse a multi-line textual trace (one frame per line).
    #[must_use]
    pub fn parse(text: &str) -> Self {
        Self::from_lines(text.lines())
    }

    /// Capture the caller's current execution context.
    ///
    /// The capture machinery's own frames are discarded, then `frames_to_drop`
    /// further leading frames.
    #[inline(never)]
    #[must_use]
    pub fn capture(frames_to_drop: usize) -> Self {
        Self::capture_excluding(&[], frames_to_drop)
    }

    /// Capture the current execution context, skipping leading frames whose
    /// symbol starts with any of `prefixes` before dropping `frames_to_drop`.
    ///
    /// Components use this to keep their own internal frames out of the traces
    /// they hand back to callers.
    #[inline(never)]
    #[must_use]
    pub fn capture_excluding(prefixes: &[&str], frames_to_drop: usize) -> Self {
        let backtrace = Backtrace::force_capture();
        let frames = frames_from_backtrace(&backtrace.to_string());

        let frames: Vec<String> = frames
            .into_iter()
            .skip_while(|frame| starts_with_any(frame, CAPTURE_FRAME_PREFIXES))
            .skip_while(|frame| starts_with_any(frame, prefixes))
            .skip(frames_to_drop)
            .collect();

        Self(frames)
    }

    /// Frame descriptors, innermost first
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.0
    }

    /// Number of frames
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the trace holds no frames
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the frame descriptors
    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }

    /// Append one frame descriptor (trimmed)
    pub fn push(&mut self, line: impl AsRef<str>) {
        let line = line.as_ref().trim();
        if !line.is_empty() {
            self.0.push(line.to_string());
        }
    }

    /// Drop `count` leading frames.
    #[must_use]
    pub fn without_leading(mut self, count: usize) -> Self {
        let count = count.min(self.0.len());
        self.0.drain(..count);
        self
    }

    /// Concatenate `other` after this trace under a labeled separator line.
    ///
    /// The separator line is `separator + label + separator`, so the default
    /// separator with the label `"CREATE"` yields `--------CREATE--------`.
    #[must_use]
    pub fn splice(&self, label: &str, separator: &str, other: &Self) -> Self {
        let mut lines = Vec::with_capacity(self.0.len() + other.0.len() + 1);
        lines.extend(self.0.iter().cloned());
        lines.push(format!("{separator}{label}{separator}"));
        lines.extend(other.0.iter().cloned());
        Self(lines)
    }

    /// Position of the separator line for `label`, if the trace contains one.
    #[must_use]
    pub fn find_separator(&self, label: &str, separator: &str) -> Option<usize> {
        let marker = format!("{separator}{label}{separator}");
        self.0.iter().position(|line| *line == marker)
    }

    /// Consume the trace, returning its lines
    #[must_use]
    pub fn into_lines(self) -> Vec<String> {
        self.0
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, line) in self.0.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            write!(f, "{line}")?;
        }
        Ok(())
    }
}

impl From<Vec<String>> for Trace {
    fn from(lines: Vec<String>) -> Self {
        Self::from_raw(lines)
    }
}

impl From<Trace> for Vec<String> {
    fn from(trace: Trace) -> Self {
        trace.0
    }
}

impl<'a> IntoIterator for &'a Trace {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

fn starts_with_any(frame: &str, prefixes: &[&str]) -> bool {
    let symbol = frame.trim_start_matches('<');
    prefixes.iter().any(|prefix| symbol.starts_with(prefix))
}

/// Fold the std backtrace rendering into one line per symbol.
///
/// std prints `N: symbol` (or an indented symbol for inlined frames) followed
/// by an optional `at file:line:col` line.
fn frames_from_backtrace(rendered: &str) -> Vec<String> {
    let mut frames: Vec<String> = Vec::new();

    for line in rendered.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if let Some(location) = line.strip_prefix("at ") {
            if let Some(last) = frames.last_mut() {
                last.push_str(" at ");
                last.push_str(location);
            }
            continue;
        }

        let symbol = match line.split_once(": ") {
            Some((index, rest)) if index.chars().all(|c| c.is_ascii_digit()) => rest,
            _ => line,
        };
        frames.push(symbol.trim().to_string());
    }

    frames
}

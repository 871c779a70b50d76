//! Prometheus metrics for observability and monitoring.
//!
//! Metrics are recorded through the `metrics` facade and are no-ops until a
//! recorder is installed. [`MetricsRecorder::install`] installs a Prometheus
//! recorder process-wide; exposing the rendered text (over HTTP or otherwise)
//! is up to the embedding application.
//!
//! - Registry: operations created, resolved, rejected, cancelled, timed out
//!   and the number currently pending across all registries
//! - Dispatcher: dispatches, reactions invoked, reaction failures and
//!   dispatch latency
//!
//! # Example
//!
//! ```rust,no_run
//! use rendezvous_runtime::metrics::MetricsRecorder;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let recorder = MetricsRecorder::install()?;
//!
//! if let Some(text) = recorder.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use rendezvous_core::OperationState;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Handle to an installed Prometheus recorder.
pub struct MetricsRecorder {
    handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRecorder")
            .field("installed", &self.handle.is_some())
            .finish()
    }
}

impl MetricsRecorder {
    /// Describe all metrics and install the Prometheus recorder.
    ///
    /// An already-installed recorder is tolerated: the call succeeds and
    /// [`render`](Self::render) returns `None` for the returned handle.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    pub fn install() -> Result<Self, MetricsError> {
        register_metrics();

        match prometheus_builder()?.install_recorder() {
            Ok(handle) => {
                tracing::info!("Metrics recorder installed");
                Ok(Self {
                    handle: Some(handle),
                })
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(Self { handle: None })
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if this handle did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Builder with latency buckets for every `*_duration_seconds` histogram.
fn prometheus_builder() -> Result<PrometheusBuilder, MetricsError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[
                0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0,
            ],
        )
        .map_err(|e| MetricsError::Build(e.to_string()))
}

/// Register all metric descriptions.
fn register_metrics() {
    // Registry
    describe_counter!(
        "registry_operations_created_total",
        "Total number of pending operations created"
    );
    describe_counter!(
        "registry_operations_resolved_total",
        "Total number of operations resolved with a value"
    );
    describe_counter!(
        "registry_operations_rejected_total",
        "Total number of operations rejected, including timeouts"
    );
    describe_counter!(
        "registry_operations_cancelled_total",
        "Total number of operations cancelled"
    );
    describe_counter!(
        "registry_operations_timed_out_total",
        "Total number of operations rejected by their deadline"
    );
    describe_gauge!(
        "registry_operations_pending",
        "Operations currently awaiting completion"
    );

    // Dispatcher
    describe_counter!(
        "dispatcher_dispatches_total",
        "Total number of completed dispatches"
    );
    describe_counter!(
        "dispatcher_reactions_invoked_total",
        "Total number of reactions invoked"
    );
    describe_counter!(
        "dispatcher_reaction_failures_total",
        "Total number of reactions that failed and aborted a dispatch"
    );
    describe_histogram!(
        "dispatcher_dispatch_duration_seconds",
        "Time taken to run all reactions of a dispatch"
    );
}

/// Registry metrics recorder.
///
/// The pending gauge is adjusted by deltas so that several registries in one
/// process add up instead of overwriting each other.
pub struct RegistryMetrics;

impl RegistryMetrics {
    /// Record an operation entering a table.
    pub fn record_created() {
        counter!("registry_operations_created_total").increment(1);
        gauge!("registry_operations_pending").increment(1.0);
    }

    /// Record an operation leaving a table in `state`.
    pub fn record_completed(state: OperationState) {
        match state {
            OperationState::Resolved => counter!("registry_operations_resolved_total").increment(1),
            OperationState::Rejected => counter!("registry_operations_rejected_total").increment(1),
            OperationState::Cancelled => {
                counter!("registry_operations_cancelled_total").increment(1);
            }
            OperationState::Pending => {}
        }
        gauge!("registry_operations_pending").decrement(1.0);
    }

    /// Record entries leaving a table without a terminal transition.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_discarded(count: usize) {
        gauge!("registry_operations_pending").decrement(count as f64);
    }

    /// Record a deadline firing.
    pub fn record_timed_out() {
        counter!("registry_operations_timed_out_total").increment(1);
    }
}

/// Dispatcher metrics recorder.
pub struct DispatchMetrics;

impl DispatchMetrics {
    /// Record a dispatch that ran to completion.
    pub fn record_dispatch(duration: Duration) {
        counter!("dispatcher_dispatches_total").increment(1);
        histogram!("dispatcher_dispatch_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a single reaction invocation.
    pub fn record_reaction() {
        counter!("dispatcher_reactions_invoked_total").increment(1);
    }

    /// Record a reaction failure.
    pub fn record_failure() {
        counter!("dispatcher_reaction_failures_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Run `f` against a thread-local recorder and read back one gauge.
    fn gauge_after(name: &str, f: impl FnOnce()) -> Option<f64> {
        let recorder = prometheus_builder().unwrap().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, f);
        gauge_value(&handle.render(), name)
    }

    fn gauge_value(rendered: &str, name: &str) -> Option<f64> {
        rendered
            .lines()
            .find_map(|line| line.strip_prefix(name)?.strip_prefix(' '))
            .and_then(|value| value.trim().parse().ok())
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        RegistryMetrics::record_created();
        RegistryMetrics::record_completed(OperationState::Resolved);
        DispatchMetrics::record_reaction();
    }

    #[test]
    fn test_pending_gauge_accumulates_deltas() {
        let pending = gauge_after("registry_operations_pending", || {
            RegistryMetrics::record_created();
            RegistryMetrics::record_created();
            RegistryMetrics::record_created();
            RegistryMetrics::record_completed(OperationState::Cancelled);
            RegistryMetrics::record_discarded(1);
        });

        assert_eq!(pending, Some(1.0));
    }

    #[test]
    fn test_install_tolerates_existing_recorder() {
        let first = MetricsRecorder::install().unwrap();
        let second = MetricsRecorder::install().unwrap();

        assert!(second.handle().is_none());

        RegistryMetrics::record_created();
        RegistryMetrics::record_completed(OperationState::Rejected);
        RegistryMetrics::record_timed_out();
        DispatchMetrics::record_reaction();
        DispatchMetrics::record_failure();
        DispatchMetrics::record_dispatch(Duration::from_millis(3));

        // Another test binary thread may have installed the recorder first.
        if let Some(rendered) = first.render() {
            assert!(rendered.contains("registry_operations_created_total"));
            assert!(rendered.contains("registry_operations_timed_out_total"));
            assert!(rendered.contains("dispatcher_reaction_failures_total"));
            assert!(rendered.contains("dispatcher_dispatches_total"));
        }
    }
}

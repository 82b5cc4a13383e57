//! Metrics registry for warden observability
//!
//! Provides OpenTelemetry metrics for:
//! - Backup outcomes observed by the trackers
//! - Tracker lifecycle (active trackers, stream restarts)
//! - Data quality (malformed backup events)
//! - Output module delivery failures
//!
//! Without an OTLP endpoint the global meter is a no-op, so recording is
//! always safe.

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};
use opentelemetry::KeyValue;

/// Global meter for warden metrics
static METER: Lazy<Meter> = Lazy::new(|| global::meter("warden"));

// ============================================================================
// Backup Outcome Metrics
// ============================================================================

/// Counter of terminal backup outcomes
///
/// Labels:
/// - `outcome`: success, failure
pub static BACKUP_REPORTS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("warden_backup_reports_total")
        .with_description("Total number of terminal backup outcomes observed")
        .with_unit("{backups}")
        .build()
});

/// Histogram of completed backup durations
pub static BACKUP_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("warden_backup_duration_seconds")
        .with_description("Duration of completed backups in seconds")
        .with_unit("s")
        .build()
});

/// Counter of backup events skipped because of malformed status fields
pub static MALFORMED_EVENTS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("warden_malformed_events_total")
        .with_description("Backup events skipped because of malformed status data")
        .with_unit("{events}")
        .build()
});

// ============================================================================
// Tracker Lifecycle Metrics
// ============================================================================

/// Number of backup trackers currently running
pub static ACTIVE_TRACKERS: Lazy<UpDownCounter<i64>> = Lazy::new(|| {
    METER
        .i64_up_down_counter("warden_active_trackers")
        .with_description("Number of backup trackers currently running")
        .with_unit("{trackers}")
        .build()
});

/// Counter of watch stream restarts (full relist)
///
/// Labels:
/// - `resource`: scheduledbackups, backups
pub static STREAM_RESTARTS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("warden_stream_restarts_total")
        .with_description("Watch streams closed by the server and reopened after a relist")
        .with_unit("{restarts}")
        .build()
});

// ============================================================================
// Output Metrics
// ============================================================================

/// Counter of failed deliveries to an output module
///
/// Labels:
/// - `module`: output module name
pub static SINK_FAILURES: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("warden_sink_failures_total")
        .with_description("Reports an output module failed to deliver")
        .with_unit("{reports}")
        .build()
});

/// Labels for backup outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Backup completed
    Success,
    /// Backup failed
    Failure,
}

impl Outcome {
    /// Get the label value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// Record a terminal backup outcome
pub fn record_outcome(outcome: Outcome, duration_secs: Option<f64>) {
    BACKUP_REPORTS.add(1, &[KeyValue::new("outcome", outcome.as_str())]);
    if let Some(secs) = duration_secs {
        BACKUP_DURATION.record(secs, &[]);
    }
}

/// Record a watch stream restart for the given resource
pub fn record_stream_restart(resource: &str) {
    STREAM_RESTARTS.add(1, &[KeyValue::new("resource", resource.to_string())]);
}

/// Record a failed delivery for the given output module
pub fn record_sink_failure(module: &str) {
    SINK_FAILURES.add(1, &[KeyValue::new("module", module.to_string())]);
}

/// Guard counting one running tracker for as long as it lives
pub struct ActiveTrackerGuard(());

impl ActiveTrackerGuard {
    /// Count a tracker as running until the guard is dropped
    pub fn acquire() -> Self {
        ACTIVE_TRACKERS.add(1, &[]);
        Self(())
    }
}

impl Drop for ActiveTrackerGuard {
    fn drop(&mut self) {
        ACTIVE_TRACKERS.add(-1, &[]);
    }
}

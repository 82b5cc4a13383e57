//! In-flight backup bookkeeping for one tracker
//!
//! [`TrackedBackups`] is the pure state machine behind a backup tracker: it
//! is fed one backup object at a time and answers with the terminal outcome
//! to report, if any. It never talks to the network, so every transition is
//! unit tested here.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, TimeDelta, Timelike};
use kube::api::DynamicObject;
use thiserror::Error;
use tracing::{debug, info, warn};
use warden_common::kube_utils::nested_str;
use warden_common::FieldError;

use crate::resources::{
    BackupPhase, BACKUP_ERROR_PATH, BACKUP_STARTED_AT_PATH, BACKUP_STOPPED_AT_PATH,
};

/// Error message used when a failed backup carries none
pub const UNKNOWN_BACKUP_ERROR: &str = "unknown error";

/// Performance data key for the backup duration
pub const DURATION_METRIC: &str = "duration_seconds";

/// Backup data that cannot be interpreted
///
/// The event carrying it is skipped; the next update of the same backup may
/// succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackupDataError {
    /// A status field has the wrong JSON type
    #[error(transparent)]
    Field(#[from] FieldError),

    /// A required field is absent
    #[error("field {0} is missing")]
    MissingField(String),

    /// A timestamp is not RFC 3339
    #[error("field {field} is not an RFC 3339 timestamp: {value:?}")]
    InvalidTimestamp {
        /// Dotted field path
        field: String,
        /// Raw value found
        value: String,
    },
}

/// Terminal outcome of a backup, ready to be reported
#[derive(Debug, Clone, PartialEq)]
pub enum BackupOutcome {
    /// The backup completed
    Success {
        /// Human readable report
        message: String,
        /// `stoppedAt - startedAt`, negative when the clocks disagree
        duration: TimeDelta,
    },
    /// The backup failed
    Failure {
        /// Human readable report, including the CNPG error
        message: String,
    },
}

/// Backups observed but not yet finished, keyed by name
#[derive(Debug, Default)]
pub struct TrackedBackups {
    backups: HashMap<String, BackupPhase>,
}

impl TrackedBackups {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed an Added or Modified backup.
    ///
    /// Returns the outcome to report when the backup reached a terminal
    /// phase; the backup is no longer tracked afterwards. Malformed data
    /// leaves the previous state in place.
    pub fn observe(
        &mut self,
        backup: &DynamicObject,
    ) -> Result<Option<BackupOutcome>, BackupDataError> {
        let name = backup
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| BackupDataError::MissingField("metadata.name".to_string()))?;
        let phase = BackupPhase::of(backup)?;

        if !self.backups.contains_key(name) {
            match phase {
                BackupPhase::Unset => info!(backup = name, "new backup detected"),
                _ => info!(backup = name, phase = %phase, "tracking backup"),
            }
            self.backups.insert(name.to_string(), phase.clone());
        } else if phase != BackupPhase::Unset {
            debug!(backup = name, phase = %phase, "backup status update");
        }

        let outcome = match phase {
            BackupPhase::Completed => Some(completed(backup)?),
            BackupPhase::Failed => Some(failed(backup)?),
            _ => None,
        };

        match outcome {
            Some(outcome) => {
                self.backups.remove(name);
                Ok(Some(outcome))
            }
            None => {
                self.backups.insert(name.to_string(), phase);
                Ok(None)
            }
        }
    }

    /// Stop tracking a backup, returning its last phase if it was tracked
    pub fn forget(&mut self, name: &str) -> Option<BackupPhase> {
        self.backups.remove(name)
    }

    /// Whether the backup is currently tracked
    pub fn contains(&self, name: &str) -> bool {
        self.backups.contains_key(name)
    }

    /// Last observed phase of a tracked backup
    pub fn phase(&self, name: &str) -> Option<&BackupPhase> {
        self.backups.get(name)
    }

    /// Number of tracked backups
    pub fn len(&self) -> usize {
        self.backups.len()
    }

    /// Whether nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.backups.is_empty()
    }
}

fn timestamp(
    backup: &DynamicObject,
    path: &[&str],
) -> Result<DateTime<FixedOffset>, BackupDataError> {
    let raw = nested_str(backup, path)?
        .ok_or_else(|| BackupDataError::MissingField(path.join(".")))?;
    DateTime::parse_from_rfc3339(raw).map_err(|_| BackupDataError::InvalidTimestamp {
        field: path.join("."),
        value: raw.to_string(),
    })
}

fn completed(backup: &DynamicObject) -> Result<BackupOutcome, BackupDataError> {
    let started_at = timestamp(backup, BACKUP_STARTED_AT_PATH)?;
    let stopped_at = timestamp(backup, BACKUP_STOPPED_AT_PATH)?;

    let duration = stopped_at - started_at;
    if duration < TimeDelta::zero() {
        warn!(
            backup = backup.metadata.name.as_deref().unwrap_or_default(),
            started_at = %started_at,
            stopped_at = %stopped_at,
            "backup stopped before it started, reporting negative duration"
        );
    }

    Ok(BackupOutcome::Success {
        message: format!(
            "backup process completed successfully in {} at {}",
            format_signed_duration(duration),
            format_time(&stopped_at)
        ),
        duration,
    })
}

fn failed(backup: &DynamicObject) -> Result<BackupOutcome, BackupDataError> {
    let error = nested_str(backup, BACKUP_ERROR_PATH)?.unwrap_or(UNKNOWN_BACKUP_ERROR);
    Ok(BackupOutcome::Failure {
        message: format!("backup failed: {}", error),
    })
}

/// Render a duration the way Go's `time.Duration` prints it.
///
/// `300s` is "5m0s", `3723s` is "1h2m3s", sub-second values use the largest
/// fitting unit ("500ms", "1.5µs").
pub fn format_duration(duration: Duration) -> String {
    let nanos = duration.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }
    if nanos < 1_000 {
        return format!("{}ns", nanos);
    }
    if nanos < 1_000_000 {
        return format!("{}µs", decimal(nanos, 1_000));
    }
    if nanos < 1_000_000_000 {
        return format!("{}ms", decimal(nanos, 1_000_000));
    }

    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = u128::from(secs % 60) * 1_000_000_000 + u128::from(duration.subsec_nanos());

    let mut out = String::new();
    if hours > 0 {
        let _ = write!(out, "{}h", hours);
    }
    if hours > 0 || minutes > 0 {
        let _ = write!(out, "{}m", minutes);
    }
    let _ = write!(out, "{}s", decimal(seconds, 1_000_000_000));
    out
}

/// [`format_duration`] for a signed delta, negative values prefixed with '-'
pub fn format_signed_duration(delta: TimeDelta) -> String {
    let magnitude = delta.abs().to_std().unwrap_or_default();
    if delta < TimeDelta::zero() {
        format!("-{}", format_duration(magnitude))
    } else {
        format_duration(magnitude)
    }
}

/// Seconds in `delta` as a float, keeping the sign
pub fn delta_seconds(delta: TimeDelta) -> f64 {
    delta.num_seconds() as f64 + f64::from(delta.subsec_nanos()) / 1e9
}

/// Render a timestamp like Go's `time.Time` prints it:
/// "2024-01-01 00:05:00 +0000 UTC", with a trimmed fraction when present.
///
/// Offsets other than zero have no zone name, so the offset is repeated.
pub fn format_time(ts: &DateTime<FixedOffset>) -> String {
    let mut out = ts.format("%Y-%m-%d %H:%M:%S").to_string();
    let nanos = ts.nanosecond() % 1_000_000_000;
    if nanos > 0 {
        let digits = format!("{:09}", nanos);
        let _ = write!(out, ".{}", digits.trim_end_matches('0'));
    }
    let offset = ts.format("%z").to_string();
    let zone = if ts.offset().local_minus_utc() == 0 {
        "UTC"
    } else {
        offset.as_str()
    };
    let _ = write!(out, " {} {}", offset, zone);
    out
}

/// `value / unit` with trailing zeros of the fraction dropped
fn decimal(value: u128, unit: u128) -> String {
    let whole = value / unit;
    let fraction = value % unit;
    if fraction == 0 {
        return whole.to_string();
    }
    let width = unit.to_string().len() - 1;
    let digits = format!("{:0width$}", fraction, width = width);
    format!("{}.{}", whole, digits.trim_end_matches('0'))
}

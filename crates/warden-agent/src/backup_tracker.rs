//! Backup tracker: follows the backups of one scheduled backup
//!
//! Each cycle lists backups to obtain a resume point, watches from there and
//! feeds every backup owned by the schedule into a fresh [`TrackedBackups`].
//! When the watch ends the cycle starts over; cancellation ends the tracker.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use warden_common::kube_utils::is_owned_by;
use warden_common::metrics::{self, ActiveTrackerGuard, Outcome, MALFORMED_EVENTS};
use warden_common::Result;
use warden_outputs::Outputs;

use crate::resources::{ResourceKind, SCHEDULE_OWNER_KIND};
use crate::tracked::{delta_seconds, BackupOutcome, TrackedBackups, DURATION_METRIC};
use crate::watch_client::{ResourceEvent, ResourceWatchClient};

/// How a watch cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Cycle {
    /// The stream closed; relist and watch again
    Resume,
    /// Cancellation was requested
    Cancelled,
}

/// Tracks the backups of one scheduled backup and reports their outcomes
pub struct BackupTracker {
    client: Arc<dyn ResourceWatchClient>,
    outputs: Arc<Outputs>,
    schedule: String,
    namespace: String,
}

impl BackupTracker {
    /// Create a tracker for `schedule` in `namespace`
    pub fn new(
        client: Arc<dyn ResourceWatchClient>,
        outputs: Arc<Outputs>,
        schedule: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            client,
            outputs,
            schedule: schedule.into(),
            namespace: namespace.into(),
        }
    }

    /// Name of the tracked schedule
    pub fn schedule(&self) -> &str {
        &self.schedule
    }

    /// Run until `cancel` fires or a list/watch call fails.
    ///
    /// Returns `Ok(())` on cancellation.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let _active = ActiveTrackerGuard::acquire();
        debug!(schedule = %self.schedule, "starting to watch backups");

        loop {
            match self.run_cycle(&cancel).await? {
                Cycle::Resume => {
                    debug!(schedule = %self.schedule, "backup watcher closed, restarting");
                    metrics::record_stream_restart(ResourceKind::Backup.plural());
                }
                Cycle::Cancelled => {
                    debug!(schedule = %self.schedule, "stopping watch for backups");
                    return Ok(());
                }
            }
        }
    }

    async fn run_cycle(&self, cancel: &CancellationToken) -> Result<Cycle> {
        // Only the resume point matters; past backups are not replayed
        let listing = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Cycle::Cancelled),
            listing = self.client.list(ResourceKind::Backup, &self.namespace) => listing?,
        };

        let mut events = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Cycle::Cancelled),
            stream = self.client.watch(ResourceKind::Backup, &self.namespace, &listing.cursor) => stream?,
        };

        let mut tracked = TrackedBackups::new();
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(Cycle::Cancelled),
                event = events.next() => match event {
                    Some(event) => event,
                    None => return Ok(Cycle::Resume),
                },
            };
            self.handle_event(&mut tracked, event).await;
        }
    }

    async fn handle_event(&self, tracked: &mut TrackedBackups, event: ResourceEvent) {
        let backup = event.object();
        let Some(name) = backup.metadata.name.as_deref() else {
            warn!(schedule = %self.schedule, event = event.type_name(), "ignoring backup event without a name");
            return;
        };

        if !is_owned_by(backup, SCHEDULE_OWNER_KIND, &self.schedule) {
            // Ownership moved away while in flight: drop it without a report
            if tracked.forget(name).is_some() {
                info!(schedule = %self.schedule, backup = name, "backup no longer owned by this schedule, untracking");
            }
            return;
        }

        match &event {
            ResourceEvent::Added(backup) | ResourceEvent::Modified(backup) => {
                match tracked.observe(backup) {
                    Ok(Some(outcome)) => self.report(name, outcome).await,
                    Ok(None) => {}
                    Err(e) => {
                        warn!(
                            schedule = %self.schedule,
                            backup = name,
                            error = %e,
                            "skipping malformed backup event"
                        );
                        MALFORMED_EVENTS.add(1, &[]);
                    }
                }
            }
            ResourceEvent::Deleted(_) => {
                info!(schedule = %self.schedule, backup = name, "backup deleted");
                tracked.forget(name);
            }
        }
    }

    async fn report(&self, backup: &str, outcome: BackupOutcome) {
        match outcome {
            BackupOutcome::Success { message, duration } => {
                let seconds = delta_seconds(duration);
                info!(schedule = %self.schedule, backup, duration_seconds = seconds, "backup completed");
                // Histograms only accept non-negative samples
                metrics::record_outcome(Outcome::Success, (seconds >= 0.0).then_some(seconds));
                let data = BTreeMap::from([(DURATION_METRIC.to_string(), seconds)]);
                self.outputs.set_success(&message, &data).await;
            }
            BackupOutcome::Failure { message } => {
                warn!(schedule = %self.schedule, backup, error = %message, "backup failed");
                metrics::record_outcome(Outcome::Failure, None);
                self.outputs.set_failure(&message).await;
            }
        }
    }
}

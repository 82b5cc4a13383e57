//! Schedule set watcher: one backup tracker per scheduled backup
//!
//! Lists and watches the ScheduledBackups of the namespace and keeps a
//! [`BackupTracker`] running for every one that targets our cluster. When the
//! schedule stream closes, all trackers are stopped and awaited before the
//! whole set is rebuilt from a fresh list.

use std::sync::Arc;

use futures::StreamExt;
use kube::api::DynamicObject;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, warn, Instrument};
use warden_common::metrics;
use warden_common::Result;
use warden_outputs::Outputs;

use crate::backup_tracker::{BackupTracker, Cycle};
use crate::registry::WatcherRegistry;
use crate::resources::{schedule_cluster, ResourceKind};
use crate::watch_client::{ResourceEvent, ResourceWatchClient};

/// Keeps the set of backup trackers in line with the cluster's schedules
pub struct ScheduleSetWatcher {
    client: Arc<dyn ResourceWatchClient>,
    outputs: Arc<Outputs>,
    cluster: String,
    namespace: String,
    registry: WatcherRegistry,
    trackers: TaskTracker,
}

impl ScheduleSetWatcher {
    /// Create a watcher for the schedules of `cluster` in `namespace`
    pub fn new(
        client: Arc<dyn ResourceWatchClient>,
        outputs: Arc<Outputs>,
        cluster: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            client,
            outputs,
            cluster: cluster.into(),
            namespace: namespace.into(),
            registry: WatcherRegistry::new(),
            trackers: TaskTracker::new(),
        }
    }

    /// Trackers currently registered
    pub fn registry(&self) -> &WatcherRegistry {
        &self.registry
    }

    /// Tracker tasks that have not finished yet
    pub fn running_trackers(&self) -> usize {
        self.trackers.len()
    }

    /// Run until `cancel` fires or a list/watch call on schedules fails.
    ///
    /// Every tracker has finished when this returns, whatever the result.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!(cluster = %self.cluster, namespace = %self.namespace, "starting to watch scheduled backups");

        let result = loop {
            match self.run_cycle(&cancel).await {
                Ok(Cycle::Resume) => {
                    debug!("scheduled backup watcher closed, restarting");
                    metrics::record_stream_restart(ResourceKind::ScheduledBackup.plural());
                    self.stop_trackers().await;
                }
                Ok(Cycle::Cancelled) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        debug!("waiting for all backup trackers to stop");
        self.stop_trackers().await;
        result
    }

    async fn run_cycle(&self, cancel: &CancellationToken) -> Result<Cycle> {
        let listing = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Cycle::Cancelled),
            listing = self.client.list(ResourceKind::ScheduledBackup, &self.namespace) => listing?,
        };

        for schedule in &listing.items {
            if let Some(name) = schedule.metadata.name.as_deref() {
                if self.targets_cluster(schedule) {
                    self.start_tracker(name, cancel);
                }
            }
        }

        let mut events = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Cycle::Cancelled),
            stream = self.client.watch(ResourceKind::ScheduledBackup, &self.namespace, &listing.cursor) => stream?,
        };

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(Cycle::Cancelled),
                event = events.next() => match event {
                    Some(event) => self.handle_event(event, cancel),
                    None => return Ok(Cycle::Resume),
                },
            }
        }
    }

    fn handle_event(&self, event: ResourceEvent, cancel: &CancellationToken) {
        let Some(name) = event.object().metadata.name.as_deref() else {
            warn!(event = event.type_name(), "ignoring scheduled backup event without a name");
            return;
        };

        match &event {
            ResourceEvent::Added(schedule) => {
                if self.targets_cluster(schedule) {
                    self.start_tracker(name, cancel);
                }
            }
            ResourceEvent::Modified(schedule) => {
                if self.targets_cluster(schedule) {
                    // No-op for a running tracker; picks up schedules moved to us
                    self.start_tracker(name, cancel);
                } else if self.registry.stop(name) {
                    info!(schedule = name, "scheduled backup no longer targets this cluster");
                }
            }
            ResourceEvent::Deleted(_) => {
                if self.registry.stop(name) {
                    info!(schedule = name, "scheduled backup deleted");
                }
            }
        }
    }

    fn targets_cluster(&self, schedule: &DynamicObject) -> bool {
        match schedule_cluster(schedule) {
            Ok(Some(cluster)) => cluster == self.cluster,
            Ok(None) => false,
            Err(e) => {
                warn!(
                    schedule = schedule.metadata.name.as_deref().unwrap_or_default(),
                    error = %e,
                    "cannot read cluster of scheduled backup"
                );
                false
            }
        }
    }

    fn start_tracker(&self, name: &str, cancel: &CancellationToken) {
        self.registry.start_if_absent(name, cancel, |token| {
            let tracker = BackupTracker::new(
                self.client.clone(),
                self.outputs.clone(),
                name,
                self.namespace.clone(),
            );
            let span = info_span!("backup_tracker", schedule = %name);
            self.trackers.spawn(
                async move {
                    if let Err(e) = tracker.run(token).await {
                        error!(error = %e, "error watching backups");
                    }
                    debug!("backup tracker stopped");
                }
                .instrument(span),
            );
        });
    }

    /// Cancel every tracker and wait until all of them have exited
    async fn stop_trackers(&self) {
        self.registry.stop_all();
        self.trackers.close();
        self.trackers.wait().await;
        self.trackers.reopen();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{backup, eventually, schedule, FakeWatchClient, RecordingSink, Report};
    use serde_json::json;
    use tokio::task::JoinHandle;

    const CLUSTER: &str = "pg-main";
    const NAMESPACE: &str = "databases";

    struct Harness {
        api: Arc<FakeWatchClient>,
        sink: RecordingSink,
        watcher: Arc<ScheduleSetWatcher>,
        cancel: CancellationToken,
        handle: JoinHandle<Result<()>>,
    }

    impl Harness {
        /// Start a watcher over `schedules` and wait until `trackers` backup watches are open
        async fn start(schedules: Vec<DynamicObject>, trackers: usize) -> Self {
            let api = FakeWatchClient::new();
            api.set_items(ResourceKind::ScheduledBackup, schedules);
            let sink = RecordingSink::new();
            let watcher = Arc::new(ScheduleSetWatcher::new(
                api.clone(),
                sink.outputs(),
                CLUSTER,
                NAMESPACE,
            ));
            let cancel = CancellationToken::new();

            let handle = {
                let watcher = watcher.clone();
                let token = cancel.clone();
                tokio::spawn(async move { watcher.run(token).await })
            };
            api.wait_for_watchers(ResourceKind::ScheduledBackup, 1).await;
            api.wait_for_watchers(ResourceKind::Backup, trackers).await;

            Self {
                api,
                sink,
                watcher,
                cancel,
                handle,
            }
        }

        fn send_schedule(&self, event: ResourceEvent) {
            self.api.send(ResourceKind::ScheduledBackup, event);
        }

        fn send_backup(&self, event: ResourceEvent) {
            self.api.send(ResourceKind::Backup, event);
        }

        async fn stop(self) -> Vec<Report> {
            self.cancel.cancel();
            self.handle.await.unwrap().unwrap();
            assert!(self.watcher.registry().is_empty());
            assert_eq!(self.watcher.running_trackers(), 0);
            self.sink.reports()
        }
    }

    // =========================================================================
    // Story Tests
    // =========================================================================

    /// Story: Only schedules of our cluster get a tracker
    #[tokio::test]
    async fn story_startup_tracks_schedules_of_this_cluster() {
        let h = Harness::start(
            vec![
                schedule("nightly", CLUSTER),
                schedule("other", "pg-reporting"),
                schedule("hourly", CLUSTER),
            ],
            2,
        )
        .await;

        assert_eq!(h.watcher.registry().names(), vec!["hourly", "nightly"]);
        assert_eq!(h.watcher.running_trackers(), 2);
        h.stop().await;
    }

    /// Story: A schedule created later starts reporting its backups
    #[tokio::test]
    async fn story_added_schedule_gets_a_tracker() {
        let h = Harness::start(vec![], 0).await;

        h.send_schedule(ResourceEvent::Added(schedule("s1", CLUSTER)));
        h.send_schedule(ResourceEvent::Added(schedule("elsewhere", "pg-reporting")));
        h.api.wait_for_watchers(ResourceKind::Backup, 1).await;
        assert_eq!(h.watcher.registry().names(), vec!["s1"]);

        h.send_backup(ResourceEvent::Modified(backup(
            "b2",
            "s1",
            json!({"phase": "failed", "error": "disk full"}),
        )));
        h.sink.wait_for_reports(1).await;

        assert_eq!(
            h.stop().await,
            vec![Report::Failure("backup failed: disk full".to_string())]
        );
    }

    /// Story: The same schedule seen by the list and by a watch event is tracked once
    #[tokio::test]
    async fn story_duplicate_discovery_starts_one_tracker() {
        let h = Harness::start(vec![schedule("s1", CLUSTER)], 1).await;

        h.send_schedule(ResourceEvent::Added(schedule("s1", CLUSTER)));
        h.send_schedule(ResourceEvent::Modified(schedule("s1", CLUSTER)));
        // Processed in order: once s2 is watching, s1's events were handled
        h.send_schedule(ResourceEvent::Added(schedule("s2", CLUSTER)));
        h.api.wait_for_watchers(ResourceKind::Backup, 2).await;

        assert_eq!(h.watcher.registry().names(), vec!["s1", "s2"]);
        assert_eq!(h.watcher.running_trackers(), 2);
        assert_eq!(h.api.list_calls(ResourceKind::Backup), 2);
        h.stop().await;
    }

    /// Story: Deleting a schedule with backups in flight stops its tracker silently
    #[tokio::test]
    async fn story_deleted_schedule_stops_tracker_without_reports() {
        let h = Harness::start(vec![schedule("s1", CLUSTER)], 1).await;

        h.send_backup(ResourceEvent::Added(backup("b1", "s1", json!({"phase": "running"}))));
        h.send_backup(ResourceEvent::Added(backup("b2", "s1", json!({"phase": "running"}))));
        h.send_schedule(ResourceEvent::Deleted(schedule("s1", CLUSTER)));

        eventually("s1 tracker to stop", || {
            !h.watcher.registry().contains("s1") && h.watcher.running_trackers() == 0
        })
        .await;
        assert_eq!(h.api.watchers(ResourceKind::Backup), 0);

        // Nobody is left to observe these
        h.send_backup(ResourceEvent::Modified(backup(
            "b1",
            "s1",
            json!({"phase": "failed", "error": "cancelled"}),
        )));

        assert!(h.stop().await.is_empty());
    }

    /// Story: A schedule moved to another cluster is no longer tracked
    #[tokio::test]
    async fn story_reassigned_schedule_is_stopped_and_picked_up() {
        let h = Harness::start(vec![schedule("s1", CLUSTER)], 1).await;

        h.send_schedule(ResourceEvent::Modified(schedule("s1", "pg-reporting")));
        eventually("s1 tracker to stop", || h.watcher.running_trackers() == 0).await;
        assert!(h.watcher.registry().is_empty());

        h.send_schedule(ResourceEvent::Modified(schedule("s1", CLUSTER)));
        h.api.wait_for_watchers(ResourceKind::Backup, 1).await;
        assert_eq!(h.watcher.registry().names(), vec!["s1"]);
        h.stop().await;
    }

    /// Story: After the schedule stream closes, the relisted state is tracked
    /// exactly as a cold start would track it
    #[tokio::test]
    async fn story_stream_close_rebuilds_tracker_set() {
        let h = Harness::start(
            vec![
                schedule("s1", CLUSTER),
                schedule("s2", "pg-reporting"),
                schedule("s3", CLUSTER),
            ],
            2,
        )
        .await;

        // Remote state changes while the stream is down
        h.api.set_items(
            ResourceKind::ScheduledBackup,
            vec![schedule("s1", CLUSTER), schedule("s4", CLUSTER)],
        );
        h.api.close_streams(ResourceKind::ScheduledBackup);

        eventually("schedule relist", || {
            h.api.list_calls(ResourceKind::ScheduledBackup) == 2
                && h.api.watchers(ResourceKind::ScheduledBackup) == 1
        })
        .await;
        h.api.wait_for_watchers(ResourceKind::Backup, 2).await;

        // s1 and s3 were stopped, s1 and s4 started from the relist
        assert_eq!(h.api.list_calls(ResourceKind::Backup), 4);
        assert_eq!(h.watcher.registry().names(), vec!["s1", "s4"]);
        assert_eq!(h.watcher.running_trackers(), 2);

        let cold = Harness::start(vec![schedule("s1", CLUSTER), schedule("s4", CLUSTER)], 2).await;
        assert_eq!(cold.watcher.registry().names(), h.watcher.registry().names());

        cold.stop().await;
        h.stop().await;
    }

    #[tokio::test]
    async fn test_schedule_list_failure_is_fatal() {
        let api = FakeWatchClient::new();
        api.fail_lists(ResourceKind::ScheduledBackup);
        let watcher = ScheduleSetWatcher::new(
            api.clone(),
            RecordingSink::new().outputs(),
            CLUSTER,
            NAMESPACE,
        );

        let err = watcher.run(CancellationToken::new()).await.unwrap_err();
        assert!(err.is_transport());
        assert!(watcher.registry().is_empty());
    }

    #[tokio::test]
    async fn test_failed_tracker_is_not_respawned() {
        let api = FakeWatchClient::new();
        api.set_items(ResourceKind::ScheduledBackup, vec![schedule("s1", CLUSTER)]);
        api.fail_lists(ResourceKind::Backup);
        let watcher = Arc::new(ScheduleSetWatcher::new(
            api.clone(),
            RecordingSink::new().outputs(),
            CLUSTER,
            NAMESPACE,
        ));
        let cancel = CancellationToken::new();
        let handle = {
            let watcher = watcher.clone();
            let token = cancel.clone();
            tokio::spawn(async move { watcher.run(token).await })
        };

        eventually("tracker to fail", || {
            watcher.running_trackers() == 0 && api.list_calls(ResourceKind::Backup) == 1
        })
        .await;
        api.wait_for_watchers(ResourceKind::ScheduledBackup, 1).await;

        // The schedule keeps its slot; a repeated Added does not restart it
        api.send(ResourceKind::ScheduledBackup, ResourceEvent::Added(schedule("s1", CLUSTER)));
        // Marker: s2 fails the same way once its Added was handled
        api.send(ResourceKind::ScheduledBackup, ResourceEvent::Added(schedule("s2", CLUSTER)));
        eventually("s2 tracker to fail", || {
            api.list_calls(ResourceKind::Backup) >= 2 && watcher.running_trackers() == 0
        })
        .await;

        assert_eq!(api.list_calls(ResourceKind::Backup), 2);
        assert_eq!(watcher.registry().names(), vec!["s1", "s2"]);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_schedule_without_cluster_is_ignored() {
        let mut broken = schedule("broken", CLUSTER);
        broken.data = json!({"spec": {"cluster": {"name": 42}}});
        let mut unbound = schedule("unbound", CLUSTER);
        unbound.data = json!({"spec": {}});

        let h = Harness::start(vec![broken, unbound, schedule("s1", CLUSTER)], 1).await;
        assert_eq!(h.watcher.registry().names(), vec!["s1"]);
        h.stop().await;
    }
}

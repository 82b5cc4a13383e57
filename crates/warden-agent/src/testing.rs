//! Test doubles for the watch client and status sinks

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{DynamicObject, ObjectMeta};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use warden_common::{Error, Result};
use warden_outputs::{OutputError, Outputs, StatusSink};

use crate::resources::{ResourceKind, CNPG_API_VERSION, SCHEDULE_OWNER_KIND};
use crate::watch_client::{EventStream, Listing, ResourceEvent, ResourceWatchClient};

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Poll `condition` until it holds, panicking after a timeout
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// A ScheduledBackup bound to `cluster`
pub fn schedule(name: &str, cluster: &str) -> DynamicObject {
    DynamicObject {
        types: None,
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("databases".to_string()),
            ..Default::default()
        },
        data: serde_json::json!({
            "spec": {"cluster": {"name": cluster}, "schedule": "0 0 0 * * *"}
        }),
    }
}

/// A Backup owned by schedule `owner` with the given `status` body
pub fn backup(name: &str, owner: &str, status: serde_json::Value) -> DynamicObject {
    DynamicObject {
        types: None,
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("databases".to_string()),
            owner_references: Some(vec![OwnerReference {
                api_version: CNPG_API_VERSION.to_string(),
                kind: SCHEDULE_OWNER_KIND.to_string(),
                name: owner.to_string(),
                uid: format!("uid-{}", owner),
                controller: Some(true),
                ..Default::default()
            }]),
            ..Default::default()
        },
        data: serde_json::json!({ "status": status }),
    }
}

// =============================================================================
// FakeWatchClient
// =============================================================================

#[derive(Default)]
struct FakeState {
    items: HashMap<ResourceKind, Vec<DynamicObject>>,
    streams: HashMap<ResourceKind, broadcast::Sender<ResourceEvent>>,
    list_calls: HashMap<ResourceKind, usize>,
    failing: HashSet<ResourceKind>,
}

impl FakeState {
    fn sender(&mut self, kind: ResourceKind) -> &broadcast::Sender<ResourceEvent> {
        self.streams
            .entry(kind)
            .or_insert_with(|| broadcast::channel(64).0)
    }
}

/// In-memory API server.
///
/// Every watch on a kind subscribes to one broadcast channel, so events sent
/// before a watcher subscribed are not seen by it. Use [`Self::wait_for_watchers`]
/// before sending.
#[derive(Default)]
pub struct FakeWatchClient {
    state: Mutex<FakeState>,
}

impl FakeWatchClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Objects returned by the next list calls for `kind`
    pub fn set_items(&self, kind: ResourceKind, items: Vec<DynamicObject>) {
        self.state.lock().unwrap().items.insert(kind, items);
    }

    /// Make list calls for `kind` fail
    pub fn fail_lists(&self, kind: ResourceKind) {
        self.state.lock().unwrap().failing.insert(kind);
    }

    /// Deliver an event to every open watch on `kind`
    pub fn send(&self, kind: ResourceKind, event: ResourceEvent) {
        // No receivers is fine: the event is simply missed
        let _ = self.state.lock().unwrap().sender(kind).send(event);
    }

    /// End every open watch on `kind`
    pub fn close_streams(&self, kind: ResourceKind) {
        self.state.lock().unwrap().streams.remove(&kind);
    }

    pub fn list_calls(&self, kind: ResourceKind) -> usize {
        self.state
            .lock()
            .unwrap()
            .list_calls
            .get(&kind)
            .copied()
            .unwrap_or(0)
    }

    /// Number of open watches on `kind`
    pub fn watchers(&self, kind: ResourceKind) -> usize {
        self.state
            .lock()
            .unwrap()
            .streams
            .get(&kind)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    pub async fn wait_for_watchers(&self, kind: ResourceKind, count: usize) {
        eventually(&format!("{} watches on {}", count, kind), || {
            self.watchers(kind) == count
        })
        .await;
    }
}

#[async_trait]
impl ResourceWatchClient for FakeWatchClient {
    async fn list(&self, kind: ResourceKind, _namespace: &str) -> Result<Listing> {
        let mut state = self.state.lock().unwrap();
        *state.list_calls.entry(kind).or_default() += 1;
        if state.failing.contains(&kind) {
            return Err(Error::list(kind.plural(), "connection refused"));
        }
        let calls = state.list_calls[&kind];
        Ok(Listing {
            items: state.items.get(&kind).cloned().unwrap_or_default(),
            cursor: calls.to_string(),
        })
    }

    async fn watch(
        &self,
        kind: ResourceKind,
        _namespace: &str,
        _cursor: &str,
    ) -> Result<EventStream> {
        let rx = self.state.lock().unwrap().sender(kind).subscribe();
        Ok(BroadcastStream::new(rx)
            .filter_map(|item| futures::future::ready(item.ok()))
            .boxed())
    }
}

// =============================================================================
// RecordingSink
// =============================================================================

/// A report as received by a sink
#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    Success {
        message: String,
        metrics: BTreeMap<String, f64>,
    },
    Failure(String),
    Unknown(String),
}

/// Sink that records every report it receives
#[derive(Clone, Default)]
pub struct RecordingSink {
    reports: Arc<Mutex<Vec<Report>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// An `Outputs` delivering to this sink only
    pub fn outputs(&self) -> Arc<Outputs> {
        Arc::new(Outputs::new(vec![Box::new(self.clone())]))
    }

    pub fn reports(&self) -> Vec<Report> {
        self.reports.lock().unwrap().clone()
    }

    pub async fn wait_for_reports(&self, count: usize) {
        eventually(&format!("{} reports", count), || {
            self.reports.lock().unwrap().len() >= count
        })
        .await;
    }
}

#[async_trait]
impl StatusSink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn report_success(
        &self,
        message: &str,
        metrics: &BTreeMap<String, f64>,
    ) -> std::result::Result<(), OutputError> {
        self.reports.lock().unwrap().push(Report::Success {
            message: message.to_string(),
            metrics: metrics.clone(),
        });
        Ok(())
    }

    async fn report_failure(&self, message: &str) -> std::result::Result<(), OutputError> {
        self.reports
            .lock()
            .unwrap()
            .push(Report::Failure(message.to_string()));
        Ok(())
    }

    async fn report_unknown(&self, message: &str) -> std::result::Result<(), OutputError> {
        self.reports
            .lock()
            .unwrap()
            .push(Report::Unknown(message.to_string()));
        Ok(())
    }
}

//! List/watch access to CNPG resources
//!
//! The trackers depend on [`ResourceWatchClient`] only. [`KubeWatchClient`]
//! implements it on top of `Api<DynamicObject>`; tests use an in-memory fake.
//!
//! A watch stream ending is the disconnect signal: callers relist and open a
//! new watch. The kube implementation also ends the stream on in-band error
//! statuses (e.g. 410 Gone) and on transport errors mid-stream, since the
//! resume point is lost in both cases.

use async_trait::async_trait;
use futures::future::ready;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use kube::api::{DynamicObject, ListParams, WatchEvent, WatchParams};
use kube::{Api, Client};
use tracing::{debug, warn};
use warden_common::{Error, Result};

use crate::resources::ResourceKind;

/// Resource version used when a list response carries none
const ANY_RESOURCE_VERSION: &str = "0";

/// Snapshot returned by a list call
#[derive(Debug, Clone, Default)]
pub struct Listing {
    /// Objects present at list time
    pub items: Vec<DynamicObject>,
    /// Resume point for the following watch
    pub cursor: String,
}

/// A change to a watched resource
#[derive(Debug, Clone)]
pub enum ResourceEvent {
    /// Object created (or first seen)
    Added(DynamicObject),
    /// Object updated
    Modified(DynamicObject),
    /// Object removed
    Deleted(DynamicObject),
}

impl ResourceEvent {
    /// The object the event is about
    pub fn object(&self) -> &DynamicObject {
        match self {
            Self::Added(obj) | Self::Modified(obj) | Self::Deleted(obj) => obj,
        }
    }

    /// Event type for logs
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Added(_) => "Added",
            Self::Modified(_) => "Modified",
            Self::Deleted(_) => "Deleted",
        }
    }
}

/// Stream of events; its end means the watch was closed
pub type EventStream = BoxStream<'static, ResourceEvent>;

/// List/watch capability for the resource kinds the agent reads
#[async_trait]
pub trait ResourceWatchClient: Send + Sync {
    /// List every object of `kind` in `namespace`
    async fn list(&self, kind: ResourceKind, namespace: &str) -> Result<Listing>;

    /// Watch `kind` in `namespace` for changes after `cursor`
    async fn watch(&self, kind: ResourceKind, namespace: &str, cursor: &str)
        -> Result<EventStream>;
}

/// Watch client backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeWatchClient {
    client: Client,
}

impl KubeWatchClient {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, kind: ResourceKind, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &kind.api_resource())
    }
}

#[async_trait]
impl ResourceWatchClient for KubeWatchClient {
    async fn list(&self, kind: ResourceKind, namespace: &str) -> Result<Listing> {
        let list = self
            .api(kind, namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| Error::list(kind.plural(), e))?;

        let cursor = list
            .metadata
            .resource_version
            .unwrap_or_else(|| ANY_RESOURCE_VERSION.to_string());
        debug!(resource = %kind, count = list.items.len(), cursor = %cursor, "listed resources");

        Ok(Listing {
            items: list.items,
            cursor,
        })
    }

    async fn watch(
        &self,
        kind: ResourceKind,
        namespace: &str,
        cursor: &str,
    ) -> Result<EventStream> {
        let stream = self
            .api(kind, namespace)
            .watch(&WatchParams::default(), cursor)
            .await
            .map_err(|e| Error::watch(kind.plural(), e))?;

        Ok(into_events(kind, stream))
    }
}

/// Turn a raw kube watch stream into resource events, ending at the first error
fn into_events<S>(kind: ResourceKind, raw: S) -> EventStream
where
    S: Stream<Item = kube::Result<WatchEvent<DynamicObject>>> + Send + 'static,
{
    raw.map(move |item| classify(kind, item))
        .take_while(|step| ready(!matches!(step, WatchStep::End)))
        .filter_map(|step| {
            ready(match step {
                WatchStep::Emit(event) => Some(event),
                WatchStep::Skip | WatchStep::End => None,
            })
        })
        .boxed()
}

/// What to do with one raw watch item
#[derive(Debug)]
enum WatchStep {
    Emit(ResourceEvent),
    Skip,
    End,
}

fn classify(kind: ResourceKind, item: kube::Result<WatchEvent<DynamicObject>>) -> WatchStep {
    match item {
        Ok(WatchEvent::Added(obj)) => WatchStep::Emit(ResourceEvent::Added(obj)),
        Ok(WatchEvent::Modified(obj)) => WatchStep::Emit(ResourceEvent::Modified(obj)),
        Ok(WatchEvent::Deleted(obj)) => WatchStep::Emit(ResourceEvent::Deleted(obj)),
        Ok(WatchEvent::Bookmark(_)) => WatchStep::Skip,
        Ok(WatchEvent::Error(status)) => {
            warn!(
                resource = %kind,
                code = status.code,
                reason = %status.reason,
                message = %status.message,
                "watch returned an error status, closing stream"
            );
            WatchStep::End
        }
        Err(e) => {
            warn!(resource = %kind, error = %e, "watch stream failed, closing stream");
            WatchStep::End
        }
    }
}

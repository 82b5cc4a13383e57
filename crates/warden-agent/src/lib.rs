//! Warden Agent - CNPG backup outcome monitoring
//!
//! Runs next to a CNPG instance and reports the outcome of every backup of
//! its cluster to the configured output modules:
//!
//! - **Schedule Set Watcher**: keeps one tracker per ScheduledBackup of the cluster
//! - **Backup Tracker**: follows the Backups of one schedule to a terminal phase
//! - **Watcher Registry**: schedule name → tracker cancellation token
//!
//! # Architecture
//!
//! Both watchers relist and rewatch when their stream closes. Nothing is
//! persisted: after a restart the view is rebuilt from the API server.

pub mod backup_tracker;
pub mod cluster;
pub mod config;
pub mod kube_client;
pub mod registry;
pub mod resources;
pub mod schedule_watcher;
pub mod tracked;
pub mod watch_client;

#[cfg(test)]
mod testing;

pub use backup_tracker::BackupTracker;
pub use config::AgentConfig;
pub use registry::WatcherRegistry;
pub use schedule_watcher::ScheduleSetWatcher;
pub use watch_client::{KubeWatchClient, ResourceEvent, ResourceWatchClient};

//! CNPG resources observed by the agent
//!
//! The agent never deserializes CNPG objects into typed structs; it reads
//! the handful of fields it needs from `DynamicObject` by path. This module
//! names those resources and fields in one place.

use std::fmt;

use kube::api::{ApiResource, DynamicObject};
use warden_common::kube_utils::{nested_str, HasApiResource};
use warden_common::FieldError;

/// API version of every CNPG resource the agent reads
pub const CNPG_API_VERSION: &str = "postgresql.cnpg.io/v1";

/// Owner kind of the agent pod
pub const CLUSTER_KIND: &str = "Cluster";

/// Owner kind linking a backup to its schedule
pub const SCHEDULE_OWNER_KIND: &str = ScheduledBackup::KIND;

/// Path of the cluster reference on a scheduled backup
pub const SCHEDULE_CLUSTER_PATH: &[&str] = &["spec", "cluster", "name"];
/// Path of the backup phase
pub const BACKUP_PHASE_PATH: &[&str] = &["status", "phase"];
/// Path of the backup start time
pub const BACKUP_STARTED_AT_PATH: &[&str] = &["status", "startedAt"];
/// Path of the backup stop time
pub const BACKUP_STOPPED_AT_PATH: &[&str] = &["status", "stoppedAt"];
/// Path of the backup error message
pub const BACKUP_ERROR_PATH: &[&str] = &["status", "error"];

/// Marker for `scheduledbackups.postgresql.cnpg.io`
pub struct ScheduledBackup;

impl HasApiResource for ScheduledBackup {
    const API_VERSION: &'static str = CNPG_API_VERSION;
    const KIND: &'static str = "ScheduledBackup";
}

/// Marker for `backups.postgresql.cnpg.io`
pub struct Backup;

impl HasApiResource for Backup {
    const API_VERSION: &'static str = CNPG_API_VERSION;
    const KIND: &'static str = "Backup";
}

/// The resource kinds the watch client serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// One per recurring backup policy
    ScheduledBackup,
    /// One per backup execution
    Backup,
}

impl ResourceKind {
    /// Build the ApiResource for list/watch calls
    pub fn api_resource(&self) -> ApiResource {
        match self {
            Self::ScheduledBackup => ScheduledBackup::api_resource(),
            Self::Backup => Backup::api_resource(),
        }
    }

    /// Plural resource name, used in errors and metric labels
    pub fn plural(&self) -> &'static str {
        match self {
            Self::ScheduledBackup => "scheduledbackups",
            Self::Backup => "backups",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.plural())
    }
}

/// Cluster a scheduled backup belongs to, if it names one
pub fn schedule_cluster(schedule: &DynamicObject) -> Result<Option<&str>, FieldError> {
    nested_str(schedule, SCHEDULE_CLUSTER_PATH)
}

/// Lifecycle phase of a backup as reported in `status.phase`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupPhase {
    /// No phase yet; the backup was just created
    Unset,
    /// Backup in progress
    Running,
    /// Backup finished successfully
    Completed,
    /// Backup finished with an error
    Failed,
    /// Any other phase CNPG reports (pending, started, finalizing, ...)
    Other(String),
}

impl BackupPhase {
    /// Interpret a raw phase value; an absent or empty phase is unset
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            None | Some("") => Self::Unset,
            Some("running") => Self::Running,
            Some("completed") => Self::Completed,
            Some("failed") => Self::Failed,
            Some(other) => Self::Other(other.to_string()),
        }
    }

    /// Read the phase of a backup object
    pub fn of(backup: &DynamicObject) -> Result<Self, FieldError> {
        Ok(Self::parse(nested_str(backup, BACKUP_PHASE_PATH)?))
    }

    /// Whether the backup has reached an outcome
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Phase as written by CNPG
    pub fn as_str(&self) -> &str {
        match self {
            Self::Unset => "",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Other(phase) => phase,
        }
    }
}

impl fmt::Display for BackupPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unset => f.write_str("<unset>"),
            other => f.write_str(other.as_str()),
        }
    }
}

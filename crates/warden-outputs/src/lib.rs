//! Monitoring outputs for the warden agent
//!
//! An output module receives terminal backup outcomes and forwards them to a
//! monitoring system:
//!
//! - **icinga**: submits a passive check result through the Icinga 2 API
//! - **void**: accepts everything and does nothing
//!
//! Modules are selected at startup and collected into an [`Outputs`] value
//! that is passed down to every tracker. Delivery is best-effort: a module
//! failure is logged and never reaches the caller.

#![deny(missing_docs)]

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::{debug, error};

pub mod error;
pub mod icinga;
pub mod void;

pub use error::OutputError;
pub use icinga::{IcingaOutput, IcingaSettings};
pub use void::VoidOutput;

use warden_common::metrics;

/// Name of the Icinga output module
pub const ICINGA_OUTPUT: &str = "icinga";

/// Name of the void output module
pub const VOID_OUTPUT: &str = "void";

/// A monitoring system that accepts backup outcomes.
///
/// Each call may fail (network, authentication); callers decide what to do
/// with the error. [`Outputs`] logs it and moves on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatusSink: Send + Sync {
    /// Module name used in logs and configuration
    fn name(&self) -> &'static str;

    /// Report a successful backup with numeric performance data
    async fn report_success(
        &self,
        message: &str,
        metrics: &BTreeMap<String, f64>,
    ) -> Result<(), OutputError>;

    /// Report a failed backup
    async fn report_failure(&self, message: &str) -> Result<(), OutputError>;

    /// Report that the backup state cannot be determined
    async fn report_unknown(&self, message: &str) -> Result<(), OutputError>;
}

/// The set of configured output modules.
///
/// Constructed once at startup and shared behind an `Arc`. Every report is
/// delivered to each module in configuration order.
#[derive(Default)]
pub struct Outputs {
    modules: Vec<Box<dyn StatusSink>>,
}

impl Outputs {
    /// Create a collection from already-built modules
    pub fn new(modules: Vec<Box<dyn StatusSink>>) -> Self {
        Self { modules }
    }

    /// Build the collection from configured module names.
    ///
    /// Blank names are ignored, so an empty list yields an empty collection.
    /// Icinga settings are only validated when the icinga module is selected.
    pub fn from_config(names: &[String], icinga: &IcingaSettings) -> Result<Self, OutputError> {
        let mut modules: Vec<Box<dyn StatusSink>> = Vec::new();

        for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
            debug!(module = name, "initializing output module");
            match name {
                ICINGA_OUTPUT => modules.push(Box::new(IcingaOutput::from_settings(icinga)?)),
                VOID_OUTPUT => modules.push(Box::new(VoidOutput)),
                other => return Err(OutputError::UnknownModule(other.to_string())),
            }
        }

        Ok(Self { modules })
    }

    /// Names of the configured modules, in delivery order
    pub fn names(&self) -> Vec<&'static str> {
        self.modules.iter().map(|m| m.name()).collect()
    }

    /// Whether no module is configured
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Deliver a success report to every module
    pub async fn set_success(&self, message: &str, data: &BTreeMap<String, f64>) {
        for module in &self.modules {
            if let Err(e) = module.report_success(message, data).await {
                error!(module = module.name(), error = %e, "unable to send success state");
                metrics::record_sink_failure(module.name());
            }
        }
    }

    /// Deliver a failure report to every module
    pub async fn set_failure(&self, message: &str) {
        for module in &self.modules {
            if let Err(e) = module.report_failure(message).await {
                error!(module = module.name(), error = %e, "unable to send failure state");
                metrics::record_sink_failure(module.name());
            }
        }
    }

    /// Deliver an unknown-state report to every module
    pub async fn set_unknown(&self, message: &str) {
        for module in &self.modules {
            if let Err(e) = module.report_unknown(message).await {
                error!(module = module.name(), error = %e, "unable to send unknown state");
                metrics::record_sink_failure(module.name());
            }
        }
    }
}

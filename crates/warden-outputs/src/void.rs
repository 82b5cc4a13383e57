//! Output module that discards every report

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::{OutputError, StatusSink, VOID_OUTPUT};

/// Accepts every report and does nothing with it
#[derive(Debug, Clone, Copy, Default)]
pub struct VoidOutput;

#[async_trait]
impl StatusSink for VoidOutput {
    fn name(&self) -> &'static str {
        VOID_OUTPUT
    }

    async fn report_success(
        &self,
        _message: &str,
        _metrics: &BTreeMap<String, f64>,
    ) -> Result<(), OutputError> {
        Ok(())
    }

    async fn report_failure(&self, _message: &str) -> Result<(), OutputError> {
        Ok(())
    }

    async fn report_unknown(&self, _message: &str) -> Result<(), OutputError> {
        Ok(())
    }
}

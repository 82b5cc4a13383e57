//! Icinga 2 output module
//!
//! Submits passive check results with the `process-check-result` action of
//! the Icinga 2 REST API. The agent maps backup outcomes onto plugin exit
//! codes: success is OK, failure is CRITICAL, unknown is UNKNOWN.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, info};

use crate::{OutputError, StatusSink, ICINGA_OUTPUT};

/// Environment variable holding the Icinga API base URL
pub const ICINGA_API_URL_ENV: &str = "BC_OUTPUT_ICINGA_API_URL";
/// Environment variable holding the Icinga API user
pub const ICINGA_USER_ENV: &str = "BC_OUTPUT_ICINGA_USER";
/// Environment variable holding the Icinga API password
pub const ICINGA_PASS_ENV: &str = "BC_OUTPUT_ICINGA_PASS";
/// Environment variable holding the Icinga service object name
pub const ICINGA_SERVICE_ENV: &str = "BC_OUTPUT_ICINGA_SERVICE";
/// Environment variable holding the Icinga host object name
pub const ICINGA_HOST_ENV: &str = "BC_OUTPUT_ICINGA_HOST";
/// Environment variable disabling TLS verification
pub const ICINGA_INSECURE_ENV: &str = "BC_OUTPUT_ICINGA_INSECURE";

/// API path of the passive check result action
const CHECK_RESULT_PATH: &str = "/v1/actions/process-check-result";

/// Timeout for a single check result submission
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Raw Icinga settings as read from the configuration
#[derive(Clone, Default)]
pub struct IcingaSettings {
    /// API base URL (e.g. "https://icinga.example:5665")
    pub api_url: Option<String>,
    /// API user
    pub username: Option<String>,
    /// API password
    pub password: Option<String>,
    /// Host object the service belongs to
    pub host: Option<String>,
    /// Service object receiving the check results
    pub service: Option<String>,
    /// Accept any TLS certificate from the API
    pub insecure_skip_verify: bool,
}

impl fmt::Debug for IcingaSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IcingaSettings")
            .field("api_url", &self.api_url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("host", &self.host)
            .field("service", &self.service)
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .finish()
    }
}

fn required(value: &Option<String>, env: &'static str) -> Result<String, OutputError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(OutputError::MissingSetting(env)),
    }
}

/// Plugin exit status understood by Icinga
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// OK
    Ok = 0,
    /// WARNING
    Warning = 1,
    /// CRITICAL
    Critical = 2,
    /// UNKNOWN
    Unknown = 3,
}

/// Body of a `process-check-result` request
#[derive(Debug, Serialize)]
pub struct CheckResult {
    /// Object type the filter applies to
    #[serde(rename = "type")]
    pub type_: &'static str,
    /// Icinga filter expression selecting the service
    pub filter: String,
    /// Plugin exit status
    pub exit_status: u8,
    /// Plugin output shown in the UI
    pub plugin_output: String,
    /// Performance data as `label=value` pairs
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub performance_data: Vec<String>,
    /// Ask the API for an indented response
    pub pretty: bool,
}

/// Output module posting check results to Icinga 2
pub struct IcingaOutput {
    api_url: String,
    username: String,
    password: String,
    host: String,
    service: String,
    client: reqwest::Client,
}

impl fmt::Debug for IcingaOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IcingaOutput")
            .field("api_url", &self.api_url)
            .field("username", &self.username)
            .field("host", &self.host)
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

impl IcingaOutput {
    /// Validate settings and build the HTTP client.
    ///
    /// Every setting except the TLS switch is required; an empty value counts
    /// as missing.
    pub fn from_settings(settings: &IcingaSettings) -> Result<Self, OutputError> {
        let api_url = required(&settings.api_url, ICINGA_API_URL_ENV)?;
        let username = required(&settings.username, ICINGA_USER_ENV)?;
        let password = required(&settings.password, ICINGA_PASS_ENV)?;
        let service = required(&settings.service, ICINGA_SERVICE_ENV)?;
        let host = required(&settings.host, ICINGA_HOST_ENV)?;

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(settings.insecure_skip_verify)
            .build()?;

        debug!(
            api_url = %api_url,
            host = %host,
            service = %service,
            username = %username,
            "icinga output initialized"
        );

        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            username,
            password,
            host,
            service,
            client,
        })
    }

    /// Full URL of the check result endpoint
    pub fn endpoint(&self) -> String {
        format!("{}{}", self.api_url, CHECK_RESULT_PATH)
    }

    /// Build the request body for a check result
    pub fn check_result(
        &self,
        exit_status: ExitStatus,
        output: &str,
        performance_data: &BTreeMap<String, f64>,
    ) -> CheckResult {
        CheckResult {
            type_: "Service",
            filter: format!(
                "host.name=={:?} && service.name=={:?}",
                self.host, self.service
            ),
            exit_status: exit_status as u8,
            plugin_output: output.to_string(),
            performance_data: performance_data
                .iter()
                .map(|(label, value)| format!("{}={}", label, value))
                .collect(),
            pretty: true,
        }
    }

    async fn send(
        &self,
        exit_status: ExitStatus,
        output: &str,
        performance_data: &BTreeMap<String, f64>,
    ) -> Result<(), OutputError> {
        let payload = self.check_result(exit_status, output, performance_data);
        let url = self.endpoint();

        debug!(
            url = %url,
            host = %self.host,
            service = %self.service,
            exit_status = payload.exit_status,
            output = %output,
            "sending request to icinga"
        );

        let response = self
            .client
            .post(&url)
            .header(ACCEPT, "application/json")
            .basic_auth(&self.username, Some(&self.password))
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await;

        if status != StatusCode::OK {
            let body = body.unwrap_or_else(|e| format!("<unreadable body: {}>", e));
            debug!(status_code = status.as_u16(), response = %body, "icinga returned error");
            return Err(OutputError::UnexpectedStatus {
                code: status.as_u16(),
                body,
            });
        }

        info!(
            host = %self.host,
            service = %self.service,
            exit_status = payload.exit_status,
            "status successfully sent to Icinga"
        );
        match body {
            Ok(body) => debug!(response = %body, "icinga API response"),
            Err(e) => debug!(error = %e, "failed to read response body"),
        }

        Ok(())
    }
}

#[async_trait]
impl StatusSink for IcingaOutput {
    fn name(&self) -> &'static str {
        ICINGA_OUTPUT
    }

    async fn report_success(
        &self,
        message: &str,
        metrics: &BTreeMap<String, f64>,
    ) -> Result<(), OutputError> {
        info!(host = %self.host, service = %self.service, message, "sending SUCCESS status to Icinga");
        self.send(ExitStatus::Ok, message, metrics).await
    }

    async fn report_failure(&self, message: &str) -> Result<(), OutputError> {
        info!(host = %self.host, service = %self.service, error = message, "sending ERROR status to Icinga");
        self.send(ExitStatus::Critical, message, &BTreeMap::new())
            .await
    }

    async fn report_unknown(&self, message: &str) -> Result<(), OutputError> {
        info!(host = %self.host, service = %self.service, error = message, "sending UNKNOWN status to Icinga");
        self.send(ExitStatus::Unknown, message, &BTreeMap::new())
            .await
    }
}

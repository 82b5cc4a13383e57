//! Agent configuration
//!
//! Every setting is a command line flag that can also be supplied through
//! the environment, which is how the agent is configured when injected into
//! a CNPG pod.

use std::fmt;

use clap::{ArgAction, Parser};
use warden_outputs::IcingaSettings;

/// Watches the backups of the CNPG cluster owning this pod and reports outcomes
#[derive(Parser, Clone)]
#[command(name = "warden-agent", version, about, long_about = None)]
pub struct AgentConfig {
    /// Name of the pod the agent runs in
    #[arg(long, env = "MY_POD_NAME")]
    pub pod_name: String,

    /// Namespace of the pod, its cluster and the backups
    #[arg(long, env = "MY_NAMESPACE")]
    pub namespace: String,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, env = "DEBUG")]
    pub debug: bool,

    /// Output modules to report to (comma separated: icinga, void)
    #[arg(long = "output-module", env = "BC_OUTPUT_MODULE", value_delimiter = ',')]
    pub output_modules: Vec<String>,

    /// Icinga API base URL
    #[arg(long, env = "BC_OUTPUT_ICINGA_API_URL")]
    pub icinga_api_url: Option<String>,

    /// Icinga API user
    #[arg(long, env = "BC_OUTPUT_ICINGA_USER")]
    pub icinga_user: Option<String>,

    /// Icinga API password
    #[arg(long, env = "BC_OUTPUT_ICINGA_PASS", hide_env_values = true)]
    pub icinga_pass: Option<String>,

    /// Icinga host object the service belongs to
    #[arg(long, env = "BC_OUTPUT_ICINGA_HOST")]
    pub icinga_host: Option<String>,

    /// Icinga service object receiving the check results
    #[arg(long, env = "BC_OUTPUT_ICINGA_SERVICE")]
    pub icinga_service: Option<String>,

    /// Skip TLS certificate verification for the Icinga API
    #[arg(
        long,
        env = "BC_OUTPUT_ICINGA_INSECURE",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub icinga_insecure: bool,
}

impl AgentConfig {
    /// Settings for the icinga output module
    pub fn icinga_settings(&self) -> IcingaSettings {
        IcingaSettings {
            api_url: self.icinga_api_url.clone(),
            username: self.icinga_user.clone(),
            password: self.icinga_pass.clone(),
            host: self.icinga_host.clone(),
            service: self.icinga_service.clone(),
            insecure_skip_verify: self.icinga_insecure,
        }
    }
}

impl fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentConfig")
            .field("pod_name", &self.pod_name)
            .field("namespace", &self.namespace)
            .field("debug", &self.debug)
            .field("output_modules", &self.output_modules)
            .field("icinga", &self.icinga_settings())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> AgentConfig {
        let mut argv = vec!["warden-agent", "--pod-name", "pg-main-1", "--namespace", "databases"];
        argv.extend_from_slice(args);
        AgentConfig::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_pod_coordinates() {
        let config = parse(&[]);
        assert_eq!(config.pod_name, "pg-main-1");
        assert_eq!(config.namespace, "databases");
    }

    #[test]
    fn test_output_modules_are_comma_separated() {
        let config = parse(&["--output-module", "icinga,void"]);
        assert_eq!(config.output_modules, vec!["icinga", "void"]);
    }

    #[test]
    fn test_icinga_insecure_defaults_to_true() {
        assert!(parse(&[]).icinga_settings().insecure_skip_verify);
        assert!(!parse(&["--icinga-insecure", "false"])
            .icinga_settings()
            .insecure_skip_verify);
    }

    #[test]
    fn test_icinga_settings_mapping() {
        let config = parse(&[
            "--icinga-api-url",
            "https://icinga:5665",
            "--icinga-user",
            "icinga",
            "--icinga-pass",
            "s3cret",
            "--icinga-host",
            "db-host",
            "--icinga-service",
            "pg-backup",
        ]);
        let settings = config.icinga_settings();
        assert_eq!(settings.api_url.as_deref(), Some("https://icinga:5665"));
        assert_eq!(settings.username.as_deref(), Some("icinga"));
        assert_eq!(settings.password.as_deref(), Some("s3cret"));
        assert_eq!(settings.host.as_deref(), Some("db-host"));
        assert_eq!(settings.service.as_deref(), Some("pg-backup"));

        assert!(!format!("{:?}", config).contains("s3cret"));
    }

    #[test]
    fn test_debug_flag() {
        assert!(parse(&["--debug"]).debug);
    }
}

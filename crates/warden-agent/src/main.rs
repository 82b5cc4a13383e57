//! Warden Agent - reports CNPG backup outcomes to monitoring

use std::fmt::Display;
use std::sync::Arc;

use anyhow::anyhow;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use warden_agent::cluster::resolve_cluster_name;
use warden_agent::kube_client::{create_client, server_version, InClusterClientProvider};
use warden_agent::{AgentConfig, KubeWatchClient, ResourceWatchClient, ScheduleSetWatcher};
use warden_common::telemetry::{init_telemetry, TelemetryConfig};
use warden_outputs::Outputs;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AgentConfig::parse();

    init_telemetry(TelemetryConfig {
        service_name: "warden-agent".to_string(),
        debug: config.debug,
        ..Default::default()
    })?;

    info!(pod = %config.pod_name, namespace = %config.namespace, "starting CNPG backup agent");

    let outputs = match Outputs::from_config(&config.output_modules, &config.icinga_settings()) {
        Ok(outputs) => Arc::new(outputs),
        Err(e) => {
            error!(error = %e, "unable to initialize the output modules");
            return Err(anyhow!("unable to initialize the output modules: {}", e));
        }
    };
    if outputs.is_empty() {
        warn!("no output module configured, outcomes are only logged");
    } else {
        info!(modules = ?outputs.names(), "output modules initialized");
    }

    let client = match create_client(&InClusterClientProvider).await {
        Ok(client) => client,
        Err(e) => return fail(&outputs, "failed to create Kubernetes client", e).await,
    };
    if let Err(e) = server_version(&client).await {
        return fail(&outputs, "failed to get Kubernetes server version", e).await;
    }
    let cluster = match resolve_cluster_name(&client, &config.pod_name, &config.namespace).await {
        Ok(cluster) => cluster,
        Err(e) => return fail(&outputs, "failed to get CNPG cluster information", e).await,
    };

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            info!("shutdown signal received, waiting for all watchers to stop");
            cancel.cancel();
        }
    });

    let watch_client: Arc<dyn ResourceWatchClient> = Arc::new(KubeWatchClient::new(client));
    let watcher = ScheduleSetWatcher::new(watch_client, outputs.clone(), cluster, config.namespace);

    match watcher.run(cancel).await {
        Ok(()) => {
            info!("all watchers stopped, shutting down the CNPG backup agent");
            Ok(())
        }
        Err(e) => fail(&outputs, "error watching scheduled backups", e).await,
    }
}

/// Log, report the failure as unknown state, and turn it into the exit error
async fn fail(outputs: &Outputs, what: &str, err: impl Display) -> anyhow::Result<()> {
    error!(error = %err, "{}", what);
    outputs.set_unknown(&format!("{}: {}", what, err)).await;
    Err(anyhow!("{}: {}", what, err))
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

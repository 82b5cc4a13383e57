//! Resolution of the CNPG cluster the agent belongs to
//!
//! The agent runs as a sidecar of a CNPG instance pod. That pod has exactly
//! one owner reference, pointing at its `Cluster`.

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Api, Client};
use tracing::debug;
use warden_common::{Error, Result};

use crate::resources::CLUSTER_KIND;

/// Look up the agent pod and return the name of the cluster owning it
pub async fn resolve_cluster_name(client: &Client, pod: &str, namespace: &str) -> Result<String> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let found = pods.get(pod).await?;

    let cluster = cluster_from_owner_references(
        pod,
        namespace,
        found.metadata.owner_references.as_deref().unwrap_or_default(),
    )?;
    debug!(pod, namespace, cluster = %cluster, "resolved CNPG cluster");
    Ok(cluster)
}

/// Pick the cluster name out of the pod's owner references
pub fn cluster_from_owner_references(
    pod: &str,
    namespace: &str,
    owners: &[OwnerReference],
) -> Result<String> {
    match owners {
        [] => Err(Error::cluster_resolution(
            pod,
            namespace,
            "pod does not have any owner references",
        )),
        [owner] if owner.kind == CLUSTER_KIND => Ok(owner.name.clone()),
        [owner] => Err(Error::cluster_resolution(
            pod,
            namespace,
            format!("pod is owned by a {:?}, not a {}", owner.kind, CLUSTER_KIND),
        )),
        _ => Err(Error::cluster_resolution(
            pod,
            namespace,
            "pod has multiple owner references, unable to determine the CNPG cluster",
        )),
    }
}

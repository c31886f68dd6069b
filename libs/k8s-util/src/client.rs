use crate::error::{Error, Result};

use kube::{Client, Config};

/// Build the `kube::Client` used by every controller and by the bootstrap sequence's
/// informer sync. Plain construction from an inferred `Config` (in-cluster service
/// account, or the local kubeconfig when running off-cluster for development) -
/// per-request metrics are carried by the `opentelemetry` meter registered on the
/// process, not by a Tower layer on the HTTP client.
pub async fn new_client(config: Config) -> Result<Client> {
    Client::try_from(config).map_err(|e| Error::KubeError("failed to build kube client".into(), e))
}

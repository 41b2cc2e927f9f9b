//! Run capability used by the operator binary
//!
//! Connects to the cluster described by `--kubeconfig` (in-cluster config
//! when unset), confirms the API server answers, then holds until shutdown.
//! [`StandbyOperator`] is not election-gated: every replica that runs it is
//! active at once. An elector and the reconciliation loop plug in behind
//! [`LeaderElectedRun`].

use crate::coordinator::LeaderElectedRun;
use crate::server::ShutdownSignal;
use anyhow::Context as _;
use async_trait::async_trait;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Build a Kubernetes client from a kubeconfig file or the in-cluster
/// service account
pub async fn cluster_client(kubeconfig: Option<&Path>) -> anyhow::Result<Client> {
    let config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("failed to read kubeconfig {}", path.display()))?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .context("invalid kubeconfig")?
        }
        None => kube::Config::incluster().context("failed to load in-cluster config")?,
    };

    Client::try_from(config).context("failed to create Kubernetes client")
}

/// Run loop that idles until cancelled
///
/// Not election-gated; deploy a single replica.
pub struct StandbyOperator {
    kubeconfig: Option<PathBuf>,
}

impl StandbyOperator {
    pub fn new(kubeconfig: Option<PathBuf>) -> Self {
        Self { kubeconfig }
    }
}

#[async_trait]
impl LeaderElectedRun for StandbyOperator {
    async fn run(&self, mut shutdown: ShutdownSignal) -> anyhow::Result<()> {
        let connect = async {
            let client = cluster_client(self.kubeconfig.as_deref()).await?;
            let version = client
                .apiserver_version()
                .await
                .context("Kubernetes API server unreachable")?;
            anyhow::Ok(version)
        };

        tokio::select! {
            biased;
            _ = shutdown.wait() => {
                info!("Shutdown before cluster connection was established");
                return Ok(());
            }
            version = connect => {
                let version = version?;
                info!(git_version = %version.git_version, "Connected to Kubernetes cluster");
            }
        }

        warn!("Run loop is not election-gated; every replica is active");
        shutdown.wait().await;
        info!("Operator run loop stopped");
        Ok(())
    }
}

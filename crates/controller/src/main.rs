mod config;
mod k8s;
mod logging;

use std::path::Path;

use anyhow::anyhow;
use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use error_stack::Report;
use error_stack::ResultExt;
use kube::config::KubeConfigOptions;
use kube::config::Kubeconfig;
use kube::Client;

use crate::config::Cli;
use crate::k8s::types::KubernetesError;
use crate::k8s::HostPortReconciler;
use crate::k8s::NodeIpCache;
use crate::k8s::PodWatcher;
use crate::k8s::ServiceRegistry;
use crate::k8s::StaleServiceReaper;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

/// Build a Kubernetes client from an explicit kubeconfig path, falling back
/// to in-cluster config and then `~/.kube/config`.
///
/// # Errors
///
/// - [`KubernetesError::ConnectionFailed`] if no usable config is found
async fn init_kube_client(kubeconfig: Option<&Path>) -> Result<Client, Report<KubernetesError>> {
    let Some(path) = kubeconfig else {
        return Client::try_default()
            .await
            .change_context(KubernetesError::ConnectionFailed {
                message: "Failed to create Kubernetes client".to_string(),
            });
    };

    let kubeconfig =
        Kubeconfig::read_from(path).change_context(KubernetesError::ConnectionFailed {
            message: format!("Failed to read kubeconfig file: {}", path.display()),
        })?;
    let config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .change_context(KubernetesError::ConnectionFailed {
            message: format!("Failed to create config from kubeconfig: {}", path.display()),
        })?;
    Client::try_from(config).change_context(KubernetesError::ConnectionFailed {
        message: "Failed to create Kubernetes client from custom kubeconfig".to_string(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();
    logging::init();

    tracing::info!("Starting dynamic host-port controller");

    let client = init_kube_client(cli.kubeconfig.as_deref())
        .await
        .map_err(|report| anyhow!("{report:?}"))?;

    let namespace = cli.namespace.filter(|ns| !ns.is_empty());

    let registry = ServiceRegistry::new(client.clone());

    StaleServiceReaper::new(&registry, namespace.as_deref())
        .run_once()
        .await
        .map_err(|report| anyhow!("{report:?}"))
        .context("stale service cleanup failed")?;

    let mut reconciler = HostPortReconciler::new(
        registry,
        NodeIpCache::new(client.clone(), cli.cache_missing_node_ips),
    );

    PodWatcher::new(client, namespace, cli.watch_timeout_secs)
        .run(&mut reconciler)
        .await
        .map_err(|report| anyhow!("{report:?}"))
        .context("pod watch loop terminated")?;

    Ok(())
}

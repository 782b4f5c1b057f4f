use std::path::PathBuf;

use clap::Parser;

/// Process configuration for the controller daemon.
#[derive(Parser, Debug)]
#[command(
    about = "Exposes labeled pod container ports through dynamically assigned node ports"
)]
pub(crate) struct Cli {
    #[arg(
        long,
        env = "KUBECONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to kubeconfig file (defaults to cluster config or ~/.kube/config)"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(
        long,
        env = "KUBERNETES_NAMESPACE",
        help = "Namespace to manage (empty for all namespaces)"
    )]
    pub namespace: Option<String>,

    #[arg(
        long,
        default_value = "290",
        help = "Lifetime of a single pod watch subscription in seconds, reopened transparently on expiry (the API server caps one call below 295)"
    )]
    pub watch_timeout_secs: u32,

    #[arg(
        long,
        default_value_t = false,
        action = clap::ArgAction::Set,
        help = "Also remember node lookups that found no external ip, skipping re-queries for address-less nodes"
    )]
    pub cache_missing_node_ips: bool,
}

//! Kubernetes integration module.
//!
//! This module contains everything that talks to the cluster to expose
//! labeled pod ports through dynamically assigned node ports:
//! - [`PodWatcher`]: restartable, label-filtered pod event stream
//! - [`HostPortReconciler`]: per-event decision logic and the handled set
//! - [`ServiceRegistry`]: derived Service/Endpoints objects and the
//!   discovery-annotation patch
//! - [`NodeIpCache`]: per-node external address memoization
//! - [`StaleServiceReaper`]: startup cleanup of orphaned services

pub(crate) mod node_ips;
pub(crate) mod pod_watcher;
pub(crate) mod ports;
pub(crate) mod reaper;
pub(crate) mod reconciler;
pub(crate) mod service_registry;
pub(crate) mod types;

pub(crate) use node_ips::NodeIpCache;
pub(crate) use pod_watcher::PodWatcher;
pub(crate) use reaper::StaleServiceReaper;
pub(crate) use reconciler::HostPortReconciler;
pub(crate) use service_registry::ServiceRegistry;

use error_stack::Report;
use error_stack::ResultExt;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::WatchEvent;
use kube::api::WatchParams;
use kube::Api;
use kube::Client;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::k8s::ports::HOSTPORTS_LABEL_KEY;
use crate::k8s::reconciler::HostPortReconciler;
use crate::k8s::types::KubernetesError;
use crate::k8s::types::PodEventKind;

/// Produces the ordered pod lifecycle event sequence the reconciler
/// consumes.
///
/// Each watch subscription is label-filtered, optionally namespace-scoped
/// and bounded in lifetime; on expiry or stream closure a new subscription
/// is opened transparently, forever. Failing to open one is fatal: without
/// the stream, new pods would silently never get exposed.
pub(crate) struct PodWatcher {
    client: Client,
    namespace: Option<String>,
    timeout_secs: u32,
}

impl PodWatcher {
    pub(crate) fn new(client: Client, namespace: Option<String>, timeout_secs: u32) -> Self {
        Self {
            client,
            namespace,
            timeout_secs,
        }
    }

    /// Run the watch loop, dispatching events to `reconciler` strictly one
    /// at a time; the next event is not read until the current one has been
    /// fully processed. Per-event failures are logged, never fatal.
    ///
    /// # Errors
    ///
    /// - [`KubernetesError::WatchFailed`] if a subscription cannot be
    ///   opened or reopened
    pub(crate) async fn run(
        &self,
        reconciler: &mut HostPortReconciler,
    ) -> Result<(), Report<KubernetesError>> {
        let api: Api<Pod> = match &self.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let params = WatchParams::default()
            .labels(HOSTPORTS_LABEL_KEY)
            .timeout(self.timeout_secs);

        info!("Watching pods");
        loop {
            let mut stream = api
                .watch(&params, "0")
                .await
                .change_context(KubernetesError::WatchFailed {
                    message: "could not open pod watch subscription".to_string(),
                })?
                .boxed();

            while let Some(item) = stream.next().await {
                let event = match item {
                    Ok(event) => event,
                    Err(err) => {
                        warn!("Pod watch stream error: {err}");
                        break;
                    }
                };

                let (kind, pod) = match event {
                    WatchEvent::Added(pod) => (PodEventKind::Added, pod),
                    WatchEvent::Modified(pod) => (PodEventKind::Modified, pod),
                    WatchEvent::Deleted(pod) => (PodEventKind::Deleted, pod),
                    WatchEvent::Bookmark(_) => continue,
                    WatchEvent::Error(status) => {
                        warn!("Pod watch returned an error event: {status}");
                        break;
                    }
                };

                let pod_name = pod.metadata.name.clone().unwrap_or_else(|| "unknown".to_string());
                if let Err(report) = reconciler.handle_pod_event(kind, &pod).await {
                    error!("[{pod_name}] Failed to handle {kind:?} event: {report:?}");
                }
            }

            info!("Pod watch subscription ended, reopening");
        }
    }
}

use std::collections::HashSet;

use error_stack::Report;
use k8s_openapi::api::core::v1::Pod;
use tracing::info;
use tracing::warn;

use crate::k8s::node_ips::NodeIpCache;
use crate::k8s::ports;
use crate::k8s::service_registry::ServiceRegistry;
use crate::k8s::types::KubernetesError;
use crate::k8s::types::PodEventKind;

/// Drives Service/Endpoints creation and teardown from pod lifecycle
/// events.
///
/// `handled` is the process-local dedup guard: a pod enters it right
/// before its first creation pass and leaves it on deletion, so redelivered
/// Added/Modified events are no-ops. It is not persisted; after a restart
/// the per-port annotation precheck keeps the creation pass idempotent.
pub(crate) struct HostPortReconciler {
    registry: ServiceRegistry,
    node_ips: NodeIpCache,
    handled: HashSet<String>,
}

impl HostPortReconciler {
    pub(crate) fn new(registry: ServiceRegistry, node_ips: NodeIpCache) -> Self {
        Self {
            registry,
            node_ips,
            handled: HashSet::new(),
        }
    }

    /// Handle a single pod lifecycle event.
    ///
    /// Added/Modified events expose the pod's requested ports exactly once
    /// per process lifetime; Deleted events tear the derived services down.
    ///
    /// # Errors
    ///
    /// - [`KubernetesError::InvalidPortLabel`] if the marker label does not
    ///   parse; the pod is then not marked handled, so a later event may
    ///   retry
    /// - any error surfaced by the create/patch/delete calls; creation
    ///   failures are not retried on redelivery (the pod is already marked
    ///   handled by then)
    pub(crate) async fn handle_pod_event(
        &mut self,
        kind: PodEventKind,
        pod: &Pod,
    ) -> Result<(), Report<KubernetesError>> {
        let pod_name = pod.metadata.name.clone().unwrap_or_else(|| "unknown".to_string());
        let namespace = pod
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());
        let pod_key = format!("{namespace}/{pod_name}");

        if kind == PodEventKind::Deleted {
            self.handled.remove(&pod_key);
            return self.retract_pod(&namespace, &pod_name, pod).await;
        }

        if self.handled.contains(&pod_key) {
            info!("[{pod_name}] Ignoring pod because it was already handled");
            return Ok(());
        }

        let pod_ip = pod
            .status
            .as_ref()
            .and_then(|status| status.pod_ip.clone())
            .filter(|ip| !ip.is_empty());
        let Some(pod_ip) = pod_ip else {
            info!("[{pod_name}] Ignoring pod because it does not have an ip");
            return Ok(());
        };

        let phase = pod.status.as_ref().and_then(|status| status.phase.as_deref());
        if phase != Some("Running") {
            info!("[{pod_name}] Ignoring pod because it is not running");
            return Ok(());
        }

        let requested_ports = ports::parse_port_label(port_label(pod))?;

        // Marked before the first attempt: creation is tried at most once
        // per pod, even if an individual port fails below.
        self.handled.insert(pod_key);

        for requested_port in requested_ports {
            self.expose_port(&namespace, &pod_name, &pod_ip, pod, requested_port)
                .await?;
        }

        Ok(())
    }

    /// Expose one requested port of a pod through a dynamically assigned
    /// node port.
    async fn expose_port(
        &mut self,
        namespace: &str,
        pod_name: &str,
        pod_ip: &str,
        pod: &Pod,
        requested_port: i32,
    ) -> Result<(), Report<KubernetesError>> {
        // The annotation survives controller restarts, the handled set does
        // not. Seeing it means the pair already exists.
        if has_port_annotation(pod, requested_port) {
            info!(
                "[{pod_name}] Pod already has a service annotation for port {requested_port}, \
                 skipping recreation"
            );
            return Ok(());
        }

        info!("[{pod_name}] Creating service for port {requested_port}");

        self.registry
            .create_endpoints(namespace, pod_name, pod_ip, requested_port)
            .await?;

        let node_name = pod.spec.as_ref().and_then(|spec| spec.node_name.as_deref());
        let external_ip = match node_name {
            Some(node) => self.node_ips.lookup(node).await,
            None => None,
        };
        if external_ip.is_none() {
            warn!(
                "[{pod_name}] Got no external ip for node '{}', the service will be exposed on \
                 all nodes",
                node_name.unwrap_or("")
            );
        }

        let node_port = self
            .registry
            .create_service(namespace, pod_name, requested_port, external_ip.as_deref())
            .await?;

        // No rollback on failure here: the created pair stays and the next
        // reaper pass or the pod's own deletion cleans it up.
        self.registry
            .annotate_pod(namespace, pod_name, requested_port, node_port)
            .await?;

        Ok(())
    }

    /// Delete every derived service the pod's marker label names.
    async fn retract_pod(
        &mut self,
        namespace: &str,
        pod_name: &str,
        pod: &Pod,
    ) -> Result<(), Report<KubernetesError>> {
        let requested_ports = ports::parse_port_label(port_label(pod))?;

        for requested_port in requested_ports {
            info!("[{pod_name}] Deleting service for port {requested_port}");
            self.registry
                .delete_service(namespace, &ports::service_name(pod_name, requested_port))
                .await?;
        }

        Ok(())
    }
}

fn port_label(pod: &Pod) -> &str {
    pod.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(ports::HOSTPORTS_LABEL_KEY))
        .map(String::as_str)
        .unwrap_or_default()
}

fn has_port_annotation(pod: &Pod, requested_port: i32) -> bool {
    pod.metadata
        .annotations
        .as_ref()
        .is_some_and(|annotations| {
            annotations.contains_key(&ports::port_annotation_key(requested_port))
        })
}

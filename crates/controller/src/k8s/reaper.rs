use error_stack::Report;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::Service;
use tracing::error;
use tracing::info;

use crate::k8s::ports;
use crate::k8s::service_registry::ServiceRegistry;
use crate::k8s::types::KubernetesError;

/// One-shot startup pass deleting every managed service whose owning pod no
/// longer exists.
///
/// The watch stream only covers pod deletions that happen while the process
/// is up; this pass is the only mechanism reconciling deletions that
/// happened in between runs.
pub(crate) struct StaleServiceReaper<'a> {
    registry: &'a ServiceRegistry,
    namespace: Option<&'a str>,
}

impl<'a> StaleServiceReaper<'a> {
    pub(crate) fn new(registry: &'a ServiceRegistry, namespace: Option<&'a str>) -> Self {
        Self {
            registry,
            namespace,
        }
    }

    /// Run the pass to completion. Individual deletion failures are logged
    /// and skipped; only the initial list calls are fatal.
    ///
    /// # Errors
    ///
    /// - [`KubernetesError::ListFailed`] if live pods or managed services
    ///   cannot be listed
    pub(crate) async fn run_once(&self) -> Result<(), Report<KubernetesError>> {
        let pods = self.registry.list_exposed_pods(self.namespace).await?;
        let services = self.registry.list_managed_services(self.namespace).await?;

        for service in stale_services(&services, &pods) {
            let name = service.metadata.name.as_deref().unwrap_or_default();
            let namespace = service.metadata.namespace.as_deref().unwrap_or_default();

            info!("Deleting stale service '{name}'");
            if let Err(report) = self.registry.delete_service(namespace, name).await {
                error!("Failed to delete stale service '{name}': {report:?}");
            }
        }

        Ok(())
    }
}

/// Services whose ownership marker names no live pod in the same namespace.
fn stale_services<'s>(services: &'s [Service], pods: &[Pod]) -> Vec<&'s Service> {
    services
        .iter()
        .filter(|service| {
            let owner = service
                .metadata
                .labels
                .as_ref()
                .and_then(|labels| labels.get(ports::FOR_POD_LABEL_KEY));
            !pods.iter().any(|pod| {
                pod.metadata.name.as_ref() == owner
                    && pod.metadata.namespace == service.metadata.namespace
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use super::*;

    fn live_pod(name: &str, namespace: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn managed_service(name: &str, namespace: &str, for_pod: &str) -> Service {
        let mut labels = BTreeMap::new();
        labels.insert(
            ports::MANAGED_BY_LABEL_KEY.to_string(),
            ports::MANAGED_BY_LABEL_VALUE.to_string(),
        );
        labels.insert(ports::FOR_POD_LABEL_KEY.to_string(), for_pod.to_string());

        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn keeps_owned_service_and_drops_orphan() {
        let pods = vec![live_pod("a", "default")];
        let services = vec![
            managed_service("a-8080", "default", "a"),
            managed_service("b-9090", "default", "b"),
        ];

        let stale = stale_services(&services, &pods);

        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].metadata.name.as_deref(), Some("b-9090"));
    }

    #[test]
    fn same_pod_name_in_other_namespace_is_still_stale() {
        let pods = vec![live_pod("a", "other")];
        let services = vec![managed_service("a-8080", "default", "a")];

        assert_eq!(stale_services(&services, &pods).len(), 1);
    }

    #[test]
    fn service_without_ownership_marker_is_stale() {
        let pods = vec![live_pod("a", "default")];
        let mut service = managed_service("a-8080", "default", "a");
        service
            .metadata
            .labels
            .as_mut()
            .unwrap()
            .remove(ports::FOR_POD_LABEL_KEY);

        assert_eq!(stale_services(&[service], &pods).len(), 1);
    }

    #[test]
    fn nothing_stale_when_every_service_is_owned() {
        let pods = vec![live_pod("a", "default"), live_pod("b", "default")];
        let services = vec![
            managed_service("a-8080", "default", "a"),
            managed_service("b-9090", "default", "b"),
        ];

        assert!(stale_services(&services, &pods).is_empty());
    }
}

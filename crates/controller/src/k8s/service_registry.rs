use std::collections::BTreeMap;

use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::EndpointAddress;
use k8s_openapi::api::core::v1::EndpointPort;
use k8s_openapi::api::core::v1::EndpointSubset;
use k8s_openapi::api::core::v1::Endpoints;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::core::v1::ServicePort;
use k8s_openapi::api::core::v1::ServiceSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::DeleteParams;
use kube::api::ListParams;
use kube::api::Patch;
use kube::api::PatchParams;
use kube::api::PostParams;
use kube::Api;
use kube::Client;
use serde_json::json;

use crate::k8s::ports;
use crate::k8s::types::KubernetesError;

/// Creates, lists and deletes the derived Service/Endpoints pairs and
/// writes the discovery annotation back onto pods.
///
/// Object construction is kept in plain functions below so the shapes can
/// be asserted on without a cluster; the methods here are thin API calls.
pub(crate) struct ServiceRegistry {
    client: Client,
}

impl ServiceRegistry {
    pub(crate) fn new(client: Client) -> Self {
        Self { client }
    }

    /// Create the Endpoints object binding `<pod>-<port>` to the pod ip.
    ///
    /// This must happen before the Service is created, otherwise the
    /// platform's selector-based endpoint controller attaches its own
    /// (empty) addresses to the new Service first.
    ///
    /// # Errors
    ///
    /// - [`KubernetesError::CreateFailed`] if the API call fails
    pub(crate) async fn create_endpoints(
        &self,
        namespace: &str,
        pod_name: &str,
        pod_ip: &str,
        requested_port: i32,
    ) -> Result<(), Report<KubernetesError>> {
        let endpoints = endpoints_for(namespace, pod_name, pod_ip, requested_port);
        let api: Api<Endpoints> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), &endpoints)
            .await
            .change_context(KubernetesError::CreateFailed {
                kind: "endpoints",
                name: ports::service_name(pod_name, requested_port),
            })?;
        Ok(())
    }

    /// Create the NodePort Service for one requested port and return the
    /// dynamically assigned node port.
    ///
    /// When `external_ip` is given the service is pinned to that node
    /// address; otherwise it stays reachable on every node.
    ///
    /// # Errors
    ///
    /// - [`KubernetesError::CreateFailed`] if the API call fails or the
    ///   created service carries no node port
    pub(crate) async fn create_service(
        &self,
        namespace: &str,
        pod_name: &str,
        requested_port: i32,
        external_ip: Option<&str>,
    ) -> Result<i32, Report<KubernetesError>> {
        let service = service_for(namespace, pod_name, requested_port, external_ip);
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let created = api
            .create(&PostParams::default(), &service)
            .await
            .change_context(KubernetesError::CreateFailed {
                kind: "service",
                name: ports::service_name(pod_name, requested_port),
            })?;

        assigned_node_port(&created).ok_or_else(|| {
            Report::new(KubernetesError::CreateFailed {
                kind: "service",
                name: ports::service_name(pod_name, requested_port),
            })
            .attach_printable("created service carries no assigned node port")
        })
    }

    /// Merge-patch the discovery annotation `<prefix>/<requestedPort>`
    /// onto the pod.
    ///
    /// # Errors
    ///
    /// - [`KubernetesError::AnnotateFailed`] if the patch call fails
    pub(crate) async fn annotate_pod(
        &self,
        namespace: &str,
        pod_name: &str,
        requested_port: i32,
        node_port: i32,
    ) -> Result<(), Report<KubernetesError>> {
        let patch = annotation_patch(requested_port, node_port);
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.patch(pod_name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .change_context(KubernetesError::AnnotateFailed {
                pod_name: pod_name.to_string(),
                requested_port,
                node_port,
            })?;
        Ok(())
    }

    /// Delete one derived service by name. The same-named Endpoints object
    /// is garbage-collected by the platform together with it.
    ///
    /// # Errors
    ///
    /// - [`KubernetesError::DeleteFailed`] if the API call fails
    pub(crate) async fn delete_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), Report<KubernetesError>> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default())
            .await
            .change_context(KubernetesError::DeleteFailed {
                name: name.to_string(),
            })?;
        Ok(())
    }

    /// All services carrying the managed-by marker, within the namespace
    /// scope (`None` for all namespaces).
    ///
    /// # Errors
    ///
    /// - [`KubernetesError::ListFailed`] if the API call fails
    pub(crate) async fn list_managed_services(
        &self,
        namespace: Option<&str>,
    ) -> Result<Vec<Service>, Report<KubernetesError>> {
        let api: Api<Service> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let params = ListParams::default().labels(&format!(
            "{}={}",
            ports::MANAGED_BY_LABEL_KEY,
            ports::MANAGED_BY_LABEL_VALUE
        ));
        let services = api
            .list(&params)
            .await
            .change_context(KubernetesError::ListFailed { kind: "services" })?;
        Ok(services.items)
    }

    /// All pods carrying the host-port marker label, within the namespace
    /// scope (`None` for all namespaces).
    ///
    /// # Errors
    ///
    /// - [`KubernetesError::ListFailed`] if the API call fails
    pub(crate) async fn list_exposed_pods(
        &self,
        namespace: Option<&str>,
    ) -> Result<Vec<Pod>, Report<KubernetesError>> {
        let api: Api<Pod> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let params = ListParams::default().labels(ports::HOSTPORTS_LABEL_KEY);
        let pods = api
            .list(&params)
            .await
            .change_context(KubernetesError::ListFailed { kind: "pods" })?;
        Ok(pods.items)
    }
}

/// Shared metadata of the Service/Endpoints pair for one pod port: the
/// deterministic name plus the managed-by and ownership markers.
fn derived_meta(namespace: &str, pod_name: &str, requested_port: i32) -> ObjectMeta {
    let mut labels = BTreeMap::new();
    labels.insert(
        ports::MANAGED_BY_LABEL_KEY.to_string(),
        ports::MANAGED_BY_LABEL_VALUE.to_string(),
    );
    labels.insert(ports::FOR_POD_LABEL_KEY.to_string(), pod_name.to_string());

    ObjectMeta {
        name: Some(ports::service_name(pod_name, requested_port)),
        namespace: Some(namespace.to_string()),
        labels: Some(labels),
        ..Default::default()
    }
}

/// Endpoints object binding the derived service directly to the pod ip,
/// bypassing selector-based endpoint discovery.
fn endpoints_for(namespace: &str, pod_name: &str, pod_ip: &str, requested_port: i32) -> Endpoints {
    Endpoints {
        metadata: derived_meta(namespace, pod_name, requested_port),
        subsets: Some(vec![EndpointSubset {
            addresses: Some(vec![EndpointAddress {
                ip: pod_ip.to_string(),
                ..Default::default()
            }]),
            ports: Some(vec![EndpointPort {
                port: requested_port,
                ..Default::default()
            }]),
            ..Default::default()
        }]),
    }
}

/// NodePort Service exposing `requested_port`, optionally pinned to one
/// node's external address.
fn service_for(
    namespace: &str,
    pod_name: &str,
    requested_port: i32,
    external_ip: Option<&str>,
) -> Service {
    Service {
        metadata: derived_meta(namespace, pod_name, requested_port),
        spec: Some(ServiceSpec {
            type_: Some("NodePort".to_string()),
            ports: Some(vec![ServicePort {
                port: requested_port,
                target_port: Some(IntOrString::Int(requested_port)),
                ..Default::default()
            }]),
            external_ips: external_ip.map(|ip| vec![ip.to_string()]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Merge-patch body adding one discovery annotation; everything else on
/// the pod is left untouched.
fn annotation_patch(requested_port: i32, node_port: i32) -> serde_json::Value {
    json!({
        "metadata": {
            "annotations": {
                ports::port_annotation_key(requested_port): node_port.to_string(),
            }
        }
    })
}

/// Node port the platform assigned to a freshly created service.
fn assigned_node_port(service: &Service) -> Option<i32> {
    service
        .spec
        .as_ref()?
        .ports
        .as_ref()?
        .first()?
        .node_port
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_meta_carries_name_and_markers() {
        let meta = derived_meta("default", "my-pod", 8080);

        assert_eq!(meta.name.as_deref(), Some("my-pod-8080"));
        assert_eq!(meta.namespace.as_deref(), Some("default"));

        let labels = meta.labels.unwrap();
        assert_eq!(
            labels.get(ports::MANAGED_BY_LABEL_KEY).map(String::as_str),
            Some(ports::MANAGED_BY_LABEL_VALUE)
        );
        assert_eq!(
            labels.get(ports::FOR_POD_LABEL_KEY).map(String::as_str),
            Some("my-pod")
        );
    }

    #[test]
    fn endpoints_for_binds_pod_ip_and_port() {
        let endpoints = endpoints_for("default", "my-pod", "10.1.2.3", 8080);

        let subsets = endpoints.subsets.unwrap();
        assert_eq!(subsets.len(), 1);
        assert_eq!(subsets[0].addresses.as_ref().unwrap()[0].ip, "10.1.2.3");
        assert_eq!(subsets[0].ports.as_ref().unwrap()[0].port, 8080);
    }

    #[test]
    fn service_for_is_node_port_typed() {
        let service = service_for("default", "my-pod", 8080, None);

        let spec = service.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("NodePort"));

        let port = &spec.ports.unwrap()[0];
        assert_eq!(port.port, 8080);
        assert_eq!(port.target_port, Some(IntOrString::Int(8080)));
        assert_eq!(spec.external_ips, None);
    }

    #[test]
    fn service_for_pins_known_external_ip() {
        let service = service_for("default", "my-pod", 8080, Some("203.0.113.7"));

        assert_eq!(
            service.spec.unwrap().external_ips,
            Some(vec!["203.0.113.7".to_string()])
        );
    }

    #[test]
    fn annotation_patch_shape() {
        similar_asserts::assert_eq!(
            annotation_patch(8080, 31000),
            json!({
                "metadata": {
                    "annotations": {
                        "dynamic-hostports.k8s/8080": "31000",
                    }
                }
            })
        );
    }

    #[test]
    fn assigned_node_port_reads_first_port() {
        let mut service = service_for("default", "my-pod", 8080, None);
        service
            .spec
            .as_mut()
            .unwrap()
            .ports
            .as_mut()
            .unwrap()[0]
            .node_port = Some(31000);

        assert_eq!(assigned_node_port(&service), Some(31000));
    }

    #[test]
    fn assigned_node_port_absent_when_unset() {
        let service = service_for("default", "my-pod", 8080, None);
        assert_eq!(assigned_node_port(&service), None);
    }
}

use error_stack::Report;

use crate::k8s::types::KubernetesError;

/// Label whose presence marks a pod for host-port exposure. The value is a
/// dot-separated list of container ports, e.g. `"8080.8082"`.
pub(crate) const HOSTPORTS_LABEL_KEY: &str = "dynamic-hostports";

/// Domain prefix for the discovery annotations written back onto pods.
pub(crate) const ANNOTATION_PREFIX: &str = "dynamic-hostports.k8s";

/// Standard managed-by label carried by every derived object; the reaper
/// lists services through it.
pub(crate) const MANAGED_BY_LABEL_KEY: &str = "app.kubernetes.io/managed-by";
pub(crate) const MANAGED_BY_LABEL_VALUE: &str = ANNOTATION_PREFIX;

/// Ownership marker pointing a derived object back at the pod it was
/// created for.
pub(crate) const FOR_POD_LABEL_KEY: &str = "dynamic-hostports.k8s/for-pod";

/// Parse a marker-label value like `"8080.8082"` into the requested ports.
///
/// Order is preserved. Any token that is not a decimal number strictly
/// between 0 and 65536 rejects the whole list.
///
/// # Errors
///
/// - [`KubernetesError::InvalidPortLabel`] if any token is malformed or out
///   of range
pub(crate) fn parse_port_label(value: &str) -> Result<Vec<i32>, Report<KubernetesError>> {
    value
        .split('.')
        .map(|token| {
            let port = token.parse::<i32>().map_err(|_| {
                Report::new(KubernetesError::InvalidPortLabel {
                    value: value.to_string(),
                })
                .attach_printable(format!("'{token}' is not a decimal port number"))
            })?;
            if !(1..=65535).contains(&port) {
                return Err(Report::new(KubernetesError::InvalidPortLabel {
                    value: value.to_string(),
                })
                .attach_printable(format!("port {port} is out of range")));
            }
            Ok(port)
        })
        .collect()
}

/// Annotation key recording the assigned node port for `requested_port`.
pub(crate) fn port_annotation_key(requested_port: i32) -> String {
    format!("{ANNOTATION_PREFIX}/{requested_port}")
}

/// Deterministic name of the Service/Endpoints pair exposing one pod port.
///
/// This composition doubles as the durable index: the annotation precheck
/// and the reaper recompute it from pod state alone, so it must not change.
pub(crate) fn service_name(pod_name: &str, requested_port: i32) -> String {
    format!("{pod_name}-{requested_port}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_port_label_single_port() {
        assert_eq!(parse_port_label("8080").unwrap(), vec![8080]);
    }

    #[test]
    fn parse_port_label_preserves_order() {
        assert_eq!(
            parse_port_label("8082.80.8080").unwrap(),
            vec![8082, 80, 8080]
        );
    }

    #[test]
    fn parse_port_label_boundaries() {
        assert_eq!(parse_port_label("1.65535").unwrap(), vec![1, 65535]);
    }

    #[test]
    fn parse_port_label_rejects_non_numeric_token() {
        assert!(parse_port_label("8080.http").is_err());
    }

    #[test]
    fn parse_port_label_rejects_out_of_range() {
        assert!(parse_port_label("0").is_err());
        assert!(parse_port_label("65536").is_err());
        assert!(parse_port_label("-1").is_err());
    }

    #[test]
    fn parse_port_label_rejects_whole_list_on_one_bad_token() {
        // No partial result: the valid ports must not leak through.
        assert!(parse_port_label("8080.x.8082").is_err());
    }

    #[test]
    fn parse_port_label_rejects_empty_value() {
        assert!(parse_port_label("").is_err());
    }

    #[test]
    fn port_annotation_key_format() {
        assert_eq!(port_annotation_key(8080), "dynamic-hostports.k8s/8080");
    }

    #[test]
    fn service_name_format() {
        assert_eq!(service_name("my-pod", 8080), "my-pod-8080");
    }
}

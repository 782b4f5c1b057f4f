use thiserror::Error;

/// Pod lifecycle event kinds delivered by the watch stream.
///
/// `Added` and `Modified` are kept distinct because the wire carries them
/// that way, but the reconciler treats both as "pod may need exposure".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PodEventKind {
    Added,
    Modified,
    Deleted,
}

/// Errors that can occur during Kubernetes operations.
#[derive(Debug, Error)]
pub(crate) enum KubernetesError {
    #[error("Failed to connect to Kubernetes API: {message}")]
    ConnectionFailed { message: String },
    #[error("Failed to watch pods: {message}")]
    WatchFailed { message: String },
    #[error("Invalid host-port label value '{value}'")]
    InvalidPortLabel { value: String },
    #[error("Failed to create {kind} '{name}'")]
    CreateFailed { kind: &'static str, name: String },
    #[error("Failed to delete service '{name}'")]
    DeleteFailed { name: String },
    #[error("Failed to list {kind}")]
    ListFailed { kind: &'static str },
    #[error("Failed to annotate pod '{pod_name}' with port mapping {requested_port} => {node_port}")]
    AnnotateFailed {
        pod_name: String,
        requested_port: i32,
        node_port: i32,
    },
}

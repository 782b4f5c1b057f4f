use std::collections::HashMap;

use k8s_openapi::api::core::v1::Node;
use kube::Api;
use kube::Client;
use tracing::info;
use tracing::warn;

/// Memoizes external-address lookups per compute node.
///
/// Lookups that come back empty, because the node query failed or the node
/// reports no `ExternalIP` address, are not cached by default so an address
/// appearing later is still picked up. `cache_missing` trades that
/// responsiveness for at most one query per node.
pub(crate) struct NodeIpCache {
    client: Client,
    cache: HashMap<String, Option<String>>,
    cache_missing: bool,
}

impl NodeIpCache {
    pub(crate) fn new(client: Client, cache_missing: bool) -> Self {
        Self {
            client,
            cache: HashMap::new(),
            cache_missing,
        }
    }

    /// External address of `node_name`, from cache or a fresh node query.
    pub(crate) async fn lookup(&mut self, node_name: &str) -> Option<String> {
        if let Some(cached) = self.cache.get(node_name) {
            return cached.clone();
        }

        let nodes: Api<Node> = Api::all(self.client.clone());
        let ip = match nodes.get(node_name).await {
            Ok(node) => external_ip_of(&node),
            Err(err) => {
                warn!("Failed to fetch node '{node_name}' while resolving its external ip: {err}");
                None
            }
        };

        self.remember(node_name, &ip);
        ip
    }

    fn remember(&mut self, node_name: &str, ip: &Option<String>) {
        match ip {
            Some(addr) => {
                info!("Caching external ip of node '{node_name}' => {addr}");
                self.cache.insert(node_name.to_string(), ip.clone());
            }
            None if self.cache_missing => {
                self.cache.insert(node_name.to_string(), None);
            }
            None => {}
        }
    }
}

/// First `ExternalIP` entry among the node's reported addresses.
fn external_ip_of(node: &Node) -> Option<String> {
    node.status
        .as_ref()?
        .addresses
        .as_ref()?
        .iter()
        .find(|addr| addr.type_ == "ExternalIP")
        .map(|addr| addr.address.clone())
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::NodeAddress;
    use k8s_openapi::api::core::v1::NodeStatus;

    use super::*;

    fn test_client() -> Client {
        // Never connected to in these tests; every lookup must be answered
        // from the cache.
        Client::try_from(kube::Config::new("http://localhost:8080".parse().unwrap())).unwrap()
    }

    fn node_with_addresses(addresses: Vec<NodeAddress>) -> Node {
        Node {
            status: Some(NodeStatus {
                addresses: Some(addresses),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn external_ip_of_picks_external_entry() {
        let node = node_with_addresses(vec![
            NodeAddress {
                address: "10.0.0.5".to_string(),
                type_: "InternalIP".to_string(),
            },
            NodeAddress {
                address: "203.0.113.7".to_string(),
                type_: "ExternalIP".to_string(),
            },
        ]);
        assert_eq!(external_ip_of(&node), Some("203.0.113.7".to_string()));
    }

    #[test]
    fn external_ip_of_ignores_internal_only_nodes() {
        let node = node_with_addresses(vec![NodeAddress {
            address: "10.0.0.5".to_string(),
            type_: "InternalIP".to_string(),
        }]);
        assert_eq!(external_ip_of(&node), None);
    }

    #[test]
    fn external_ip_of_handles_missing_status() {
        assert_eq!(external_ip_of(&Node::default()), None);
    }

    #[tokio::test]
    async fn lookup_serves_cached_address_without_a_query() {
        let mut cache = NodeIpCache::new(test_client(), false);
        cache.remember("node-a", &Some("203.0.113.7".to_string()));

        assert_eq!(
            cache.lookup("node-a").await,
            Some("203.0.113.7".to_string())
        );
    }

    #[tokio::test]
    async fn negative_results_are_not_cached_by_default() {
        let mut cache = NodeIpCache::new(test_client(), false);
        cache.remember("node-a", &None);

        // Next lookup would query again.
        assert!(cache.cache.get("node-a").is_none());
    }

    #[tokio::test]
    async fn negative_results_are_cached_under_the_policy_flag() {
        let mut cache = NodeIpCache::new(test_client(), true);
        cache.remember("node-a", &None);

        assert!(cache.cache.contains_key("node-a"));
        assert_eq!(cache.lookup("node-a").await, None);
    }
}

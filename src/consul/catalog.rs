//! Catalog discovery: which instances implement a tagged service.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{ConsulClient, Result};

/// One registered instance of a logical service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceInstance {
    /// Catalog node ID.
    #[serde(rename = "ID", default)]
    pub id: String,
    /// Node address the service was registered from.
    #[serde(rename = "Address", default)]
    pub address: String,
    #[serde(rename = "ServiceAddress", default)]
    pub service_address: String,
    #[serde(rename = "ServiceID")]
    pub service_id: String,
    #[serde(rename = "ServiceName", default)]
    pub service_name: String,
    #[serde(rename = "ServicePort", default)]
    pub service_port: u16,
}

impl ServiceInstance {
    /// `host:port` to dial. An empty service address means the service
    /// listens on the node address.
    pub fn endpoint(&self) -> String {
        let host = if self.service_address.is_empty() {
            &self.address
        } else {
            &self.service_address
        };
        format!("{}:{}", host, self.service_port)
    }
}

/// Instances of every service carrying a tag, keyed by service ID.
///
/// Rebuilt on every discovery call; never updated in place.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    instances: HashMap<String, ServiceInstance>,
}

impl CatalogSnapshot {
    pub fn get(&self, service_id: &str) -> Option<&ServiceInstance> {
        self.instances.get(service_id)
    }

    pub fn instances(&self) -> impl Iterator<Item = &ServiceInstance> {
        self.instances.values()
    }

    pub fn service_ids(&self) -> impl Iterator<Item = &String> {
        self.instances.keys()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    fn insert(&mut self, instance: ServiceInstance) {
        self.instances.insert(instance.service_id.clone(), instance);
    }
}

impl FromIterator<ServiceInstance> for CatalogSnapshot {
    fn from_iter<I: IntoIterator<Item = ServiceInstance>>(iter: I) -> Self {
        let mut snapshot = CatalogSnapshot::default();
        for instance in iter {
            snapshot.insert(instance);
        }
        snapshot
    }
}

/// Read access to the coordination service's service catalog.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// All registered services with their tags.
    async fn list_services(&self) -> Result<HashMap<String, Vec<String>>>;

    /// Instance detail for one service.
    async fn list_instances(&self, service: &str) -> Result<Vec<ServiceInstance>>;
}

#[async_trait]
impl Catalog for ConsulClient {
    async fn list_services(&self) -> Result<HashMap<String, Vec<String>>> {
        let services: Option<HashMap<String, Vec<String>>> =
            self.get_json(&["v1", "catalog", "services"]).await?;
        Ok(services.unwrap_or_default())
    }

    async fn list_instances(&self, service: &str) -> Result<Vec<ServiceInstance>> {
        let instances: Option<Vec<ServiceInstance>> = self
            .get_json(&["v1", "catalog", "service", service])
            .await?;
        Ok(instances.unwrap_or_default())
    }
}

/// Collect every instance of every service tagged `required_tag`.
///
/// Failing to list services fails the call. Failing to fetch one service's
/// instances is logged and that service is skipped, so one bad entry does
/// not hide the rest of the catalog.
pub async fn discover<C>(catalog: &C, required_tag: &str) -> Result<CatalogSnapshot>
where
    C: Catalog + ?Sized,
{
    let services = catalog.list_services().await?;

    let mut matching: Vec<&String> = services
        .iter()
        .filter(|(_, tags)| tags.iter().any(|tag| tag == required_tag))
        .map(|(name, _)| name)
        .collect();
    matching.sort();

    debug!(
        tag = %required_tag,
        services = matching.len(),
        "Fetching instances for tagged services"
    );

    let lookups = matching.into_iter().map(|name| async move {
        let result = catalog.list_instances(name).await;
        (name, result)
    });

    let mut snapshot = CatalogSnapshot::default();
    for (name, result) in join_all(lookups).await {
        match result {
            Ok(instances) => {
                for instance in instances {
                    snapshot.insert(instance);
                }
            }
            Err(e) => {
                warn!(service = %name, error = %e, "Skipping service, instance lookup failed");
            }
        }
    }

    info!(tag = %required_tag, instances = snapshot.len(), "Catalog discovery complete");

    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consul::mock::MockConsul;
    use crate::consul::ConsulError;

    fn instance(service: &str, id: &str, port: u16) -> ServiceInstance {
        ServiceInstance {
            id: format!("node-{}", id),
            address: "10.0.0.1".to_string(),
            service_address: format!("{}.local", id),
            service_id: id.to_string(),
            service_name: service.to_string(),
            service_port: port,
        }
    }

    async fn echo_and_redis() -> MockConsul {
        let consul = MockConsul::new();
        consul
            .register_service("echo", &["v1"], vec![instance("echo", "echo-1", 7001)])
            .await;
        consul
            .register_service(
                "redis",
                &["v1", "cache"],
                vec![
                    instance("redis", "redis-1", 6379),
                    instance("redis", "redis-2", 6380),
                ],
            )
            .await;
        consul
    }

    #[test]
    fn test_decode_catalog_record() {
        let body = r#"[{
            "ID": "40e4a748-2192-161a-0510-9bf59fe950b5",
            "Node": "agent-one",
            "Address": "172.20.20.10",
            "ServiceAddress": "",
            "ServiceID": "redis-1",
            "ServiceName": "redis",
            "ServiceTags": ["v1"],
            "ServicePort": 8000
        }]"#;
        let instances: Vec<ServiceInstance> = serde_json::from_str(body).unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].service_id, "redis-1");
        assert_eq!(instances[0].service_port, 8000);
        assert_eq!(instances[0].endpoint(), "172.20.20.10:8000");
    }

    #[test]
    fn test_endpoint_prefers_service_address() {
        let inst = instance("echo", "echo-1", 7001);
        assert_eq!(inst.endpoint(), "echo-1.local:7001");
    }

    #[tokio::test]
    async fn test_discover_shared_tag_queries_all_services() {
        let consul = echo_and_redis().await;

        let snapshot = discover(&consul, "v1").await.unwrap();

        assert_eq!(consul.queried_services().await, vec!["echo", "redis"]);
        let mut ids: Vec<_> = snapshot.service_ids().cloned().collect();
        ids.sort();
        assert_eq!(ids, vec!["echo-1", "redis-1", "redis-2"]);
    }

    #[tokio::test]
    async fn test_discover_narrow_tag_queries_only_matching() {
        let consul = echo_and_redis().await;

        let snapshot = discover(&consul, "cache").await.unwrap();

        assert_eq!(consul.queried_services().await, vec!["redis"]);
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.instances().all(|i| i.service_name == "redis"));
    }

    #[tokio::test]
    async fn test_discover_unknown_tag_is_empty() {
        let consul = echo_and_redis().await;

        let snapshot = discover(&consul, "nope").await.unwrap();

        assert!(snapshot.is_empty());
        assert!(consul.queried_services().await.is_empty());
    }

    #[tokio::test]
    async fn test_discover_skips_failing_service() {
        let consul = echo_and_redis().await;
        consul.fail_instances_for("echo").await;

        let snapshot = discover(&consul, "v1").await.unwrap();

        assert!(snapshot.get("echo-1").is_none());
        assert!(snapshot.get("redis-1").is_some());
        assert_eq!(snapshot.len(), 2);
    }

    #[tokio::test]
    async fn test_discover_list_failure_is_fatal() {
        let consul = echo_and_redis().await;
        consul.set_fail_on_list(true).await;

        let result = discover(&consul, "v1").await;

        assert!(matches!(result, Err(ConsulError::Status { code: 500, .. })));
    }

    #[tokio::test]
    async fn test_discover_dedupes_by_service_id() {
        let consul = MockConsul::new();
        let shared = instance("echo", "echo-1", 7001);
        consul
            .register_service("echo", &["v1"], vec![shared.clone()])
            .await;
        consul
            .register_service("echo-alias", &["v1"], vec![shared])
            .await;

        let snapshot = discover(&consul, "v1").await.unwrap();

        assert_eq!(snapshot.len(), 1);
    }
}

//! Discovery sources feeding node lists into the rebalancer.

use std::collections::HashMap;

use crate::config::schema::ServiceConfig;
use crate::discovery::node::Node;
use crate::error::{GuardError, GuardResult};

/// Something that can produce the current node list for a service.
pub trait Discovery<P>: Send + Sync {
    fn lookup(&self, service: &str) -> GuardResult<Vec<Node<P>>>;
}

/// Discovery backed by the `[[services]]` section of the config file.
///
/// The payload is the dial address (`host:port`).
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    services: HashMap<String, Vec<Node<String>>>,
}

impl StaticDiscovery {
    pub fn from_config(services: &[ServiceConfig]) -> Self {
        let services = services
            .iter()
            .map(|svc| {
                let nodes = svc
                    .nodes
                    .iter()
                    .map(|cfg| {
                        let address = cfg.address();
                        let mut node = Node::new(cfg.host.clone(), cfg.port, cfg.weight, address);
                        if let Some(name) = &cfg.name {
                            node = node.with_name(name.clone());
                        }
                        if cfg.offline {
                            node = node.offline();
                        }
                        if let Some(spec) = &cfg.health_check {
                            node = node.with_health_check(spec.clone());
                        }
                        node
                    })
                    .collect();
                (svc.name.clone(), nodes)
            })
            .collect();
        Self { services }
    }

    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Discovery<String> for StaticDiscovery {
    fn lookup(&self, service: &str) -> GuardResult<Vec<Node<String>>> {
        self.services
            .get(service)
            .cloned()
            .ok_or_else(|| GuardError::Lookup {
                service: service.to_string(),
                reason: "service not configured".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::NodeConfig;

    #[test]
    fn test_static_lookup() {
        let discovery = StaticDiscovery::from_config(&[ServiceConfig {
            name: "orders".into(),
            nodes: vec![NodeConfig {
                name: Some("orders-a".into()),
                host: "10.0.0.7".into(),
                port: 9000,
                weight: 3,
                offline: true,
                health_check: None,
            }],
        }]);

        let nodes = discovery.lookup("orders").unwrap();
        assert_eq!(nodes[0].payload, "10.0.0.7:9000");
        assert_eq!(nodes[0].name, "orders-a");
        assert!(nodes[0].is_offline);

        let err = discovery.lookup("billing").unwrap_err();
        assert!(matches!(err, GuardError::Lookup { .. }));
    }
}

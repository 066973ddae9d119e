//! Reverse-proxy routing labels.
//!
//! Tenant containers are discovered by Traefik through container labels: a
//! router matching `Host(<subdomain>.<base_domain>)` and a service pointing
//! at the container's port on the shared network.

use std::collections::BTreeMap;

/// Label carrying the owning project id.
pub const LABEL_PROJECT: &str = "hostgrid.project";

/// Label carrying the deployment id the container was created for.
pub const LABEL_DEPLOYMENT: &str = "hostgrid.deployment";

/// Routing labels for one container, ordered by key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteLabels(BTreeMap<String, String>);

impl RouteLabels {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn into_inner(self) -> BTreeMap<String, String> {
        self.0
    }
}

/// Public host name of a tenant.
pub fn host(subdomain: &str, base_domain: &str) -> String {
    format!("{subdomain}.{base_domain}")
}

pub fn route_labels(subdomain: &str, base_domain: &str, port: u16) -> RouteLabels {
    let mut labels = BTreeMap::new();
    labels.insert("traefik.enable".to_string(), "true".to_string());
    labels.insert(
        format!("traefik.http.routers.{subdomain}.rule"),
        format!("Host(`{}`)", host(subdomain, base_domain)),
    );
    labels.insert(
        format!("traefik.http.services.{subdomain}.loadbalancer.server.port"),
        port.to_string(),
    );
    RouteLabels(labels)
}

/// Full label set for a tenant container: routing plus ownership.
pub fn container_labels(
    routes: RouteLabels,
    project_id: &str,
    deployment_id: &str,
) -> BTreeMap<String, String> {
    let mut labels = routes.into_inner();
    labels.insert(LABEL_PROJECT.to_string(), project_id.to_string());
    labels.insert(LABEL_DEPLOYMENT.to_string(), deployment_id.to_string());
    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blog_on_example_com() {
        let labels = route_labels("blog", "example.com", 3000);

        assert_eq!(labels.len(), 3);
        assert_eq!(labels.get("traefik.enable"), Some("true"));
        assert_eq!(
            labels.get("traefik.http.routers.blog.rule"),
            Some("Host(`blog.example.com`)")
        );
        assert_eq!(
            labels.get("traefik.http.services.blog.loadbalancer.server.port"),
            Some("3000")
        );
    }

    #[test]
    fn ownership_labels_extend_routes() {
        let labels = container_labels(route_labels("shop", "localhost", 80), "p1", "d1");
        assert_eq!(labels.len(), 5);
        assert_eq!(labels[LABEL_PROJECT], "p1");
        assert_eq!(labels[LABEL_DEPLOYMENT], "d1");
        assert_eq!(labels["traefik.http.routers.shop.rule"], "Host(`shop.localhost`)");
    }
}

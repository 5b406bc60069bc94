//! Service registry adapter (C5) — §4's data flow step "driver calls C5",
//! and §6's `ListServices`/front-end table contracts.
//!
//! Snapshot-reads services (name + upstream URLs) and front-ends
//! (domain -> service, plus certificate material) from external systems.
//! The abstract interface is opaque per §6; the bundled adapters document
//! the two backend-specific filters the original orchestrator-backed
//! system applied before handing back that opaque list (see
//! [`service_port_from_label`] and [`is_server_container`]).

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use certgate_core::domain::{Frontend, Service};
use tokio::sync::RwLock;

use crate::error::{RegistryError, Result};

/// `ListServices() -> [...]` / front-end table snapshot reads.
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    async fn list_services(&self) -> Result<Vec<Service>>;
    async fn list_frontends(&self) -> Result<Vec<Frontend>>;
}

/// In-process registry for tests and single-binary deployments: services
/// and front-ends are set directly by the caller (standing in for an
/// orchestrator API and a front-end table).
#[derive(Default)]
pub struct InMemoryServiceRegistry {
    services: RwLock<Vec<Service>>,
    frontends: RwLock<Vec<Frontend>>,
}

impl InMemoryServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_services(&self, services: Vec<Service>) {
        *self.services.write().await = services;
    }

    pub async fn set_frontends(&self, frontends: Vec<Frontend>) {
        *self.frontends.write().await = frontends;
    }
}

#[async_trait]
impl ServiceRegistry for InMemoryServiceRegistry {
    async fn list_services(&self) -> Result<Vec<Service>> {
        Ok(self.services.read().await.clone())
    }

    async fn list_frontends(&self) -> Result<Vec<Frontend>> {
        Ok(self.frontends.read().await.clone())
    }
}

/// File-backed registry: reads two JSON documents (`services.json`,
/// `frontends.json`) fresh on every call, so external edits to either file
/// are picked up on the next poll without restarting the process.
pub struct FileServiceRegistry {
    services_path: PathBuf,
    frontends_path: PathBuf,
}

impl FileServiceRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            services_path: dir.join("services.json"),
            frontends_path: dir.join("frontends.json"),
        }
    }

    async fn read_json<T: serde::de::DeserializeOwned + Default>(path: &PathBuf) -> Result<T> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| RegistryError::Parse(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
            Err(e) => Err(RegistryError::SourceUnavailable(e.to_string())),
        }
    }
}

#[async_trait]
impl ServiceRegistry for FileServiceRegistry {
    async fn list_services(&self) -> Result<Vec<Service>> {
        Self::read_json(&self.services_path).await
    }

    async fn list_frontends(&self) -> Result<Vec<Frontend>> {
        Self::read_json(&self.frontends_path).await
    }
}

/// Validates a batch of front-ends for the all-or-nothing publication rule
/// (§4.4/§7): no domain may appear twice in the same update.
pub fn check_no_duplicate_domains(frontends: &[Frontend]) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for frontend in frontends {
        if !seen.insert(&frontend.domain_name) {
            return Err(RegistryError::DuplicateDomain(frontend.domain_name.clone()));
        }
    }
    Ok(())
}

/// The docker label an orchestrator-backed adapter reads a service's port
/// from, defaulting to 8080 when absent — documented behavior of a
/// container-orchestrator adapter, not part of the abstract interface.
pub const SERVICE_PORT_LABEL: &str = "com.example.proxy.port";

/// Only a container with this name is considered a service's entrypoint.
pub const SERVER_CONTAINER_NAME: &str = "server";

/// Reads the declared port from `labels`, defaulting to 8080 when the
/// label is absent or unparsable.
pub fn service_port_from_label(labels: &HashMap<String, String>) -> u16 {
    labels
        .get(SERVICE_PORT_LABEL)
        .and_then(|v| v.parse().ok())
        .unwrap_or(8080)
}

/// True when `container_name` is the one container in a task definition
/// that an orchestrator-backed adapter treats as the service entrypoint.
pub fn is_server_container(container_name: &str) -> bool {
    container_name == SERVER_CONTAINER_NAME
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_registry_roundtrips() {
        let registry = InMemoryServiceRegistry::new();
        registry
            .set_services(vec![Service {
                name: "svc1".into(),
                servers: vec!["http://backend:8080".into()],
            }])
            .await;
        let services = registry.list_services().await.unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].name, "svc1");
    }

    #[test]
    fn duplicate_domain_rejected() {
        let frontends = vec![
            Frontend {
                domain_name: "a.example.com".into(),
                service_name: "svc1".into(),
                certificate: String::new(),
                private_key: String::new(),
                certificate_expires_at: 0,
            },
            Frontend {
                domain_name: "a.example.com".into(),
                service_name: "svc2".into(),
                certificate: String::new(),
                private_key: String::new(),
                certificate_expires_at: 0,
            },
        ];
        assert!(matches!(
            check_no_duplicate_domains(&frontends),
            Err(RegistryError::DuplicateDomain(_))
        ));
    }

    #[test]
    fn service_port_label_defaults_to_8080() {
        let labels = HashMap::new();
        assert_eq!(service_port_from_label(&labels), 8080);

        let mut labels = HashMap::new();
        labels.insert(SERVICE_PORT_LABEL.to_string(), "9090".to_string());
        assert_eq!(service_port_from_label(&labels), 9090);
    }

    #[tokio::test]
    async fn file_registry_missing_files_yield_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = FileServiceRegistry::new(dir.path());
        assert!(registry.list_services().await.unwrap().is_empty());
        assert!(registry.list_frontends().await.unwrap().is_empty());
    }
}

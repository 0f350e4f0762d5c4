// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Backend registry.
//!
//! Maps each [`BackendType`] to a factory registered at startup, and turns the
//! backend configs stored for a project into live [`Compute`] handles.

use hangar_core::models::{BackendConfig, BackendType};
use hangar_core::persistence::Persistence;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

use super::traits::{BackendError, Compute};
use crate::error::Result;

/// Builds a backend client from a stored config.
pub trait BackendFactory: Send + Sync {
    /// Create a client for `config`.
    fn create(&self, config: &BackendConfig) -> std::result::Result<Arc<dyn Compute>, BackendError>;
}

impl<F> BackendFactory for F
where
    F: Fn(&BackendConfig) -> std::result::Result<Arc<dyn Compute>, BackendError> + Send + Sync,
{
    fn create(&self, config: &BackendConfig) -> std::result::Result<Arc<dyn Compute>, BackendError> {
        self(config)
    }
}

/// A cached client and the hash of the config it was built from.
struct CachedClient {
    config_hash: String,
    client: Arc<dyn Compute>,
}

/// Static table of backend factories plus a client cache.
///
/// The cache holds one client per project and backend type.
#[derive(Default)]
pub struct BackendRegistry {
    factories: HashMap<BackendType, Arc<dyn BackendFactory>>,
    clients: Mutex<HashMap<(String, BackendType), CachedClient>>,
}

impl BackendRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the factory for a backend type, replacing any previous one.
    pub fn register(&mut self, backend_type: BackendType, factory: Arc<dyn BackendFactory>) {
        self.factories.insert(backend_type, factory);
    }

    /// Register a single shared client for a backend type, ignoring stored config.
    pub fn register_instance(&mut self, compute: Arc<dyn Compute>) {
        let backend_type = compute.backend_type();
        self.register(
            backend_type,
            Arc::new(move |_: &BackendConfig| {
                Ok::<_, BackendError>(compute.clone())
            }),
        );
    }

    /// Whether a factory exists for `backend_type`.
    pub fn is_registered(&self, backend_type: BackendType) -> bool {
        self.factories.contains_key(&backend_type)
    }

    /// Backend types with a registered factory.
    pub fn registered_types(&self) -> Vec<BackendType> {
        let mut types: Vec<_> = self.factories.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }

    /// Client for one stored backend config.
    ///
    /// A client is reused while the project's config hash is unchanged. A
    /// changed config replaces the cached client. Returns `Ok(None)` for
    /// unregistered types.
    pub fn backend_for(
        &self,
        config: &BackendConfig,
    ) -> std::result::Result<Option<Arc<dyn Compute>>, BackendError> {
        let Some(factory) = self.factories.get(&config.backend_type) else {
            return Ok(None);
        };

        let key = (config.project_name.clone(), config.backend_type);
        let hash = config_hash(&config.config);
        if let Some(cached) = self
            .clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .filter(|cached| cached.config_hash == hash)
        {
            return Ok(Some(cached.client.clone()));
        }

        let client = factory.create(config)?;
        debug!(
            project = %config.project_name,
            backend = %config.backend_type,
            "Created backend client"
        );
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key,
                CachedClient {
                    config_hash: hash,
                    client: client.clone(),
                },
            );
        Ok(Some(client))
    }

    /// Number of cached clients.
    pub fn cached_clients(&self) -> usize {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Clients for every usable backend configured for a project.
    ///
    /// Unknown backend types and backends whose client cannot be built are
    /// logged and skipped.
    pub async fn project_backends(
        &self,
        persistence: &dyn Persistence,
        project_name: &str,
    ) -> Result<Vec<Arc<dyn Compute>>> {
        let configs = persistence.list_project_backends(project_name).await?;
        let mut backends = Vec::with_capacity(configs.len());
        for config in &configs {
            match self.backend_for(config) {
                Ok(Some(client)) => backends.push(client),
                Ok(None) => {
                    warn!(
                        project = %project_name,
                        backend = %config.backend_type,
                        "Backend type is not available in this build, skipping"
                    );
                }
                Err(e) => {
                    warn!(
                        project = %project_name,
                        backend = %config.backend_type,
                        error = %e,
                        "Failed to configure backend, skipping"
                    );
                }
            }
        }
        Ok(backends)
    }

    /// Client for one backend type of a project, if configured and usable.
    pub async fn get_backend(
        &self,
        persistence: &dyn Persistence,
        project_name: &str,
        backend_type: BackendType,
    ) -> Result<Option<Arc<dyn Compute>>> {
        let configs = persistence.list_project_backends(project_name).await?;
        let Some(config) = configs.iter().find(|c| c.backend_type == backend_type) else {
            return Ok(None);
        };
        Ok(self.backend_for(config)?)
    }
}

fn config_hash(config: &serde_json::Value) -> String {
    let digest = Sha256::digest(config.to_string().as_bytes());
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MockCompute;
    use hangar_core::MemoryPersistence;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(backend_type: BackendType, config: serde_json::Value) -> BackendConfig {
        BackendConfig {
            project_name: "main".to_string(),
            backend_type,
            config,
        }
    }

    #[test]
    fn test_clients_are_cached_by_config() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = created.clone();
        let mut registry = BackendRegistry::new();
        registry.register(
            BackendType::Aws,
            Arc::new(move |_: &BackendConfig| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BackendError>(Arc::new(MockCompute::new(BackendType::Aws)) as Arc<dyn Compute>)
            }),
        );

        let a = config(BackendType::Aws, serde_json::json!({ "region": "us-east-1" }));
        let b = config(BackendType::Aws, serde_json::json!({ "region": "eu-west-1" }));
        registry.backend_for(&a).unwrap().unwrap();
        registry.backend_for(&a).unwrap().unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 1);

        registry.backend_for(&b).unwrap().unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_config_change_replaces_cached_client() {
        let mut registry = BackendRegistry::new();
        registry.register(
            BackendType::Aws,
            Arc::new(|_: &BackendConfig| {
                Ok::<_, BackendError>(Arc::new(MockCompute::new(BackendType::Aws)) as Arc<dyn Compute>)
            }),
        );

        for region in ["us-east-1", "eu-west-1", "ap-south-1", "us-east-1"] {
            let first = registry
                .backend_for(&config(BackendType::Aws, serde_json::json!({ "region": region })))
                .unwrap()
                .unwrap();
            let again = registry
                .backend_for(&config(BackendType::Aws, serde_json::json!({ "region": region })))
                .unwrap()
                .unwrap();
            assert!(Arc::ptr_eq(&first, &again));
            assert_eq!(registry.cached_clients(), 1);
        }

        let mut other = config(BackendType::Aws, serde_json::json!({}));
        other.project_name = "research".to_string();
        registry.backend_for(&other).unwrap().unwrap();
        assert_eq!(registry.cached_clients(), 2);
    }

    #[test]
    fn test_unregistered_type() {
        let registry = BackendRegistry::new();
        let result = registry
            .backend_for(&config(BackendType::Vultr, serde_json::Value::Null))
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_project_backends_skips_broken_and_unknown() {
        let persistence = MemoryPersistence::new();
        for backend_type in [BackendType::Aws, BackendType::Gcp, BackendType::Azure] {
            persistence
                .set_project_backend(&config(backend_type, serde_json::json!({})))
                .await
                .unwrap();
        }

        let mut registry = BackendRegistry::new();
        registry.register_instance(Arc::new(MockCompute::new(BackendType::Aws)));
        registry.register(
            BackendType::Gcp,
            Arc::new(|_: &BackendConfig| -> std::result::Result<Arc<dyn Compute>, BackendError> {
                Err(BackendError::InvalidCredentials("missing key".to_string()))
            }),
        );

        let backends = registry
            .project_backends(&persistence, "main")
            .await
            .unwrap();
        assert_eq!(backends.len(), 1);
        assert_eq!(backends[0].backend_type(), BackendType::Aws);

        let gcp = registry
            .get_backend(&persistence, "main", BackendType::Gcp)
            .await;
        assert!(gcp.is_err());
        let lambda = registry
            .get_backend(&persistence, "main", BackendType::Lambda)
            .await
            .unwrap();
        assert!(lambda.is_none());
    }
}

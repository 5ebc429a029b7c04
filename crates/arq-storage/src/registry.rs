// SPDX-License-Identifier: MIT OR Apache-2.0
//! Named backend factories.
//!
//! Engines register an async factory under a name; `create_backend` is the
//! only constructor call sites use. In strict mode a backend whose
//! prerequisites are missing refuses to come up; in degraded mode the
//! registry substitutes the no-op backend and the bus keeps serving.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::warn;

use crate::{MemoryStorageBackend, NoopStorageBackend, StorageBackend, StorageError};

/// How hard storage failures should hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageMode {
    /// Creation and append errors are fatal to the operation.
    Strict,
    /// Unavailable engines degrade to the no-op backend.
    #[default]
    Degraded,
}

impl StorageMode {
    /// Parse the `ARQONBUS_STORAGE_MODE` value.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "strict" => Some(Self::Strict),
            "degraded" => Some(Self::Degraded),
            _ => None,
        }
    }
}

/// Settings handed to backend factories.
#[derive(Debug, Clone, Default)]
pub struct StorageConfig {
    /// Failure posture.
    pub mode: StorageMode,
    /// Memory backend retention cap.
    pub max_size: usize,
    /// Postgres connection string, when configured.
    pub postgres_url: Option<String>,
    /// Valkey/Redis connection string, when configured.
    pub valkey_url: Option<String>,
}

type FactoryFuture = Pin<Box<dyn Future<Output = Result<Arc<dyn StorageBackend>, StorageError>> + Send>>;
type Factory = Arc<dyn Fn(StorageConfig) -> FactoryFuture + Send + Sync>;

/// Name → async factory table.
#[derive(Clone, Default)]
pub struct StorageRegistry {
    factories: HashMap<String, Factory>,
}

impl StorageRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in engines (`memory`, `valkey`, `postgres`).
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        registry.register("memory", |config| {
            Box::pin(async move {
                let max = if config.max_size == 0 { 10_000 } else { config.max_size };
                Ok(Arc::new(MemoryStorageBackend::new(max)) as Arc<dyn StorageBackend>)
            })
        });

        registry.register("valkey", |config| {
            Box::pin(async move {
                match config.valkey_url {
                    Some(url) if !url.is_empty() => Err(StorageError::Unavailable(format!(
                        "valkey adapter is not linked in this build (url {url} ignored)"
                    ))),
                    _ => Err(StorageError::Unavailable(
                        "valkey backend requires ARQONBUS_VALKEY_URL".to_string(),
                    )),
                }
            })
        });

        registry.register("postgres", |config| {
            Box::pin(async move {
                match config.postgres_url {
                    Some(url) if !url.is_empty() => Err(StorageError::Unavailable(format!(
                        "postgres adapter is not linked in this build (url {url} ignored)"
                    ))),
                    _ => Err(StorageError::Unavailable(
                        "postgres backend requires ARQONBUS_POSTGRES_URL".to_string(),
                    )),
                }
            })
        });

        registry
    }

    /// Register (or replace) a factory under `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(StorageConfig) -> FactoryFuture + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Registered engine names.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Create a backend by name, honoring the configured mode.
    ///
    /// # Errors
    ///
    /// In strict mode, an unknown name or failing factory is an error. In
    /// degraded mode both fall back to [`NoopStorageBackend`].
    pub async fn create_backend(
        &self,
        name: &str,
        config: StorageConfig,
    ) -> Result<Arc<dyn StorageBackend>, StorageError> {
        let mode = config.mode;
        let result = match self.factories.get(name) {
            Some(factory) => factory(config).await,
            None => Err(StorageError::UnknownBackend(name.to_string())),
        };

        match result {
            Ok(backend) => Ok(backend),
            Err(err) => match mode {
                StorageMode::Strict => Err(err),
                StorageMode::Degraded => {
                    warn!(backend = name, error = %err, "storage degraded to no-op backend");
                    Ok(Arc::new(NoopStorageBackend))
                }
            },
        }
    }
}

impl std::fmt::Debug for StorageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageRegistry")
            .field("backends", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn factory_is_preferred_constructor() {
        let mut registry = StorageRegistry::new();
        registry.register("factory_backend_test", |config| {
            Box::pin(async move {
                let max = config.max_size;
                Ok(Arc::new(MemoryStorageBackend::new(max)) as Arc<dyn StorageBackend>)
            })
        });

        let backend = registry
            .create_backend(
                "factory_backend_test",
                StorageConfig { max_size: 7, ..StorageConfig::default() },
            )
            .await
            .unwrap();
        let stats = backend.get_stats().await;
        assert_eq!(stats.get("max_size"), Some(&serde_json::json!(7)));
    }

    #[tokio::test]
    async fn strict_mode_fails_without_prerequisites() {
        let registry = StorageRegistry::with_builtins();
        let err = registry
            .create_backend(
                "postgres",
                StorageConfig { mode: StorageMode::Strict, ..StorageConfig::default() },
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ARQONBUS_POSTGRES_URL"));
    }

    #[tokio::test]
    async fn degraded_mode_falls_back_to_noop() {
        let registry = StorageRegistry::with_builtins();
        let backend = registry
            .create_backend(
                "valkey",
                StorageConfig { mode: StorageMode::Degraded, ..StorageConfig::default() },
            )
            .await
            .unwrap();
        assert!(!backend.health_check().await);
    }

    #[tokio::test]
    async fn unknown_backend_is_strict_error() {
        let registry = StorageRegistry::with_builtins();
        let err = registry
            .create_backend(
                "etched-stone",
                StorageConfig { mode: StorageMode::Strict, ..StorageConfig::default() },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::UnknownBackend(_)));
    }
}

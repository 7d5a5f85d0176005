use sqlx::PgPool;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

use super::config::ConnectionConfig;
use super::pool::{BorrowedConnection, ConnectionPool, PoolStats};
use crate::error::AppError;

struct DbState {
    connection: Option<BorrowedConnection>,
    last_accessed: Instant,
    active: bool,
}

/// Registration-level metadata for one logical database.
pub struct DatabaseInfo {
    name: String,
    config: ConnectionConfig,
    state: Mutex<DbState>,
}

/// Multi-database registry over the shared connection pool.
///
/// Each registered name owns at most one borrowed connection at a time;
/// the handle is revalidated on reuse and transparently re-borrowed when
/// dead. Closing a database keeps its registration.
pub struct DatabaseRegistry {
    databases: RwLock<HashMap<String, Arc<DatabaseInfo>>>,
    pool: Arc<ConnectionPool>,
}

impl DatabaseRegistry {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self {
            databases: RwLock::new(HashMap::new()),
            pool,
        }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Register a database. A name may be registered at most once.
    pub async fn register(&self, name: &str, config: ConnectionConfig) -> Result<(), AppError> {
        let mut databases = self.databases.write().await;
        if databases.contains_key(name) {
            return Err(AppError::Validation(format!(
                "database '{}' is already registered",
                name
            )));
        }

        databases.insert(
            name.to_string(),
            Arc::new(DatabaseInfo {
                name: name.to_string(),
                config,
                state: Mutex::new(DbState {
                    connection: None,
                    last_accessed: Instant::now(),
                    active: false,
                }),
            }),
        );
        Ok(())
    }

    async fn info(&self, name: &str) -> Result<Arc<DatabaseInfo>, AppError> {
        self.databases
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Database '{}'", name)))
    }

    /// Get a live handle for the named database, reusing the current
    /// connection when it still responds to a ping.
    pub async fn connection(&self, name: &str) -> Result<PgPool, AppError> {
        let info = self.info(name).await?;
        let mut state = info.state.lock().await;

        if state.active {
            let probed = if let Some(connection) = &state.connection {
                if self.pool.probe(connection.pool()).await {
                    Some(connection.pool().clone())
                } else {
                    None
                }
            } else {
                None
            };
            if let Some(handle) = probed {
                state.last_accessed = Instant::now();
                return Ok(handle);
            }
            // Dead handle: release it and fall through to a fresh borrow.
            state.connection = None;
            state.active = false;
        }

        let borrowed = self.pool.borrow(&info.config).await?;
        let handle = borrowed.pool().clone();
        state.connection = Some(borrowed);
        state.active = true;
        state.last_accessed = Instant::now();
        Ok(handle)
    }

    /// Drop the active handle but keep the registration.
    pub async fn close_database(&self, name: &str) -> Result<(), AppError> {
        let info = self.info(name).await?;
        let mut state = info.state.lock().await;
        state.connection = None;
        state.active = false;
        Ok(())
    }

    /// Close then forget a database.
    pub async fn unregister(&self, name: &str) -> Result<(), AppError> {
        self.close_database(name).await?;
        self.databases.write().await.remove(name);
        Ok(())
    }

    /// Close handles idle longer than `max_idle`.
    pub async fn cleanup_inactive(&self, max_idle: Duration) {
        let infos: Vec<Arc<DatabaseInfo>> = self.databases.read().await.values().cloned().collect();
        for info in infos {
            let mut state = info.state.lock().await;
            if state.active && state.last_accessed.elapsed() >= max_idle {
                state.connection = None;
                state.active = false;
            }
        }
    }

    /// Ping every registered database; `None` means healthy.
    pub async fn health_check(&self) -> HashMap<String, Option<String>> {
        let names = self.databases().await;
        let mut results = HashMap::new();
        for name in names {
            let outcome = match self.connection(&name).await {
                Ok(handle) => {
                    if self.pool.probe(&handle).await {
                        None
                    } else {
                        Some("ping failed".to_string())
                    }
                }
                Err(err) => Some(err.to_string()),
            };
            results.insert(name, outcome);
        }
        results
    }

    pub async fn databases(&self) -> Vec<String> {
        let mut names: Vec<String> = self.databases.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn stats(&self) -> RegistryStats {
        let databases = self.databases.read().await;
        let mut stats = RegistryStats {
            total: databases.len(),
            ..RegistryStats::default()
        };
        for info in databases.values() {
            if info.state.lock().await.active {
                stats.active += 1;
            } else {
                stats.inactive += 1;
            }
        }
        stats.pool = self.pool.stats().await;
        stats
    }
}

impl fmt::Debug for DatabaseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseInfo")
            .field("name", &self.name)
            .field("config", &self.config.key())
            .finish()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RegistryStats {
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
    pub pool: PoolStats,
}

impl fmt::Display for RegistryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DatabaseRegistry(total={}/active={}/inactive={}) {}",
            self.total, self.active, self.inactive, self.pool
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn test_registry(alive: Arc<AtomicBool>) -> DatabaseRegistry {
        let probe = Arc::new(move |_pool: PgPool| -> BoxFuture<'static, bool> {
            let alive = alive.clone();
            Box::pin(async move { alive.load(Ordering::SeqCst) })
        });
        DatabaseRegistry::new(Arc::new(ConnectionPool::with_probe(8, probe)))
    }

    fn config_for(db: &str) -> ConnectionConfig {
        ConnectionConfig {
            database: db.to_string(),
            ..ConnectionConfig::default()
        }
    }

    #[tokio::test]
    async fn test_duplicate_registration_fails() {
        let registry = test_registry(Arc::new(AtomicBool::new(true)));
        registry.register("tenant1", config_for("tenant1")).await.unwrap();

        let again = registry.register("tenant1", config_for("tenant1")).await;
        assert!(matches!(again, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_connection_reuses_active_handle() {
        let registry = test_registry(Arc::new(AtomicBool::new(true)));
        registry.register("tenant1", config_for("tenant1")).await.unwrap();

        registry.connection("tenant1").await.unwrap();
        registry.connection("tenant1").await.unwrap();

        // Second call reused the live handle; the pool holds a single entry.
        let stats = registry.stats().await;
        assert_eq!(stats.active, 1);
        assert_eq!(stats.pool.total, 1);
    }

    #[tokio::test]
    async fn test_unknown_database_is_not_found() {
        let registry = test_registry(Arc::new(AtomicBool::new(true)));
        let result = registry.connection("missing").await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_close_database_preserves_registration() {
        let registry = test_registry(Arc::new(AtomicBool::new(true)));
        registry.register("tenant1", config_for("tenant1")).await.unwrap();
        registry.connection("tenant1").await.unwrap();

        registry.close_database("tenant1").await.unwrap();
        assert_eq!(registry.stats().await.active, 0);
        assert_eq!(registry.databases().await, vec!["tenant1".to_string()]);

        // Still usable: a fresh borrow replaces the dropped handle.
        registry.connection("tenant1").await.unwrap();
        assert_eq!(registry.stats().await.active, 1);
    }

    #[tokio::test]
    async fn test_unregister_forgets_database() {
        let registry = test_registry(Arc::new(AtomicBool::new(true)));
        registry.register("tenant1", config_for("tenant1")).await.unwrap();

        registry.unregister("tenant1").await.unwrap();
        assert!(registry.databases().await.is_empty());
        assert!(matches!(
            registry.connection("tenant1").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cleanup_inactive_closes_idle_handles() {
        let registry = test_registry(Arc::new(AtomicBool::new(true)));
        registry.register("tenant1", config_for("tenant1")).await.unwrap();
        registry.connection("tenant1").await.unwrap();

        registry.cleanup_inactive(Duration::from_secs(0)).await;
        assert_eq!(registry.stats().await.active, 0);
    }

    #[tokio::test]
    async fn test_health_check_reports_per_database() {
        let alive = Arc::new(AtomicBool::new(true));
        let registry = test_registry(alive.clone());
        registry.register("up", config_for("up")).await.unwrap();

        let report = registry.health_check().await;
        assert_eq!(report.get("up"), Some(&None));

        alive.store(false, Ordering::SeqCst);
        let report = registry.health_check().await;
        assert!(report.get("up").unwrap().is_some());
    }
}

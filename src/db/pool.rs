use futures::future::BoxFuture;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Connection, PgPool};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::config::ConnectionConfig;
use crate::error::AppError;

/// Idle entries older than this are evicted when the pool is at capacity.
const IDLE_EVICT_AFTER: Duration = Duration::from_secs(30 * 60);

/// Deadline for the liveness probe on reuse.
const PING_DEADLINE: Duration = Duration::from_secs(5);

type ProbeFn = Arc<dyn Fn(PgPool) -> BoxFuture<'static, bool> + Send + Sync>;

#[derive(Debug)]
struct EntryState {
    busy: bool,
    last_used: Instant,
}

/// One pooled database handle plus its borrow state.
pub struct PoolEntry {
    pool: PgPool,
    config: ConnectionConfig,
    state: StdMutex<EntryState>,
}

/// Borrowed handle. The entry's busy flag guarantees single-take: no other
/// borrow observes this handle until the guard is released. Dropping the
/// guard returns the entry to the pool; `close()` does so explicitly.
pub struct BorrowedConnection {
    entry: Arc<PoolEntry>,
}

impl BorrowedConnection {
    pub fn pool(&self) -> &PgPool {
        &self.entry.pool
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.entry.config
    }

    /// Return the connection to the pool.
    pub fn close(self) {}

    #[cfg(test)]
    pub(crate) fn entry(&self) -> &Arc<PoolEntry> {
        &self.entry
    }
}

impl Drop for BorrowedConnection {
    fn drop(&mut self) {
        let mut state = self.entry.state.lock().expect("pool entry poisoned");
        state.busy = false;
        state.last_used = Instant::now();
    }
}

/// Multi-tenant connection pool keyed by configuration.
///
/// Holds at most `max_entries` live handles; exhaustion sweeps idle entries
/// before failing with [`AppError::PoolExhausted`]. Reused entries are
/// probed for liveness and silently evicted (then reopened) on failure.
pub struct ConnectionPool {
    entries: Mutex<HashMap<String, Arc<PoolEntry>>>,
    max_entries: usize,
    probe_fn: ProbeFn,
}

impl ConnectionPool {
    pub fn new(max_entries: usize) -> Self {
        let max_entries = if max_entries == 0 { 64 } else { max_entries };
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries,
            probe_fn: default_probe(),
        }
    }

    /// Pool with an injected liveness probe. Lets callers exercise reuse and
    /// eviction without a live server.
    pub(crate) fn with_probe(max_entries: usize, probe_fn: ProbeFn) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries,
            probe_fn,
        }
    }

    /// Borrow a handle for the given configuration.
    ///
    /// Reuses an idle entry under the same key when the liveness probe
    /// passes; a failed probe evicts the entry and reopens. At capacity,
    /// idle entries older than thirty minutes are swept first.
    pub async fn borrow(&self, config: &ConnectionConfig) -> Result<BorrowedConnection, AppError> {
        config
            .validate()
            .map_err(|err| AppError::Validation(err.to_string()))?;

        let key = config.key();
        let mut entries = self.entries.lock().await;

        if let Some(entry) = entries.get(&key).cloned() {
            let taken = {
                let mut state = entry.state.lock().expect("pool entry poisoned");
                if state.busy {
                    false
                } else {
                    state.busy = true;
                    true
                }
            };

            if taken {
                if (self.probe_fn)(entry.pool.clone()).await {
                    entry.state.lock().expect("pool entry poisoned").last_used = Instant::now();
                    return Ok(BorrowedConnection { entry });
                }
                // Dead on reuse: evict and fall through to creation.
                entries.remove(&key);
            }
        }

        if entries.len() >= self.max_entries {
            sweep_idle(&mut entries, IDLE_EVICT_AFTER);
            if entries.len() >= self.max_entries {
                return Err(AppError::PoolExhausted(format!(
                    "max {} connections",
                    self.max_entries
                )));
            }
        }

        let options = config
            .to_pg_options()
            .map_err(|err| AppError::Validation(err.to_string()))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_open)
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(3600))
            .acquire_timeout(Duration::from_secs(30))
            .connect_lazy_with(options);

        let entry = Arc::new(PoolEntry {
            pool,
            config: config.clone(),
            state: StdMutex::new(EntryState {
                busy: true,
                last_used: Instant::now(),
            }),
        });
        entries.insert(key, entry.clone());

        Ok(BorrowedConnection { entry })
    }

    /// Borrow, bounded by a caller-supplied deadline.
    pub async fn borrow_with_deadline(
        &self,
        config: &ConnectionConfig,
        deadline: Duration,
    ) -> Result<BorrowedConnection, AppError> {
        match tokio::time::timeout(deadline, self.borrow(config)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::StorageUnavailable(
                "connection borrow deadline exceeded".to_string(),
            )),
        }
    }

    /// Run the liveness probe against a handle.
    pub(crate) async fn probe(&self, pool: &PgPool) -> bool {
        (self.probe_fn)(pool.clone()).await
    }

    /// Destroy the entry for one configuration key.
    pub async fn close_all(&self, config: &ConnectionConfig) {
        self.entries.lock().await.remove(&config.key());
    }

    /// Destroy every entry.
    pub async fn close_all_connections(&self) {
        self.entries.lock().await.clear();
    }

    pub async fn stats(&self) -> PoolStats {
        let entries = self.entries.lock().await;
        let mut stats = PoolStats {
            total: entries.len(),
            max: self.max_entries,
            ..PoolStats::default()
        };
        for entry in entries.values() {
            let state = entry.state.lock().expect("pool entry poisoned");
            if state.busy {
                stats.used += 1;
            } else {
                stats.idle += 1;
            }
        }
        stats
    }

    #[cfg(test)]
    async fn backdate_entry(&self, key: &str, age: Duration) {
        let entries = self.entries.lock().await;
        if let Some(entry) = entries.get(key) {
            entry.state.lock().unwrap().last_used = Instant::now() - age;
        }
    }
}

fn sweep_idle(entries: &mut HashMap<String, Arc<PoolEntry>>, threshold: Duration) {
    entries.retain(|_, entry| {
        let state = entry.state.lock().expect("pool entry poisoned");
        state.busy || state.last_used.elapsed() < threshold
    });
}

fn default_probe() -> ProbeFn {
    Arc::new(|pool: PgPool| -> BoxFuture<'static, bool> {
        Box::pin(async move {
            let ping = async {
                let mut conn = pool.acquire().await.ok()?;
                conn.ping().await.ok()
            };
            matches!(tokio::time::timeout(PING_DEADLINE, ping).await, Ok(Some(())))
        })
    })
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub used: usize,
    pub idle: usize,
    pub total: usize,
    pub max: usize,
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ConnectionPool(used={}/idle={}/total={}/max={})",
            self.used, self.idle, self.total, self.max
        )
    }
}

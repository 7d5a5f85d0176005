//! Connection-pooled, multi-tenant database access.
//!
//! [`ConnectionPool`] owns every open handle and lends them out single-take;
//! [`DatabaseRegistry`] layers per-name registration, reuse-with-revalidation
//! and health probing on top.

pub mod config;
pub mod pool;
pub mod registry;

pub use config::{expand_app_name, parse_connection_info, ConnectionConfig};
pub use pool::{BorrowedConnection, ConnectionPool, PoolStats};
pub use registry::{DatabaseInfo, DatabaseRegistry, RegistryStats};

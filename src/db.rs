//! PostgreSQL storage backend
//!
//! Pool construction, schema bootstrap and the `PgStore` repository
//! implementation. Multi-step writes run in one transaction; guards lock the
//! parent row with `SELECT ... FOR UPDATE` before counting dependents.

pub mod schema;

mod registries;
mod tasks;
mod users;

use crate::config::DatabaseConfig;
use crate::error::{AppError, ApiResult};
use deadpool_postgres::{Config, ManagerConfig, Object, Pool, RecyclingMethod, Runtime};
use tokio_postgres::error::SqlState;
use tracing::info;

/// Create a connection pool, using TLS when the configuration requires it
pub fn create_pool(config: &DatabaseConfig) -> Result<Pool, AppError> {
    let mut cfg = Config::new();
    cfg.host = Some(config.host.clone());
    cfg.port = Some(config.port);
    cfg.user = Some(config.user.clone());
    cfg.password = Some(config.password.clone());
    cfg.dbname = Some(config.database.clone());
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    cfg.pool = Some(deadpool_postgres::PoolConfig::new(config.max_pool_size));

    if config.require_tls {
        let certs = rustls_native_certs::load_native_certs();
        let mut root_store = rustls::RootCertStore::empty();
        for cert in certs.certs {
            root_store.add(cert).ok();
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        let tls = tokio_postgres_rustls::MakeRustlsConnect::new(tls_config);

        cfg.create_pool(Some(Runtime::Tokio1), tls)
            .map_err(|e| AppError::Config(format!("Failed to create TLS pool: {}", e)))
    } else {
        cfg.create_pool(Some(Runtime::Tokio1), tokio_postgres::NoTls)
            .map_err(|e| AppError::Config(format!("Failed to create pool: {}", e)))
    }
}

/// Verify connectivity, create missing tables and load the reference data
pub async fn bootstrap(pool: &Pool, admin_password: &str) -> ApiResult<()> {
    let client = pool.get().await?;
    client.query_one("SELECT 1", &[]).await?;
    info!("Database connection verified");

    schema::create_tables(&client).await?;
    schema::seed(&client, admin_password).await?;
    Ok(())
}

/// Storage backend over a Postgres pool
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn client(&self) -> ApiResult<Object> {
        Ok(self.pool.get().await?)
    }
}

/// `%keyword%` pattern for `ILIKE`, `None` passes the filter through
fn like_pattern(keyword: Option<&str>) -> Option<String> {
    keyword.map(|k| format!("%{}%", k.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")))
}

/// A delete blocked by a `RESTRICT` foreign key reports the guard message
fn map_delete_error(e: tokio_postgres::Error, guard_msg: &str) -> AppError {
    match e.code() {
        Some(code) if *code == SqlState::FOREIGN_KEY_VIOLATION => AppError::BadRequest(guard_msg.to_string()),
        _ => AppError::Database(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern(Some("客户")).as_deref(), Some("%客户%"));
        assert_eq!(like_pattern(Some("100%_a")).as_deref(), Some("%100\\%\\_a%"));
        assert!(like_pattern(None).is_none());
    }
}

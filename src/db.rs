//! Connection pool and schema bootstrap.

use std::time::Duration;

use metrics::{counter, gauge};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use tracing::{error, info};

use crate::{config::AppConfig, errors::ServiceError, tracing::timed};

pub type DbPool = DatabaseConnection;

/// Pool tuning, usually taken from [`AppConfig`]
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub acquire_timeout: Duration,
}

impl From<&AppConfig> for DbConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            url: cfg.database_url.clone(),
            max_connections: cfg.db_max_connections,
            min_connections: cfg.db_min_connections,
            connect_timeout: Duration::from_secs(cfg.db_connect_timeout_secs),
            idle_timeout: Duration::from_secs(cfg.db_idle_timeout_secs),
            acquire_timeout: Duration::from_secs(cfg.db_acquire_timeout_secs),
        }
    }
}

/// The URL with any password masked, for logs
fn redacted(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            let userinfo = &url[scheme_end + 3..at];
            match userinfo.split_once(':') {
                Some((user, _)) => format!("{}{}:***{}", &url[..scheme_end + 3], user, &url[at..]),
                None => url.to_string(),
            }
        }
        _ => url.to_string(),
    }
}

pub async fn connect(config: &DbConfig) -> Result<DbPool, ServiceError> {
    let mut opt = ConnectOptions::new(config.url.clone());
    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .sqlx_logging(false);

    gauge!("orderly_db.max_connections", config.max_connections as f64);

    let pool = Database::connect(opt).await.map_err(|e| {
        error!(url = %redacted(&config.url), error = %e, "database connection failed");
        counter!("orderly_db.connection_failures", 1);
        ServiceError::DatabaseError(e)
    })?;

    info!(
        url = %redacted(&config.url),
        backend = ?pool.get_database_backend(),
        max_connections = config.max_connections,
        "database pool ready"
    );
    Ok(pool)
}

pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, ServiceError> {
    connect(&DbConfig::from(cfg)).await
}

/// Applies every pending embedded migration
pub async fn run_migrations(pool: &DbPool) -> Result<(), ServiceError> {
    timed("db_migrations", async {
        crate::migrator::Migrator::up(pool, None)
            .await
            .map_err(ServiceError::DatabaseError)
    })
    .await?;
    info!("database schema up to date");
    Ok(())
}

pub async fn check_connection(pool: &DbPool) -> Result<(), ServiceError> {
    timed("db_ping", async { pool.ping().await.map_err(ServiceError::DatabaseError) })
        .await
        .map_err(|e| {
            counter!("orderly_db.connection_failures", 1);
            e
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connects_and_migrates_in_memory_sqlite() {
        let cfg = DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
            acquire_timeout: Duration::from_secs(5),
        };
        let pool = connect(&cfg).await.expect("connect");
        run_migrations(&pool).await.expect("migrate");
        // Second run is a no-op
        run_migrations(&pool).await.expect("migrate again");
        assert!(check_connection(&pool).await.is_ok());
    }

    #[test]
    fn db_config_follows_app_config_tuning() {
        let mut app = AppConfig::new(
            "sqlite::memory:".into(),
            "k7Qp2vXz9LmN4rT8wYb1Hc6Jd3Fg5Se0".into(),
            "127.0.0.1".into(),
            8080,
            "test".into(),
        );
        app.db_max_connections = 3;
        app.db_acquire_timeout_secs = 2;
        let cfg = DbConfig::from(&app);
        assert_eq!(cfg.max_connections, 3);
        assert_eq!(cfg.acquire_timeout, Duration::from_secs(2));
        assert_eq!(cfg.url, "sqlite::memory:");
    }

    #[test]
    fn passwords_are_masked_in_logs() {
        assert_eq!(
            redacted("postgres://orderly:hunter2@db:5432/orderly"),
            "postgres://orderly:***@db:5432/orderly"
        );
        assert_eq!(redacted("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(redacted("sqlite://orderly.db?mode=rwc"), "sqlite://orderly.db?mode=rwc");
    }
}

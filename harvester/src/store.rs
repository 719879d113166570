use crate::model::StoredRecord;
use async_trait::async_trait;
use harvester_core::config::DatabaseConfig;
use harvester_core::Result;
use metrics::counter;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::types::Json;
use sqlx::PgPool;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

/// Append-only record collection keyed by the upstream identifier. An `Err`
/// from `insert_one` is always an infrastructure failure; a key conflict is
/// reported as `Duplicate`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert_one(&self, record: &StoredRecord) -> Result<InsertOutcome>;

    async fn count_all(&self) -> Result<i64>;

    async fn count_by_tag(&self, tag: &str) -> Result<i64>;

    /// Re-establish the underlying session.
    async fn refresh_session(&self) -> Result<()>;

    async fn health_check(&self) -> Result<()>;
}

/// Postgres store. The pool handle is shared between the ingestion task and
/// the command listener; the lock only guards swapping it on refresh.
pub struct PgStore {
    connect_options: PgConnectOptions,
    pool_options: PoolSettings,
    pool: RwLock<PgPool>,
}

#[derive(Debug, Clone, Copy)]
struct PoolSettings {
    max_connections: u32,
    min_connections: u32,
    acquire_timeout: Duration,
}

impl PgStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let connect_options = Self::connect_options(config);
        let pool_options = PoolSettings {
            max_connections: config.max_connections,
            min_connections: config.min_connections,
            acquire_timeout: Duration::from_secs(config.connect_timeout_secs),
        };
        let pool = Self::open_pool(&connect_options, pool_options).await?;

        info!(host = %config.host, database = %config.name, "Connected to store");

        Ok(Self {
            connect_options,
            pool_options,
            pool: RwLock::new(pool),
        })
    }

    fn connect_options(config: &DatabaseConfig) -> PgConnectOptions {
        let mut options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.name);

        if let Some(username) = config.username.as_deref().filter(|u| !u.is_empty()) {
            options = options.username(username);
            if let Some(password) = config.password.as_deref().filter(|p| !p.is_empty()) {
                options = options.password(password);
            }
        }

        options
    }

    async fn open_pool(options: &PgConnectOptions, settings: PoolSettings) -> Result<PgPool> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect_with(options.clone())
            .await?;
        Ok(pool)
    }

    async fn pool(&self) -> PgPool {
        self.pool.read().await.clone()
    }

    pub async fn migrate(&self) -> Result<()> {
        let pool = self.pool().await;
        sqlx::migrate!("../migrations").run(&pool).await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PgStore {
    #[instrument(skip(self, record), fields(id = %record.id_str))]
    async fn insert_one(&self, record: &StoredRecord) -> Result<InsertOutcome> {
        let pool = self.pool().await;

        let result = sqlx::query(
            r#"
            INSERT INTO records (id_str, created_at_unix, ingestion_tag, document)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id_str) DO NOTHING
            "#,
        )
        .bind(record.natural_key())
        .bind(record.created_at_unix)
        .bind(&record.ingestion_tag)
        .bind(Json(record))
        .execute(&pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!("Record already stored");
            return Ok(InsertOutcome::Duplicate);
        }

        Ok(InsertOutcome::Inserted)
    }

    async fn count_all(&self) -> Result<i64> {
        let pool = self.pool().await;
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM records")
            .fetch_one(&pool)
            .await?;
        Ok(count)
    }

    async fn count_by_tag(&self, tag: &str) -> Result<i64> {
        let pool = self.pool().await;
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM records WHERE ingestion_tag = $1")
                .bind(tag)
                .fetch_one(&pool)
                .await?;
        Ok(count)
    }

    async fn refresh_session(&self) -> Result<()> {
        let fresh = Self::open_pool(&self.connect_options, self.pool_options).await?;
        let stale = std::mem::replace(&mut *self.pool.write().await, fresh);
        stale.close().await;

        counter!("harvester_session_refreshes").increment(1);
        info!("Store session refreshed");
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        let pool = self.pool().await;
        sqlx::query("SELECT 1").execute(&pool).await?;
        Ok(())
    }
}

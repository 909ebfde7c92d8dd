//! Postgres-backed ownership store.
//!
//! Every lookup is a single indexed `SELECT` against the platform's shared database. Ids are
//! cast to `text` in SQL so integer, bigint and uuid keys all come back as strings.

use super::OwnershipStore;
use crate::core::config::DatabaseConfig;
use crate::core::error::{GatewayError, GatewayResult};
use async_trait::async_trait;
use sqlx_core::pool::PoolOptions;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use sqlx_postgres::{PgPool, Postgres};
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Type alias for PostgreSQL pool options.
pub type PgPoolOptions = PoolOptions<Postgres>;

const MEDICAL_CARD_PAGES: &str = "SELECT id::text FROM pages WHERE id_doctor = $1";
const HEALTH_DIARY_PAGES: &str = "SELECT id::text FROM pages_diary WHERE id_user = $1";
const CARD_OWNER: &str = "SELECT id_user::text FROM cards WHERE id = $1";
const PARTICIPANT_CHATS: &str = "SELECT id::text FROM chat WHERE doctor_id = $1 OR patient_id = $1";
const SENT_MESSAGES: &str = "SELECT id::text FROM message WHERE sender_id = $1";
const PARTICIPANT_RECORDS: &str = "SELECT id::text FROM record WHERE id_doctor = $1 OR id_user = $1";
const MEETING_RECORD: &str = "SELECT record_id::text FROM meeting WHERE meeting_id = $1";

/// Ownership lookups over a pooled Postgres connection
#[derive(Debug, Clone)]
pub struct PgOwnershipStore {
    pool: PgPool,
}

impl PgOwnershipStore {
    /// Build the pool without opening a connection yet
    #[instrument(skip(config), fields(url = %mask_password(&config.url)))]
    pub fn connect_lazy(config: &DatabaseConfig) -> GatewayResult<Self> {
        info!(pool_size = config.pool_size, "Creating ownership database pool");

        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(config.connect_timeout)
            .test_before_acquire(false)
            .connect_lazy(&config.url)?;

        Ok(Self { pool })
    }

    async fn ids_for_user(&self, sql: &'static str, user_id: Uuid) -> GatewayResult<Vec<String>> {
        let rows: Vec<(Option<String>,)> = query_as(sql).bind(user_id).fetch_all(&self.pool).await?;
        let ids: Vec<String> = rows.into_iter().filter_map(|(id,)| id).collect();
        debug!(%user_id, count = ids.len(), "Ownership lookup finished");
        Ok(ids)
    }

    async fn scalar_by_key(&self, sql: &'static str, key: &str) -> GatewayResult<Option<String>> {
        // non-numeric keys cannot exist in integer columns
        let Ok(key) = key.parse::<i64>() else {
            return Ok(None);
        };
        let row: Option<(Option<String>,)> = query_as(sql).bind(key).fetch_optional(&self.pool).await?;
        Ok(row.and_then(|(value,)| value))
    }
}

#[async_trait]
impl OwnershipStore for PgOwnershipStore {
    async fn medical_card_pages_of_doctor(&self, doctor_id: Uuid) -> GatewayResult<Vec<String>> {
        self.ids_for_user(MEDICAL_CARD_PAGES, doctor_id).await
    }

    async fn health_diary_pages_of_user(&self, user_id: Uuid) -> GatewayResult<Vec<String>> {
        self.ids_for_user(HEALTH_DIARY_PAGES, user_id).await
    }

    async fn card_owner(&self, card_id: &str) -> GatewayResult<Option<String>> {
        self.scalar_by_key(CARD_OWNER, card_id).await
    }

    async fn chats_of_participant(&self, user_id: Uuid) -> GatewayResult<Vec<String>> {
        self.ids_for_user(PARTICIPANT_CHATS, user_id).await
    }

    async fn messages_sent_by(&self, user_id: Uuid) -> GatewayResult<Vec<String>> {
        self.ids_for_user(SENT_MESSAGES, user_id).await
    }

    async fn records_of_participant(&self, user_id: Uuid) -> GatewayResult<Vec<String>> {
        self.ids_for_user(PARTICIPANT_RECORDS, user_id).await
    }

    async fn meeting_record(&self, meeting_id: &str) -> GatewayResult<Option<String>> {
        self.scalar_by_key(MEETING_RECORD, meeting_id).await
    }

    async fn health_check(&self) -> GatewayResult<bool> {
        query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| true)
            .map_err(GatewayError::from)
    }
}

/// Masks the password in a database URL for logging.
fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            let scheme_end = url.find("://").map(|p| p + 3).unwrap_or(0);
            if colon_pos > scheme_end {
                return format!("{}:****{}", &url[..colon_pos], &url[at_pos..]);
            }
        }
    }
    url.to_string()
}

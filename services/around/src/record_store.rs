use crate::config::DatabaseConfig;
use crate::models::Post;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info, instrument};

#[cfg(test)]
use mockall::automock;

pub const POST_FAMILY: &str = "post";
pub const LOCATION_FAMILY: &str = "location";

/// Append-only audit projection of posts. Not used for search.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Write one row keyed by `post_id` as a single mutation batch
    async fn append(&self, post_id: &str, post: &Post) -> Result<()>;

    /// Connectivity check for readiness probes
    async fn ping(&self) -> Result<()>;
}

/// One cell write inside a mutation
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub family: &'static str,
    pub qualifier: &'static str,
    pub value: Vec<u8>,
}

/// A batch of cell writes that all carry the same timestamp
#[derive(Debug, Clone)]
pub struct Mutation {
    timestamp: DateTime<Utc>,
    cells: Vec<Cell>,
}

impl Mutation {
    /// Start a batch; the timestamp is truncated to the store's microsecond precision
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp: timestamp.trunc_subsecs(6),
            cells: Vec::new(),
        }
    }

    pub fn set(&mut self, family: &'static str, qualifier: &'static str, value: impl Into<Vec<u8>>) {
        self.cells.push(Cell {
            family,
            qualifier,
            value: value.into(),
        });
    }

    /// The post row: `post:user`, `post:message`, `location:lat`, `location:lon`
    pub fn for_post(post: &Post, timestamp: DateTime<Utc>) -> Self {
        let mut mutation = Self::new(timestamp);
        mutation.set(POST_FAMILY, "user", post.user.as_bytes());
        mutation.set(POST_FAMILY, "message", post.message.as_bytes());
        mutation.set(LOCATION_FAMILY, "lat", post.location.lat.to_string());
        mutation.set(LOCATION_FAMILY, "lon", post.location.lon.to_string());
        mutation
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }
}

/// Wide-column record store emulated on PostgreSQL
pub struct PgRecordStore {
    pool: PgPool,
    table: String,
}

impl PgRecordStore {
    /// Create a new record store with connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!(table = %config.table, "Connected to record store");

        Ok(Self {
            pool,
            table: config.table.clone(),
        })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Apply every cell of `mutation` to `row_key` atomically
    #[instrument(skip(self, mutation), fields(table = %self.table, cells = mutation.cells().len()))]
    pub async fn apply(&self, row_key: &str, mutation: &Mutation) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        for cell in mutation.cells() {
            sqlx::query(
                r#"
                INSERT INTO wide_cells (table_name, row_key, family, qualifier, ts, value)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (table_name, row_key, family, qualifier, ts)
                DO UPDATE SET value = EXCLUDED.value
                "#,
            )
            .bind(&self.table)
            .bind(row_key)
            .bind(cell.family)
            .bind(cell.qualifier)
            .bind(mutation.timestamp())
            .bind(&cell.value)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to write cell {}:{}", cell.family, cell.qualifier))?;
        }

        tx.commit().await.context("Failed to commit transaction")?;

        debug!(row_key = %row_key, "Mutation applied");
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    #[instrument(skip(self, post), fields(post_id = %post_id))]
    async fn append(&self, post_id: &str, post: &Post) -> Result<()> {
        let mutation = Mutation::for_post(post, Utc::now());
        self.apply(post_id, &mutation).await?;

        info!(message = %post.message, "Post is saved to record store");
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Record store is unreachable")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Location;
    use chrono::TimeZone;

    #[test]
    fn test_post_mutation_cells() {
        let post = Post {
            id: "p1".to_string(),
            user: "jack1".to_string(),
            message: "hello".to_string(),
            location: Location {
                lat: 37.5,
                lon: -122.25,
            },
            media_url: None,
        };
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 45).unwrap();

        let mutation = Mutation::for_post(&post, ts);
        let cells: Vec<(&str, &str, &[u8])> = mutation
            .cells()
            .iter()
            .map(|c| (c.family, c.qualifier, c.value.as_slice()))
            .collect();

        assert_eq!(
            cells,
            vec![
                ("post", "user", b"jack1".as_slice()),
                ("post", "message", b"hello".as_slice()),
                ("location", "lat", b"37.5".as_slice()),
                ("location", "lon", b"-122.25".as_slice()),
            ]
        );
        assert_eq!(mutation.timestamp(), ts);
    }

    #[test]
    fn test_mutation_timestamp_is_shared_and_truncated() {
        let ts = Utc.timestamp_nanos(1_700_000_000_123_456_789);
        let mutation = Mutation::new(ts);
        assert_eq!(
            mutation.timestamp().timestamp_subsec_nanos(),
            123_456_000
        );
    }
}

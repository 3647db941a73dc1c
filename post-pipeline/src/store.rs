use crate::types::{Job, JobFilter, JobId, StoreError};
use async_trait::async_trait;
use chrono::SecondsFormat;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::str::FromStr;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Durable record of jobs. Writes are whole-job snapshots guarded by the
/// job's `version`: a snapshot read at version N can only be written while
/// the stored job is still at version N.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: &Job) -> Result<JobId, StoreError>;

    async fn get(&self, id: JobId) -> Result<Job, StoreError>;

    /// Replaces the stored job with `job` and returns the stored copy, whose
    /// version is one higher than the snapshot's.
    async fn update(&self, job: &Job) -> Result<Job, StoreError>;

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError>;
}

pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: &Job) -> Result<JobId, StoreError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::AlreadyExists { id: job.id });
        }
        jobs.insert(job.id, job.clone());
        Ok(job.id)
    }

    async fn get(&self, id: JobId) -> Result<Job, StoreError> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { id })
    }

    async fn update(&self, job: &Job) -> Result<Job, StoreError> {
        let mut jobs = self.jobs.write().await;
        let current = jobs.get(&job.id).ok_or(StoreError::NotFound { id: job.id })?;

        if current.version != job.version {
            return Err(StoreError::Conflict {
                id: job.id,
                expected: job.version,
                found: current.version,
            });
        }

        let mut stored = job.clone();
        stored.version = job.version + 1;
        jobs.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.read().await;
        let mut matching: Vec<Job> = jobs.values().filter(|job| filter.matches(job)).cloned().collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            matching.truncate(limit);
        }
        Ok(matching)
    }
}

/// One row per job: the queryable columns plus the full job as JSON.
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    /// Opens (creating if needed) the database at `database_url`, e.g.
    /// `sqlite://post_pipeline.db`.
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("Job store ready at {}", database_url);
        Ok(store)
    }

    /// Ephemeral database for tests. A single connection keeps every query on
    /// the same in-memory database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options).await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                version INTEGER NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    fn decode(payload: &str, version: i64) -> Result<Job, StoreError> {
        let mut job: Job = serde_json::from_str(payload)?;
        job.version = version as u64;
        Ok(job)
    }

    async fn current_version(&self, id: JobId) -> Result<Option<u64>, StoreError> {
        let row = sqlx::query("SELECT version FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(row.try_get::<i64, _>("version")? as u64)),
            None => Ok(None),
        }
    }
}

fn timestamp(value: &chrono::DateTime<chrono::Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create(&self, job: &Job) -> Result<JobId, StoreError> {
        let payload = serde_json::to_string(job)?;

        let result = sqlx::query(
            r#"
            INSERT INTO jobs (id, status, version, payload, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(job.id.to_string())
        .bind(job.status.as_str())
        .bind(job.version as i64)
        .bind(payload)
        .bind(timestamp(&job.created_at))
        .bind(timestamp(&job.updated_at))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists { id: job.id });
        }

        debug!("Stored new job {}", job.id);
        Ok(job.id)
    }

    async fn get(&self, id: JobId) -> Result<Job, StoreError> {
        let row = sqlx::query("SELECT payload, version FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Self::decode(&row.try_get::<String, _>("payload")?, row.try_get("version")?),
            None => Err(StoreError::NotFound { id }),
        }
    }

    async fn update(&self, job: &Job) -> Result<Job, StoreError> {
        let mut stored = job.clone();
        stored.version = job.version + 1;
        let payload = serde_json::to_string(&stored)?;

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, version = ?, payload = ?, updated_at = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(stored.status.as_str())
        .bind(stored.version as i64)
        .bind(payload)
        .bind(timestamp(&stored.updated_at))
        .bind(job.id.to_string())
        .bind(job.version as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(stored);
        }

        match self.current_version(job.id).await? {
            Some(found) => Err(StoreError::Conflict {
                id: job.id,
                expected: job.version,
                found,
            }),
            None => Err(StoreError::NotFound { id: job.id }),
        }
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        // SQLite treats a negative LIMIT as "no limit".
        let limit = filter.limit.map(|l| l as i64).unwrap_or(-1);

        let rows = match filter.status {
            Some(status) => {
                sqlx::query(
                    "SELECT payload, version FROM jobs WHERE status = ? ORDER BY created_at DESC LIMIT ?",
                )
                .bind(status.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT payload, version FROM jobs ORDER BY created_at DESC LIMIT ?")
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter()
            .map(|row| Self::decode(&row.try_get::<String, _>("payload")?, row.try_get("version")?))
            .collect()
    }
}

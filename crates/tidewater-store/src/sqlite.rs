use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use uuid::Uuid;

use crate::{Error, InstanceRecord, InstanceStatus, InstanceStore};

/// SQLite-based store implementation.
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open the database file at `path`, creating it if needed, and bring its
  /// schema up to date.
  pub async fn open(path: &Path) -> Result<Self, Error> {
    let options = SqliteConnectOptions::new()
      .filename(path)
      .create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(&self.pool).await
  }
}

fn expect_row(instance_id: Uuid, rows_affected: u64) -> Result<(), Error> {
  if rows_affected == 0 {
    return Err(Error::NotFound(instance_id));
  }
  Ok(())
}

#[async_trait]
impl InstanceStore for SqliteStore {
  async fn create_instance(&self, record: &InstanceRecord) -> Result<(), Error> {
    let result = sqlx::query(
      r#"
            INSERT INTO process_instances (instance_id, process_id, status, execution_state, fault, created_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (instance_id) DO NOTHING
            "#,
    )
    .bind(record.instance_id)
    .bind(&record.process_id)
    .bind(record.status)
    .bind(&record.execution_state)
    .bind(&record.fault)
    .bind(record.created_at)
    .bind(record.completed_at)
    .execute(&self.pool)
    .await?;

    if result.rows_affected() == 0 {
      return Err(Error::AlreadyExists(record.instance_id));
    }
    Ok(())
  }

  async fn get_instance(&self, instance_id: Uuid) -> Result<InstanceRecord, Error> {
    sqlx::query_as(
      r#"
            SELECT instance_id, process_id, status, execution_state, fault, created_at, completed_at
            FROM process_instances
            WHERE instance_id = ?
            "#,
    )
    .bind(instance_id)
    .fetch_optional(&self.pool)
    .await?
    .ok_or(Error::NotFound(instance_id))
  }

  async fn execution_state(&self, instance_id: Uuid) -> Result<Option<Vec<u8>>, Error> {
    let row: Option<(Option<Vec<u8>>,)> = sqlx::query_as(
      r#"
            SELECT execution_state
            FROM process_instances
            WHERE instance_id = ?
            "#,
    )
    .bind(instance_id)
    .fetch_optional(&self.pool)
    .await?;

    row
      .map(|(state,)| state)
      .ok_or(Error::NotFound(instance_id))
  }

  async fn set_execution_state(&self, instance_id: Uuid, state: &[u8]) -> Result<(), Error> {
    let result = sqlx::query(
      r#"
            UPDATE process_instances
            SET execution_state = ?
            WHERE instance_id = ?
            "#,
    )
    .bind(state)
    .bind(instance_id)
    .execute(&self.pool)
    .await?;

    expect_row(instance_id, result.rows_affected())
  }

  async fn complete_instance(
    &self,
    instance_id: Uuid,
    status: InstanceStatus,
    fault: Option<String>,
    completed_at: DateTime<Utc>,
  ) -> Result<(), Error> {
    let result = sqlx::query(
      r#"
            UPDATE process_instances
            SET status = ?, fault = ?, execution_state = NULL, completed_at = ?
            WHERE instance_id = ?
            "#,
    )
    .bind(status)
    .bind(fault)
    .bind(completed_at)
    .bind(instance_id)
    .execute(&self.pool)
    .await?;

    expect_row(instance_id, result.rows_affected())
  }

  async fn mark_broken(&self, instance_id: Uuid, reason: &str) -> Result<(), Error> {
    let result = sqlx::query(
      r#"
            UPDATE process_instances
            SET status = ?, fault = ?
            WHERE instance_id = ?
            "#,
    )
    .bind(InstanceStatus::Broken)
    .bind(reason)
    .bind(instance_id)
    .execute(&self.pool)
    .await?;

    expect_row(instance_id, result.rows_affected())
  }

  async fn active_instances(&self, process_id: &str) -> Result<Vec<Uuid>, Error> {
    let rows: Vec<(Uuid,)> = sqlx::query_as(
      r#"
            SELECT instance_id
            FROM process_instances
            WHERE process_id = ? AND status = ?
            ORDER BY created_at ASC
            "#,
    )
    .bind(process_id)
    .bind(InstanceStatus::Active)
    .fetch_all(&self.pool)
    .await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
  }
}

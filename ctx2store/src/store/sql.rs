//! SQL バックエンド（sqlx Any ドライバ）
//!
//! 本番は MySQL/MariaDB、テストはインメモリ SQLite。値はすべてバインド
//! パラメータで渡し、SQL 文字列には埋め込まない。

use super::{ConnectionDescriptor, StoreBackend, StoreDriver, StoreScheme};
use crate::capture::types::{FieldValue, SinkOperation, RECORD_TABLE};
use crate::common::error::{ConfigError, ConfigResult, PersistenceError};
use async_trait::async_trait;
use sqlx::any::{install_default_drivers, AnyPoolOptions};
use sqlx::AnyPool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// プールのSQL方言
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// MySQL / MariaDB
    MySql,
    /// SQLite
    Sqlite,
}

impl Dialect {
    fn create_table(&self) -> String {
        match self {
            Self::MySql => format!(
                "CREATE TABLE IF NOT EXISTS {RECORD_TABLE} (
                    id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
                    operation_id VARCHAR(36) NOT NULL,
                    captured_at VARCHAR(40) NOT NULL,
                    referer TEXT NOT NULL,
                    method VARCHAR(16) NOT NULL,
                    uri TEXT NOT NULL,
                    authorization TEXT NOT NULL,
                    user_agent TEXT NOT NULL,
                    remote_addr VARCHAR(64) NOT NULL,
                    remote_port BIGINT NOT NULL,
                    query_string TEXT NOT NULL,
                    request_body MEDIUMTEXT NOT NULL,
                    status BIGINT NOT NULL,
                    response_time_ms BIGINT NOT NULL,
                    UNIQUE KEY uq_{RECORD_TABLE}_operation_id (operation_id)
                )"
            ),
            Self::Sqlite => format!(
                "CREATE TABLE IF NOT EXISTS {RECORD_TABLE} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    operation_id TEXT NOT NULL UNIQUE,
                    captured_at TEXT NOT NULL,
                    referer TEXT NOT NULL,
                    method TEXT NOT NULL,
                    uri TEXT NOT NULL,
                    authorization TEXT NOT NULL,
                    user_agent TEXT NOT NULL,
                    remote_addr TEXT NOT NULL,
                    remote_port INTEGER NOT NULL,
                    query_string TEXT NOT NULL,
                    request_body TEXT NOT NULL,
                    status INTEGER NOT NULL,
                    response_time_ms INTEGER NOT NULL
                )"
            ),
        }
    }
}

/// 遅延接続の sqlx プールを作る [`StoreDriver`]
#[derive(Debug, Clone)]
pub struct SqlDriver {
    max_connections: u32,
    acquire_timeout: Duration,
}

impl Default for SqlDriver {
    fn default() -> Self {
        Self::new(4, Duration::from_secs(5))
    }
}

impl SqlDriver {
    /// プール上限を指定してドライバを作る
    pub fn new(max_connections: u32, acquire_timeout: Duration) -> Self {
        install_default_drivers();
        Self {
            max_connections: max_connections.max(1),
            acquire_timeout,
        }
    }
}

impl StoreDriver for SqlDriver {
    /// tokio ランタイム内で呼ぶこと（ここでは接続しない）
    fn connect(&self, descriptor: &ConnectionDescriptor) -> ConfigResult<Arc<dyn StoreBackend>> {
        let dialect = match descriptor.scheme() {
            StoreScheme::MySql => Dialect::MySql,
        };

        let pool = AnyPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
            .connect_lazy(descriptor.as_str())
            .map_err(|e| ConfigError::Driver(format!("{descriptor}: {e}")))?;

        debug!(store = %descriptor, ?dialect, "Created lazy store pool");
        Ok(Arc::new(SqlBackend::new(pool, dialect)))
    }
}

/// 操作ごとに1行 INSERT する [`StoreBackend`]
#[derive(Debug)]
pub struct SqlBackend {
    pool: AnyPool,
    dialect: Dialect,
    schema_ready: AtomicBool,
}

impl SqlBackend {
    /// 既存のプールを包む
    pub fn new(pool: AnyPool, dialect: Dialect) -> Self {
        Self {
            pool,
            dialect,
            schema_ready: AtomicBool::new(false),
        }
    }

    /// 内部のプール
    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// レコードテーブルがなければ作る（初回書き込み前にも遅延実行される）
    pub async fn ensure_schema(&self) -> Result<(), PersistenceError> {
        sqlx::query(&self.dialect.create_table())
            .execute(&self.pool)
            .await?;
        if !self.schema_ready.swap(true, Ordering::AcqRel) {
            info!(table = RECORD_TABLE, dialect = ?self.dialect, "Record table is ready");
        }
        Ok(())
    }
}

fn insert_statement(operation: &SinkOperation) -> String {
    let columns: Vec<&str> = operation.fields.iter().map(|(column, _)| *column).collect();
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        operation.table,
        columns.join(", "),
        placeholders
    )
}

#[async_trait]
impl StoreBackend for SqlBackend {
    async fn write(&self, operation: &SinkOperation) -> Result<(), PersistenceError> {
        if !self.schema_ready.load(Ordering::Acquire) {
            self.ensure_schema().await?;
        }

        let sql = insert_statement(operation);
        let mut query = sqlx::query(&sql);
        for (_, value) in &operation.fields {
            query = match value {
                FieldValue::Text(text) => query.bind(text.as_str()),
                FieldValue::Unsigned(n) => query.bind(i64::try_from(*n).unwrap_or(i64::MAX)),
                FieldValue::Timestamp(at) => query.bind(at.to_rfc3339()),
            };
        }
        query.execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;

    /// テスト用のインメモリSQLiteバックエンドを作成し、スキーマを作成する
    pub async fn sqlite_backend() -> SqlBackend {
        install_default_drivers();
        // インメモリDBは接続ごとに別物なので1本に固定して保持し続ける
        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test database");
        let backend = SqlBackend::new(pool, Dialect::Sqlite);
        backend
            .ensure_schema()
            .await
            .expect("Failed to create schema");
        backend
    }
}

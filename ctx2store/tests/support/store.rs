use async_trait::async_trait;
use ctx2store::capture::SinkOperation;
use ctx2store::common::error::{ConfigResult, PersistenceError};
use ctx2store::config::SinkConfig;
use ctx2store::store::sql::{Dialect, SqlBackend};
use ctx2store::store::{ConnectionDescriptor, StoreBackend, StoreDriver};
use sqlx::any::{install_default_drivers, AnyPoolOptions};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// どの接続文字列にも同じバックエンドを返すドライバ
pub struct SharedBackendDriver {
    pub backend: Arc<dyn StoreBackend>,
}

impl StoreDriver for SharedBackendDriver {
    fn connect(&self, _descriptor: &ConnectionDescriptor) -> ConfigResult<Arc<dyn StoreBackend>> {
        Ok(self.backend.clone())
    }
}

/// 常に書き込みに失敗するバックエンド
#[derive(Default)]
pub struct FailingBackend {
    pub attempts: AtomicUsize,
}

#[allow(dead_code)]
impl FailingBackend {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreBackend for FailingBackend {
    async fn write(&self, _operation: &SinkOperation) -> Result<(), PersistenceError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(PersistenceError::Write("store unavailable".into()))
    }
}

/// インメモリSQLiteのバックエンド（接続1本を保持し続ける）
#[allow(dead_code)]
pub async fn sqlite_backend() -> Arc<SqlBackend> {
    install_default_drivers();
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
    Arc::new(backend)
}

/// リトライ待ちを短くしたシンク設定
pub fn fast_sink_config() -> SinkConfig {
    SinkConfig {
        queue_capacity: 64,
        retry_attempts: 3,
        retry_backoff: Duration::from_millis(1),
        write_timeout: Duration::from_secs(2),
        shutdown_grace: Duration::from_secs(2),
    }
}

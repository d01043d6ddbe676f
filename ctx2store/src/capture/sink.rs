//! 非同期レコードシンク
//!
//! リクエスト経路からは `submit` で有界キューに積むだけ（ブロックしない）。
//! 専用のディスパッチタスクが FIFO で取り出し、タイムアウト付きで書き込み、
//! 指数バックオフでリトライし、それでも失敗したら破棄してカウントする。

use super::metrics::SinkMetrics;
use super::types::{CapturedRecord, SinkOperation};
use crate::common::error::PersistenceError;
use crate::config::SinkConfig;
use crate::shutdown::ShutdownController;
use crate::store::StoreBackend;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// ストア接続1つ分のキューとディスパッチタスク
///
/// Clone可能（senderのクローン）。
#[derive(Clone)]
pub struct RecordSink {
    label: Arc<str>,
    sender: mpsc::Sender<SinkOperation>,
    metrics: SinkMetrics,
    control: Arc<SinkControl>,
}

struct SinkControl {
    shutdown: ShutdownController,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for RecordSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordSink")
            .field("label", &self.label)
            .field("metrics", &self.metrics.snapshot())
            .finish()
    }
}

impl RecordSink {
    /// 新しいRecordSinkを作成し、ディスパッチタスクを起動
    pub fn new(label: &str, backend: Arc<dyn StoreBackend>, config: SinkConfig) -> Self {
        let label: Arc<str> = Arc::from(label);
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let metrics = SinkMetrics::default();
        let shutdown = ShutdownController::default();

        let task = tokio::spawn(dispatch(
            label.clone(),
            rx,
            backend,
            config,
            metrics.clone(),
            shutdown.clone(),
        ));

        Self {
            label,
            sender: tx,
            metrics,
            control: Arc::new(SinkControl {
                shutdown,
                task: Mutex::new(Some(task)),
            }),
        }
    }

    /// シンクのラベル（サーバー名）
    pub fn label(&self) -> &str {
        &self.label
    }

    /// 共有カウンタ
    pub fn metrics(&self) -> &SinkMetrics {
        &self.metrics
    }

    /// レコードを操作に変換してキューに積む。ブロックせず、キューが
    /// 満杯なら最新の操作を破棄する。
    pub fn submit(&self, record: CapturedRecord) {
        self.metrics.record_submitted();

        if self.control.shutdown.is_shutdown_requested() {
            self.metrics.record_discarded(1);
            debug!(sink = %self.label, "Sink is shutting down, discarding record");
            return;
        }

        let operation = SinkOperation::from_record(&record);
        match self.sender.try_send(operation) {
            Ok(()) => trace!(sink = %self.label, uri = %record.uri, "Record queued"),
            Err(TrySendError::Full(operation)) => {
                self.metrics.record_queue_full();
                warn!(
                    sink = %self.label,
                    operation_id = %operation.operation_id,
                    "Record queue is full, dropping operation"
                );
            }
            Err(TrySendError::Closed(_)) => {
                self.metrics.record_discarded(1);
                debug!(sink = %self.label, "Record queue is closed, discarding operation");
            }
        }
    }

    /// 受付を止め、猶予期間内でキューを書き出し、ディスパッチタスクの
    /// 終了を待つ。2回目以降は即座に戻る。
    pub async fn shutdown(&self) {
        self.control.shutdown.request_shutdown();
        let task = self.control.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(sink = %self.label, "Record dispatch task failed: {}", e);
            }
        }
    }
}

/// バックグラウンドディスパッチタスク
async fn dispatch(
    label: Arc<str>,
    mut rx: mpsc::Receiver<SinkOperation>,
    backend: Arc<dyn StoreBackend>,
    config: SinkConfig,
    metrics: SinkMetrics,
    shutdown: ShutdownController,
) {
    let mut in_flight = false;
    let drained = {
        let work = async {
            loop {
                let operation = if shutdown.is_shutdown_requested() {
                    match rx.try_recv() {
                        Ok(operation) => operation,
                        Err(_) => break,
                    }
                } else {
                    tokio::select! {
                        biased;
                        operation = rx.recv() => match operation {
                            Some(operation) => operation,
                            None => break,
                        },
                        _ = shutdown.wait() => continue,
                    }
                };

                in_flight = true;
                deliver(&label, backend.as_ref(), &config, &metrics, operation).await;
                in_flight = false;
            }
        };
        let deadline = async {
            shutdown.wait().await;
            tokio::time::sleep(config.shutdown_grace).await;
        };

        tokio::select! {
            _ = work => true,
            _ = deadline => false,
        }
    };

    // ループを抜けた後に積まれた分も含め、キューを閉じて残りを破棄
    let remaining = discard_remaining(&mut rx, &metrics);

    if drained {
        info!(sink = %label, late = remaining, "Record dispatch task stopped");
        return;
    }

    // 猶予期間切れ：書き込み中の1件も破棄扱い
    if in_flight {
        metrics.record_discarded(1);
    }
    warn!(
        sink = %label,
        discarded = remaining + u64::from(in_flight),
        "Shutdown grace period elapsed, discarding remaining operations"
    );
}

/// キューを閉じ、残っている操作を数えて破棄する
fn discard_remaining(rx: &mut mpsc::Receiver<SinkOperation>, metrics: &SinkMetrics) -> u64 {
    rx.close();
    let mut discarded = 0;
    while rx.try_recv().is_ok() {
        discarded += 1;
    }
    if discarded > 0 {
        metrics.record_discarded(discarded);
    }
    discarded
}

async fn deliver(
    label: &str,
    backend: &dyn StoreBackend,
    config: &SinkConfig,
    metrics: &SinkMetrics,
    operation: SinkOperation,
) {
    let attempts = config.retry_attempts.max(1);

    for attempt in 1..=attempts {
        let result = match tokio::time::timeout(config.write_timeout, backend.write(&operation)).await
        {
            Ok(result) => result,
            Err(_) => Err(PersistenceError::Timeout(config.write_timeout)),
        };

        match result {
            Ok(()) => {
                metrics.record_written();
                debug!(
                    sink = %label,
                    operation_id = %operation.operation_id,
                    attempt,
                    "Record written"
                );
                return;
            }
            Err(e) if attempt < attempts => {
                metrics.record_retry();
                let backoff = config.backoff_after(attempt);
                debug!(
                    sink = %label,
                    operation_id = %operation.operation_id,
                    attempt,
                    ?backoff,
                    error = %e,
                    "Store write failed, retrying"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(e) => {
                metrics.record_write_failed();
                warn!(
                    sink = %label,
                    operation_id = %operation.operation_id,
                    attempts,
                    error = %e,
                    "Store write failed, dropping operation"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::types::fixtures;
    use crate::store::test_utils::RecordingBackend;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    fn fast_config() -> SinkConfig {
        SinkConfig {
            queue_capacity: 8,
            retry_attempts: 3,
            retry_backoff: Duration::from_millis(1),
            write_timeout: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(1),
        }
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    /// Semaphore で書き込みを止めておけるバックエンド
    struct GatedBackend {
        gate: Semaphore,
        started: AtomicUsize,
    }

    impl GatedBackend {
        fn closed() -> Self {
            Self {
                gate: Semaphore::new(0),
                started: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl StoreBackend for GatedBackend {
        async fn write(&self, _operation: &SinkOperation) -> Result<(), PersistenceError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| PersistenceError::Write(e.to_string()))?;
            permit.forget();
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_same_record_twice_is_written_twice() {
        let backend = Arc::new(RecordingBackend::default());
        let sink = RecordSink::new("test", backend.clone(), fast_config());

        let record = fixtures::record();
        sink.submit(record.clone());
        sink.submit(record);

        wait_until(|| sink.metrics().snapshot().written == 2).await;
        let written = backend.written();
        assert_eq!(written.len(), 2);
        assert_ne!(written[0].operation_id, written[1].operation_id);
        sink.shutdown().await;
    }

    #[tokio::test]
    async fn test_records_are_written_in_submission_order() {
        let backend = Arc::new(RecordingBackend::default());
        let sink = RecordSink::new("test", backend.clone(), fast_config());

        for uri in ["/1", "/2", "/3"] {
            let mut record = fixtures::record();
            record.uri = uri.to_string();
            sink.submit(record);
        }

        wait_until(|| sink.metrics().snapshot().written == 3).await;
        let uris: Vec<String> = backend
            .written()
            .iter()
            .map(|op| op.text("uri").unwrap().to_string())
            .collect();
        assert_eq!(uris, vec!["/1", "/2", "/3"]);
        sink.shutdown().await;
    }

    #[tokio::test]
    async fn test_operations_left_after_the_loop_are_counted() {
        let (tx, mut rx) = mpsc::channel(4);
        let metrics = SinkMetrics::default();
        tx.try_send(SinkOperation::from_record(&fixtures::record()))
            .unwrap();
        tx.try_send(SinkOperation::from_record(&fixtures::record()))
            .unwrap();

        assert_eq!(discard_remaining(&mut rx, &metrics), 2);
        assert_eq!(metrics.snapshot().discarded_on_shutdown, 2);

        // 閉じた後の送信は Closed になり、submit 側で破棄として数えられる
        assert!(matches!(
            tx.try_send(SinkOperation::from_record(&fixtures::record())),
            Err(TrySendError::Closed(_))
        ));
        assert_eq!(discard_remaining(&mut rx, &metrics), 0);
        assert_eq!(metrics.snapshot().discarded_on_shutdown, 2);
    }

    #[tokio::test]
    async fn test_failing_backend_drops_once_after_retries() {
        let backend = Arc::new(RecordingBackend::failing());
        let sink = RecordSink::new("test", backend.clone(), fast_config());

        sink.submit(fixtures::record());

        wait_until(|| sink.metrics().dropped() == 1).await;
        let snapshot = sink.metrics().snapshot();
        assert_eq!(snapshot.dropped_write_failed, 1);
        assert_eq!(snapshot.retried, 2);
        assert_eq!(snapshot.written, 0);
        assert_eq!(backend.attempts.load(Ordering::SeqCst), 3);
        sink.shutdown().await;
    }

    #[tokio::test]
    async fn test_full_queue_drops_newest() {
        let backend = Arc::new(GatedBackend::closed());
        let config = SinkConfig {
            queue_capacity: 1,
            ..fast_config()
        };
        let sink = RecordSink::new("test", backend.clone(), config);

        sink.submit(fixtures::record());
        wait_until(|| backend.started.load(Ordering::SeqCst) == 1).await;
        sink.submit(fixtures::record());
        sink.submit(fixtures::record());

        assert_eq!(sink.metrics().snapshot().dropped_queue_full, 1);

        backend.gate.add_permits(10);
        wait_until(|| sink.metrics().snapshot().written == 2).await;
        sink.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue() {
        let backend = Arc::new(RecordingBackend::default());
        let sink = RecordSink::new("test", backend.clone(), fast_config());

        for _ in 0..3 {
            sink.submit(fixtures::record());
        }
        sink.shutdown().await;

        assert_eq!(backend.written().len(), 3);
        assert_eq!(sink.metrics().snapshot().discarded_on_shutdown, 0);
    }

    #[tokio::test]
    async fn test_shutdown_grace_discards_remaining() {
        let backend = Arc::new(GatedBackend::closed());
        let config = SinkConfig {
            write_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_millis(50),
            ..fast_config()
        };
        let sink = RecordSink::new("test", backend.clone(), config);

        sink.submit(fixtures::record());
        wait_until(|| backend.started.load(Ordering::SeqCst) == 1).await;
        sink.submit(fixtures::record());

        sink.shutdown().await;
        assert_eq!(sink.metrics().snapshot().discarded_on_shutdown, 2);

        sink.submit(fixtures::record());
        assert_eq!(sink.metrics().snapshot().discarded_on_shutdown, 3);
        // 2回目以降のshutdownは即座に戻る
        sink.shutdown().await;
    }

    #[tokio::test]
    async fn test_write_timeout_counts_as_failure() {
        let backend = Arc::new(GatedBackend::closed());
        let config = SinkConfig {
            retry_attempts: 1,
            write_timeout: Duration::from_millis(20),
            ..fast_config()
        };
        let sink = RecordSink::new("test", backend, config);

        sink.submit(fixtures::record());
        wait_until(|| sink.metrics().snapshot().dropped_write_failed == 1).await;
        sink.shutdown().await;
    }
}

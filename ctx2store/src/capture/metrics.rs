//! シンクのロックフリーカウンタ

use serde::Serialize;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// シンクとディスパッチタスクが共有するカウンタ
#[derive(Clone, Debug, Default)]
pub struct SinkMetrics {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    submitted: AtomicU64,
    written: AtomicU64,
    retried: AtomicU64,
    dropped_queue_full: AtomicU64,
    dropped_write_failed: AtomicU64,
    discarded_on_shutdown: AtomicU64,
}

/// [`SinkMetrics`] のある時点のコピー
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkMetricsSnapshot {
    /// `submit` に渡されたレコード数
    pub submitted: u64,
    /// 書き込みに成功した操作数
    pub written: u64,
    /// リトライした書き込み回数
    pub retried: u64,
    /// キュー満杯で破棄した数
    pub dropped_queue_full: u64,
    /// リトライを使い切って破棄した数
    pub dropped_write_failed: u64,
    /// シャットダウン中のため破棄した数
    pub discarded_on_shutdown: u64,
}

impl SinkMetricsSnapshot {
    /// ストアに届かなかった操作の合計
    pub fn dropped(&self) -> u64 {
        self.dropped_queue_full + self.dropped_write_failed + self.discarded_on_shutdown
    }

    /// 複数スナップショットの合計
    pub fn total<'a>(snapshots: impl IntoIterator<Item = &'a SinkMetricsSnapshot>) -> Self {
        snapshots.into_iter().fold(Self::default(), |acc, s| Self {
            submitted: acc.submitted + s.submitted,
            written: acc.written + s.written,
            retried: acc.retried + s.retried,
            dropped_queue_full: acc.dropped_queue_full + s.dropped_queue_full,
            dropped_write_failed: acc.dropped_write_failed + s.dropped_write_failed,
            discarded_on_shutdown: acc.discarded_on_shutdown + s.discarded_on_shutdown,
        })
    }
}

impl SinkMetrics {
    pub(crate) fn record_submitted(&self) {
        self.inner.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_written(&self) {
        self.inner.written.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.inner.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_queue_full(&self) {
        self.inner.dropped_queue_full.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write_failed(&self) {
        self.inner.dropped_write_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_discarded(&self, count: u64) {
        self.inner
            .discarded_on_shutdown
            .fetch_add(count, Ordering::Relaxed);
    }

    /// 全理由の破棄数合計
    pub fn dropped(&self) -> u64 {
        self.snapshot().dropped()
    }

    /// 現在値をコピーする
    pub fn snapshot(&self) -> SinkMetricsSnapshot {
        SinkMetricsSnapshot {
            submitted: self.inner.submitted.load(Ordering::Relaxed),
            written: self.inner.written.load(Ordering::Relaxed),
            retried: self.inner.retried.load(Ordering::Relaxed),
            dropped_queue_full: self.inner.dropped_queue_full.load(Ordering::Relaxed),
            dropped_write_failed: self.inner.dropped_write_failed.load(Ordering::Relaxed),
            discarded_on_shutdown: self.inner.discarded_on_shutdown.load(Ordering::Relaxed),
        }
    }
}

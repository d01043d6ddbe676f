//! リクエストコンテキストのキャプチャ
//!
//! 抽出（`extractor`）はリクエスト経路上で I/O なしに完了し、永続化は
//! `sink` のディスパッチタスクに委ねる。

/// 読み取り専用のフィールド抽出
pub mod extractor;

/// シンクのカウンタ
pub mod metrics;

/// 有界キューとディスパッチタスク
pub mod sink;

/// レコード・操作の型定義
pub mod types;

pub use extractor::{ContextExtractor, RequestView, ResponseView};
pub use metrics::{SinkMetrics, SinkMetricsSnapshot};
pub use sink::RecordSink;
pub use types::{CapturedRecord, FieldValue, SinkOperation, NO_BODY};

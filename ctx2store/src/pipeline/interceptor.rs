//! キャプチャステージ
//!
//! - キャプチャ無効: ボディをそのまま返す。
//! - キャプチャ有効: レスポンスヘッダ確定時にレコードを抽出し、元のボディを
//!   透過的なラッパーで包む。ストリーム終端または破棄時にちょうど1回
//!   レコードを送る。

use super::{Exchange, PipelineStage};
use crate::capture::{CapturedRecord, ContextExtractor, RecordSink};
use axum::body::{Body, Bytes};
use http_body::{Body as HttpBody, Frame, SizeHint};
use std::{
    pin::Pin,
    task::{Context, Poll},
};
use tracing::trace;

/// リクエストごとのキャプチャフェーズ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePhase {
    /// ルートフラグ未読
    Idle,
    /// レコード抽出中
    Capturing,
    /// ストリームを次のステージへ渡した
    Forwarded,
    /// レコードをシンクへ送った
    Dispatched,
}

impl CapturePhase {
    /// ログ用のフェーズ名
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Capturing => "capturing",
            Self::Forwarded => "forwarded",
            Self::Dispatched => "dispatched",
        }
    }
}

/// 出力パイプラインのキャプチャ要素
#[derive(Debug, Default, Clone, Copy)]
pub struct CaptureStage;

impl PipelineStage for CaptureStage {
    fn name(&self) -> &'static str {
        "save_ctx_2store"
    }

    fn process(&self, exchange: &Exchange, body: Body) -> Body {
        let path = exchange.uri.path();
        trace!(path = %path, phase = CapturePhase::Idle.as_str());

        let Some(sink) = exchange.route.as_ref().and_then(|route| route.sink()) else {
            trace!(path = %path, phase = CapturePhase::Forwarded.as_str(), "Capture disabled");
            return body;
        };

        trace!(path = %path, phase = CapturePhase::Capturing.as_str());
        let record = ContextExtractor::extract(&exchange.request_view(), &exchange.response_view());

        trace!(path = %path, phase = CapturePhase::Forwarded.as_str());
        Body::new(CaptureBody {
            inner: body,
            pending: Some(PendingRecord {
                record,
                sink: sink.clone(),
            }),
        })
    }
}

struct PendingRecord {
    record: CapturedRecord,
    sink: RecordSink,
}

/// 全フレームを手を加えずに転送するボディラッパー
struct CaptureBody {
    inner: Body,
    pending: Option<PendingRecord>,
}

impl CaptureBody {
    fn dispatch(&mut self) {
        if let Some(PendingRecord { record, sink }) = self.pending.take() {
            trace!(
                path = %record.uri,
                status = record.status,
                phase = CapturePhase::Dispatched.as_str()
            );
            sink.submit(record);
        }
    }
}

impl HttpBody for CaptureBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let poll = Pin::new(&mut self.inner).poll_frame(cx);
        if let Poll::Ready(None) = poll {
            self.dispatch();
        }
        poll
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }
}

impl Drop for CaptureBody {
    fn drop(&mut self) {
        self.dispatch();
    }
}

//! パイプラインミドルウェア
//!
//! ルートを引き、キャプチャ対象なら上限以下のリクエストボディをバッファして
//! そのまま下流へ再送する。レスポンスヘッダ確定後にパイプラインを実行する。

use super::{Exchange, Pipeline};
use crate::config::CaptureLimits;
use crate::scope::routes::RouteTable;
use axum::{
    body::{Body, BodyDataStream, Bytes},
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use futures::stream::{self, StreamExt};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{debug, trace};

/// [`pipeline_middleware`] の状態
#[derive(Debug, Clone)]
pub struct PipelineState {
    /// サーバーのルート表
    pub routes: RouteTable,
    /// 出力パイプライン
    pub pipeline: Pipeline,
    /// ボディバッファの上限
    pub limits: CaptureLimits,
}

/// 全レスポンスに出力パイプラインを適用するミドルウェア
pub async fn pipeline_middleware(
    State(state): State<PipelineState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let route = state.routes.lookup(request.uri().path());
    let capturing = route.as_ref().is_some_and(|route| route.capture_enabled());
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let (parts, body) = request.into_parts();
    let (body, request_body) = if capturing {
        buffer_body(&parts.headers, body, state.limits).await
    } else {
        (body, None)
    };

    let method = parts.method.clone();
    let uri = parts.uri.clone();
    let headers = parts.headers.clone();

    let response = next.run(Request::from_parts(parts, body)).await;
    let elapsed = start.elapsed();

    trace!(
        method = %method,
        path = %uri.path(),
        status = response.status().as_u16(),
        elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        capturing,
        "Response head ready"
    );

    let exchange = Exchange {
        method,
        uri,
        headers,
        peer,
        request_body,
        status: response.status(),
        elapsed,
        route,
    };

    let (parts, body) = response.into_parts();
    let body = state.pipeline.run(&exchange, body);
    Response::from_parts(parts, body)
}

/// 宣言長が上限以下のボディをバッファする
///
/// 下流へ渡すボディと、記録用のバイト列を返す。宣言長を超えるボディは
/// 読み取り済みの先頭部分と残りをつなぎ直して転送し、記録はしない。
/// キャプチャ経路からリクエストを拒否することはない。
async fn buffer_body(
    headers: &HeaderMap,
    body: Body,
    limits: CaptureLimits,
) -> (Body, Option<Bytes>) {
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<usize>().ok());

    let Some(length) = declared.filter(|length| *length <= limits.max_body_bytes) else {
        trace!(declared = ?declared, "Request body is streamed, not recorded");
        return (body, None);
    };

    let mut rest = body.into_data_stream();
    let mut buffered: Vec<u8> = Vec::with_capacity(length);
    loop {
        match rest.next().await {
            Some(Ok(chunk)) => {
                buffered.extend_from_slice(&chunk);
                if buffered.len() > length {
                    debug!(
                        declared = length,
                        "Request body exceeds its declared length, streaming unrecorded"
                    );
                    return (replay(Bytes::from(buffered), Ok(rest)), None);
                }
            }
            Some(Err(e)) => {
                debug!(declared = length, "Failed to read request body: {}", e);
                return (replay(Bytes::from(buffered), Err(e)), None);
            }
            None => {
                let bytes = Bytes::from(buffered);
                return (Body::from(bytes.clone()), Some(bytes));
            }
        }
    }
}

/// 読み取り済みの先頭部分に、未読の残り（または読み取りエラー）をつなぐ
fn replay(prefix: Bytes, rest: Result<BodyDataStream, axum::Error>) -> Body {
    let head = stream::iter([Ok::<_, axum::Error>(prefix)]);
    match rest {
        Ok(rest) => Body::from_stream(head.chain(rest)),
        Err(e) => Body::from_stream(head.chain(stream::iter([Err(e)]))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::RecordSink;
    use crate::config::SinkConfig;
    use crate::pipeline::CaptureStage;
    use crate::scope::routes::RouteSettings;
    use crate::store::test_utils::RecordingBackend;
    use axum::http::StatusCode;
    use axum::{middleware, routing::post, Router};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(sink: &RecordSink, limits: CaptureLimits) -> Router {
        let state = PipelineState {
            routes: RouteTable::new([RouteSettings::capturing("/echo", sink.clone())]),
            pipeline: Pipeline::new().with_stage(CaptureStage),
            limits,
        };
        Router::new()
            .route("/echo", post(|body: Bytes| async move { body }))
            .layer(middleware::from_fn_with_state(state, pipeline_middleware))
    }

    async fn written(backend: &RecordingBackend, expected: usize) -> Vec<crate::capture::SinkOperation> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let ops = backend.written();
                if ops.len() >= expected {
                    return ops;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_buffered_body_is_replayed_and_recorded() {
        let backend = Arc::new(RecordingBackend::default());
        let sink = RecordSink::new("test", backend.clone(), SinkConfig::default());
        let peer: SocketAddr = "192.0.2.10:40000".parse().unwrap();

        let mut request = Request::post("/echo?x=1")
            .header(header::CONTENT_LENGTH, "11")
            .body(Body::from("hello world"))
            .unwrap();
        request.extensions_mut().insert(ConnectInfo(peer));

        let response = app(&sink, CaptureLimits::default())
            .oneshot(request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"hello world");

        let ops = written(&backend, 1).await;
        assert_eq!(ops[0].text("request_body"), Some("hello world"));
        assert_eq!(ops[0].text("query_string"), Some("x=1"));
        assert_eq!(ops[0].text("remote_addr"), Some("192.0.2.10"));
        sink.shutdown().await;
    }

    #[tokio::test]
    async fn test_oversized_body_is_streamed_unrecorded() {
        let backend = Arc::new(RecordingBackend::default());
        let sink = RecordSink::new("test", backend.clone(), SinkConfig::default());
        let limits = CaptureLimits { max_body_bytes: 4 };

        let request = Request::post("/echo")
            .header(header::CONTENT_LENGTH, "11")
            .body(Body::from("hello world"))
            .unwrap();
        let response = app(&sink, limits).oneshot(request).await.unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"hello world");

        let ops = written(&backend, 1).await;
        assert_eq!(ops[0].text("request_body"), Some("No body"));
        sink.shutdown().await;
    }

    #[tokio::test]
    async fn test_body_longer_than_declared_passes_through_unrecorded() {
        let backend = Arc::new(RecordingBackend::default());
        let sink = RecordSink::new("test", backend.clone(), SinkConfig::default());
        let request = || {
            Request::post("/echo")
                .header(header::CONTENT_LENGTH, "2")
                .body(Body::from("hello world"))
                .unwrap()
        };

        let plain = Router::new().route("/echo", post(|body: Bytes| async move { body }));
        let expected = plain.oneshot(request()).await.unwrap();
        let expected_status = expected.status();
        let expected_bytes = axum::body::to_bytes(expected.into_body(), usize::MAX)
            .await
            .unwrap();

        let response = app(&sink, CaptureLimits::default())
            .oneshot(request())
            .await
            .unwrap();
        assert_eq!(response.status(), expected_status);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(bytes, expected_bytes);
        assert_eq!(&bytes[..], b"hello world");

        let ops = written(&backend, 1).await;
        assert_eq!(ops[0].text("request_body"), Some("No body"));
        sink.shutdown().await;
    }

    #[tokio::test]
    async fn test_body_shorter_than_declared_is_recorded_as_read() {
        let backend = Arc::new(RecordingBackend::default());
        let sink = RecordSink::new("test", backend.clone(), SinkConfig::default());

        let request = Request::post("/echo")
            .header(header::CONTENT_LENGTH, "20")
            .body(Body::from("short"))
            .unwrap();
        let response = app(&sink, CaptureLimits::default())
            .oneshot(request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"short");

        let ops = written(&backend, 1).await;
        assert_eq!(ops[0].text("request_body"), Some("short"));
        sink.shutdown().await;
    }
}

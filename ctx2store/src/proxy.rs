//! アップストリームへのリバースプロキシ
//!
//! リクエストを upstream に転送し、レスポンスはストリームのまま返す。

use crate::common::error::Ctx2StoreError;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use futures::TryStreamExt;
use std::io;
use tracing::warn;
use url::Url;

/// どちら向きにも転送しないヘッダ
const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    header::HOST,
    header::PROXY_AUTHENTICATE,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// サーバースコープの転送先
#[derive(Debug, Clone)]
pub struct ProxyState {
    client: reqwest::Client,
    upstream: Url,
}

impl ProxyState {
    /// 共有クライアントで `upstream` へ転送する
    pub fn new(client: reqwest::Client, upstream: Url) -> Self {
        Self { client, upstream }
    }

    /// リクエストURIに対応するアップストリームURL
    pub fn target(&self, uri: &Uri) -> Url {
        let mut url = self.upstream.clone();
        let base = self.upstream.path().trim_end_matches('/');
        url.set_path(&format!("{}{}", base, uri.path()));
        url.set_query(uri.query());
        url
    }
}

/// 全リクエストをアップストリームへ転送するフォールバックハンドラ
pub async fn proxy_handler(State(state): State<ProxyState>, request: Request) -> Response {
    match forward(&state, request).await {
        Ok(response) => response,
        Err(e) => {
            warn!(upstream = %state.upstream, "Upstream request failed: {}", e);
            (StatusCode::BAD_GATEWAY, "upstream unavailable").into_response()
        }
    }
}

async fn forward(state: &ProxyState, request: Request) -> Result<Response, Ctx2StoreError> {
    let (parts, body) = request.into_parts();
    let target = state.target(&parts.uri);

    let body = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| Ctx2StoreError::Upstream(format!("failed to read request body: {}", e)))?;

    let response = state
        .client
        .request(parts.method, target)
        .headers(strip_hop_by_hop(&parts.headers))
        .body(body)
        .send()
        .await
        .map_err(|e| Ctx2StoreError::Upstream(e.to_string()))?;

    Ok(forward_streaming_response(response))
}

/// アップストリームのレスポンスをバッファせずにストリーム返却
fn forward_streaming_response(response: reqwest::Response) -> Response {
    let status = response.status();
    let headers = strip_hop_by_hop(response.headers());
    let stream = response.bytes_stream().map_err(io::Error::other);

    let mut axum_response = Response::new(Body::from_stream(stream));
    *axum_response.status_mut() = status;
    *axum_response.headers_mut() = headers;
    axum_response
}

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = headers.clone();
    for name in &HOP_BY_HOP {
        forwarded.remove(name);
    }
    forwarded.remove("keep-alive");
    forwarded.remove("proxy-connection");
    forwarded
}

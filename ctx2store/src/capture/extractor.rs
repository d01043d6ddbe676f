//! 処理中のリクエスト/レスポンスからの読み取り専用フィールド抽出

use super::types::{CapturedRecord, NO_BODY};
use crate::common::error::CaptureError;
use crate::common::ip::split_peer;
use axum::http::{header, HeaderMap, HeaderName, Method, StatusCode, Uri};
use chrono::Utc;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::trace;

/// リクエスト側の借用ビュー
#[derive(Debug, Clone, Copy)]
pub struct RequestView<'a> {
    /// HTTPメソッド
    pub method: &'a Method,
    /// リクエストURI
    pub uri: &'a Uri,
    /// リクエストヘッダ
    pub headers: &'a HeaderMap,
    /// クライアントアドレス（リスナーが提供した場合）
    pub peer: Option<SocketAddr>,
    /// バッファ済みリクエストボディ（ストリーム転送した場合は `None`）
    pub body: Option<&'a [u8]>,
}

/// 確定したレスポンスヘッダのビュー
#[derive(Debug, Clone, Copy)]
pub struct ResponseView {
    /// HTTPステータスコード
    pub status: StatusCode,
    /// リクエスト到着からレスポンスヘッダ確定までの時間
    pub elapsed: Duration,
}

/// リクエスト/レスポンスのビューから [`CapturedRecord`] を組み立てる
#[derive(Debug, Default, Clone, Copy)]
pub struct ContextExtractor;

impl ContextExtractor {
    /// 全フィールドを抽出する。欠落・デコード不能な値は既定値になる。
    pub fn extract(request: &RequestView<'_>, response: &ResponseView) -> CapturedRecord {
        let (remote_address, remote_port) = match request.peer {
            Some(peer) => split_peer(&peer),
            None => {
                trace!(error = %CaptureError::MissingPeer, "Using empty remote address");
                (String::new(), 0)
            }
        };

        CapturedRecord {
            referer: header_text(request.headers, header::REFERER, "referer"),
            method: request.method.as_str().to_string(),
            uri: request.uri.path().to_string(),
            authorization: header_text(request.headers, header::AUTHORIZATION, "authorization"),
            user_agent: header_text(request.headers, header::USER_AGENT, "user-agent"),
            remote_address,
            remote_port,
            query: request.uri.query().unwrap_or_default().to_string(),
            request_body: body_text(request.body),
            status: response.status.as_u16(),
            response_time_ms: u64::try_from(response.elapsed.as_millis()).unwrap_or(u64::MAX),
            captured_at: Utc::now(),
        }
    }
}

fn header_text(headers: &HeaderMap, name: HeaderName, label: &'static str) -> String {
    let Some(value) = headers.get(&name) else {
        return String::new();
    };
    match value.to_str() {
        Ok(text) => text.to_string(),
        Err(_) => {
            trace!(error = %CaptureError::NonUtf8Header(label), "Decoding header lossily");
            String::from_utf8_lossy(value.as_bytes()).into_owned()
        }
    }
}

fn body_text(body: Option<&[u8]>) -> String {
    match body {
        None => NO_BODY.to_string(),
        Some(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => text.to_string(),
            Err(_) => {
                trace!(error = %CaptureError::NonUtf8Body, "Decoding body lossily");
                String::from_utf8_lossy(bytes).into_owned()
            }
        },
    }
}

//! 出力パイプライン
//!
//! ホストが所有する順序付きステージ列。各ステージはレスポンスボディを受け取り、
//! 次のステージへ渡すボディを返す。どの位置にも挿入できる。

/// キャプチャステージ
pub mod interceptor;

/// パイプラインを駆動する axum ミドルウェア
pub mod middleware;

use crate::capture::{RequestView, ResponseView};
use crate::scope::routes::RouteSettings;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

pub use interceptor::CaptureStage;
pub use middleware::{pipeline_middleware, PipelineState};

/// 各ステージに渡す、1回のリクエスト/レスポンスのスナップショット
#[derive(Debug, Clone)]
pub struct Exchange {
    /// HTTPメソッド
    pub method: Method,
    /// リクエストURI
    pub uri: Uri,
    /// リクエストヘッダ
    pub headers: HeaderMap,
    /// クライアントアドレス
    pub peer: Option<SocketAddr>,
    /// 再送可能だった場合のバッファ済みリクエストボディ
    pub request_body: Option<Bytes>,
    /// HTTPステータスコード
    pub status: StatusCode,
    /// レスポンスヘッダ確定までの時間
    pub elapsed: Duration,
    /// 一致したルート
    pub route: Option<Arc<RouteSettings>>,
}

impl Exchange {
    /// 抽出用のリクエスト側ビュー
    pub fn request_view(&self) -> RequestView<'_> {
        RequestView {
            method: &self.method,
            uri: &self.uri,
            headers: &self.headers,
            peer: self.peer,
            body: self.request_body.as_deref(),
        }
    }

    /// 抽出用のレスポンス側ビュー
    pub fn response_view(&self) -> ResponseView {
        ResponseView {
            status: self.status,
            elapsed: self.elapsed,
        }
    }
}

/// 出力パイプラインの1要素
pub trait PipelineStage: Send + Sync {
    /// ログ用のステージ名
    fn name(&self) -> &'static str;

    /// 前段からボディを受け取り、次段へ渡すボディを返す
    fn process(&self, exchange: &Exchange, body: Body) -> Body;
}

/// 順序付きステージ列
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Arc<Vec<Arc<dyn PipelineStage>>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.stage_names()).finish()
    }
}

impl Pipeline {
    /// 空のパイプライン
    pub fn new() -> Self {
        Self::default()
    }

    /// 既存ステージの後ろに追加する
    pub fn with_stage(mut self, stage: impl PipelineStage + 'static) -> Self {
        Arc::make_mut(&mut self.stages).push(Arc::new(stage));
        self
    }

    /// 順序どおりのステージ名
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// ステージ数
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// ステージがなければtrue
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// 全ステージを順に実行する
    pub fn run(&self, exchange: &Exchange, body: Body) -> Body {
        self.stages
            .iter()
            .fold(body, |body, stage| stage.process(exchange, body))
    }
}

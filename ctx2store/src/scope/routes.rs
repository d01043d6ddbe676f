//! 解決済み設定の実行時ビュー
//!
//! 各サーバースコープは検証済み [`StoreConnection`] と、それに紐づく
//! [`RecordSink`] を高々1つずつ持つ。ルートはキャプチャ有効時のみシンクを持つので、
//! リクエスト経路でディレクティブツリーを読み直すことはない。

use super::tree::{ResolvedConfig, ResolvedServer};
use crate::capture::{RecordSink, SinkMetricsSnapshot};
use crate::common::error::ConfigResult;
use crate::config::SinkConfig;
use crate::store::{StoreConnection, StoreDriver};
use std::sync::Arc;
use tracing::info;

/// ルート1つの実効設定
#[derive(Debug, Clone)]
pub struct RouteSettings {
    path: String,
    sink: Option<RecordSink>,
}

impl RouteSettings {
    /// キャプチャ無効のルート
    pub fn passthrough(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            sink: None,
        }
    }

    /// `sink` にレコードを送るルート
    pub fn capturing(path: impl Into<String>, sink: RecordSink) -> Self {
        Self {
            path: path.into(),
            sink: Some(sink),
        }
    }

    /// パスプレフィックス
    pub fn path(&self) -> &str {
        &self.path
    }

    /// 実効キャプチャフラグ
    pub fn capture_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// キャプチャ時のシンク
    pub fn sink(&self) -> Option<&RecordSink> {
        self.sink.as_ref()
    }
}

/// 最長プレフィックス一致のルート表
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Arc<RouteSettings>>,
}

impl RouteTable {
    /// ルート表を作る（順序は問わない）
    pub fn new(routes: impl IntoIterator<Item = RouteSettings>) -> Self {
        let mut routes: Vec<Arc<RouteSettings>> = routes.into_iter().map(Arc::new).collect();
        routes.sort_by(|a, b| b.path.len().cmp(&a.path.len()));
        Self { routes }
    }

    /// `path` に一致する最も具体的なルート
    pub fn lookup(&self, path: &str) -> Option<Arc<RouteSettings>> {
        self.routes
            .iter()
            .find(|route| path.starts_with(route.path.as_str()))
            .cloned()
    }

    /// ルート数
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// ルートがなければtrue
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// 配信準備が整ったサーバースコープ
#[derive(Debug)]
pub struct ServerScope {
    server: ResolvedServer,
    connection: Option<StoreConnection>,
    sink: Option<RecordSink>,
    routes: RouteTable,
}

impl ServerScope {
    /// サーバーの接続文字列を検証し、シンクを起動する
    ///
    /// 設定されていれば必ず検証する。未設定のサーバーは接続を持たず、
    /// 全ルートが素通しになる。
    pub fn connect(
        server: ResolvedServer,
        driver: &dyn StoreDriver,
        config: SinkConfig,
    ) -> ConfigResult<Self> {
        let connection = if server.has_connection() {
            Some(StoreConnection::validate(
                &server.name,
                server.connection(),
                driver,
            )?)
        } else {
            None
        };

        let sink = connection
            .as_ref()
            .map(|conn| RecordSink::new(&server.name, conn.handle().backend(), config));

        let routes = RouteTable::new(server.routes.iter().map(|route| {
            match (&sink, route.capture_enabled()) {
                (Some(sink), true) => RouteSettings::capturing(&route.path, sink.clone()),
                _ => RouteSettings::passthrough(&route.path),
            }
        }));

        info!(
            server = %server.name,
            listen = %server.listen,
            upstream = %server.upstream,
            routes = routes.len(),
            capturing = server.capturing_routes().count(),
            "Server scope ready"
        );

        Ok(Self {
            server,
            connection,
            sink,
            routes,
        })
    }

    /// 解決済みサーバーブロック
    pub fn server(&self) -> &ResolvedServer {
        &self.server
    }

    /// 検証済みストア接続
    pub fn connection(&self) -> Option<&StoreConnection> {
        self.connection.as_ref()
    }

    /// サーバーのシンク
    pub fn sink(&self) -> Option<&RecordSink> {
        self.sink.as_ref()
    }

    /// ルート表
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// 現在のシンクカウンタ（シンクがなければゼロ）
    pub fn metrics(&self) -> SinkMetricsSnapshot {
        self.sink
            .as_ref()
            .map(|sink| sink.metrics().snapshot())
            .unwrap_or_default()
    }

    /// シンクを書き出して停止する
    pub async fn shutdown(&self) {
        if let Some(sink) = &self.sink {
            sink.shutdown().await;
        }
    }
}

/// 全サーバースコープを接続する。1つでも失敗すればロード全体を中断する。
pub fn connect_all(
    config: ResolvedConfig,
    driver: &dyn StoreDriver,
    sink_config: SinkConfig,
) -> ConfigResult<Vec<ServerScope>> {
    let mut scopes = Vec::with_capacity(config.servers.len());
    for server in config.servers {
        scopes.push(ServerScope::connect(server, driver, sink_config)?);
    }
    Ok(scopes)
}

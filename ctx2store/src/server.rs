//! ホストサーバー
//!
//! サーバースコープごとに axum リスナーを1つ立て、キャプチャパイプライン付きで
//! アップストリームへ転送する。グレースフルシャットダウン後に各シンクの
//! キューを書き出す。

use crate::capture::{SinkMetrics, SinkMetricsSnapshot};
use crate::common::error::{ConfigResult, Ctx2StoreError};
use crate::config::{CaptureLimits, SinkConfig};
use crate::pipeline::{pipeline_middleware, Pipeline, PipelineState};
use crate::proxy::{proxy_handler, ProxyState};
use crate::scope::routes::{connect_all, ServerScope};
use crate::scope::tree::ConfigFile;
use crate::shutdown::ShutdownController;
use crate::store::StoreDriver;
use axum::{extract::State, middleware, routing::get, Json, Router};
use std::net::SocketAddr;
use std::path::Path;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// 全リスナーで提供するメトリクスエンドポイント（キャプチャ対象外）
pub const METRICS_PATH: &str = "/_ctx2store/metrics";

/// 設定ファイルを読み込み、解決して接続する。エラー時はロードを中断する。
pub fn load(
    path: &Path,
    driver: &dyn StoreDriver,
    sink_config: SinkConfig,
) -> ConfigResult<Vec<ServerScope>> {
    let config = ConfigFile::load(path)?.resolve()?;
    info!(path = %path.display(), servers = config.servers.len(), "Configuration loaded");
    connect_all(config, driver, sink_config)
}

/// サーバースコープ1つ分のルーター
pub fn build_router(
    scope: &ServerScope,
    pipeline: Pipeline,
    limits: CaptureLimits,
    client: reqwest::Client,
) -> Router {
    let proxy = ProxyState::new(client, scope.server().upstream.clone());
    let capture = PipelineState {
        routes: scope.routes().clone(),
        pipeline,
        limits,
    };
    let metrics = scope.sink().map(|sink| sink.metrics().clone());

    Router::new()
        .fallback(proxy_handler)
        .with_state(proxy)
        .layer(middleware::from_fn_with_state(capture, pipeline_middleware))
        .route(METRICS_PATH, get(metrics_handler).with_state(metrics))
        .layer(TraceLayer::new_for_http())
}

async fn metrics_handler(State(metrics): State<Option<SinkMetrics>>) -> Json<SinkMetricsSnapshot> {
    Json(metrics.map(|m| m.snapshot()).unwrap_or_default())
}

/// サーバースコープごとに順にリスナーをバインドする
pub async fn bind(scopes: &[ServerScope]) -> Result<Vec<TcpListener>, Ctx2StoreError> {
    let mut listeners = Vec::with_capacity(scopes.len());
    for scope in scopes {
        listeners.push(TcpListener::bind(scope.server().listen).await?);
    }
    Ok(listeners)
}

/// バインド済みリスナーでシャットダウンまで配信し、その後全シンクを書き出す
pub async fn serve_on(
    scopes: Vec<ServerScope>,
    listeners: Vec<TcpListener>,
    pipeline: Pipeline,
    limits: CaptureLimits,
    shutdown: ShutdownController,
) -> Result<(), Ctx2StoreError> {
    let client = reqwest::Client::new();

    let mut servers = Vec::with_capacity(listeners.len());
    for (scope, listener) in scopes.iter().zip(listeners) {
        let app = build_router(scope, pipeline.clone(), limits, client.clone());
        let signal = shutdown.clone();
        info!(
            server = %scope.server().name,
            addr = %listener.local_addr()?,
            pipeline = ?pipeline,
            "Listening"
        );
        servers.push(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { signal.wait().await })
            .await
        });
    }

    let result = futures::future::try_join_all(servers).await;
    shutdown.request_shutdown();

    for scope in &scopes {
        scope.shutdown().await;
    }
    let snapshots: Vec<SinkMetricsSnapshot> = scopes.iter().map(ServerScope::metrics).collect();
    let total = SinkMetricsSnapshot::total(&snapshots);
    info!(
        submitted = total.submitted,
        written = total.written,
        dropped = total.dropped(),
        "Server shutdown complete"
    );

    result?;
    Ok(())
}

/// バインドして配信する。OSシグナルでグレースフルシャットダウン。
pub async fn serve(
    scopes: Vec<ServerScope>,
    pipeline: Pipeline,
    limits: CaptureLimits,
) -> Result<(), Ctx2StoreError> {
    let listeners = bind(&scopes).await?;
    let shutdown = ShutdownController::default();
    tokio::spawn(shutdown_signal(shutdown.clone()));
    serve_on(scopes, listeners, pipeline, limits, shutdown).await
}

/// シャットダウンシグナルを待機し、コントローラに伝える
async fn shutdown_signal(shutdown: ShutdownController) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
        _ = shutdown.wait() => {
            info!("Shutdown requested, shutting down...");
        }
    }
    shutdown.request_shutdown();
}

use ctx2store::common::error::Ctx2StoreError;
use ctx2store::config::CaptureLimits;
use ctx2store::pipeline::{CaptureStage, Pipeline};
use ctx2store::scope::routes::{connect_all, ServerScope};
use ctx2store::scope::tree::ConfigFile;
use ctx2store::server;
use ctx2store::shutdown::ShutdownController;
use ctx2store::store::StoreDriver;
use std::net::SocketAddr;
use tokio::task::JoinHandle;

use super::store::fast_sink_config;

/// 設定YAMLから起動したキャプチャプロキシ（サーバー1つ）
pub struct TestProxy {
    addr: SocketAddr,
    shutdown: ShutdownController,
    handle: JoinHandle<Result<(), Ctx2StoreError>>,
}

#[allow(dead_code)]
impl TestProxy {
    /// `listen` は 127.0.0.1:0 にしておくこと
    pub async fn spawn(yaml: &str, driver: &dyn StoreDriver) -> Self {
        let config = ConfigFile::from_yaml(yaml)
            .expect("invalid yaml")
            .resolve()
            .expect("invalid config");
        let scopes: Vec<ServerScope> =
            connect_all(config, driver, fast_sink_config()).expect("connect failed");
        let listeners = server::bind(&scopes).await.expect("bind failed");
        let addr = listeners[0].local_addr().expect("no local addr");

        let shutdown = ShutdownController::default();
        let handle = tokio::spawn(server::serve_on(
            scopes,
            listeners,
            Pipeline::new().with_stage(CaptureStage),
            CaptureLimits::default(),
            shutdown.clone(),
        ));

        Self {
            addr,
            shutdown,
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// グレースフルシャットダウン（シンクのドレインまで待つ）
    pub async fn stop(self) {
        self.shutdown.request_shutdown();
        self.handle
            .await
            .expect("server task panicked")
            .expect("server failed");
    }
}

/// 上流URLを差し込んだ1サーバー構成
#[allow(dead_code)]
pub fn single_server_yaml(upstream: &str, server_directives: &str, locations: &str) -> String {
    format!(
        r#"
servers:
  - name: localhost
    listen: 127.0.0.1:0
    upstream: {upstream}
    directives: {server_directives}
    locations:
{locations}
"#
    )
}

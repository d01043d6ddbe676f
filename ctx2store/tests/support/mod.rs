//! 統合テスト共通ユーティリティ

pub mod proxy;
pub mod store;

use std::time::Duration;

/// 条件が満たされるまでポーリングする（最大5秒）
#[allow(dead_code)]
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

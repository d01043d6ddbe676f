//! ロギング初期化ユーティリティ
//!
//! - フィルタ: `CTX2STORE_LOG_LEVEL`、なければ `RUST_LOG`、既定は `info`
//! - 出力: 標準出力、`CTX2STORE_LOG_DIR` があれば日次ローテーションのファイルにも

use crate::config::{get_env, get_env_or};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_LOG_FILTER: &str = "info,sqlx=warn,hyper=warn,tower_http=info";
const LOG_FILE_PREFIX: &str = "ctx2store.log";

/// Filter directive string from the environment
pub fn filter_directive() -> String {
    get_env("CTX2STORE_LOG_LEVEL")
        .unwrap_or_else(|| get_env_or("RUST_LOG", DEFAULT_LOG_FILTER))
}

fn build_filter() -> EnvFilter {
    let directive = filter_directive();
    EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Install the global subscriber.
///
/// Returns the file writer guard when file output is enabled; keep it alive
/// until exit or buffered lines are lost.
pub fn init() -> anyhow::Result<Option<WorkerGuard>> {
    let stdout_layer = fmt::layer().with_target(true);

    let (file_layer, guard) = match get_env("CTX2STORE_LOG_DIR") {
        Some(dir) => {
            std::fs::create_dir_all(&dir)?;
            let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(build_filter())
        .with(stdout_layer)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}

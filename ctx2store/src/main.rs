//! ctx2store Entry Point

use anyhow::Context;
use clap::Parser;
use ctx2store::cli::{Cli, Commands};
use ctx2store::config::{CaptureLimits, SinkConfig};
use ctx2store::pipeline::{CaptureStage, Pipeline};
use ctx2store::store::sql::SqlDriver;
use ctx2store::{logging, server};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = logging::init().context("failed to initialize logging")?;

    let driver = SqlDriver::default();
    let sink_config = SinkConfig::from_env();

    match cli.command {
        Commands::Serve(args) => {
            let scopes = server::load(&args.config, &driver, sink_config)
                .with_context(|| format!("invalid configuration {}", args.config.display()))?;
            let pipeline = Pipeline::new().with_stage(CaptureStage);
            server::serve(scopes, pipeline, CaptureLimits::from_env()).await?;
        }
        Commands::Check(args) => {
            let scopes = server::load(&args.config, &driver, sink_config)
                .with_context(|| format!("invalid configuration {}", args.config.display()))?;
            for scope in &scopes {
                let server = scope.server();
                info!(
                    server = %server.name,
                    listen = %server.listen,
                    upstream = %server.upstream,
                    store = ?scope.connection().map(|c| c.descriptor().to_string()),
                    capturing = server.capturing_routes().count(),
                    "Server scope OK"
                );
                scope.shutdown().await;
            }
            println!("configuration OK: {} server(s)", scopes.len());
        }
    }

    Ok(())
}

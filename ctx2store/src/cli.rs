//! CLI module for ctx2store
//!
//! `serve` runs the capturing proxy, `check` only validates the config.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Request context capture proxy
#[derive(Parser, Debug)]
#[command(name = "ctx2store")]
#[command(version, about, long_about = None)]
#[command(after_help = r#"ENVIRONMENT VARIABLES:
    CTX2STORE_CONFIG                Config file path
    CTX2STORE_LOG_LEVEL             Log filter (default: info, falls back to RUST_LOG)
    CTX2STORE_LOG_DIR               Directory for daily rolling log files
    CTX2STORE_QUEUE_CAPACITY        Record queue capacity per store (default: 1024)
    CTX2STORE_RETRY_ATTEMPTS        Write attempts per record (default: 3)
    CTX2STORE_RETRY_BACKOFF_MS      First retry backoff (default: 100)
    CTX2STORE_WRITE_TIMEOUT_MS      Timeout of one write (default: 5000)
    CTX2STORE_SHUTDOWN_GRACE_SECS   Queue drain period on shutdown (default: 5)
    CTX2STORE_MAX_BODY_BYTES        Largest request body recorded (default: 65536)
"#)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the capturing proxy
    Serve(ConfigArgs),
    /// Load and validate the configuration, then exit
    Check(ConfigArgs),
}

/// Arguments shared by both subcommands
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Config file (YAML)
    #[arg(short, long, env = "CTX2STORE_CONFIG")]
    pub config: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_serve() {
        let cli = Cli::try_parse_from(["ctx2store", "serve", "--config", "ctx.yaml"]).unwrap();
        match cli.command {
            Commands::Serve(args) => assert_eq!(args.config, PathBuf::from("ctx.yaml")),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_check_short_flag() {
        let cli = Cli::try_parse_from(["ctx2store", "check", "-c", "ctx.yaml"]).unwrap();
        assert!(matches!(cli.command, Commands::Check(_)));
    }
}

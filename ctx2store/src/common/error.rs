//! エラー型定義
//!
//! 統一エラー型（thiserror使用）
//!
//! - `ConfigError`: 設定ロード時のみ発生する致命的エラー。起動/リロードを中断する。
//! - `CaptureError`: 抽出時の非致命エラー。既定値で解決され、リクエスト経路には出ない。
//! - `PersistenceError`: 書き込み失敗。リトライ後に破棄され、カウンタに計上される。

use std::time::Duration;
use thiserror::Error;

/// Configuration load error (fatal)
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Directive name is not known
    #[error("unknown directive \"{0}\"")]
    UnknownDirective(String),

    /// Directive used in a scope that does not accept it
    #[error("\"{directive}\" directive is not allowed in {scope} scope")]
    MisplacedDirective {
        /// Directive name
        directive: &'static str,
        /// Scope kind name
        scope: &'static str,
    },

    /// Directive given more than once in the same scope
    #[error("\"{0}\" directive is duplicate")]
    DuplicateDirective(&'static str),

    /// Wrong number of arguments
    #[error("invalid number of arguments in \"{directive}\" directive: expected {expected}, got {got}")]
    InvalidArguments {
        /// Directive name
        directive: &'static str,
        /// Human readable expectation
        expected: &'static str,
        /// Actual argument count
        got: usize,
    },

    /// Flag argument other than on/off
    #[error("invalid value \"{value}\" in \"{directive}\" directive, it must be \"on\" or \"off\"")]
    InvalidFlag {
        /// Directive name
        directive: &'static str,
        /// Given value
        value: String,
    },

    /// Descriptor resolved to the "no connection configured" sentinel
    #[error("no connection string set for server \"{server}\"")]
    NoConnectionString {
        /// Server scope name
        server: String,
    },

    /// Capture enabled under a server without a connection target
    #[error("capture is enabled for location \"{route}\" in server \"{server}\" but no connection string is set")]
    CaptureWithoutConnection {
        /// Server scope name
        server: String,
        /// Route path
        route: String,
    },

    /// Descriptor could not be parsed
    #[error("invalid connection string \"{descriptor}\": {reason}")]
    InvalidDescriptor {
        /// Redacted descriptor
        descriptor: String,
        /// Parse failure reason
        reason: String,
    },

    /// Descriptor scheme has no backend
    #[error("unsupported store scheme \"{0}\"")]
    UnsupportedScheme(String),

    /// Store driver refused the descriptor
    #[error("store driver error: {0}")]
    Driver(String),

    /// Nested location path does not extend its parent
    #[error("location \"{path}\" is outside location \"{parent}\"")]
    NestedLocation {
        /// Enclosing location path
        parent: String,
        /// Offending nested path
        path: String,
    },

    /// 同じサーバー内で同じパスの location が複数ある
    #[error("duplicate location \"{path}\" in server \"{server}\"")]
    DuplicateLocation {
        /// Server scope name
        server: String,
        /// Repeated path
        path: String,
    },

    /// Server block value (listen/upstream) is invalid
    #[error("invalid {field} \"{value}\" in server \"{server}\"")]
    InvalidServer {
        /// Server scope name
        server: String,
        /// Field name
        field: &'static str,
        /// Given value
        value: String,
    },

    /// Config file could not be read
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// File path
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Config file could not be parsed
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Field extraction failure (non-fatal, resolved to defaults)
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Header value is not valid UTF-8
    #[error("header \"{0}\" is not valid UTF-8")]
    NonUtf8Header(&'static str),

    /// Request body is not valid UTF-8
    #[error("request body is not valid UTF-8")]
    NonUtf8Body,

    /// Peer address unavailable
    #[error("peer address is unavailable")]
    MissingPeer,
}

/// Backend write failure (non-fatal for requests)
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Backend rejected or failed the write
    #[error("store write failed: {0}")]
    Write(String),

    /// Write did not complete in time
    #[error("store write timed out after {0:?}")]
    Timeout(Duration),
}

impl From<sqlx::Error> for PersistenceError {
    fn from(err: sqlx::Error) -> Self {
        Self::Write(err.to_string())
    }
}

/// Top-level error for the host process
#[derive(Debug, Error)]
pub enum Ctx2StoreError {
    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Listener / IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Upstream HTTP error
    #[error("upstream error: {0}")]
    Upstream(String),
}

/// Result alias for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

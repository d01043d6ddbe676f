//! ストア接続層
//!
//! 接続文字列の検証と、サーバースコープごとのストアハンドルを管理する。
//! 実際の書き込みは `StoreBackend` に委譲し、コアは書き込み構文を組み立てない。

/// sqlx ベースの SQL バックエンド
pub mod sql;

use crate::capture::types::SinkOperation;
use crate::common::error::{ConfigError, ConfigResult, PersistenceError};
use crate::scope::NO_CONNECTION_STRING;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info};
use url::Url;
use uuid::Uuid;

/// 接続文字列のスキームで決まるバックエンド種別
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreScheme {
    /// MySQL / MariaDB
    MySql,
}

impl StoreScheme {
    /// URLスキームから種別を得る
    pub fn from_scheme(scheme: &str) -> ConfigResult<Self> {
        match scheme {
            "mysql" | "mariadb" => Ok(Self::MySql),
            other => Err(ConfigError::UnsupportedScheme(other.to_string())),
        }
    }

    /// ポート省略時の既定ポート
    pub fn default_port(&self) -> u16 {
        match self {
            Self::MySql => 3306,
        }
    }
}

/// パース済みの `scheme://[user[:password]@]host[:port]/namespace`
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    raw: String,
    scheme: StoreScheme,
    host: String,
    port: u16,
    user: Option<String>,
    password: Option<String>,
    namespace: String,
}

impl ConnectionDescriptor {
    /// 接続文字列をパース・検証する
    pub fn parse(raw: &str) -> ConfigResult<Self> {
        let invalid = |reason: &str| ConfigError::InvalidDescriptor {
            descriptor: redact(raw),
            reason: reason.to_string(),
        };

        let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
        let scheme = StoreScheme::from_scheme(url.scheme())?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid("missing host"))?
            .to_string();
        let port = url.port().unwrap_or_else(|| scheme.default_port());

        let namespace = url.path().trim_start_matches('/');
        if namespace.is_empty() {
            return Err(invalid("missing namespace"));
        }
        if namespace.contains('/') {
            return Err(invalid("namespace must be a single path segment"));
        }

        let user = Some(url.username())
            .filter(|u| !u.is_empty())
            .map(str::to_string);

        Ok(Self {
            raw: raw.to_string(),
            scheme,
            host,
            port,
            user,
            password: url.password().map(str::to_string),
            namespace: namespace.to_string(),
        })
    }

    /// 元の接続文字列（認証情報を含む）
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// バックエンド種別
    pub fn scheme(&self) -> StoreScheme {
        self.scheme
    }

    /// ホスト名
    pub fn host(&self) -> &str {
        &self.host
    }

    /// ポート（明示値またはスキーム既定値）
    pub fn port(&self) -> u16 {
        self.port
    }

    /// ユーザー名
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// パスワード指定があればtrue
    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }

    /// 対象データベース（名前空間）
    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&redact(&self.raw))
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("scheme", &self.scheme)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

/// 接続文字列のパスワード部分を伏せる
pub fn redact(raw: &str) -> String {
    if let Ok(mut url) = Url::parse(raw) {
        if url.password().is_some() && url.set_password(Some("****")).is_ok() {
            return url.to_string();
        }
        return raw.to_string();
    }

    // パース不能な文字列でも userinfo のパスワードだけは伏せる
    let Some(start) = raw.find("://").map(|i| i + 3) else {
        return raw.to_string();
    };
    let Some(at) = raw[start..].find('@').map(|i| start + i) else {
        return raw.to_string();
    };
    match raw[start..at].find(':') {
        Some(colon) => format!("{}****{}", &raw[..start + colon + 1], &raw[at..]),
        None => raw.to_string(),
    }
}

/// 永続化バックエンド
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// 操作を1件永続化する
    async fn write(&self, operation: &SinkOperation) -> Result<(), PersistenceError>;
}

/// 接続文字列からバックエンドを準備するドライバ
pub trait StoreDriver: Send + Sync {
    /// バックエンドを準備する。ネットワークI/Oで待ってはならない。
    fn connect(&self, descriptor: &ConnectionDescriptor) -> ConfigResult<Arc<dyn StoreBackend>>;
}

/// 接続ハンドル（検証成功時にのみ得られる）
#[derive(Clone)]
pub struct StoreHandle {
    id: Uuid,
    backend: Arc<dyn StoreBackend>,
}

impl StoreHandle {
    /// ハンドルID
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// 共有バックエンド
    pub fn backend(&self) -> Arc<dyn StoreBackend> {
        Arc::clone(&self.backend)
    }
}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHandle").field("id", &self.id).finish()
    }
}

/// サーバースコープが所有する検証済みストア接続
#[derive(Debug)]
pub struct StoreConnection {
    descriptor: ConnectionDescriptor,
    handle: StoreHandle,
}

impl StoreConnection {
    /// 接続文字列をパースし、バックエンドを準備する
    ///
    /// 未設定を表す値は記述子としてパースできないため、ここでも失敗する。
    pub fn open(descriptor: &str, driver: &dyn StoreDriver) -> ConfigResult<Self> {
        let descriptor = ConnectionDescriptor::parse(descriptor)?;
        let backend = driver.connect(&descriptor)?;
        let handle = StoreHandle {
            id: Uuid::new_v4(),
            backend,
        };
        Ok(Self { descriptor, handle })
    }

    /// サーバースコープの実効接続文字列を検証する
    ///
    /// 未設定（"No connection string"）は常に失敗する。
    pub fn validate(
        server: &str,
        effective: &str,
        driver: &dyn StoreDriver,
    ) -> ConfigResult<Self> {
        if effective == NO_CONNECTION_STRING {
            error!(server = %server, "No connection string set");
            return Err(ConfigError::NoConnectionString {
                server: server.to_string(),
            });
        }

        let connection = Self::open(effective, driver)?;
        info!(
            server = %server,
            store = %connection.descriptor,
            handle = %connection.handle.id,
            "Store connection prepared"
        );
        Ok(connection)
    }

    /// 解決済み接続記述子
    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    /// 接続ハンドル
    pub fn handle(&self) -> &StoreHandle {
        &self.handle
    }
}

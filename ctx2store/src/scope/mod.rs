//! 階層キャプチャ設定
//!
//! スコープは2種類。接続文字列を持つ広域（server）スコープと、キャプチャ
//! フラグを持つ狭域（location）スコープ。各フィールドは明示的な [`Setting`] で、
//! [`merge`] はツリー解決時に親子の組ごとに1回だけ適用する純粋関数。

/// ディレクティブのパースと引数規則
pub mod directive;

/// 設定ファイルモデルとトップダウン解決
pub mod tree;

/// リクエスト経路で使うルートごとの実行時設定
pub mod routes;

use crate::common::error::{ConfigError, ConfigResult};
use directive::Directive;

/// 一度も接続文字列が設定されなかった広域スコープの実効値
pub const NO_CONNECTION_STRING: &str = "No connection string";

/// 明示的に設定されたか、継承される設定値
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Setting<T> {
    /// このスコープでは未設定
    Unset,
    /// このスコープで明示的に設定
    Value(T),
}

impl<T> Default for Setting<T> {
    fn default() -> Self {
        Self::Unset
    }
}

impl<T: Clone> Setting<T> {
    /// 明示的に設定されていればtrue
    pub fn is_set(&self) -> bool {
        matches!(self, Self::Value(_))
    }

    /// 設定済みなら自身の値、未設定なら親の値
    pub fn or_inherit(&self, parent: &Setting<T>) -> Setting<T> {
        match self {
            Self::Value(_) => self.clone(),
            Self::Unset => parent.clone(),
        }
    }

    /// 設定済みの値を借用する
    pub fn as_option(&self) -> Option<&T> {
        match self {
            Self::Value(v) => Some(v),
            Self::Unset => None,
        }
    }
}

/// [`ConfigNode`] のスコープ種別
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// 接続スコープ（main / server）
    Broad,
    /// ルートスコープ（location）
    Narrow,
}

impl ScopeKind {
    /// エラーメッセージ用のスコープ名
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Broad => "server",
            Self::Narrow => "location",
        }
    }
}

/// キャプチャ設定の1スコープ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigNode {
    kind: ScopeKind,
    connection: Setting<String>,
    capture: Setting<bool>,
}

impl ConfigNode {
    /// 空の広域スコープ
    pub fn broad() -> Self {
        Self {
            kind: ScopeKind::Broad,
            connection: Setting::Unset,
            capture: Setting::Unset,
        }
    }

    /// 空の狭域スコープ
    pub fn narrow() -> Self {
        Self {
            kind: ScopeKind::Narrow,
            connection: Setting::Unset,
            capture: Setting::Unset,
        }
    }

    /// スコープ種別
    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    /// 接続設定（マージ後は継承値を含む）
    pub fn connection(&self) -> &Setting<String> {
        &self.connection
    }

    /// キャプチャ設定（マージ後は継承値を含む）
    pub fn capture(&self) -> &Setting<bool> {
        &self.capture
    }

    /// ディレクティブをこのスコープに適用する
    ///
    /// スコープ種別に合わないディレクティブと、同一スコープ内での
    /// 重複指定は拒否する。
    pub fn apply(&mut self, directive: &Directive) -> ConfigResult<()> {
        match directive {
            Directive::Connection(value) => {
                self.expect_kind(ScopeKind::Broad, directive)?;
                if self.connection.is_set() {
                    return Err(ConfigError::DuplicateDirective(directive.name()));
                }
                self.connection = Setting::Value(value.clone());
            }
            Directive::Capture(enabled) => {
                self.expect_kind(ScopeKind::Narrow, directive)?;
                if self.capture.is_set() {
                    return Err(ConfigError::DuplicateDirective(directive.name()));
                }
                self.capture = Setting::Value(*enabled);
            }
        }
        Ok(())
    }

    /// ビルダー形式の [`ConfigNode::apply`]
    pub fn with(mut self, directive: Directive) -> ConfigResult<Self> {
        self.apply(&directive)?;
        Ok(self)
    }

    fn expect_kind(&self, kind: ScopeKind, directive: &Directive) -> ConfigResult<()> {
        if self.kind != kind {
            return Err(ConfigError::MisplacedDirective {
                directive: directive.name(),
                scope: self.kind.as_str(),
            });
        }
        Ok(())
    }

    /// 実効接続文字列。ツリーのどこでも設定されていなければ
    /// [`NO_CONNECTION_STRING`]。
    pub fn effective_connection(&self) -> &str {
        self.connection
            .as_option()
            .map(String::as_str)
            .unwrap_or(NO_CONNECTION_STRING)
    }

    /// 実効キャプチャフラグ（未設定はoff）
    pub fn capture_enabled(&self) -> bool {
        self.capture.as_option().copied().unwrap_or(false)
    }
}

/// マージ済みの親に子スコープをマージする
///
/// 各フィールドは子の明示値を優先し、なければ親の値を継承する。
/// スコープ種別は子のものを保つ。
pub fn merge(parent: &ConfigNode, child: &ConfigNode) -> ConfigNode {
    ConfigNode {
        kind: child.kind,
        connection: child.connection.or_inherit(&parent.connection),
        capture: child.capture.or_inherit(&parent.capture),
    }
}

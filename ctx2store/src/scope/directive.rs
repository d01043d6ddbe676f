//! キャプチャディレクティブ
//!
//! `save_ctx_2store_conn <descriptor>` は引数ちょうど1つで、サーバースコープに
//! 置く。`save_ctx_2store [on|off]` は location スコープに置き、引数なしは
//! キャプチャ有効を意味する。

use crate::common::error::{ConfigError, ConfigResult};

/// パース済みディレクティブ
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// サーバースコープの接続文字列
    Connection(String),
    /// location スコープのキャプチャフラグ
    Capture(bool),
}

impl Directive {
    /// 接続ディレクティブ名
    pub const CONNECTION: &'static str = "save_ctx_2store_conn";
    /// キャプチャディレクティブ名
    pub const CAPTURE: &'static str = "save_ctx_2store";

    /// ディレクティブ名
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connection(_) => Self::CONNECTION,
            Self::Capture(_) => Self::CAPTURE,
        }
    }

    /// ディレクティブ1行をパースする（例: `save_ctx_2store_conn mysql://...;`）
    pub fn parse(line: &str) -> ConfigResult<Self> {
        let line = line.trim().trim_end_matches(';');
        let mut words = line.split_whitespace();
        let name = words
            .next()
            .ok_or_else(|| ConfigError::UnknownDirective(String::new()))?;
        let args: Vec<&str> = words.collect();
        Self::from_parts(name, &args)
    }

    /// 名前と引数からディレクティブを組み立てる
    pub fn from_parts(name: &str, args: &[&str]) -> ConfigResult<Self> {
        match name {
            Self::CONNECTION => match args {
                [descriptor] => Ok(Self::Connection((*descriptor).to_string())),
                _ => Err(ConfigError::InvalidArguments {
                    directive: Self::CONNECTION,
                    expected: "1",
                    got: args.len(),
                }),
            },
            Self::CAPTURE => match args {
                [] => Ok(Self::Capture(true)),
                [flag] => match flag.to_ascii_lowercase().as_str() {
                    "on" => Ok(Self::Capture(true)),
                    "off" => Ok(Self::Capture(false)),
                    _ => Err(ConfigError::InvalidFlag {
                        directive: Self::CAPTURE,
                        value: (*flag).to_string(),
                    }),
                },
                _ => Err(ConfigError::InvalidArguments {
                    directive: Self::CAPTURE,
                    expected: "0 or 1",
                    got: args.len(),
                }),
            },
            other => Err(ConfigError::UnknownDirective(other.to_string())),
        }
    }
}

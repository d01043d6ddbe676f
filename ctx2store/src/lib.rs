//! ctx2store
//!
//! リバースプロキシのレスポンスパイプラインに挿入するリクエストコンテキスト
//! キャプチャ層。転送バイトを変えずに記録し、永続化はリクエスト経路の外で行う。

#![warn(missing_docs)]

/// 共通型定義（エラー・IP正規化）
pub mod common;

/// 設定管理（環境変数ヘルパー）
pub mod config;

/// 階層設定（ディレクティブ・マージ・ルート）
pub mod scope;

/// ストア接続とバックエンド
pub mod store;

/// コンテキスト抽出と非同期シンク
pub mod capture;

/// 出力パイプラインとキャプチャステージ
pub mod pipeline;

/// アップストリームへのリバースプロキシ
pub mod proxy;

/// ホストサーバー
pub mod server;

/// 協調シャットダウン
pub mod shutdown;

/// ロギング初期化ユーティリティ
pub mod logging;

/// CLI定義
pub mod cli;

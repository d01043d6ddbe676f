//! キャプチャしたリクエストコンテキストと、バックエンド非依存の書き込み操作

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// リクエストボディをバッファしなかった場合に保存する値
pub const NO_BODY: &str = "No body";

/// [`SinkOperation`] の書き込み先テーブル
pub const RECORD_TABLE: &str = "request_contexts";

/// [`SinkOperation`] のカラム順
pub const RECORD_COLUMNS: [&str; 13] = [
    "operation_id",
    "captured_at",
    "referer",
    "method",
    "uri",
    "authorization",
    "user_agent",
    "remote_addr",
    "remote_port",
    "query_string",
    "request_body",
    "status",
    "response_time_ms",
];

/// 1回のやり取りからキャプチャしたリクエストコンテキスト
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapturedRecord {
    /// `Referer` ヘッダ
    pub referer: String,
    /// HTTPメソッド
    pub method: String,
    /// リクエストパス（クエリを除く）
    pub uri: String,
    /// `Authorization` ヘッダ
    pub authorization: String,
    /// `User-Agent` ヘッダ
    pub user_agent: String,
    /// 正規化済みクライアントアドレス
    pub remote_address: String,
    /// クライアントポート（不明なら0）
    pub remote_port: u16,
    /// クエリ文字列（そのまま）
    pub query: String,
    /// リクエストボディ、または [`NO_BODY`]
    pub request_body: String,
    /// HTTPステータスコード
    pub status: u16,
    /// レスポンスヘッダまでのアップストリーム応答時間
    pub response_time_ms: u64,
    /// 抽出時刻
    pub captured_at: DateTime<Utc>,
}

/// 1カラムにバインドする値
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// テキスト
    Text(String),
    /// 非負整数
    Unsigned(u64),
    /// UTCタイムスタンプ
    Timestamp(DateTime<Utc>),
}

/// [`crate::store::StoreBackend`] への「このレコードを書く」要求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkOperation {
    /// 操作ごとに一意（再利用しない）
    pub operation_id: Uuid,
    /// 書き込み先テーブル
    pub table: &'static str,
    /// 順序付きの `(カラム, 値)` の組
    pub fields: Vec<(&'static str, FieldValue)>,
}

impl SinkOperation {
    /// レコードから新しい操作を作る
    pub fn from_record(record: &CapturedRecord) -> Self {
        let operation_id = Uuid::new_v4();
        let text = |s: &str| FieldValue::Text(s.to_string());
        let values = [
            FieldValue::Text(operation_id.to_string()),
            FieldValue::Timestamp(record.captured_at),
            text(&record.referer),
            text(&record.method),
            text(&record.uri),
            text(&record.authorization),
            text(&record.user_agent),
            text(&record.remote_address),
            FieldValue::Unsigned(u64::from(record.remote_port)),
            text(&record.query),
            text(&record.request_body),
            FieldValue::Unsigned(u64::from(record.status)),
            FieldValue::Unsigned(record.response_time_ms),
        ];

        Self {
            operation_id,
            table: RECORD_TABLE,
            fields: RECORD_COLUMNS.into_iter().zip(values).collect(),
        }
    }

    /// カラムの値
    pub fn field(&self, column: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(name, _)| *name == column)
            .map(|(_, value)| value)
    }

    /// テキストカラムの値
    pub fn text(&self, column: &str) -> Option<&str> {
        match self.field(column)? {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn record() -> CapturedRecord {
        CapturedRecord {
            referer: String::new(),
            method: "GET".into(),
            uri: "/a".into(),
            authorization: String::new(),
            user_agent: "test-agent".into(),
            remote_address: "127.0.0.1".into(),
            remote_port: 50000,
            query: String::new(),
            request_body: NO_BODY.into(),
            status: 200,
            response_time_ms: 3,
            captured_at: Utc::now(),
        }
    }
}

//! # Client エラー型
//!
//! どの段階（設定・トークン発行・パッケージング・アップロード）で失敗したかを
//! バリアントで区別する。

use mplx_core::CoreError;

use crate::auth::SignerError;

/// Clientのエラー型
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// 設定・AuthContextの構築に失敗（I/Oの前に失敗する）
    #[error("設定が不正です: {0}")]
    Configuration(String),
    /// 署名者が署名に失敗
    #[error("トークンの署名に失敗しました: {0}")]
    Signing(#[source] SignerError),
    /// トークンの生成・デコード・検証に失敗
    #[error("トークンが不正です: {0}")]
    Token(String),
    /// パッケージング・バンドル・CAR処理に失敗
    #[error("パッケージングに失敗しました: {0}")]
    Packaging(#[from] CoreError),
    /// HTTP送信に失敗
    #[error("アップロードの送信に失敗しました: {0}")]
    Network(String),
    /// バックエンドがエラーを返した
    #[error("バックエンドがエラーを返しました: HTTP {status} - {message}")]
    Backend {
        /// HTTPステータス
        status: u16,
        /// エラーメッセージ
        message: String,
    },
    /// バックエンドが報告したルートCIDがローカルのものと一致しない
    #[error("ルートCIDが一致しません: expected {expected}, actual {actual}")]
    Integrity {
        /// ローカルで計算したルートCID
        expected: String,
        /// バックエンドが報告したCID
        actual: String,
    },
}

impl ClientError {
    /// 再試行すべきエラーか。
    ///
    /// 送信失敗とバックエンドのエラーだけが対象。ルートCIDの不一致は
    /// エンコードかプロトコルの不具合なので再試行しない。
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Network(_) | ClientError::Backend { .. })
    }
}

impl From<reqwest::Error> for ClientError {
    /// リクエストの組み立て失敗（URL・ヘッダの不正）は送信前の設定エラーとして扱う。
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            ClientError::Configuration(format!("リクエストを組み立てられません: {e}"))
        } else {
            ClientError::Network(e.to_string())
        }
    }
}

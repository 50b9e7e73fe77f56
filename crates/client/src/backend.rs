//! # アップロードバックエンド
//!
//! アップロード先ごとの差分（パスとレスポンスの形）をアダプタとして切り出す。
//! アップローダ本体は1つで、バックエンドと認可ヘッダは構築時に注入する。
//!
//! | バックエンド | パス | 認可ヘッダ |
//! |------------|------|-----------|
//! | [`NftStorageBackend`] | `/metaplex/upload` | `x-web3auth: Metaplex <token>` |
//! | [`GenericBackend`] | `/upload` | `Authorization: Bearer <token>` |

mod generic;
mod nft_storage;

pub use generic::GenericBackend;
pub use nft_storage::NftStorageBackend;

use mplx_types::UploadResponse;

use crate::auth::UploadToken;
use crate::error::ClientError;

/// アップロード先のアダプタ。
pub trait UploadBackend: Send + Sync {
    /// ログ用の名前
    fn name(&self) -> &'static str;

    /// エンドポイントからの相対パス
    fn path(&self) -> &str;

    /// レスポンスを解釈し、バックエンドが報告したルートCIDを返す。
    fn parse_response(&self, status: u16, body: &[u8]) -> Result<String, ClientError>;
}

/// 認可ヘッダの組み立て。
pub trait AuthHeader: Send + Sync {
    /// `(ヘッダ名, 値)`
    fn header(&self, token: &UploadToken) -> (&'static str, String);
}

/// `x-web3auth: Metaplex <token>`
#[derive(Debug, Clone, Copy, Default)]
pub struct MetaplexAuthHeader;

impl AuthHeader for MetaplexAuthHeader {
    fn header(&self, token: &UploadToken) -> (&'static str, String) {
        ("x-web3auth", format!("Metaplex {token}"))
    }
}

/// `Authorization: Bearer <token>`
#[derive(Debug, Clone, Copy, Default)]
pub struct BearerAuthHeader;

impl AuthHeader for BearerAuthHeader {
    fn header(&self, token: &UploadToken) -> (&'static str, String) {
        ("authorization", format!("Bearer {token}"))
    }
}

/// `{ok, value:{cid}}` / `{ok:false, error:{message}}` 形式のレスポンスを解釈する。
pub(crate) fn parse_envelope(status: u16, body: &[u8]) -> Result<String, ClientError> {
    let parsed: Option<UploadResponse> = serde_json::from_slice(body).ok();
    let success = (200..300).contains(&status);

    match parsed {
        Some(UploadResponse {
            ok: true,
            value: Some(value),
            ..
        }) if success => Ok(value.cid),
        Some(response) => Err(ClientError::Backend {
            status,
            message: response
                .error
                .and_then(|e| e.message.or(e.name))
                .unwrap_or_else(|| "レスポンスにCIDがありません".to_string()),
        }),
        None => Err(ClientError::Backend {
            status,
            message: body_excerpt(body),
        }),
    }
}

/// エラーメッセージ用にレスポンス本文の先頭を取り出す。
pub(crate) fn body_excerpt(body: &[u8]) -> String {
    const MAX: usize = 256;
    let text = String::from_utf8_lossy(body);
    if text.is_empty() {
        return "レスポンスが空です".to_string();
    }
    text.chars().take(MAX).collect()
}

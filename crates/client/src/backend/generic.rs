//! 汎用のCARアップロードAPI。
//!
//! 成功時は `{cid}` をそのまま返すサーバーと、封筒形式で返すサーバーの両方に対応する。

use serde::Deserialize;

use super::{body_excerpt, parse_envelope, UploadBackend};
use crate::error::ClientError;

/// 封筒なしのレスポンス
#[derive(Deserialize)]
struct PlainResponse {
    cid: String,
}

/// `POST {endpoint}{path}`（デフォルト `/upload`）
#[derive(Debug, Clone)]
pub struct GenericBackend {
    path: String,
}

impl Default for GenericBackend {
    fn default() -> Self {
        Self::new("/upload")
    }
}

impl GenericBackend {
    /// パスを指定する。
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl UploadBackend for GenericBackend {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn parse_response(&self, status: u16, body: &[u8]) -> Result<String, ClientError> {
        if !(200..300).contains(&status) {
            return parse_envelope(status, body);
        }
        match serde_json::from_slice::<PlainResponse>(body) {
            Ok(plain) => Ok(plain.cid),
            Err(_) if body.is_empty() => Err(ClientError::Backend {
                status,
                message: body_excerpt(body),
            }),
            Err(_) => parse_envelope(status, body),
        }
    }
}

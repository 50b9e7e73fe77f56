//! NFT.StorageのMetaplex向けアップロードAPI。

use super::{parse_envelope, UploadBackend};
use crate::error::ClientError;

/// `POST {endpoint}/metaplex/upload`
#[derive(Debug, Clone, Copy, Default)]
pub struct NftStorageBackend;

impl NftStorageBackend {
    /// アップロードパス
    pub const PATH: &'static str = "/metaplex/upload";
}

impl UploadBackend for NftStorageBackend {
    fn name(&self) -> &'static str {
        "nft.storage"
    }

    fn path(&self) -> &str {
        Self::PATH
    }

    fn parse_response(&self, status: u16, body: &[u8]) -> Result<String, ClientError> {
        parse_envelope(status, body)
    }
}

//! # mplx Client
//!
//! アップロードトークンの発行と、パッケージ済みNFT・バンドル・CARのアップロード。
//!
//! ## 処理フロー
//! 1. [`AuthContext`] を構築する（署名者・クラスタ・エージェント名）
//! 2. NFTをパッケージングする（[`mplx_core::prepare_nft`] / [`mplx_core::NftBundle`]）
//! 3. ルートCIDに対するトークンを発行し、CARを分割して送信する（[`Uploader`]）

pub mod auth;
pub mod backend;
pub mod config;
pub mod error;
mod retry;
pub mod upload;

#[cfg(test)]
mod mock;

pub use auth::{issue_token, AuthContext, KeypairSigner, Signer, SignerError, UploadToken};
pub use backend::{
    AuthHeader, BearerAuthHeader, GenericBackend, MetaplexAuthHeader, NftStorageBackend,
    UploadBackend,
};
pub use config::ClientConfig;
pub use error::ClientError;
pub use retry::RetryPolicy;
pub use upload::{UploadOptions, Uploader};

use mplx_core::{prepare_nft, CarArchive, Cid, NamedFile, NftBundle, PackagedNft, PrepareOptions};
use mplx_types::MetaplexMetadata;

/// パッケージングからアップロードまでをまとめたクライアント。
#[derive(Debug, Clone)]
pub struct Client {
    auth: AuthContext,
    uploader: Uploader,
    prepare_options: PrepareOptions,
    upload_options: UploadOptions,
}

impl Client {
    /// AuthContextとアップローダから作る。
    pub fn new(auth: AuthContext, uploader: Uploader) -> Self {
        Self {
            auth,
            uploader,
            prepare_options: PrepareOptions::default(),
            upload_options: UploadOptions::default(),
        }
    }

    /// 設定から作る。
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        Ok(Self {
            auth: config.auth_context()?,
            uploader: Uploader::nft_storage(config.endpoint.clone()),
            prepare_options: config.prepare_options(),
            upload_options: config.upload_options(),
        })
    }

    /// パッケージングのオプションを差し替える。
    pub fn with_prepare_options(mut self, prepare_options: PrepareOptions) -> Self {
        self.prepare_options = prepare_options;
        self
    }

    /// アップロードのオプションを差し替える。
    pub fn with_upload_options(mut self, upload_options: UploadOptions) -> Self {
        self.upload_options = upload_options;
        self
    }

    /// 認可情報
    pub fn auth(&self) -> &AuthContext {
        &self.auth
    }

    /// アップローダ
    pub fn uploader(&self) -> &Uploader {
        &self.uploader
    }

    /// CARをアップロードする。
    pub async fn store_car(&self, car: &CarArchive) -> Result<Cid, ClientError> {
        self.uploader
            .upload_car(&self.auth, car, &self.upload_options)
            .await
    }

    /// NFTをパッケージングし、アセットとメタデータをそれぞれアップロードする。
    pub async fn store_nft(
        &self,
        metadata: &MetaplexMetadata,
        image: NamedFile,
        additional_files: Vec<NamedFile>,
    ) -> Result<PackagedNft, ClientError> {
        let nft = prepare_nft(metadata, image, additional_files, &self.prepare_options)?;
        self.store_car(&nft.encoded_assets.car).await?;
        self.store_car(&nft.encoded_metadata.car).await?;
        tracing::info!(
            metadata_uri = %nft.metadata_uri,
            "NFTを保存しました"
        );
        Ok(nft)
    }

    /// バンドル全体を1つのCARとしてアップロードする。
    pub async fn store_bundle(&self, bundle: &NftBundle) -> Result<Cid, ClientError> {
        let car = bundle.as_car()?;
        let cid = self.store_car(&car).await?;
        tracing::info!(root = %cid, entries = bundle.len(), "バンドルを保存しました");
        Ok(cid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{spawn_mock_backend, MockBehavior};
    use mplx_core::read_car;
    use mplx_types::{ExtraFields, FileDescription, Properties, SolanaCluster};
    use std::time::Duration;

    fn metadata() -> MetaplexMetadata {
        MetaplexMetadata {
            name: "Token".to_string(),
            symbol: None,
            description: None,
            seller_fee_basis_points: None,
            image: "token.png".to_string(),
            animation_url: None,
            external_url: None,
            attributes: None,
            collection: None,
            properties: Properties {
                files: vec![FileDescription::new("token.png", "image/png")],
                ..Default::default()
            },
            extra: ExtraFields::new(),
        }
    }

    async fn test_client() -> (Client, std::sync::Arc<crate::mock::MockBackend>) {
        let (endpoint, mock) =
            spawn_mock_backend(NftStorageBackend::PATH, MockBehavior::Echo).await;
        let auth = AuthContext::from_secret_key(&[3u8; 32], SolanaCluster::Devnet, "mplx-test")
            .unwrap();
        let client = Client::new(auth, Uploader::nft_storage(endpoint)).with_upload_options(
            UploadOptions {
                retry_base_delay: Duration::from_millis(1),
                ..Default::default()
            },
        );
        (client, mock)
    }

    /// 設定のエンドポイントにバックエンドのパスが連結されることを確認
    #[test]
    fn test_from_config_upload_url() {
        use base58::ToBase58;
        let key = mplx_crypto::Ed25519SigningKey::from_bytes(&[5u8; 32]);
        let vars = [
            ("NFT_STORAGE_ENDPOINT", "https://api.example/v1/".to_string()),
            ("MINTING_AGENT", "mplx-test".to_string()),
            ("SOLANA_KEYPAIR", key.to_keypair_bytes().to_base58()),
        ];
        let config = ClientConfig::from_lookup(|name| {
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.clone())
        })
        .unwrap();

        let client = Client::from_config(&config).unwrap();
        assert_eq!(client.uploader().endpoint().as_str(), "https://api.example/v1/");
        assert_eq!(
            client.uploader().upload_url().unwrap().as_str(),
            "https://api.example/v1/metaplex/upload"
        );
        assert_eq!(client.auth().minting_agent(), "mplx-test");
    }

    /// アセットとメタデータの2つのCARが送信されることを確認
    #[tokio::test]
    async fn test_store_nft() {
        let (client, mock) = test_client().await;
        let nft = client
            .store_nft(&metadata(), NamedFile::new("token.png", &b"png"[..]), Vec::new())
            .await
            .unwrap();

        let roots: Vec<Cid> = mock
            .received()
            .iter()
            .map(|r| read_car(&r.body).unwrap().roots[0])
            .collect();
        assert_eq!(roots, vec![nft.encoded_assets.cid, nft.encoded_metadata.cid]);
    }

    /// バンドルのルートCIDで1つのCARが送信されることを確認
    #[tokio::test]
    async fn test_store_bundle() {
        let (client, mock) = test_client().await;
        let mut bundle = NftBundle::new();
        for id in ["a", "b", "c"] {
            bundle
                .add_nft(
                    id,
                    &metadata(),
                    NamedFile::new("token.png", id.as_bytes().to_vec()),
                    Vec::new(),
                    &PrepareOptions::default(),
                )
                .unwrap();
        }

        let cid = client.store_bundle(&bundle).await.unwrap();
        assert_eq!(cid, bundle.root_cid().unwrap());
        assert_eq!(mock.calls(), 1);
    }

    /// パッケージングの失敗はPackagingエラーになり、何も送信されないことを確認
    #[tokio::test]
    async fn test_store_nft_packaging_error() {
        let (client, mock) = test_client().await;
        let result = client
            .store_nft(&metadata(), NamedFile::new("a/b.png", &b"png"[..]), Vec::new())
            .await;
        assert!(matches!(result, Err(ClientError::Packaging(_))));
        assert_eq!(mock.calls(), 0);
    }
}

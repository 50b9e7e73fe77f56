//! # Client設定
//!
//! 環境変数からの設定読み込み。
//!
//! | 変数 | デフォルト |
//! |------|-----------|
//! | `NFT_STORAGE_ENDPOINT` | `https://api.nft.storage` |
//! | `NFT_STORAGE_GATEWAY_HOST` | `https://nftstorage.link` |
//! | `UPLOAD_MAX_RETRIES` | 5 |
//! | `UPLOAD_MAX_CONCURRENCY` | 3 |
//! | `UPLOAD_CHUNK_SIZE` | 10 MiB |
//! | `SOLANA_CLUSTER` | `devnet` |
//! | `MINTING_AGENT` | なし（トークン発行時に必須） |
//! | `MINTING_AGENT_VERSION` | なし |
//! | `SOLANA_KEYPAIR` | なし（base58の64バイトキーペア） |

use std::str::FromStr;

use mplx_core::{parse_gateway, PrepareOptions, DEFAULT_GATEWAY_HOST, DEFAULT_TARGET_SIZE};
use mplx_types::SolanaCluster;
use url::Url;

use crate::auth::AuthContext;
use crate::error::ClientError;
use crate::upload::{UploadOptions, DEFAULT_MAX_CONCURRENCY, DEFAULT_MAX_RETRIES};

/// デフォルトのアップロードAPI
pub const DEFAULT_ENDPOINT: &str = "https://api.nft.storage";

/// Clientの設定。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// アップロードAPIのエンドポイント
    pub endpoint: Url,
    /// メタデータのリンクに使うゲートウェイ
    pub gateway: Url,
    /// チャンクごとの最大再試行回数
    pub max_retries: u32,
    /// 同時に送信するチャンク数
    pub max_concurrency: usize,
    /// チャンクの最大バイト数
    pub chunk_size: usize,
    /// トークンに記録するクラスタ
    pub cluster: SolanaCluster,
    /// ミントを行うエージェント名
    pub minting_agent: Option<String>,
    /// エージェントのバージョン
    pub agent_version: Option<String>,
    /// base58のSolanaキーペア
    pub keypair: Option<String>,
}

impl ClientConfig {
    /// 環境変数から読み込む。
    pub fn from_env() -> Result<Self, ClientError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 任意の参照関数から読み込む。未設定の変数はデフォルト値になる。
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ClientError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let endpoint = var("NFT_STORAGE_ENDPOINT");
        let gateway = var("NFT_STORAGE_GATEWAY_HOST");
        Ok(Self {
            endpoint: parse_endpoint(
                "NFT_STORAGE_ENDPOINT",
                endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT),
            )?,
            gateway: parse_gateway(gateway.as_deref().unwrap_or(DEFAULT_GATEWAY_HOST)).map_err(
                |e| ClientError::Configuration(format!("NFT_STORAGE_GATEWAY_HOSTの値が不正です: {e}")),
            )?,
            max_retries: parse_var(&var, "UPLOAD_MAX_RETRIES")?.unwrap_or(DEFAULT_MAX_RETRIES),
            max_concurrency: parse_var(&var, "UPLOAD_MAX_CONCURRENCY")?
                .unwrap_or(DEFAULT_MAX_CONCURRENCY),
            chunk_size: parse_var(&var, "UPLOAD_CHUNK_SIZE")?.unwrap_or(DEFAULT_TARGET_SIZE),
            cluster: parse_var(&var, "SOLANA_CLUSTER")?.unwrap_or(SolanaCluster::Devnet),
            minting_agent: var("MINTING_AGENT"),
            agent_version: var("MINTING_AGENT_VERSION"),
            keypair: var("SOLANA_KEYPAIR"),
        })
    }

    /// キーペアとエージェント名からAuthContextを構築する。
    pub fn auth_context(&self) -> Result<AuthContext, ClientError> {
        let keypair = self
            .keypair
            .as_deref()
            .ok_or_else(|| ClientError::Configuration("SOLANA_KEYPAIRが未設定です".to_string()))?;
        let minting_agent = self
            .minting_agent
            .clone()
            .ok_or_else(|| ClientError::Configuration("MINTING_AGENTが未設定です".to_string()))?;

        let signing_key = mplx_crypto::signing_key_from_base58(keypair)
            .map_err(|e| ClientError::Configuration(format!("SOLANA_KEYPAIRが不正です: {e}")))?;
        let auth = AuthContext::new(
            std::sync::Arc::new(crate::auth::KeypairSigner::new(signing_key)),
            self.cluster,
            minting_agent,
        )?;
        Ok(match &self.agent_version {
            Some(version) => auth.with_agent_version(version.clone()),
            None => auth,
        })
    }

    /// アップロードのオプション。
    pub fn upload_options(&self) -> UploadOptions {
        UploadOptions {
            max_retries: self.max_retries,
            max_concurrency: self.max_concurrency,
            chunk_size: self.chunk_size,
            ..Default::default()
        }
    }

    /// パッケージングのオプション。
    pub fn prepare_options(&self) -> PrepareOptions {
        PrepareOptions::default().with_gateway(self.gateway.clone())
    }
}

/// アップロードAPIのURLを検証する。
fn parse_endpoint(key: &str, raw: &str) -> Result<Url, ClientError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| ClientError::Configuration(format!("{key}の値が不正です: {raw:?} ({e})")))?;
    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        return Err(ClientError::Configuration(format!(
            "{key}はhttp(s)のURLである必要があります: {raw:?}"
        )));
    }
    Ok(url)
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ClientError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    var(key)
        .map(|value| {
            value.trim().parse::<T>().map_err(|e| {
                ClientError::Configuration(format!("{key}の値が不正です: {value:?} ({e})"))
            })
        })
        .transpose()
}

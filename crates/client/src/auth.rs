//! # アップロード認可
//!
//! 署名鍵の所有者が、アカウント登録なしでコンテンツの保存を1回だけ許可してもらうための
//! 自己記述的な署名付きトークンを発行する。
//!
//! ## トークン形式
//! ```text
//! base64url(header) "." base64url(payload) "." base64url(signature)
//!
//! header  = {"alg":"EdDSA","typ":"token"}
//! payload = {"iss":"did:key:z…","req":{"put":{"rootCID":"b…","tags":{…}}}}
//! ```
//! 署名対象は先頭2セグメントを `.` で連結した文字列のUTF-8バイト列。
//! トークンはルートCIDごとに毎回発行し、使い回さない。

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use base64::Engine;
use mplx_core::Cid;
use mplx_crypto::{b64url, Ed25519SigningKey};
use mplx_types::{
    PutRequest, SolanaCluster, TokenHeader, TokenPayload, TokenRequest, TokenTags, CHAIN_SOLANA,
    LEGACY_CLUSTER_TAG, TOKEN_ALG,
};

use crate::error::ClientError;

/// 予約済みのタグキー。`with_tag` では上書きできない。
const RESERVED_TAGS: [&str; 4] = ["chain", "solanaCluster", "mintingAgent", "agentVersion"];

// ---------------------------------------------------------------------------
// 署名者
// ---------------------------------------------------------------------------

/// 署名者のエラー。
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct SignerError(pub String);

/// 署名能力。鍵の保管は呼び出し側の責務で、ここでは保持も永続化もしない。
///
/// ハードウェアウォレット等、署名が非同期になる実装も想定する。
#[async_trait::async_trait]
pub trait Signer: Send + Sync {
    /// Ed25519公開鍵（32バイト）
    fn public_key(&self) -> [u8; 32];

    /// メッセージに署名し、64バイトの署名を返す。
    async fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SignerError>;
}

/// メモリ上のEd25519鍵による署名者。
pub struct KeypairSigner {
    signing_key: Ed25519SigningKey,
}

impl KeypairSigner {
    /// 署名鍵から作る。
    pub fn new(signing_key: Ed25519SigningKey) -> Self {
        Self { signing_key }
    }
}

#[async_trait::async_trait]
impl Signer for KeypairSigner {
    fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    async fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SignerError> {
        Ok(mplx_crypto::ed25519_sign(&self.signing_key, message)
            .to_bytes()
            .to_vec())
    }
}

// ---------------------------------------------------------------------------
// AuthContext
// ---------------------------------------------------------------------------

/// トークン発行に必要な情報。構築後は変更しない。
///
/// セッションごとに1つ作り、複数のトークン発行で使い回す。
#[derive(Clone)]
pub struct AuthContext {
    cluster: SolanaCluster,
    minting_agent: String,
    agent_version: Option<String>,
    extra_tags: BTreeMap<String, String>,
    signer: Arc<dyn Signer>,
}

impl fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthContext")
            .field("cluster", &self.cluster)
            .field("minting_agent", &self.minting_agent)
            .field("agent_version", &self.agent_version)
            .field("extra_tags", &self.extra_tags)
            .field("did", &self.did())
            .finish()
    }
}

impl AuthContext {
    /// AuthContextを構築する。`minting_agent` が空の場合はエラー。
    pub fn new(
        signer: Arc<dyn Signer>,
        cluster: SolanaCluster,
        minting_agent: impl Into<String>,
    ) -> Result<Self, ClientError> {
        let minting_agent = minting_agent.into();
        if minting_agent.trim().is_empty() {
            return Err(ClientError::Configuration(
                "mintingAgentは必須です".to_string(),
            ));
        }
        Ok(Self {
            cluster,
            minting_agent,
            agent_version: None,
            extra_tags: BTreeMap::new(),
            signer,
        })
    }

    /// 32バイトの秘密鍵から構築する。
    pub fn from_secret_key(
        secret_key: &[u8; 32],
        cluster: SolanaCluster,
        minting_agent: impl Into<String>,
    ) -> Result<Self, ClientError> {
        let signing_key = Ed25519SigningKey::from_bytes(secret_key);
        Self::new(
            Arc::new(KeypairSigner::new(signing_key)),
            cluster,
            minting_agent,
        )
    }

    /// Solana形式の64バイトキーペアから構築する。
    pub fn from_keypair_bytes(
        keypair: &[u8],
        cluster: SolanaCluster,
        minting_agent: impl Into<String>,
    ) -> Result<Self, ClientError> {
        let signing_key = mplx_crypto::signing_key_from_keypair_bytes(keypair)
            .map_err(|e| ClientError::Configuration(format!("キーペアが不正です: {e}")))?;
        Self::new(
            Arc::new(KeypairSigner::new(signing_key)),
            cluster,
            minting_agent,
        )
    }

    /// エージェントのバージョンを設定する。
    pub fn with_agent_version(mut self, agent_version: impl Into<String>) -> Self {
        self.agent_version = Some(agent_version.into());
        self
    }

    /// 追加タグを設定する。予約済みのキーは無視する。
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        if RESERVED_TAGS.contains(&key.as_str()) {
            tracing::warn!(key = %key, "予約済みのタグキーは上書きできません");
            return self;
        }
        self.extra_tags.insert(key, value.into());
        self
    }

    /// `chain` タグの値
    pub fn chain(&self) -> &'static str {
        CHAIN_SOLANA
    }

    /// クラスタ
    pub fn cluster(&self) -> SolanaCluster {
        self.cluster
    }

    /// ミントを行うエージェント名
    pub fn minting_agent(&self) -> &str {
        &self.minting_agent
    }

    /// エージェントのバージョン
    pub fn agent_version(&self) -> Option<&str> {
        self.agent_version.as_deref()
    }

    /// 署名者の公開鍵
    pub fn public_key(&self) -> [u8; 32] {
        self.signer.public_key()
    }

    /// 発行者の `did:key`
    pub fn did(&self) -> String {
        mplx_crypto::did_key_from_public_key(&self.signer.public_key())
    }

    /// トークンに埋め込むタグ。
    pub fn tags(&self) -> TokenTags {
        TokenTags {
            chain: CHAIN_SOLANA.to_string(),
            solana_cluster: self.cluster.to_string(),
            minting_agent: self.minting_agent.clone(),
            agent_version: self.agent_version.clone(),
            extra: self.extra_tags.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// トークン
// ---------------------------------------------------------------------------

/// 発行済みのアップロードトークン。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadToken {
    encoded: String,
    header: TokenHeader,
    payload: TokenPayload,
}

impl UploadToken {
    /// ワイヤ形式の文字列
    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    /// ヘッダ
    pub fn header(&self) -> &TokenHeader {
        &self.header
    }

    /// ペイロード
    pub fn payload(&self) -> &TokenPayload {
        &self.payload
    }

    /// 保存を許可するルートCID
    pub fn root_cid(&self) -> &str {
        &self.payload.req.put.root_cid
    }

    /// ワイヤ形式のトークンを読み込む。署名は検証しない（[`Self::verify`]）。
    ///
    /// 旧リビジョンのハイフン区切りのクラスタタグ（`solana-cluster`）も受け付ける。
    pub fn decode(token: &str) -> Result<Self, ClientError> {
        let segments: Vec<&str> = token.split('.').collect();
        let [header, payload, _signature] = segments[..] else {
            return Err(ClientError::Token(format!(
                "トークンは3セグメントである必要があります: {}",
                segments.len()
            )));
        };

        let header: TokenHeader = serde_json::from_slice(&decode_segment(header)?)
            .map_err(|e| ClientError::Token(format!("ヘッダのパースに失敗: {e}")))?;

        let mut payload: serde_json::Value = serde_json::from_slice(&decode_segment(payload)?)
            .map_err(|e| ClientError::Token(format!("ペイロードのパースに失敗: {e}")))?;
        if let Some(tags) = payload
            .pointer_mut("/req/put/tags")
            .and_then(serde_json::Value::as_object_mut)
        {
            if !tags.contains_key("solanaCluster") {
                if let Some(cluster) = tags.remove(LEGACY_CLUSTER_TAG) {
                    tags.insert("solanaCluster".to_string(), cluster);
                }
            }
        }
        let payload: TokenPayload = serde_json::from_value(payload)
            .map_err(|e| ClientError::Token(format!("ペイロードのパースに失敗: {e}")))?;

        Ok(Self {
            encoded: token.to_string(),
            header,
            payload,
        })
    }

    /// `iss` の公開鍵で署名を検証する。
    pub fn verify(&self) -> Result<(), ClientError> {
        if self.header.alg != TOKEN_ALG {
            return Err(ClientError::Token(format!(
                "未対応の署名アルゴリズムです: {}",
                self.header.alg
            )));
        }
        let (signing_input, signature) = self
            .encoded
            .rsplit_once('.')
            .ok_or_else(|| ClientError::Token("署名セグメントがありません".to_string()))?;
        let signature = mplx_crypto::signature_from_bytes(&decode_segment(signature)?)
            .map_err(|e| ClientError::Token(e.to_string()))?;
        let verifying_key = mplx_crypto::public_key_from_did_key(&self.payload.iss)
            .map_err(|e| ClientError::Token(e.to_string()))?;
        mplx_crypto::ed25519_verify(&verifying_key, signing_input.as_bytes(), &signature)
            .map_err(|e| ClientError::Token(e.to_string()))
    }
}

impl fmt::Display for UploadToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

fn decode_segment(segment: &str) -> Result<Vec<u8>, ClientError> {
    b64url()
        .decode(segment)
        .map_err(|e| ClientError::Token(format!("base64urlデコードに失敗: {e}")))
}

/// ルートCIDに対するアップロードトークンを発行する。
///
/// I/Oは署名者の呼び出しのみ。署名者のエラーはそのまま [`ClientError::Signing`] で返す。
pub async fn issue_token(auth: &AuthContext, root_cid: &Cid) -> Result<UploadToken, ClientError> {
    let header = TokenHeader::default();
    let payload = TokenPayload {
        iss: auth.did(),
        req: TokenRequest {
            put: PutRequest {
                root_cid: root_cid.to_string(),
                tags: auth.tags(),
            },
        },
    };

    let header_json = serde_json::to_vec(&header)
        .map_err(|e| ClientError::Token(format!("ヘッダのシリアライズに失敗: {e}")))?;
    let payload_json = serde_json::to_vec(&payload)
        .map_err(|e| ClientError::Token(format!("ペイロードのシリアライズに失敗: {e}")))?;
    let signing_input = format!(
        "{}.{}",
        b64url().encode(header_json),
        b64url().encode(payload_json)
    );

    let signature = auth
        .signer
        .sign(signing_input.as_bytes())
        .await
        .map_err(ClientError::Signing)?;

    tracing::debug!(
        root_cid = %root_cid,
        iss = %payload.iss,
        "アップロードトークンを発行しました"
    );

    Ok(UploadToken {
        encoded: format!("{signing_input}.{}", b64url().encode(signature)),
        header,
        payload,
    })
}

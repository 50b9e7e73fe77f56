//! # mplx 共有型定義
//!
//! Metaplexメタデータ、アップロードトークンのワイヤ構造、
//! アップロードAPIのレスポンス形式をRust構造体として提供する。
//!
//! ## エンコーディング規則
//! - 値が存在しないOptionalフィールドはシリアライズ時に省略する
//!   （`null` は出力しない）。コンテンツアドレス化されるJSONのバイト列が
//!   フィールドの有無だけで決まるようにするため。
//! - 未知のフィールドは `extra` に保持し、そのまま書き戻す。

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 未知フィールドの保持先。
pub type ExtraFields = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Metaplex メタデータ
// ---------------------------------------------------------------------------

/// Metaplex標準のオフチェーンメタデータ。
///
/// `image` と `properties.files[].uri` はパッケージング前はファイル名、
/// リンク後はゲートウェイURLまたは `ipfs://` URIを保持する。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaplexMetadata {
    /// NFT名
    pub name: String,
    /// シンボル
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    /// 説明文
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// 二次流通ロイヤリティ（basis points）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seller_fee_basis_points: Option<u16>,
    /// 画像の参照（ファイル名またはURL）
    pub image: String,
    /// アニメーション・動画等の参照
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animation_url: Option<String>,
    /// 外部サイトのURL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,
    /// 属性の一覧
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Vec<Attribute>>,
    /// コレクション情報
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<Collection>,
    /// ファイル一覧とクリエイター情報
    #[serde(default)]
    pub properties: Properties,
    /// 未知のフィールド
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// `properties` オブジェクト。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Properties {
    /// アセットファイルの一覧
    #[serde(default)]
    pub files: Vec<FileDescription>,
    /// クリエイターの一覧
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creators: Option<Vec<Creator>>,
    /// カテゴリ（"image", "video" 等）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// 未知のフィールド
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// `properties.files` の1エントリ。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDescription {
    /// ファイル名またはURL
    pub uri: String,
    /// MIMEタイプ
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    /// `true` ならゲートウェイURL、`false` なら自己記述的なコンテンツURI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cdn: Option<bool>,
    /// 未知のフィールド
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl FileDescription {
    /// URIとMIMEタイプからエントリを作る。
    pub fn new(uri: impl Into<String>, file_type: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            file_type: Some(file_type.into()),
            cdn: None,
            extra: ExtraFields::new(),
        }
    }
}

/// Metaplex標準の属性（trait_type + value）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    /// 属性の種類
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trait_type: Option<String>,
    /// 属性の値（文字列または数値）
    pub value: serde_json::Value,
    /// 表示形式
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_type: Option<String>,
}

/// クリエイター情報。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Creator {
    /// Base58エンコードされたウォレットアドレス
    pub address: String,
    /// ロイヤリティの配分（%）
    pub share: u8,
    /// 署名済みか
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
}

/// コレクション情報。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    /// コレクション名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// ファミリー名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    /// 未知のフィールド
    #[serde(flatten)]
    pub extra: ExtraFields,
}

// ---------------------------------------------------------------------------
// Solana クラスタ
// ---------------------------------------------------------------------------

/// トークンに記録するSolanaクラスタ。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SolanaCluster {
    /// mainnet-beta
    MainnetBeta,
    /// devnet
    Devnet,
    /// testnet
    Testnet,
}

impl SolanaCluster {
    /// タグ値として使う文字列表現。
    pub const fn as_str(&self) -> &'static str {
        match self {
            SolanaCluster::MainnetBeta => "mainnet-beta",
            SolanaCluster::Devnet => "devnet",
            SolanaCluster::Testnet => "testnet",
        }
    }
}

impl fmt::Display for SolanaCluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 未知のクラスタ名。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("未知のSolanaクラスタです: {0}")]
pub struct UnknownCluster(pub String);

impl FromStr for SolanaCluster {
    type Err = UnknownCluster;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mainnet-beta" => Ok(SolanaCluster::MainnetBeta),
            "devnet" => Ok(SolanaCluster::Devnet),
            "testnet" => Ok(SolanaCluster::Testnet),
            other => Err(UnknownCluster(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// アップロードトークン
// ---------------------------------------------------------------------------

/// トークンヘッダの署名アルゴリズム。
pub const TOKEN_ALG: &str = "EdDSA";

/// トークンヘッダの種別。
pub const TOKEN_TYP: &str = "token";

/// `chain` タグの固定値。
pub const CHAIN_SOLANA: &str = "solana";

/// 旧リビジョンで使われていたクラスタのタグキー。
pub const LEGACY_CLUSTER_TAG: &str = "solana-cluster";

/// トークンの第1セグメント。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenHeader {
    /// 署名アルゴリズム ("EdDSA")
    pub alg: String,
    /// トークン種別 ("token")
    pub typ: String,
}

impl Default for TokenHeader {
    fn default() -> Self {
        Self {
            alg: TOKEN_ALG.to_string(),
            typ: TOKEN_TYP.to_string(),
        }
    }
}

/// トークンの第2セグメント。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPayload {
    /// 発行者の `did:key`
    pub iss: String,
    /// 要求する操作
    pub req: TokenRequest,
}

/// トークンが許可する操作。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRequest {
    /// 保存要求
    pub put: PutRequest,
}

/// 保存要求。1つのルートCIDにのみ有効。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutRequest {
    /// 保存するコンテンツのルートCID (CIDv1文字列)
    #[serde(rename = "rootCID")]
    pub root_cid: String,
    /// 記述的なタグ
    pub tags: TokenTags,
}

/// トークンに埋め込むタグ。
///
/// 既知のキー以外もフィルタせずに `extra` として送る。
/// 未知タグの破棄はサーバー側の責務。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTags {
    /// 常に "solana"
    pub chain: String,
    /// クラスタ名
    #[serde(rename = "solanaCluster")]
    pub solana_cluster: String,
    /// ミントを行うエージェント名
    #[serde(rename = "mintingAgent")]
    pub minting_agent: String,
    /// エージェントのバージョン
    #[serde(rename = "agentVersion", default, skip_serializing_if = "Option::is_none")]
    pub agent_version: Option<String>,
    /// 呼び出し元が付与した追加タグ
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// アップロードAPI レスポンス
// ---------------------------------------------------------------------------

/// アップロードAPIのレスポンス封筒。
/// `{ok:true, value:{cid}}` または `{ok:false, error:{message}}`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResponse {
    /// 成功したか
    pub ok: bool,
    /// 成功時の値
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<UploadValue>,
    /// 失敗時のエラー
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<UploadErrorBody>,
}

/// 成功時の値。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadValue {
    /// サーバーが計算したルートCID
    pub cid: String,
}

/// 失敗時のエラー本文。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadErrorBody {
    /// エラーの種類
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// エラーメッセージ
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

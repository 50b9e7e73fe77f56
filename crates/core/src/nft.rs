//! # NFTパッケージング
//!
//! メタデータとアセットファイルを、独立に取得・検証できる2つのコンテンツアドレス型
//! アーカイブにまとめる。
//!
//! ```text
//! assets/                 metadata/
//!   ├─ image.png            └─ metadata.json   (リンク済み)
//!   └─ animation.mp4
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use mplx_types::MetaplexMetadata;
use url::Url;

use crate::block::{BlockStore, MemoryBlockStore};
use crate::car::CarArchive;
use crate::cid::Cid;
use crate::error::CoreError;
use crate::linker::{gateway_url, ipfs_uri, link_metadata, parse_gateway, DEFAULT_GATEWAY_HOST};
use crate::unixfs::{is_valid_entry_name, DirectoryBuilder, FileImporter, ImportedNode};

/// メタデータディレクトリ内のファイル名
pub const METADATA_FILENAME: &str = "metadata.json";

/// 名前付きのファイル内容。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedFile {
    /// ディレクトリエントリ名（パス区切りを含まない）
    pub name: String,
    /// ファイル内容
    pub data: Bytes,
}

impl NamedFile {
    /// 名前と内容からファイルを作る。
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

/// パッケージングのオプション。
#[derive(Clone)]
pub struct PrepareOptions {
    /// リンクに使うゲートウェイ。Noneなら [`DEFAULT_GATEWAY_HOST`]
    pub gateway: Option<Url>,
    /// 書き込み先のブロックストア。Noneなら呼び出しごとに新しいストアを作る
    pub store: Option<Arc<dyn BlockStore>>,
    /// ファイルのチャンク分割設定
    pub importer: FileImporter,
}

impl Default for PrepareOptions {
    fn default() -> Self {
        Self {
            gateway: None,
            store: None,
            importer: FileImporter::default(),
        }
    }
}

impl std::fmt::Debug for PrepareOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrepareOptions")
            .field("gateway", &self.gateway.as_ref().map(Url::as_str))
            .field("shared_store", &self.store.is_some())
            .field("importer", &self.importer)
            .finish()
    }
}

impl PrepareOptions {
    /// ゲートウェイを指定する。
    pub fn with_gateway(mut self, gateway: Url) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// リンクに使うゲートウェイ。http(s)以外のURLはエラーになる。
    pub fn gateway(&self) -> Result<Url, CoreError> {
        match &self.gateway {
            Some(gateway) => parse_gateway(gateway.as_str()),
            None => parse_gateway(DEFAULT_GATEWAY_HOST),
        }
    }

    /// 共有ブロックストアを指定する。
    pub fn with_store(mut self, store: Arc<dyn BlockStore>) -> Self {
        self.store = Some(store);
        self
    }
}

/// ルートCIDとアーカイブの組。
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedCar {
    /// ルートCID
    pub cid: Cid,
    /// DAG全体のエンコード済みバイト数
    pub tsize: u64,
    /// 送信用のアーカイブ
    pub car: CarArchive,
}

impl EncodedCar {
    fn new(root: ImportedNode, store: Arc<dyn BlockStore>) -> Self {
        Self {
            cid: root.cid,
            tsize: root.tsize,
            car: CarArchive::new(root.cid, store),
        }
    }

    /// ディレクトリのエントリとして使うノード。
    pub fn as_node(&self) -> ImportedNode {
        ImportedNode {
            cid: self.cid,
            tsize: self.tsize,
            size: 0,
        }
    }
}

/// パッケージ済みのNFT。
#[derive(Debug, Clone, PartialEq)]
pub struct PackagedNft {
    /// リンク済みメタデータ
    pub metadata: MetaplexMetadata,
    /// `metadata.json` のゲートウェイURL
    pub metadata_gateway_url: String,
    /// `metadata.json` の `ipfs://` URI（オンチェーンに記録する値）
    pub metadata_uri: String,
    /// メタデータディレクトリ
    pub encoded_metadata: EncodedCar,
    /// アセットディレクトリ
    pub encoded_assets: EncodedCar,
}

/// NFTをパッケージングする。
///
/// 画像と追加ファイルは1つのアセットディレクトリに、リンク済みメタデータは
/// `metadata.json` として別のディレクトリに書き込む。
/// ファイル名の検証はブロックを書き込む前に行う。
pub fn prepare_nft(
    metadata: &MetaplexMetadata,
    image: NamedFile,
    additional_files: Vec<NamedFile>,
    opts: &PrepareOptions,
) -> Result<PackagedNft, CoreError> {
    let gateway = opts.gateway()?;
    let mut names = HashSet::new();
    for file in std::iter::once(&image).chain(additional_files.iter()) {
        if !is_valid_entry_name(&file.name) {
            return Err(CoreError::InvalidFilename(file.name.clone()));
        }
        if !names.insert(file.name.as_str()) {
            return Err(CoreError::DuplicateFilename(file.name.clone()));
        }
    }

    let store = opts.store.clone().unwrap_or_else(MemoryBlockStore::shared);

    // アセット
    let image_filename = image.name.clone();
    let additional_filenames: Vec<String> = additional_files.iter().map(|f| f.name.clone()).collect();
    let mut assets = DirectoryBuilder::new();
    for file in std::iter::once(image).chain(additional_files) {
        let node = opts.importer.import(store.as_ref(), file.data);
        assets.add(file.name, node)?;
    }
    let asset_node = assets.build(store.as_ref());
    let asset_root = asset_node.cid;

    // メタデータ
    let linked = link_metadata(
        metadata,
        &image_filename,
        &additional_filenames,
        &asset_root,
        &gateway,
    )?;
    let json = serde_json::to_vec(&linked)
        .map_err(|e| CoreError::Serialization(format!("メタデータのシリアライズに失敗: {e}")))?;
    let mut metadata_dir = DirectoryBuilder::new();
    metadata_dir.add(
        METADATA_FILENAME,
        opts.importer.import(store.as_ref(), Bytes::from(json)),
    )?;
    let metadata_node = metadata_dir.build(store.as_ref());
    let metadata_root = metadata_node.cid;

    tracing::debug!(
        name = %linked.name,
        asset_root = %asset_root,
        metadata_root = %metadata_root,
        "NFTをパッケージングしました"
    );

    Ok(PackagedNft {
        metadata_gateway_url: gateway_url(&gateway, &metadata_root, METADATA_FILENAME)?,
        metadata_uri: ipfs_uri(&metadata_root, METADATA_FILENAME)?,
        metadata: linked,
        encoded_metadata: EncodedCar::new(metadata_node, store.clone()),
        encoded_assets: EncodedCar::new(asset_node, store),
    })
}

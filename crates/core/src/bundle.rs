//! # NFTバンドル
//!
//! 複数のNFTをIDごとにまとめ、1つのルートディレクトリとして送信する。
//!
//! ```text
//! root/
//!   ├─ {id}/
//!   │    ├─ assets    → アセットディレクトリ
//!   │    └─ metadata  → メタデータディレクトリ
//!   └─ ...
//! ```
//!
//! ルートディレクトリはシャーディングしない単純なディレクトリとして
//! [`ROOT_BLOCK_SIZE_LIMIT`] 未満に収める必要がある。
//! [`MAX_ENTRIES`] と [`MAX_ID_LEN`] はこの上限から逆算した値で、
//! 片方を変えたらもう片方も再計算すること（コンパイル時に検査する）。

use std::collections::HashMap;
use std::sync::Arc;

use mplx_types::MetaplexMetadata;

use crate::block::{Block, BlockStore, MemoryBlockStore};
use crate::car::CarArchive;
use crate::cid::{varint_len, Cid};
use crate::error::CoreError;
use crate::nft::{prepare_nft, NamedFile, PackagedNft, PrepareOptions};
use crate::unixfs::{is_valid_entry_name, DirectoryBuilder};

/// ルートディレクトリブロックのサイズ上限（256 KiB）
pub const ROOT_BLOCK_SIZE_LIMIT: usize = 256 * 1024;

/// バンドルの最大エントリ数
pub const MAX_ENTRIES: usize = 2000;

/// IDの最大バイト長（UTF-8）
pub const MAX_ID_LEN: usize = 64;

/// エントリ内のアセットディレクトリへのリンク名
pub const ASSETS_LINK_NAME: &str = "assets";

/// エントリ内のメタデータディレクトリへのリンク名
pub const METADATA_LINK_NAME: &str = "metadata";

/// CIDv1 + sha2-256 のバイト長
const CID_BYTES: usize = 36;

/// Tsize（u64）のvarintの最大バイト長
const MAX_TSIZE_BYTES: usize = 10;

/// ディレクトリのUnixFS Dataフィールドのバイト数
const DIRECTORY_DATA_OVERHEAD: usize = 4;

/// 名前が `id_len` バイトのPBLink1本をエンコードした時の最大バイト数。
pub const fn max_link_overhead(id_len: usize) -> usize {
    let hash = 1 + varint_len(CID_BYTES as u64) + CID_BYTES;
    let name = 1 + varint_len(id_len as u64) + id_len;
    let tsize = 1 + MAX_TSIZE_BYTES;
    let link = hash + name + tsize;
    1 + varint_len(link as u64) + link
}

const _: () = assert!(
    MAX_ENTRIES * max_link_overhead(MAX_ID_LEN) + DIRECTORY_DATA_OVERHEAD < ROOT_BLOCK_SIZE_LIMIT,
    "MAX_ENTRIES と MAX_ID_LEN の組み合わせがルートブロックの上限を超えます"
);

/// ID付きのNFTの集まり。
///
/// 全エントリのブロックは1つのストアに書き込むので、NFT間で共通する
/// ファイルは1ブロックにまとまる。
pub struct NftBundle {
    store: Arc<dyn BlockStore>,
    entries: HashMap<String, PackagedNft>,
}

impl Default for NftBundle {
    fn default() -> Self {
        Self::new()
    }
}

impl NftBundle {
    /// 専用のインメモリストアを持つ空のバンドル。
    pub fn new() -> Self {
        Self::with_store(MemoryBlockStore::shared())
    }

    /// 呼び出し側のストアを共有する空のバンドル。
    pub fn with_store(store: Arc<dyn BlockStore>) -> Self {
        Self {
            store,
            entries: HashMap::new(),
        }
    }

    /// NFTをパッケージングしてバンドルに追加する。
    ///
    /// 上限・IDの検証はパッケージングの前に行う。失敗した場合エントリは変化しない。
    /// `opts.store` は無視され、バンドルのストアが使われる。
    pub fn add_nft(
        &mut self,
        id: &str,
        metadata: &MetaplexMetadata,
        image: NamedFile,
        additional_files: Vec<NamedFile>,
        opts: &PrepareOptions,
    ) -> Result<&PackagedNft, CoreError> {
        if self.entries.len() >= MAX_ENTRIES {
            return Err(CoreError::CapacityExceeded { max: MAX_ENTRIES });
        }
        if id.len() > MAX_ID_LEN {
            return Err(CoreError::IdentifierTooLong {
                id: id.to_string(),
                len: id.len(),
                max: MAX_ID_LEN,
            });
        }
        if !is_valid_entry_name(id) {
            return Err(CoreError::InvalidIdentifier(id.to_string()));
        }
        if self.entries.contains_key(id) {
            return Err(CoreError::DuplicateIdentifier(id.to_string()));
        }

        let opts = opts.clone().with_store(self.store.clone());
        let nft = prepare_nft(metadata, image, additional_files, &opts)?;

        tracing::info!(
            id,
            metadata_cid = %nft.encoded_metadata.cid,
            entries = self.entries.len() + 1,
            "バンドルにNFTを追加しました"
        );

        Ok(self.entries.entry(id.to_string()).or_insert(nft))
    }

    /// IDのエントリ。
    pub fn get(&self, id: &str) -> Option<&PackagedNft> {
        self.entries.get(id)
    }

    /// エントリ数。
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 空かどうか。
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// ソート済みのID一覧。
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// 共有しているブロックストア
    pub fn store(&self) -> &Arc<dyn BlockStore> {
        &self.store
    }

    /// エントリごとのラッパーディレクトリとルートディレクトリを書き込み、ルートブロックを返す。
    pub fn make_root_block(&self) -> Result<Block, CoreError> {
        let mut root = DirectoryBuilder::new();
        for (id, nft) in &self.entries {
            let mut wrapper = DirectoryBuilder::new();
            wrapper.add(ASSETS_LINK_NAME, nft.encoded_assets.as_node())?;
            wrapper.add(METADATA_LINK_NAME, nft.encoded_metadata.as_node())?;
            root.add(id.clone(), wrapper.build(self.store.as_ref()))?;
        }

        let block = Block::dag_pb(root.to_node().encode());
        if block.data.len() >= ROOT_BLOCK_SIZE_LIMIT {
            return Err(CoreError::RootBlockTooLarge {
                size: block.data.len(),
                limit: ROOT_BLOCK_SIZE_LIMIT,
            });
        }
        self.store.put(block.clone());
        tracing::debug!(
            root = %block.cid,
            entries = self.entries.len(),
            size = block.data.len(),
            "バンドルのルートブロックを作成しました"
        );
        Ok(block)
    }

    /// ルートディレクトリのCID。
    pub fn root_cid(&self) -> Result<Cid, CoreError> {
        self.make_root_block().map(|block| block.cid)
    }

    /// バンドル全体を1つのアーカイブにする。
    pub fn as_car(&self) -> Result<CarArchive, CoreError> {
        let root = self.make_root_block()?;
        Ok(CarArchive::new(root.cid, self.store.clone()))
    }
}

//! # ブロックストア
//!
//! CIDをキーとするコンテンツアドレス型のキーバリューストア。
//! キーは値のハッシュなので、同じキーへの書き込みは常に同じ値になる。
//! 同一キーへの再書き込みは何もしない。

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::cid::Cid;
use crate::error::CoreError;

/// CIDとデータの組。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// コンテンツアドレス
    pub cid: Cid,
    /// ブロックの中身
    pub data: Bytes,
}

impl Block {
    /// rawコーデックのブロックを作る。
    pub fn raw(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            cid: Cid::raw(&data),
            data,
        }
    }

    /// dag-pbコーデックのブロックを作る。
    pub fn dag_pb(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            cid: Cid::dag_pb(&data),
            data,
        }
    }
}

/// ブロックストアの抽象インターフェース。
///
/// `put` は異なるキーに対する並行呼び出しで安全であること、
/// 同じキーに対しては冪等であることが要求される。
pub trait BlockStore: Send + Sync {
    /// ブロックを保存する。既に同じCIDがあれば何もしない。
    fn put(&self, block: Block);

    /// CIDに対応するデータを取得する。
    fn get(&self, cid: &Cid) -> Option<Bytes>;

    /// 保存済みの全ブロック。順序は不定。
    fn blocks(&self) -> Vec<Block>;

    /// 保存済みかどうか。
    fn contains(&self, cid: &Cid) -> bool {
        self.get(cid).is_some()
    }

    /// CIDに対応するデータを取得する。存在しなければエラー。
    fn require(&self, cid: &Cid) -> Result<Bytes, CoreError> {
        self.get(cid)
            .ok_or_else(|| CoreError::MissingBlock(cid.to_string()))
    }
}

/// メモリ上のブロックストア。
#[derive(Debug, Default)]
pub struct MemoryBlockStore {
    blocks: RwLock<HashMap<Cid, Bytes>>,
}

impl MemoryBlockStore {
    /// 空のストアを作る。
    pub fn new() -> Self {
        Self::default()
    }

    /// 共有用に `Arc<dyn BlockStore>` として作る。
    pub fn shared() -> Arc<dyn BlockStore> {
        Arc::new(Self::new())
    }

    /// 保存済みブロック数。
    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    /// 空かどうか。
    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }
}

impl BlockStore for MemoryBlockStore {
    fn put(&self, block: Block) {
        self.blocks.write().entry(block.cid).or_insert(block.data);
    }

    fn get(&self, cid: &Cid) -> Option<Bytes> {
        self.blocks.read().get(cid).cloned()
    }

    fn blocks(&self) -> Vec<Block> {
        self.blocks
            .read()
            .iter()
            .map(|(cid, data)| Block {
                cid: *cid,
                data: data.clone(),
            })
            .collect()
    }

    fn contains(&self, cid: &Cid) -> bool {
        self.blocks.read().contains_key(cid)
    }
}

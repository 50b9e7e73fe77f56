//! # CARアーカイブ
//!
//! ブロックストア上のDAGをCARv1形式に書き出し、また読み込む。
//!
//! ## フォーマット
//! ```text
//! varint(len) ‖ dag-cbor {roots: [CID], version: 1}
//! varint(len) ‖ CID ‖ data      // ブロックごとに繰り返す
//! ```
//!
//! ブロックはルートからの深さ優先（行きがけ順）で並べ、
//! 複数の親から参照されるブロックは最初の1回だけ出力する。

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use ciborium::value::Value;

use crate::block::{Block, BlockStore};
use crate::cid::{read_varint, varint_len, write_varint, Cid};
use crate::dagpb::links_of;
use crate::error::CoreError;
use crate::split::TreewalkSplitter;

/// CARのバージョン
const CAR_VERSION: u64 = 1;

/// dag-cborでCIDを表すタグ
const CBOR_CID_TAG: u64 = 42;

/// CARのContent-Type
pub const CAR_CONTENT_TYPE: &str = "application/car";

/// 1つのルートとそこから到達できるブロックからなるアーカイブ。
///
/// ブロックは共有ストアに置かれたまま参照され、書き出し時に辿る。
#[derive(Clone)]
pub struct CarArchive {
    root: Cid,
    store: Arc<dyn BlockStore>,
}

impl std::fmt::Debug for CarArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CarArchive").field("root", &self.root).finish()
    }
}

/// 同じルートを持つアーカイブは同じ内容を指す。
impl PartialEq for CarArchive {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
    }
}

impl CarArchive {
    /// ルートとストアからアーカイブを作る。
    pub fn new(root: Cid, store: Arc<dyn BlockStore>) -> Self {
        Self { root, store }
    }

    /// ルートCID
    pub fn root(&self) -> &Cid {
        &self.root
    }

    /// 参照しているブロックストア
    pub fn store(&self) -> &Arc<dyn BlockStore> {
        &self.store
    }

    /// ルートから到達できるブロックを行きがけ順に辿る。
    pub fn blocks(&self) -> DagWalk {
        DagWalk::new(self.store.clone(), self.root)
    }

    /// CARv1のバイト列に書き出す。
    pub fn to_bytes(&self) -> Result<Vec<u8>, CoreError> {
        let mut out = encode_header(&[self.root])?;
        for item in self.blocks() {
            let (block, _) = item?;
            write_section(&block, &mut out);
        }
        Ok(out)
    }

    /// 書き出した時のバイト数。
    pub fn encoded_len(&self) -> Result<usize, CoreError> {
        let mut len = encode_header(&[self.root])?.len();
        for item in self.blocks() {
            let (block, _) = item?;
            len += section_len(&block);
        }
        Ok(len)
    }

    /// 最大 `target_size` バイトのCARチャンクに分割する。
    pub fn split(&self, target_size: usize) -> Result<TreewalkSplitter, CoreError> {
        TreewalkSplitter::new(self.blocks(), self.root, target_size)
    }
}

/// ルートからの深さ優先探索。
///
/// 各要素は `(ブロック, ルートからの深さ)`。訪問済みのCIDは再度辿らない。
pub struct DagWalk {
    store: Arc<dyn BlockStore>,
    stack: Vec<(Cid, usize)>,
    visited: HashSet<Cid>,
}

impl DagWalk {
    fn new(store: Arc<dyn BlockStore>, root: Cid) -> Self {
        Self {
            store,
            stack: vec![(root, 0)],
            visited: HashSet::new(),
        }
    }
}

impl Iterator for DagWalk {
    type Item = Result<(Block, usize), CoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((cid, depth)) = self.stack.pop() {
            if !self.visited.insert(cid) {
                continue;
            }
            let result = self
                .store
                .require(&cid)
                .and_then(|data| links_of(&cid, &data).map(|links| (data, links)));
            let (data, links) = match result {
                Ok(v) => v,
                Err(e) => {
                    self.stack.clear();
                    return Some(Err(e));
                }
            };
            // 先頭のリンクから辿るため逆順に積む
            self.stack
                .extend(links.into_iter().rev().map(|child| (child, depth + 1)));
            return Some(Ok((Block { cid, data }, depth)));
        }
        None
    }
}

// ---------------------------------------------------------------------------
// 書き出し
// ---------------------------------------------------------------------------

/// varint長さ付きのCARヘッダを作る。
pub fn encode_header(roots: &[Cid]) -> Result<Vec<u8>, CoreError> {
    let roots = roots
        .iter()
        .map(|cid| {
            // dag-cborのCIDはmultibaseの恒等接頭辞 0x00 を付けたバイト列
            let mut bytes = Vec::with_capacity(cid.encoded_len() + 1);
            bytes.push(0x00);
            bytes.extend_from_slice(&cid.to_bytes());
            Value::Tag(CBOR_CID_TAG, Box::new(Value::Bytes(bytes)))
        })
        .collect();
    // dag-cborのキー順（長さ→バイト順）: "roots" < "version"
    let header = Value::Map(vec![
        (Value::Text("roots".to_string()), Value::Array(roots)),
        (
            Value::Text("version".to_string()),
            Value::Integer(CAR_VERSION.into()),
        ),
    ]);
    let mut encoded = Vec::new();
    ciborium::ser::into_writer(&header, &mut encoded)
        .map_err(|e| CoreError::Serialization(format!("CARヘッダのエンコードに失敗: {e}")))?;

    let mut out = Vec::with_capacity(varint_len(encoded.len() as u64) + encoded.len());
    write_varint(encoded.len() as u64, &mut out);
    out.extend_from_slice(&encoded);
    Ok(out)
}

/// ブロック1つ分のセクションを書き込む。
pub fn write_section(block: &Block, out: &mut Vec<u8>) {
    let cid = block.cid.to_bytes();
    write_varint((cid.len() + block.data.len()) as u64, out);
    out.extend_from_slice(&cid);
    out.extend_from_slice(&block.data);
}

/// ブロック1つ分のセクションのバイト数。
pub fn section_len(block: &Block) -> usize {
    let len = block.cid.encoded_len() + block.data.len();
    varint_len(len as u64) + len
}

// ---------------------------------------------------------------------------
// 読み込み
// ---------------------------------------------------------------------------

/// 読み込んだCAR。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCar {
    /// ヘッダのルート
    pub roots: Vec<Cid>,
    /// 出現順のブロック
    pub blocks: Vec<Block>,
}

/// CARv1を読み込む。各ブロックのハッシュも検証する。
pub fn read_car(bytes: &[u8]) -> Result<ParsedCar, CoreError> {
    let (header_len, n) = read_varint(bytes)?;
    let mut pos = n;
    let header_end = pos
        .checked_add(header_len as usize)
        .filter(|end| *end <= bytes.len())
        .ok_or_else(|| CoreError::Decode("CARヘッダが途中で切れています".to_string()))?;
    let roots = decode_header(&bytes[pos..header_end])?;
    pos = header_end;

    let mut blocks = Vec::new();
    while pos < bytes.len() {
        let (section_len, n) = read_varint(&bytes[pos..])?;
        pos += n;
        let end = pos
            .checked_add(section_len as usize)
            .filter(|end| *end <= bytes.len())
            .ok_or_else(|| CoreError::Decode("CARセクションが途中で切れています".to_string()))?;
        let (cid, used) = Cid::read_bytes(&bytes[pos..end])?;
        let data = Bytes::copy_from_slice(&bytes[pos + used..end]);
        if !cid.matches(&data) {
            return Err(CoreError::Decode(format!("ブロックのハッシュが一致しません: {cid}")));
        }
        blocks.push(Block { cid, data });
        pos = end;
    }
    Ok(ParsedCar { roots, blocks })
}

fn decode_header(encoded: &[u8]) -> Result<Vec<Cid>, CoreError> {
    let value: Value = ciborium::de::from_reader(encoded)
        .map_err(|e| CoreError::Decode(format!("CARヘッダのデコードに失敗: {e}")))?;
    let entries = value
        .as_map()
        .ok_or_else(|| CoreError::Decode("CARヘッダがmapではありません".to_string()))?;

    let field = |key: &str| {
        entries
            .iter()
            .find(|(k, _)| k.as_text() == Some(key))
            .map(|(_, v)| v)
    };

    let version = field("version")
        .and_then(Value::as_integer)
        .and_then(|v| u64::try_from(v).ok());
    if version != Some(CAR_VERSION) {
        return Err(CoreError::Decode(format!(
            "CARv1のみ対応しています: {version:?}"
        )));
    }

    let roots = field("roots")
        .and_then(Value::as_array)
        .ok_or_else(|| CoreError::Decode("CARヘッダにrootsがありません".to_string()))?;
    roots
        .iter()
        .map(|root| match root {
            Value::Tag(CBOR_CID_TAG, inner) => match inner.as_ref() {
                Value::Bytes(bytes) if bytes.first() == Some(&0x00) => Cid::from_bytes(&bytes[1..]),
                _ => Err(CoreError::Decode("CIDタグの中身が不正です".to_string())),
            },
            _ => Err(CoreError::Decode("rootsの要素がCIDではありません".to_string())),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemoryBlockStore;
    use crate::unixfs::{import_file, DirectoryBuilder};

    fn sample_archive() -> CarArchive {
        let store = MemoryBlockStore::shared();
        let mut dir = DirectoryBuilder::new();
        dir.add("a.txt", import_file(store.as_ref(), Bytes::from_static(b"aaa")))
            .unwrap();
        dir.add("b.txt", import_file(store.as_ref(), Bytes::from_static(b"bbb")))
            .unwrap();
        // 同じ内容のファイルは1ブロックにまとまる
        dir.add("c.txt", import_file(store.as_ref(), Bytes::from_static(b"aaa")))
            .unwrap();
        let root = dir.build(store.as_ref());
        CarArchive::new(root.cid, store)
    }

    /// 書き出したCARが読み込みで同じルートとブロックになることを確認
    #[test]
    fn test_write_and_read_car() {
        let car = sample_archive();
        let bytes = car.to_bytes().unwrap();
        assert_eq!(bytes.len(), car.encoded_len().unwrap());

        let parsed = read_car(&bytes).unwrap();
        assert_eq!(parsed.roots, vec![*car.root()]);
        // ルート + "aaa" + "bbb"（重複ブロックは1回のみ）
        assert_eq!(parsed.blocks.len(), 3);
        assert_eq!(parsed.blocks[0].cid, *car.root());
        assert_eq!(parsed.blocks[1].cid, Cid::raw(b"aaa"));
        assert_eq!(parsed.blocks[2].cid, Cid::raw(b"bbb"));
    }

    /// 改ざんされたブロックが読み込みで拒否されることを確認
    #[test]
    fn test_read_car_rejects_tampered_block() {
        let car = sample_archive();
        let mut bytes = car.to_bytes().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(matches!(read_car(&bytes), Err(CoreError::Decode(_))));
    }

    /// ストアに無いブロックを参照するとエラーになることを確認
    #[test]
    fn test_missing_block() {
        let store = MemoryBlockStore::shared();
        let mut dir = DirectoryBuilder::new();
        dir.add(
            "ghost",
            crate::unixfs::ImportedNode {
                cid: Cid::raw(b"never stored"),
                tsize: 12,
                size: 12,
            },
        )
        .unwrap();
        let root = dir.build(store.as_ref());
        let car = CarArchive::new(root.cid, store);
        assert!(matches!(car.to_bytes(), Err(CoreError::MissingBlock(_))));
    }

    #[test]
    fn test_header_round_trip() {
        let root = Cid::dag_pb(b"root");
        let header = encode_header(&[root]).unwrap();
        let parsed = read_car(&header).unwrap();
        assert_eq!(parsed.roots, vec![root]);
        assert!(parsed.blocks.is_empty());
    }
}

//! # UnixFS インポーター
//!
//! ファイルをrawリーフのバランス木に、ファイル群を名前付きリンクのディレクトリに変換し、
//! 生成したブロックをブロックストアに書き込む。
//!
//! - リーフは最大 [`DEFAULT_CHUNK_SIZE`] バイトのrawブロック
//! - 中間ノードは最大 [`DEFAULT_MAX_CHILDREN`] 本のリンクを持つdag-pbブロック
//! - 1チャンクに収まるファイルはrawブロックそのものがルートになる

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::block::{Block, BlockStore};
use crate::cid::Cid;
use crate::dagpb::{PbLink, PbNode, UnixFsData};
use crate::error::CoreError;

/// リーフチャンクの最大サイズ（1 MiB）
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// 中間ノードあたりの最大リンク数
pub const DEFAULT_MAX_CHILDREN: usize = 1024;

/// インポート済みDAGのルート。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportedNode {
    /// ルートCID
    pub cid: Cid,
    /// DAG全体のエンコード済みバイト数（PBLinkのTsize）
    pub tsize: u64,
    /// ファイル内容のバイト数
    pub size: u64,
}

impl ImportedNode {
    fn link(&self, name: Option<String>) -> PbLink {
        PbLink {
            cid: self.cid,
            name,
            tsize: Some(self.tsize),
        }
    }
}

/// ファイルをUnixFSのDAGに変換する。
#[derive(Debug, Clone, Copy)]
pub struct FileImporter {
    chunk_size: usize,
    max_children: usize,
}

impl Default for FileImporter {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_children: DEFAULT_MAX_CHILDREN,
        }
    }
}

impl FileImporter {
    /// チャンクサイズを変更する（最小1バイト）。
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// 中間ノードの最大リンク数を変更する（最小2本）。
    pub fn with_max_children(mut self, max_children: usize) -> Self {
        self.max_children = max_children.max(2);
        self
    }

    /// ファイル内容をインポートし、ルートを返す。
    pub fn import(&self, store: &dyn BlockStore, data: Bytes) -> ImportedNode {
        let mut level: Vec<ImportedNode> = Vec::with_capacity(data.len() / self.chunk_size + 1);
        let mut offset = 0;
        loop {
            let end = (offset + self.chunk_size).min(data.len());
            let block = Block::raw(data.slice(offset..end));
            let len = block.data.len() as u64;
            level.push(ImportedNode {
                cid: block.cid,
                tsize: len,
                size: len,
            });
            store.put(block);
            offset = end;
            if offset >= data.len() {
                break;
            }
        }

        while level.len() > 1 {
            level = level
                .chunks(self.max_children)
                .map(|children| Self::parent(store, children))
                .collect();
        }
        level[0]
    }

    fn parent(store: &dyn BlockStore, children: &[ImportedNode]) -> ImportedNode {
        let node = PbNode {
            links: children.iter().map(|c| c.link(None)).collect(),
            data: Some(UnixFsData::file(children.iter().map(|c| c.size).collect()).encode()),
        };
        let block = Block::dag_pb(node.encode());
        let imported = ImportedNode {
            cid: block.cid,
            tsize: block.data.len() as u64 + children.iter().map(|c| c.tsize).sum::<u64>(),
            size: children.iter().map(|c| c.size).sum(),
        };
        store.put(block);
        imported
    }
}

/// デフォルト設定でファイルをインポートする。
pub fn import_file(store: &dyn BlockStore, data: Bytes) -> ImportedNode {
    FileImporter::default().import(store, data)
}

/// ディレクトリエントリ名として使えるか。
pub fn is_valid_entry_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('/') && name != "." && name != ".."
}

/// 名前付きリンクからディレクトリノードを組み立てる。
///
/// リンクは名前のバイト順に並べる。
#[derive(Debug, Clone, Default)]
pub struct DirectoryBuilder {
    entries: BTreeMap<String, ImportedNode>,
}

impl DirectoryBuilder {
    /// 空のディレクトリ。
    pub fn new() -> Self {
        Self::default()
    }

    /// エントリを追加する。
    pub fn add(&mut self, name: impl Into<String>, node: ImportedNode) -> Result<(), CoreError> {
        let name = name.into();
        if !is_valid_entry_name(&name) {
            return Err(CoreError::InvalidFilename(name));
        }
        if self.entries.contains_key(&name) {
            return Err(CoreError::DuplicateFilename(name));
        }
        self.entries.insert(name, node);
        Ok(())
    }

    /// エントリ数。
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 空かどうか。
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// dag-pbノードを組み立てる（ストアには書き込まない）。
    pub fn to_node(&self) -> PbNode {
        PbNode {
            links: self
                .entries
                .iter()
                .map(|(name, node)| node.link(Some(name.clone())))
                .collect(),
            data: Some(UnixFsData::directory().encode()),
        }
    }

    /// ディレクトリブロックをストアに書き込み、ルートを返す。
    pub fn build(&self, store: &dyn BlockStore) -> ImportedNode {
        let block = Block::dag_pb(self.to_node().encode());
        let imported = ImportedNode {
            cid: block.cid,
            tsize: block.data.len() as u64 + self.entries.values().map(|n| n.tsize).sum::<u64>(),
            size: self.entries.values().map(|n| n.size).sum(),
        };
        store.put(block);
        imported
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemoryBlockStore;
    use crate::dagpb::UnixFsType;

    /// 1チャンクに収まるファイルはrawブロックがルートになることを確認
    #[test]
    fn test_small_file_is_single_raw_block() {
        let store = MemoryBlockStore::new();
        let node = import_file(&store, Bytes::from_static(b"hello"));
        assert_eq!(node.cid, Cid::raw(b"hello"));
        assert_eq!(node.size, 5);
        assert_eq!(node.tsize, 5);
        assert_eq!(store.len(), 1);
    }

    /// 複数チャンクのファイルがバランス木になることを確認
    #[test]
    fn test_chunked_file_tree() {
        let store = MemoryBlockStore::new();
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let node = FileImporter::default()
            .with_chunk_size(100)
            .with_max_children(4)
            .import(&store, Bytes::from(data));

        // 10リーフ → 3ノード → 1ルート
        assert_eq!(node.size, 1000);
        assert_eq!(store.len(), 10 + 3 + 1);

        let root = PbNode::decode(&store.get(&node.cid).unwrap()).unwrap();
        assert_eq!(root.links.len(), 3);
        let unixfs = UnixFsData::decode(root.data.as_deref().unwrap()).unwrap();
        assert_eq!(unixfs.kind, UnixFsType::File);
        assert_eq!(unixfs.filesize, Some(1000));
        assert_eq!(unixfs.blocksizes, vec![400, 400, 200]);
    }

    /// ディレクトリのリンクが名前順に並び、重複・不正な名前が拒否されることを確認
    #[test]
    fn test_directory_builder() {
        let store = MemoryBlockStore::new();
        let b = import_file(&store, Bytes::from_static(b"b"));
        let a = import_file(&store, Bytes::from_static(b"a"));

        let mut dir = DirectoryBuilder::new();
        dir.add("b.txt", b).unwrap();
        dir.add("a.txt", a).unwrap();
        assert!(matches!(
            dir.add("a.txt", a),
            Err(CoreError::DuplicateFilename(_))
        ));
        assert!(matches!(
            dir.add("sub/a.txt", a),
            Err(CoreError::InvalidFilename(_))
        ));
        assert!(matches!(dir.add("", a), Err(CoreError::InvalidFilename(_))));

        let root = dir.build(&store);
        let node = PbNode::decode(&store.get(&root.cid).unwrap()).unwrap();
        let names: Vec<_> = node.links.iter().map(|l| l.name.clone().unwrap()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
        assert_eq!(root.size, 2);
    }
}

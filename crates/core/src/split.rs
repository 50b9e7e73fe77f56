//! # CARの分割と再結合
//!
//! DAGを深さ優先で辿りながら、指定サイズ以下のCARチャンクを順に切り出す。
//! 各チャンクはヘッダに元のルートを持ち、先頭ブロックの祖先ブロックを再掲するので、
//! チャンク単体でもルートから辿れる部分DAGになる。
//!
//! 再掲された祖先は必ず前のチャンクに出現済みのため、全チャンクのブロックを
//! 出現順に重複排除して並べると元のCARと同じ並びに戻る（[`join_car_chunks`]）。

use std::collections::HashSet;

use bytes::Bytes;

use crate::block::Block;
use crate::car::{encode_header, read_car, section_len, write_section, DagWalk};
use crate::cid::Cid;
use crate::error::CoreError;

/// 1チャンクの目標最大サイズ（10 MiB）
pub const DEFAULT_TARGET_SIZE: usize = 10 * 1024 * 1024;

/// 分割されたCARの1片。
#[derive(Debug, Clone)]
pub struct CarChunk {
    /// CARv1のバイト列
    pub bytes: Bytes,
    /// 含まれるブロック数（再掲された祖先を含む）
    pub block_count: usize,
}

impl CarChunk {
    /// バイト数
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// ブロックを含まないか
    pub fn is_empty(&self) -> bool {
        self.block_count == 0
    }
}

/// 深さ優先でCARを分割するイテレータ。
///
/// ブロックはストアから必要な分だけ読み、チャンクは1つずつ組み立てる。
pub struct TreewalkSplitter {
    walk: DagWalk,
    header: Vec<u8>,
    target_size: usize,
    /// 直前に出力したブロックまでの祖先の列
    path: Vec<Block>,
    current: Vec<Block>,
    current_size: usize,
    /// `current` に祖先の再掲以外のブロックがあるか
    has_own_blocks: bool,
    done: bool,
}

impl TreewalkSplitter {
    pub(crate) fn new(walk: DagWalk, root: Cid, target_size: usize) -> Result<Self, CoreError> {
        let header = encode_header(&[root])?;
        let current_size = header.len();
        Ok(Self {
            walk,
            header,
            target_size,
            path: Vec::new(),
            current: Vec::new(),
            current_size,
            has_own_blocks: false,
            done: false,
        })
    }

    /// 現在のチャンクを確定し、`next_prefix` を先頭に持つ新しいチャンクを始める。
    fn flush(&mut self, next_prefix: Vec<Block>) -> CarChunk {
        let mut bytes = Vec::with_capacity(self.current_size);
        bytes.extend_from_slice(&self.header);
        for block in &self.current {
            write_section(block, &mut bytes);
        }
        let chunk = CarChunk {
            bytes: Bytes::from(bytes),
            block_count: self.current.len(),
        };
        self.current_size = self.header.len() + next_prefix.iter().map(section_len).sum::<usize>();
        self.current = next_prefix;
        self.has_own_blocks = false;
        chunk
    }
}

impl Iterator for TreewalkSplitter {
    type Item = Result<CarChunk, CoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.walk.next() {
                None => {
                    self.done = true;
                    if self.has_own_blocks {
                        return Some(Ok(self.flush(Vec::new())));
                    }
                    return None;
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                Some(Ok((block, depth))) => {
                    self.path.truncate(depth);
                    let size = section_len(&block);
                    let emitted = if self.has_own_blocks && self.current_size + size > self.target_size {
                        let ancestors = self.path.clone();
                        Some(self.flush(ancestors))
                    } else {
                        None
                    };
                    self.current_size += size;
                    self.current.push(block.clone());
                    self.has_own_blocks = true;
                    self.path.push(block);
                    if let Some(chunk) = emitted {
                        return Some(Ok(chunk));
                    }
                }
            }
        }
    }
}

/// 分割されたチャンクを出力順に結合し、元のCARを復元する。
///
/// 全チャンクのルートが一致している必要がある。
pub fn join_car_chunks<I, B>(chunks: I) -> Result<Vec<u8>, CoreError>
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut roots: Option<Vec<Cid>> = None;
    let mut seen = HashSet::new();
    let mut blocks = Vec::new();
    for chunk in chunks {
        let parsed = read_car(chunk.as_ref())?;
        match &roots {
            None => roots = Some(parsed.roots),
            Some(expected) if *expected != parsed.roots => {
                return Err(CoreError::Decode(format!(
                    "チャンクのルートが一致しません: {expected:?} != {:?}",
                    parsed.roots
                )));
            }
            Some(_) => {}
        }
        for block in parsed.blocks {
            if seen.insert(block.cid) {
                blocks.push(block);
            }
        }
    }
    let roots = roots.ok_or_else(|| CoreError::Decode("チャンクがありません".to_string()))?;
    let mut out = encode_header(&roots)?;
    for block in &blocks {
        write_section(block, &mut out);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockStore, MemoryBlockStore};
    use crate::car::CarArchive;
    use crate::unixfs::{DirectoryBuilder, FileImporter};

    /// 多数のチャンクに分かれる入れ子のディレクトリ
    fn nested_archive() -> CarArchive {
        let store = MemoryBlockStore::shared();
        let importer = FileImporter::default()
            .with_chunk_size(256)
            .with_max_children(8);
        let mut outer = DirectoryBuilder::new();
        for d in 0..3u8 {
            let mut inner = DirectoryBuilder::new();
            for f in 0..4u8 {
                let data: Vec<u8> = (0..3000u32)
                    .map(|i| ((i as u8) ^ d ^ (f << 4)).wrapping_add((i >> 8) as u8))
                    .collect();
                inner
                    .add(format!("file-{f}.bin"), importer.import(store.as_ref(), Bytes::from(data)))
                    .unwrap();
            }
            outer.add(format!("dir-{d}"), inner.build(store.as_ref())).unwrap();
        }
        let root = outer.build(store.as_ref());
        CarArchive::new(root.cid, store)
    }

    /// 分割したチャンクを結合すると元のCARとバイト単位で一致することを確認
    #[test]
    fn test_split_then_join_is_identical() {
        let car = nested_archive();
        let original = car.to_bytes().unwrap();

        let chunks: Vec<CarChunk> = car
            .split(2048)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert!(chunks.len() > 10, "チャンク数: {}", chunks.len());

        let joined = join_car_chunks(chunks.iter().map(|c| c.bytes.clone())).unwrap();
        assert_eq!(joined, original);
    }

    /// 各チャンクがサイズ上限以内で、ルートから辿れる形になっていることを確認
    #[test]
    fn test_chunks_are_bounded_and_rooted() {
        let car = nested_archive();
        let target = 2048;
        for chunk in car.split(target).unwrap() {
            let chunk = chunk.unwrap();
            assert!(chunk.len() <= target, "チャンクが大きすぎる: {}", chunk.len());

            let parsed = read_car(&chunk.bytes).unwrap();
            assert_eq!(parsed.roots, vec![*car.root()]);
            // 先頭は常にルートブロック
            assert_eq!(parsed.blocks[0].cid, *car.root());
            assert_eq!(parsed.blocks.len(), chunk.block_count);
        }
    }

    /// 上限より小さいアーカイブは1チャンクになり、元のCARと一致することを確認
    #[test]
    fn test_small_archive_single_chunk() {
        let car = nested_archive();
        let original = car.to_bytes().unwrap();
        let chunks: Vec<_> = car
            .split(DEFAULT_TARGET_SIZE)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(&chunks[0].bytes[..], &original[..]);
    }

    /// 上限より大きい単一ブロックも1チャンクとして出力されることを確認
    #[test]
    fn test_oversized_block() {
        let store = MemoryBlockStore::shared();
        let block = Block::raw(vec![7u8; 5000]);
        let cid = block.cid;
        store.put(block);
        let car = CarArchive::new(cid, store);
        let chunks: Vec<_> = car
            .split(1024)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].block_count, 1);
    }

    #[test]
    fn test_join_rejects_mismatched_roots() {
        let a = encode_header(&[Cid::raw(b"a")]).unwrap();
        let b = encode_header(&[Cid::raw(b"b")]).unwrap();
        assert!(join_car_chunks([a, b]).is_err());
        assert!(join_car_chunks(Vec::<Vec<u8>>::new()).is_err());
    }
}

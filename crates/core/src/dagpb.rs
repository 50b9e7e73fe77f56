//! # dag-pb / UnixFS エンコーダ
//!
//! ディレクトリやファイルのノードを表すdag-pbブロックのprotobufエンコード・デコード。
//!
//! ```text
//! PBNode { Links: [PBLink] = 2; Data: bytes = 1 }   // Links, Data の順で出力
//! PBLink { Hash: bytes = 1; Name: string = 2; Tsize: uint64 = 3 }
//! UnixFS Data { Type = 1; Data = 2; filesize = 3; blocksizes = 4 }
//! ```

use crate::cid::{read_varint, varint_len, write_varint, Cid};
use crate::error::CoreError;

const WIRE_VARINT: u64 = 0;
const WIRE_LEN: u64 = 2;

/// 名前付きリンク。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PbLink {
    /// リンク先
    pub cid: Cid,
    /// エントリ名（ファイルのチャンクリンクでは省略）
    pub name: Option<String>,
    /// リンク先DAG全体のバイト数
    pub tsize: Option<u64>,
}

impl PbLink {
    /// エンコード後のバイト数。
    pub fn encoded_len(&self) -> usize {
        let cid_len = self.cid.encoded_len();
        let mut len = 1 + varint_len(cid_len as u64) + cid_len;
        if let Some(name) = &self.name {
            len += 1 + varint_len(name.len() as u64) + name.len();
        }
        if let Some(tsize) = self.tsize {
            len += 1 + varint_len(tsize);
        }
        len
    }

    fn encode(&self, out: &mut Vec<u8>) {
        write_bytes_field(1, &self.cid.to_bytes(), out);
        if let Some(name) = &self.name {
            write_bytes_field(2, name.as_bytes(), out);
        }
        if let Some(tsize) = self.tsize {
            write_varint_field(3, tsize, out);
        }
    }

    fn decode(buf: &[u8]) -> Result<Self, CoreError> {
        let mut cid = None;
        let mut name = None;
        let mut tsize = None;
        for field in Fields::new(buf) {
            match field? {
                Field::Bytes(1, bytes) => cid = Some(Cid::from_bytes(bytes)?),
                Field::Bytes(2, bytes) => {
                    name = Some(
                        String::from_utf8(bytes.to_vec())
                            .map_err(|e| CoreError::Decode(format!("リンク名がUTF-8ではありません: {e}")))?,
                    );
                }
                Field::Varint(3, value) => tsize = Some(value),
                other => {
                    return Err(CoreError::Decode(format!("PBLinkの未知のフィールド: {other:?}")));
                }
            }
        }
        let cid = cid.ok_or_else(|| CoreError::Decode("PBLinkにHashがありません".to_string()))?;
        Ok(Self { cid, name, tsize })
    }
}

/// dag-pbノード。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PbNode {
    /// 子へのリンク
    pub links: Vec<PbLink>,
    /// ペイロード（UnixFSのData）
    pub data: Option<Vec<u8>>,
}

impl PbNode {
    /// protobufにエンコードする。
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        for link in &self.links {
            let mut inner = Vec::with_capacity(link.encoded_len());
            link.encode(&mut inner);
            write_bytes_field(2, &inner, &mut out);
        }
        if let Some(data) = &self.data {
            write_bytes_field(1, data, &mut out);
        }
        out
    }

    /// エンコード後のバイト数。
    pub fn encoded_len(&self) -> usize {
        let links: usize = self
            .links
            .iter()
            .map(|l| {
                let len = l.encoded_len();
                1 + varint_len(len as u64) + len
            })
            .sum();
        let data = self
            .data
            .as_ref()
            .map_or(0, |d| 1 + varint_len(d.len() as u64) + d.len());
        links + data
    }

    /// protobufからデコードする。
    pub fn decode(buf: &[u8]) -> Result<Self, CoreError> {
        let mut node = PbNode::default();
        for field in Fields::new(buf) {
            match field? {
                Field::Bytes(2, bytes) => node.links.push(PbLink::decode(bytes)?),
                Field::Bytes(1, bytes) => node.data = Some(bytes.to_vec()),
                other => {
                    return Err(CoreError::Decode(format!("PBNodeの未知のフィールド: {other:?}")));
                }
            }
        }
        Ok(node)
    }
}

/// リンク先のCID一覧を取り出す。rawブロックにはリンクがない。
pub fn links_of(cid: &Cid, data: &[u8]) -> Result<Vec<Cid>, CoreError> {
    if cid.codec() != crate::cid::DAG_PB_CODEC {
        return Ok(Vec::new());
    }
    Ok(PbNode::decode(data)?
        .links
        .into_iter()
        .map(|l| l.cid)
        .collect())
}

// ---------------------------------------------------------------------------
// UnixFS
// ---------------------------------------------------------------------------

/// UnixFSのノード種別。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnixFsType {
    /// ディレクトリ
    Directory,
    /// ファイル
    File,
}

impl UnixFsType {
    const fn code(self) -> u64 {
        match self {
            UnixFsType::Directory => 1,
            UnixFsType::File => 2,
        }
    }

    fn from_code(code: u64) -> Result<Self, CoreError> {
        match code {
            1 => Ok(UnixFsType::Directory),
            2 => Ok(UnixFsType::File),
            other => Err(CoreError::Decode(format!("未対応のUnixFS種別: {other}"))),
        }
    }
}

/// UnixFSのDataメッセージ。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnixFsData {
    /// 種別
    pub kind: UnixFsType,
    /// ファイルサイズ（ファイルのみ）
    pub filesize: Option<u64>,
    /// 子チャンクそれぞれのサイズ（ファイルのみ）
    pub blocksizes: Vec<u64>,
}

impl UnixFsData {
    /// ディレクトリ
    pub fn directory() -> Self {
        Self {
            kind: UnixFsType::Directory,
            filesize: None,
            blocksizes: Vec::new(),
        }
    }

    /// 複数チャンクのファイル
    pub fn file(blocksizes: Vec<u64>) -> Self {
        Self {
            kind: UnixFsType::File,
            filesize: Some(blocksizes.iter().sum()),
            blocksizes,
        }
    }

    /// protobufにエンコードする。
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_varint_field(1, self.kind.code(), &mut out);
        if let Some(filesize) = self.filesize {
            write_varint_field(3, filesize, &mut out);
        }
        for size in &self.blocksizes {
            write_varint_field(4, *size, &mut out);
        }
        out
    }

    /// protobufからデコードする。
    pub fn decode(buf: &[u8]) -> Result<Self, CoreError> {
        let mut kind = None;
        let mut filesize = None;
        let mut blocksizes = Vec::new();
        for field in Fields::new(buf) {
            match field? {
                Field::Varint(1, code) => kind = Some(UnixFsType::from_code(code)?),
                Field::Varint(3, value) => filesize = Some(value),
                Field::Varint(4, value) => blocksizes.push(value),
                // Data(2) 等はここでは使わない
                _ => {}
            }
        }
        let kind = kind.ok_or_else(|| CoreError::Decode("UnixFSのTypeがありません".to_string()))?;
        Ok(Self {
            kind,
            filesize,
            blocksizes,
        })
    }
}

// ---------------------------------------------------------------------------
// protobuf
// ---------------------------------------------------------------------------

fn write_bytes_field(field: u64, bytes: &[u8], out: &mut Vec<u8>) {
    write_varint((field << 3) | WIRE_LEN, out);
    write_varint(bytes.len() as u64, out);
    out.extend_from_slice(bytes);
}

fn write_varint_field(field: u64, value: u64, out: &mut Vec<u8>) {
    write_varint((field << 3) | WIRE_VARINT, out);
    write_varint(value, out);
}

#[derive(Debug)]
enum Field<'a> {
    Varint(u64, u64),
    Bytes(u64, &'a [u8]),
}

struct Fields<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Fields<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn read_field(&mut self) -> Result<Field<'a>, CoreError> {
        let (key, n) = read_varint(&self.buf[self.pos..])?;
        self.pos += n;
        let number = key >> 3;
        match key & 7 {
            WIRE_VARINT => {
                let (value, n) = read_varint(&self.buf[self.pos..])?;
                self.pos += n;
                Ok(Field::Varint(number, value))
            }
            WIRE_LEN => {
                let (len, n) = read_varint(&self.buf[self.pos..])?;
                self.pos += n;
                let end = self
                    .pos
                    .checked_add(len as usize)
                    .filter(|end| *end <= self.buf.len())
                    .ok_or_else(|| CoreError::Decode("フィールド長がバッファを超えています".to_string()))?;
                let bytes = &self.buf[self.pos..end];
                self.pos = end;
                Ok(Field::Bytes(number, bytes))
            }
            wire => Err(CoreError::Decode(format!("未対応のwire type: {wire}"))),
        }
    }
}

impl<'a> Iterator for Fields<'a> {
    type Item = Result<Field<'a>, CoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.buf.len() {
            return None;
        }
        let field = self.read_field();
        if field.is_err() {
            // 以降は読めないので打ち切る
            self.pos = self.buf.len();
        }
        Some(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 空ディレクトリのエンコード結果が既知のCIDになることを確認
    #[test]
    fn test_empty_directory_known_cid() {
        let node = PbNode {
            links: Vec::new(),
            data: Some(UnixFsData::directory().encode()),
        };
        let bytes = node.encode();
        assert_eq!(bytes, vec![0x0a, 0x02, 0x08, 0x01]);
        assert_eq!(
            Cid::dag_pb(&bytes).to_string(),
            "bafybeiczsscdsbs7ffqz55asqdf3smv6klcw3gofszvwlyarci47bgf354"
        );
    }

    /// リンクとデータを含むノードがデコードで復元されることを確認
    #[test]
    fn test_node_encode_decode() {
        let node = PbNode {
            links: vec![
                PbLink {
                    cid: Cid::raw(b"a"),
                    name: Some("a.png".to_string()),
                    tsize: Some(1),
                },
                PbLink {
                    cid: Cid::raw(b"b"),
                    name: None,
                    tsize: None,
                },
            ],
            data: Some(UnixFsData::file(vec![1, 1]).encode()),
        };
        let bytes = node.encode();
        assert_eq!(bytes.len(), node.encoded_len());
        let decoded = PbNode::decode(&bytes).unwrap();
        assert_eq!(decoded, node);

        let unixfs = UnixFsData::decode(decoded.data.as_deref().unwrap()).unwrap();
        assert_eq!(unixfs.kind, UnixFsType::File);
        assert_eq!(unixfs.filesize, Some(2));
        assert_eq!(unixfs.blocksizes, vec![1, 1]);
    }

    #[test]
    fn test_decode_truncated() {
        assert!(PbNode::decode(&[0x12, 0x10, 0x0a]).is_err());
    }

    #[test]
    fn test_links_of_raw_block() {
        let cid = Cid::raw(b"leaf");
        assert!(links_of(&cid, b"leaf").unwrap().is_empty());
    }
}

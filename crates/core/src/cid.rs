//! # コンテンツアドレス (CID)
//!
//! CIDv1 + sha2-256 のみを扱う。文字列表現はmultibaseのbase32小文字（`b` 接頭辞）。
//!
//! ## バイナリ表現
//! ```text
//! varint(1) ‖ varint(codec) ‖ 0x12 ‖ 0x20 ‖ sha256(data)
//! ```

use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// CIDのバージョン
const CID_VERSION: u64 = 1;

/// multicodec: raw（生バイト列）
pub const RAW_CODEC: u64 = 0x55;

/// multicodec: dag-pb（UnixFSのノード）
pub const DAG_PB_CODEC: u64 = 0x70;

/// multihash: sha2-256
const SHA2_256_CODE: u64 = 0x12;

/// sha2-256ダイジェストの長さ
const DIGEST_LEN: usize = 32;

/// base32のmultibase接頭辞
const BASE32_PREFIX: char = 'b';

/// RFC 4648 base32（小文字）
const BASE32_ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

/// ブロックのコンテンツアドレス。
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cid {
    codec: u64,
    digest: [u8; DIGEST_LEN],
}

impl Cid {
    /// 指定codecでデータをハッシュしてCIDを作る。
    pub fn new_v1(codec: u64, data: &[u8]) -> Self {
        Self {
            codec,
            digest: mplx_crypto::sha256(data),
        }
    }

    /// rawブロックのCID。
    pub fn raw(data: &[u8]) -> Self {
        Self::new_v1(RAW_CODEC, data)
    }

    /// dag-pbブロックのCID。
    pub fn dag_pb(data: &[u8]) -> Self {
        Self::new_v1(DAG_PB_CODEC, data)
    }

    /// multicodec
    pub fn codec(&self) -> u64 {
        self.codec
    }

    /// sha2-256ダイジェスト
    pub fn digest(&self) -> &[u8; DIGEST_LEN] {
        &self.digest
    }

    /// データがこのCIDに一致するか。
    pub fn matches(&self, data: &[u8]) -> bool {
        mplx_crypto::sha256(data) == self.digest
    }

    /// バイナリ表現の長さ。
    pub fn encoded_len(&self) -> usize {
        varint_len(CID_VERSION) + varint_len(self.codec) + varint_len(SHA2_256_CODE) + 1 + DIGEST_LEN
    }

    /// バイナリ表現。
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        write_varint(CID_VERSION, &mut out);
        write_varint(self.codec, &mut out);
        write_varint(SHA2_256_CODE, &mut out);
        out.push(DIGEST_LEN as u8);
        out.extend_from_slice(&self.digest);
        out
    }

    /// バッファ先頭のCIDを読み取り、消費したバイト数と共に返す。
    pub fn read_bytes(buf: &[u8]) -> Result<(Self, usize), CoreError> {
        let mut pos = 0;
        let (version, n) = read_varint(&buf[pos..])?;
        pos += n;
        if version != CID_VERSION {
            return Err(CoreError::InvalidCid(format!(
                "CIDv1のみ対応しています: version {version}"
            )));
        }
        let (codec, n) = read_varint(&buf[pos..])?;
        pos += n;
        let (hash_code, n) = read_varint(&buf[pos..])?;
        pos += n;
        if hash_code != SHA2_256_CODE {
            return Err(CoreError::InvalidCid(format!(
                "sha2-256以外のmultihashです: 0x{hash_code:x}"
            )));
        }
        let (len, n) = read_varint(&buf[pos..])?;
        pos += n;
        if len as usize != DIGEST_LEN {
            return Err(CoreError::InvalidCid(format!("ダイジェスト長が不正です: {len}")));
        }
        let digest: [u8; DIGEST_LEN] = buf
            .get(pos..pos + DIGEST_LEN)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| CoreError::InvalidCid("ダイジェストが途中で切れています".to_string()))?;
        pos += DIGEST_LEN;
        Ok((Self { codec, digest }, pos))
    }

    /// バイナリ表現からCIDを復元する。余分なバイトはエラー。
    pub fn from_bytes(buf: &[u8]) -> Result<Self, CoreError> {
        let (cid, used) = Self::read_bytes(buf)?;
        if used != buf.len() {
            return Err(CoreError::InvalidCid(format!(
                "CIDの後ろに余分なバイトがあります: {} bytes",
                buf.len() - used
            )));
        }
        Ok(cid)
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{BASE32_PREFIX}{}", base32_encode(&self.to_bytes()))
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({self})")
    }
}

impl FromStr for Cid {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let encoded = s.strip_prefix(BASE32_PREFIX).ok_or_else(|| {
            CoreError::InvalidCid(format!("base32 (b) のCIDv1文字列のみ対応しています: {s}"))
        })?;
        Self::from_bytes(&base32_decode(encoded)?)
    }
}

impl serde::Serialize for Cid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Cid {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// unsigned varint
// ---------------------------------------------------------------------------

/// unsigned-varint（LEB128）を書き込む。
pub(crate) fn write_varint(mut value: u64, out: &mut Vec<u8>) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// unsigned-varintを読み取り、値と消費バイト数を返す。
pub(crate) fn read_varint(buf: &[u8]) -> Result<(u64, usize), CoreError> {
    let mut value = 0u64;
    for (i, &byte) in buf.iter().enumerate() {
        if i >= 10 {
            return Err(CoreError::Decode("varintが長すぎます".to_string()));
        }
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(CoreError::Decode("varintが途中で切れています".to_string()))
}

/// unsigned-varintでエンコードした時のバイト数。
pub const fn varint_len(value: u64) -> usize {
    let mut len = 1;
    let mut rest = value >> 7;
    while rest > 0 {
        len += 1;
        rest >>= 7;
    }
    len
}

// ---------------------------------------------------------------------------
// base32
// ---------------------------------------------------------------------------

fn base32_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity((data.len() * 8).div_ceil(5));
    let mut buffer: u32 = 0;
    let mut bits = 0u32;
    for &byte in data {
        buffer = (buffer << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BASE32_ALPHABET[((buffer >> bits) & 31) as usize] as char);
        }
        buffer &= (1 << bits) - 1;
    }
    if bits > 0 {
        out.push(BASE32_ALPHABET[((buffer << (5 - bits)) & 31) as usize] as char);
    }
    out
}

fn base32_decode(encoded: &str) -> Result<Vec<u8>, CoreError> {
    let mut out = Vec::with_capacity(encoded.len() * 5 / 8);
    let mut buffer: u32 = 0;
    let mut bits = 0u32;
    for c in encoded.bytes() {
        let value = BASE32_ALPHABET
            .iter()
            .position(|&a| a == c)
            .ok_or_else(|| CoreError::InvalidCid(format!("base32に含まれない文字です: {:?}", c as char)))?;
        buffer = (buffer << 5) | value as u32;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push((buffer >> bits) as u8);
        }
        buffer &= (1 << bits) - 1;
    }
    Ok(out)
}

//! # mplx 暗号処理
//!
//! アップロードトークンの署名・検証と、公開鍵から発行者IDを導出する処理を提供する。
//!
//! ## 暗号アルゴリズム
//! | 用途 | アルゴリズム |
//! |------|------------|
//! | 署名 | Ed25519 |
//! | ハッシュ | SHA-256 |
//! | 発行者ID | `did:key` (multicodec `ed25519-pub` + base58btc) |
//! | トークンのセグメント | base64url（パディングなし） |

use base58::{FromBase58, ToBase58};
use base64::Engine;
use ed25519_dalek::{Signer, Verifier};
use sha2::{Digest, Sha256};

pub use ed25519_dalek::{
    Signature as Ed25519Signature, SigningKey as Ed25519SigningKey,
    VerifyingKey as Ed25519VerifyingKey,
};

/// 暗号処理のエラー型
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Ed25519署名検証エラー
    #[error("Ed25519署名検証に失敗しました")]
    SignatureVerifyError,
    /// 署名の長さが不正
    #[error("署名は64バイトである必要があります: {0} bytes")]
    InvalidSignatureLength(usize),
    /// 公開鍵・秘密鍵が不正
    #[error("鍵が不正です: {0}")]
    InvalidKey(String),
    /// did:keyの形式が不正
    #[error("did:keyの形式が不正です: {0}")]
    InvalidDid(String),
    /// base64urlデコードエラー
    #[error("base64urlデコードに失敗しました: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// `did:key` の接頭辞。`z` はmultibaseのbase58btcを表す。
pub const DID_KEY_PREFIX: &str = "did:key:z";

/// multicodec `ed25519-pub` (0xed) のunsigned-varint表現。
pub const ED25519_PUB_MULTICODEC: [u8; 2] = [0xed, 0x01];

/// Base64エンジン（URL-safe、パディングなし）
pub fn b64url() -> base64::engine::GeneralPurpose {
    base64::engine::general_purpose::URL_SAFE_NO_PAD
}

/// Ed25519による署名。
pub fn ed25519_sign(signing_key: &Ed25519SigningKey, message: &[u8]) -> Ed25519Signature {
    signing_key.sign(message)
}

/// Ed25519による署名検証。
pub fn ed25519_verify(
    verifying_key: &Ed25519VerifyingKey,
    message: &[u8],
    signature: &Ed25519Signature,
) -> Result<(), CryptoError> {
    verifying_key
        .verify(message, signature)
        .map_err(|_| CryptoError::SignatureVerifyError)
}

/// バイト列からEd25519署名を復元する。
pub fn signature_from_bytes(bytes: &[u8]) -> Result<Ed25519Signature, CryptoError> {
    let arr: [u8; 64] = bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidSignatureLength(bytes.len()))?;
    Ok(Ed25519Signature::from_bytes(&arr))
}

/// SHA-256ハッシュ計算。
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Ed25519公開鍵から `did:key` を導出する。
///
/// `did:key:z` + base58btc(`0xed 0x01` ‖ 公開鍵32バイト)。
/// 逆変換は [`public_key_from_did_key`]。
pub fn did_key_from_public_key(public_key: &[u8; 32]) -> String {
    let mut bytes = Vec::with_capacity(ED25519_PUB_MULTICODEC.len() + public_key.len());
    bytes.extend_from_slice(&ED25519_PUB_MULTICODEC);
    bytes.extend_from_slice(public_key);
    format!("{DID_KEY_PREFIX}{}", bytes.to_base58())
}

/// `did:key` からEd25519公開鍵を取り出す。
pub fn public_key_from_did_key(did: &str) -> Result<Ed25519VerifyingKey, CryptoError> {
    let encoded = did
        .strip_prefix(DID_KEY_PREFIX)
        .ok_or_else(|| CryptoError::InvalidDid(format!("接頭辞がありません: {did}")))?;
    let bytes = encoded
        .from_base58()
        .map_err(|e| CryptoError::InvalidDid(format!("base58デコード失敗: {e:?}")))?;
    let key_bytes = bytes
        .strip_prefix(&ED25519_PUB_MULTICODEC[..])
        .ok_or_else(|| CryptoError::InvalidDid("ed25519-pub以外のmulticodecです".to_string()))?;
    let key: [u8; 32] = key_bytes.try_into().map_err(|_| {
        CryptoError::InvalidDid(format!("公開鍵は32バイトである必要があります: {}", key_bytes.len()))
    })?;
    Ed25519VerifyingKey::from_bytes(&key).map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

/// Solana形式の64バイトキーペア（秘密鍵32バイト ‖ 公開鍵32バイト）から署名鍵を復元する。
///
/// 後半の公開鍵が秘密鍵から導出したものと一致しない場合はエラー。
pub fn signing_key_from_keypair_bytes(bytes: &[u8]) -> Result<Ed25519SigningKey, CryptoError> {
    let arr: [u8; 64] = bytes.try_into().map_err(|_| {
        CryptoError::InvalidKey(format!("キーペアは64バイトである必要があります: {}", bytes.len()))
    })?;
    Ed25519SigningKey::from_keypair_bytes(&arr).map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

/// base58文字列のSolanaキーペアから署名鍵を復元する。
pub fn signing_key_from_base58(encoded: &str) -> Result<Ed25519SigningKey, CryptoError> {
    let bytes = encoded
        .trim()
        .from_base58()
        .map_err(|e| CryptoError::InvalidKey(format!("base58デコード失敗: {e:?}")))?;
    signing_key_from_keypair_bytes(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> Ed25519SigningKey {
        Ed25519SigningKey::generate(&mut rand::rngs::OsRng)
    }

    /// did:keyが公開鍵と相互変換できることを確認
    #[test]
    fn test_did_key_round_trip() {
        let key = test_key();
        let pubkey = key.verifying_key();
        let did = did_key_from_public_key(pubkey.as_bytes());
        assert!(did.starts_with("did:key:z6Mk"), "ed25519のdid:keyは z6Mk で始まる: {did}");
        assert_eq!(public_key_from_did_key(&did).unwrap(), pubkey);
    }

    /// 既知の公開鍵に対するdid:keyを確認
    #[test]
    fn test_did_key_known_vector() {
        // did:keyのテストベクタ
        let did = "did:key:z6MkiTBz1ymuepAQ4HEHYSF1H8quG5GLVVQR3djdX3mDooWp";
        let key = public_key_from_did_key(did).unwrap();
        assert_eq!(did_key_from_public_key(key.as_bytes()), did);
    }

    #[test]
    fn test_did_key_rejects_other_method() {
        assert!(matches!(
            public_key_from_did_key("did:web:example.com"),
            Err(CryptoError::InvalidDid(_))
        ));
    }

    /// 署名と検証が対応することを確認
    #[test]
    fn test_sign_verify() {
        let key = test_key();
        let sig = ed25519_sign(&key, b"hello");
        assert!(ed25519_verify(&key.verifying_key(), b"hello", &sig).is_ok());
        assert!(ed25519_verify(&key.verifying_key(), b"hellO", &sig).is_err());
    }

    /// 64バイトキーペアから同じ鍵が復元されることを確認
    #[test]
    fn test_keypair_bytes() {
        let key = test_key();
        let encoded = key.to_keypair_bytes().to_base58();
        let restored = signing_key_from_base58(&encoded).unwrap();
        assert_eq!(restored.verifying_key(), key.verifying_key());

        assert!(signing_key_from_keypair_bytes(&[0u8; 32]).is_err());
    }

    #[test]
    fn test_sha256_empty() {
        assert_eq!(
            sha256(b""),
            [
                0xe3, 0xb0, 0xc4, 0x42, 0x98, 0xfc, 0x1c, 0x14, 0x9a, 0xfb, 0xf4, 0xc8, 0x99,
                0x6f, 0xb9, 0x24, 0x27, 0xae, 0x41, 0xe4, 0x64, 0x9b, 0x93, 0x4c, 0xa4, 0x95,
                0x99, 0x1b, 0x78, 0x52, 0xb8, 0x55
            ]
        );
    }
}

//! # Core エラー型
//!
//! パッケージング・バンドル・CAR処理で共通のエラー型。

/// Coreモジュールのエラー型
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// バンドルのエントリ数が上限に達している
    #[error("バンドルのエントリ数が上限に達しています (上限: {max})")]
    CapacityExceeded {
        /// 上限値
        max: usize,
    },
    /// バンドルIDが長すぎる
    #[error("IDが長すぎます: {id:?} ({len} bytes, 上限: {max} bytes)")]
    IdentifierTooLong {
        /// 指定されたID
        id: String,
        /// UTF-8でのバイト長
        len: usize,
        /// 上限値
        max: usize,
    },
    /// バンドルIDが不正（空、または `/` を含む）
    #[error("IDが不正です: {0:?}")]
    InvalidIdentifier(String),
    /// 同じIDのエントリが既に存在する
    #[error("IDが重複しています: {0:?}")]
    DuplicateIdentifier(String),
    /// ファイル名が不正（空、または `/` を含む）
    #[error("ファイル名が不正です: {0:?}")]
    InvalidFilename(String),
    /// 同じディレクトリに同名のファイルがある
    #[error("ファイル名が重複しています: {0:?}")]
    DuplicateFilename(String),
    /// ブロックストアに存在しないブロック
    #[error("ブロックが見つかりません: {0}")]
    MissingBlock(String),
    /// CIDの形式が不正
    #[error("CIDが不正です: {0}")]
    InvalidCid(String),
    /// ゲートウェイ・URIの形式が不正
    #[error("URLが不正です: {0}")]
    InvalidUrl(String),
    /// ブロック・アーカイブのデコード失敗
    #[error("デコードに失敗しました: {0}")]
    Decode(String),
    /// JSON・CBORのシリアライズ失敗
    #[error("シリアライズに失敗しました: {0}")]
    Serialization(String),
    /// ルートディレクトリのエンコード結果がサイズ上限を超えた
    #[error("ルートブロックがサイズ上限を超えました: {size} bytes (上限: {limit} bytes)")]
    RootBlockTooLarge {
        /// エンコード後のサイズ
        size: usize,
        /// 上限値
        limit: usize,
    },
}

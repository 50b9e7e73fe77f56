//! # メタデータのリンク
//!
//! パッケージ済みアセットのルートCIDが決まった後、メタデータ中のファイル名参照を
//! ゲートウェイURLと `ipfs://` URIに書き換える。
//!
//! 書き換えは1回限りの変換。書き換え後の値はファイル名と一致しなくなるので、
//! 2回目の適用では何も変わらない。

use mplx_types::{FileDescription, MetaplexMetadata};
use url::Url;

use crate::cid::Cid;
use crate::error::CoreError;

/// デフォルトのIPFSゲートウェイ
pub const DEFAULT_GATEWAY_HOST: &str = "https://nftstorage.link";

/// ゲートウェイのURLを検証する。`http` / `https` でホストを持つURLのみ受け付ける。
pub fn parse_gateway(raw: &str) -> Result<Url, CoreError> {
    let url = Url::parse(raw.trim()).map_err(|e| CoreError::InvalidUrl(format!("{raw:?}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(CoreError::InvalidUrl(format!(
            "{raw:?}: ゲートウェイはhttp(s)のURLである必要があります"
        )));
    }
    Ok(url)
}

/// ゲートウェイURL: `{gateway}/ipfs/{cid}/{path}`
///
/// `path` は1セグメントとしてパーセントエンコードされる。
pub fn gateway_url(gateway: &Url, cid: &Cid, path: &str) -> Result<String, CoreError> {
    let cid = cid.to_string();
    let mut url = gateway.clone();
    url.path_segments_mut()
        .map_err(|()| CoreError::InvalidUrl(format!("パスを持てないURLです: {gateway}")))?
        .pop_if_empty()
        .extend(["ipfs", cid.as_str(), path]);
    Ok(url.into())
}

/// 自己記述的なコンテンツURI: `ipfs://{cid}/{path}`
pub fn ipfs_uri(cid: &Cid, path: &str) -> Result<String, CoreError> {
    let mut url = Url::parse(&format!("ipfs://{cid}/"))
        .map_err(|e| CoreError::InvalidUrl(format!("ipfs://{cid}: {e}")))?;
    url.path_segments_mut()
        .map_err(|()| CoreError::InvalidUrl(format!("ipfs://{cid}")))?
        .pop_if_empty()
        .push(path);
    Ok(url.into())
}

/// メタデータのファイル参照をアセットのルートCIDで書き換える。
///
/// 1. `image` は常に `image_filename` のゲートウェイURLになる
/// 2. `properties.files` のうち `uri` が画像または追加ファイル名と一致するエントリは、
///    ゲートウェイURL（`cdn: true`）と `ipfs://` URI（`cdn: false`）の2エントリに置き換える。
///    その他のフィールドは両方に引き継ぐ。一致しないエントリはそのまま
/// 3. `animation_url` が追加ファイル名と一致すればゲートウェイURLにする
pub fn link_metadata(
    metadata: &MetaplexMetadata,
    image_filename: &str,
    additional_filenames: &[String],
    asset_root: &Cid,
    gateway: &Url,
) -> Result<MetaplexMetadata, CoreError> {
    let is_asset = |uri: &str| uri == image_filename || additional_filenames.iter().any(|f| f == uri);

    let mut linked = metadata.clone();
    linked.image = gateway_url(gateway, asset_root, image_filename)?;

    let mut files = Vec::with_capacity(metadata.properties.files.len());
    for file in &metadata.properties.files {
        if !is_asset(&file.uri) {
            files.push(file.clone());
            continue;
        }
        files.push(FileDescription {
            uri: gateway_url(gateway, asset_root, &file.uri)?,
            cdn: Some(true),
            ..file.clone()
        });
        files.push(FileDescription {
            uri: ipfs_uri(asset_root, &file.uri)?,
            cdn: Some(false),
            ..file.clone()
        });
    }
    linked.properties.files = files;

    if let Some(animation_url) = &metadata.animation_url {
        if additional_filenames.iter().any(|f| f == animation_url) {
            linked.animation_url = Some(gateway_url(gateway, asset_root, animation_url)?);
        }
    }

    Ok(linked)
}

//! # mplx Core
//!
//! NFTのアセットとメタデータをコンテンツアドレス型のアーカイブにパッケージングする。
//!
//! ## 処理フロー
//! 1. ファイルをUnixFSのDAGとしてブロックストアに書き込む（[`unixfs`]）
//! 2. アセットのルートCIDでメタデータのファイル参照を書き換える（[`linker`]）
//! 3. メタデータを別ディレクトリの `metadata.json` として書き込む（[`nft`]）
//! 4. 必要なら複数のNFTを1つのルートディレクトリにまとめる（[`bundle`]）
//! 5. ルートから辿れるブロックをCARに書き出し、送信用に分割する（[`car`], [`split`]）

pub mod block;
pub mod bundle;
pub mod car;
pub mod cid;
pub mod dagpb;
pub mod error;
pub mod linker;
pub mod nft;
pub mod split;
pub mod unixfs;

pub use block::{Block, BlockStore, MemoryBlockStore};
pub use bundle::{NftBundle, MAX_ENTRIES, MAX_ID_LEN, ROOT_BLOCK_SIZE_LIMIT};
pub use car::{read_car, CarArchive, ParsedCar, CAR_CONTENT_TYPE};
pub use cid::Cid;
pub use error::CoreError;
pub use linker::{gateway_url, ipfs_uri, link_metadata, parse_gateway, DEFAULT_GATEWAY_HOST};
pub use nft::{prepare_nft, EncodedCar, NamedFile, PackagedNft, PrepareOptions, METADATA_FILENAME};
pub use split::{join_car_chunks, CarChunk, TreewalkSplitter, DEFAULT_TARGET_SIZE};

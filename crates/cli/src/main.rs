//! # mplx CLI
//!
//! 環境変数の設定（[`ClientConfig`]）でNFTのパッケージング・アップロードを行う。
//! ファイルは明示的なパスで受け取り、ディレクトリの探索はしない。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use mplx_client::{issue_token, Client, ClientConfig};
use mplx_core::{read_car, BlockStore, CarArchive, Cid, MemoryBlockStore, NamedFile};
use mplx_types::MetaplexMetadata;

/// Metaplex NFTをコンテンツアドレス型ストレージに保存する。
#[derive(Parser, Debug)]
#[command(name = "mplx-cli", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// 設定から構築した発行者とアップロード先を表示する
    Info,
    /// ルートCIDに対するアップロードトークンを発行する
    Token {
        /// ルートCID
        #[arg(long)]
        cid: String,
    },
    /// NFTをパッケージングし、CIDとURIを表示する（送信はしない）
    Prepare {
        #[command(flatten)]
        nft: NftArgs,
        /// CARの書き出し先ディレクトリ
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// NFTをパッケージングしてアップロードする
    Upload {
        #[command(flatten)]
        nft: NftArgs,
    },
    /// 既存のCARファイルをアップロードする
    UploadCar {
        /// CARファイル
        path: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct NftArgs {
    /// メタデータJSON
    #[arg(long)]
    metadata: PathBuf,
    /// 画像ファイル
    #[arg(long)]
    image: PathBuf,
    /// 追加ファイル（animation_url等）
    #[arg(long = "file")]
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = ClientConfig::from_env()?;

    match cli.command {
        Commands::Info => {
            let client = Client::from_config(&config)?;
            let auth = client.auth();
            let upload_url = client.uploader().upload_url()?;
            print_json(&serde_json::json!({
                "did": auth.did(),
                "chain": auth.chain(),
                "solanaCluster": auth.cluster(),
                "mintingAgent": auth.minting_agent(),
                "agentVersion": auth.agent_version(),
                "endpoint": client.uploader().endpoint().as_str(),
                "uploadUrl": upload_url.as_str(),
                "gateway": config.gateway.as_str(),
            }))?;
        }
        Commands::Token { cid } => {
            let cid: Cid = cid.parse().context("CIDの形式が不正です")?;
            let token = issue_token(&config.auth_context()?, &cid).await?;
            println!("{token}");
        }
        Commands::Prepare { nft, out_dir } => {
            let (metadata, image, files) = nft.load()?;
            let packaged =
                mplx_core::prepare_nft(&metadata, image, files, &config.prepare_options())?;

            if let Some(dir) = out_dir {
                std::fs::create_dir_all(&dir)
                    .with_context(|| format!("ディレクトリを作成できません: {}", dir.display()))?;
                write_car(&dir.join("assets.car"), &packaged.encoded_assets.car)?;
                write_car(&dir.join("metadata.car"), &packaged.encoded_metadata.car)?;
            }
            print_json(&serde_json::json!({
                "assetsCid": packaged.encoded_assets.cid,
                "metadataCid": packaged.encoded_metadata.cid,
                "metadataUri": packaged.metadata_uri,
                "metadataGatewayUrl": packaged.metadata_gateway_url,
                "metadata": packaged.metadata,
            }))?;
        }
        Commands::Upload { nft } => {
            let (metadata, image, files) = nft.load()?;
            let client = Client::from_config(&config)?;
            let packaged = client.store_nft(&metadata, image, files).await?;
            print_json(&serde_json::json!({
                "assetsCid": packaged.encoded_assets.cid,
                "metadataCid": packaged.encoded_metadata.cid,
                "metadataUri": packaged.metadata_uri,
                "metadataGatewayUrl": packaged.metadata_gateway_url,
            }))?;
        }
        Commands::UploadCar { path } => {
            let car = load_car(&path)?;
            let client = Client::from_config(&config)?;
            let cid = client.store_car(&car).await?;
            println!("{cid}");
        }
    }

    Ok(())
}

impl NftArgs {
    fn load(&self) -> anyhow::Result<(MetaplexMetadata, NamedFile, Vec<NamedFile>)> {
        let json = std::fs::read(&self.metadata)
            .with_context(|| format!("メタデータを読み込めません: {}", self.metadata.display()))?;
        let metadata: MetaplexMetadata =
            serde_json::from_slice(&json).context("メタデータのパースに失敗しました")?;
        let image = read_named_file(&self.image)?;
        let files = self
            .files
            .iter()
            .map(|path| read_named_file(path))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok((metadata, image, files))
    }
}

fn read_named_file(path: &Path) -> anyhow::Result<NamedFile> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("ファイル名を取得できません: {}", path.display()))?;
    let data = std::fs::read(path)
        .with_context(|| format!("ファイルを読み込めません: {}", path.display()))?;
    Ok(NamedFile::new(name, data))
}

fn write_car(path: &Path, car: &CarArchive) -> anyhow::Result<()> {
    std::fs::write(path, car.to_bytes()?)
        .with_context(|| format!("CARを書き込めません: {}", path.display()))?;
    tracing::info!(path = %path.display(), root = %car.root(), "CARを書き出しました");
    Ok(())
}

/// CARファイルを読み込み、単一ルートのアーカイブにする。
fn load_car(path: &Path) -> anyhow::Result<CarArchive> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("CARを読み込めません: {}", path.display()))?;
    let parsed = read_car(&bytes)?;
    let [root] = parsed.roots[..] else {
        anyhow::bail!("ルートが1つのCARのみ対応しています: {}", parsed.roots.len());
    };
    let store = Arc::new(MemoryBlockStore::new());
    for block in parsed.blocks {
        store.put(block);
    }
    if !store.contains(&root) {
        anyhow::bail!("ルートブロックがCARに含まれていません: {root}");
    }
    Ok(CarArchive::new(root, store))
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

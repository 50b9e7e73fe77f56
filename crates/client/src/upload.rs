//! # チャンク分割アップロード
//!
//! CARを深さ優先で分割し、固定数のワーカーで並行に送信する。
//!
//! 1. ルートCIDに対するトークンを1つだけ発行する（全チャンクで共有）
//! 2. CARを `chunk_size` 以下のチャンクに分割する（ストアから必要な分だけ読む）
//! 3. 最大 `max_concurrency` 件を並行に送信し、各チャンクは最大 `max_retries` 回再試行する
//! 4. バックエンドが報告したCIDとローカルのルートCIDを照合する（不一致は再試行しない）
//!
//! チャンクの完了順は保証しないが、全チャンクの受理を確認するまで成功を返さない。

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use mplx_core::{CarArchive, CarChunk, Cid, CAR_CONTENT_TYPE, DEFAULT_TARGET_SIZE};
use url::Url;

use crate::auth::{issue_token, AuthContext, UploadToken};
use crate::backend::{AuthHeader, MetaplexAuthHeader, NftStorageBackend, UploadBackend};
use crate::error::ClientError;
use crate::retry::{retry, RetryPolicy};

/// デフォルトの再試行回数
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// デフォルトの並行数
pub const DEFAULT_MAX_CONCURRENCY: usize = 3;

/// 再試行の初回待ち時間（200ms → 400ms → 800ms …）
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

/// チャンクが保存されるたびにバイト数を受け取るコールバック
pub type ChunkCallback = Arc<dyn Fn(usize) + Send + Sync>;

/// アップロードのオプション。
#[derive(Clone)]
pub struct UploadOptions {
    /// チャンクごとの最大再試行回数
    pub max_retries: u32,
    /// 同時に送信するチャンク数
    pub max_concurrency: usize,
    /// チャンクの最大バイト数
    pub chunk_size: usize,
    /// 再試行の初回待ち時間
    pub retry_base_delay: Duration,
    /// 進捗通知
    pub on_chunk_stored: Option<ChunkCallback>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            chunk_size: DEFAULT_TARGET_SIZE,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            on_chunk_stored: None,
        }
    }
}

impl fmt::Debug for UploadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadOptions")
            .field("max_retries", &self.max_retries)
            .field("max_concurrency", &self.max_concurrency)
            .field("chunk_size", &self.chunk_size)
            .field("retry_base_delay", &self.retry_base_delay)
            .field("on_chunk_stored", &self.on_chunk_stored.is_some())
            .finish()
    }
}

impl UploadOptions {
    /// 進捗通知を設定する。
    pub fn with_on_chunk_stored(mut self, callback: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.on_chunk_stored = Some(Arc::new(callback));
        self
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: self.retry_base_delay,
        }
    }
}

/// CARのアップローダ。
///
/// バックエンドと認可ヘッダは構築時に注入する。
#[derive(Clone)]
pub struct Uploader {
    http_client: reqwest::Client,
    endpoint: Url,
    backend: Arc<dyn UploadBackend>,
    auth_header: Arc<dyn AuthHeader>,
}

impl fmt::Debug for Uploader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Uploader")
            .field("endpoint", &self.endpoint.as_str())
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl Uploader {
    /// エンドポイント・バックエンド・認可ヘッダを指定して作る。
    pub fn new(
        endpoint: Url,
        backend: Arc<dyn UploadBackend>,
        auth_header: Arc<dyn AuthHeader>,
    ) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            endpoint,
            backend,
            auth_header,
        }
    }

    /// NFT.StorageのMetaplex向けAPIに送るアップローダ。
    pub fn nft_storage(endpoint: Url) -> Self {
        Self::new(
            endpoint,
            Arc::new(NftStorageBackend),
            Arc::new(MetaplexAuthHeader),
        )
    }

    /// エンドポイントURL
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// アップロード先のURL。エンドポイントのパスにバックエンドのパスを連結する。
    pub fn upload_url(&self) -> Result<Url, ClientError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|()| {
                ClientError::Configuration(format!(
                    "エンドポイントにパスを付けられません: {}",
                    self.endpoint
                ))
            })?
            .pop_if_empty()
            .extend(self.backend.path().split('/').filter(|s| !s.is_empty()));
        Ok(url)
    }

    /// CARをアップロードし、バックエンドが確認したルートCIDを返す。
    pub async fn upload_car(
        &self,
        auth: &AuthContext,
        car: &CarArchive,
        opts: &UploadOptions,
    ) -> Result<Cid, ClientError> {
        let root = *car.root();
        let token = issue_token(auth, &root).await?;
        let url = self.upload_url()?;
        let expected = root.to_string();
        let policy = opts.retry_policy();

        let (token, url, expected) = (&token, url.as_str(), expected.as_str());
        let mut stored = futures::stream::iter(car.split(opts.chunk_size)?)
            .map(|chunk| async move {
                let chunk = chunk?;
                self.send_chunk(url, token, &chunk, expected, policy).await
            })
            .buffer_unordered(opts.max_concurrency.max(1));

        let mut chunks = 0usize;
        let mut bytes = 0usize;
        while let Some(result) = stored.next().await {
            let size = result?;
            chunks += 1;
            bytes += size;
            if let Some(callback) = &opts.on_chunk_stored {
                callback(size);
            }
        }

        tracing::info!(
            root = %root,
            backend = self.backend.name(),
            chunks,
            bytes,
            "CARのアップロードが完了しました"
        );
        Ok(root)
    }

    /// 1チャンクを送信する。送信失敗とバックエンドのエラーは再試行する。
    async fn send_chunk(
        &self,
        url: &str,
        token: &UploadToken,
        chunk: &CarChunk,
        expected: &str,
        policy: RetryPolicy,
    ) -> Result<usize, ClientError> {
        let (header_name, header_value) = self.auth_header.header(token);
        let header_value = header_value.as_str();
        let http_client = &self.http_client;
        let backend = self.backend.as_ref();

        retry(policy, "チャンクのアップロード", || async move {
            let response = http_client
                .post(url)
                .header(header_name, header_value)
                .header(reqwest::header::CONTENT_TYPE, CAR_CONTENT_TYPE)
                .body(chunk.bytes.clone())
                .send()
                .await?;
            let status = response.status().as_u16();
            let body = response.bytes().await?;

            let cid = backend.parse_response(status, &body)?;
            if cid != expected {
                return Err(ClientError::Integrity {
                    expected: expected.to_string(),
                    actual: cid,
                });
            }
            tracing::debug!(
                root = %expected,
                chunk_bytes = chunk.len(),
                blocks = chunk.block_count,
                "チャンクを保存しました"
            );
            Ok(chunk.len())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BearerAuthHeader, GenericBackend};
    use crate::mock::{spawn_mock_backend, MockBehavior};
    use bytes::Bytes;
    use mplx_core::unixfs::{DirectoryBuilder, FileImporter};
    use mplx_core::{read_car, MemoryBlockStore};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_options() -> UploadOptions {
        UploadOptions {
            retry_base_delay: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn test_auth() -> AuthContext {
        AuthContext::from_secret_key(&[9u8; 32], mplx_types::SolanaCluster::Devnet, "mplx-test")
            .unwrap()
    }

    /// 複数チャンクに分かれるアーカイブ
    fn large_archive() -> CarArchive {
        let store = MemoryBlockStore::shared();
        let data: Vec<u8> = (0..20_000u32)
            .map(|i| ((i % 251) as u8) ^ ((i >> 9) as u8))
            .collect();
        let node = FileImporter::default()
            .with_chunk_size(512)
            .with_max_children(8)
            .import(store.as_ref(), Bytes::from(data));
        let mut dir = DirectoryBuilder::new();
        dir.add("big.bin", node).unwrap();
        let root = dir.build(store.as_ref());
        CarArchive::new(root.cid, store)
    }

    /// 1チャンクに収まるアーカイブ
    fn small_archive() -> CarArchive {
        let store = MemoryBlockStore::shared();
        let mut dir = DirectoryBuilder::new();
        dir.add(
            "a.txt",
            FileImporter::default().import(store.as_ref(), Bytes::from_static(b"hello")),
        )
        .unwrap();
        let root = dir.build(store.as_ref());
        CarArchive::new(root.cid, store)
    }

    /// 全チャンクが送信され、コールバックがチャンクごとに呼ばれることを確認
    #[tokio::test]
    async fn test_upload_multiple_chunks() {
        let (endpoint, mock) =
            spawn_mock_backend(NftStorageBackend::PATH, MockBehavior::Echo).await;
        let car = large_archive();
        let chunk_size = 4096;
        let expected_chunks: Vec<_> = car
            .split(chunk_size)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert!(expected_chunks.len() > 3);

        let stored_count = Arc::new(AtomicUsize::new(0));
        let stored_bytes = Arc::new(AtomicUsize::new(0));
        let (count, total) = (stored_count.clone(), stored_bytes.clone());
        let opts = UploadOptions {
            chunk_size,
            ..fast_options()
        }
        .with_on_chunk_stored(move |size| {
            count.fetch_add(1, Ordering::SeqCst);
            total.fetch_add(size, Ordering::SeqCst);
        });

        let uploader = Uploader::nft_storage(endpoint);
        let cid = uploader.upload_car(&test_auth(), &car, &opts).await.unwrap();
        assert_eq!(cid, *car.root());

        assert_eq!(mock.calls(), expected_chunks.len());
        assert_eq!(stored_count.load(Ordering::SeqCst), expected_chunks.len());
        assert_eq!(
            stored_bytes.load(Ordering::SeqCst),
            expected_chunks.iter().map(CarChunk::len).sum::<usize>()
        );

        // 全チャンクが同じトークン・Content-Typeで送られ、ルートを共有している
        let received = mock.received();
        let first_auth = received[0].auth.clone().unwrap();
        assert!(first_auth.starts_with("Metaplex "));
        for request in &received {
            assert_eq!(request.auth.as_deref(), Some(first_auth.as_str()));
            assert_eq!(request.content_type.as_deref(), Some(CAR_CONTENT_TYPE));
            let parsed = read_car(&request.body).unwrap();
            assert_eq!(parsed.roots, vec![*car.root()]);
            assert!(request.body.len() <= chunk_size);
        }

        // トークンはルートCIDに対して発行され、署名が検証できる
        let token = UploadToken::decode(first_auth.trim_start_matches("Metaplex ")).unwrap();
        assert_eq!(token.root_cid(), car.root().to_string());
        assert!(token.verify().is_ok());
    }

    /// ルートCIDの不一致は再試行されずにIntegrityエラーになることを確認
    #[tokio::test]
    async fn test_integrity_mismatch_not_retried() {
        let (endpoint, mock) =
            spawn_mock_backend(NftStorageBackend::PATH, MockBehavior::WrongCid).await;
        let uploader = Uploader::nft_storage(endpoint);

        let result = uploader
            .upload_car(&test_auth(), &small_archive(), &fast_options())
            .await;
        assert!(matches!(result, Err(ClientError::Integrity { .. })));
        assert_eq!(mock.calls(), 1);
    }

    /// 一時的な失敗の後に成功すれば全体が成功することを確認
    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let (endpoint, mock) =
            spawn_mock_backend(NftStorageBackend::PATH, MockBehavior::FailTimes(2)).await;
        let uploader = Uploader::nft_storage(endpoint);
        let car = small_archive();

        let cid = uploader
            .upload_car(&test_auth(), &car, &fast_options())
            .await
            .unwrap();
        assert_eq!(cid, *car.root());
        assert_eq!(mock.calls(), 3);
    }

    /// 再試行を使い切るとBackendエラーになることを確認
    #[tokio::test]
    async fn test_retries_exhausted() {
        let (endpoint, mock) =
            spawn_mock_backend(NftStorageBackend::PATH, MockBehavior::AlwaysFail).await;
        let uploader = Uploader::nft_storage(endpoint);
        let opts = UploadOptions {
            max_retries: 2,
            ..fast_options()
        };

        let result = uploader.upload_car(&test_auth(), &small_archive(), &opts).await;
        assert!(matches!(
            result,
            Err(ClientError::Backend { status: 500, .. })
        ));
        assert_eq!(mock.calls(), 3);
    }

    /// 汎用バックエンドとBearerヘッダを注入できることを確認
    #[tokio::test]
    async fn test_generic_backend_with_bearer_header() {
        let (endpoint, mock) = spawn_mock_backend("/api/upload", MockBehavior::Echo).await;
        let uploader = Uploader::new(
            endpoint.join("api/").unwrap(),
            Arc::new(GenericBackend::default()),
            Arc::new(BearerAuthHeader),
        );
        assert_eq!(
            uploader.upload_url().unwrap().as_str(),
            format!("{endpoint}api/upload")
        );

        let car = small_archive();
        let cid = uploader
            .upload_car(&test_auth(), &car, &fast_options())
            .await
            .unwrap();
        assert_eq!(cid, *car.root());
        let received = mock.received();
        assert!(received[0].auth.as_deref().unwrap().starts_with("Bearer "));
    }

    /// 接続できないエンドポイントはNetworkエラーになることを確認
    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let uploader = Uploader::nft_storage(Url::parse("http://127.0.0.1:1").unwrap());
        let opts = UploadOptions {
            max_retries: 1,
            ..fast_options()
        };
        let result = uploader.upload_car(&test_auth(), &small_archive(), &opts).await;
        assert!(matches!(result, Err(ClientError::Network(_))));
    }

    /// 送信できない値を返す認可ヘッダ
    struct BrokenAuthHeader;

    impl AuthHeader for BrokenAuthHeader {
        fn header(&self, token: &UploadToken) -> (&'static str, String) {
            ("x-web3auth", format!("Metaplex {token}\n"))
        }
    }

    /// リクエストを組み立てられない場合は再試行せずConfigurationエラーになることを確認
    #[tokio::test]
    async fn test_request_build_error_not_retried() {
        let (endpoint, mock) =
            spawn_mock_backend(NftStorageBackend::PATH, MockBehavior::Echo).await;
        let uploader = Uploader::new(
            endpoint,
            Arc::new(NftStorageBackend),
            Arc::new(BrokenAuthHeader),
        );
        let opts = UploadOptions {
            max_retries: 5,
            retry_base_delay: Duration::from_secs(5),
            ..Default::default()
        };

        let started = std::time::Instant::now();
        let result = uploader.upload_car(&test_auth(), &small_archive(), &opts).await;
        assert!(matches!(result, Err(ClientError::Configuration(_))));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(mock.calls(), 0);
    }

    /// 同時に送信されるチャンク数がmax_concurrencyを超えないことを確認
    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let (endpoint, mock) = spawn_mock_backend(
            NftStorageBackend::PATH,
            MockBehavior::Slow(Duration::from_millis(100)),
        )
        .await;
        let car = large_archive();
        let chunk_size = 4096;
        let chunks = car.split(chunk_size).unwrap().count();
        assert!(chunks > 3);

        let opts = UploadOptions {
            chunk_size,
            max_concurrency: 2,
            ..fast_options()
        };
        let uploader = Uploader::nft_storage(endpoint);
        uploader.upload_car(&test_auth(), &car, &opts).await.unwrap();

        assert_eq!(mock.calls(), chunks);
        let peak = mock.peak_in_flight();
        assert!(1 < peak && peak <= 2, "peak in flight: {peak}");
    }
}

//! テスト用のモックアップロードサーバー。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use mplx_core::{read_car, Cid};
use parking_lot::Mutex;
use url::Url;

/// モックの応答
#[derive(Debug, Clone, Copy)]
pub(crate) enum MockBehavior {
    /// チャンクのルートCIDを返す
    Echo,
    /// 別のCIDを返す
    WrongCid,
    /// 最初のn回は500を返す
    FailTimes(usize),
    /// 常に500を返す
    AlwaysFail,
    /// 指定時間待ってからルートCIDを返す
    Slow(Duration),
}

/// 受信したリクエスト
#[derive(Debug, Clone)]
pub(crate) struct Received {
    pub auth: Option<String>,
    pub content_type: Option<String>,
    pub body: Bytes,
}

pub(crate) struct MockBackend {
    behavior: MockBehavior,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    received: Mutex<Vec<Received>>,
}

impl MockBackend {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 同時に処理していたリクエスト数の最大値
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<Received> {
        self.received.lock().clone()
    }
}

async fn handle_upload(
    State(state): State<Arc<MockBackend>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<serde_json::Value>) {
    let n = state.calls.fetch_add(1, Ordering::SeqCst);
    let in_flight = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    state.peak_in_flight.fetch_max(in_flight, Ordering::SeqCst);
    if let MockBehavior::Slow(delay) = state.behavior {
        tokio::time::sleep(delay).await;
    }
    state.in_flight.fetch_sub(1, Ordering::SeqCst);

    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    state.received.lock().push(Received {
        auth: header("x-web3auth").or_else(|| header("authorization")),
        content_type: header("content-type"),
        body: body.clone(),
    });

    let fail = match state.behavior {
        MockBehavior::AlwaysFail => true,
        MockBehavior::FailTimes(times) => n < times,
        _ => false,
    };
    if fail {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"ok": false, "error": {"message": "一時的なエラー"}})),
        );
    }

    let root = match read_car(&body) {
        Ok(parsed) if !parsed.roots.is_empty() => parsed.roots[0],
        Ok(_) => Cid::raw(b""),
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"ok": false, "error": {"message": e.to_string()}})),
            )
        }
    };
    let cid = match state.behavior {
        MockBehavior::WrongCid => Cid::raw(b"somebody else").to_string(),
        _ => root.to_string(),
    };
    (
        StatusCode::OK,
        Json(serde_json::json!({"ok": true, "value": {"cid": cid}})),
    )
}

/// モックサーバーを起動し、`(エンドポイント, 状態)` を返す。
pub(crate) async fn spawn_mock_backend(
    path: &str,
    behavior: MockBehavior,
) -> (Url, Arc<MockBackend>) {
    let state = Arc::new(MockBackend {
        behavior,
        calls: AtomicUsize::new(0),
        in_flight: AtomicUsize::new(0),
        peak_in_flight: AtomicUsize::new(0),
        received: Mutex::new(Vec::new()),
    });
    let app = axum::Router::new()
        .route(path, axum::routing::post(handle_upload))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let endpoint = Url::parse(&format!("http://127.0.0.1:{port}/")).unwrap();
    (endpoint, state)
}

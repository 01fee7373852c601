//! Shared async HTTP test server helpers.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use axum::{
    Router,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use url::Url;

/// Lightweight HTTP test server wrapper.
pub struct TestHttpServer {
    base_url: Url,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestHttpServer {
    /// Spawn `router` on a random localhost port.
    ///
    /// # Panics
    ///
    /// Panics if listener bind or URL parsing fails.
    pub async fn new(router: Router) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test HTTP listener");
        let addr = listener
            .local_addr()
            .expect("read test listener local addr");

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let server = axum::serve(listener, router).with_graceful_shutdown(async {
            shutdown_rx.await.ok();
        });

        tokio::spawn(async move {
            server.await.expect("run test HTTP server");
        });

        Self {
            base_url: Url::parse(&format!("http://{addr}")).expect("parse base URL"),
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Join path to server base URL.
    ///
    /// # Panics
    ///
    /// Panics if URL join fails.
    #[must_use]
    pub fn url(&self, path: &str) -> Url {
        self.base_url.join(path).expect("join server URL path")
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

impl Drop for TestHttpServer {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
    }
}

#[derive(Default)]
struct AssetState {
    failures: HashMap<u64, VecDeque<StatusCode>>,
    /// `(start, end)` of every ranged GET, inclusive.
    requests: Vec<(u64, u64)>,
    ignore_range: bool,
}

/// A byte-addressable asset served over HTTP with `Range` support.
///
/// `HEAD` reports `Content-Length`; `GET` with `Range: bytes=a-b` answers
/// `206` with exactly that span (clamped to the body).
#[derive(Clone)]
pub struct RangeAsset {
    body: Bytes,
    state: Arc<Mutex<AssetState>>,
}

impl RangeAsset {
    #[must_use]
    pub fn new(body: Bytes) -> Self {
        Self {
            body,
            state: Arc::new(Mutex::new(AssetState::default())),
        }
    }

    /// Router serving this asset at `path`.
    pub fn router(&self, path: &str) -> Router {
        Router::new()
            .route(path, get(serve_range).head(serve_head))
            .with_state(self.clone())
    }

    /// Answer the next `times` requests starting at `start` with `status`.
    pub fn fail_range(&self, start: u64, status: StatusCode, times: usize) {
        let mut state = self.state.lock();
        let queue = state.failures.entry(start).or_default();
        queue.extend(std::iter::repeat_n(status, times));
    }

    /// Reply `200` with the whole body, as servers without range support do.
    pub fn ignore_range(&self) {
        self.state.lock().ignore_range = true;
    }

    /// Ranged GETs received so far, as inclusive `(start, end)`.
    #[must_use]
    pub fn requests(&self) -> Vec<(u64, u64)> {
        self.state.lock().requests.clone()
    }

    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

fn parse_range(headers: &HeaderMap, len: u64) -> Option<(u64, u64)> {
    let value = headers.get(header::RANGE)?.to_str().ok()?;
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    let start: u64 = start.parse().ok()?;
    let end = if end.is_empty() {
        len.checked_sub(1)?
    } else {
        end.parse::<u64>().ok()?.min(len.checked_sub(1)?)
    };
    (start <= end).then_some((start, end))
}

async fn serve_range(State(asset): State<RangeAsset>, headers: HeaderMap) -> Response {
    let len = asset.body.len() as u64;
    let Some((start, end)) = parse_range(&headers, len) else {
        return (StatusCode::OK, asset.body.clone()).into_response();
    };

    let (failure, ignore_range) = {
        let mut state = asset.state.lock();
        state.requests.push((start, end));
        let failure = state.failures.get_mut(&start).and_then(VecDeque::pop_front);
        (failure, state.ignore_range)
    };
    if let Some(status) = failure {
        return status.into_response();
    }
    if ignore_range {
        return (StatusCode::OK, asset.body.clone()).into_response();
    }

    let body = asset.body.slice(start as usize..=end as usize);
    (
        StatusCode::PARTIAL_CONTENT,
        [(header::CONTENT_RANGE, format!("bytes {start}-{end}/{len}"))],
        body,
    )
        .into_response()
}

async fn serve_head(State(asset): State<RangeAsset>) -> Response {
    (
        [(header::CONTENT_LENGTH, asset.body.len().to_string())],
        (),
    )
        .into_response()
}

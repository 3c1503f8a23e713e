//! End-to-end relay tests
//!
//! Each test runs a fake upstream feed and a relay on loopback ports and
//! talks to the relay over HTTP.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use foreverfm_relay::{ConnectionState, Relay, RelayConfig, RelayStats};

const FALLBACK: &str = "http://relay01.example.test/all.mp3";

/// Fake upstream feed
///
/// HEAD answers with `head_status`. The first GET streams `chunks` once
/// `release` is true and then ends, or stays open without data when `stall`
/// is set; later GETs stay open without data.
#[derive(Clone)]
struct FakeUpstream {
    stall: bool,
    head_status: Arc<AtomicU16>,
    heads: Arc<AtomicUsize>,
    gets: Arc<AtomicUsize>,
    release: watch::Receiver<bool>,
    chunks: Arc<Vec<Bytes>>,
}

impl FakeUpstream {
    fn set_head_status(&self, status: u16) {
        self.head_status.store(status, Ordering::SeqCst);
    }

    fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    fn heads(&self) -> usize {
        self.heads.load(Ordering::SeqCst)
    }
}

async fn upstream_head(State(upstream): State<FakeUpstream>) -> StatusCode {
    upstream.heads.fetch_add(1, Ordering::SeqCst);
    StatusCode::from_u16(upstream.head_status.load(Ordering::SeqCst)).unwrap()
}

async fn upstream_get(State(upstream): State<FakeUpstream>) -> Response {
    let first = upstream.gets.fetch_add(1, Ordering::SeqCst) == 0;
    let (tx, rx) = mpsc::channel::<Bytes>(16);

    if first {
        let mut release = upstream.release.clone();
        let chunks = Arc::clone(&upstream.chunks);
        let stall = upstream.stall;
        tokio::spawn(async move {
            let _ = release.wait_for(|released| *released).await;
            for chunk in chunks.iter() {
                if tx.send(chunk.clone()).await.is_err() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            if stall {
                std::future::pending::<()>().await;
            }
        });
    } else {
        tokio::spawn(async move {
            let _tx = tx;
            std::future::pending::<()>().await;
        });
    }

    let body = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|chunk| (Ok::<_, std::io::Error>(chunk), rx))
    });

    Body::from_stream(body).into_response()
}

async fn spawn_upstream(
    head_status: u16,
    chunks: &[&'static [u8]],
    released: bool,
) -> (SocketAddr, FakeUpstream, watch::Sender<bool>) {
    spawn_upstream_with(head_status, chunks, released, false).await
}

async fn spawn_upstream_with(
    head_status: u16,
    chunks: &[&'static [u8]],
    released: bool,
    stall: bool,
) -> (SocketAddr, FakeUpstream, watch::Sender<bool>) {
    let (release_tx, release_rx) = watch::channel(released);
    let upstream = FakeUpstream {
        stall,
        head_status: Arc::new(AtomicU16::new(head_status)),
        heads: Arc::new(AtomicUsize::new(0)),
        gets: Arc::new(AtomicUsize::new(0)),
        release: release_rx,
        chunks: Arc::new(chunks.iter().map(|c| Bytes::from_static(c)).collect()),
    };

    let app = Router::new()
        .route("/all.mp3", get(upstream_get).head(upstream_head))
        .with_state(upstream.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, upstream, release_tx)
}

struct RunningRelay {
    addr: SocketAddr,
    relay: Arc<Relay>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<foreverfm_relay::Result<()>>,
}

impl RunningRelay {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn stop(self) {
        let _ = self.shutdown.send(());
        let result = tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("relay did not shut down")
            .unwrap();
        assert!(result.is_ok());
    }
}

fn relay_config(upstream: SocketAddr, limit: usize) -> RelayConfig {
    RelayConfig::default()
        .port(0)
        .listener_limit(limit)
        .retry_delay(Duration::from_millis(20))
        .upstream("127.0.0.1", upstream.port())
        .fallback_url(FALLBACK)
}

async fn start_relay(upstream: SocketAddr, limit: usize) -> RunningRelay {
    start_relay_with(relay_config(upstream, limit)).await
}

async fn start_relay_with(config: RelayConfig) -> RunningRelay {
    let crossdomain = Bytes::from_static(b"<cross-domain-policy/>");
    let relay = Arc::new(Relay::with_parts(config, RelayStats::new(), None, crossdomain).unwrap());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown, shutdown_rx) = oneshot::channel::<()>();

    let task = {
        let relay = Arc::clone(&relay);
        tokio::spawn(async move {
            relay
                .run_with_listener(listener, async move {
                    let _ = shutdown_rx.await;
                })
                .await
        })
    };

    RunningRelay {
        addr,
        relay,
        shutdown,
        task,
    }
}

async fn eventually<F: Fn() -> bool>(condition: F) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

async fn wait_connected(relay: &Relay) {
    let mut state = relay.state().watch_connection();
    tokio::time::timeout(Duration::from_secs(5), state.wait_for(|s| s.is_connected()))
        .await
        .expect("relay never connected")
        .unwrap();
}

async fn read_at_least(response: &mut reqwest::Response, len: usize) -> Vec<u8> {
    let mut received = Vec::new();
    while received.len() < len {
        let chunk = tokio::time::timeout(Duration::from_secs(5), response.chunk())
            .await
            .expect("timed out reading stream")
            .unwrap();
        match chunk {
            Some(chunk) => received.extend_from_slice(&chunk),
            None => break,
        }
    }
    received
}

fn no_redirect_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn listeners_receive_stream_in_order_and_relay_reconnects() {
    let (upstream_addr, upstream, release) = spawn_upstream(200, &[b"A", b"B", b"C"], false).await;
    let relay = start_relay(upstream_addr, 10).await;
    wait_connected(&relay.relay).await;

    let client = reqwest::Client::new();
    let mut x = client.get(relay.url("/all.mp3")).send().await.unwrap();
    let mut y = client.get(relay.url("/all.mp3")).send().await.unwrap();

    assert_eq!(x.status(), StatusCode::OK);
    assert_eq!(x.headers()["content-type"], "audio/mpeg");
    assert_eq!(relay.relay.state().registry().count(), 2);

    release.send(true).unwrap();

    assert_eq!(read_at_least(&mut x, 3).await, b"ABC");
    assert_eq!(read_at_least(&mut y, 3).await, b"ABC");

    // Upstream ended after C; the relay comes back without a restart
    eventually(|| upstream.gets() >= 2).await;
    wait_connected(&relay.relay).await;

    let snapshot = relay.relay.state().stats().snapshot();
    assert_eq!(snapshot.bytes_received, 3);
    assert_eq!(snapshot.bytes_sent, 6);
    assert_eq!(snapshot.peak_listeners, 2);

    relay.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn silent_upstream_is_reconnected() {
    let (upstream_addr, upstream, release) =
        spawn_upstream_with(200, &[b"A"], false, true).await;
    let config = relay_config(upstream_addr, 10).read_timeout(Duration::from_millis(500));
    let relay = start_relay_with(config).await;
    wait_connected(&relay.relay).await;

    let mut listener = reqwest::get(relay.url("/all.mp3")).await.unwrap();
    release.send(true).unwrap();
    assert_eq!(read_at_least(&mut listener, 1).await, b"A");

    // Upstream keeps the connection open but sends nothing more
    eventually(|| upstream.gets() >= 2).await;
    wait_connected(&relay.relay).await;

    assert_eq!(relay.relay.state().stats().snapshot().bytes_received, 1);
    assert_eq!(relay.relay.state().registry().count(), 1);

    drop(listener);
    relay.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn chunks_without_listeners_are_only_counted_in() {
    let chunks: [&'static [u8]; 3] = [&[1u8; 100], &[2u8; 200], &[3u8; 300]];
    let (upstream_addr, upstream, _release) = spawn_upstream(200, &chunks, true).await;
    let relay = start_relay(upstream_addr, 10).await;

    let stats = Arc::clone(relay.relay.state().stats());
    eventually(|| stats.snapshot().bytes_received == 600).await;
    eventually(|| upstream.gets() >= 2).await;

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.bytes_received, 600);
    assert_eq!(snapshot.bytes_sent, 0);

    relay.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unavailable_upstream_keeps_relay_closed() {
    let (upstream_addr, upstream, _release) = spawn_upstream(503, &[], false).await;
    let relay = start_relay(upstream_addr, 10).await;

    eventually(|| upstream.heads() >= 2).await;
    assert_eq!(
        relay.relay.state().connection_state(),
        ConnectionState::Disconnected
    );

    // Nothing answers on the relay port yet
    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(300))
        .build()
        .unwrap();
    assert!(client.get(relay.url("/all.mp3")).send().await.is_err());
    assert_eq!(upstream.gets(), 0);

    upstream.set_head_status(200);
    wait_connected(&relay.relay).await;

    let status = reqwest::get(relay.url("/")).await.unwrap();
    assert_eq!(status.status(), StatusCode::OK);

    relay.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn full_relay_redirects_to_fallback() {
    let (upstream_addr, _upstream, _release) = spawn_upstream(200, &[], false).await;
    let relay = start_relay(upstream_addr, 1).await;
    wait_connected(&relay.relay).await;

    let client = no_redirect_client();

    // Capacity is available for a HEAD probe, which takes no slot
    let probe = client.head(relay.url("/all.mp3")).send().await.unwrap();
    assert_eq!(probe.status(), StatusCode::OK);
    assert_eq!(probe.headers()["content-type"], "audio/mpeg");
    assert_eq!(relay.relay.state().registry().count(), 0);

    let first = client.get(relay.url("/all.mp3")).send().await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = client.get(relay.url("/all.mp3")).send().await.unwrap();
    assert_eq!(second.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(second.headers()["location"], FALLBACK);

    let probe = client.head(relay.url("/all.mp3")).send().await.unwrap();
    assert_eq!(probe.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(probe.headers()["location"], FALLBACK);

    assert_eq!(relay.relay.state().registry().count(), 1);

    drop(first);
    relay.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn status_and_static_routes() {
    let (upstream_addr, _upstream, _release) = spawn_upstream(200, &[], false).await;
    let relay = start_relay(upstream_addr, 25).await;
    wait_connected(&relay.relay).await;

    let client = reqwest::Client::new();

    let status: serde_json::Value = client
        .get(relay.url("/"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["listeners"], 0);
    assert_eq!(status["bytes_in_month"], 0);
    assert_eq!(status["bytes_out_month"], 0);
    assert_eq!(status["upstream"], "connected");
    assert_eq!(status["config"]["listener_limit"], 25);
    assert_eq!(status["peaks"]["listeners"], 0);
    assert!(status["started_at"].as_i64().unwrap() > 0);

    let policy = client.get(relay.url("/crossdomain.xml")).send().await.unwrap();
    assert_eq!(policy.status(), StatusCode::OK);
    assert_eq!(policy.headers()["content-type"], "text/xml");
    assert_eq!(policy.text().await.unwrap(), "<cross-domain-policy/>");

    let other = client.get(relay.url("/no/such/path")).send().await.unwrap();
    assert_eq!(other.status(), StatusCode::OK);
    assert!(other.bytes().await.unwrap().is_empty());

    let post = client.post(relay.url("/all.mp3")).send().await.unwrap();
    assert_eq!(post.status(), StatusCode::OK);
    assert!(post.bytes().await.unwrap().is_empty());
    assert_eq!(relay.relay.state().registry().count(), 0);

    relay.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_ends_listener_streams() {
    let (upstream_addr, _upstream, _release) = spawn_upstream(200, &[], false).await;
    let relay = start_relay(upstream_addr, 5).await;
    wait_connected(&relay.relay).await;

    let mut listener = reqwest::get(relay.url("/all.mp3")).await.unwrap();
    assert_eq!(relay.relay.state().registry().count(), 1);

    let registry = Arc::clone(relay.relay.state().registry());
    relay.stop().await;

    assert_eq!(registry.count(), 0);
    let end = tokio::time::timeout(Duration::from_secs(5), listener.chunk())
        .await
        .expect("stream did not end");
    assert!(matches!(end, Ok(None) | Err(_)));
}

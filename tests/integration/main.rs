//! Multi-actor scenario tests for the message-queue substrate, exercised
//! end-to-end over real loopback TCP sockets (no mocks): single-peer
//! statement/request delivery, startup ordering, reconnection, credential
//! rejection, and duplicate-key replacement.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{ensure, Context, Result};

use mq_conn::{FnOperator, FnReceiver};
use mq_core::Chunk;
use mq_services::{Client, Server};

// Longer than the client's default first reconnect backoff (5s, see
// `Dialback::client_default`) so a test that forces one failed dial before
// the server comes up still has room to observe the eventual success.
const TIMEOUT: Duration = Duration::from_secs(10);

async fn spawn_server(clients: &[(&str, &str)]) -> (Arc<Server>, std::net::SocketAddr) {
    let (id, _) = Chunk::from_str("test-server");
    let pairs: Vec<(Chunk, Chunk)> = clients
        .iter()
        .map(|(k, t)| (Chunk::from_str(k).0, Chunk::from_str(t).0))
        .collect();
    let server = Server::bind("127.0.0.1:0", id, Arc::new(FnOperator::default()), &pairs)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let server2 = Arc::clone(&server);
    tokio::spawn(async move { server2.run().await });
    (server, addr)
}

/// Spawn a background task that repeatedly calls `server.receive(key, ..)`
/// and appends every observed Statement body to a shared log.
fn spawn_statement_sink(server: Arc<Server>, key: &'static str) -> Arc<Mutex<Vec<Vec<u8>>>> {
    let log: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
    let log2 = Arc::clone(&log);
    tokio::spawn(async move {
        loop {
            let log3 = Arc::clone(&log2);
            let receiver = FnReceiver::new(
                None,
                Some(Box::new(move |b| log3.lock().unwrap().push(b))),
            );
            if server.receive(key, &receiver).await.is_err() {
                break;
            }
        }
    });
    log
}

/// Poll `f` until it's true or [`TIMEOUT`] elapses, returning an error
/// (via `context`, naming `what`) in the latter case.
async fn wait_until<F: Fn() -> bool>(f: F, what: &str) -> Result<()> {
    tokio::time::timeout(TIMEOUT, async {
        while !f() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .with_context(|| format!("timed out waiting for {what}"))
}

#[tokio::test]
async fn loopback_statement_is_observed_by_the_server() -> Result<()> {
    let (server, addr) = spawn_server(&[("MoodyMoose", "DingDong")]).await;
    let log = spawn_statement_sink(Arc::clone(&server), "MoodyMoose");

    let client = Client::connect(
        addr.to_string(),
        "MoodyMoose",
        "DingDong",
        Arc::new(FnOperator::default()),
    );
    wait_until(|| client.is_connected(), "client to connect").await?;

    client.statement(b"hi".to_vec()).await?;

    wait_until(|| !log.lock().unwrap().is_empty(), "statement to be observed").await?;
    ensure!(log.lock().unwrap()[0] == b"hi", "unexpected statement body");
    Ok(())
}

#[tokio::test]
async fn request_response_round_trips_through_the_server() -> Result<()> {
    let (server, addr) = spawn_server(&[("asker", "tok")]).await;

    // Server answers every inbound Request with "ok".
    let server_loop = Arc::clone(&server);
    tokio::spawn(async move {
        let receiver = FnReceiver::new(Some(Box::new(|_body: Vec<u8>| b"ok".to_vec())), None);
        loop {
            if server_loop.receive("asker", &receiver).await.is_err() {
                break;
            }
        }
    });

    let client = Client::connect(
        addr.to_string(),
        "asker",
        "tok",
        Arc::new(FnOperator::default()),
    );
    wait_until(|| client.is_connected(), "client to connect").await?;

    let got: Arc<Mutex<Option<Vec<u8>>>> = Arc::new(Mutex::new(None));
    let got2 = Arc::clone(&got);
    client
        .request(
            b"How are you?".to_vec(),
            Box::new(move |body| *got2.lock().unwrap() = Some(body)),
        )
        .await?;

    wait_until(|| got.lock().unwrap().is_some(), "request callback to fire").await?;
    ensure!(
        got.lock().unwrap().as_deref() == Some(b"ok".as_slice()),
        "unexpected response body"
    );
    Ok(())
}

#[tokio::test]
async fn client_started_before_server_connects_once_server_comes_up() -> Result<()> {
    let (id, _) = Chunk::from_str("srv");
    let (key, _) = Chunk::from_str("early-bird");
    let (token, _) = Chunk::from_str("tok");

    // Reserve a port, then drop the listener so the client's first dials
    // fail and it has to back off and retry.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let connected = Arc::new(AtomicBool::new(false));
    let connected2 = Arc::clone(&connected);
    let op = FnOperator::new(
        Some(Box::new(move |_| connected2.store(true, Ordering::SeqCst))),
        None,
    );
    let client = Client::connect(addr.to_string(), "early-bird", "tok", Arc::new(op));

    // Give the dial loop a couple of failed attempts against the closed
    // port before the server exists.
    tokio::time::sleep(Duration::from_millis(50)).await;
    ensure!(!client.is_connected(), "client connected before server existed");

    let server = Server::bind(
        &addr.to_string(),
        id,
        Arc::new(FnOperator::default()),
        &[(key, token)],
    )
    .await
    .context("binding server to the reserved port")?;
    let server2 = Arc::clone(&server);
    tokio::spawn(async move { server2.run().await });

    wait_until(|| connected.load(Ordering::SeqCst), "OnConnect to fire").await?;
    ensure!(client.is_connected(), "client not connected after OnConnect fired");
    Ok(())
}

#[tokio::test]
async fn reconnect_with_a_fresh_client_receives_server_statements() -> Result<()> {
    let (server, addr) = spawn_server(&[("svc-a", "tok-a")]).await;

    let first = Client::connect(
        addr.to_string(),
        "svc-a",
        "tok-a",
        Arc::new(FnOperator::default()),
    );
    wait_until(|| first.is_connected(), "first client to connect").await?;
    first.close().await.context("closing first client")?;

    // A fresh Client with the same credentials re-establishes the
    // registry entry for "svc-a".
    let second = Client::connect(
        addr.to_string(),
        "svc-a",
        "tok-a",
        Arc::new(FnOperator::default()),
    );
    wait_until(|| second.is_connected(), "second client to connect").await?;

    let got: Arc<Mutex<Option<Vec<u8>>>> = Arc::new(Mutex::new(None));
    let got2 = Arc::clone(&got);
    tokio::spawn(async move {
        let receiver = FnReceiver::new(
            None,
            Some(Box::new(move |b| *got2.lock().unwrap() = Some(b))),
        );
        let _ = second.receive(&receiver).await;
    });

    wait_until(|| server.is_connected("svc-a"), "server to see svc-a reconnected").await?;
    server.statement("svc-a", b"hello again".to_vec()).await?;

    wait_until(|| got.lock().unwrap().is_some(), "statement to be delivered").await?;
    ensure!(
        got.lock().unwrap().as_deref() == Some(b"hello again".as_slice()),
        "unexpected statement body"
    );
    Ok(())
}

#[tokio::test]
async fn forbidden_credentials_never_appear_in_the_registry() -> Result<()> {
    let (server, addr) = spawn_server(&[("real-key", "real-token")]).await;

    let client = Client::connect(
        addr.to_string(),
        "wrong-key",
        "wrong-token",
        Arc::new(FnOperator::default()),
    );

    // The client's dial loop will keep retrying the handshake (and keep
    // getting Forbidden); it should never observe Connected state.
    tokio::time::sleep(Duration::from_millis(100)).await;
    ensure!(!client.is_connected(), "client connected with forbidden credentials");
    ensure!(
        !server.is_connected("wrong-key"),
        "server reports wrong-key as connected"
    );
    ensure!(server.list_conns().is_empty(), "forbidden key leaked into the registry");
    Ok(())
}

#[tokio::test]
async fn duplicate_key_delivers_only_to_the_second_client() -> Result<()> {
    let (server, addr) = spawn_server(&[("dup-svc", "dup-tok")]).await;

    let first = Client::connect(
        addr.to_string(),
        "dup-svc",
        "dup-tok",
        Arc::new(FnOperator::default()),
    );
    wait_until(|| first.is_connected(), "first client to connect").await?;

    // Register an outstanding Request on the first client before it gets
    // displaced.
    let first_cb_result: Arc<Mutex<Option<Vec<u8>>>> = Arc::new(Mutex::new(None));
    let first_cb_result2 = Arc::clone(&first_cb_result);
    first
        .request(
            b"pending".to_vec(),
            Box::new(move |body| *first_cb_result2.lock().unwrap() = Some(body)),
        )
        .await?;

    let second = Client::connect(
        addr.to_string(),
        "dup-svc",
        "dup-tok",
        Arc::new(FnOperator::default()),
    );
    wait_until(|| second.is_connected(), "second client to connect").await?;
    ensure!(
        server.list_conns().len() == 1,
        "expected only one registry entry per key"
    );

    // The first client's outstanding callback is released with an empty
    // body once its connection is displaced.
    wait_until(
        || first_cb_result.lock().unwrap().is_some(),
        "displaced client's pending request to be released",
    )
    .await?;
    ensure!(
        first_cb_result.lock().unwrap().as_deref() == Some(b"".as_slice()),
        "displaced request callback did not fire with an empty body"
    );

    let got: Arc<Mutex<Option<Vec<u8>>>> = Arc::new(Mutex::new(None));
    let got2 = Arc::clone(&got);
    tokio::spawn(async move {
        let receiver = FnReceiver::new(
            None,
            Some(Box::new(move |b| *got2.lock().unwrap() = Some(b))),
        );
        let _ = second.receive(&receiver).await;
    });

    server
        .statement("dup-svc", b"only for the second".to_vec())
        .await?;

    wait_until(|| got.lock().unwrap().is_some(), "statement to reach the second client").await?;
    ensure!(
        got.lock().unwrap().as_deref() == Some(b"only for the second".as_slice()),
        "unexpected statement body"
    );
    Ok(())
}

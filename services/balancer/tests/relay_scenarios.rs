
use std::sync::atomic::Ordering;
use std::time::Duration;

use harness::{dead_addr, BalancerHandle, MarkerBackend, ScriptedBackend, TcpEchoBackend};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

async fn read_all(addr: std::net::SocketAddr) -> Vec<u8> {
    timeout(TEST_TIMEOUT, async {
        let mut stream = TcpStream::connect(addr).await?;
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await?;
        Ok::<_, std::io::Error>(buf)
    })
    .await
    .expect("timed out")
    .expect("io error")
}

#[tokio::test]
async fn sequential_clients_follow_round_robin_order() {
    let first = MarkerBackend::spawn("9001").await.unwrap();
    let second = MarkerBackend::spawn("9002").await.unwrap();

    let balancer = BalancerHandle::spawn(&[first.addr, second.addr])
        .await
        .unwrap();

    let mut seen = Vec::new();
    for _ in 0..3 {
        let data = read_all(balancer.listen_addr).await;
        seen.push(String::from_utf8(data).unwrap());
    }

    assert_eq!(seen, vec!["9001", "9002", "9001"]);
}

#[tokio::test]
async fn client_receives_exactly_the_backend_reply() {
    let mut backend = ScriptedBackend::spawn().await.unwrap();
    let balancer = BalancerHandle::spawn(&[backend.addr]).await.unwrap();

    let mut client = TcpStream::connect(balancer.listen_addr).await.unwrap();
    let mut upstream = backend.next_connection().await;

    client.write_all(b"PING").await.unwrap();

    let mut request = [0u8; 4];
    timeout(TEST_TIMEOUT, upstream.read_exact(&mut request))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&request, b"PING");

    upstream.write_all(b"PONG").await.unwrap();
    drop(upstream);

    let mut response = Vec::new();
    timeout(TEST_TIMEOUT, client.read_to_end(&mut response))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response, b"PONG");
}

#[tokio::test]
async fn backend_close_is_seen_by_client_after_data() {
    let mut backend = ScriptedBackend::spawn().await.unwrap();
    let balancer = BalancerHandle::spawn(&[backend.addr]).await.unwrap();

    let mut client = TcpStream::connect(balancer.listen_addr).await.unwrap();
    let mut upstream = backend.next_connection().await;

    upstream.write_all(b"BYE").await.unwrap();
    upstream.shutdown().await.unwrap();

    let mut received = Vec::new();
    let result = timeout(TEST_TIMEOUT, client.read_to_end(&mut received)).await;
    assert!(result.is_ok(), "client hung after backend close");
    assert!(result.unwrap().is_ok(), "client saw an error mid-stream");
    assert_eq!(received, b"BYE");

    balancer
        .wait_for("session close", |l| {
            l.stats().connections_closed.load(Ordering::Relaxed) == 1
        })
        .await;
    assert_eq!(balancer.listener.stats().relay_errors.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn client_disconnect_closes_backend_socket() {
    let mut backend = ScriptedBackend::spawn().await.unwrap();
    let balancer = BalancerHandle::spawn(&[backend.addr]).await.unwrap();

    let client = TcpStream::connect(balancer.listen_addr).await.unwrap();
    let mut upstream = backend.next_connection().await;

    drop(client);

    // The backend never writes; the relay alone must close its side.
    let mut buf = [0u8; 16];
    let result = timeout(TEST_TIMEOUT, upstream.read(&mut buf))
        .await
        .expect("backend socket was not closed");
    assert!(matches!(result, Ok(0) | Err(_)));

    balancer
        .wait_for("session close", |l| {
            l.stats().connections_active.load(Ordering::Relaxed) == 0
        })
        .await;
}

#[tokio::test]
async fn failed_backend_connect_closes_client_without_data() {
    let backend = dead_addr().await;
    let balancer = BalancerHandle::spawn(&[backend]).await.unwrap();

    let mut client = TcpStream::connect(balancer.listen_addr).await.unwrap();

    // A reset is as good as a FIN here; either way nothing was sent.
    let mut received = Vec::new();
    let _ = timeout(TEST_TIMEOUT, client.read_to_end(&mut received))
        .await
        .expect("client connection was not closed");
    assert!(received.is_empty());

    balancer
        .wait_for("backend failure", |l| {
            l.stats().backend_failed.load(Ordering::Relaxed) == 1
        })
        .await;
    assert_eq!(balancer.listener.stats().backend_connected.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn failed_backend_does_not_stop_the_listener() {
    let echo = TcpEchoBackend::spawn().await.unwrap();
    let dead = dead_addr().await;
    let balancer = BalancerHandle::spawn(&[dead, echo.addr]).await.unwrap();

    // First session goes to the dead backend.
    let data = read_all(balancer.listen_addr).await;
    assert!(data.is_empty());

    // Second goes to the echo backend; no fallback happened for the first.
    let mut client = TcpStream::connect(balancer.listen_addr).await.unwrap();
    client.write_all(b"still up").await.unwrap();
    let mut buf = [0u8; 8];
    timeout(TEST_TIMEOUT, client.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"still up");
    assert_eq!(echo.connection_count(), 1);
}

#[tokio::test]
async fn large_payload_round_trips_in_order() {
    let echo = TcpEchoBackend::spawn().await.unwrap();
    let balancer = BalancerHandle::spawn(&[echo.addr]).await.unwrap();

    let payload: Vec<u8> = (0..256 * 1024).map(|i| (i % 253) as u8).collect();
    let expected = payload.clone();

    let client = TcpStream::connect(balancer.listen_addr).await.unwrap();
    let (mut reader, mut writer) = client.into_split();

    let write_task = tokio::spawn(async move {
        writer.write_all(&payload).await.unwrap();
        writer
    });

    let mut received = vec![0u8; expected.len()];
    timeout(TEST_TIMEOUT, reader.read_exact(&mut received))
        .await
        .unwrap()
        .unwrap();
    assert!(received == expected, "relayed bytes differ from sent bytes");

    drop(write_task.await.unwrap());
    balancer
        .wait_for("byte counters", |l| {
            l.stats().bytes_from_backend.load(Ordering::Relaxed) == expected.len() as u64
        })
        .await;
}

#[tokio::test]
async fn concurrent_sessions_are_spread_evenly() {
    let a = TcpEchoBackend::spawn().await.unwrap();
    let b = TcpEchoBackend::spawn().await.unwrap();
    let balancer = BalancerHandle::spawn(&[a.addr, b.addr]).await.unwrap();

    let mut clients = Vec::new();
    for i in 0..10u8 {
        let addr = balancer.listen_addr;
        clients.push(tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await?;
            stream.write_all(&[i]).await?;
            let mut buf = [0u8; 1];
            stream.read_exact(&mut buf).await?;
            Ok::<_, std::io::Error>(buf[0])
        }));
    }

    for (i, client) in clients.into_iter().enumerate() {
        let echoed = timeout(TEST_TIMEOUT, client).await.unwrap().unwrap().unwrap();
        assert_eq!(echoed as usize, i);
    }

    assert_eq!(a.connection_count(), 5);
    assert_eq!(b.connection_count(), 5);
}

#[tokio::test]
async fn idle_session_does_not_block_accepts() {
    let mut slow = ScriptedBackend::spawn().await.unwrap();
    let echo = TcpEchoBackend::spawn().await.unwrap();
    let balancer = BalancerHandle::spawn(&[slow.addr, echo.addr]).await.unwrap();

    // Parked session: the backend never answers.
    let _parked = TcpStream::connect(balancer.listen_addr).await.unwrap();
    let _upstream = slow.next_connection().await;

    let mut client = TcpStream::connect(balancer.listen_addr).await.unwrap();
    client.write_all(b"hi").await.unwrap();
    let mut buf = [0u8; 2];
    timeout(TEST_TIMEOUT, client.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"hi");
}

#[tokio::test]
async fn idle_timeout_tears_down_session() {
    let mut backend = ScriptedBackend::spawn().await.unwrap();
    let balancer = BalancerHandle::spawn_with(&[backend.addr], |config| {
        config.idle_timeout = Some(Duration::from_millis(100));
    })
    .await
    .unwrap();

    let mut client = TcpStream::connect(balancer.listen_addr).await.unwrap();
    let _upstream = backend.next_connection().await;

    let mut buf = Vec::new();
    let result = timeout(TEST_TIMEOUT, client.read_to_end(&mut buf))
        .await
        .expect("idle session was not closed");
    assert!(result.is_ok());
    assert!(buf.is_empty());

    balancer
        .wait_for("relay error", |l| {
            l.stats().relay_errors.load(Ordering::Relaxed) == 1
        })
        .await;
}

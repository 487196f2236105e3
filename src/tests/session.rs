use std::{sync::Arc, time::Duration};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, DuplexStream},
    sync::watch,
};

use crate::{
    core::Core,
    listener::{
        frame::{self, NetstringDecoder},
        session::Session,
    },
    sts::Mode,
    tests::{valid, TestFetcher},
};

fn connect(core: Arc<Core>) -> (DuplexStream, watch::Sender<bool>) {
    let (client, server) = tokio::io::duplex(4096);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(
        Session {
            core,
            stream: server,
            span: tracing::info_span!("test"),
        }
        .handle_conn(shutdown_rx),
    );
    (client, shutdown_tx)
}

async fn read_frames(client: &mut DuplexStream, count: usize) -> Vec<Vec<u8>> {
    let mut decoder = NetstringDecoder::new(frame::DEFAULT_MAX_FRAME_SIZE);
    let mut frames = Vec::new();
    let mut buf = [0u8; 1024];
    while frames.len() < count {
        let bytes_read = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
            .await
            .expect("timed out waiting for replies")
            .unwrap();
        assert!(bytes_read > 0, "connection closed early");
        decoder.ingest(&buf[..bytes_read]).unwrap();
        while let Some(reply) = decoder.next_frame() {
            frames.push(reply);
        }
    }
    frames
}

async fn read_eof(client: &mut DuplexStream) {
    let mut buf = [0u8; 1024];
    loop {
        let bytes_read = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
            .await
            .expect("timed out waiting for close")
            .unwrap();
        if bytes_read == 0 {
            return;
        }
    }
}

#[tokio::test]
async fn replies_use_exact_netstring_framing() {
    let fetcher = Arc::new(TestFetcher::default().with_result(
        "example.com",
        valid("abc", Mode::Enforce, &["mail.example.com"], 86400),
    ));
    let (mut client, _shutdown) = connect(Arc::new(Core::test(fetcher)));

    client
        .write_all(&frame::encode(b" example.com"))
        .await
        .unwrap();
    let mut reply = vec![0u8; 36];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, b"32:OK secure match=mail.example.com,");

    client
        .write_all(&frame::encode(b" unknown.example"))
        .await
        .unwrap();
    let mut reply = vec![0u8; 12];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, b"9:NOTFOUND ,");
}

#[tokio::test]
async fn pipelined_replies_keep_request_order() {
    let fetcher = Arc::new(
        TestFetcher::default()
            .with_result(
                "slow.example",
                valid("s", Mode::Enforce, &["mx.slow.example"], 86400),
            )
            .with_delay("slow.example", Duration::from_millis(300))
            .with_result(
                "fast.example",
                valid("f", Mode::Enforce, &["mx.fast.example"], 86400),
            ),
    );
    let (mut client, _shutdown) = connect(Arc::new(Core::test(fetcher)));

    // Both requests in one chunk; the slow one is first.
    let mut chunk = frame::encode(b" slow.example");
    chunk.extend_from_slice(&frame::encode(b" fast.example"));
    client.write_all(&chunk).await.unwrap();

    let replies = read_frames(&mut client, 2).await;
    assert_eq!(replies[0], b"OK secure match=mx.slow.example".to_vec());
    assert_eq!(replies[1], b"OK secure match=mx.fast.example".to_vec());
}

#[tokio::test]
async fn malformed_input_closes_after_draining_replies() {
    let fetcher = Arc::new(TestFetcher::default().with_result(
        "example.com",
        valid("abc", Mode::Enforce, &["mail.example.com"], 86400),
    ));
    let (mut client, _shutdown) = connect(Arc::new(Core::test(fetcher)));

    // A valid request followed by garbage in the same chunk: the parsed
    // request is still answered before the connection is torn down.
    let mut chunk = frame::encode(b" example.com");
    chunk.extend_from_slice(b"garbage");
    client.write_all(&chunk).await.unwrap();

    let replies = read_frames(&mut client, 1).await;
    assert_eq!(replies[0], b"OK secure match=mail.example.com".to_vec());
    read_eof(&mut client).await;
}

#[tokio::test]
async fn garbage_closes_without_reply() {
    let (mut client, _shutdown) = connect(Arc::new(Core::test(Arc::new(TestFetcher::default()))));

    client.write_all(b"no digits here").await.unwrap();
    read_eof(&mut client).await;
}

#[tokio::test]
async fn oversized_frame_closes_connection() {
    let (mut client, _shutdown) = connect(Arc::new(Core::test(Arc::new(TestFetcher::default()))));

    client.write_all(b"99999:").await.unwrap();
    read_eof(&mut client).await;
}

#[tokio::test]
async fn concurrent_connections_share_one_fetch() {
    let fetcher = Arc::new(
        TestFetcher::default()
            .with_result(
                "popular.example",
                valid("p", Mode::Enforce, &["mx.popular.example"], 86400),
            )
            .with_delay("popular.example", Duration::from_millis(200)),
    );
    let core = Arc::new(Core::test(fetcher.clone()));
    let (mut first, _shutdown_first) = connect(core.clone());
    let (mut second, _shutdown_second) = connect(core);

    first
        .write_all(&frame::encode(b" popular.example"))
        .await
        .unwrap();
    second
        .write_all(&frame::encode(b" popular.example"))
        .await
        .unwrap();

    assert_eq!(
        read_frames(&mut first, 1).await[0],
        b"OK secure match=mx.popular.example".to_vec()
    );
    assert_eq!(
        read_frames(&mut second, 1).await[0],
        b"OK secure match=mx.popular.example".to_vec()
    );
    assert_eq!(fetcher.fetches(), 1);
}

#[tokio::test]
async fn shutdown_drains_pending_replies() {
    let fetcher = Arc::new(
        TestFetcher::default()
            .with_result(
                "example.com",
                valid("abc", Mode::Enforce, &["mail.example.com"], 86400),
            )
            .with_delay("example.com", Duration::from_millis(200)),
    );
    let (mut client, shutdown) = connect(Arc::new(Core::test(fetcher)));

    client
        .write_all(&frame::encode(b" example.com"))
        .await
        .unwrap();
    // Let the request get parsed before signalling shutdown.
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.send(true).unwrap();

    let replies = read_frames(&mut client, 1).await;
    assert_eq!(replies[0], b"OK secure match=mail.example.com".to_vec());
    read_eof(&mut client).await;
}

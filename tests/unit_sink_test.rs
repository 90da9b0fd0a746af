use onyxcache::core::crawler::{ClientSink, DumpClient, FlushOutcome, MIN_BUFSPACE, ReleasedClient};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

async fn socket_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (connect, accept) = tokio::join!(TcpStream::connect(addr), listener.accept());
    (accept.unwrap().0, connect.unwrap())
}

#[tokio::test]
async fn test_sink_flushes_buffered_bytes_to_the_socket() {
    let (server, mut reader) = socket_pair().await;
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut sink = ClientSink::attach(DumpClient::new(server, tx)).unwrap();

    sink.append(b"hello crawler\r\n");
    assert_eq!(sink.used(), 15);
    while sink.used() > 0 {
        assert_ne!(sink.flush().await, FlushOutcome::Closed);
    }

    let mut buf = [0u8; 64];
    let n = reader.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"hello crawler\r\n");
}

#[tokio::test]
async fn test_sink_headroom_growth_doubles_capacity() {
    let (server, _reader) = socket_pair().await;
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut sink = ClientSink::attach(DumpClient::new(server, tx)).unwrap();

    // Fill until the headroom contract would trip, then grow.
    let chunk = vec![b'x'; MIN_BUFSPACE];
    while !sink.needs_flush() {
        sink.append(&chunk);
    }
    let used_before = sink.used();
    sink.ensure_headroom().unwrap();
    assert!(!sink.needs_flush());
    assert_eq!(sink.used(), used_before);
}

#[tokio::test]
async fn test_sink_latches_closed_when_peer_hangs_up() {
    let (server, reader) = socket_pair().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut sink = ClientSink::attach(DumpClient::new(server, tx)).unwrap();
    drop(reader);

    // The hangup surfaces on some write after the peer is gone.
    let mut outcome = FlushOutcome::Flushed;
    for _ in 0..100 {
        sink.append(b"data after hangup\r\n");
        outcome = sink.flush().await;
        if outcome == FlushOutcome::Closed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(outcome, FlushOutcome::Closed);
    assert!(sink.is_closed());
    assert_eq!(sink.used(), 0);

    // The connection went back as a side-thread close, and later
    // operations stay failed.
    let released = rx.recv().await.unwrap();
    assert!(matches!(released, ReleasedClient::SideThreadClosed(_)));
    sink.append(b"ignored");
    assert_eq!(sink.used(), 0);
    assert_eq!(sink.flush().await, FlushOutcome::Closed);
}

#[tokio::test]
async fn test_sink_release_redispatches_the_connection() {
    let (server, mut reader) = socket_pair().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut sink = ClientSink::attach(DumpClient::new(server, tx)).unwrap();

    sink.append(b"END\r\n");
    while sink.used() > 0 {
        assert_ne!(sink.flush().await, FlushOutcome::Closed);
    }
    sink.release();

    let released = rx.recv().await.unwrap();
    assert!(matches!(released, ReleasedClient::Redispatch(_)));
    drop(released);

    let mut out = Vec::new();
    reader.read_to_end(&mut out).await.unwrap();
    assert_eq!(out, b"END\r\n");
}

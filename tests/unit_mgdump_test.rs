use bytes::Bytes;
use onyxcache::config::CrawlerConfig;
use onyxcache::core::crawler::{
    CrawlRequest, CrawlTarget, DumpClient, LruCrawler, ReleasedClient,
};
use onyxcache::core::stats::CrawlerStats;
use onyxcache::core::storage::{CacheItem, CacheState, ItemFlags};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};

async fn setup() -> (Arc<CacheState>, Arc<LruCrawler>, broadcast::Sender<()>) {
    let cache = Arc::new(CacheState::new(8));
    let crawler = LruCrawler::new(
        cache.clone(),
        CrawlerConfig::default(),
        Arc::new(CrawlerStats::new()),
    );
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    crawler.spawn_worker(shutdown_rx).await;
    (cache, crawler, shutdown_tx)
}

async fn dump_client() -> (
    DumpClient,
    TcpStream,
    mpsc::UnboundedReceiver<ReleasedClient>,
) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (connect, accept) = tokio::join!(TcpStream::connect(addr), listener.accept());
    let reader = connect.unwrap();
    let (stream, _) = accept.unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    (DumpClient::new(stream, tx), reader, rx)
}

async fn read_dump(
    crawler: &LruCrawler,
    mut reader: TcpStream,
    rx: &mut mpsc::UnboundedReceiver<ReleasedClient>,
) -> String {
    crawler.wait_idle().await;
    let released = rx.recv().await.expect("connection was not handed back");
    drop(released);
    let mut out = Vec::new();
    reader.read_to_end(&mut out).await.unwrap();
    String::from_utf8(out).unwrap()
}

fn put(cache: &CacheState, key: &[u8], exptime: u32, class: u8) -> Arc<CacheItem> {
    cache.insert(CacheItem::new(
        Bytes::copy_from_slice(key),
        Bytes::from_static(b"value"),
        exptime,
        class,
        0,
    ))
}

#[tokio::test]
async fn test_mgdump_binary_key_is_base64_flagged() {
    let (cache, crawler, _shutdown) = setup().await;
    cache.clock.advance(10);

    let item = put(&cache, &[0x00, 0xFF, 0x41], 0, 1);
    item.add_flags(ItemFlags::KEY_BINARY);

    let (client, reader, mut rx) = dump_client().await;
    crawler
        .start(CrawlRequest::mgdump(CrawlTarget::Hash, client))
        .await
        .unwrap();
    let dump = read_dump(&crawler, reader, &mut rx).await;

    assert_eq!(dump, "mg AP9B b\r\nEN\r\n");
}

#[tokio::test]
async fn test_mgdump_plain_keys_round_trip() {
    let (cache, crawler, _shutdown) = setup().await;
    cache.clock.advance(10);

    let mut keys: HashSet<String> = ["alpha", "beta", "gamma", "delta"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    for key in &keys {
        put(&cache, key.as_bytes(), 0, 1);
    }
    // A deleted key must not appear in the dump.
    assert!(cache.remove(b"delta"));
    keys.remove("delta");

    let (client, reader, mut rx) = dump_client().await;
    crawler
        .start(CrawlRequest::mgdump(CrawlTarget::Hash, client))
        .await
        .unwrap();
    let dump = read_dump(&crawler, reader, &mut rx).await;

    assert!(dump.ends_with("EN\r\n"));
    let dumped: HashSet<String> = dump
        .lines()
        .filter_map(|line| line.strip_prefix("mg "))
        .filter(|rest| !rest.is_empty())
        .map(|rest| rest.to_string())
        .collect();
    assert_eq!(dumped, keys);
}

#[tokio::test]
async fn test_mgdump_skips_expired_items_without_external_checks() {
    let (cache, crawler, _shutdown) = setup().await;
    cache.clock.advance(1000);
    let now = cache.clock.now();

    put(&cache, b"dead", now - 1, 1);
    put(&cache, b"live", now + 100, 1);

    let (client, reader, mut rx) = dump_client().await;
    crawler
        .start(CrawlRequest::mgdump(CrawlTarget::Hash, client))
        .await
        .unwrap();
    let dump = read_dump(&crawler, reader, &mut rx).await;

    assert_eq!(dump, "mg live\r\nEN\r\n");
}

#[tokio::test]
async fn test_mgdump_over_class_list() {
    let (cache, crawler, _shutdown) = setup().await;
    cache.clock.advance(10);
    put(&cache, b"one", 0, 4);
    put(&cache, b"two", 0, 4);

    let (client, reader, mut rx) = dump_client().await;
    crawler
        .start(CrawlRequest::mgdump(CrawlTarget::parse("4").unwrap(), client))
        .await
        .unwrap();
    let dump = read_dump(&crawler, reader, &mut rx).await;

    assert!(dump.contains("mg one\r\n"));
    assert!(dump.contains("mg two\r\n"));
    assert!(dump.ends_with("EN\r\n"));
}

#[tokio::test]
async fn test_mgdump_locked_terminator() {
    let (cache, crawler, _shutdown) = setup().await;
    assert!(cache.hash.set_expanding(true));

    let (client, reader, mut rx) = dump_client().await;
    crawler
        .start(CrawlRequest::mgdump(CrawlTarget::Hash, client))
        .await
        .unwrap();
    let dump = read_dump(&crawler, reader, &mut rx).await;

    assert_eq!(dump, "ERROR locked try again later\r\n");
}

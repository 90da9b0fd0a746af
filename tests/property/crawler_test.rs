// tests/property/crawler_test.rs

//! Property-based tests for crawler invariants: the TTL census always
//! balances against the items examined, and binary key dumps round-trip
//! through base64.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use onyxcache::config::CrawlerConfig;
use onyxcache::core::crawler::{
    CrawlRequest, CrawlTarget, DumpClient, LruCrawler, TtlCrawlStats,
};
use onyxcache::core::stats::CrawlerStats;
use onyxcache::core::storage::{CacheItem, CacheState, ItemFlags};
use proptest::prelude::*;
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

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 16,
        max_shrink_iters: 200,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_ttl_census_balances(exptimes in prop::collection::vec(0u32..5000, 1..40)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (cache, crawler, _shutdown) = setup().await;
            cache.clock.advance(1000);
            let now = cache.clock.now();

            let expected_reclaimed =
                exptimes.iter().filter(|&&e| e != 0 && e < now).count() as u64;
            let expected_noexp = exptimes.iter().filter(|&&e| e == 0).count() as u64;
            for (i, &exptime) in exptimes.iter().enumerate() {
                cache.insert(CacheItem::new(
                    Bytes::from(format!("key{i}").into_bytes()),
                    Bytes::from_static(b"value"),
                    exptime,
                    1,
                    0,
                ));
            }

            let stats = Arc::new(TtlCrawlStats::new());
            crawler
                .start(
                    CrawlRequest::expired(CrawlTarget::parse("1").unwrap(), 0)
                        .with_stats(stats.clone()),
                )
                .await
                .unwrap();
            crawler.wait_idle().await;

            let rec = stats.class_snapshot(1);
            let sentinel = crawler.sentinel_snapshot(1).await;
            assert_eq!(sentinel.checked, exptimes.len() as u64);
            assert_eq!(rec.seen + rec.reclaimed, sentinel.checked);
            assert_eq!(rec.reclaimed, expected_reclaimed);
            assert_eq!(rec.noexp, expected_noexp);
        });
    }

    #[test]
    fn test_mgdump_binary_keys_round_trip(
        keys in prop::collection::hash_set(prop::collection::vec(any::<u8>(), 1..24), 1..16)
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (cache, crawler, _shutdown) = setup().await;
            cache.clock.advance(10);

            for key in &keys {
                let item = cache.insert(CacheItem::new(
                    Bytes::copy_from_slice(key),
                    Bytes::from_static(b"value"),
                    0,
                    1,
                    0,
                ));
                item.add_flags(ItemFlags::KEY_BINARY);
            }

            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let (connect, accept) =
                tokio::join!(TcpStream::connect(addr), listener.accept());
            let mut reader = connect.unwrap();
            let (stream, _) = accept.unwrap();
            let (tx, mut rx) = mpsc::unbounded_channel();

            crawler
                .start(CrawlRequest::mgdump(
                    CrawlTarget::Hash,
                    DumpClient::new(stream, tx),
                ))
                .await
                .unwrap();
            crawler.wait_idle().await;
            drop(rx.recv().await.unwrap());

            let mut out = Vec::new();
            reader.read_to_end(&mut out).await.unwrap();
            let dump = String::from_utf8(out).unwrap();
            assert!(dump.ends_with("EN\r\n"));

            let dumped: HashSet<Vec<u8>> = dump
                .lines()
                .filter_map(|line| line.strip_prefix("mg "))
                .filter_map(|rest| rest.strip_suffix(" b"))
                .map(|encoded| BASE64.decode(encoded).unwrap())
                .collect();
            assert_eq!(dumped, keys);
        });
    }
}

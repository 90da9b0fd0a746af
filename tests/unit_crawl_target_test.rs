use onyxcache::core::CrawlerError;
use onyxcache::core::crawler::{CrawlKind, CrawlTarget};

#[tokio::test]
async fn test_crawl_kind_wire_tags_round_trip() {
    for (tag, kind) in [
        (0u8, CrawlKind::Autoexpire),
        (1, CrawlKind::Expired),
        (2, CrawlKind::Metadump),
        (3, CrawlKind::Mgdump),
    ] {
        assert_eq!(CrawlKind::from_tag(tag), Some(kind));
        assert_eq!(kind.tag(), tag);
    }
    assert_eq!(CrawlKind::from_tag(4), None);
    assert!(CrawlKind::Metadump.is_dump());
    assert!(CrawlKind::Mgdump.is_dump());
    assert!(!CrawlKind::Expired.is_dump());
    assert!(!CrawlKind::Autoexpire.is_dump());
}

#[tokio::test]
async fn test_parse_all() {
    assert_eq!(CrawlTarget::parse("all").unwrap(), CrawlTarget::All);
}

#[tokio::test]
async fn test_parse_hash() {
    assert_eq!(CrawlTarget::parse("hash").unwrap(), CrawlTarget::Hash);
}

#[tokio::test]
async fn test_parse_single_class_expands_all_segments() {
    let target = CrawlTarget::parse("1").unwrap();
    let CrawlTarget::Classes(mut ids) = target else {
        panic!("expected a class list");
    };
    ids.sort_unstable();
    // Class 1 in each of the hot/warm/cold/temp segments.
    assert_eq!(ids, vec![1, 65, 129, 193]);
}

#[tokio::test]
async fn test_parse_class_list() {
    let target = CrawlTarget::parse("2,5").unwrap();
    let CrawlTarget::Classes(ids) = target else {
        panic!("expected a class list");
    };
    assert_eq!(ids.len(), 8);
    for id in [2u16, 66, 130, 194, 5, 69, 133, 197] {
        assert!(ids.contains(&id), "missing expanded id {id}");
    }
}

#[tokio::test]
async fn test_parse_tolerates_spaces_around_ids() {
    let target = CrawlTarget::parse("3, 4").unwrap();
    let CrawlTarget::Classes(ids) = target else {
        panic!("expected a class list");
    };
    assert!(ids.contains(&3));
    assert!(ids.contains(&4));
}

#[tokio::test]
async fn test_parse_rejects_class_zero() {
    assert_eq!(CrawlTarget::parse("0").unwrap_err(), CrawlerError::BadClass);
}

#[tokio::test]
async fn test_parse_rejects_class_out_of_range() {
    // 63 is MAX_CLASSES - 1, the first invalid id.
    assert_eq!(CrawlTarget::parse("63").unwrap_err(), CrawlerError::BadClass);
    assert_eq!(CrawlTarget::parse("99").unwrap_err(), CrawlerError::BadClass);
}

#[tokio::test]
async fn test_parse_rejects_garbage() {
    assert_eq!(
        CrawlTarget::parse("abc").unwrap_err(),
        CrawlerError::BadClass
    );
    assert_eq!(
        CrawlTarget::parse("1,,2").unwrap_err(),
        CrawlerError::BadClass
    );
    assert_eq!(CrawlTarget::parse("").unwrap_err(), CrawlerError::BadClass);
    assert_eq!(CrawlTarget::parse("-1").unwrap_err(), CrawlerError::BadClass);
}

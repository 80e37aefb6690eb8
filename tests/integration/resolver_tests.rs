use super::*;
use basket_price::utils::error::{ExtractionError, PoolError};
use basket_price::ResolveError;
use futures::future::join_all;
use rstest::rstest;
use tokio_test::{assert_err, assert_ok};

#[tokio::test]
async fn test_resolves_first_price_on_page() -> anyhow::Result<()> {
    let browser = StubBrowser::with_price("£1.55 was £1.75");
    let resolver = build_resolver(&test_config(), &browser).await?;

    let result = resolver.resolve("tesco", "Semi Skimmed Milk").await?;

    assert_eq!(result.price, 1.55);
    assert_eq!(
        browser.visited(),
        vec!["https://www.tesco.com/groceries/en-GB/search?query=semi%20skimmed%20milk".to_string()]
    );
    Ok(())
}

#[tokio::test]
async fn test_pence_only_price() -> anyhow::Result<()> {
    let browser = StubBrowser::with_price("85p");
    let resolver = build_resolver(&test_config(), &browser).await?;

    let result = resolver.resolve("asda", "bananas").await?;
    assert!((result.price - 0.85).abs() < f64::EPSILON);
    Ok(())
}

#[tokio::test]
async fn test_repeat_lookup_is_served_from_cache() -> anyhow::Result<()> {
    let browser = StubBrowser::with_price("£1.55");
    let resolver = build_resolver(&test_config(), &browser).await?;

    let first = resolver.resolve("tesco", "milk").await?;
    browser.set_mode(PageMode::Price("£9.99".to_string()));
    let second = resolver.resolve(" TESCO ", "MILK ").await?;

    assert_eq!(first, second);
    assert_eq!(browser.navigations(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_expired_entry_triggers_fresh_extraction() -> anyhow::Result<()> {
    let browser = StubBrowser::with_price("£1.55");
    let mut config = test_config();
    config.cache.ttl_secs = 60;
    let resolver = build_resolver(&config, &browser).await?;

    assert_eq!(resolver.resolve("tesco", "milk").await?.price, 1.55);
    browser.set_mode(PageMode::Price("£1.45".to_string()));

    tokio::time::advance(Duration::from_secs(59)).await;
    assert_eq!(resolver.resolve("tesco", "milk").await?.price, 1.55);

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(resolver.resolve("tesco", "milk").await?.price, 1.45);
    assert_eq!(browser.navigations(), 2);
    Ok(())
}

#[tokio::test]
async fn test_unsupported_retailer_never_touches_pool() -> anyhow::Result<()> {
    let browser = StubBrowser::with_price("£1.55");
    let resolver = build_resolver(&test_config(), &browser).await?;

    let err = resolver.resolve("waitrose", "milk").await.unwrap_err();

    assert_eq!(
        err,
        ResolveError::UnsupportedRetailer {
            retailer: "waitrose".to_string()
        }
    );
    assert_eq!(browser.navigations(), 0);
    assert_eq!(resolver.pool().stats().busy, 0);
    Ok(())
}

#[rstest]
#[case("", "milk")]
#[case("   ", "milk")]
#[case("tesco", "")]
#[case("tesco", "   ")]
#[tokio::test]
async fn test_missing_input_is_rejected(#[case] store: &str, #[case] item: &str) -> anyhow::Result<()> {
    let browser = StubBrowser::with_price("£1.55");
    let resolver = build_resolver(&test_config(), &browser).await?;

    let result = resolver.resolve(store, item).await;
    assert!(matches!(result, Err(ResolveError::InvalidInput(_))));
    assert_eq!(browser.navigations(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_selector_timeout_discards_context() -> anyhow::Result<()> {
    let browser = StubBrowser::new(PageMode::NoMatch);
    let config = test_config();
    let resolver = build_resolver(&config, &browser).await?;

    let err = resolver.resolve("asda", "bread").await.unwrap_err();

    assert!(matches!(
        err,
        ResolveError::Unavailable(ExtractionError::SelectorTimeout { timeout_ms: 500, .. })
    ));
    // The failed context is closed and its slot rebuilt before the error returns.
    assert_eq!(browser.closed(), 1);
    assert_eq!(browser.created(), config.pool.size + 1);
    let stats = resolver.pool().stats();
    assert_eq!(stats.busy, 0);
    assert_eq!(stats.idle, config.pool.size);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_failed_lookup_is_not_cached() -> anyhow::Result<()> {
    let browser = StubBrowser::new(PageMode::NoMatch);
    let resolver = build_resolver(&test_config(), &browser).await?;

    assert_err!(resolver.resolve("asda", "bread").await);
    assert!(resolver.cache().is_empty().await);

    browser.set_mode(PageMode::Price("£1.10".to_string()));
    let result = assert_ok!(resolver.resolve("asda", "bread").await);
    assert_eq!(result.price, 1.10);
    assert_eq!(browser.navigations(), 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_misses_share_one_extraction() -> anyhow::Result<()> {
    let browser = StubBrowser::with_price("£2.25");
    browser.set_navigation_delay(Duration::from_millis(100));
    let resolver = build_resolver(&test_config(), &browser).await?;

    let lookups = (0..5).map(|_| resolver.resolve("sainsburys", "eggs"));
    let results = join_all(lookups).await;

    for result in results {
        assert_eq!(result?.price, 2.25);
    }
    assert_eq!(browser.navigations(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_coalescing_disabled_extracts_per_caller() -> anyhow::Result<()> {
    let browser = StubBrowser::with_price("£2.25");
    browser.set_navigation_delay(Duration::from_millis(100));
    let mut config = test_config();
    config.resolver.coalesce_inflight = false;
    let resolver = build_resolver(&config, &browser).await?;

    let (a, b) = tokio::join!(
        resolver.resolve("sainsburys", "eggs"),
        resolver.resolve("sainsburys", "eggs"),
    );

    assert_eq!(a?.price, 2.25);
    assert_eq!(b?.price, 2.25);
    assert_eq!(browser.navigations(), 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_lookup_returns_its_slot() -> anyhow::Result<()> {
    let browser = StubBrowser::new(PageMode::Hang);
    let mut config = test_config();
    config.pool.size = 1;
    let resolver = build_resolver(&config, &browser).await?;

    let abandoned = tokio::time::timeout(Duration::from_millis(100), resolver.resolve("tesco", "milk")).await;
    assert!(abandoned.is_err());

    let stats = resolver.pool().stats();
    assert_eq!(stats.busy, 0);
    assert_eq!(stats.vacant, 1);

    // Let the background close run.
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(browser.closed(), 1);

    browser.set_mode(PageMode::Price("£1.55".to_string()));
    assert_eq!(resolver.resolve("tesco", "milk").await?.price, 1.55);
    assert_eq!(browser.created(), 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_lookups_leave_no_inflight_entries() -> anyhow::Result<()> {
    let browser = StubBrowser::new(PageMode::Hang);
    let resolver = build_resolver(&test_config(), &browser).await?;

    for i in 0..50 {
        let item = format!("item {}", i);
        let abandoned = tokio::time::timeout(Duration::from_millis(10), resolver.resolve("tesco", &item)).await;
        assert!(abandoned.is_err());
    }

    assert_eq!(resolver.inflight(), 0);
    assert_eq!(resolver.pool().stats().busy, 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_finished_lookups_leave_no_inflight_entries() -> anyhow::Result<()> {
    let browser = StubBrowser::with_price("£2.25");
    browser.set_navigation_delay(Duration::from_millis(100));
    let resolver = build_resolver(&test_config(), &browser).await?;

    let results = join_all((0..3).map(|_| resolver.resolve("sainsburys", "eggs"))).await;
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(resolver.inflight(), 0);

    browser.set_mode(PageMode::NoMatch);
    assert_err!(resolver.resolve("sainsburys", "flour").await);
    assert_eq!(resolver.inflight(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_pool_reports_busy() -> anyhow::Result<()> {
    let browser = StubBrowser::new(PageMode::Hang);
    let mut config = test_config();
    config.pool.size = 1;
    config.pool.acquire_timeout_ms = 100;
    let resolver = build_resolver(&config, &browser).await?;

    let holder = {
        let resolver = Arc::clone(&resolver);
        tokio::spawn(async move { resolver.resolve("tesco", "milk").await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(resolver.pool().stats().busy, 1);

    let err = resolver.resolve("asda", "bread").await.unwrap_err();
    assert_eq!(err, ResolveError::Busy(PoolError::Exhausted { timeout_ms: 100 }));

    holder.abort();
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_navigation_crash_is_reported_unavailable() -> anyhow::Result<()> {
    let browser = StubBrowser::with_price("£1.55");
    browser.crash_next(1);
    let resolver = build_resolver(&test_config(), &browser).await?;

    let err = resolver.resolve("tesco", "milk").await.unwrap_err();

    assert!(matches!(err, ResolveError::Unavailable(ExtractionError::Context(_))));
    assert_eq!(browser.closed(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_retry_recovers_from_transient_failure() -> anyhow::Result<()> {
    let browser = StubBrowser::with_price("£1.55");
    browser.crash_next(1);
    let mut config = test_config();
    config.resolver.retry_attempts = 1;
    let resolver = build_resolver(&config, &browser).await?;

    let result = resolver.resolve("tesco", "milk").await?;

    assert_eq!(result.price, 1.55);
    assert_eq!(browser.navigations(), 2);
    assert_eq!(browser.created(), config.pool.size + 1);
    Ok(())
}

#[tokio::test]
async fn test_shutdown_fails_new_lookups_but_keeps_cache() -> anyhow::Result<()> {
    let browser = StubBrowser::with_price("£1.55");
    let config = test_config();
    let resolver = build_resolver(&config, &browser).await?;

    resolver.resolve("tesco", "milk").await?;
    resolver.shutdown().await;

    assert_eq!(resolver.resolve("asda", "milk").await, Err(ResolveError::ShuttingDown));
    assert_eq!(resolver.resolve("tesco", "milk").await?.price, 1.55);
    assert_eq!(browser.closed(), config.pool.size);
    Ok(())
}

use super::*;
use basket_price::{
    config::{AdapterOverride, RenderBackend},
    render::HttpContextFactory,
    utils::error::ExtractionError,
    ResolveError,
};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RESULTS_PAGE: &str = r#"
<html><body>
  <ul class="results">
    <li><div class="ddsweb-price__container"><p>£1.55</p><p>£0.86/litre</p></div></li>
    <li><div class="ddsweb-price__container"><p>£1.75</p></div></li>
  </ul>
</body></html>"#;

fn config_for(server: &MockServer) -> AppConfig {
    let mut config = test_config();
    config.pool.backend = RenderBackend::Http;
    config.retailers.insert(
        "tesco".to_string(),
        AdapterOverride {
            url_template: Some(format!("{}/search?query={{item}}", server.uri())),
            selectors: None,
        },
    );
    config
}

async fn http_resolver(config: &AppConfig) -> anyhow::Result<Arc<PriceResolver>> {
    let factory = HttpContextFactory::new(&config.pool, &config.extraction)?;
    build_resolver_with(config, Arc::new(factory)).await
}

#[tokio::test]
async fn test_http_backend_reads_first_matching_price() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("query", "semi skimmed milk"))
        .respond_with(ResponseTemplate::new(200).set_body_string(RESULTS_PAGE))
        .expect(1)
        .mount(&server)
        .await;

    let config = config_for(&server);
    let resolver = http_resolver(&config).await?;

    let first = resolver.resolve("tesco", "Semi Skimmed Milk").await?;
    let cached = resolver.resolve("tesco", "semi skimmed milk").await?;

    assert_eq!(first.price, 1.55);
    assert_eq!(cached, first);
    Ok(())
}

#[tokio::test]
async fn test_http_backend_uses_selector_override() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(r#"<span class="offer">Clubcard 95p</span>"#),
        )
        .mount(&server)
        .await;

    let mut config = config_for(&server);
    if let Some(tesco) = config.retailers.get_mut("tesco") {
        tesco.selectors = Some(vec![".missing".to_string(), ".offer".to_string()]);
    }
    let resolver = http_resolver(&config).await?;

    let result = resolver.resolve("tesco", "bananas").await?;
    assert!((result.price - 0.95).abs() < f64::EPSILON);
    Ok(())
}

#[tokio::test]
async fn test_http_backend_error_status_is_unavailable() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let config = config_for(&server);
    let resolver = http_resolver(&config).await?;

    let err = resolver.resolve("tesco", "milk").await.unwrap_err();

    assert!(matches!(err, ResolveError::Unavailable(ExtractionError::Context(_))));
    assert!(resolver.cache().is_empty().await);
    Ok(())
}

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{first_match_text, ContextFactory, RenderContext};
use crate::config::{ExtractionConfig, PoolConfig};
use crate::utils::error::RenderError;

/// Fetches the search page with a plain GET and matches selectors against the
/// served HTML. Scripts never run and sub-resources are never requested, so
/// nothing on the block list can be fetched. Prices injected client-side are
/// invisible to this backend.
pub struct HttpContextFactory {
    client: Client,
}

impl HttpContextFactory {
    pub fn new(pool: &PoolConfig, extraction: &ExtractionConfig) -> Result<Self, RenderError> {
        let client = Client::builder()
            .user_agent(pool.user_agent.clone())
            .timeout(extraction.navigation_timeout())
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ContextFactory for HttpContextFactory {
    fn name(&self) -> &str {
        "http"
    }

    async fn create(&self) -> Result<Box<dyn RenderContext>, RenderError> {
        Ok(Box::new(HttpContext {
            client: self.client.clone(),
            document: None,
        }))
    }
}

pub struct HttpContext {
    client: Client,
    document: Option<String>,
}

#[async_trait]
impl RenderContext for HttpContext {
    async fn navigate(&mut self, url: &Url) -> Result<(), RenderError> {
        self.document = None;

        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RenderError::Http(format!("{} returned {}", url, status)));
        }

        let body = response.text().await?;
        debug!("Fetched {} ({} bytes)", url, body.len());
        self.document = Some(body);
        Ok(())
    }

    async fn query_text(&mut self, selector: &str) -> Result<Option<String>, RenderError> {
        match &self.document {
            Some(html) => first_match_text(html, selector),
            None => Ok(None),
        }
    }

    async fn close(self: Box<Self>) {}
}

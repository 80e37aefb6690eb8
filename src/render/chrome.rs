use async_trait::async_trait;
use headless_chrome::browser::tab::{RequestInterceptor, RequestPausedDecision};
use headless_chrome::browser::transport::{SessionId, Transport};
use headless_chrome::protocol::cdp::Fetch::events::RequestPausedEvent;
use headless_chrome::protocol::cdp::Fetch::{FailRequest, RequestPattern, RequestStage};
use headless_chrome::protocol::cdp::Network::{ErrorReason, ResourceType};
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};
use url::Url;

use super::{first_match_text, ContextFactory, FetchDecision, RenderContext, ResourceBlockList, ResourceKind};
use crate::config::{ExtractionConfig, PoolConfig};
use crate::utils::error::RenderError;

// headless_chrome tears the browser down after this much inactivity; pooled
// browsers sit idle between requests for arbitrarily long.
const IDLE_BROWSER_TIMEOUT: Duration = Duration::from_secs(60 * 60 * 24 * 365);

impl From<&ResourceType> for ResourceKind {
    fn from(resource_type: &ResourceType) -> Self {
        match resource_type {
            ResourceType::Document => ResourceKind::Document,
            ResourceType::Stylesheet => ResourceKind::Stylesheet,
            ResourceType::Script => ResourceKind::Script,
            ResourceType::Image => ResourceKind::Image,
            ResourceType::Font => ResourceKind::Font,
            ResourceType::Media => ResourceKind::Media,
            ResourceType::Xhr => ResourceKind::Xhr,
            ResourceType::Fetch => ResourceKind::Fetch,
            _ => ResourceKind::Other,
        }
    }
}

/// Aborts blocked resource types at the CDP `Fetch` layer, before the
/// request leaves the browser.
struct BlockListInterceptor {
    block_list: Arc<ResourceBlockList>,
}

impl BlockListInterceptor {
    fn decision_for(&self, kind: ResourceKind, request_id: &str) -> RequestPausedDecision {
        match self.block_list.decide(kind) {
            FetchDecision::Continue => RequestPausedDecision::Continue(None),
            FetchDecision::Abort => RequestPausedDecision::Fail(FailRequest {
                request_id: request_id.to_string(),
                error_reason: ErrorReason::BlockedByClient,
            }),
        }
    }
}

impl RequestInterceptor for BlockListInterceptor {
    fn intercept(
        &self,
        _transport: Arc<Transport>,
        _session_id: SessionId,
        event: RequestPausedEvent,
    ) -> RequestPausedDecision {
        let kind = ResourceKind::from(&event.params.resource_Type);
        if !self.block_list.allows(kind) {
            trace!("Blocked {} request to {}", kind.as_str(), event.params.request.url);
        }
        self.decision_for(kind, &event.params.request_id)
    }
}

/// Launches one headless Chrome process per pool slot.
#[derive(Clone)]
pub struct ChromeContextFactory {
    chrome_path: Option<String>,
    user_agent: String,
    navigation_timeout: Duration,
    block_list: Arc<ResourceBlockList>,
}

impl ChromeContextFactory {
    pub fn new(pool: &PoolConfig, extraction: &ExtractionConfig) -> Self {
        Self {
            chrome_path: pool.chrome_path.clone(),
            user_agent: pool.user_agent.clone(),
            navigation_timeout: extraction.navigation_timeout(),
            block_list: Arc::new(ResourceBlockList::new(pool.blocked_resources.iter().copied())),
        }
    }

    fn launch(&self) -> Result<ChromeContext, RenderError> {
        let mut launch_options = LaunchOptions::default_builder()
            .headless(true)
            .sandbox(false) // Often needed in containerized environments
            .idle_browser_timeout(IDLE_BROWSER_TIMEOUT)
            .args(vec![
                std::ffi::OsStr::new("--no-sandbox"),
                std::ffi::OsStr::new("--disable-dev-shm-usage"),
                std::ffi::OsStr::new("--disable-gpu"),
                std::ffi::OsStr::new("--disable-extensions"),
                std::ffi::OsStr::new("--disable-background-timer-throttling"),
                std::ffi::OsStr::new("--disable-backgrounding-occluded-windows"),
                std::ffi::OsStr::new("--disable-renderer-backgrounding"),
            ])
            .build()
            .map_err(|e| RenderError::Browser(format!("Failed to create launch options: {}", e)))?;

        if let Some(chrome_path) = &self.chrome_path {
            launch_options.path = Some(std::path::PathBuf::from(chrome_path));
        }

        let browser = Browser::new(launch_options)
            .map_err(|e| RenderError::Browser(format!("Failed to launch browser: {}", e)))?;

        let tab = browser
            .new_tab()
            .map_err(|e| RenderError::Browser(format!("Failed to create tab: {}", e)))?;

        tab.set_user_agent(&self.user_agent, None, None)
            .map_err(|e| RenderError::Browser(format!("Failed to set user agent: {}", e)))?;
        tab.set_default_timeout(self.navigation_timeout);

        let patterns = [RequestPattern {
            url_pattern: Some("*".to_string()),
            resource_Type: None,
            request_stage: Some(RequestStage::Request),
        }];
        tab.enable_fetch(Some(&patterns), None)
            .map_err(|e| RenderError::Browser(format!("Failed to enable request interception: {}", e)))?;
        tab.enable_request_interception(Arc::new(BlockListInterceptor {
            block_list: self.block_list.clone(),
        }))
        .map_err(|e| RenderError::Browser(format!("Failed to install request filter: {}", e)))?;

        Ok(ChromeContext { browser: Some(browser), tab })
    }
}

#[async_trait]
impl ContextFactory for ChromeContextFactory {
    fn name(&self) -> &str {
        "chrome"
    }

    async fn create(&self) -> Result<Box<dyn RenderContext>, RenderError> {
        // Launching is blocking CDP traffic; keep it off the async workers.
        let factory = self.clone();
        let context = tokio::task::spawn_blocking(move || factory.launch())
            .await
            .map_err(|e| RenderError::Browser(format!("Browser launch task failed: {}", e)))??;

        debug!("Launched headless Chrome render context");
        Ok(Box::new(context))
    }
}

/// A dedicated browser process with a single filtered tab.
pub struct ChromeContext {
    browser: Option<Browser>,
    tab: Arc<Tab>,
}

fn browser_error(err: anyhow::Error) -> RenderError {
    if err.downcast_ref::<headless_chrome::util::Timeout>().is_some() {
        RenderError::Timeout
    } else {
        RenderError::Browser(err.to_string())
    }
}

async fn run_blocking<T, F>(op: F) -> Result<T, RenderError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, RenderError> + Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| RenderError::Browser(format!("Browser task failed: {}", e)))?
}

#[async_trait]
impl RenderContext for ChromeContext {
    async fn navigate(&mut self, url: &Url) -> Result<(), RenderError> {
        let tab = self.tab.clone();
        let url = url.to_string();
        run_blocking(move || {
            tab.navigate_to(&url).map_err(browser_error)?;
            tab.wait_until_navigated().map_err(browser_error)?;
            Ok(())
        })
        .await
    }

    async fn query_text(&mut self, selector: &str) -> Result<Option<String>, RenderError> {
        let tab = self.tab.clone();
        let html = run_blocking(move || tab.get_content().map_err(browser_error)).await?;
        first_match_text(&html, selector)
    }

    async fn close(mut self: Box<Self>) {
        let tab = self.tab.clone();
        let browser = self.browser.take();
        let _ = run_blocking(move || {
            let _ = tab.close(true);
            // Dropping the browser kills the Chrome process.
            drop(browser);
            Ok(())
        })
        .await;
    }
}

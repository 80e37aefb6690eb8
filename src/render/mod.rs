use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use url::Url;

use crate::utils::error::RenderError;

pub mod chrome;
pub mod http;
pub mod pool;

pub use chrome::ChromeContextFactory;
pub use http::HttpContextFactory;
pub use pool::{PoolStats, PooledContext, RenderPool, SlotHealth};

/// An isolated browsing session. A context is only ever driven by the one
/// request that has it checked out of the pool.
#[async_trait]
pub trait RenderContext: Send {
    /// Load `url` and return once the document has loaded.
    async fn navigate(&mut self, url: &Url) -> Result<(), RenderError>;

    /// Text content of the first node matching `selector` in the current
    /// document, or `None` when nothing matches yet.
    async fn query_text(&mut self, selector: &str) -> Result<Option<String>, RenderError>;

    /// Tear down the session and whatever process backs it.
    async fn close(self: Box<Self>);
}

/// Builds fresh render contexts for the pool.
#[async_trait]
pub trait ContextFactory: Send + Sync {
    fn name(&self) -> &str;

    async fn create(&self) -> Result<Box<dyn RenderContext>, RenderError>;
}

/// Network resource categories a page may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Document,
    Stylesheet,
    Script,
    Image,
    Font,
    Media,
    Xhr,
    Fetch,
    Other,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Document => "document",
            ResourceKind::Stylesheet => "stylesheet",
            ResourceKind::Script => "script",
            ResourceKind::Image => "image",
            ResourceKind::Font => "font",
            ResourceKind::Media => "media",
            ResourceKind::Xhr => "xhr",
            ResourceKind::Fetch => "fetch",
            ResourceKind::Other => "other",
        }
    }
}

/// Outcome of filtering one outgoing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchDecision {
    Continue,
    Abort,
}

/// Resource kinds that are aborted before they reach the network. Evaluated
/// synchronously for every fetch a context makes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceBlockList {
    blocked: HashSet<ResourceKind>,
}

impl ResourceBlockList {
    pub fn new(kinds: impl IntoIterator<Item = ResourceKind>) -> Self {
        let blocked = kinds
            .into_iter()
            .filter(|kind| *kind != ResourceKind::Document)
            .collect();
        Self { blocked }
    }

    pub fn none() -> Self {
        Self { blocked: HashSet::new() }
    }

    pub fn decide(&self, kind: ResourceKind) -> FetchDecision {
        if self.blocked.contains(&kind) {
            FetchDecision::Abort
        } else {
            FetchDecision::Continue
        }
    }

    pub fn allows(&self, kind: ResourceKind) -> bool {
        self.decide(kind) == FetchDecision::Continue
    }
}

impl Default for ResourceBlockList {
    fn default() -> Self {
        Self::new([ResourceKind::Image, ResourceKind::Font, ResourceKind::Media])
    }
}

/// First element matching `selector` in an HTML snapshot, as trimmed text.
pub(crate) fn first_match_text(html: &str, selector: &str) -> Result<Option<String>, RenderError> {
    let css_selector = Selector::parse(selector).map_err(|_| RenderError::InvalidSelector {
        selector: selector.to_string(),
    })?;

    let document = Html::parse_document(html);
    Ok(document
        .select(&css_selector)
        .next()
        .map(|element| element.text().collect::<Vec<_>>().join(" ").trim().to_string()))
}

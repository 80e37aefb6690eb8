use thiserror::Error;

/// Failures raised by a render context backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    #[error("Browser error: {0}")]
    Browser(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Render operation timed out")]
    Timeout,

    #[error("Invalid selector: {selector}")]
    InvalidSelector { selector: String },

    #[error("Render context is closed")]
    Closed,
}

impl From<reqwest::Error> for RenderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RenderError::Timeout
        } else {
            RenderError::Http(err.to_string())
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionError {
    #[error("Navigation to {url} timed out after {timeout_ms}ms")]
    NavigationTimeout { url: String, timeout_ms: u64 },

    #[error("No element matched {selectors:?} within {timeout_ms}ms")]
    SelectorTimeout { selectors: Vec<String>, timeout_ms: u64 },

    #[error("Parsing error: no price in {text:?}")]
    Parse { text: String },

    #[error("Render context failed: {0}")]
    Context(#[from] RenderError),
}

impl ExtractionError {
    /// Stable label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractionError::NavigationTimeout { .. } => "navigation_timeout",
            ExtractionError::SelectorTimeout { .. } => "selector_timeout",
            ExtractionError::Parse { .. } => "parse_error",
            ExtractionError::Context(_) => "context_failure",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PoolError {
    #[error("No render context became free within {timeout_ms}ms")]
    Exhausted { timeout_ms: u64 },

    #[error("Render pool is shutting down")]
    ShuttingDown,

    #[error("Failed to launch render context: {0}")]
    Launch(RenderError),
}

/// Everything a single price resolution can fail with.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    #[error("Validation error: {0}")]
    InvalidInput(String),

    #[error("Unsupported retailer: {retailer}")]
    UnsupportedRetailer { retailer: String },

    #[error("All render contexts are busy: {0}")]
    Busy(PoolError),

    #[error("Price unavailable: {0}")]
    Unavailable(ExtractionError),

    #[error("Service is shutting down")]
    ShuttingDown,
}

impl ResolveError {
    pub fn kind(&self) -> &'static str {
        match self {
            ResolveError::InvalidInput(_) => "invalid_input",
            ResolveError::UnsupportedRetailer { .. } => "unsupported_retailer",
            ResolveError::Busy(_) => "busy",
            ResolveError::Unavailable(_) => "unavailable",
            ResolveError::ShuttingDown => "shutting_down",
        }
    }

    /// Only extraction failures are worth another attempt inside the resolver.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ResolveError::Unavailable(_))
    }
}

impl From<PoolError> for ResolveError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::ShuttingDown => ResolveError::ShuttingDown,
            // A slot that cannot be rebuilt leaves the pool short, same as being busy.
            other => ResolveError::Busy(other),
        }
    }
}

impl From<ExtractionError> for ResolveError {
    fn from(err: ExtractionError) -> Self {
        ResolveError::Unavailable(err)
    }
}

/// Process-level failures: startup, configuration and I/O.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Render pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Metrics error: {0}")]
    Metrics(String),
}

// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

pub mod cache;
pub mod config;
pub mod extraction;
pub mod render;
pub mod resolver;
pub mod retailers;
pub mod utils;
pub mod web;

// Re-export commonly used types
pub use cache::{PriceCache, PriceResult};
pub use config::AppConfig;
pub use resolver::{PriceQuery, PriceResolver, ResolverSettings};
pub use retailers::{AdapterRegistry, Retailer};
pub use utils::error::{AppError, ResolveError};

pub type Result<T> = std::result::Result<T, AppError>;

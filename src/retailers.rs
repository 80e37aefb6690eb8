use config::ConfigError;
use scraper::Selector;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use url::Url;

use crate::config::AdapterOverride;
use crate::utils::error::ResolveError;

const ITEM_PLACEHOLDER: &str = "{item}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Retailer {
    Asda,
    Sainsburys,
    Tesco,
}

impl Retailer {
    pub const ALL: [Retailer; 3] = [Retailer::Asda, Retailer::Sainsburys, Retailer::Tesco];

    pub fn id(&self) -> &'static str {
        match self {
            Retailer::Asda => "asda",
            Retailer::Sainsburys => "sainsburys",
            Retailer::Tesco => "tesco",
        }
    }
}

impl fmt::Display for Retailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Retailer {
    type Err = ResolveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s.trim().to_lowercase();
        Retailer::ALL
            .into_iter()
            .find(|retailer| retailer.id() == id)
            .ok_or_else(|| ResolveError::UnsupportedRetailer { retailer: s.trim().to_string() })
    }
}

/// How raw price text becomes a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// First number in the text, thousands separators ignored.
    FirstNumber,
    /// Like `FirstNumber`, but "85p" reads as 0.85.
    PenceAware,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionRule {
    /// Tried in order; the first one that matches wins.
    pub selectors: Vec<String>,
    pub normalization: Normalization,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetailerAdapter {
    pub retailer: Retailer,
    url_template: String,
    pub rule: ExtractionRule,
}

impl RetailerAdapter {
    fn new(retailer: Retailer, url_template: &str, selectors: &[&str], normalization: Normalization) -> Self {
        Self {
            retailer,
            url_template: url_template.to_string(),
            rule: ExtractionRule {
                selectors: selectors.iter().map(|s| s.to_string()).collect(),
                normalization,
            },
        }
    }

    fn builtin(retailer: Retailer) -> Self {
        match retailer {
            Retailer::Asda => Self::new(
                retailer,
                "https://groceries.asda.com/search/{item}",
                &[".co-item .co-product__price", ".co-product__price", ".product-price"],
                Normalization::PenceAware,
            ),
            Retailer::Sainsburys => Self::new(
                retailer,
                "https://www.sainsburys.co.uk/gol-ui/SearchResults/{item}",
                &[
                    r#"[data-testid="pt-retail-price"]"#,
                    ".pt__cost__retail-price",
                    ".product-price",
                ],
                Normalization::PenceAware,
            ),
            Retailer::Tesco => Self::new(
                retailer,
                "https://www.tesco.com/groceries/en-GB/search?query={item}",
                &[".ddsweb-price__container p", ".price"],
                Normalization::PenceAware,
            ),
        }
    }

    pub fn url_template(&self) -> &str {
        &self.url_template
    }

    /// Search page URL for an already normalized item.
    pub fn query_url(&self, item: &str) -> Result<Url, url::ParseError> {
        let encoded = urlencoding::encode(item);
        Url::parse(&self.url_template.replace(ITEM_PLACEHOLDER, &encoded))
    }

    fn apply(&mut self, overrides: &AdapterOverride) {
        if let Some(template) = &overrides.url_template {
            self.url_template = template.clone();
        }
        if let Some(selectors) = &overrides.selectors {
            self.rule.selectors = selectors.clone();
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let retailer = self.retailer;

        if !self.url_template.contains(ITEM_PLACEHOLDER) {
            return Err(ConfigError::Message(format!(
                "URL template for {} must contain {}",
                retailer, ITEM_PLACEHOLDER
            )));
        }

        if self.query_url("probe").is_err() {
            return Err(ConfigError::Message(format!(
                "URL template for {} is not a valid absolute URL",
                retailer
            )));
        }

        if self.rule.selectors.is_empty() {
            return Err(ConfigError::Message(format!("Selector chain for {} is empty", retailer)));
        }

        for selector in &self.rule.selectors {
            if Selector::parse(selector).is_err() {
                return Err(ConfigError::Message(format!(
                    "Invalid CSS selector '{}' for {}",
                    selector, retailer
                )));
            }
        }

        Ok(())
    }
}

/// Fixed, startup-built table of retailer adapters. Retailer markup knowledge
/// lives here and in configuration; nothing registers adapters at runtime.
#[derive(Debug, Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<Retailer, RetailerAdapter>,
}

impl AdapterRegistry {
    pub fn builtin() -> Self {
        let adapters = Retailer::ALL
            .into_iter()
            .map(|retailer| (retailer, RetailerAdapter::builtin(retailer)))
            .collect();
        Self { adapters }
    }

    pub fn from_config(overrides: &HashMap<String, AdapterOverride>) -> Result<Self, ConfigError> {
        let mut registry = Self::builtin();

        for (id, adapter_override) in overrides {
            let retailer: Retailer = id
                .parse()
                .map_err(|_| ConfigError::Message(format!("Unknown retailer in configuration: {}", id)))?;
            if let Some(adapter) = registry.adapters.get_mut(&retailer) {
                adapter.apply(adapter_override);
            }
        }

        for adapter in registry.adapters.values() {
            adapter.validate()?;
        }

        Ok(registry)
    }

    pub fn resolve(&self, retailer_id: &str) -> Result<&RetailerAdapter, ResolveError> {
        let retailer: Retailer = retailer_id.parse()?;
        self.adapters
            .get(&retailer)
            .ok_or_else(|| ResolveError::UnsupportedRetailer { retailer: retailer_id.to_string() })
    }

    pub fn retailers(&self) -> Vec<Retailer> {
        let mut retailers: Vec<_> = self.adapters.keys().copied().collect();
        retailers.sort_by_key(|retailer| retailer.id());
        retailers
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

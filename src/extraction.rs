use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

use crate::config::ExtractionConfig;
use crate::render::RenderContext;
use crate::retailers::{Normalization, RetailerAdapter};
use crate::utils::error::{ExtractionError, RenderError};

// First run of digits and decimal points that reads as a number, plus an
// optional trailing pence marker.
static PRICE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?|\.\d+)(p\b)?").unwrap());

/// Outcome of one successful extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub price: f64,
    pub matched_selector: String,
    pub raw_text: String,
}

/// Turn raw price text such as `"£1.55 was £1.75"` into a number.
///
/// Thousands separators are dropped and the first numeric run wins. Under
/// [`Normalization::PenceAware`], a bare `"85p"` reads as `0.85`.
pub fn normalize_price(text: &str, normalization: Normalization) -> Result<f64, ExtractionError> {
    let parse_error = || ExtractionError::Parse { text: text.to_string() };

    let cleaned = text.replace(',', "");
    let captures = PRICE_NUMBER.captures(&cleaned).ok_or_else(parse_error)?;
    let number = captures.get(1).ok_or_else(parse_error)?;
    let value: f64 = number.as_str().parse().map_err(|_| parse_error())?;

    let in_pence = normalization == Normalization::PenceAware
        && captures.get(2).is_some()
        && !cleaned[..number.start()].contains('£');
    let price = if in_pence { value / 100.0 } else { value };

    if !price.is_finite() || price < 0.0 {
        return Err(parse_error());
    }
    Ok(price)
}

/// Run one extraction on a checked-out context. Never retries.
pub async fn extract(
    adapter: &RetailerAdapter,
    item: &str,
    context: &mut dyn RenderContext,
    config: &ExtractionConfig,
) -> Result<Extracted, ExtractionError> {
    let url = adapter
        .query_url(item)
        .map_err(|e| RenderError::InvalidUrl(e.to_string()))?;

    let navigation_timeout = config.navigation_timeout();
    match timeout(navigation_timeout, context.navigate(&url)).await {
        Ok(Ok(())) => {}
        Ok(Err(RenderError::Timeout)) | Err(_) => {
            return Err(ExtractionError::NavigationTimeout {
                url: url.to_string(),
                timeout_ms: navigation_timeout.as_millis() as u64,
            });
        }
        Ok(Err(e)) => return Err(e.into()),
    }

    let selectors = &adapter.rule.selectors;
    let selector_timeout = config.selector_timeout();
    let (matched_selector, raw_text) =
        match timeout(selector_timeout, wait_for_price_text(context, selectors, config.poll_interval())).await {
            Ok(found) => found?,
            Err(_) => {
                return Err(ExtractionError::SelectorTimeout {
                    selectors: selectors.clone(),
                    timeout_ms: selector_timeout.as_millis() as u64,
                });
            }
        };

    let price = normalize_price(&raw_text, adapter.rule.normalization)?;
    debug!(
        "Extracted {} from {} via '{}' ({:?})",
        price, adapter.retailer, matched_selector, raw_text
    );

    Ok(Extracted {
        price,
        matched_selector,
        raw_text,
    })
}

/// Poll the selector chain in order until one yields non-empty text.
async fn wait_for_price_text(
    context: &mut dyn RenderContext,
    selectors: &[String],
    poll_interval: Duration,
) -> Result<(String, String), RenderError> {
    loop {
        for selector in selectors {
            if let Some(text) = context.query_text(selector).await? {
                if !text.trim().is_empty() {
                    return Ok((selector.clone(), text.trim().to_string()));
                }
            }
        }
        tokio::time::sleep(poll_interval).await;
    }
}

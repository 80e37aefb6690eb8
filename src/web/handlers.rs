use axum::{
    extract::{Query, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{ApiError, AppState, HealthResponse, PriceResponse};
use crate::retailers::Retailer;

#[derive(Debug, Default, Deserialize)]
pub struct PriceParams {
    #[serde(alias = "retailer")]
    pub store: Option<String>,
    pub item: Option<String>,
}

pub async fn get_price(
    State(state): State<AppState>,
    Query(params): Query<PriceParams>,
) -> Result<Json<PriceResponse>, ApiError> {
    let (Some(store), Some(item)) = (params.store.as_deref(), params.item.as_deref()) else {
        return Err(ApiError::bad_request("Store and item are required."));
    };

    let deadline = Duration::from_secs(state.config.server.request_timeout);
    // Dropping the resolution on timeout releases its render context.
    let result = tokio::time::timeout(deadline, state.resolver.resolve(store, item))
        .await
        .map_err(|_| {
            tracing::warn!("Price lookup for {} '{}' exceeded {:?}", store, item, deadline);
            ApiError::timeout("Price lookup timed out")
        })?;

    match result {
        Ok(price) => Ok(Json(PriceResponse { price: price.price })),
        Err(e) => {
            tracing::debug!("Price lookup for {} '{}' failed: {}", store, item, e);
            Err(e.into())
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RetailersResponse {
    pub retailers: Vec<Retailer>,
}

pub async fn list_retailers(State(state): State<AppState>) -> Json<RetailersResponse> {
    Json(RetailersResponse {
        retailers: state.resolver.registry().retailers(),
    })
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let pool = state.resolver.pool();
    Json(HealthResponse::from_pool(pool.stats(), pool.is_shutting_down()))
}

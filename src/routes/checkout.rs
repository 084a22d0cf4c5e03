use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    Json,
};
use serde_json::{json, Value};

use super::{error, internal, ApiError};
use crate::{
    middleware::rate_limit::{client_ip, CHECKOUT_LIMIT},
    models::checkout::CheckoutRequest,
    services::checkout::{CheckoutError, CheckoutService},
    state::AppState,
};

const REFERRAL_COOKIE: &str = "ref";

/// POST /api/checkout — public, rate limited per client address
pub async fn create_checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CheckoutRequest>,
) -> Result<Json<Value>, ApiError> {
    let mut redis = state.redis.clone();
    CHECKOUT_LIMIT.check(&mut redis, &client_ip(&headers)).await?;

    let referral = cookie_value(&headers, REFERRAL_COOKIE);
    let response = CheckoutService::create(&state.db, &state.stripe, &state.config, body, referral)
        .await
        .map_err(|e| match &e {
            CheckoutError::Invalid(_) | CheckoutError::UnknownTier => {
                error(StatusCode::BAD_REQUEST, &e.to_string())
            }
            CheckoutError::SoldOut => error(StatusCode::CONFLICT, &e.to_string()),
            CheckoutError::Payment(inner) => {
                tracing::error!("Stripe checkout failed: {inner:#}");
                error(StatusCode::BAD_GATEWAY, "Payment provider unavailable, please try again")
            }
            CheckoutError::Other(inner) => internal(inner),
        })?;

    Ok(Json(json!({ "url": response.url, "session_id": response.session_id })))
}

/// Value of a cookie from the `Cookie` request header.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn reads_referral_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; ref=SAUNA7; x=1"));
        assert_eq!(cookie_value(&headers, "ref").as_deref(), Some("SAUNA7"));
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn empty_cookie_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("ref="));
        assert_eq!(cookie_value(&headers, "ref"), None);
    }
}

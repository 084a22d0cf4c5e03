use axum::{
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::json;

/// Fixed-window limit stored in Redis as `ratelimit:{scope}:{subject}`.
#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    pub scope: &'static str,
    pub max_attempts: u64,
    pub window_secs: u64,
}

/// Checkout sessions per client address.
pub const CHECKOUT_LIMIT: RateLimit = RateLimit {
    scope: "checkout",
    max_attempts: 10,
    window_secs: 600,
};

impl RateLimit {
    pub fn key(&self, subject: &str) -> String {
        format!("ratelimit:{}:{}", self.scope, subject)
    }

    /// INCR the subject's counter, open the window on the first hit, and
    /// answer 429 past `max_attempts`. Redis errors let the request through.
    pub async fn check(
        &self,
        redis: &mut redis::aio::MultiplexedConnection,
        subject: &str,
    ) -> Result<(), (StatusCode, Json<serde_json::Value>)> {
        let key = self.key(subject);
        let count: u64 = match redis::cmd("INCR").arg(&key).query_async(redis).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(scope = self.scope, "Rate limiter unavailable: {e}");
                return Ok(());
            }
        };

        if count == 1 {
            let _: Result<(), _> = redis::cmd("EXPIRE")
                .arg(&key)
                .arg(self.window_secs)
                .query_async(redis)
                .await;
        }

        if self.exceeded(count) {
            tracing::info!(scope = self.scope, subject, "Rate limit hit");
            return Err((
                StatusCode::TOO_MANY_REQUESTS,
                Json(json!({ "error": "Too many attempts. Please try again in a few minutes." })),
            ));
        }
        Ok(())
    }

    pub fn exceeded(&self, count: u64) -> bool {
        count > self.max_attempts
    }
}

/// Client address as reported by the reverse proxy.
pub fn client_ip(headers: &HeaderMap) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    header("X-Real-IP")
        .or_else(|| header("X-Forwarded-For"))
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn prefers_real_ip_then_first_forwarded() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers), "unknown");
        headers.insert("X-Forwarded-For", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        assert_eq!(client_ip(&headers), "203.0.113.7");
        headers.insert("X-Real-IP", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(client_ip(&headers), "198.51.100.2");
    }

    #[test]
    fn checkout_window_allows_ten() {
        assert_eq!(CHECKOUT_LIMIT.key("203.0.113.7"), "ratelimit:checkout:203.0.113.7");
        assert!(!CHECKOUT_LIMIT.exceeded(10));
        assert!(CHECKOUT_LIMIT.exceeded(11));
    }
}

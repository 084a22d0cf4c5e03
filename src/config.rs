use std::env;
use std::str::FromStr;

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub host: String,
    pub port: u16,
    /// Public site origin, used for Stripe redirect URLs and media links.
    pub site_url: String,
    pub media_dir: String,
    /// HS256 secret of the auth provider that signs staff access tokens.
    pub auth_jwt_secret: String,
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub stripe_api_base: String,
    pub currency: String,
    pub reservation_ttl_minutes: i64,
    pub metrics_token: Option<String>,
    // Email (optional). RESEND_API_KEY configures the Resend SMTP relay.
    pub resend_api_key: Option<String>,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub email_from: Option<String>,
    // Meta Graph API (optional)
    pub meta_api_base: String,
    pub meta_page_id: Option<String>,
    pub meta_access_token: Option<String>,
    pub instagram_account_id: Option<String>,
    pub telegram_api_base: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into()),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()?,
            site_url: env::var("SITE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".into())
                .trim_end_matches('/')
                .to_string(),
            media_dir: env::var("MEDIA_DIR").unwrap_or_else(|_| "/data/media".into()),
            auth_jwt_secret: required("SUPABASE_JWT_SECRET")?,
            stripe_secret_key: required("STRIPE_SECRET_KEY")?,
            stripe_webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
            stripe_api_base: env::var("STRIPE_API_BASE")
                .unwrap_or_else(|_| "https://api.stripe.com".into()),
            currency: env::var("CURRENCY")
                .unwrap_or_else(|_| "eur".into())
                .to_lowercase(),
            reservation_ttl_minutes: env::var("RESERVATION_TTL_MINUTES")
                .unwrap_or_else(|_| "15".into())
                .parse()?,
            metrics_token: optional("METRICS_TOKEN"),
            resend_api_key: optional("RESEND_API_KEY"),
            smtp_host: optional("SMTP_HOST"),
            smtp_port: parse_optional("SMTP_PORT", optional("SMTP_PORT"))?,
            smtp_username: optional("SMTP_USERNAME"),
            smtp_password: optional("SMTP_PASSWORD"),
            email_from: optional("EMAIL_FROM"),
            meta_api_base: env::var("META_API_BASE")
                .unwrap_or_else(|_| "https://graph.facebook.com/v19.0".into()),
            meta_page_id: optional("META_PAGE_ID"),
            meta_access_token: optional("META_ACCESS_TOKEN"),
            instagram_account_id: optional("INSTAGRAM_ACCOUNT_ID"),
            telegram_api_base: env::var("TELEGRAM_API_BASE")
                .unwrap_or_else(|_| "https://api.telegram.org".into()),
        })
    }

    /// Public URL for a file stored under `media_dir`.
    pub fn media_url(&self, relative: &str) -> String {
        format!("{}/media/{}", self.site_url, relative.trim_start_matches('/'))
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    env::var(key).map_err(|_| anyhow::anyhow!("Missing required env var: {}", key))
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// An unset or empty variable is `None`; a value that does not parse is an error.
fn parse_optional<T>(key: &str, value: Option<String>) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .map(|v| v.trim().parse().with_context(|| format!("Invalid {key}: {v:?}")))
        .transpose()
}

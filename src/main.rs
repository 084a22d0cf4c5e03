use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use redis::Client as RedisClient;
use tower::ServiceBuilder;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use saunafest_api::{
    config::Config,
    db, routes,
    services::{email::EmailService, notifications::NotificationService, stripe::StripeClient},
    AppState,
};

/// Multipart uploads for the social image generator.
const BODY_LIMIT_BYTES: usize = 20 * 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env()?);

    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;
    info!("Database connected and migrations applied");

    let redis_client = RedisClient::open(config.redis_url.as_str())?;
    let redis_conn = redis_client.get_multiplexed_async_connection().await?;
    info!("Redis connected");

    let stripe = StripeClient::new(
        &config.stripe_secret_key,
        &config.stripe_webhook_secret,
        &config.stripe_api_base,
    );
    let notifications = Arc::new(NotificationService::new(&config.telegram_api_base));

    let email = EmailService::new(&config).map(Arc::new);
    if email.is_some() {
        info!("Email service configured");
    } else {
        info!("Email not configured, confirmations and broadcasts disabled");
    }

    tokio::fs::create_dir_all(&config.media_dir).await?;

    let state = AppState {
        db: pool,
        redis: redis_conn,
        config: config.clone(),
        stripe,
        notifications,
        email,
    };

    // The public site plus localhost for development.
    let site_url = config.site_url.clone();
    let cors_origin = AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        let Ok(o) = origin.to_str() else {
            return false;
        };
        o == site_url || o.starts_with("http://localhost") || o.starts_with("http://127.0.0.1")
    });

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(AllowHeaders::list([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
        ]))
        .allow_origin(cors_origin)
        .allow_credentials(true);

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/metrics", get(routes::metrics::metrics_handler))
        // Public storefront
        .route("/api/events", get(routes::events::list_public))
        .route("/api/events/{id}", get(routes::events::get_public))
        .route("/api/events/{id}/availability", get(routes::events::availability))
        .route("/api/locations", get(routes::locations::list_locations))
        .route("/api/checkout", post(routes::checkout::create_checkout))
        .route("/api/webhook/stripe", post(routes::webhook::stripe_webhook))
        // Back office
        .route(
            "/api/admin/events",
            get(routes::events::list_admin).post(routes::events::create_event),
        )
        .route(
            "/api/admin/events/{id}",
            get(routes::events::get_admin)
                .put(routes::events::update_event)
                .delete(routes::events::delete_event),
        )
        .route("/api/admin/tickets", get(routes::tickets::search_tickets))
        .route("/api/admin/tickets/export.csv", get(routes::tickets::export_csv))
        .route("/api/admin/tickets/{id}", get(routes::tickets::get_ticket))
        .route("/api/admin/tickets/{id}/check-in", post(routes::tickets::check_in))
        .route("/api/admin/tickets/{id}/refund", post(routes::tickets::refund_ticket))
        .route("/api/admin/reconcile", post(routes::tickets::reconcile))
        .route(
            "/api/admin/settings",
            get(routes::settings::get_settings).put(routes::settings::update_settings),
        )
        .route("/api/admin/broadcast", post(routes::broadcast::send_broadcast))
        .route(
            "/api/admin/ambassadors",
            get(routes::ambassadors::list_ambassadors).post(routes::ambassadors::create_ambassador),
        )
        // Social tooling
        .route("/api/social/generate-image", post(routes::social::generate_image))
        .route("/api/social/publish", post(routes::social::publish))
        .nest_service("/media", ServeDir::new(&config.media_dir))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES)),
        )
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Saunafest API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

use std::sync::Arc;

use sqlx::PgPool;

use crate::{
    config::Config,
    services::{email::EmailService, notifications::NotificationService, stripe::StripeClient},
};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub redis: redis::aio::MultiplexedConnection,
    pub config: Arc<Config>,
    pub stripe: StripeClient,
    pub notifications: Arc<NotificationService>,
    pub email: Option<Arc<EmailService>>,
}

use std::sync::Arc;

use reqwest::Client;
use serde_json::json;
use sqlx::PgPool;

use crate::services::{email::EmailService, settings::SettingsService};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    Sale,
    Refund,
}

pub struct NotificationService {
    pub client: Client,
    telegram_api_base: String,
}

impl NotificationService {
    pub fn new(telegram_api_base: &str) -> Self {
        Self {
            client: Client::new(),
            telegram_api_base: telegram_api_base.trim_end_matches('/').to_string(),
        }
    }

    /// Alert staff on every configured channel. Never fails: each channel
    /// logs its own error and the caller's mutation stands.
    pub async fn notify_admins(
        &self,
        pool: &PgPool,
        email: Option<&Arc<EmailService>>,
        kind: AlertKind,
        subject: &str,
        body: &str,
    ) {
        let settings = match SettingsService::get(pool).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("Could not load admin settings for notification: {e}");
                return;
            }
        };

        let enabled = match kind {
            AlertKind::Sale => settings.notify_on_sale,
            AlertKind::Refund => settings.notify_on_refund,
        };
        if !enabled {
            return;
        }

        if let Some((token, chat_id)) = settings.telegram() {
            let text = format!("{subject}\n\n{body}");
            if let Err(e) = self.send_telegram(token, chat_id, &text).await {
                tracing::warn!("Telegram notification failed: {e}");
            }
        }

        if let (Some(svc), Some(to)) = (email, settings.notification_email.as_deref()) {
            if let Err(e) = svc.send_admin_alert(to, subject, body).await {
                tracing::warn!("Admin email notification failed: {e}");
            }
        }
    }

    pub async fn send_telegram(&self, token: &str, chat_id: &str, text: &str) -> anyhow::Result<()> {
        let response = self
            .client
            .post(format!("{}/bot{}/sendMessage", self.telegram_api_base, token))
            .json(&json!({
                "chat_id": chat_id,
                "text": text,
                "disable_web_page_preview": true,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Telegram error {}: {}", status, text);
        }

        Ok(())
    }
}

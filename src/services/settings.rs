use sqlx::PgPool;

use crate::models::settings::{AdminSettings, UpdateSettingsRequest};

const COLUMNS: &str = "notification_email, telegram_bot_token, telegram_chat_id,
                       notify_on_sale, notify_on_refund, updated_at";

pub struct SettingsService;

impl SettingsService {
    pub async fn get(pool: &PgPool) -> anyhow::Result<AdminSettings> {
        let settings = sqlx::query_as::<_, AdminSettings>(&format!(
            "SELECT {COLUMNS} FROM admin_settings WHERE id = 'default'"
        ))
        .fetch_optional(pool)
        .await?;
        Ok(settings.unwrap_or(AdminSettings {
            notify_on_sale: true,
            notify_on_refund: true,
            ..Default::default()
        }))
    }

    /// Partial update of the singleton row. An empty string clears a field.
    pub async fn update(pool: &PgPool, req: &UpdateSettingsRequest) -> anyhow::Result<AdminSettings> {
        let settings = sqlx::query_as::<_, AdminSettings>(&format!(
            "INSERT INTO admin_settings (id, notification_email, telegram_bot_token, telegram_chat_id,
                                         notify_on_sale, notify_on_refund)
             VALUES ('default', NULLIF($1, ''), NULLIF($2, ''), NULLIF($3, ''),
                     COALESCE($4, TRUE), COALESCE($5, TRUE))
             ON CONFLICT (id) DO UPDATE SET
                 notification_email = CASE WHEN $1 IS NULL THEN admin_settings.notification_email
                                           ELSE NULLIF($1, '') END,
                 telegram_bot_token = CASE WHEN $2 IS NULL THEN admin_settings.telegram_bot_token
                                           ELSE NULLIF($2, '') END,
                 telegram_chat_id = CASE WHEN $3 IS NULL THEN admin_settings.telegram_chat_id
                                         ELSE NULLIF($3, '') END,
                 notify_on_sale = COALESCE($4, admin_settings.notify_on_sale),
                 notify_on_refund = COALESCE($5, admin_settings.notify_on_refund),
                 updated_at = NOW()
             RETURNING {COLUMNS}"
        ))
        .bind(req.notification_email.as_deref().map(str::trim))
        .bind(req.telegram_bot_token.as_deref().map(str::trim))
        .bind(req.telegram_chat_id.as_deref().map(str::trim))
        .bind(req.notify_on_sale)
        .bind(req.notify_on_refund)
        .fetch_one(pool)
        .await?;
        Ok(settings)
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Singleton notification configuration (`admin_settings.id = 'default'`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, FromRow)]
pub struct AdminSettings {
    pub notification_email: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub notify_on_sale: bool,
    pub notify_on_refund: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl AdminSettings {
    /// Copy safe to return to the browser: the bot token is reduced to its
    /// last four characters.
    pub fn masked(&self) -> Self {
        let mut out = self.clone();
        out.telegram_bot_token = self.telegram_bot_token.as_deref().map(|t| {
            let tail: String = t.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
            format!("••••{tail}")
        });
        out
    }

    pub fn telegram(&self) -> Option<(&str, &str)> {
        match (self.telegram_bot_token.as_deref(), self.telegram_chat_id.as_deref()) {
            (Some(token), Some(chat)) if !token.is_empty() && !chat.is_empty() => Some((token, chat)),
            _ => None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateSettingsRequest {
    pub notification_email: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub notify_on_sale: Option<bool>,
    pub notify_on_refund: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masked_keeps_only_token_tail() {
        let settings = AdminSettings {
            telegram_bot_token: Some("123456:ABCDEFwxyz".into()),
            telegram_chat_id: Some("-1001".into()),
            ..Default::default()
        };
        assert_eq!(settings.masked().telegram_bot_token.as_deref(), Some("••••wxyz"));
        assert_eq!(settings.telegram(), Some(("123456:ABCDEFwxyz", "-1001")));
    }

    #[test]
    fn telegram_requires_both_token_and_chat() {
        let settings = AdminSettings {
            telegram_bot_token: Some("123:abc".into()),
            ..Default::default()
        };
        assert!(settings.telegram().is_none());
    }
}

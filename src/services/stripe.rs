use std::collections::HashMap;

use anyhow::Context;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::models::profile::GuestDetails;

type HmacSha256 = Hmac<Sha256>;

/// Signed webhook timestamps older (or newer) than this are rejected.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CustomerDetails {
    pub email: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub customer_details: Option<CustomerDetails>,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub created: i64,
}

impl CheckoutSession {
    pub fn is_paid(&self) -> bool {
        matches!(
            self.payment_status.as_deref(),
            Some("paid") | Some("no_payment_required")
        )
    }

    pub fn buyer_email(&self) -> Option<String> {
        self.metadata
            .get(meta::EMAIL)
            .cloned()
            .or_else(|| self.customer_details.as_ref().and_then(|c| c.email.clone()))
            .or_else(|| self.customer_email.clone())
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Charge {
    pub id: String,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub amount_refunded: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Refund {
    pub id: String,
    pub status: Option<String>,
    pub amount: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct List<T> {
    data: Vec<T>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Session metadata keys shared by checkout and fulfilment.
pub mod meta {
    pub const NAME: &str = "customer_name";
    pub const EMAIL: &str = "customer_email";
    pub const PHONE: &str = "customer_phone";
    pub const AGE: &str = "customer_age";
    pub const GENDER: &str = "customer_gender";
    pub const WAIVER: &str = "waiver_accepted";
    pub const PRICE_ID: &str = "price_id";
    pub const EVENT_ID: &str = "event_id";
    pub const PRODUCT_ID: &str = "product_id";
    pub const REFERRAL: &str = "referral_code";
    pub const QUANTITY: &str = "quantity";
}

/// Everything the webhook needs to fulfil a paid session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionMetadata {
    pub guest: GuestDetails,
    pub price_id: String,
    pub event_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub referral_code: Option<String>,
    pub quantity: i64,
}

impl SessionMetadata {
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            (meta::NAME, self.guest.name.trim().to_string()),
            (meta::EMAIL, self.guest.normalized_email()),
            (meta::WAIVER, self.guest.waiver_accepted.to_string()),
            (meta::PRICE_ID, self.price_id.clone()),
            (meta::QUANTITY, self.quantity.to_string()),
        ];
        if let Some(phone) = &self.guest.phone {
            pairs.push((meta::PHONE, phone.clone()));
        }
        if let Some(age) = self.guest.age {
            pairs.push((meta::AGE, age.to_string()));
        }
        if let Some(gender) = &self.guest.gender {
            pairs.push((meta::GENDER, gender.clone()));
        }
        if let Some(id) = self.event_id {
            pairs.push((meta::EVENT_ID, id.to_string()));
        }
        if let Some(id) = self.product_id {
            pairs.push((meta::PRODUCT_ID, id.to_string()));
        }
        if let Some(code) = &self.referral_code {
            pairs.push((meta::REFERRAL, code.clone()));
        }
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    /// Rebuild from a completed session. Missing guest fields fall back to
    /// the customer details Stripe collected.
    pub fn from_session(session: &CheckoutSession) -> anyhow::Result<Self> {
        let m = &session.metadata;
        let email = session
            .buyer_email()
            .ok_or_else(|| anyhow::anyhow!("Session {} has no customer email", session.id))?;
        let name = m
            .get(meta::NAME)
            .cloned()
            .or_else(|| session.customer_details.as_ref().and_then(|c| c.name.clone()))
            .unwrap_or_default();
        let price_id = m
            .get(meta::PRICE_ID)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Session {} has no price_id metadata", session.id))?;

        Ok(Self {
            guest: GuestDetails {
                name,
                email,
                phone: m
                    .get(meta::PHONE)
                    .cloned()
                    .or_else(|| session.customer_details.as_ref().and_then(|c| c.phone.clone())),
                age: m.get(meta::AGE).and_then(|v| v.parse().ok()),
                gender: m.get(meta::GENDER).cloned(),
                waiver_accepted: m.get(meta::WAIVER).map(|v| v == "true").unwrap_or(false),
            },
            price_id,
            event_id: m.get(meta::EVENT_ID).and_then(|v| v.parse().ok()),
            product_id: m.get(meta::PRODUCT_ID).and_then(|v| v.parse().ok()),
            referral_code: m.get(meta::REFERRAL).cloned().filter(|c| !c.is_empty()),
            quantity: m
                .get(meta::QUANTITY)
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewCheckoutSession {
    pub product_name: String,
    pub unit_amount: i64,
    pub currency: String,
    pub quantity: i64,
    pub customer_email: String,
    pub success_url: String,
    pub cancel_url: String,
    pub expires_at: i64,
    pub metadata: SessionMetadata,
}

impl NewCheckoutSession {
    /// Stripe's bracketed form encoding of the session parameters.
    pub fn to_form(&self) -> Vec<(String, String)> {
        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), self.success_url.clone()),
            ("cancel_url".to_string(), self.cancel_url.clone()),
            ("customer_email".to_string(), self.customer_email.clone()),
            ("expires_at".to_string(), self.expires_at.to_string()),
            ("line_items[0][quantity]".to_string(), self.quantity.to_string()),
            (
                "line_items[0][price_data][currency]".to_string(),
                self.currency.clone(),
            ),
            (
                "line_items[0][price_data][unit_amount]".to_string(),
                self.unit_amount.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]".to_string(),
                self.product_name.clone(),
            ),
        ];
        for (k, v) in self.metadata.to_pairs() {
            // Copied onto the payment intent so refunds can be traced back.
            form.push((format!("payment_intent_data[metadata][{k}]"), v.clone()));
            form.push((format!("metadata[{k}]"), v));
        }
        form
    }
}

#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: String,
    webhook_secret: String,
    api_base: String,
}

impl StripeClient {
    pub fn new(secret_key: &str, webhook_secret: &str, api_base: &str) -> Self {
        Self {
            client: Client::new(),
            secret_key: secret_key.to_string(),
            webhook_secret: webhook_secret.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    /// Check a `Stripe-Signature` header (`t=...,v1=...`).
    ///
    /// Returns `Ok(false)` for a mismatch or a stale timestamp, and an error
    /// when the header cannot be parsed at all.
    pub fn verify_webhook_signature(&self, payload: &[u8], header: &str) -> anyhow::Result<bool> {
        self.verify_webhook_signature_at(payload, header, chrono::Utc::now().timestamp())
    }

    pub fn verify_webhook_signature_at(
        &self,
        payload: &[u8],
        header: &str,
        now: i64,
    ) -> anyhow::Result<bool> {
        let mut timestamp: Option<i64> = None;
        let mut signatures: Vec<&str> = Vec::new();

        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", v)) => timestamp = v.parse().ok(),
                Some(("v1", v)) => signatures.push(v),
                _ => {}
            }
        }

        let timestamp = timestamp.context("Missing timestamp in Stripe-Signature header")?;
        if signatures.is_empty() {
            anyhow::bail!("Missing v1 signature in Stripe-Signature header");
        }

        if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            tracing::warn!(timestamp, now, "Stripe webhook timestamp outside tolerance");
            return Ok(false);
        }

        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|_| anyhow::anyhow!("Invalid webhook secret"))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);

        Ok(signatures.into_iter().any(|sig| match hex::decode(sig) {
            Ok(bytes) => mac.clone().verify_slice(&bytes).is_ok(),
            Err(_) => false,
        }))
    }

    pub async fn create_checkout_session(
        &self,
        params: &NewCheckoutSession,
    ) -> anyhow::Result<CheckoutSession> {
        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&params.to_form())
            .send()
            .await?;
        Self::parse(response).await
    }

    pub async fn retrieve_checkout_session(&self, id: &str) -> anyhow::Result<CheckoutSession> {
        let response = self
            .client
            .get(format!("{}/v1/checkout/sessions/{}", self.api_base, id))
            .bearer_auth(&self.secret_key)
            .send()
            .await?;
        Self::parse(response).await
    }

    pub async fn sessions_for_payment_intent(
        &self,
        payment_intent: &str,
    ) -> anyhow::Result<Vec<CheckoutSession>> {
        let response = self
            .client
            .get(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .query(&[("payment_intent", payment_intent), ("limit", "1")])
            .send()
            .await?;
        let list: List<CheckoutSession> = Self::parse(response).await?;
        Ok(list.data)
    }

    /// Completed sessions created at or after `created_gte` (unix seconds).
    pub async fn list_completed_sessions(
        &self,
        created_gte: i64,
    ) -> anyhow::Result<Vec<CheckoutSession>> {
        let mut out = Vec::new();
        let mut starting_after: Option<String> = None;

        loop {
            let mut query = vec![
                ("limit".to_string(), "100".to_string()),
                ("status".to_string(), "complete".to_string()),
                ("created[gte]".to_string(), created_gte.to_string()),
            ];
            if let Some(cursor) = &starting_after {
                query.push(("starting_after".to_string(), cursor.clone()));
            }

            let response = self
                .client
                .get(format!("{}/v1/checkout/sessions", self.api_base))
                .bearer_auth(&self.secret_key)
                .query(&query)
                .send()
                .await?;
            let page: List<CheckoutSession> = Self::parse(response).await?;

            starting_after = page.data.last().map(|s| s.id.clone());
            out.extend(page.data);
            if !page.has_more || starting_after.is_none() {
                break;
            }
        }

        Ok(out)
    }

    pub async fn create_refund(
        &self,
        payment_intent: &str,
        ticket_id: Uuid,
    ) -> anyhow::Result<Refund> {
        let response = self
            .client
            .post(format!("{}/v1/refunds", self.api_base))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", format!("refund-{ticket_id}"))
            .form(&[
                ("payment_intent", payment_intent.to_string()),
                ("reason", "requested_by_customer".to_string()),
                ("metadata[ticket_id]", ticket_id.to_string()),
            ])
            .send()
            .await?;
        Self::parse(response).await
    }

    async fn parse<T: DeserializeOwned>(response: reqwest::Response) -> anyhow::Result<T> {
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<ErrorEnvelope>(&text)
                .ok()
                .and_then(|e| e.error.message)
                .unwrap_or(text);
            anyhow::bail!("Stripe API error {}: {}", status, message);
        }
        serde_json::from_str(&text).context("Failed to decode Stripe response")
    }
}

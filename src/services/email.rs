use anyhow::Context;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use uuid::Uuid;

use crate::config::Config;

const BRAND: &str = "Saunafest";
const RESEND_SMTP_HOST: &str = "smtp.resend.com";

/// What a confirmation email needs to say about the purchase.
pub struct TicketEmail<'a> {
    pub to_email: &'a str,
    pub to_name: &'a str,
    pub ticket_id: Uuid,
    pub event_title: &'a str,
    pub tier_name: &'a str,
    pub quantity: i64,
}

pub struct EmailService {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    site_url: String,
}

impl EmailService {
    /// Returns None if neither Resend nor a full SMTP configuration is present.
    pub fn new(config: &Config) -> Option<Self> {
        let from: Mailbox = config.email_from.as_deref()?.parse().ok()?;

        let (host, port, creds) = if let Some(key) = &config.resend_api_key {
            (
                RESEND_SMTP_HOST.to_string(),
                465,
                Credentials::new("resend".to_string(), key.clone()),
            )
        } else {
            (
                config.smtp_host.clone()?,
                config.smtp_port.unwrap_or(587),
                Credentials::new(config.smtp_username.clone()?, config.smtp_password.clone()?),
            )
        };

        let transport = if port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&host)
                .ok()?
                .credentials(creds)
                .build()
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&host)
                .ok()?
                .port(port)
                .credentials(creds)
                .build()
        };

        Some(Self {
            transport,
            from,
            site_url: config.site_url.clone(),
        })
    }

    // ─── Private helpers ─────────────────────────────────────────────────────

    fn new_message_id(&self) -> String {
        format!("<{}@{}>", Uuid::new_v4(), self.from.email.domain())
    }

    fn mailbox(to_email: &str, to_name: &str) -> anyhow::Result<Mailbox> {
        let name = to_name.trim();
        if name.is_empty() {
            return Ok(to_email.parse()?);
        }
        Ok(Mailbox::new(Some(name.to_string()), to_email.parse()?))
    }

    /// Wraps inner HTML content in the branded email layout.
    fn wrap_html(content: &str) -> String {
        format!(
            r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width,initial-scale=1">
  <title>{BRAND}</title>
</head>
<body style="margin:0;padding:0;background-color:#f4efe6;font-family:Georgia,'Times New Roman',serif">
  <table role="presentation" width="100%" cellpadding="0" cellspacing="0" style="background-color:#f4efe6;padding:40px 16px">
    <tr>
      <td align="center">
        <table role="presentation" width="100%" cellpadding="0" cellspacing="0" style="max-width:520px">
          <tr>
            <td align="center" style="padding-bottom:28px">
              <p style="margin:0;font-size:24px;font-weight:700;letter-spacing:2px;color:#2b1d14;text-align:center">{BRAND}</p>
            </td>
          </tr>
          <tr>
            <td style="background:#fffdf8;border-radius:4px;padding:40px;box-shadow:0 2px 0 #2b1d14">
              {content}
            </td>
          </tr>
          <tr>
            <td align="center" style="padding-top:20px">
              <p style="margin:0;font-size:12px;color:#8a7b6b">{BRAND} · pop-up sauna</p>
            </td>
          </tr>
        </table>
      </td>
    </tr>
  </table>
</body>
</html>"#
        )
    }

    async fn send_email(
        &self,
        to: Mailbox,
        subject: &str,
        text: &str,
        html: &str,
    ) -> anyhow::Result<()> {
        let from = Mailbox::new(Some(BRAND.to_string()), self.from.email.clone());
        let email = Message::builder()
            .message_id(Some(self.new_message_id()))
            .from(from)
            .to(to)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text.to_string()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html.to_string()),
                    ),
            )
            .context("Failed to build email message")?;

        self.transport
            .send(email)
            .await
            .context("Failed to send email")?;

        Ok(())
    }

    // ─── Public methods ───────────────────────────────────────────────────────

    pub async fn send_ticket_confirmation(&self, ticket: &TicketEmail<'_>) -> anyhow::Result<()> {
        let to = Self::mailbox(ticket.to_email, ticket.to_name)?;
        let ticket_url = format!("{}/tickets/{}", self.site_url, ticket.ticket_id);
        let name = escape_html(ticket.to_name);
        let event = escape_html(ticket.event_title);
        let tier = escape_html(ticket.tier_name);
        let quantity = ticket.quantity;

        let subject = format!("Your ticket for {}", ticket.event_title);
        let text = format!(
            "Hi {},\n\n\
            You're in! {quantity} × {} for {}.\n\n\
            Show the QR code on this page at the door:\n{ticket_url}\n\n\
            Bring a towel, water and something to change into.\n\n\
            See you in the heat,\n{BRAND}",
            ticket.to_name, ticket.tier_name, ticket.event_title
        );
        let content = format!(
            r#"<h1 style="margin:0 0 8px 0;font-size:22px;color:#2b1d14">You're in!</h1>
<p style="margin:0 0 24px 0;font-size:15px;color:#5a4a3b;line-height:1.6">Hi <strong>{name}</strong>,<br><br>{quantity} × <strong>{tier}</strong> for <strong>{event}</strong>.</p>
<table role="presentation" cellpadding="0" cellspacing="0" style="margin-bottom:28px">
  <tr>
    <td style="border-radius:4px;background:#c2410c">
      <a href="{ticket_url}" style="display:inline-block;padding:13px 28px;color:#ffffff;text-decoration:none;font-weight:600;font-size:15px">Show my ticket</a>
    </td>
  </tr>
</table>
<p style="margin:0;font-size:13px;color:#8a7b6b;border-top:1px solid #efe6d8;padding-top:20px;line-height:1.5">Ticket reference: {}<br>Bring a towel, water and something to change into.</p>"#,
            ticket.ticket_id
        );

        let html = Self::wrap_html(&content);
        self.send_email(to, &subject, &text, &html).await
    }

    pub async fn send_refund_notice(
        &self,
        to_email: &str,
        to_name: &str,
        event_title: &str,
        amount: &str,
    ) -> anyhow::Result<()> {
        let to = Self::mailbox(to_email, to_name)?;
        let subject = format!("Refund for {event_title}");
        let text = format!(
            "Hi {to_name},\n\n\
            We've refunded {amount} for {event_title}. It usually reaches your account within 5-10 business days.\n\n\
            {BRAND}"
        );
        let content = format!(
            r#"<h1 style="margin:0 0 8px 0;font-size:22px;color:#2b1d14">Refund issued</h1>
<p style="margin:0;font-size:15px;color:#5a4a3b;line-height:1.6">Hi <strong>{}</strong>,<br><br>We've refunded <strong>{}</strong> for <strong>{}</strong>. It usually reaches your account within 5-10 business days.</p>"#,
            escape_html(to_name),
            escape_html(amount),
            escape_html(event_title)
        );
        let html = Self::wrap_html(&content);
        self.send_email(to, &subject, &text, &html).await
    }

    /// Plain operational alert to staff (sales, refunds).
    pub async fn send_admin_alert(&self, to_email: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        let to: Mailbox = to_email.parse()?;
        let content = format!(
            r#"<p style="margin:0;font-size:15px;color:#2b1d14;line-height:1.6;white-space:pre-line">{}</p>"#,
            escape_html(body)
        );
        let html = Self::wrap_html(&content);
        self.send_email(to, subject, body, &html).await
    }

    pub async fn send_broadcast(
        &self,
        to_email: &str,
        to_name: &str,
        subject: &str,
        body: &str,
    ) -> anyhow::Result<()> {
        let to = Self::mailbox(to_email, to_name)?;
        let paragraphs: String = body
            .split("\n\n")
            .filter(|p| !p.trim().is_empty())
            .map(|p| {
                format!(
                    r#"<p style="margin:0 0 16px 0;font-size:15px;color:#5a4a3b;line-height:1.6">{}</p>"#,
                    escape_html(p.trim()).replace('\n', "<br>")
                )
            })
            .collect();
        let content = format!(
            r#"<h1 style="margin:0 0 16px 0;font-size:22px;color:#2b1d14">{}</h1>
{paragraphs}"#,
            escape_html(subject)
        );
        let html = Self::wrap_html(&content);
        self.send_email(to, subject, body, &html).await
    }
}

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape_html(r#"<b>"Löyly" & 'vihta'</b>"#),
            "&lt;b&gt;&quot;Löyly&quot; &amp; &#39;vihta&#39;&lt;/b&gt;"
        );
    }

    #[test]
    fn mailbox_falls_back_to_bare_address() {
        let mb = EmailService::mailbox("aino@example.fi", "  ").unwrap();
        assert!(mb.name.is_none());
        let mb = EmailService::mailbox("aino@example.fi", "Aino").unwrap();
        assert_eq!(mb.name.as_deref(), Some("Aino"));
        assert!(EmailService::mailbox("nope", "Aino").is_err());
    }
}

use anyhow::Context;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::debug;

use crate::config::SmtpConfig;

/// Outgoing mail seam. Delivery failures propagate; nothing is retried.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_verification(&self, to: &str, token: &str) -> anyhow::Result<()>;
    async fn send_password_reset(&self, to: &str, token: &str) -> anyhow::Result<()>;
    async fn send_project_invitation(
        &self,
        to: &str,
        project_name: &str,
        inviter_name: &str,
        token: &str,
    ) -> anyhow::Result<()>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    public_url: String,
}

impl SmtpMailer {
    pub fn new(cfg: &SmtpConfig) -> anyhow::Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.host)
            .context("smtp relay")?
            .port(cfg.port)
            .credentials(Credentials::new(cfg.user.clone(), cfg.pass.clone()))
            .build();
        let from: Mailbox = cfg.from.parse().context("parse SMTP_FROM")?;
        Ok(Self {
            transport,
            from,
            public_url: cfg.public_url.clone(),
        })
    }

    async fn send_html(&self, to: &str, subject: &str, html: String) -> anyhow::Result<()> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(to.parse().context("parse recipient address")?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html)
            .context("build message")?;
        self.transport.send(message).await.context("smtp send")?;
        debug!(to = %to, subject = %subject, "mail sent");
        Ok(())
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_verification(&self, to: &str, token: &str) -> anyhow::Result<()> {
        let url = format!("{}/auth/verify?token={}", self.public_url, token);
        self.send_html(
            to,
            "Verify your email - Drone Media Services",
            verification_body(&url),
        )
        .await
    }

    async fn send_password_reset(&self, to: &str, token: &str) -> anyhow::Result<()> {
        let url = format!("{}/auth/reset-password?token={}", self.public_url, token);
        self.send_html(
            to,
            "Reset your password - Drone Media Services",
            password_reset_body(&url),
        )
        .await
    }

    async fn send_project_invitation(
        &self,
        to: &str,
        project_name: &str,
        inviter_name: &str,
        token: &str,
    ) -> anyhow::Result<()> {
        let url = format!("{}/auth/register?invite={}", self.public_url, token);
        self.send_html(
            to,
            &format!(
                "You've been invited to view \"{}\" - Drone Media Services",
                project_name
            ),
            invitation_body(&url, project_name, inviter_name),
        )
        .await
    }
}

fn layout(heading: &str, inner: &str) -> String {
    let year = time::OffsetDateTime::now_utc().year();
    format!(
        r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">
  <div style="background-color: #3b82f6; padding: 20px; text-align: center;">
    <h1 style="color: white; margin: 0;">Drone Media Services</h1>
  </div>
  <div style="padding: 30px; background-color: #f9fafb;">
    <h2 style="color: #1f2937; margin-bottom: 20px;">{heading}</h2>
    {inner}
  </div>
  <div style="background-color: #f3f4f6; padding: 20px; text-align: center; font-size: 12px; color: #6b7280;">
    &copy; {year} Drone Media Services. All rights reserved.
  </div>
</div>"#
    )
}

fn button_and_fallback(url: &str, label: &str) -> String {
    format!(
        r#"<div style="text-align: center; margin: 30px 0;">
      <a href="{url}" style="background-color: #3b82f6; color: white; padding: 12px 24px; text-decoration: none; border-radius: 6px; display: inline-block;">{label}</a>
    </div>
    <p style="color: #6b7280; font-size: 14px;">
      If the button doesn't work, copy and paste this link into your browser:<br>
      <a href="{url}" style="color: #3b82f6;">{url}</a>
    </p>"#
    )
}

pub(crate) fn verification_body(url: &str) -> String {
    let inner = format!(
        r#"<p style="color: #4b5563; line-height: 1.6;">
      Thank you for registering with Drone Media Services. To complete your
      registration, please verify your email address by clicking the button below:
    </p>
    {}
    <p style="color: #6b7280; font-size: 14px;">
      This link will expire in 24 hours. If you didn't create an account with us,
      please ignore this email.
    </p>"#,
        button_and_fallback(url, "Verify Email Address")
    );
    layout("Welcome!", &inner)
}

pub(crate) fn password_reset_body(url: &str) -> String {
    let inner = format!(
        r#"<p style="color: #4b5563; line-height: 1.6;">
      We received a request to reset your password. Click the button below to
      create a new password:
    </p>
    {}
    <p style="color: #6b7280; font-size: 14px;">
      This link will expire in 1 hour. If you didn't request a password reset,
      please ignore this email.
    </p>"#,
        button_and_fallback(url, "Reset Password")
    );
    layout("Password Reset Request", &inner)
}

pub(crate) fn invitation_body(url: &str, project_name: &str, inviter_name: &str) -> String {
    let inner = format!(
        r#"<p style="color: #4b5563; line-height: 1.6;">
      {inviter_name} has invited you to view the project "{project_name}" on our
      secure client portal.
    </p>
    {}
    <p style="color: #6b7280; font-size: 14px;">
      This invitation will expire in 7 days. If you don't have an account,
      you'll be able to create one when you click the link.
    </p>"#,
        button_and_fallback(url, "View Project")
    );
    layout("Project Invitation", &inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_body_carries_link_and_expiry() {
        let body = verification_body("https://portal.example/auth/verify?token=abc123");
        assert!(body.contains("https://portal.example/auth/verify?token=abc123"));
        assert!(body.contains("expire in 24 hours"));
    }

    #[test]
    fn reset_body_carries_link_and_expiry() {
        let body = password_reset_body("https://portal.example/auth/reset-password?token=t0k");
        assert!(body.contains("token=t0k"));
        assert!(body.contains("expire in 1 hour"));
    }

    #[test]
    fn invitation_body_names_project_and_inviter() {
        let body = invitation_body("https://portal.example/auth/register?invite=x", "Roof Survey", "Dana");
        assert!(body.contains("Roof Survey"));
        assert!(body.contains("Dana"));
        assert!(body.contains("expire in 7 days"));
    }
}

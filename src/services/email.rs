//! Email service sending return reminders over SMTP

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox, Message, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    SmtpTransport, Transport,
};
use std::str::FromStr;
use std::time::Duration;

use crate::{
    config::{EmailConfig, ReminderConfig},
    error::{AppError, AppResult},
    services::reminders::Notifier,
};

/// Subject and body shared by every reminder
#[derive(Debug, Clone)]
pub struct ReminderTemplate {
    pub subject: String,
    pub body: String,
}

impl From<&ReminderConfig> for ReminderTemplate {
    fn from(config: &ReminderConfig) -> Self {
        Self {
            subject: config.subject.clone(),
            body: config.body.clone(),
        }
    }
}

#[derive(Clone)]
pub struct EmailService {
    from: Mailbox,
    template: ReminderTemplate,
    mailer: SmtpTransport,
}

impl EmailService {
    /// `timeout` bounds every SMTP connection and command, so a stalled
    /// server frees the blocking thread instead of holding it forever.
    pub fn new(
        config: &EmailConfig,
        template: ReminderTemplate,
        timeout: Duration,
    ) -> AppResult<Self> {
        let from_name = config.smtp_from_name.as_deref().unwrap_or("Library");
        let from = Mailbox::from_str(&format!("{} <{}>", from_name, config.smtp_from))
            .map_err(|e| AppError::Email(format!("Invalid from address: {}", e)))?;

        let mailer_builder = if config.smtp_use_tls {
            // Use STARTTLS for secure connection
            SmtpTransport::starttls_relay(&config.smtp_host)
                .map_err(|e| AppError::Email(format!("Failed to create SMTP transport: {}", e)))?
        } else {
            SmtpTransport::builder_dangerous(&config.smtp_host)
        }
        .port(config.smtp_port)
        .timeout(Some(timeout));

        let mailer_builder = if let (Some(username), Some(password)) =
            (&config.smtp_username, &config.smtp_password)
        {
            mailer_builder.credentials(Credentials::new(username.clone(), password.clone()))
        } else {
            mailer_builder
        };

        Ok(Self {
            from,
            template,
            mailer: mailer_builder.build(),
        })
    }

    /// Build the reminder addressed to `recipients`.
    ///
    /// A single recipient goes in `To`; several are put in `Bcc` so patrons
    /// don't see each other's addresses. With several recipients, addresses
    /// that do not parse are left out and returned next to the message.
    pub fn build_reminder(&self, recipients: &[String]) -> AppResult<(Message, Vec<String>)> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(self.template.subject.as_str());
        let mut rejected = Vec::new();

        match recipients {
            [] => return Err(AppError::Email("No recipient for reminder".to_string())),
            [single] => builder = builder.to(parse_mailbox(single)?),
            many => {
                builder = builder.to(self.from.clone());
                for recipient in many {
                    match parse_mailbox(recipient) {
                        Ok(mailbox) => builder = builder.bcc(mailbox),
                        Err(e) => {
                            tracing::warn!(
                                recipient = %recipient,
                                error = %e,
                                "Skipping invalid address"
                            );
                            rejected.push(recipient.clone());
                        }
                    }
                }
                if rejected.len() == many.len() {
                    return Err(AppError::Email(format!(
                        "None of the {} addresses is valid",
                        many.len()
                    )));
                }
            }
        }

        let body = &self.template.body;
        let message = builder
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(body.to_string()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(format!(
                                r#"<html><body><p>{}</p></body></html>"#,
                                body.replace('\n', "<br>")
                            )),
                    ),
            )
            .map_err(|e| AppError::Email(format!("Failed to build email: {}", e)))?;

        Ok((message, rejected))
    }

    async fn deliver(&self, email: Message) -> AppResult<()> {
        let mailer = self.mailer.clone();

        // SmtpTransport is blocking
        tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| AppError::Internal(format!("Email task failed: {}", e)))?
            .map_err(|e| AppError::Email(format!("Failed to send email: {}", e)))?;

        Ok(())
    }
}

fn parse_mailbox(address: &str) -> AppResult<Mailbox> {
    Mailbox::from_str(address)
        .map_err(|e| AppError::Email(format!("Invalid to address {}: {}", address, e)))
}

#[async_trait]
impl Notifier for EmailService {
    async fn send(&self, recipient: &str) -> AppResult<()> {
        let (email, _) = self.build_reminder(&[recipient.to_string()])?;
        self.deliver(email).await?;
        tracing::debug!(recipient, "Return reminder sent");
        Ok(())
    }

    async fn send_many(&self, recipients: &[String]) -> AppResult<Vec<String>> {
        let (email, rejected) = self.build_reminder(recipients)?;
        self.deliver(email).await?;
        tracing::debug!(
            recipients = recipients.len(),
            rejected = rejected.len(),
            "Combined return reminder sent"
        );
        Ok(rejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> EmailService {
        let config = EmailConfig {
            smtp_use_tls: false,
            ..Default::default()
        };
        EmailService::new(
            &config,
            ReminderTemplate::from(&ReminderConfig::default()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn envelope_recipients(message: &Message) -> Vec<String> {
        message
            .envelope()
            .to()
            .iter()
            .map(|a| a.to_string())
            .collect()
    }

    #[test]
    fn test_single_recipient_in_to() {
        let (message, rejected) = service().build_reminder(&["a@x.com".to_string()]).unwrap();
        assert!(rejected.is_empty());
        assert_eq!(envelope_recipients(&message), vec!["a@x.com"]);

        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Subject: Library return reminder"));
        assert!(raw.contains("To: a@x.com"));
    }

    #[test]
    fn test_many_recipients_hidden_in_bcc() {
        let recipients = vec!["a@x.com".to_string(), "b@x.com".to_string()];
        let (message, _) = service().build_reminder(&recipients).unwrap();

        let mut to = envelope_recipients(&message);
        to.sort();
        assert_eq!(to, vec!["a@x.com", "b@x.com", "noreply@library.local"]);

        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(!raw.contains("b@x.com"));
    }

    #[test]
    fn test_invalid_address_rejected() {
        let err = service().build_reminder(&["not an address".to_string()]).unwrap_err();
        assert!(matches!(err, AppError::Email(_)));
    }

    #[test]
    fn test_empty_recipients_rejected() {
        assert!(service().build_reminder(&[]).is_err());
    }

    #[test]
    fn test_invalid_from_rejected() {
        let config = EmailConfig {
            smtp_from: "broken".to_string(),
            smtp_use_tls: false,
            ..Default::default()
        };
        let result = EmailService::new(
            &config,
            ReminderTemplate::from(&ReminderConfig::default()),
            Duration::from_secs(5),
        );
        assert!(matches!(result, Err(AppError::Email(_))));
    }

    #[test]
    fn test_invalid_address_left_out_of_combined() {
        let recipients = vec![
            "not an address".to_string(),
            "b@x.com".to_string(),
            "c@x.com".to_string(),
        ];
        let (message, rejected) = service().build_reminder(&recipients).unwrap();

        assert_eq!(rejected, vec!["not an address"]);
        let mut to = envelope_recipients(&message);
        to.sort();
        assert_eq!(to, vec!["b@x.com", "c@x.com", "noreply@library.local"]);
    }

    #[test]
    fn test_combined_without_valid_address_rejected() {
        let recipients = vec!["nope".to_string(), "still nope".to_string()];
        let err = service().build_reminder(&recipients).unwrap_err();
        assert!(matches!(err, AppError::Email(_)));
    }
}

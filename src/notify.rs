//! Branch-change email notifications.

use crate::config::EmailSettings;
use crate::constants::EMAIL_SEPARATOR_WIDTH;
use crate::output::{self, Severity};
use crate::update::BranchChange;
use anyhow::Context;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::{Message, SmtpTransport, Transport};

/// A ready-to-send notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subject: String,
    pub body: String,
}

/// Builds the notification for `changes`, or `None` when nothing switched.
pub fn branch_change_notification(
    operator: Option<&str>,
    hostname: &str,
    changes: &[BranchChange],
) -> Option<Notification> {
    if changes.is_empty() {
        return None;
    }
    Some(Notification {
        subject: format!("Repository branch change on {}", hostname),
        body: email_body(operator, hostname, changes),
    })
}

pub fn email_body(operator: Option<&str>, hostname: &str, changes: &[BranchChange]) -> String {
    let separator = "-".repeat(EMAIL_SEPARATOR_WIDTH);
    let mut body = format!(
        "{} switched branches on {}:",
        operator.filter(|n| !n.is_empty()).unwrap_or("Someone"),
        hostname
    );
    for change in changes {
        body.push_str(&format!(
            "\n{}\nRepository: {}\nFrom: {}\nTo: {}",
            separator, change.repository, change.from, change.to
        ));
    }
    body.push('\n');
    body.push_str(&separator);
    body
}

pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Sends `notification` through the configured relay without authentication.
pub fn send(
    settings: &EmailSettings,
    recipient: &str,
    notification: &Notification,
) -> anyhow::Result<()> {
    if settings.email_host.is_empty() {
        anyhow::bail!("EmailSettings.email_host is not configured");
    }

    let message = Message::builder()
        .from(
            settings
                .email_from
                .parse::<Mailbox>()
                .with_context(|| format!("Invalid sender address '{}'", settings.email_from))?,
        )
        .to(recipient
            .parse::<Mailbox>()
            .with_context(|| format!("Invalid recipient address '{}'", recipient))?)
        .subject(notification.subject.clone())
        .header(ContentType::TEXT_PLAIN)
        .body(notification.body.clone())
        .context("Failed to build email")?;

    tracing::info!(host = %settings.email_host, recipient, "Sending branch change email");
    SmtpTransport::builder_dangerous(&settings.email_host)
        .build()
        .send(&message)
        .with_context(|| format!("Failed to send email via {}", settings.email_host))?;
    Ok(())
}

/// Emails `changes` to `recipient` if there are any. Failures are printed along
/// with the message that would have been sent; they never fail the run.
pub fn notify_branch_changes(
    settings: &EmailSettings,
    recipient: &str,
    operator: Option<&str>,
    changes: &[BranchChange],
) -> bool {
    let Some(notification) = branch_change_notification(operator, &local_hostname(), changes) else {
        return false;
    };

    match send(settings, recipient, &notification) {
        Ok(()) => {
            output::out(0, Severity::Success.paint(&format!("Branch change email sent to {}", recipient)).to_string());
            true
        }
        Err(e) => {
            output::out(0, Severity::Error.paint(&format!("Could not send email: {:#}", e)).to_string());
            output::out(1, format!("Subject: {}\n\n{}", notification.subject, notification.body));
            false
        }
    }
}

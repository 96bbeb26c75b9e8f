use std::env;
use std::str::FromStr;

use anyhow::{Context, Result};
use lettre::{
    message::Mailbox, transport::smtp::authentication::Credentials, AsyncSmtpTransport,
    AsyncTransport, Message, Tokio1Executor,
};
use palaver_core::{user_display, CommentHook, CommentRecord, UserDirectory};
use tokio::sync::mpsc;

const DEFAULT_SMTP_PORT: u16 = 587;

/// The engine only carries opaque author ids; display resolution belongs to
/// the identity provider. Until one is wired in, ids stand for themselves.
struct OpaqueDirectory;

impl UserDirectory for OpaqueDirectory {
    fn display_name(&self, _user_id: &str) -> Option<String> {
        None
    }
}

pub struct CommentNotifier {
    from_mailbox: Mailbox,
    admin_recipient: String,
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl CommentNotifier {
    /// SMTP settings from `PALAVER_SMTP_*`; absent credentials disable email
    /// delivery and the worker falls back to logging.
    pub fn from_env() -> Result<Option<Self>> {
        let (Ok(host), Ok(username), Ok(password), Ok(admin_recipient)) = (
            env::var("PALAVER_SMTP_HOST"),
            env::var("PALAVER_SMTP_USERNAME"),
            env::var("PALAVER_SMTP_PASSWORD"),
            env::var("PALAVER_ADMIN_EMAIL"),
        ) else {
            tracing::warn!("comment notifier email disabled: PALAVER_SMTP_* not configured");
            return Ok(None);
        };
        let port = env::var("PALAVER_SMTP_PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(DEFAULT_SMTP_PORT);

        let from_mailbox = Mailbox::from_str(&format!("Palaver <{username}>"))
            .context("invalid sender mailbox")?;
        let credentials = Credentials::new(username, password);
        let builder = if port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&host)
                .with_context(|| format!("invalid smtp relay host: {host}"))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&host)
                .with_context(|| format!("invalid smtp starttls host: {host}"))?
        };
        let mailer = builder.port(port).credentials(credentials).build();

        tracing::info!("comment notifier email enabled via {host}:{port}");
        Ok(Some(Self {
            from_mailbox,
            admin_recipient,
            mailer,
        }))
    }

    pub async fn send_new_comment(&self, comment: &CommentRecord) -> Result<()> {
        let author = user_display(&OpaqueDirectory, comment.user_id.as_deref());
        let subject = format!(
            "[Palaver] New comment on {}:{}",
            comment.content_type, comment.object_pk
        );
        let body = comment.as_plain_text(&author, None);
        let message = Message::builder()
            .from(self.from_mailbox.clone())
            .to(Mailbox::from_str(&self.admin_recipient).context("invalid admin recipient")?)
            .subject(subject)
            .body(body)
            .context("failed to build notification email")?;
        self.mailer
            .send(message)
            .await
            .context("failed to send notification email")?;
        Ok(())
    }
}

/// Spawn the fire-and-forget notification worker and hand back its queue.
/// Delivery failures are logged, never surfaced to the submitter.
pub fn spawn_notify_worker(notifier: Option<CommentNotifier>) -> mpsc::Sender<CommentRecord> {
    let (sender, mut receiver) = mpsc::channel::<CommentRecord>(128);
    tokio::spawn(async move {
        while let Some(comment) = receiver.recv().await {
            match &notifier {
                Some(notifier) => {
                    if let Err(err) = notifier.send_new_comment(&comment).await {
                        tracing::warn!("comment notification failed for {}: {err}", comment.id);
                    }
                },
                None => {
                    tracing::info!(
                        "new comment {} on {}:{} by {}",
                        comment.id,
                        comment.content_type,
                        comment.object_pk,
                        comment.user_id.as_deref().unwrap_or("anonymous")
                    );
                },
            }
        }
    });
    sender
}

/// Post-save pipeline hook: enqueue the persisted comment for notification.
pub struct NotifyHook {
    sender: mpsc::Sender<CommentRecord>,
}

impl NotifyHook {
    pub fn new(sender: mpsc::Sender<CommentRecord>) -> Self {
        Self { sender }
    }
}

impl CommentHook for NotifyHook {
    fn name(&self) -> &str {
        "notify"
    }

    fn after_save(&self, comment: &CommentRecord) {
        if let Err(err) = self.sender.try_send(comment.clone()) {
            tracing::warn!("notification queue full, dropping comment {}: {err}", comment.id);
        }
    }
}

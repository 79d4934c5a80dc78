//! Fire-and-forget notifications for billing events.
//!
//! Producers call `dispatch`, which never waits: events go onto a bounded
//! queue drained by a background worker that sends plain-text email.

use crate::config::SmtpConfig;
use crate::models::EntityKind;
use crate::services::metrics::record_notification;
use async_trait::async_trait;
use chrono::NaiveDate;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum NotificationEvent {
    BillingRecordCreated {
        recipient: String,
        name: String,
        entity_kind: EntityKind,
        record_number: String,
        amount: Decimal,
        nepali_date: String,
        due_date: NaiveDate,
    },
    DeductionApplied {
        recipient: String,
        name: String,
        entity_kind: EntityKind,
        checkout_id: Uuid,
        duration_days: i64,
        deduction_amount: Decimal,
        adjusted_amount: Decimal,
        rule_applied: String,
    },
}

impl NotificationEvent {
    /// Metrics label.
    pub fn label(&self) -> &'static str {
        match self {
            NotificationEvent::BillingRecordCreated { .. } => "billing_record_created",
            NotificationEvent::DeductionApplied { .. } => "deduction_applied",
        }
    }

    pub fn recipient(&self) -> &str {
        match self {
            NotificationEvent::BillingRecordCreated { recipient, .. }
            | NotificationEvent::DeductionApplied { recipient, .. } => recipient,
        }
    }

    pub fn subject(&self) -> String {
        match self {
            NotificationEvent::BillingRecordCreated {
                entity_kind,
                nepali_date,
                ..
            } => format!("Your {} for {}", entity_kind.record_label(), nepali_date),
            NotificationEvent::DeductionApplied { .. } => {
                "Your checkout has been approved".to_string()
            }
        }
    }

    pub fn body(&self) -> String {
        match self {
            NotificationEvent::BillingRecordCreated {
                name,
                entity_kind,
                record_number,
                amount,
                nepali_date,
                due_date,
                ..
            } => format!(
                "Dear {},\n\nA new {} {} has been issued on {} (BS) for {}.\nIt is due on {}.\n",
                name,
                entity_kind.record_label(),
                record_number,
                nepali_date,
                amount,
                due_date
            ),
            NotificationEvent::DeductionApplied {
                name,
                checkout_id,
                duration_days,
                deduction_amount,
                adjusted_amount,
                rule_applied,
                ..
            } => format!(
                "Dear {},\n\nYour checkout {} has been approved for {} day(s).\nRule: {}\nDeduction: {}\nAdjusted monthly amount: {}\n",
                name, checkout_id, duration_days, rule_applied, deduction_amount, adjusted_amount
            ),
        }
    }
}

/// Accepts events without blocking the caller.
pub trait NotificationDispatcher: Send + Sync {
    fn dispatch(&self, event: NotificationEvent);
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), anyhow::Error>;
}

/// Bounded-queue dispatcher. A full queue drops the event.
#[derive(Clone)]
pub struct QueuedNotifier {
    sender: mpsc::Sender<NotificationEvent>,
}

impl QueuedNotifier {
    /// Create the queue without a consumer.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<NotificationEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Create the queue and spawn a worker draining it through `email`.
    pub fn start(capacity: usize, email: Arc<dyn EmailSender>) -> (Self, JoinHandle<()>) {
        let (notifier, receiver) = Self::channel(capacity);
        let worker = tokio::spawn(run_worker(receiver, email));
        (notifier, worker)
    }
}

impl NotificationDispatcher for QueuedNotifier {
    fn dispatch(&self, event: NotificationEvent) {
        let label = event.label();
        match self.sender.try_send(event) {
            Ok(()) => record_notification(label, "queued"),
            Err(mpsc::error::TrySendError::Full(event)) => {
                record_notification(label, "dropped");
                tracing::warn!(
                    event = label,
                    recipient = %event.recipient(),
                    "Notification queue full, dropping event"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                record_notification(label, "dropped");
                tracing::warn!(event = label, "Notification worker stopped, dropping event");
            }
        }
    }
}

async fn run_worker(mut receiver: mpsc::Receiver<NotificationEvent>, email: Arc<dyn EmailSender>) {
    while let Some(event) = receiver.recv().await {
        let label = event.label();
        match email
            .send(event.recipient(), &event.subject(), &event.body())
            .await
        {
            Ok(()) => record_notification(label, "sent"),
            Err(e) => {
                record_notification(label, "failed");
                tracing::error!(
                    event = label,
                    recipient = %event.recipient(),
                    error = %e,
                    "Failed to send notification"
                );
            }
        }
    }
    tracing::info!("Notification worker stopped");
}

pub struct SmtpEmailSender {
    from: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpEmailSender {
    pub fn new(config: &SmtpConfig, host: &str) -> Result<Self, anyhow::Error> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid from address: {}", e))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| anyhow::anyhow!("Failed to create SMTP relay: {}", e))?
            .port(config.port);

        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ));
        }

        Ok(Self {
            from,
            transport: builder.build(),
        })
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), anyhow::Error> {
        let to_mailbox: Mailbox = to
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid recipient: {}", e))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to_mailbox)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(|e| anyhow::anyhow!("Failed to build message: {}", e))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to send email: {}", e))?;

        tracing::info!(to = %to, subject = %subject, "Email sent successfully");
        Ok(())
    }
}

/// Used when SMTP is not configured.
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, to: &str, subject: &str, _body: &str) -> Result<(), anyhow::Error> {
        tracing::info!(to = %to, subject = %subject, "SMTP not configured, email logged only");
        Ok(())
    }
}

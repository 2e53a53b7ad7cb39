use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::error::NotificationError;
use crate::models::{
    AppointmentSnapshot, ChannelSet, DispatchReport, NewNotification, NotificationEventType,
    NotificationRequest, Recipient,
};
use crate::services::email::{EmailSender, HttpEmailSender};
use crate::services::messages::build_message;
use crate::services::sms::{normalize_phone, SmsSender, TweetSmsSender};
use crate::services::store::NotificationRepository;

/// Delivers appointment notifications after the owning write has committed.
///
/// Per recipient the in-app row is created first. Email and SMS follow and
/// are best-effort: their failures are logged and counted, never returned.
/// When the in-app row already exists the event was delivered before and
/// the other channels are skipped as well.
pub struct NotificationDispatcher {
    store: Arc<dyn NotificationRepository>,
    email: Option<Arc<dyn EmailSender>>,
    sms: Option<Arc<dyn SmsSender>>,
    country_code: String,
}

impl NotificationDispatcher {
    pub fn new(
        store: Arc<dyn NotificationRepository>,
        email: Option<Arc<dyn EmailSender>>,
        sms: Option<Arc<dyn SmsSender>>,
        country_code: impl Into<String>,
    ) -> Self {
        Self {
            store,
            email,
            sms,
            country_code: country_code.into(),
        }
    }

    /// Wires the HTTP transports that the configuration enables.
    pub fn from_config(config: &AppConfig, store: Arc<dyn NotificationRepository>) -> Self {
        let email: Option<Arc<dyn EmailSender>> = match HttpEmailSender::new(config) {
            Ok(sender) => Some(Arc::new(sender)),
            Err(e) => {
                info!("Email notifications disabled: {}", e);
                None
            }
        };
        let sms: Option<Arc<dyn SmsSender>> = match TweetSmsSender::new(config) {
            Ok(sender) => Some(Arc::new(sender)),
            Err(e) => {
                info!("SMS notifications disabled: {}", e);
                None
            }
        };

        Self::new(store, email, sms, config.sms_country_code.clone())
    }

    pub fn store(&self) -> &Arc<dyn NotificationRepository> {
        &self.store
    }

    /// Runs `deliver` on a background task.
    pub fn dispatch(self: &Arc<Self>, request: NotificationRequest) -> JoinHandle<DispatchReport> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move { dispatcher.deliver(request).await })
    }

    pub async fn deliver(&self, request: NotificationRequest) -> DispatchReport {
        let (title, message) = build_message(request.event_type, &request.appointment);
        let mut report = DispatchReport::default();

        for recipient in &request.recipients {
            let outcome = self
                .send_to(
                    recipient,
                    &request.appointment,
                    request.event_type,
                    &title,
                    &message,
                    request.channels,
                    request.triggered_by,
                )
                .await;
            report.absorb(outcome);
        }

        info!(
            "Dispatched {} for appointment {}: {:?}",
            request.event_type, request.appointment.appointment_id, report
        );
        report
    }

    /// Notifies one recipient on every channel with caller-provided text.
    pub async fn notify(
        &self,
        recipient: &Recipient,
        appointment: &AppointmentSnapshot,
        event_type: NotificationEventType,
        title: &str,
        message: &str,
    ) -> DispatchReport {
        self.send_to(recipient, appointment, event_type, title, message, ChannelSet::all(), None)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn send_to(
        &self,
        recipient: &Recipient,
        appointment: &AppointmentSnapshot,
        event_type: NotificationEventType,
        title: &str,
        message: &str,
        channels: ChannelSet,
        triggered_by: Option<Uuid>,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();

        let created = self
            .store
            .insert(NewNotification {
                recipient_id: recipient.user_id,
                appointment_id: Some(appointment.appointment_id),
                appointment_revision: appointment.revision,
                event_type,
                title: title.to_string(),
                message: message.to_string(),
                triggering_staff_id: triggered_by,
            })
            .await
            .map_err(NotificationError::from);

        match created {
            Ok(row) => {
                info!(
                    "[NOTIFICATION] In-app {} created for recipient {} appointment {} (staff={:?})",
                    event_type, recipient.user_id, appointment.appointment_id, row.triggering_staff_id
                );
                report.in_app_created += 1;
            }
            Err(NotificationError::Duplicate) => {
                warn!(
                    "[NOTIFICATION] {} already delivered to {} for appointment {} revision {}",
                    event_type, recipient.user_id, appointment.appointment_id, appointment.revision
                );
                report.in_app_duplicates += 1;
                return report;
            }
            Err(e) => {
                error!(
                    "[NOTIFICATION] In-app {} for recipient {} failed: {}",
                    event_type, recipient.user_id, e
                );
                report.failures += 1;
            }
        }

        if channels.email {
            self.send_email(recipient, title, message, &mut report).await;
        }
        if channels.sms {
            self.send_sms(recipient, message, &mut report).await;
        }

        report
    }

    async fn send_email(&self, recipient: &Recipient, title: &str, message: &str, report: &mut DispatchReport) {
        let Some(address) = recipient.verified_email() else {
            info!("[EMAIL] No verified email for {}; skipping", recipient.user_id);
            return;
        };
        let Some(sender) = &self.email else {
            info!("[EMAIL] Email not configured; skipping {}", recipient.user_id);
            return;
        };

        match sender.send(address, title, message).await {
            Ok(()) => report.emails_sent += 1,
            Err(e) => {
                error!("[EMAIL] Failed to send to recipient {}: {}", recipient.user_id, e);
                report.failures += 1;
            }
        }
    }

    async fn send_sms(&self, recipient: &Recipient, message: &str, report: &mut DispatchReport) {
        let Some(sender) = &self.sms else {
            info!("[SMS] SMS gateway not configured; skipping {}", recipient.user_id);
            return;
        };
        let Some(raw_phone) = recipient.phone.as_deref() else {
            info!("[SMS] No phone number for {}; skipping", recipient.user_id);
            return;
        };

        let result = match normalize_phone(raw_phone, &self.country_code) {
            Ok(phone) => sender.send(&phone, message).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => report.sms_sent += 1,
            Err(e) => {
                error!("[SMS] Failed to send to recipient {}: {}", recipient.user_id, e);
                report.failures += 1;
            }
        }
    }
}

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use shared_database::{DatabaseError, UniqueIndex};

use crate::models::{AppointmentNotification, NewNotification, NotificationEventType};

/// Unique over the same columns as [`EventKey`].
pub const NOTIFICATION_EVENT_CONSTRAINT: &str = "unique_appointment_event_recipient";

/// In-app notification storage. Implementations enforce the per-event
/// uniqueness constraint themselves.
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn insert(&self, notification: NewNotification) -> Result<AppointmentNotification, DatabaseError>;

    /// Newest first.
    async fn list_for_recipient(&self, recipient_id: Uuid) -> Result<Vec<AppointmentNotification>, DatabaseError>;

    async fn mark_read(&self, notification_id: Uuid, recipient_id: Uuid) -> Result<AppointmentNotification, DatabaseError>;

    async fn count_for_appointment(
        &self,
        appointment_id: Uuid,
        event_type: NotificationEventType,
    ) -> Result<usize, DatabaseError>;
}

/// (appointment, event, revision, recipient). One patient-side event fans
/// out to the doctor and every secretary, and the same appointment can be
/// edited or moved more than once, so neither recipient nor revision can be
/// left out without rejecting legitimate rows. A retried dispatch of the
/// same committed revision still collides.
type EventKey = (Uuid, NotificationEventType, u32, Uuid);

struct NotificationTable {
    rows: Vec<AppointmentNotification>,
    events: UniqueIndex<EventKey>,
}

pub struct InMemoryNotificationRepository {
    table: RwLock<NotificationTable>,
}

impl Default for InMemoryNotificationRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryNotificationRepository {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(NotificationTable {
                rows: Vec::new(),
                events: UniqueIndex::new(NOTIFICATION_EVENT_CONSTRAINT),
            }),
        }
    }
}

#[async_trait]
impl NotificationRepository for InMemoryNotificationRepository {
    async fn insert(&self, new: NewNotification) -> Result<AppointmentNotification, DatabaseError> {
        let mut table = self.table.write().await;

        // Rows without an appointment are not covered by the constraint.
        if let Some(appointment_id) = new.appointment_id {
            table.events.insert((
                appointment_id,
                new.event_type,
                new.appointment_revision,
                new.recipient_id,
            ))?;
        }

        let row = AppointmentNotification {
            id: Uuid::new_v4(),
            recipient_id: new.recipient_id,
            appointment_id: new.appointment_id,
            appointment_revision: new.appointment_revision,
            event_type: new.event_type,
            title: new.title,
            message: new.message,
            triggering_staff_id: new.triggering_staff_id,
            is_read: false,
            is_delivered: true,
            created_at: Utc::now(),
        };
        table.rows.push(row.clone());
        Ok(row)
    }

    async fn list_for_recipient(&self, recipient_id: Uuid) -> Result<Vec<AppointmentNotification>, DatabaseError> {
        let table = self.table.read().await;
        // Rows are appended in creation order.
        Ok(table
            .rows
            .iter()
            .rev()
            .filter(|n| n.recipient_id == recipient_id)
            .cloned()
            .collect())
    }

    async fn mark_read(&self, notification_id: Uuid, recipient_id: Uuid) -> Result<AppointmentNotification, DatabaseError> {
        let mut table = self.table.write().await;
        let row = table
            .rows
            .iter_mut()
            .find(|n| n.id == notification_id && n.recipient_id == recipient_id)
            .ok_or_else(|| DatabaseError::NotFound(format!("notification {}", notification_id)))?;
        row.is_read = true;
        Ok(row.clone())
    }

    async fn count_for_appointment(
        &self,
        appointment_id: Uuid,
        event_type: NotificationEventType,
    ) -> Result<usize, DatabaseError> {
        let table = self.table.read().await;
        Ok(table
            .rows
            .iter()
            .filter(|n| n.appointment_id == Some(appointment_id) && n.event_type == event_type)
            .count())
    }
}

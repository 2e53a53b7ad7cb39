use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use uuid::Uuid;

use shared_database::DatabaseError;

use crate::models::{AppointmentNotification, NewNotification, NotificationEventType};
use crate::services::store::NotificationRepository;

const COLUMNS: &str = "id, recipient_id, appointment_id, appointment_revision, event_type, title, message, \
                       triggering_staff_id, is_read, is_delivered, created_at";

#[derive(FromRow)]
struct NotificationRow {
    id: Uuid,
    recipient_id: Uuid,
    appointment_id: Option<Uuid>,
    appointment_revision: i64,
    event_type: String,
    title: String,
    message: String,
    triggering_staff_id: Option<Uuid>,
    is_read: bool,
    is_delivered: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<NotificationRow> for AppointmentNotification {
    type Error = DatabaseError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        let corrupt = |what: &str| DatabaseError::Storage(format!("notification {}: invalid {}", row.id, what));

        Ok(AppointmentNotification {
            id: row.id,
            recipient_id: row.recipient_id,
            appointment_id: row.appointment_id,
            appointment_revision: u32::try_from(row.appointment_revision)
                .map_err(|_| corrupt("appointment_revision"))?,
            event_type: row.event_type.parse().map_err(|_| corrupt("event_type"))?,
            title: row.title,
            message: row.message,
            triggering_staff_id: row.triggering_staff_id,
            is_read: row.is_read,
            is_delivered: row.is_delivered,
            created_at: row.created_at,
        })
    }
}

/// In-app notifications in `appointment_notifications`. Duplicate events are
/// rejected by the table's unique constraint and surface as
/// [`DatabaseError::UniqueViolation`].
pub struct PgNotificationRepository {
    pool: PgPool,
}

impl PgNotificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationRepository for PgNotificationRepository {
    async fn insert(&self, new: NewNotification) -> Result<AppointmentNotification, DatabaseError> {
        let sql = format!(
            "INSERT INTO appointment_notifications
                 (id, recipient_id, appointment_id, appointment_revision, event_type, title, message, triggering_staff_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING {}",
            COLUMNS
        );

        let row = sqlx::query_as::<_, NotificationRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(new.recipient_id)
            .bind(new.appointment_id)
            .bind(i64::from(new.appointment_revision))
            .bind(new.event_type.as_str())
            .bind(&new.title)
            .bind(&new.message)
            .bind(new.triggering_staff_id)
            .fetch_one(&self.pool)
            .await?;

        row.try_into()
    }

    async fn list_for_recipient(&self, recipient_id: Uuid) -> Result<Vec<AppointmentNotification>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM appointment_notifications WHERE recipient_id = $1 ORDER BY created_at DESC",
            COLUMNS
        );

        sqlx::query_as::<_, NotificationRow>(&sql)
            .bind(recipient_id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(AppointmentNotification::try_from)
            .collect()
    }

    async fn mark_read(&self, notification_id: Uuid, recipient_id: Uuid) -> Result<AppointmentNotification, DatabaseError> {
        let sql = format!(
            "UPDATE appointment_notifications SET is_read = TRUE
             WHERE id = $1 AND recipient_id = $2
             RETURNING {}",
            COLUMNS
        );

        sqlx::query_as::<_, NotificationRow>(&sql)
            .bind(notification_id)
            .bind(recipient_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("notification {}", notification_id)))?
            .try_into()
    }

    async fn count_for_appointment(
        &self,
        appointment_id: Uuid,
        event_type: NotificationEventType,
    ) -> Result<usize, DatabaseError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM appointment_notifications WHERE appointment_id = $1 AND event_type = $2",
        )
        .bind(appointment_id)
        .bind(event_type.as_str())
        .fetch_one(&self.pool)
        .await?;

        usize::try_from(count).map_err(|_| DatabaseError::Storage(format!("negative count {}", count)))
    }
}

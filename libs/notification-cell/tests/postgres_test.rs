//! Runs against the database named by `TEST_DATABASE_URL` and skips when it
//! is unset.

use std::sync::Arc;

use assert_matches::assert_matches;
use uuid::Uuid;

use notification_cell::models::NewNotification;
use notification_cell::services::store::NOTIFICATION_EVENT_CONSTRAINT;
use notification_cell::{NotificationEventType, NotificationRepository, PgNotificationRepository};
use shared_database::{connect_for_tests, DatabaseError};

async fn repository() -> Option<Arc<PgNotificationRepository>> {
    let Some(pool) = connect_for_tests().await else {
        eprintln!("TEST_DATABASE_URL not set; skipping");
        return None;
    };
    Some(Arc::new(PgNotificationRepository::new(pool)))
}

fn edited(appointment_id: Option<Uuid>, recipient_id: Uuid, revision: u32) -> NewNotification {
    NewNotification {
        recipient_id,
        appointment_id,
        appointment_revision: revision,
        event_type: NotificationEventType::AppointmentEdited,
        title: "Appointment Edited".to_string(),
        message: "moved to 10:00".to_string(),
        triggering_staff_id: None,
    }
}

#[tokio::test]
async fn repeated_event_hits_the_table_constraint() {
    let Some(repo) = repository().await else { return };
    let (appointment, doctor) = (Uuid::new_v4(), Uuid::new_v4());

    repo.insert(edited(Some(appointment), doctor, 3)).await.unwrap();
    let err = repo.insert(edited(Some(appointment), doctor, 3)).await.unwrap_err();
    assert_matches!(err, DatabaseError::UniqueViolation { ref constraint } if constraint == NOTIFICATION_EVENT_CONSTRAINT);

    // The same edit reaches a secretary, and a later edit reaches the doctor again.
    repo.insert(edited(Some(appointment), Uuid::new_v4(), 3)).await.unwrap();
    repo.insert(edited(Some(appointment), doctor, 4)).await.unwrap();

    let count = repo
        .count_for_appointment(appointment, NotificationEventType::AppointmentEdited)
        .await
        .unwrap();
    assert_eq!(count, 3);
}

#[tokio::test]
async fn rows_without_an_appointment_are_unconstrained() {
    let Some(repo) = repository().await else { return };
    let recipient = Uuid::new_v4();

    repo.insert(edited(None, recipient, 0)).await.unwrap();
    repo.insert(edited(None, recipient, 0)).await.unwrap();

    assert_eq!(repo.list_for_recipient(recipient).await.unwrap().len(), 2);
}

#[tokio::test]
async fn inbox_is_newest_first_and_private() {
    let Some(repo) = repository().await else { return };
    let owner = Uuid::new_v4();

    let first = repo.insert(edited(Some(Uuid::new_v4()), owner, 1)).await.unwrap();
    let second = repo.insert(edited(Some(Uuid::new_v4()), owner, 1)).await.unwrap();

    let inbox = repo.list_for_recipient(owner).await.unwrap();
    let ids: Vec<Uuid> = inbox.iter().map(|n| n.id).collect();
    assert_eq!(ids, vec![second.id, first.id]);
    assert_eq!(inbox[0].event_type, NotificationEventType::AppointmentEdited);
    assert_eq!(inbox[0].appointment_revision, 1);

    let err = repo.mark_read(first.id, Uuid::new_v4()).await.unwrap_err();
    assert_matches!(err, DatabaseError::NotFound(_));
    assert!(repo.mark_read(first.id, owner).await.unwrap().is_read);
}

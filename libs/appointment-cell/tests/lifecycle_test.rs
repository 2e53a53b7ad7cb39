mod common;

use assert_matches::assert_matches;
use chrono::Duration;
use uuid::Uuid;

use appointment_cell::models::{AppointmentError, AppointmentStatus, PolicyViolation};
use appointment_cell::services::{CalendarStore, LifecycleOutcome};
use common::{at, monday, t, Harness};
use notification_cell::models::NewNotification;
use notification_cell::{DispatchReport, NotificationEventType, NotificationRepository};
use shared_database::DatabaseError;

async fn settle(outcome: LifecycleOutcome) -> (appointment_cell::Appointment, DispatchReport) {
    let report = match outcome.notification {
        Some(handle) => handle.await.unwrap(),
        None => DispatchReport::default(),
    };
    (outcome.appointment, report)
}

fn policy(err: AppointmentError) -> PolicyViolation {
    match err {
        AppointmentError::NotAllowed(violation) => violation,
        other => panic!("expected a policy violation, got {:?}", other),
    }
}

// ==============================================================================
// CANCELLATION
// ==============================================================================

#[tokio::test]
async fn patient_cancel_notifies_doctor_and_secretaries() {
    let h = Harness::new().await;
    let booked = h.book_a(h.patient, t(10, 0)).await.unwrap();

    let outcome = h.lifecycle.cancel_by_patient(booked.id, h.patient).await.unwrap();
    let (cancelled, report) = settle(outcome).await;

    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
    assert_eq!(cancelled.revision, 2);
    assert_eq!(report.in_app_created, 2);
    assert_eq!(report.emails_sent, 0);

    let doctor_inbox = h.notifications.list_for_recipient(h.doctor).await.unwrap();
    assert_eq!(doctor_inbox.len(), 1);
    assert_eq!(doctor_inbox[0].event_type, NotificationEventType::AppointmentCancelledByPatient);
    assert!(doctor_inbox[0].message.contains("Omar Khalil"));
    assert_eq!(h.notifications.list_for_recipient(h.secretary).await.unwrap().len(), 1);
}

#[tokio::test]
async fn patient_cannot_cancel_someone_elses_appointment() {
    let h = Harness::new().await;
    let booked = h.book_a(h.patient, t(10, 0)).await.unwrap();

    assert_matches!(
        h.lifecycle.cancel_by_patient(booked.id, h.other_patient).await,
        Err(AppointmentError::NotFound)
    );
    assert_matches!(
        h.lifecycle.cancel_by_patient(Uuid::new_v4(), h.patient).await,
        Err(AppointmentError::NotFound)
    );
}

#[tokio::test]
async fn patient_cancel_inside_window_is_refused() {
    let h = Harness::new().await;
    let booked = h.book_a(h.patient, t(10, 0)).await.unwrap();

    h.clock.set(at(monday(), 8, 30));
    let err = h.lifecycle.cancel_by_patient(booked.id, h.patient).await.unwrap_err();
    assert_eq!(policy(err), PolicyViolation::WithinCancellationWindow { hours: 2 });

    // Exactly two hours ahead is still allowed.
    h.clock.set(at(monday(), 8, 0));
    assert!(h.lifecycle.cancel_by_patient(booked.id, h.patient).await.is_ok());
}

#[tokio::test]
async fn closed_appointment_cannot_be_cancelled_again() {
    let h = Harness::new().await;
    let booked = h.book_a(h.patient, t(10, 0)).await.unwrap();
    h.lifecycle.cancel_by_patient(booked.id, h.patient).await.unwrap();

    let err = h.lifecycle.cancel_by_patient(booked.id, h.patient).await.unwrap_err();
    assert_eq!(policy(err), PolicyViolation::AppointmentClosed(AppointmentStatus::Cancelled));

    let err = h.lifecycle.cancel_by_staff(booked.id, h.secretary).await.unwrap_err();
    assert_eq!(policy(err), PolicyViolation::AppointmentClosed(AppointmentStatus::Cancelled));
}

#[tokio::test]
async fn staff_cancel_notifies_patient_exactly_once() {
    let h = Harness::new().await;
    let booked = h.book_a(h.patient, t(10, 0)).await.unwrap();

    // Staff are not bound by the window.
    h.clock.set(at(monday(), 9, 45));
    let outcome = h.lifecycle.cancel_by_staff(booked.id, h.secretary).await.unwrap();
    let (cancelled, report) = settle(outcome).await;
    assert_eq!(report.in_app_created, 1);

    let count = h
        .notifications
        .count_for_appointment(booked.id, NotificationEventType::AppointmentCancelled)
        .await
        .unwrap();
    assert_eq!(count, 1);

    let inbox = h.notifications.list_for_recipient(h.patient).await.unwrap();
    assert_eq!(inbox[0].triggering_staff_id, Some(h.secretary));
    assert_eq!(inbox[0].appointment_revision, cancelled.revision);

    // A redelivery of the same event is rejected by the store.
    let duplicate = h
        .notifications
        .insert(NewNotification {
            recipient_id: h.patient,
            appointment_id: Some(booked.id),
            appointment_revision: cancelled.revision,
            event_type: NotificationEventType::AppointmentCancelled,
            title: inbox[0].title.clone(),
            message: inbox[0].message.clone(),
            triggering_staff_id: Some(h.secretary),
        })
        .await;
    assert_matches!(duplicate, Err(DatabaseError::UniqueViolation { .. }));
}

#[tokio::test]
async fn staff_of_another_clinic_cannot_touch_the_appointment() {
    let h = Harness::new().await;
    // The secretary only works at clinic A.
    let at_b = h.booking.book(h.patient, h.request_b(monday(), t(15, 0))).await.unwrap();

    let err = h.lifecycle.cancel_by_staff(at_b.id, h.secretary).await.unwrap_err();
    assert_eq!(policy(err), PolicyViolation::ClinicMismatch);

    let err = h
        .lifecycle
        .reschedule_by_staff(at_b.id, Uuid::new_v4(), h.change(monday(), t(15, 30)))
        .await
        .unwrap_err();
    assert_eq!(policy(err), PolicyViolation::ClinicMismatch);

    let err = h
        .lifecycle
        .transition_by_staff(at_b.id, h.secretary, AppointmentStatus::CheckedIn)
        .await
        .unwrap_err();
    assert_eq!(policy(err), PolicyViolation::ClinicMismatch);

    // The doctor works at both.
    assert!(h.lifecycle.cancel_by_staff(at_b.id, h.doctor).await.is_ok());
}

// ==============================================================================
// EDITS AND RESCHEDULES
// ==============================================================================

#[tokio::test]
async fn patient_edits_are_capped_but_staff_reschedules_are_not() {
    let h = Harness::new().await;
    let booked = h.book_a(h.patient, t(9, 0)).await.unwrap();

    let first = h
        .lifecycle
        .edit_by_patient(booked.id, h.patient, h.change(monday(), t(9, 30)))
        .await
        .unwrap();
    assert_eq!(first.appointment.patient_edit_count, 1);
    let second = h
        .lifecycle
        .edit_by_patient(booked.id, h.patient, h.change(monday(), t(10, 0)))
        .await
        .unwrap();
    assert_eq!(second.appointment.patient_edit_count, 2);
    assert_eq!(second.appointment.revision, 3);

    let err = h
        .lifecycle
        .edit_by_patient(booked.id, h.patient, h.change(monday(), t(10, 30)))
        .await
        .unwrap_err();
    assert_eq!(policy(err), PolicyViolation::EditLimitReached { max: 2 });

    let moved = h
        .lifecycle
        .reschedule_by_staff(booked.id, h.secretary, h.change(monday(), t(11, 0)))
        .await
        .unwrap();
    let (moved, report) = settle(moved).await;
    assert_eq!(moved.time, t(11, 0));
    assert_eq!(moved.patient_edit_count, 2);
    assert_eq!(moved.revision, 4);
    assert_eq!(report.in_app_created, 1);

    let inbox = h.notifications.list_for_recipient(h.patient).await.unwrap();
    assert_eq!(inbox[0].event_type, NotificationEventType::AppointmentRescheduled);
    assert!(inbox[0].message.contains("11:00"));
}

#[tokio::test]
async fn editing_to_the_same_slot_does_not_conflict_with_itself() {
    let h = Harness::new().await;
    let booked = h.book_a(h.patient, t(10, 0)).await.unwrap();

    let outcome = h
        .lifecycle
        .edit_by_patient(booked.id, h.patient, h.change(monday(), t(10, 0)))
        .await
        .unwrap();
    assert_eq!(outcome.appointment.time, t(10, 0));
    assert_eq!(outcome.appointment.patient_edit_count, 1);
}

#[tokio::test]
async fn editing_into_a_taken_slot_is_unavailable() {
    let h = Harness::new().await;
    let mine = h.book_a(h.patient, t(10, 0)).await.unwrap();
    h.book_a(h.other_patient, t(11, 0)).await.unwrap();

    assert_matches!(
        h.lifecycle
            .edit_by_patient(mine.id, h.patient, h.change(monday(), t(11, 0)))
            .await,
        Err(AppointmentError::SlotUnavailable)
    );
    assert_matches!(
        h.lifecycle
            .edit_by_patient(mine.id, h.patient, h.change(monday(), t(11, 15)))
            .await,
        Err(AppointmentError::InvalidSlot)
    );

    let unchanged = h.calendar.get(mine.id).await.unwrap().unwrap();
    assert_eq!(unchanged.time, t(10, 0));
    assert_eq!(unchanged.patient_edit_count, 0);
}

#[tokio::test]
async fn edit_to_another_day_frees_the_old_slot() {
    let h = Harness::new().await;
    let next_monday = monday() + Duration::days(7);
    let booked = h.book_a(h.patient, t(10, 0)).await.unwrap();

    let outcome = h
        .lifecycle
        .edit_by_patient(booked.id, h.patient, h.change(next_monday, t(9, 0)))
        .await
        .unwrap();
    let (moved, report) = settle(outcome).await;
    assert_eq!(moved.date, next_monday);
    assert_eq!(report.in_app_created, 2);

    let inbox = h.notifications.list_for_recipient(h.secretary).await.unwrap();
    assert_eq!(inbox[0].event_type, NotificationEventType::AppointmentEdited);
    assert!(inbox[0].message.contains("2030-01-07"));

    assert!(h.book_a(h.other_patient, t(10, 0)).await.is_ok());
}

#[tokio::test]
async fn edit_to_the_past_or_by_a_stranger_is_refused() {
    let h = Harness::new().await;
    let booked = h.book_a(h.patient, t(10, 0)).await.unwrap();
    let saturday = monday() - Duration::days(2);

    assert_matches!(
        h.lifecycle
            .edit_by_patient(booked.id, h.patient, h.change(saturday, t(10, 0)))
            .await,
        Err(AppointmentError::PastDate)
    );
    assert_matches!(
        h.lifecycle
            .edit_by_patient(booked.id, h.other_patient, h.change(monday(), t(11, 0)))
            .await,
        Err(AppointmentError::NotFound)
    );
}

#[tokio::test]
async fn checked_in_appointment_cannot_be_rescheduled() {
    let h = Harness::new().await;
    let booked = h.book_a(h.patient, t(10, 0)).await.unwrap();
    h.lifecycle
        .transition_by_staff(booked.id, h.secretary, AppointmentStatus::CheckedIn)
        .await
        .unwrap();

    let err = h
        .lifecycle
        .reschedule_by_staff(booked.id, h.secretary, h.change(monday(), t(11, 0)))
        .await
        .unwrap_err();
    assert_eq!(policy(err), PolicyViolation::NotEditable(AppointmentStatus::CheckedIn));
}

// ==============================================================================
// STATUS TRANSITIONS
// ==============================================================================

#[tokio::test]
async fn visit_runs_from_check_in_to_completion() {
    let h = Harness::new().await;
    let booked = h.book_a(h.patient, t(10, 0)).await.unwrap();

    let mut revision = booked.revision;
    for target in [
        AppointmentStatus::CheckedIn,
        AppointmentStatus::InProgress,
        AppointmentStatus::Completed,
    ] {
        let outcome = h
            .lifecycle
            .transition_by_staff(booked.id, h.doctor, target)
            .await
            .unwrap();
        assert_eq!(outcome.appointment.status, target);
        assert!(outcome.notification.is_none());
        revision += 1;
        assert_eq!(outcome.appointment.revision, revision);
    }

    // Completed visits keep their slot.
    assert_matches!(
        h.book_a(h.other_patient, t(10, 0)).await,
        Err(AppointmentError::SlotUnavailable)
    );

    let err = h
        .lifecycle
        .transition_by_staff(booked.id, h.doctor, AppointmentStatus::NoShow)
        .await
        .unwrap_err();
    assert_eq!(policy(err), PolicyViolation::AppointmentClosed(AppointmentStatus::Completed));
}

#[tokio::test]
async fn skipping_states_is_an_invalid_transition() {
    let h = Harness::new().await;
    let booked = h.book_a(h.patient, t(10, 0)).await.unwrap();

    let err = h
        .lifecycle
        .transition_by_staff(booked.id, h.secretary, AppointmentStatus::Completed)
        .await
        .unwrap_err();
    assert_eq!(
        policy(err),
        PolicyViolation::InvalidTransition {
            from: AppointmentStatus::Confirmed,
            to: AppointmentStatus::Completed,
        }
    );
}

#[tokio::test]
async fn no_show_frees_the_slot() {
    let h = Harness::new().await;
    let booked = h.book_a(h.patient, t(10, 0)).await.unwrap();

    h.lifecycle
        .transition_by_staff(booked.id, h.secretary, AppointmentStatus::NoShow)
        .await
        .unwrap();

    assert!(h.book_a(h.other_patient, t(10, 0)).await.is_ok());
}

#[tokio::test]
async fn cancelled_target_goes_through_staff_cancel() {
    let h = Harness::new().await;
    let booked = h.book_a(h.patient, t(10, 0)).await.unwrap();

    let outcome = h
        .lifecycle
        .transition_by_staff(booked.id, h.secretary, AppointmentStatus::Cancelled)
        .await
        .unwrap();
    let (cancelled, report) = settle(outcome).await;

    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
    assert_eq!(report.in_app_created, 1);
}

// ==============================================================================
// LISTING
// ==============================================================================

#[tokio::test]
async fn patient_listing_splits_upcoming_and_past() {
    let h = Harness::new().await;
    let next_monday = monday() + Duration::days(7);

    let soon = h.book_a(h.patient, t(9, 0)).await.unwrap();
    let later = h
        .booking
        .book(h.patient, h.request_a(next_monday, t(9, 0)))
        .await
        .unwrap();
    let dropped = h.book_a(h.patient, t(11, 0)).await.unwrap();
    h.lifecycle.cancel_by_patient(dropped.id, h.patient).await.unwrap();

    let listing = h.queries.patient_appointments(h.patient, None, None).await.unwrap();
    let upcoming: Vec<Uuid> = listing.upcoming.iter().map(|a| a.id).collect();
    assert_eq!(upcoming, vec![soon.id, later.id]);
    assert_eq!(listing.past_total, 1);
    assert_eq!(listing.past[0].id, dropped.id);

    // Once the first visit has started it moves to the past list.
    h.clock.set(at(monday(), 9, 10));
    let listing = h.queries.patient_appointments(h.patient, Some(1), Some(1)).await.unwrap();
    assert_eq!(listing.upcoming_total, 1);
    assert_eq!(listing.upcoming[0].id, later.id);
    assert_eq!(listing.past_total, 2);
    assert_eq!(listing.past.len(), 1);
    assert_eq!(listing.past[0].id, dropped.id);
}

#[tokio::test]
async fn detail_is_hidden_from_unrelated_users() {
    let h = Harness::new().await;
    let booked = h.book_a(h.patient, t(10, 0)).await.unwrap();

    let view = h.queries.detail(booked.id, h.patient).await.unwrap();
    assert_eq!(view.doctor_name.as_deref(), Some("Sara Haddad"));
    assert_eq!(view.clinic_name.as_deref(), Some("Old City Clinic"));
    assert_eq!(view.appointment_type_name.as_deref(), Some("Consultation"));
    assert_eq!(view.price, Some(50.0));
    assert_eq!(view.edits_remaining, 2);

    assert!(h.queries.detail(booked.id, h.doctor).await.is_ok());
    assert!(h.queries.detail(booked.id, h.secretary).await.is_ok());
    assert_matches!(
        h.queries.detail(booked.id, h.other_patient).await,
        Err(AppointmentError::NotFound)
    );
}

use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use doctor_cell::ClinicAccess;
use notification_cell::{
    AppointmentSnapshot, ChannelSet, DispatchReport, NotificationDispatcher, NotificationEventType,
    NotificationRequest,
};
use shared_config::AppConfig;
use shared_database::DatabaseError;

use crate::models::{
    Appointment, AppointmentError, AppointmentStatus, CalendarKey, ChangeScheduleRequest,
    PolicyViolation,
};
use crate::services::booking::{check_slot, lock_error, BookingService};
use crate::services::calendar::{CalendarStore, CalendarTransaction};
use crate::services::directory::StaffDirectory;

/// A row can move to another doctor-day between the unlocked read and the
/// lock; give up after this many attempts.
const MAX_LOCK_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingPolicy {
    pub cancellation_window: Duration,
    pub max_patient_edits: u32,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            cancellation_window: Duration::hours(2),
            max_patient_edits: 2,
        }
    }
}

impl BookingPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            cancellation_window: Duration::hours(config.cancellation_window_hours),
            max_patient_edits: config.max_patient_edits,
        }
    }

    pub fn edits_remaining(&self, appointment: &Appointment) -> u32 {
        self.max_patient_edits.saturating_sub(appointment.patient_edit_count)
    }
}

/// The committed appointment plus the handle of its notification task, if
/// one was dispatched. Dropping the handle detaches the task.
#[derive(Debug)]
pub struct LifecycleOutcome {
    pub appointment: Appointment,
    pub notification: Option<JoinHandle<DispatchReport>>,
}

#[derive(Debug, Clone, Copy)]
enum Actor {
    Patient(Uuid),
    Staff(Uuid),
}

/// Status transitions, cancellations and schedule changes. Every mutation
/// re-reads its row under the doctor-day lock and notifies only after the
/// transaction has committed.
pub struct AppointmentLifecycle {
    booking: Arc<BookingService>,
    directory: Arc<StaffDirectory>,
    notifier: Arc<NotificationDispatcher>,
    policy: BookingPolicy,
}

impl AppointmentLifecycle {
    pub fn new(
        booking: Arc<BookingService>,
        directory: Arc<StaffDirectory>,
        notifier: Arc<NotificationDispatcher>,
        policy: BookingPolicy,
    ) -> Self {
        Self {
            booking,
            directory,
            notifier,
            policy,
        }
    }

    pub fn policy(&self) -> BookingPolicy {
        self.policy
    }

    fn store(&self) -> &Arc<dyn CalendarStore> {
        self.booking.calendar()
    }

    fn now(&self) -> NaiveDateTime {
        self.booking.clock().now_local()
    }

    #[instrument(skip(self))]
    pub async fn cancel_by_patient(
        &self,
        appointment_id: Uuid,
        patient_id: Uuid,
    ) -> Result<LifecycleOutcome, AppointmentError> {
        let (mut tx, mut appointment) = self
            .lock_appointment(appointment_id, None, AppointmentError::Database)
            .await?;

        // Someone else's appointment looks exactly like a missing one.
        if appointment.patient_id != patient_id {
            return Err(AppointmentError::NotFound);
        }
        ensure_open(&appointment)?;
        self.ensure_outside_window(&appointment)?;

        appointment.status = AppointmentStatus::Cancelled;
        self.touch(&mut appointment);
        tx.update(appointment.clone()).await?;
        tx.commit().await?;

        info!("Appointment {} cancelled by patient {}", appointment_id, patient_id);

        let notification = self
            .notify_care_team(&appointment, NotificationEventType::AppointmentCancelledByPatient, None)
            .await;
        Ok(LifecycleOutcome {
            appointment,
            notification,
        })
    }

    #[instrument(skip(self))]
    pub async fn cancel_by_staff(
        &self,
        appointment_id: Uuid,
        staff_id: Uuid,
    ) -> Result<LifecycleOutcome, AppointmentError> {
        let (mut tx, mut appointment) = self
            .lock_appointment(appointment_id, None, AppointmentError::Database)
            .await?;

        self.ensure_clinic_staff(&appointment, staff_id).await?;
        ensure_open(&appointment)?;

        appointment.status = AppointmentStatus::Cancelled;
        self.touch(&mut appointment);
        tx.update(appointment.clone()).await?;
        tx.commit().await?;

        info!("Appointment {} cancelled by staff {}", appointment_id, staff_id);

        let notification = self
            .notify_patient(
                &appointment,
                NotificationEventType::AppointmentCancelled,
                staff_id,
                None,
            )
            .await;
        Ok(LifecycleOutcome {
            appointment,
            notification,
        })
    }

    /// Patient edit: counts against the edit limit and respects the
    /// cancellation window.
    #[instrument(skip(self, request))]
    pub async fn edit_by_patient(
        &self,
        appointment_id: Uuid,
        patient_id: Uuid,
        request: ChangeScheduleRequest,
    ) -> Result<LifecycleOutcome, AppointmentError> {
        self.change_schedule(appointment_id, Actor::Patient(patient_id), request)
            .await
    }

    /// Staff reschedule: no edit limit and no cancellation window.
    #[instrument(skip(self, request))]
    pub async fn reschedule_by_staff(
        &self,
        appointment_id: Uuid,
        staff_id: Uuid,
        request: ChangeScheduleRequest,
    ) -> Result<LifecycleOutcome, AppointmentError> {
        self.change_schedule(appointment_id, Actor::Staff(staff_id), request)
            .await
    }

    /// Confirm, check in, start, complete or mark a no-show. Cancelling goes
    /// through `cancel_by_staff` so the patient is notified.
    #[instrument(skip(self))]
    pub async fn transition_by_staff(
        &self,
        appointment_id: Uuid,
        staff_id: Uuid,
        target: AppointmentStatus,
    ) -> Result<LifecycleOutcome, AppointmentError> {
        if target == AppointmentStatus::Cancelled {
            return self.cancel_by_staff(appointment_id, staff_id).await;
        }

        let (mut tx, mut appointment) = self
            .lock_appointment(appointment_id, None, AppointmentError::Database)
            .await?;

        self.ensure_clinic_staff(&appointment, staff_id).await?;
        ensure_open(&appointment)?;
        if !appointment.status.can_transition_to(target) {
            return Err(PolicyViolation::InvalidTransition {
                from: appointment.status,
                to: target,
            }
            .into());
        }

        let from = appointment.status;
        appointment.status = target;
        self.touch(&mut appointment);
        tx.update(appointment.clone()).await?;
        tx.commit().await?;

        info!(
            "Appointment {} moved from {} to {} by staff {}",
            appointment_id, from, target, staff_id
        );
        Ok(LifecycleOutcome {
            appointment,
            notification: None,
        })
    }

    async fn change_schedule(
        &self,
        appointment_id: Uuid,
        actor: Actor,
        request: ChangeScheduleRequest,
    ) -> Result<LifecycleOutcome, AppointmentError> {
        // Fast-fail on an unlocked read; everything is checked again below.
        let seen = self.load(appointment_id).await?;
        self.ensure_actor(&seen, actor).await?;
        self.ensure_changeable(&seen, actor)?;
        self.booking.ensure_not_past(request.date, request.time)?;

        let doctor_id = seen
            .doctor_id
            .ok_or(AppointmentError::NotAllowed(PolicyViolation::NotEditable(seen.status)))?;
        self.booking.require_active_clinic(seen.clinic_id).await?;

        let type_id = request
            .appointment_type_id
            .or(seen.appointment_type_id)
            .ok_or(AppointmentError::InvalidAppointmentType)?;
        let appointment_type = self
            .booking
            .resolve_type(type_id, doctor_id, seen.clinic_id)
            .await?;
        let duration = appointment_type.duration_minutes;

        let target = CalendarKey::new(doctor_id, request.date);
        let blocks = self.booking.blocks(doctor_id, seen.clinic_id, request.date).await?;

        let preview = self.store().calendar(target).await?;
        check_slot(&blocks, &preview, Some(appointment_id), duration, request.time)?;

        let (mut tx, mut appointment) = self
            .lock_appointment(appointment_id, Some(request.date), lock_error)
            .await?;
        self.ensure_changeable(&appointment, actor)?;

        let locked = tx.calendar(target).await?;
        check_slot(&blocks, &locked, Some(appointment_id), duration, request.time)?;

        let previous = (appointment.date, appointment.time);
        appointment.date = request.date;
        appointment.time = request.time;
        appointment.appointment_type_id = Some(appointment_type.id);
        appointment.duration_minutes = Some(duration);
        if let Some(reason) = request.reason {
            appointment.reason = Some(reason).filter(|r| !r.trim().is_empty());
        }
        if let Actor::Patient(_) = actor {
            appointment.patient_edit_count += 1;
        }
        self.touch(&mut appointment);

        tx.update(appointment.clone()).await?;
        tx.commit().await?;

        let notification = match actor {
            Actor::Patient(patient_id) => {
                info!(
                    "Appointment {} edited by patient {} ({} of {} edits used)",
                    appointment_id,
                    patient_id,
                    appointment.patient_edit_count,
                    self.policy.max_patient_edits
                );
                self.notify_care_team(
                    &appointment,
                    NotificationEventType::AppointmentEdited,
                    Some(previous),
                )
                .await
            }
            Actor::Staff(staff_id) => {
                info!("Appointment {} rescheduled by staff {}", appointment_id, staff_id);
                self.notify_patient(
                    &appointment,
                    NotificationEventType::AppointmentRescheduled,
                    staff_id,
                    Some(previous),
                )
                .await
            }
        };

        Ok(LifecycleOutcome {
            appointment,
            notification,
        })
    }

    async fn load(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        self.store()
            .get(appointment_id)
            .await?
            .ok_or(AppointmentError::NotFound)
    }

    /// Locks the appointment's doctor-day, plus the same doctor's day on
    /// `move_to` when given, and re-reads the row under the lock.
    async fn lock_appointment(
        &self,
        appointment_id: Uuid,
        move_to: Option<NaiveDate>,
        on_lock_error: fn(DatabaseError) -> AppointmentError,
    ) -> Result<(Box<dyn CalendarTransaction>, Appointment), AppointmentError> {
        for attempt in 1..=MAX_LOCK_ATTEMPTS {
            let seen = self.load(appointment_id).await?;
            let current_key = seen.calendar_key();
            let mut keys = vec![current_key];
            keys.extend(move_to.map(|date| CalendarKey::new(current_key.doctor_id, date)));

            let tx = self.store().begin(keys).await.map_err(on_lock_error)?;
            let locked = tx
                .get(appointment_id)
                .await?
                .ok_or(AppointmentError::NotFound)?;

            if tx.holds(&locked.calendar_key()) {
                return Ok((tx, locked));
            }
            debug!(
                "Appointment {} moved before its lock was taken (attempt {})",
                appointment_id, attempt
            );
        }

        Err(on_lock_error(DatabaseError::LockTimeout {
            resource: format!("appointment {}", appointment_id),
        }))
    }

    async fn ensure_actor(&self, appointment: &Appointment, actor: Actor) -> Result<(), AppointmentError> {
        match actor {
            Actor::Patient(patient_id) if appointment.patient_id != patient_id => {
                Err(AppointmentError::NotFound)
            }
            Actor::Patient(_) => Ok(()),
            Actor::Staff(staff_id) => self.ensure_clinic_staff(appointment, staff_id).await,
        }
    }

    async fn ensure_clinic_staff(&self, appointment: &Appointment, staff_id: Uuid) -> Result<(), AppointmentError> {
        if self.directory.is_clinic_staff(appointment.clinic_id, staff_id).await {
            Ok(())
        } else {
            Err(PolicyViolation::ClinicMismatch.into())
        }
    }

    fn ensure_changeable(&self, appointment: &Appointment, actor: Actor) -> Result<(), AppointmentError> {
        ensure_open(appointment)?;
        if !appointment.status.is_editable() {
            return Err(PolicyViolation::NotEditable(appointment.status).into());
        }
        if let Actor::Patient(_) = actor {
            if appointment.patient_edit_count >= self.policy.max_patient_edits {
                return Err(PolicyViolation::EditLimitReached {
                    max: self.policy.max_patient_edits,
                }
                .into());
            }
            self.ensure_outside_window(appointment)?;
        }
        Ok(())
    }

    fn ensure_outside_window(&self, appointment: &Appointment) -> Result<(), AppointmentError> {
        if appointment.starts_at() - self.now() < self.policy.cancellation_window {
            return Err(PolicyViolation::WithinCancellationWindow {
                hours: self.policy.cancellation_window.num_hours(),
            }
            .into());
        }
        Ok(())
    }

    fn touch(&self, appointment: &mut Appointment) {
        appointment.revision += 1;
        appointment.updated_at = self.booking.clock().now_utc();
    }

    async fn snapshot(
        &self,
        appointment: &Appointment,
        previous: Option<(NaiveDate, NaiveTime)>,
    ) -> AppointmentSnapshot {
        let doctor_name = match appointment.doctor_id {
            Some(doctor_id) => self.directory.display_name(doctor_id).await,
            None => None,
        };
        let patient_name = self
            .directory
            .display_name(appointment.patient_id)
            .await
            .unwrap_or_else(|| "A patient".to_string());
        let clinic_name = match self.directory.clinic(appointment.clinic_id).await {
            Ok(Some(clinic)) => clinic.name,
            Ok(None) => "the clinic".to_string(),
            Err(e) => {
                error!("Clinic lookup for notification failed: {}", e);
                "the clinic".to_string()
            }
        };

        AppointmentSnapshot {
            appointment_id: appointment.id,
            revision: appointment.revision,
            doctor_name,
            patient_name,
            clinic_name,
            date: appointment.date,
            time: appointment.time,
            previous_date: previous.map(|(date, _)| date),
            previous_time: previous.map(|(_, time)| time),
        }
    }

    /// In-app notification to the doctor and the clinic's active secretaries.
    async fn notify_care_team(
        &self,
        appointment: &Appointment,
        event_type: NotificationEventType,
        previous: Option<(NaiveDate, NaiveTime)>,
    ) -> Option<JoinHandle<DispatchReport>> {
        let recipients = match self
            .directory
            .care_team(appointment.clinic_id, appointment.doctor_id)
            .await
        {
            Ok(recipients) if !recipients.is_empty() => recipients,
            Ok(_) => {
                info!("No staff to notify for appointment {}", appointment.id);
                return None;
            }
            Err(e) => {
                error!("Could not resolve staff for appointment {}: {}", appointment.id, e);
                return None;
            }
        };

        let snapshot = self.snapshot(appointment, previous).await;
        Some(self.notifier.dispatch(NotificationRequest {
            event_type,
            appointment: snapshot,
            recipients,
            channels: ChannelSet::in_app_only(),
            triggered_by: None,
        }))
    }

    /// In-app, email and SMS notification to the patient, attributed to the
    /// staff member who made the change.
    async fn notify_patient(
        &self,
        appointment: &Appointment,
        event_type: NotificationEventType,
        staff_id: Uuid,
        previous: Option<(NaiveDate, NaiveTime)>,
    ) -> Option<JoinHandle<DispatchReport>> {
        let recipient = match self.directory.recipient(appointment.patient_id).await {
            Ok(recipient) => recipient,
            Err(e) => {
                error!("Could not resolve patient for appointment {}: {}", appointment.id, e);
                return None;
            }
        };

        let snapshot = self.snapshot(appointment, previous).await;
        Some(self.notifier.dispatch(NotificationRequest {
            event_type,
            appointment: snapshot,
            recipients: vec![recipient],
            channels: ChannelSet::all(),
            triggered_by: Some(staff_id),
        }))
    }
}

fn ensure_open(appointment: &Appointment) -> Result<(), AppointmentError> {
    if appointment.status.is_terminal() {
        return Err(PolicyViolation::AppointmentClosed(appointment.status).into());
    }
    Ok(())
}

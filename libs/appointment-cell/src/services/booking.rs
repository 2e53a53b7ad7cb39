use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use doctor_cell::{
    day_of_week, find_slot, generate_slots, AppointmentType, AvailabilityBlock, AvailabilityError,
    AvailabilityService,
};
use shared_database::DatabaseError;
use shared_utils::Clock;

use crate::models::{
    Appointment, AppointmentError, AppointmentStatus, BookAppointmentRequest, CalendarKey, Clinic,
    SlotQueryResult,
};
use crate::services::calendar::{CalendarStore, DoctorCalendar};
use crate::services::directory::StaffDirectory;

/// Read-only slot previews and the locked booking write path.
pub struct BookingService {
    calendar: Arc<dyn CalendarStore>,
    availability: Arc<AvailabilityService>,
    directory: Arc<StaffDirectory>,
    clock: Arc<dyn Clock>,
}

impl BookingService {
    pub fn new(
        calendar: Arc<dyn CalendarStore>,
        availability: Arc<AvailabilityService>,
        directory: Arc<StaffDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            calendar,
            availability,
            directory,
            clock,
        }
    }

    pub fn calendar(&self) -> &Arc<dyn CalendarStore> {
        &self.calendar
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Rejects a date before today, or today at a time that is not strictly
    /// in the future.
    pub fn ensure_not_past(&self, date: NaiveDate, time: NaiveTime) -> Result<(), AppointmentError> {
        let now = self.clock.now_local();
        if date < now.date() || (date == now.date() && time <= now.time()) {
            return Err(AppointmentError::PastDate);
        }
        Ok(())
    }

    /// Slot preview for a doctor, clinic and appointment type on one date.
    pub async fn slots(
        &self,
        doctor_id: Uuid,
        clinic_id: Uuid,
        date: NaiveDate,
        appointment_type_id: Uuid,
    ) -> Result<SlotQueryResult, AppointmentError> {
        if date < self.clock.now_local().date() {
            return Err(AppointmentError::PastDate);
        }

        let appointment_type = self.resolve_type(appointment_type_id, doctor_id, clinic_id).await?;
        let blocks = self.blocks(doctor_id, clinic_id, date).await?;
        let calendar = self.calendar.calendar(CalendarKey::new(doctor_id, date)).await?;

        let duration_minutes = appointment_type.duration_minutes;
        let results = generate_slots(&blocks, &calendar.booked_intervals(None), duration_minutes);
        let detail = blocks
            .is_empty()
            .then(|| "No availability on this date.".to_string());

        debug!(
            "Generated {} slots for doctor {} at clinic {} on {}",
            results.len(),
            doctor_id,
            clinic_id,
            date
        );

        Ok(SlotQueryResult {
            date,
            day_of_week: day_of_week(date),
            doctor_id,
            clinic_id,
            appointment_type,
            duration_minutes,
            results,
            detail,
        })
    }

    /// Books a slot for a patient. Checks run cheapest first; the slot check
    /// outside the lock only fails fast, the one under the doctor-day lock
    /// decides.
    #[instrument(skip(self, request), fields(doctor_id = %request.doctor_id, date = %request.date))]
    pub async fn book(
        &self,
        patient_id: Uuid,
        request: BookAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        self.ensure_not_past(request.date, request.time)?;
        self.require_active_clinic(request.clinic_id).await?;
        let appointment_type = self
            .resolve_type(request.appointment_type_id, request.doctor_id, request.clinic_id)
            .await?;

        let key = CalendarKey::new(request.doctor_id, request.date);
        let blocks = self.blocks(request.doctor_id, request.clinic_id, request.date).await?;
        let duration = appointment_type.duration_minutes;

        let preview = self.calendar.calendar(key).await?;
        check_slot(&blocks, &preview, None, duration, request.time)?;

        let mut tx = self.calendar.begin(vec![key]).await.map_err(lock_error)?;
        let locked = tx.calendar(key).await?;
        if let Err(e) = check_slot(&blocks, &locked, None, duration, request.time) {
            warn!("Slot {} taken while waiting for the doctor-day lock", request.time);
            return Err(e);
        }

        let now = Utc::now();
        let appointment = Appointment {
            id: Uuid::new_v4(),
            patient_id,
            clinic_id: request.clinic_id,
            doctor_id: Some(request.doctor_id),
            appointment_type_id: Some(appointment_type.id),
            duration_minutes: Some(duration),
            date: request.date,
            time: request.time,
            status: AppointmentStatus::Confirmed,
            reason: request.reason.filter(|r| !r.trim().is_empty()),
            patient_edit_count: 0,
            revision: 1,
            created_by: patient_id,
            created_at: now,
            updated_at: now,
        };

        tx.insert(appointment.clone()).await?;
        tx.commit().await?;

        info!(
            "Appointment {} booked for patient {} with doctor {} on {} at {}",
            appointment.id,
            patient_id,
            request.doctor_id,
            appointment.date,
            appointment.time.format("%H:%M")
        );
        Ok(appointment)
    }

    pub(crate) async fn require_active_clinic(&self, clinic_id: Uuid) -> Result<Clinic, AppointmentError> {
        self.directory
            .active_clinic(clinic_id)
            .await?
            .ok_or(AppointmentError::InvalidClinic)
    }

    pub(crate) async fn resolve_type(
        &self,
        type_id: Uuid,
        doctor_id: Uuid,
        clinic_id: Uuid,
    ) -> Result<AppointmentType, AppointmentError> {
        self.availability
            .resolve_active_type(type_id, doctor_id, clinic_id)
            .await
            .map_err(availability_error)?
            .ok_or(AppointmentError::InvalidAppointmentType)
    }

    pub(crate) async fn blocks(
        &self,
        doctor_id: Uuid,
        clinic_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<AvailabilityBlock>, AppointmentError> {
        self.availability
            .active_blocks(doctor_id, clinic_id, day_of_week(date))
            .await
            .map_err(availability_error)
    }
}

/// The requested start must be a generated slot and that slot must be free.
pub(crate) fn check_slot(
    blocks: &[AvailabilityBlock],
    calendar: &DoctorCalendar,
    exclude: Option<Uuid>,
    duration_minutes: i32,
    time: NaiveTime,
) -> Result<(), AppointmentError> {
    let slots = generate_slots(blocks, &calendar.booked_intervals(exclude), duration_minutes);
    match find_slot(&slots, time) {
        None => Err(AppointmentError::InvalidSlot),
        Some(slot) if !slot.is_available => Err(AppointmentError::SlotUnavailable),
        Some(_) => Ok(()),
    }
}

/// A lock wait that times out means someone else holds the doctor-day; the
/// client may retry.
pub(crate) fn lock_error(e: DatabaseError) -> AppointmentError {
    match e {
        DatabaseError::LockTimeout { .. } => AppointmentError::SlotUnavailable,
        other => AppointmentError::Database(other),
    }
}

pub(crate) fn availability_error(e: AvailabilityError) -> AppointmentError {
    match e {
        AvailabilityError::Database(db) => AppointmentError::Database(db),
        other => AppointmentError::Database(DatabaseError::Storage(other.to_string())),
    }
}

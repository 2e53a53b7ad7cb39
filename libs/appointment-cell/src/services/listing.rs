use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use doctor_cell::{AvailabilityService, ClinicAccess};
use shared_utils::Clock;

use crate::models::{Appointment, AppointmentError, AppointmentView, PatientAppointments};
use crate::services::calendar::CalendarStore;
use crate::services::directory::StaffDirectory;
use crate::services::lifecycle::BookingPolicy;

/// Read-side projections of appointments.
pub struct AppointmentQueries {
    calendar: Arc<dyn CalendarStore>,
    availability: Arc<AvailabilityService>,
    directory: Arc<StaffDirectory>,
    clock: Arc<dyn Clock>,
    policy: BookingPolicy,
}

impl AppointmentQueries {
    pub fn new(
        calendar: Arc<dyn CalendarStore>,
        availability: Arc<AvailabilityService>,
        directory: Arc<StaffDirectory>,
        clock: Arc<dyn Clock>,
        policy: BookingPolicy,
    ) -> Self {
        Self {
            calendar,
            availability,
            directory,
            clock,
            policy,
        }
    }

    pub async fn view(&self, appointment: &Appointment) -> Result<AppointmentView, AppointmentError> {
        let clinic = self.directory.clinic(appointment.clinic_id).await?;

        let appointment_type = match appointment.appointment_type_id {
            Some(type_id) => match self.availability.get_appointment_type(type_id).await {
                Ok(found) => found,
                Err(e) => {
                    warn!("Appointment type lookup for {} failed: {}", appointment.id, e);
                    None
                }
            },
            None => None,
        };

        let doctor_name = match appointment.doctor_id {
            Some(doctor_id) => self.directory.display_name(doctor_id).await,
            None => None,
        };

        Ok(AppointmentView {
            id: appointment.id,
            patient_id: appointment.patient_id,
            patient_name: self.directory.display_name(appointment.patient_id).await,
            doctor_id: appointment.doctor_id,
            doctor_name,
            clinic_id: appointment.clinic_id,
            clinic_name: clinic.as_ref().map(|c| c.name.clone()),
            clinic_address: clinic.and_then(|c| c.address),
            appointment_type_id: appointment.appointment_type_id,
            appointment_type_name: appointment_type.as_ref().map(|t| t.name.clone()),
            duration_minutes: appointment.duration_minutes,
            price: appointment_type.map(|t| t.price),
            date: appointment.date,
            time: appointment.time,
            status: appointment.status,
            reason: appointment.reason.clone(),
            patient_edit_count: appointment.patient_edit_count,
            edits_remaining: self.policy.edits_remaining(appointment),
            created_at: appointment.created_at,
            updated_at: appointment.updated_at,
        })
    }

    /// Visible to the patient, the assigned doctor and staff of the clinic.
    /// Everyone else gets `NotFound`.
    pub async fn detail(&self, appointment_id: Uuid, viewer_id: Uuid) -> Result<AppointmentView, AppointmentError> {
        let appointment = self
            .calendar
            .get(appointment_id)
            .await?
            .ok_or(AppointmentError::NotFound)?;

        let allowed = appointment.patient_id == viewer_id
            || appointment.doctor_id == Some(viewer_id)
            || self.directory.is_clinic_staff(appointment.clinic_id, viewer_id).await;
        if !allowed {
            debug!("User {} may not view appointment {}", viewer_id, appointment_id);
            return Err(AppointmentError::NotFound);
        }

        self.view(&appointment).await
    }

    /// Splits a patient's appointments into upcoming (open and not yet
    /// started, soonest first) and past (closed or already started, latest
    /// first). Totals are counted before the limits apply.
    pub async fn patient_appointments(
        &self,
        patient_id: Uuid,
        upcoming_limit: Option<usize>,
        past_limit: Option<usize>,
    ) -> Result<PatientAppointments, AppointmentError> {
        let now = self.clock.now_local();
        let (mut upcoming, mut past): (Vec<Appointment>, Vec<Appointment>) = self
            .calendar
            .patient_appointments(patient_id)
            .await?
            .into_iter()
            .partition(|a| !a.status.is_terminal() && a.starts_at() >= now);

        upcoming.sort_by_key(|a| a.starts_at());
        past.sort_by_key(|a| std::cmp::Reverse(a.starts_at()));

        let upcoming_total = upcoming.len();
        let past_total = past.len();
        upcoming.truncate(upcoming_limit.unwrap_or(usize::MAX));
        past.truncate(past_limit.unwrap_or(usize::MAX));

        let mut result = PatientAppointments {
            upcoming: Vec::with_capacity(upcoming.len()),
            upcoming_total,
            past: Vec::with_capacity(past.len()),
            past_total,
        };
        for appointment in &upcoming {
            result.upcoming.push(self.view(appointment).await?);
        }
        for appointment in &past {
            result.past.push(self.view(appointment).await?);
        }
        Ok(result)
    }
}

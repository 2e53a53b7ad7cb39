use crate::models::{AppointmentSnapshot, NotificationEventType};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M";

/// Title and body for an appointment event. Every channel uses this text.
pub fn build_message(event: NotificationEventType, appointment: &AppointmentSnapshot) -> (String, String) {
    let doctor = appointment
        .doctor_name
        .as_deref()
        .map(|name| format!("Dr. {}", name))
        .unwrap_or_else(|| "the doctor".to_string());
    let date = appointment.date.format(DATE_FORMAT);
    let time = appointment.time.format(TIME_FORMAT);
    let clinic = &appointment.clinic_name;

    match event {
        NotificationEventType::AppointmentCancelled => (
            "Your appointment was cancelled".to_string(),
            format!(
                "Your appointment with {} on {} at {} at {} has been cancelled.",
                doctor, date, time, clinic
            ),
        ),
        NotificationEventType::AppointmentCancelledByPatient => (
            "Appointment cancelled by patient".to_string(),
            format!(
                "{} cancelled the appointment with {} on {} at {} at {}.",
                appointment.patient_name, doctor, date, time, clinic
            ),
        ),
        NotificationEventType::AppointmentEdited => (
            "Appointment changed by patient".to_string(),
            format!(
                "{} moved the appointment with {}{} to {} at {} at {}.",
                appointment.patient_name,
                doctor,
                previously(appointment),
                date,
                time,
                clinic
            ),
        ),
        NotificationEventType::AppointmentRescheduled => (
            "Your appointment was rescheduled".to_string(),
            format!(
                "Your appointment with {}{} has been moved to {} at {} at {}.",
                doctor,
                previously(appointment),
                date,
                time,
                clinic
            ),
        ),
    }
}

fn previously(appointment: &AppointmentSnapshot) -> String {
    match (appointment.previous_date, appointment.previous_time) {
        (Some(date), Some(time)) => format!(
            " (previously {} at {})",
            date.format(DATE_FORMAT),
            time.format(TIME_FORMAT)
        ),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use uuid::Uuid;

    fn snapshot() -> AppointmentSnapshot {
        AppointmentSnapshot {
            appointment_id: Uuid::new_v4(),
            revision: 1,
            doctor_name: Some("Sara Haddad".to_string()),
            patient_name: "Omar Khalil".to_string(),
            clinic_name: "Old City Clinic".to_string(),
            date: NaiveDate::from_ymd_opt(2030, 1, 7).unwrap(),
            time: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            previous_date: None,
            previous_time: None,
        }
    }

    #[test]
    fn cancellation_names_doctor_date_time_and_clinic() {
        let (title, message) = build_message(NotificationEventType::AppointmentCancelled, &snapshot());
        assert_eq!(title, "Your appointment was cancelled");
        assert_eq!(
            message,
            "Your appointment with Dr. Sara Haddad on 2030-01-07 at 09:30 at Old City Clinic has been cancelled."
        );
    }

    #[test]
    fn missing_doctor_falls_back() {
        let mut s = snapshot();
        s.doctor_name = None;
        let (_, message) = build_message(NotificationEventType::AppointmentCancelled, &s);
        assert!(message.contains("with the doctor on"));
    }

    #[test]
    fn edits_mention_previous_slot() {
        let mut s = snapshot();
        s.previous_date = NaiveDate::from_ymd_opt(2030, 1, 6);
        s.previous_time = NaiveTime::from_hms_opt(11, 0, 0);
        let (_, message) = build_message(NotificationEventType::AppointmentEdited, &s);
        assert!(message.starts_with("Omar Khalil moved"));
        assert!(message.contains("(previously 2030-01-06 at 11:00)"));
        assert!(message.contains("to 2030-01-07 at 09:30"));
    }
}

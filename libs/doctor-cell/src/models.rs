use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use shared_database::DatabaseError;
use shared_models::time_format;

/// Day index used by availability blocks: 0 = Monday ... 6 = Sunday.
pub fn day_of_week(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_monday() as u8
}

pub fn day_name(day_of_week: u8) -> &'static str {
    match day_of_week {
        0 => "Monday",
        1 => "Tuesday",
        2 => "Wednesday",
        3 => "Thursday",
        4 => "Friday",
        5 => "Saturday",
        6 => "Sunday",
        _ => "Unknown",
    }
}

// ==============================================================================
// AVAILABILITY
// ==============================================================================

/// Recurring weekly window during which a doctor can be booked at one clinic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvailabilityBlock {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub clinic_id: Uuid,
    pub day_of_week: u8,
    #[serde(with = "time_format")]
    pub start_time: NaiveTime,
    #[serde(with = "time_format")]
    pub end_time: NaiveTime,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AvailabilityBlock {
    pub fn overlaps(&self, start: NaiveTime, end: NaiveTime) -> bool {
        self.start_time < end && self.end_time > start
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAvailabilityRequest {
    pub clinic_id: Uuid,
    pub day_of_week: u8,
    #[serde(with = "time_format")]
    pub start_time: NaiveTime,
    #[serde(with = "time_format")]
    pub end_time: NaiveTime,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAvailabilityRequest {
    pub day_of_week: Option<u8>,
    #[serde(default, with = "time_format::option")]
    pub start_time: Option<NaiveTime>,
    #[serde(default, with = "time_format::option")]
    pub end_time: Option<NaiveTime>,
    pub is_active: Option<bool>,
}

// ==============================================================================
// APPOINTMENT TYPES
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppointmentType {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub clinic_id: Uuid,
    pub name: String,
    pub duration_minutes: i32,
    pub price: f64,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAppointmentTypeRequest {
    pub clinic_id: Uuid,
    pub name: String,
    pub duration_minutes: i32,
    #[serde(default)]
    pub price: f64,
    pub description: Option<String>,
}

// ==============================================================================
// SLOTS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeSlot {
    #[serde(with = "time_format")]
    pub time: NaiveTime,
    #[serde(with = "time_format")]
    pub end_time: NaiveTime,
    pub is_available: bool,
}

/// An occupied stretch of a doctor's day. When the booking has no
/// appointment type the duration of the slot being generated is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookedInterval {
    pub start: NaiveTime,
    pub duration_minutes: Option<i32>,
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Error, Debug)]
pub enum AvailabilityError {
    #[error("End time must be after start time")]
    InvalidTimeRange,

    #[error("Day of week must be between 0 (Monday) and 6 (Sunday), got {0}")]
    InvalidDayOfWeek(u8),

    #[error("This time overlaps with an existing slot on {day}: {start}-{end} at this clinic")]
    OverlapsExistingBlock {
        day: &'static str,
        start: String,
        end: String,
    },

    #[error("Time conflict with another clinic schedule on {day}: {start}-{end}")]
    ConflictsWithOtherClinic {
        clinic_id: Uuid,
        day: &'static str,
        start: String,
        end: String,
    },

    #[error("An availability block already starts at this time for this clinic and day")]
    DuplicateBlock,

    #[error("Appointment type duration must be positive")]
    InvalidDuration,

    #[error("An appointment type with this name already exists for the doctor at this clinic")]
    DuplicateAppointmentType,

    #[error("Availability block not found")]
    BlockNotFound,

    #[error("Appointment type not found")]
    AppointmentTypeNotFound,

    #[error("Not allowed to manage this doctor's schedule")]
    Forbidden,

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weekday_index_starts_on_monday() {
        // 2030-01-07 is a Monday
        let monday = NaiveDate::from_ymd_opt(2030, 1, 7).unwrap();
        assert_eq!(day_of_week(monday), 0);
        assert_eq!(day_of_week(monday + chrono::Duration::days(6)), 6);
        assert_eq!(day_name(6), "Sunday");
    }

    #[test]
    fn availability_request_uses_hhmm() {
        let req: CreateAvailabilityRequest = serde_json::from_value(serde_json::json!({
            "clinic_id": Uuid::new_v4(),
            "day_of_week": 0,
            "start_time": "09:00",
            "end_time": "12:00"
        }))
        .unwrap();
        assert_eq!(req.start_time, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
    }
}

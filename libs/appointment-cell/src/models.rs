use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use doctor_cell::{AppointmentType, BookedInterval, TimeSlot};
use shared_database::DatabaseError;
use shared_models::time_format;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub clinic_id: Uuid,
    pub doctor_id: Option<Uuid>,
    pub appointment_type_id: Option<Uuid>,
    /// Copied from the appointment type when booked or edited.
    pub duration_minutes: Option<i32>,
    pub date: NaiveDate,
    #[serde(with = "time_format")]
    pub time: NaiveTime,
    pub status: AppointmentStatus,
    pub reason: Option<String>,
    pub patient_edit_count: u32,
    /// Bumped on every committed mutation.
    pub revision: u32,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.time)
    }

    pub fn booked_interval(&self) -> BookedInterval {
        BookedInterval {
            start: self.time,
            duration_minutes: self.duration_minutes,
        }
    }

    /// The doctor-day this appointment lives on. Unassigned appointments
    /// share the nil doctor's calendar.
    pub fn calendar_key(&self) -> CalendarKey {
        CalendarKey {
            doctor_id: self.doctor_id.unwrap_or_else(Uuid::nil),
            date: self.date,
        }
    }
}

/// Identifies one doctor's timeline on one date, across every clinic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CalendarKey {
    pub doctor_id: Uuid,
    pub date: NaiveDate,
}

impl CalendarKey {
    pub fn new(doctor_id: Uuid, date: NaiveDate) -> Self {
        Self { doctor_id, date }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    CheckedIn,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }

    /// Statuses whose interval blocks the doctor's calendar. Used by both the
    /// slot preview and the locked re-check.
    pub fn occupies_calendar(&self) -> bool {
        !matches!(self, AppointmentStatus::Cancelled | AppointmentStatus::NoShow)
    }

    /// Statuses a patient edit or staff reschedule may start from.
    pub fn is_editable(&self) -> bool {
        matches!(self, AppointmentStatus::Pending | AppointmentStatus::Confirmed)
    }

    pub fn valid_transitions(&self) -> &'static [AppointmentStatus] {
        use AppointmentStatus::*;
        match self {
            Pending => &[Confirmed, Cancelled, NoShow],
            Confirmed => &[CheckedIn, Cancelled, NoShow],
            CheckedIn => &[InProgress, Cancelled, NoShow],
            InProgress => &[Completed],
            Completed | Cancelled | NoShow => &[],
        }
    }

    pub fn can_transition_to(&self, target: AppointmentStatus) -> bool {
        self.valid_transitions().contains(&target)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AppointmentStatus::Pending => "PENDING",
            AppointmentStatus::Confirmed => "CONFIRMED",
            AppointmentStatus::CheckedIn => "CHECKED_IN",
            AppointmentStatus::InProgress => "IN_PROGRESS",
            AppointmentStatus::Completed => "COMPLETED",
            AppointmentStatus::Cancelled => "CANCELLED",
            AppointmentStatus::NoShow => "NO_SHOW",
        };
        f.write_str(s)
    }
}

impl FromStr for AppointmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(AppointmentStatus::Pending),
            "CONFIRMED" => Ok(AppointmentStatus::Confirmed),
            "CHECKED_IN" => Ok(AppointmentStatus::CheckedIn),
            "IN_PROGRESS" => Ok(AppointmentStatus::InProgress),
            "COMPLETED" => Ok(AppointmentStatus::Completed),
            "CANCELLED" => Ok(AppointmentStatus::Cancelled),
            "NO_SHOW" => Ok(AppointmentStatus::NoShow),
            other => Err(format!("unknown appointment status {:?}", other)),
        }
    }
}

// ==============================================================================
// DIRECTORY MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Clinic {
    pub id: Uuid,
    pub name: String,
    pub address: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StaffRole {
    Doctor,
    Secretary,
}

impl StaffRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            StaffRole::Doctor => "DOCTOR",
            StaffRole::Secretary => "SECRETARY",
        }
    }
}

impl FromStr for StaffRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DOCTOR" => Ok(StaffRole::Doctor),
            "SECRETARY" => Ok(StaffRole::Secretary),
            other => Err(format!("unknown staff role {:?}", other)),
        }
    }
}

/// Membership of a user in a clinic's staff.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClinicStaff {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub user_id: Uuid,
    pub role: StaffRole,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// Contact details of a user, as held by the directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    pub phone: Option<String>,
}

fn default_true() -> bool {
    true
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub doctor_id: Uuid,
    pub clinic_id: Uuid,
    pub appointment_type_id: Uuid,
    pub date: NaiveDate,
    #[serde(with = "time_format")]
    pub time: NaiveTime,
    pub reason: Option<String>,
}

/// New date and time for an existing appointment. Used by patient edits and
/// staff reschedules alike; the doctor never changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeScheduleRequest {
    pub date: NaiveDate,
    #[serde(with = "time_format")]
    pub time: NaiveTime,
    pub appointment_type_id: Option<Uuid>,
    pub reason: Option<String>,
}

// ==============================================================================
// RESPONSE MODELS
// ==============================================================================

/// Appointment joined with the names of everything it references.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppointmentView {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub patient_name: Option<String>,
    pub doctor_id: Option<Uuid>,
    pub doctor_name: Option<String>,
    pub clinic_id: Uuid,
    pub clinic_name: Option<String>,
    pub clinic_address: Option<String>,
    pub appointment_type_id: Option<Uuid>,
    pub appointment_type_name: Option<String>,
    pub duration_minutes: Option<i32>,
    pub price: Option<f64>,
    pub date: NaiveDate,
    #[serde(with = "time_format")]
    pub time: NaiveTime,
    pub status: AppointmentStatus,
    pub reason: Option<String>,
    pub patient_edit_count: u32,
    pub edits_remaining: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotQueryResult {
    pub date: NaiveDate,
    pub day_of_week: u8,
    pub doctor_id: Uuid,
    pub clinic_id: Uuid,
    pub appointment_type: AppointmentType,
    pub duration_minutes: i32,
    pub results: Vec<TimeSlot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientAppointments {
    pub upcoming: Vec<AppointmentView>,
    pub upcoming_total: usize,
    pub past: Vec<AppointmentView>,
    pub past_total: usize,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

/// A lifecycle rule that forbids the requested action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyViolation {
    AppointmentClosed(AppointmentStatus),
    EditLimitReached { max: u32 },
    WithinCancellationWindow { hours: i64 },
    ClinicMismatch,
    NotEditable(AppointmentStatus),
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
}

impl PolicyViolation {
    pub fn reason_code(&self) -> &'static str {
        match self {
            PolicyViolation::AppointmentClosed(_) => "appointment_closed",
            PolicyViolation::EditLimitReached { .. } => "edit_limit_reached",
            PolicyViolation::WithinCancellationWindow { .. } => "within_cancellation_window",
            PolicyViolation::ClinicMismatch => "clinic_mismatch",
            PolicyViolation::NotEditable(_) => "not_editable",
            PolicyViolation::InvalidTransition { .. } => "invalid_transition",
        }
    }
}

impl fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyViolation::AppointmentClosed(status) => {
                write!(f, "Appointment already closed ({})", status)
            }
            PolicyViolation::EditLimitReached { max } => {
                write!(f, "This appointment has already been edited {} times", max)
            }
            PolicyViolation::WithinCancellationWindow { hours } => write!(
                f,
                "Appointments cannot be changed less than {} hours before they start",
                hours
            ),
            PolicyViolation::ClinicMismatch => f.write_str("Appointment belongs to another clinic"),
            PolicyViolation::NotEditable(status) => {
                write!(f, "Appointments in status {} cannot be edited", status)
            }
            PolicyViolation::InvalidTransition { from, to } => {
                write!(f, "Cannot move appointment from {} to {}", from, to)
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum AppointmentError {
    #[error("Cannot book an appointment in the past")]
    PastDate,

    #[error("Requested time does not match an available slot")]
    InvalidSlot,

    #[error("This slot is no longer available")]
    SlotUnavailable,

    #[error("Clinic does not exist or is inactive")]
    InvalidClinic,

    #[error("Appointment type does not exist for this doctor and clinic")]
    InvalidAppointmentType,

    #[error("Appointment not found")]
    NotFound,

    #[error("Cannot perform this action: {0}")]
    NotAllowed(PolicyViolation),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl AppointmentError {
    /// Stable machine-readable code; clients switch on this, not the message.
    pub fn code(&self) -> &'static str {
        match self {
            AppointmentError::PastDate => "past_date",
            AppointmentError::InvalidSlot => "invalid_slot",
            AppointmentError::SlotUnavailable => "slot_unavailable",
            AppointmentError::InvalidClinic => "invalid_clinic",
            AppointmentError::InvalidAppointmentType => "invalid_appointment_type",
            AppointmentError::NotFound => "not_found",
            AppointmentError::NotAllowed(_) => "action_not_allowed",
            AppointmentError::Database(_) => "storage_error",
        }
    }

    pub fn policy(&self) -> Option<&PolicyViolation> {
        match self {
            AppointmentError::NotAllowed(violation) => Some(violation),
            _ => None,
        }
    }
}

impl From<PolicyViolation> for AppointmentError {
    fn from(violation: PolicyViolation) -> Self {
        AppointmentError::NotAllowed(violation)
    }
}

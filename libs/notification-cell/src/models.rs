use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEventType {
    /// Staff cancelled; sent to the patient.
    AppointmentCancelled,
    /// Patient cancelled; sent to the doctor and secretaries.
    AppointmentCancelledByPatient,
    /// Patient edited; sent to the doctor and secretaries.
    AppointmentEdited,
    /// Staff moved the appointment; sent to the patient.
    AppointmentRescheduled,
}

impl NotificationEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationEventType::AppointmentCancelled => "appointment_cancelled",
            NotificationEventType::AppointmentCancelledByPatient => "appointment_cancelled_by_patient",
            NotificationEventType::AppointmentEdited => "appointment_edited",
            NotificationEventType::AppointmentRescheduled => "appointment_rescheduled",
        }
    }
}

impl FromStr for NotificationEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "appointment_cancelled" => Ok(NotificationEventType::AppointmentCancelled),
            "appointment_cancelled_by_patient" => Ok(NotificationEventType::AppointmentCancelledByPatient),
            "appointment_edited" => Ok(NotificationEventType::AppointmentEdited),
            "appointment_rescheduled" => Ok(NotificationEventType::AppointmentRescheduled),
            other => Err(format!("unknown notification event: {}", other)),
        }
    }
}

impl fmt::Display for NotificationEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppointmentNotification {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub appointment_revision: u32,
    pub event_type: NotificationEventType,
    pub title: String,
    pub message: String,
    pub triggering_staff_id: Option<Uuid>,
    pub is_read: bool,
    pub is_delivered: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub recipient_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub appointment_revision: u32,
    pub event_type: NotificationEventType,
    pub title: String,
    pub message: String,
    pub triggering_staff_id: Option<Uuid>,
}

/// Contact details of a notification recipient.
#[derive(Debug, Clone, PartialEq)]
pub struct Recipient {
    pub user_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub phone: Option<String>,
}

impl Recipient {
    pub fn verified_email(&self) -> Option<&str> {
        self.email
            .as_deref()
            .filter(|e| self.email_verified && !e.trim().is_empty())
    }
}

/// The committed appointment state a notification describes.
#[derive(Debug, Clone, PartialEq)]
pub struct AppointmentSnapshot {
    pub appointment_id: Uuid,
    pub revision: u32,
    pub doctor_name: Option<String>,
    pub patient_name: String,
    pub clinic_name: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub previous_date: Option<NaiveDate>,
    pub previous_time: Option<NaiveTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSet {
    pub email: bool,
    pub sms: bool,
}

impl ChannelSet {
    pub fn in_app_only() -> Self {
        Self {
            email: false,
            sms: false,
        }
    }

    pub fn all() -> Self {
        Self {
            email: true,
            sms: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotificationRequest {
    pub event_type: NotificationEventType,
    pub appointment: AppointmentSnapshot,
    pub recipients: Vec<Recipient>,
    pub channels: ChannelSet,
    pub triggered_by: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub in_app_created: usize,
    pub in_app_duplicates: usize,
    pub emails_sent: usize,
    pub sms_sent: usize,
    pub failures: usize,
}

impl DispatchReport {
    pub fn absorb(&mut self, other: DispatchReport) {
        self.in_app_created += other.in_app_created;
        self.in_app_duplicates += other.in_app_duplicates;
        self.emails_sent += other.emails_sent;
        self.sms_sent += other.sms_sent;
        self.failures += other.failures;
    }
}

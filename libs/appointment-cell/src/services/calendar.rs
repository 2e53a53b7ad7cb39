//! The doctor calendar aggregate and its transactional store.
//!
//! A doctor's appointments on one date, across every clinic, form a single
//! shared resource. Writers lock the whole doctor-day, re-read it under the
//! lock and only then stage their change.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use doctor_cell::BookedInterval;
use shared_database::{DatabaseError, RowLockGuard, RowLockManager};

use crate::models::{Appointment, CalendarKey};

pub const APPOINTMENT_PKEY: &str = "appointments_pkey";

/// One doctor's appointments on one date.
#[derive(Debug, Clone)]
pub struct DoctorCalendar {
    pub key: CalendarKey,
    pub appointments: Vec<Appointment>,
}

impl DoctorCalendar {
    /// Appointments holding time on the calendar, optionally ignoring one
    /// appointment (an edit never conflicts with its own slot).
    pub fn occupying(&self, exclude: Option<Uuid>) -> impl Iterator<Item = &Appointment> {
        self.appointments
            .iter()
            .filter(move |a| a.status.occupies_calendar() && Some(a.id) != exclude)
    }

    pub fn booked_intervals(&self, exclude: Option<Uuid>) -> Vec<BookedInterval> {
        self.occupying(exclude).map(Appointment::booked_interval).collect()
    }
}

/// Appointment storage. Reads outside a transaction are unlocked snapshots
/// and only good for fast-fail previews.
#[async_trait]
pub trait CalendarStore: Send + Sync {
    async fn get(&self, appointment_id: Uuid) -> Result<Option<Appointment>, DatabaseError>;

    async fn calendar(&self, key: CalendarKey) -> Result<DoctorCalendar, DatabaseError>;

    async fn patient_appointments(&self, patient_id: Uuid) -> Result<Vec<Appointment>, DatabaseError>;

    /// Opens a transaction holding exclusive locks on every key.
    async fn begin(&self, keys: Vec<CalendarKey>) -> Result<Box<dyn CalendarTransaction>, DatabaseError>;
}

/// Writes are staged and become visible to others only on `commit`.
/// Dropping the transaction discards them and releases the locks.
#[async_trait]
pub trait CalendarTransaction: Send + Sync {
    fn holds(&self, key: &CalendarKey) -> bool;

    async fn get(&self, appointment_id: Uuid) -> Result<Option<Appointment>, DatabaseError>;

    /// Reads a locked doctor-day including this transaction's staged writes.
    async fn calendar(&self, key: CalendarKey) -> Result<DoctorCalendar, DatabaseError>;

    async fn insert(&mut self, appointment: Appointment) -> Result<(), DatabaseError>;

    async fn update(&mut self, appointment: Appointment) -> Result<(), DatabaseError>;

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError>;
}

type Rows = Arc<RwLock<HashMap<Uuid, Appointment>>>;

/// Process-local calendar for tests and tooling. Its locks only coordinate
/// callers sharing this instance.
pub struct InMemoryCalendarStore {
    rows: Rows,
    locks: Arc<RowLockManager<CalendarKey>>,
}

impl InMemoryCalendarStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            rows: Arc::new(RwLock::new(HashMap::new())),
            locks: Arc::new(RowLockManager::new(lock_timeout)),
        }
    }
}

fn collect_calendar<'a>(key: CalendarKey, rows: impl Iterator<Item = &'a Appointment>) -> DoctorCalendar {
    let mut appointments: Vec<Appointment> = rows.filter(|a| a.calendar_key() == key).cloned().collect();
    appointments.sort_by_key(|a| (a.time, a.created_at));
    DoctorCalendar { key, appointments }
}

#[async_trait]
impl CalendarStore for InMemoryCalendarStore {
    async fn get(&self, appointment_id: Uuid) -> Result<Option<Appointment>, DatabaseError> {
        Ok(self.rows.read().await.get(&appointment_id).cloned())
    }

    async fn calendar(&self, key: CalendarKey) -> Result<DoctorCalendar, DatabaseError> {
        let rows = self.rows.read().await;
        Ok(collect_calendar(key, rows.values()))
    }

    async fn patient_appointments(&self, patient_id: Uuid) -> Result<Vec<Appointment>, DatabaseError> {
        let rows = self.rows.read().await;
        Ok(rows.values().filter(|a| a.patient_id == patient_id).cloned().collect())
    }

    async fn begin(&self, keys: Vec<CalendarKey>) -> Result<Box<dyn CalendarTransaction>, DatabaseError> {
        let guards = self.locks.acquire_many(keys).await?;
        debug!("Calendar transaction opened on {} doctor-day(s)", guards.len());

        Ok(Box::new(InMemoryCalendarTransaction {
            rows: Arc::clone(&self.rows),
            guards,
            staged: HashMap::new(),
        }))
    }
}

struct InMemoryCalendarTransaction {
    rows: Rows,
    guards: Vec<RowLockGuard<CalendarKey>>,
    staged: HashMap<Uuid, Appointment>,
}

impl InMemoryCalendarTransaction {
    fn ensure_locked(&self, key: &CalendarKey) -> Result<(), DatabaseError> {
        if self.holds(key) {
            Ok(())
        } else {
            Err(DatabaseError::NotLocked(format!(
                "doctor {} on {}",
                key.doctor_id, key.date
            )))
        }
    }
}

#[async_trait]
impl CalendarTransaction for InMemoryCalendarTransaction {
    fn holds(&self, key: &CalendarKey) -> bool {
        self.guards.iter().any(|g| g.key() == key)
    }

    async fn get(&self, appointment_id: Uuid) -> Result<Option<Appointment>, DatabaseError> {
        if let Some(staged) = self.staged.get(&appointment_id) {
            return Ok(Some(staged.clone()));
        }
        Ok(self.rows.read().await.get(&appointment_id).cloned())
    }

    async fn calendar(&self, key: CalendarKey) -> Result<DoctorCalendar, DatabaseError> {
        self.ensure_locked(&key)?;

        let rows = self.rows.read().await;
        let merged = rows
            .values()
            .filter(|a| !self.staged.contains_key(&a.id))
            .chain(self.staged.values());
        Ok(collect_calendar(key, merged))
    }

    async fn insert(&mut self, appointment: Appointment) -> Result<(), DatabaseError> {
        self.ensure_locked(&appointment.calendar_key())?;
        if self.get(appointment.id).await?.is_some() {
            return Err(DatabaseError::UniqueViolation {
                constraint: APPOINTMENT_PKEY.to_string(),
            });
        }
        self.staged.insert(appointment.id, appointment);
        Ok(())
    }

    async fn update(&mut self, appointment: Appointment) -> Result<(), DatabaseError> {
        let current = self
            .get(appointment.id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("appointment {}", appointment.id)))?;

        // Both the day it leaves and the day it lands on must be locked.
        self.ensure_locked(&current.calendar_key())?;
        self.ensure_locked(&appointment.calendar_key())?;

        self.staged.insert(appointment.id, appointment);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError> {
        let InMemoryCalendarTransaction { rows, guards, staged } = *self;

        {
            let mut rows = rows.write().await;
            for (id, appointment) in staged {
                rows.insert(id, appointment);
            }
        }

        debug!("Calendar transaction committed; releasing {} lock(s)", guards.len());
        drop(guards);
        Ok(())
    }
}

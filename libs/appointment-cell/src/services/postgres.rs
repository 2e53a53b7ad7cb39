//! Postgres-backed calendar and directory storage.
//!
//! A calendar transaction locks one `calendar_days` row per doctor-day it
//! touches, in key order, before reading or writing that day. Lock waits are
//! bounded by `SET LOCAL lock_timeout`, so every replica sharing the
//! database serialises on the same rows.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::{FromRow, Postgres, Transaction};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use shared_database::{begin_with_lock_timeout, DatabaseError};

use crate::models::{Appointment, CalendarKey, Clinic, ClinicStaff, UserProfile};
use crate::services::calendar::{CalendarStore, CalendarTransaction, DoctorCalendar};
use crate::services::directory::DirectoryRepository;

macro_rules! select_appointments {
    ($tail:literal) => {
        concat!(
            r#"SELECT id, patient_id, clinic_id, doctor_id, appointment_type_id, duration_minutes,
                      "date", "time", status, reason, patient_edit_count, revision,
                      created_by, created_at, updated_at
               FROM appointments "#,
            $tail
        )
    };
}

#[derive(FromRow)]
struct AppointmentRow {
    id: Uuid,
    patient_id: Uuid,
    clinic_id: Uuid,
    doctor_id: Option<Uuid>,
    appointment_type_id: Option<Uuid>,
    duration_minutes: Option<i32>,
    date: NaiveDate,
    time: NaiveTime,
    status: String,
    reason: Option<String>,
    patient_edit_count: i64,
    revision: i64,
    created_by: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AppointmentRow> for Appointment {
    type Error = DatabaseError;

    fn try_from(row: AppointmentRow) -> Result<Self, Self::Error> {
        let corrupt = |what: &str| DatabaseError::Storage(format!("appointment {}: invalid {}", row.id, what));

        Ok(Appointment {
            id: row.id,
            patient_id: row.patient_id,
            clinic_id: row.clinic_id,
            doctor_id: row.doctor_id,
            appointment_type_id: row.appointment_type_id,
            duration_minutes: row.duration_minutes,
            date: row.date,
            time: row.time,
            status: row.status.parse().map_err(|_| corrupt("status"))?,
            reason: row.reason,
            patient_edit_count: u32::try_from(row.patient_edit_count)
                .map_err(|_| corrupt("patient_edit_count"))?,
            revision: u32::try_from(row.revision).map_err(|_| corrupt("revision"))?,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_appointments(rows: Vec<AppointmentRow>) -> Result<Vec<Appointment>, DatabaseError> {
    rows.into_iter().map(Appointment::try_from).collect()
}

fn calendar_resource(key: &CalendarKey) -> String {
    format!("doctor {} on {}", key.doctor_id, key.date)
}

pub struct PgCalendarStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgCalendarStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }
}

#[async_trait]
impl CalendarStore for PgCalendarStore {
    async fn get(&self, appointment_id: Uuid) -> Result<Option<Appointment>, DatabaseError> {
        let row = sqlx::query_as::<_, AppointmentRow>(select_appointments!("WHERE id = $1"))
            .bind(appointment_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Appointment::try_from).transpose()
    }

    async fn calendar(&self, key: CalendarKey) -> Result<DoctorCalendar, DatabaseError> {
        // Unassigned appointments live on the nil doctor's calendar.
        let rows = sqlx::query_as::<_, AppointmentRow>(select_appointments!(
            r#"WHERE COALESCE(doctor_id, '00000000-0000-0000-0000-000000000000'::uuid) = $1 AND "date" = $2
               ORDER BY "time", created_at"#
        ))
        .bind(key.doctor_id)
        .bind(key.date)
        .fetch_all(&self.pool)
        .await?;

        Ok(DoctorCalendar {
            key,
            appointments: into_appointments(rows)?,
        })
    }

    async fn patient_appointments(&self, patient_id: Uuid) -> Result<Vec<Appointment>, DatabaseError> {
        let rows = sqlx::query_as::<_, AppointmentRow>(select_appointments!(
            r#"WHERE patient_id = $1 ORDER BY "date", "time""#
        ))
        .bind(patient_id)
        .fetch_all(&self.pool)
        .await?;

        into_appointments(rows)
    }

    async fn begin(&self, keys: Vec<CalendarKey>) -> Result<Box<dyn CalendarTransaction>, DatabaseError> {
        let mut keys = keys;
        keys.sort();
        keys.dedup();

        let mut tx = begin_with_lock_timeout(&self.pool, self.lock_timeout).await?;

        for key in &keys {
            let resource = calendar_resource(key);

            sqlx::query(r#"INSERT INTO calendar_days (doctor_id, "date") VALUES ($1, $2) ON CONFLICT DO NOTHING"#)
                .bind(key.doctor_id)
                .bind(key.date)
                .execute(&mut *tx)
                .await
                .map_err(|e| DatabaseError::from(e).on_resource(&resource))?;

            sqlx::query(r#"SELECT doctor_id FROM calendar_days WHERE doctor_id = $1 AND "date" = $2 FOR UPDATE"#)
                .bind(key.doctor_id)
                .bind(key.date)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| DatabaseError::from(e).on_resource(&resource))?;
        }

        debug!("Calendar transaction opened on {} doctor-day(s)", keys.len());
        Ok(Box::new(PgCalendarTransaction {
            tx: Mutex::new(tx),
            keys,
        }))
    }
}

struct PgCalendarTransaction {
    tx: Mutex<Transaction<'static, Postgres>>,
    keys: Vec<CalendarKey>,
}

impl PgCalendarTransaction {
    fn ensure_locked(&self, key: &CalendarKey) -> Result<(), DatabaseError> {
        if self.holds(key) {
            Ok(())
        } else {
            Err(DatabaseError::NotLocked(calendar_resource(key)))
        }
    }
}

#[async_trait]
impl CalendarTransaction for PgCalendarTransaction {
    fn holds(&self, key: &CalendarKey) -> bool {
        self.keys.contains(key)
    }

    async fn get(&self, appointment_id: Uuid) -> Result<Option<Appointment>, DatabaseError> {
        let mut tx = self.tx.lock().await;
        let row = sqlx::query_as::<_, AppointmentRow>(select_appointments!("WHERE id = $1"))
            .bind(appointment_id)
            .fetch_optional(&mut **tx)
            .await?;

        row.map(Appointment::try_from).transpose()
    }

    async fn calendar(&self, key: CalendarKey) -> Result<DoctorCalendar, DatabaseError> {
        self.ensure_locked(&key)?;

        let mut tx = self.tx.lock().await;
        let rows = sqlx::query_as::<_, AppointmentRow>(select_appointments!(
            r#"WHERE COALESCE(doctor_id, '00000000-0000-0000-0000-000000000000'::uuid) = $1 AND "date" = $2
               ORDER BY "time", created_at
               FOR UPDATE"#
        ))
        .bind(key.doctor_id)
        .bind(key.date)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| DatabaseError::from(e).on_resource(calendar_resource(&key)))?;

        Ok(DoctorCalendar {
            key,
            appointments: into_appointments(rows)?,
        })
    }

    async fn insert(&mut self, appointment: Appointment) -> Result<(), DatabaseError> {
        self.ensure_locked(&appointment.calendar_key())?;

        let tx = self.tx.get_mut();
        sqlx::query(
            r#"
            INSERT INTO appointments (
              id, patient_id, clinic_id, doctor_id, appointment_type_id, duration_minutes,
              "date", "time", status, reason, patient_edit_count, revision,
              created_by, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(appointment.id)
        .bind(appointment.patient_id)
        .bind(appointment.clinic_id)
        .bind(appointment.doctor_id)
        .bind(appointment.appointment_type_id)
        .bind(appointment.duration_minutes)
        .bind(appointment.date)
        .bind(appointment.time)
        .bind(appointment.status.to_string())
        .bind(&appointment.reason)
        .bind(i64::from(appointment.patient_edit_count))
        .bind(i64::from(appointment.revision))
        .bind(appointment.created_by)
        .bind(appointment.created_at)
        .bind(appointment.updated_at)
        .execute(&mut **tx)
        .await?;

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

        let tx = self.tx.get_mut();
        sqlx::query(
            r#"
            UPDATE appointments
            SET appointment_type_id = $2, duration_minutes = $3, "date" = $4, "time" = $5,
                status = $6, reason = $7, patient_edit_count = $8, revision = $9,
                updated_at = $10
            WHERE id = $1
            "#,
        )
        .bind(appointment.id)
        .bind(appointment.appointment_type_id)
        .bind(appointment.duration_minutes)
        .bind(appointment.date)
        .bind(appointment.time)
        .bind(appointment.status.to_string())
        .bind(&appointment.reason)
        .bind(i64::from(appointment.patient_edit_count))
        .bind(i64::from(appointment.revision))
        .bind(appointment.updated_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError> {
        let PgCalendarTransaction { tx, keys } = *self;
        tx.into_inner().commit().await?;
        debug!("Calendar transaction committed; released {} doctor-day(s)", keys.len());
        Ok(())
    }
}

#[derive(FromRow)]
struct StaffRow {
    id: Uuid,
    clinic_id: Uuid,
    user_id: Uuid,
    role: String,
    is_active: bool,
}

impl TryFrom<StaffRow> for ClinicStaff {
    type Error = DatabaseError;

    fn try_from(row: StaffRow) -> Result<Self, Self::Error> {
        Ok(ClinicStaff {
            id: row.id,
            clinic_id: row.clinic_id,
            user_id: row.user_id,
            role: row.role.parse().map_err(DatabaseError::Storage)?,
            is_active: row.is_active,
        })
    }
}

pub struct PgDirectoryRepository {
    pool: PgPool,
}

impl PgDirectoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DirectoryRepository for PgDirectoryRepository {
    async fn insert_clinic(&self, clinic: Clinic) -> Result<Clinic, DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO clinics (id, name, address, is_active)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name, address = EXCLUDED.address, is_active = EXCLUDED.is_active
            "#,
        )
        .bind(clinic.id)
        .bind(&clinic.name)
        .bind(&clinic.address)
        .bind(clinic.is_active)
        .execute(&self.pool)
        .await?;

        Ok(clinic)
    }

    async fn get_clinic(&self, clinic_id: Uuid) -> Result<Option<Clinic>, DatabaseError> {
        let row = sqlx::query_as::<_, (Uuid, String, Option<String>, bool)>(
            "SELECT id, name, address, is_active FROM clinics WHERE id = $1",
        )
        .bind(clinic_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, name, address, is_active)| Clinic {
            id,
            name,
            address,
            is_active,
        }))
    }

    async fn upsert_user(&self, user: UserProfile) -> Result<UserProfile, DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, name, email, email_verified, phone)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name, email = EXCLUDED.email,
                email_verified = EXCLUDED.email_verified, phone = EXCLUDED.phone
            "#,
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.email_verified)
        .bind(&user.phone)
        .execute(&self.pool)
        .await?;

        Ok(user)
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<UserProfile>, DatabaseError> {
        let row = sqlx::query_as::<_, (Uuid, String, Option<String>, bool, Option<String>)>(
            "SELECT id, name, email, email_verified, phone FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, name, email, email_verified, phone)| UserProfile {
            id,
            name,
            email,
            email_verified,
            phone,
        }))
    }

    async fn insert_staff(&self, staff: ClinicStaff) -> Result<ClinicStaff, DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO clinic_staff (id, clinic_id, user_id, role, is_active)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(staff.id)
        .bind(staff.clinic_id)
        .bind(staff.user_id)
        .bind(staff.role.as_str())
        .bind(staff.is_active)
        .execute(&self.pool)
        .await?;

        Ok(staff)
    }

    async fn clinic_staff(&self, clinic_id: Uuid) -> Result<Vec<ClinicStaff>, DatabaseError> {
        let rows = sqlx::query_as::<_, StaffRow>(
            r#"
            SELECT id, clinic_id, user_id, role, is_active
            FROM clinic_staff
            WHERE clinic_id = $1
            ORDER BY role, user_id
            "#,
        )
        .bind(clinic_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ClinicStaff::try_from).collect()
    }
}

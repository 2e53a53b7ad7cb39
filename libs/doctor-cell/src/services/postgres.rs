//! Postgres-backed schedule storage.
//!
//! Schedule writers serialise on the doctor's row in `schedule_locks`, which
//! also covers doctors with no blocks yet.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::{FromRow, Postgres, Transaction};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use shared_database::{begin_with_lock_timeout, DatabaseError};

use crate::models::{AppointmentType, AvailabilityBlock};
use crate::services::store::{not_locked, ScheduleRepository, ScheduleTransaction};

#[derive(FromRow)]
struct BlockRow {
    id: Uuid,
    doctor_id: Uuid,
    clinic_id: Uuid,
    day_of_week: i16,
    start_time: NaiveTime,
    end_time: NaiveTime,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BlockRow> for AvailabilityBlock {
    type Error = DatabaseError;

    fn try_from(row: BlockRow) -> Result<Self, Self::Error> {
        let day_of_week = u8::try_from(row.day_of_week)
            .map_err(|_| DatabaseError::Storage(format!("invalid day_of_week {}", row.day_of_week)))?;

        Ok(AvailabilityBlock {
            id: row.id,
            doctor_id: row.doctor_id,
            clinic_id: row.clinic_id,
            day_of_week,
            start_time: row.start_time,
            end_time: row.end_time,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_blocks(rows: Vec<BlockRow>) -> Result<Vec<AvailabilityBlock>, DatabaseError> {
    rows.into_iter().map(AvailabilityBlock::try_from).collect()
}

#[derive(FromRow)]
struct TypeRow {
    id: Uuid,
    doctor_id: Uuid,
    clinic_id: Uuid,
    name: String,
    duration_minutes: i32,
    price: f64,
    description: Option<String>,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl From<TypeRow> for AppointmentType {
    fn from(row: TypeRow) -> Self {
        AppointmentType {
            id: row.id,
            doctor_id: row.doctor_id,
            clinic_id: row.clinic_id,
            name: row.name,
            duration_minutes: row.duration_minutes,
            price: row.price,
            description: row.description,
            is_active: row.is_active,
            created_at: row.created_at,
        }
    }
}

pub struct PgScheduleRepository {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgScheduleRepository {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }
}

#[async_trait]
impl ScheduleRepository for PgScheduleRepository {
    async fn lock_doctor(&self, doctor_id: Uuid) -> Result<Box<dyn ScheduleTransaction>, DatabaseError> {
        let resource = format!("schedule of doctor {}", doctor_id);
        let mut tx = begin_with_lock_timeout(&self.pool, self.lock_timeout).await?;

        sqlx::query("INSERT INTO schedule_locks (doctor_id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(doctor_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| DatabaseError::from(e).on_resource(&resource))?;

        sqlx::query("SELECT doctor_id FROM schedule_locks WHERE doctor_id = $1 FOR UPDATE")
            .bind(doctor_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| DatabaseError::from(e).on_resource(&resource))?;

        debug!("Locked {}", resource);
        Ok(Box::new(PgScheduleTransaction {
            tx: Mutex::new(tx),
            doctor_id,
        }))
    }

    async fn get_block(&self, block_id: Uuid) -> Result<Option<AvailabilityBlock>, DatabaseError> {
        let row = sqlx::query_as::<_, BlockRow>(
            r#"
            SELECT id, doctor_id, clinic_id, day_of_week, start_time, end_time,
                   is_active, created_at, updated_at
            FROM availability_blocks
            WHERE id = $1
            "#,
        )
        .bind(block_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(AvailabilityBlock::try_from).transpose()
    }

    async fn doctor_blocks(&self, doctor_id: Uuid) -> Result<Vec<AvailabilityBlock>, DatabaseError> {
        let rows = sqlx::query_as::<_, BlockRow>(
            r#"
            SELECT id, doctor_id, clinic_id, day_of_week, start_time, end_time,
                   is_active, created_at, updated_at
            FROM availability_blocks
            WHERE doctor_id = $1
            ORDER BY day_of_week, start_time
            "#,
        )
        .bind(doctor_id)
        .fetch_all(&self.pool)
        .await?;

        into_blocks(rows)
    }

    async fn insert_type(&self, appointment_type: AppointmentType) -> Result<AppointmentType, DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO appointment_types (
              id, doctor_id, clinic_id, name, duration_minutes, price,
              description, is_active, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(appointment_type.id)
        .bind(appointment_type.doctor_id)
        .bind(appointment_type.clinic_id)
        .bind(&appointment_type.name)
        .bind(appointment_type.duration_minutes)
        .bind(appointment_type.price)
        .bind(&appointment_type.description)
        .bind(appointment_type.is_active)
        .bind(appointment_type.created_at)
        .execute(&self.pool)
        .await?;

        Ok(appointment_type)
    }

    async fn get_type(&self, type_id: Uuid) -> Result<Option<AppointmentType>, DatabaseError> {
        let row = sqlx::query_as::<_, TypeRow>(
            r#"
            SELECT id, doctor_id, clinic_id, name, duration_minutes, price,
                   description, is_active, created_at
            FROM appointment_types
            WHERE id = $1
            "#,
        )
        .bind(type_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(AppointmentType::from))
    }

    async fn doctor_types(&self, doctor_id: Uuid, clinic_id: Uuid) -> Result<Vec<AppointmentType>, DatabaseError> {
        let rows = sqlx::query_as::<_, TypeRow>(
            r#"
            SELECT id, doctor_id, clinic_id, name, duration_minutes, price,
                   description, is_active, created_at
            FROM appointment_types
            WHERE doctor_id = $1 AND clinic_id = $2
            ORDER BY name
            "#,
        )
        .bind(doctor_id)
        .bind(clinic_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(AppointmentType::from).collect())
    }
}

struct PgScheduleTransaction {
    tx: Mutex<Transaction<'static, Postgres>>,
    doctor_id: Uuid,
}

#[async_trait]
impl ScheduleTransaction for PgScheduleTransaction {
    fn doctor_id(&self) -> Uuid {
        self.doctor_id
    }

    async fn blocks(&self) -> Result<Vec<AvailabilityBlock>, DatabaseError> {
        let mut tx = self.tx.lock().await;
        let rows = sqlx::query_as::<_, BlockRow>(
            r#"
            SELECT id, doctor_id, clinic_id, day_of_week, start_time, end_time,
                   is_active, created_at, updated_at
            FROM availability_blocks
            WHERE doctor_id = $1
            ORDER BY day_of_week, start_time
            "#,
        )
        .bind(self.doctor_id)
        .fetch_all(&mut **tx)
        .await?;

        into_blocks(rows)
    }

    async fn insert_block(&mut self, block: AvailabilityBlock) -> Result<AvailabilityBlock, DatabaseError> {
        if block.doctor_id != self.doctor_id {
            return Err(not_locked(self.doctor_id, &block));
        }

        let tx = self.tx.get_mut();
        sqlx::query(
            r#"
            INSERT INTO availability_blocks (
              id, doctor_id, clinic_id, day_of_week, start_time, end_time,
              is_active, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(block.id)
        .bind(block.doctor_id)
        .bind(block.clinic_id)
        .bind(i16::from(block.day_of_week))
        .bind(block.start_time)
        .bind(block.end_time)
        .bind(block.is_active)
        .bind(block.created_at)
        .bind(block.updated_at)
        .execute(&mut **tx)
        .await?;

        Ok(block)
    }

    async fn update_block(&mut self, block: AvailabilityBlock) -> Result<AvailabilityBlock, DatabaseError> {
        if block.doctor_id != self.doctor_id {
            return Err(not_locked(self.doctor_id, &block));
        }

        let tx = self.tx.get_mut();
        let result = sqlx::query(
            r#"
            UPDATE availability_blocks
            SET day_of_week = $3, start_time = $4, end_time = $5,
                is_active = $6, updated_at = $7
            WHERE id = $1 AND doctor_id = $2
            "#,
        )
        .bind(block.id)
        .bind(block.doctor_id)
        .bind(i16::from(block.day_of_week))
        .bind(block.start_time)
        .bind(block.end_time)
        .bind(block.is_active)
        .bind(block.updated_at)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("availability block {}", block.id)));
        }
        Ok(block)
    }

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError> {
        self.tx.into_inner().commit().await?;
        Ok(())
    }
}

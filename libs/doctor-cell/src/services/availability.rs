use std::sync::Arc;

use chrono::{NaiveTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_database::DatabaseError;

use crate::models::{
    day_name, AppointmentType, AvailabilityBlock, AvailabilityError, CreateAppointmentTypeRequest,
    CreateAvailabilityRequest, UpdateAvailabilityRequest,
};
use crate::services::store::{
    ScheduleRepository, ScheduleTransaction, BLOCK_START_CONSTRAINT, TYPE_NAME_CONSTRAINT,
};

/// Manages doctors' weekly availability and appointment types.
///
/// A doctor has one weekly timeline shared by every clinic they work at, so
/// block writes run in a transaction holding the doctor's schedule lock and
/// are checked against all of that doctor's active blocks.
pub struct AvailabilityService {
    repository: Arc<dyn ScheduleRepository>,
}

impl AvailabilityService {
    pub fn new(repository: Arc<dyn ScheduleRepository>) -> Self {
        Self { repository }
    }

    pub async fn create_block(
        &self,
        doctor_id: Uuid,
        request: CreateAvailabilityRequest,
    ) -> Result<AvailabilityBlock, AvailabilityError> {
        debug!("Creating availability for doctor: {}", doctor_id);

        validate_window(request.day_of_week, request.start_time, request.end_time)?;

        let mut tx = self.repository.lock_doctor(doctor_id).await?;

        check_overlap(
            tx.as_ref(),
            request.clinic_id,
            request.day_of_week,
            request.start_time,
            request.end_time,
            None,
        )
        .await?;

        let now = Utc::now();
        let block = AvailabilityBlock {
            id: Uuid::new_v4(),
            doctor_id,
            clinic_id: request.clinic_id,
            day_of_week: request.day_of_week,
            start_time: request.start_time,
            end_time: request.end_time,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        let block = tx.insert_block(block).await.map_err(block_write_error)?;
        tx.commit().await?;
        info!(
            "Availability block {} created for doctor {} on {} {}-{}",
            block.id,
            doctor_id,
            day_name(block.day_of_week),
            block.start_time.format("%H:%M"),
            block.end_time.format("%H:%M")
        );
        Ok(block)
    }

    pub async fn update_block(
        &self,
        doctor_id: Uuid,
        block_id: Uuid,
        request: UpdateAvailabilityRequest,
    ) -> Result<AvailabilityBlock, AvailabilityError> {
        debug!("Updating availability block: {}", block_id);

        let mut tx = self.repository.lock_doctor(doctor_id).await?;

        let current = tx
            .blocks()
            .await?
            .into_iter()
            .find(|b| b.id == block_id)
            .ok_or(AvailabilityError::BlockNotFound)?;

        let mut updated = current.clone();
        if let Some(day) = request.day_of_week {
            updated.day_of_week = day;
        }
        if let Some(start) = request.start_time {
            updated.start_time = start;
        }
        if let Some(end) = request.end_time {
            updated.end_time = end;
        }
        if let Some(active) = request.is_active {
            updated.is_active = active;
        }

        validate_window(updated.day_of_week, updated.start_time, updated.end_time)?;

        // An inactive block takes no time, so deactivating never conflicts.
        if updated.is_active {
            check_overlap(
                tx.as_ref(),
                updated.clinic_id,
                updated.day_of_week,
                updated.start_time,
                updated.end_time,
                Some(block_id),
            )
            .await?;
        }

        updated.updated_at = Utc::now();
        let block = tx.update_block(updated).await.map_err(block_write_error)?;
        tx.commit().await?;
        Ok(block)
    }

    pub async fn list_blocks(
        &self,
        doctor_id: Uuid,
        clinic_id: Option<Uuid>,
    ) -> Result<Vec<AvailabilityBlock>, AvailabilityError> {
        let mut blocks = self.repository.doctor_blocks(doctor_id).await?;
        if let Some(clinic_id) = clinic_id {
            blocks.retain(|b| b.clinic_id == clinic_id);
        }
        Ok(blocks)
    }

    /// Active blocks for one doctor at one clinic on a weekday, ordered by
    /// start time.
    pub async fn active_blocks(
        &self,
        doctor_id: Uuid,
        clinic_id: Uuid,
        day_of_week: u8,
    ) -> Result<Vec<AvailabilityBlock>, AvailabilityError> {
        let mut blocks = self.repository.doctor_blocks(doctor_id).await?;
        blocks.retain(|b| b.is_active && b.clinic_id == clinic_id && b.day_of_week == day_of_week);
        blocks.sort_by_key(|b| b.start_time);
        Ok(blocks)
    }

    pub async fn get_block(&self, block_id: Uuid) -> Result<AvailabilityBlock, AvailabilityError> {
        self.repository
            .get_block(block_id)
            .await?
            .ok_or(AvailabilityError::BlockNotFound)
    }

    pub async fn create_appointment_type(
        &self,
        doctor_id: Uuid,
        request: CreateAppointmentTypeRequest,
    ) -> Result<AppointmentType, AvailabilityError> {
        if request.duration_minutes <= 0 {
            return Err(AvailabilityError::InvalidDuration);
        }

        let appointment_type = AppointmentType {
            id: Uuid::new_v4(),
            doctor_id,
            clinic_id: request.clinic_id,
            name: request.name.trim().to_string(),
            duration_minutes: request.duration_minutes,
            price: request.price,
            description: request.description,
            is_active: true,
            created_at: Utc::now(),
        };

        let created = self
            .repository
            .insert_type(appointment_type)
            .await
            .map_err(|e| match e {
                DatabaseError::UniqueViolation { ref constraint } if constraint == TYPE_NAME_CONSTRAINT => {
                    AvailabilityError::DuplicateAppointmentType
                }
                other => AvailabilityError::Database(other),
            })?;

        info!(
            "Appointment type '{}' ({} min) created for doctor {}",
            created.name, created.duration_minutes, doctor_id
        );
        Ok(created)
    }

    pub async fn list_appointment_types(
        &self,
        doctor_id: Uuid,
        clinic_id: Uuid,
    ) -> Result<Vec<AppointmentType>, AvailabilityError> {
        let mut types = self.repository.doctor_types(doctor_id, clinic_id).await?;
        types.retain(|t| t.is_active);
        Ok(types)
    }

    pub async fn get_appointment_type(&self, type_id: Uuid) -> Result<Option<AppointmentType>, AvailabilityError> {
        Ok(self.repository.get_type(type_id).await?)
    }

    /// The type, if it exists, is active and belongs to this doctor and clinic.
    pub async fn resolve_active_type(
        &self,
        type_id: Uuid,
        doctor_id: Uuid,
        clinic_id: Uuid,
    ) -> Result<Option<AppointmentType>, AvailabilityError> {
        Ok(self
            .repository
            .get_type(type_id)
            .await?
            .filter(|t| t.is_active && t.doctor_id == doctor_id && t.clinic_id == clinic_id))
    }
}

/// Finds an active block of the locked doctor on the same weekday that
/// overlaps `[start, end)`.
async fn check_overlap(
    tx: &dyn ScheduleTransaction,
    clinic_id: Uuid,
    day_of_week: u8,
    start: NaiveTime,
    end: NaiveTime,
    exclude_id: Option<Uuid>,
) -> Result<(), AvailabilityError> {
    let doctor_id = tx.doctor_id();
    let blocks = tx.blocks().await?;

    let conflict = blocks.into_iter().find(|b| {
        b.is_active
            && b.day_of_week == day_of_week
            && Some(b.id) != exclude_id
            && b.overlaps(start, end)
    });

    let Some(conflict) = conflict else {
        return Ok(());
    };

    let day = day_name(day_of_week);
    let (start, end) = (
        conflict.start_time.format("%H:%M").to_string(),
        conflict.end_time.format("%H:%M").to_string(),
    );

    if conflict.clinic_id == clinic_id {
        Err(AvailabilityError::OverlapsExistingBlock { day, start, end })
    } else {
        warn!(
            "Doctor {} availability conflicts with clinic {} on {}",
            doctor_id, conflict.clinic_id, day
        );
        Err(AvailabilityError::ConflictsWithOtherClinic {
            clinic_id: conflict.clinic_id,
            day,
            start,
            end,
        })
    }
}

fn validate_window(day_of_week: u8, start: NaiveTime, end: NaiveTime) -> Result<(), AvailabilityError> {
    if day_of_week > 6 {
        return Err(AvailabilityError::InvalidDayOfWeek(day_of_week));
    }
    if start >= end {
        return Err(AvailabilityError::InvalidTimeRange);
    }
    Ok(())
}

fn block_write_error(e: DatabaseError) -> AvailabilityError {
    match e {
        DatabaseError::UniqueViolation { ref constraint } if constraint == BLOCK_START_CONSTRAINT => {
            AvailabilityError::DuplicateBlock
        }
        DatabaseError::NotFound(_) => AvailabilityError::BlockNotFound,
        other => AvailabilityError::Database(other),
    }
}

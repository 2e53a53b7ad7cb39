use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::DatabaseError;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    AvailabilityError, CreateAppointmentTypeRequest, CreateAvailabilityRequest,
    UpdateAvailabilityRequest,
};
use crate::services::access::{can_manage_schedule, ClinicAccess};
use crate::services::availability::AvailabilityService;

#[derive(Clone)]
pub struct DoctorCellState {
    pub config: Arc<AppConfig>,
    pub availability: Arc<AvailabilityService>,
    pub access: Arc<dyn ClinicAccess>,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityListQuery {
    pub clinic_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct AppointmentTypeQuery {
    pub clinic_id: Uuid,
}

pub fn actor_id(user: &User) -> Result<Uuid, AppError> {
    user.uuid()
        .ok_or_else(|| AppError::Auth("Token subject is not a valid user id".to_string()))
}

pub fn map_availability_error(e: AvailabilityError) -> AppError {
    let detail = e.to_string();
    match e {
        AvailabilityError::InvalidTimeRange => AppError::rejected("invalid_time_range", detail),
        AvailabilityError::InvalidDayOfWeek(_) => AppError::rejected("invalid_day_of_week", detail),
        AvailabilityError::InvalidDuration => AppError::rejected("invalid_duration", detail),
        AvailabilityError::OverlapsExistingBlock { .. } => AppError::conflict("availability_overlap", detail),
        AvailabilityError::ConflictsWithOtherClinic { .. } => {
            AppError::conflict("cross_clinic_conflict", detail)
        }
        AvailabilityError::DuplicateBlock => AppError::conflict("duplicate_block", detail),
        AvailabilityError::DuplicateAppointmentType => {
            AppError::conflict("duplicate_appointment_type", detail)
        }
        AvailabilityError::BlockNotFound | AvailabilityError::AppointmentTypeNotFound => {
            AppError::NotFound(detail)
        }
        AvailabilityError::Forbidden => AppError::Forbidden(detail),
        AvailabilityError::Database(DatabaseError::LockTimeout { .. }) => {
            AppError::ServiceUnavailable("Schedule is busy, please retry".to_string())
        }
        AvailabilityError::Database(db) => AppError::Database(db.to_string()),
    }
}

async fn ensure_can_manage(
    state: &DoctorCellState,
    user: &User,
    doctor_id: Uuid,
    clinic_id: Uuid,
) -> Result<(), AppError> {
    let actor = actor_id(user)?;
    if can_manage_schedule(state.access.as_ref(), actor, doctor_id, clinic_id).await {
        Ok(())
    } else {
        Err(map_availability_error(AvailabilityError::Forbidden))
    }
}

// ==============================================================================
// AVAILABILITY
// ==============================================================================

pub async fn list_availability(
    State(state): State<DoctorCellState>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<AvailabilityListQuery>,
) -> Result<Json<Value>, AppError> {
    let blocks = state
        .availability
        .list_blocks(doctor_id, query.clinic_id)
        .await
        .map_err(map_availability_error)?;

    Ok(Json(json!({
        "doctor_id": doctor_id,
        "availability": blocks,
        "total": blocks.len()
    })))
}

pub async fn create_availability(
    State(state): State<DoctorCellState>,
    Path(doctor_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateAvailabilityRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    ensure_can_manage(&state, &user, doctor_id, request.clinic_id).await?;

    let block = state
        .availability
        .create_block(doctor_id, request)
        .await
        .map_err(map_availability_error)?;

    Ok((StatusCode::CREATED, Json(json!(block))))
}

pub async fn update_availability(
    State(state): State<DoctorCellState>,
    Path((doctor_id, block_id)): Path<(Uuid, Uuid)>,
    Extension(user): Extension<User>,
    Json(request): Json<UpdateAvailabilityRequest>,
) -> Result<Json<Value>, AppError> {
    let current = state
        .availability
        .get_block(block_id)
        .await
        .map_err(map_availability_error)?;
    if current.doctor_id != doctor_id {
        return Err(AppError::NotFound("Availability block not found".to_string()));
    }

    ensure_can_manage(&state, &user, doctor_id, current.clinic_id).await?;

    let block = state
        .availability
        .update_block(doctor_id, block_id, request)
        .await
        .map_err(map_availability_error)?;

    Ok(Json(json!(block)))
}

// ==============================================================================
// APPOINTMENT TYPES
// ==============================================================================

pub async fn list_appointment_types(
    State(state): State<DoctorCellState>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<AppointmentTypeQuery>,
) -> Result<Json<Value>, AppError> {
    let types = state
        .availability
        .list_appointment_types(doctor_id, query.clinic_id)
        .await
        .map_err(map_availability_error)?;

    Ok(Json(json!({
        "appointment_types": types,
        "total": types.len()
    })))
}

pub async fn create_appointment_type(
    State(state): State<DoctorCellState>,
    Path(doctor_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateAppointmentTypeRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    ensure_can_manage(&state, &user, doctor_id, request.clinic_id).await?;

    let created = state
        .availability
        .create_appointment_type(doctor_id, request)
        .await
        .map_err(map_availability_error)?;

    Ok((StatusCode::CREATED, Json(json!(created))))
}

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::DatabaseError;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    AppointmentError, AppointmentStatus, BookAppointmentRequest, ChangeScheduleRequest,
    PolicyViolation,
};
use crate::services::{AppointmentLifecycle, AppointmentQueries, BookingService, LifecycleOutcome};

#[derive(Clone)]
pub struct AppointmentCellState {
    pub config: Arc<AppConfig>,
    pub booking: Arc<BookingService>,
    pub lifecycle: Arc<AppointmentLifecycle>,
    pub queries: Arc<AppointmentQueries>,
}

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct SlotQueryParams {
    pub doctor_id: Uuid,
    pub clinic_id: Uuid,
    /// Parsed by the handler so a malformed value gets its own error code.
    pub date: String,
    pub appointment_type_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct MyAppointmentsQuery {
    pub upcoming_limit: Option<usize>,
    pub past_limit: Option<usize>,
}

// ==============================================================================
// ERROR MAPPING
// ==============================================================================

fn caller_id(user: &User) -> Result<Uuid, AppError> {
    user.uuid()
        .ok_or_else(|| AppError::Auth("Token subject is not a valid user id".to_string()))
}

pub fn map_appointment_error(e: AppointmentError) -> AppError {
    let code = e.code();
    let detail = e.to_string();
    match e {
        AppointmentError::PastDate
        | AppointmentError::InvalidSlot
        | AppointmentError::InvalidClinic
        | AppointmentError::InvalidAppointmentType => AppError::rejected(code, detail),
        AppointmentError::SlotUnavailable => AppError::conflict(code, detail),
        AppointmentError::NotFound => AppError::NotFound(detail),
        AppointmentError::NotAllowed(PolicyViolation::ClinicMismatch) => AppError::Forbidden(detail),
        AppointmentError::NotAllowed(_) => AppError::rejected(code, detail),
        AppointmentError::Database(DatabaseError::LockTimeout { .. }) => {
            AppError::ServiceUnavailable("Appointment is busy, please retry".to_string())
        }
        AppointmentError::Database(db) => AppError::Database(db.to_string()),
    }
}

async fn respond(state: &AppointmentCellState, outcome: LifecycleOutcome) -> Result<Json<Value>, AppError> {
    let view = state
        .queries
        .view(&outcome.appointment)
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": view
    })))
}

// ==============================================================================
// READ HANDLERS
// ==============================================================================

pub async fn get_slots(
    State(state): State<AppointmentCellState>,
    Query(params): Query<SlotQueryParams>,
) -> Result<Json<Value>, AppError> {
    let date = NaiveDate::parse_from_str(&params.date, "%Y-%m-%d")
        .map_err(|_| AppError::rejected("invalid_date", "Date must be formatted as YYYY-MM-DD"))?;

    let result = state
        .booking
        .slots(params.doctor_id, params.clinic_id, date, params.appointment_type_id)
        .await
        .map_err(|e| match e {
            AppointmentError::InvalidAppointmentType => AppError::unresolved(e.code(), e.to_string()),
            other => map_appointment_error(other),
        })?;

    Ok(Json(json!(result)))
}

pub async fn my_appointments(
    State(state): State<AppointmentCellState>,
    Extension(user): Extension<User>,
    Query(query): Query<MyAppointmentsQuery>,
) -> Result<Json<Value>, AppError> {
    let patient_id = caller_id(&user)?;

    let appointments = state
        .queries
        .patient_appointments(patient_id, query.upcoming_limit, query.past_limit)
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!(appointments)))
}

pub async fn get_appointment(
    State(state): State<AppointmentCellState>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let viewer_id = caller_id(&user)?;

    let view = state
        .queries
        .detail(appointment_id, viewer_id)
        .await
        .map_err(map_appointment_error)?;

    Ok(Json(json!(view)))
}

// ==============================================================================
// PATIENT HANDLERS
// ==============================================================================

pub async fn book_appointment(
    State(state): State<AppointmentCellState>,
    Extension(user): Extension<User>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    if !user.is_patient() {
        return Err(AppError::Forbidden("Only patients can book appointments".to_string()));
    }
    let patient_id = caller_id(&user)?;

    let appointment = state
        .booking
        .book(patient_id, request)
        .await
        .map_err(map_appointment_error)?;
    let view = state
        .queries
        .view(&appointment)
        .await
        .map_err(map_appointment_error)?;

    Ok((StatusCode::CREATED, Json(json!(view))))
}

pub async fn cancel_appointment(
    State(state): State<AppointmentCellState>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let patient_id = caller_id(&user)?;

    let outcome = state
        .lifecycle
        .cancel_by_patient(appointment_id, patient_id)
        .await
        .map_err(map_appointment_error)?;

    respond(&state, outcome).await
}

pub async fn edit_appointment(
    State(state): State<AppointmentCellState>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<ChangeScheduleRequest>,
) -> Result<Json<Value>, AppError> {
    let patient_id = caller_id(&user)?;

    let outcome = state
        .lifecycle
        .edit_by_patient(appointment_id, patient_id, request)
        .await
        .map_err(map_appointment_error)?;

    respond(&state, outcome).await
}

// ==============================================================================
// STAFF HANDLERS
// ==============================================================================

pub async fn staff_cancel_appointment(
    State(state): State<AppointmentCellState>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let staff_id = caller_id(&user)?;

    let outcome = state
        .lifecycle
        .cancel_by_staff(appointment_id, staff_id)
        .await
        .map_err(map_appointment_error)?;

    respond(&state, outcome).await
}

pub async fn reschedule_appointment(
    State(state): State<AppointmentCellState>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
    Json(request): Json<ChangeScheduleRequest>,
) -> Result<Json<Value>, AppError> {
    let staff_id = caller_id(&user)?;

    let outcome = state
        .lifecycle
        .reschedule_by_staff(appointment_id, staff_id, request)
        .await
        .map_err(map_appointment_error)?;

    respond(&state, outcome).await
}

async fn transition(
    state: AppointmentCellState,
    appointment_id: Uuid,
    user: User,
    target: AppointmentStatus,
) -> Result<Json<Value>, AppError> {
    let staff_id = caller_id(&user)?;

    let outcome = state
        .lifecycle
        .transition_by_staff(appointment_id, staff_id, target)
        .await
        .map_err(map_appointment_error)?;

    respond(&state, outcome).await
}

pub async fn confirm_appointment(
    State(state): State<AppointmentCellState>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    transition(state, appointment_id, user, AppointmentStatus::Confirmed).await
}

pub async fn check_in_appointment(
    State(state): State<AppointmentCellState>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    transition(state, appointment_id, user, AppointmentStatus::CheckedIn).await
}

pub async fn start_appointment(
    State(state): State<AppointmentCellState>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    transition(state, appointment_id, user, AppointmentStatus::InProgress).await
}

pub async fn complete_appointment(
    State(state): State<AppointmentCellState>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    transition(state, appointment_id, user, AppointmentStatus::Completed).await
}

pub async fn no_show_appointment(
    State(state): State<AppointmentCellState>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    transition(state, appointment_id, user, AppointmentStatus::NoShow).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_keep_their_codes() {
        let err = map_appointment_error(AppointmentError::SlotUnavailable);
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "slot_unavailable");

        let err = map_appointment_error(AppointmentError::InvalidSlot);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "invalid_slot");

        let err = map_appointment_error(PolicyViolation::EditLimitReached { max: 2 }.into());
        assert_eq!(err.code(), "action_not_allowed");
    }

    #[test]
    fn tenant_mismatch_is_forbidden() {
        let err = map_appointment_error(PolicyViolation::ClinicMismatch.into());
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn storage_faults_are_never_slot_conflicts() {
        let err = map_appointment_error(AppointmentError::Database(DatabaseError::Storage(
            "connection reset".to_string(),
        )));
        assert!(err.status().is_server_error());
        assert_ne!(err.code(), "slot_unavailable");
    }
}

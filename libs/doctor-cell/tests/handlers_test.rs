use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{Extension, Path, State},
    http::{Request, StatusCode},
    Json,
};
use chrono::NaiveTime;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use doctor_cell::handlers::{create_availability, DoctorCellState};
use doctor_cell::models::CreateAvailabilityRequest;
use doctor_cell::router::doctor_routes;
use doctor_cell::services::{AvailabilityService, ClinicAccess, InMemoryScheduleRepository};
use shared_models::error::AppError;
use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser};

struct StaticAccess(HashSet<(Uuid, Uuid)>);

#[async_trait]
impl ClinicAccess for StaticAccess {
    async fn is_clinic_staff(&self, clinic_id: Uuid, user_id: Uuid) -> bool {
        self.0.contains(&(clinic_id, user_id))
    }
}

fn state(staff: &[(Uuid, Uuid)]) -> DoctorCellState {
    DoctorCellState {
        config: TestConfig::default().to_arc(),
        availability: Arc::new(AvailabilityService::new(Arc::new(
            InMemoryScheduleRepository::with_lock_timeout(Duration::from_secs(2)),
        ))),
        access: Arc::new(StaticAccess(staff.iter().copied().collect())),
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn secretary_of_clinic_can_create_block() {
    let clinic = Uuid::new_v4();
    let doctor = Uuid::new_v4();
    let secretary = TestUser::secretary("sec@clinic.test");
    let state = state(&[(clinic, secretary.uuid())]);

    let result = create_availability(
        State(state.clone()),
        Path(doctor),
        Extension(secretary.to_user()),
        Json(CreateAvailabilityRequest {
            clinic_id: clinic,
            day_of_week: 0,
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
        }),
    )
    .await;

    let (status, Json(body)) = result.unwrap();
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["start_time"], "09:00");
    assert_eq!(body["day_of_week"], 0);
}

#[tokio::test]
async fn outsider_cannot_create_block() {
    let clinic = Uuid::new_v4();
    let outsider = TestUser::secretary("other@clinic.test");
    let state = state(&[]);

    let result = create_availability(
        State(state),
        Path(Uuid::new_v4()),
        Extension(outsider.to_user()),
        Json(CreateAvailabilityRequest {
            clinic_id: clinic,
            day_of_week: 0,
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
        }),
    )
    .await;

    assert!(matches!(result, Err(AppError::Forbidden(_))));
}

#[tokio::test]
async fn doctor_manages_own_schedule_over_http() {
    let config = TestConfig::default();
    let doctor = TestUser::doctor("doc@clinic.test");
    let clinic = Uuid::new_v4();
    let app = doctor_routes(state(&[]));

    let create = Request::builder()
        .method("POST")
        .uri(format!("/{}/availability", doctor.id))
        .header("Authorization", JwtTestUtils::bearer(&doctor, &config.jwt_secret))
        .header("Content-Type", "application/json")
        .body(Body::from(
            json!({
                "clinic_id": clinic,
                "day_of_week": 0,
                "start_time": "09:00",
                "end_time": "12:00"
            })
            .to_string(),
        ))
        .unwrap();
    let response = app.clone().oneshot(create).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let overlapping = Request::builder()
        .method("POST")
        .uri(format!("/{}/availability", doctor.id))
        .header("Authorization", JwtTestUtils::bearer(&doctor, &config.jwt_secret))
        .header("Content-Type", "application/json")
        .body(Body::from(
            json!({
                "clinic_id": Uuid::new_v4(),
                "day_of_week": 0,
                "start_time": "11:00",
                "end_time": "13:00"
            })
            .to_string(),
        ))
        .unwrap();
    let response = app.clone().oneshot(overlapping).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["code"], "cross_clinic_conflict");

    // Listing is public.
    let list = Request::builder()
        .uri(format!("/{}/availability", doctor.id))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(list).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["total"], 1);
}

#[tokio::test]
async fn writes_require_a_token() {
    let app = doctor_routes(state(&[]));
    let request = Request::builder()
        .method("POST")
        .uri(format!("/{}/appointment-types", Uuid::new_v4()))
        .header("Content-Type", "application/json")
        .body(Body::from(
            json!({"clinic_id": Uuid::new_v4(), "name": "Checkup", "duration_minutes": 30}).to_string(),
        ))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

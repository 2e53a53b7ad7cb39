use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::error::NotificationError;
use crate::services::store::NotificationRepository;

#[derive(Clone)]
pub struct NotificationCellState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn NotificationRepository>,
}

fn caller_id(user: &User) -> Result<Uuid, AppError> {
    user.uuid()
        .ok_or_else(|| AppError::Auth("Token subject is not a valid user id".to_string()))
}

fn map_notification_error(e: NotificationError) -> AppError {
    match e {
        NotificationError::NotFound => AppError::NotFound("Notification not found".to_string()),
        other => AppError::Internal(other.to_string()),
    }
}

pub async fn list_notifications(
    State(state): State<NotificationCellState>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let recipient = caller_id(&user)?;

    let notifications = state
        .store
        .list_for_recipient(recipient)
        .await
        .map_err(|e| map_notification_error(e.into()))?;
    let unread = notifications.iter().filter(|n| !n.is_read).count();

    Ok(Json(json!({
        "notifications": notifications,
        "total": notifications.len(),
        "unread": unread
    })))
}

pub async fn mark_notification_read(
    State(state): State<NotificationCellState>,
    Path(notification_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let recipient = caller_id(&user)?;

    let notification = state
        .store
        .mark_read(notification_id, recipient)
        .await
        .map_err(|e| map_notification_error(e.into()))?;

    Ok(Json(json!(notification)))
}

//! HTTP处理器

use crate::auth::AuthService;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use clinic_core::{ClinicError, User};
use clinic_notify::{ConnectionRegistry, NotificationDispatcher};
use clinic_scheduling::SchedulingEngine;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// 共享应用状态
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SchedulingEngine>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub registry: ConnectionRegistry,
    pub auth: Arc<AuthService>,
}

/// HTTP层错误包装，负责状态码映射
#[derive(Debug)]
pub struct ApiError(pub ClinicError);

impl From<ClinicError> for ApiError {
    fn from(e: ClinicError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_message) = match &self.0 {
            ClinicError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ClinicError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ClinicError::SlotUnavailable(msg) => (StatusCode::CONFLICT, msg.clone()),
            ClinicError::ResourceConflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            ClinicError::InvalidTransition { .. } => (StatusCode::CONFLICT, self.0.to_string()),
            ClinicError::Permission(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            ClinicError::TransientStore(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string()),
        };

        let body = Json(json!({
            "error": true,
            "message": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// API根路径处理器
pub async fn api_root() -> impl IntoResponse {
    Json(json!({
        "service": "Clinic Appointment API",
        "version": "0.1.0",
        "status": "running",
        "endpoints": {
            "health": "/health",
            "api": "/api/v1",
            "live_push": "/ws"
        }
    }))
}

/// 健康检查处理器
pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": "0.1.0"
    }))
}

// ========== 预约接口 ==========

#[derive(Debug, Deserialize)]
pub struct RequestAppointmentPayload {
    pub patient_id: Uuid,
    pub scheduled_time: DateTime<Utc>,
}

pub async fn request_appointment(
    State(state): State<AppState>,
    Json(payload): Json<RequestAppointmentPayload>,
) -> ApiResult<impl IntoResponse> {
    info!(
        "Appointment request from patient {} at {}",
        payload.patient_id, payload.scheduled_time
    );

    let appointment = state
        .engine
        .request_appointment(payload.patient_id, payload.scheduled_time)
        .await?;
    Ok((StatusCode::CREATED, Json(appointment)))
}

#[derive(Debug, Deserialize)]
pub struct AssignAppointmentPayload {
    pub doctor_id: Uuid,
    pub nurse_id: Uuid,
    pub room_id: Uuid,
}

pub async fn assign_appointment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AssignAppointmentPayload>,
) -> ApiResult<impl IntoResponse> {
    let appointment = state
        .engine
        .assign_appointment(id, payload.doctor_id, payload.nurse_id, payload.room_id)
        .await?;
    Ok(Json(appointment))
}

pub async fn close_appointment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let closed = state.engine.close_appointment(id).await?;
    Ok(Json(json!({ "closed": closed })))
}

#[derive(Debug, Deserialize)]
pub struct CancelAppointmentPayload {
    pub reason: String,
}

pub async fn cancel_appointment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CancelAppointmentPayload>,
) -> ApiResult<impl IntoResponse> {
    let appointment = state.engine.cancel_appointment(id, payload.reason).await?;
    Ok(Json(appointment))
}

pub async fn get_appointment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let appointment = state
        .engine
        .get_appointment(id)
        .await?
        .ok_or_else(|| ClinicError::NotFound(format!("Appointment {} not found", id)))?;
    Ok(Json(appointment))
}

pub async fn list_appointments(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let appointments = state.engine.all_appointments().await?;
    Ok(Json(json!({
        "total": appointments.len(),
        "appointments": appointments
    })))
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub time: DateTime<Utc>,
}

/// 只读可用性查询；真正的占用判定发生在预约写入时
pub async fn slot_availability(
    State(state): State<AppState>,
    Query(query): Query<AvailabilityQuery>,
) -> ApiResult<impl IntoResponse> {
    let unavailable = state.engine.is_slot_unavailable(query.time).await?;
    Ok(Json(json!({
        "time": query.time,
        "unavailable": unavailable
    })))
}

pub async fn active_dates(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let dates = state.engine.active_dates().await?;
    Ok(Json(json!({ "dates": dates })))
}

pub async fn patient_appointments(
    State(state): State<AppState>,
    Path(patient_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let appointments = state.engine.appointments_by_patient(patient_id).await?;
    Ok(Json(json!({
        "total": appointments.len(),
        "appointments": appointments
    })))
}

pub async fn doctor_appointments(
    State(state): State<AppState>,
    Path(doctor_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let appointments = state.engine.appointments_by_doctor(doctor_id).await?;
    Ok(Json(json!({
        "total": appointments.len(),
        "appointments": appointments
    })))
}

pub async fn nurse_appointments(
    State(state): State<AppState>,
    Path(nurse_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let appointments = state.engine.appointments_by_nurse(nurse_id).await?;
    Ok(Json(json!({
        "total": appointments.len(),
        "appointments": appointments
    })))
}

// ========== 通知接口（当前登录用户） ==========

#[derive(Debug, Deserialize)]
pub struct NotificationQuery {
    pub unread: Option<bool>,
}

pub async fn list_notifications(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<User>,
    Query(query): Query<NotificationQuery>,
) -> ApiResult<impl IntoResponse> {
    let notifications = state
        .dispatcher
        .notifications_for_user(user.id, query.unread.unwrap_or(false))
        .await?;
    Ok(Json(json!({
        "total": notifications.len(),
        "notifications": notifications
    })))
}

pub async fn unread_count(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<User>,
) -> ApiResult<impl IntoResponse> {
    let count = state.dispatcher.unread_count(user.id).await?;
    Ok(Json(json!({ "unread": count })))
}

pub async fn mark_notification_read(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let marked = state.dispatcher.mark_read(id).await?;
    Ok(Json(json!({ "read": marked })))
}

pub async fn mark_all_notifications_read(
    State(state): State<AppState>,
    axum::Extension(user): axum::Extension<User>,
) -> ApiResult<impl IntoResponse> {
    let marked = state.dispatcher.mark_all_read(user.id).await?;
    Ok(Json(json!({ "read": marked })))
}

//! Web服务器

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use clinic_core::Result;
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::auth::{auth_middleware, get_current_user, login_handler};
use crate::handlers::{
    active_dates, api_root, assign_appointment, cancel_appointment, close_appointment,
    doctor_appointments, get_appointment, health, list_appointments, list_notifications,
    mark_all_notifications_read, mark_notification_read, nurse_appointments,
    patient_appointments, request_appointment, slot_availability, unread_count, AppState,
};
use crate::ws::ws_handler;

pub struct WebServer {
    addr: SocketAddr,
    app: Router,
}

impl WebServer {
    pub fn new(addr: SocketAddr, state: AppState) -> Self {
        let app = Self::create_app(state);
        Self { addr, app }
    }

    fn create_app(state: AppState) -> Router {
        Router::new()
            // 认证路由（无需token）
            .route("/auth/login", post(login_handler))
            // 根路径与健康检查
            .route("/", get(api_root))
            .route("/health", get(health))
            // 实时推送通道（token经查询参数校验）
            .route("/ws", get(ws_handler))
            // 需要认证的路由
            .route(
                "/auth/me",
                get(get_current_user).layer(middleware::from_fn_with_state(
                    state.clone(),
                    auth_middleware,
                )),
            )
            .nest(
                "/api/v1",
                api_routes().layer(middleware::from_fn_with_state(
                    state.clone(),
                    auth_middleware,
                )),
            )
            .with_state(state)
            // 全局中间件
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(
                        CorsLayer::new()
                            .allow_origin(Any)
                            .allow_methods(Any)
                            .allow_headers(Any),
                    ),
            )
    }

    pub async fn run(self) -> Result<()> {
        info!("Starting web server on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, self.app)
            .await
            .map_err(|e| clinic_core::ClinicError::Internal(format!("Web server failed: {}", e)))?;

        Ok(())
    }
}

/// API v1 路由
fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/appointments", post(request_appointment).get(list_appointments))
        .route("/appointments/availability", get(slot_availability))
        .route("/appointments/dates", get(active_dates))
        .route("/appointments/:id", get(get_appointment))
        .route("/appointments/:id/assign", post(assign_appointment))
        .route("/appointments/:id/close", post(close_appointment))
        .route("/appointments/:id/cancel", post(cancel_appointment))
        .route("/patients/:id/appointments", get(patient_appointments))
        .route("/doctors/:id/appointments", get(doctor_appointments))
        .route("/nurses/:id/appointments", get(nurse_appointments))
        .route("/notifications", get(list_notifications))
        .route("/notifications/unread-count", get(unread_count))
        .route("/notifications/read-all", post(mark_all_notifications_read))
        .route("/notifications/:id/read", post(mark_notification_read))
}

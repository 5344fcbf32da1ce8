//! # Clinic Web
//!
//! 对外HTTP与WebSocket接口：调度操作、通知查询与实时推送通道。

pub mod auth;
pub mod handlers;
pub mod server;
pub mod ws;

pub use auth::AuthService;
pub use handlers::AppState;
pub use server::WebServer;

//! 用户认证和授权系统
//!
//! 解析请求与连接归属的稳定 user_id，下游组件信任这里给出的身份

use crate::handlers::ApiError;
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use clinic_core::{ClinicError, Result, Role, User};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::handlers::AppState;

/// 登录请求
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// 登录响应
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserInfo,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

/// 用户信息（不包含敏感数据）
#[derive(Debug, Serialize)]
pub struct UserInfo {
    pub id: Uuid,
    pub username: String,
    pub name: String,
    pub role: Role,
    pub is_active: bool,
}

impl From<&User> for UserInfo {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            name: user.name.clone(),
            role: user.role.clone(),
            is_active: user.is_active,
        }
    }
}

/// 会话记录
#[derive(Debug, Clone)]
struct Session {
    username: String,
    expires_at: chrono::DateTime<chrono::Utc>,
}

/// 认证服务
///
/// 不透明token与内存会话表；用户目录由部署方注入
#[derive(Clone)]
pub struct AuthService {
    users: Arc<RwLock<HashMap<String, User>>>,
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    token_expiry_hours: i64,
}

impl AuthService {
    pub fn new() -> Self {
        Self {
            users: Arc::new(RwLock::new(HashMap::new())),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            token_expiry_hours: 24,
        }
    }

    /// 注册用户（部署方/演示数据注入）
    pub async fn register_user(&self, user: User) {
        let mut users = self.users.write().await;
        users.insert(user.username.clone(), user);
    }

    /// 用户登录
    pub async fn login(&self, request: LoginRequest) -> Result<LoginResponse> {
        let users = self.users.read().await;

        let user = users
            .get(&request.username)
            .ok_or_else(|| ClinicError::Validation("Invalid username or password".to_string()))?;

        if !user.is_active {
            return Err(ClinicError::Validation("Account is disabled".to_string()));
        }

        // 注意：实际应用中应该使用安全的密码哈希
        // 这里为了演示，简单验证密码为用户名
        if request.password != user.username {
            return Err(ClinicError::Validation(
                "Invalid username or password".to_string(),
            ));
        }

        let token = Uuid::new_v4().simple().to_string();
        let expires_at = chrono::Utc::now() + chrono::Duration::hours(self.token_expiry_hours);

        let response = LoginResponse {
            token: token.clone(),
            user: UserInfo::from(user),
            expires_at,
        };
        drop(users);

        let mut sessions = self.sessions.write().await;
        sessions.insert(
            token,
            Session {
                username: request.username,
                expires_at,
            },
        );

        Ok(response)
    }

    /// 验证token并返回对应用户
    pub async fn verify_token(&self, token: &str) -> Result<User> {
        let session = {
            let sessions = self.sessions.read().await;
            sessions
                .get(token)
                .cloned()
                .ok_or_else(|| ClinicError::Permission("Invalid token".to_string()))?
        };

        if session.expires_at < chrono::Utc::now() {
            let mut sessions = self.sessions.write().await;
            sessions.remove(token);
            return Err(ClinicError::Permission("Token has expired".to_string()));
        }

        let users = self.users.read().await;
        let user = users
            .get(&session.username)
            .ok_or_else(|| ClinicError::Permission("User not found".to_string()))?;

        if !user.is_active {
            return Err(ClinicError::Permission("Account is disabled".to_string()));
        }

        Ok(user.clone())
    }
}

impl Default for AuthService {
    fn default() -> Self {
        Self::new()
    }
}

/// 认证中间件
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> std::result::Result<Response, ApiError> {
    // 从请求头获取token
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let token = match auth_header {
        Some(header) if header.starts_with("Bearer ") => &header[7..],
        _ => {
            return Err(ApiError::from(ClinicError::Permission(
                "Missing token".to_string(),
            )));
        }
    };

    let user = state.auth.verify_token(token).await?;

    // 将用户信息添加到请求扩展中
    let mut request = request;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// 登录处理器
pub async fn login_handler(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    info!("Login attempt for user: {}", request.username);

    let response = state.auth.login(request).await?;
    info!("User logged in successfully: {}", response.user.username);
    Ok(Json(response))
}

/// 当前用户查询处理器
pub async fn get_current_user(
    axum::Extension(user): axum::Extension<User>,
) -> impl IntoResponse {
    Json(UserInfo::from(&user))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo_user(username: &str, role: Role) -> User {
        User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            name: username.to_string(),
            role,
            is_active: true,
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_login_and_verify() {
        let auth = AuthService::new();
        auth.register_user(demo_user("alice", Role::Patient)).await;

        let response = auth
            .login(LoginRequest {
                username: "alice".to_string(),
                password: "alice".to_string(),
            })
            .await
            .unwrap();

        let user = auth.verify_token(&response.token).await.unwrap();
        assert_eq!(user.username, "alice");
    }

    #[tokio::test]
    async fn test_wrong_password_rejected() {
        let auth = AuthService::new();
        auth.register_user(demo_user("alice", Role::Patient)).await;

        let result = auth
            .login(LoginRequest {
                username: "alice".to_string(),
                password: "wrong".to_string(),
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unknown_token_rejected() {
        let auth = AuthService::new();
        assert!(auth.verify_token("not-a-token").await.is_err());
    }
}

//! 错误定义模块

use thiserror::Error;

/// 预约协调系统统一错误类型
#[derive(Error, Debug)]
pub enum ClinicError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("数据库错误: {0}")]
    Database(String),

    #[error("存储暂时不可用: {0}")]
    TransientStore(String),

    #[error("验证错误: {0}")]
    Validation(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("时间槽已被占用: {0}")]
    SlotUnavailable(String),

    #[error("资源冲突: {0}")]
    ResourceConflict(String),

    #[error("无效状态转换: 从 {from} 到 {event}")]
    InvalidTransition { from: String, event: String },

    #[error("权限错误: {0}")]
    Permission(String),

    #[error("网络错误: {0}")]
    Network(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("系统内部错误: {0}")]
    Internal(String),
}

impl ClinicError {
    /// 是否为可重试的瞬时失败
    pub fn is_transient(&self) -> bool {
        matches!(self, ClinicError::TransientStore(_))
    }
}

/// 预约协调系统统一结果类型
pub type Result<T> = std::result::Result<T, ClinicError>;

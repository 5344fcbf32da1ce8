//! 配置管理
//!
//! 默认值、配置文件与环境变量三层叠加，加载后统一验证

use anyhow::{Context, Result};
use clinic_core::ConflictPolicy;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 系统完整配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClinicConfig {
    /// 服务器配置
    pub server: ServerConfig,
    /// 数据库配置
    pub database: DatabaseConfig,
    /// 调度配置
    pub scheduling: SchedulingConfig,
    /// 通知配置
    pub notify: NotifyConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听主机
    pub host: String,
    /// 监听端口
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// 连接字符串；为空时使用内存存储
    pub url: Option<String>,
    /// 最大连接数
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

/// 调度配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// 时间槽冲突策略: global 或 per_resource
    pub conflict_policy: String,
    /// 瞬时存储失败的最大尝试次数
    pub max_attempts: u32,
    /// 重试退避基准（毫秒）
    pub retry_backoff_ms: u64,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            conflict_policy: "global".to_string(),
            max_attempts: 3,
            retry_backoff_ms: 50,
        }
    }
}

impl SchedulingConfig {
    pub fn policy(&self) -> Result<ConflictPolicy> {
        self.conflict_policy
            .parse()
            .with_context(|| format!("Invalid conflict policy: {}", self.conflict_policy))
    }
}

/// 通知配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// 去重窗口（秒）
    pub dedup_window_secs: i64,
    /// 系统通知的发送方用户ID；缺省为全零UUID
    pub system_user_id: Option<Uuid>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: 300,
            system_user_id: None,
        }
    }
}

impl ClinicConfig {
    /// 加载配置：默认值 < 配置文件 < 环境变量（CLINIC__ 前缀）
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(Config::try_from(&ClinicConfig::default()).context("Invalid defaults")?);

        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path));
        }

        let config: ClinicConfig = builder
            .add_source(Environment::with_prefix("CLINIC").separator("__"))
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// 验证配置
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("server.port must be non-zero");
        }
        if self.database.max_connections == 0 {
            anyhow::bail!("database.max_connections must be non-zero");
        }
        if self.scheduling.max_attempts == 0 {
            anyhow::bail!("scheduling.max_attempts must be non-zero");
        }
        if self.notify.dedup_window_secs < 0 {
            anyhow::bail!("notify.dedup_window_secs must not be negative");
        }
        self.scheduling.policy()?;
        Ok(())
    }
}

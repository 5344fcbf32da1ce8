//! 核心数据模型定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 预约状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AppointmentStatus {
    Requested, // 已申请
    Assigned,  // 已分配
    Closed,    // 已完成
    Cancelled, // 已取消
}

impl AppointmentStatus {
    /// 终止状态不允许任何后续变更
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "REQUESTED",
            Self::Assigned => "ASSIGNED",
            Self::Closed => "CLOSED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 预约信息
///
/// 不变式：scheduled_time 在所有非终止预约中按冲突策略唯一
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Option<Uuid>, // 分配前为空
    pub nurse_id: Option<Uuid>,
    pub room_id: Option<Uuid>,
    pub scheduled_time: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Appointment {
    /// 创建一条处于 Requested 状态的新预约
    pub fn new_requested(patient_id: Uuid, scheduled_time: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            patient_id,
            doctor_id: None,
            nurse_id: None,
            room_id: None,
            scheduled_time,
            status: AppointmentStatus::Requested,
            cancel_reason: None,
            created_at: Utc::now(),
            closed_at: None,
            cancelled_at: None,
        }
    }

    /// 是否仍占用其时间槽
    pub fn occupies_slot(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// 通知消息
///
/// 除 is_read/read_at 的单向翻转外不可变
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub from_user_id: Uuid,
    pub to_user_id: Uuid,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
}

impl Notification {
    pub fn new(from_user_id: Uuid, to_user_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            from_user_id,
            to_user_id,
            message: message.into(),
            created_at: Utc::now(),
            is_read: false,
            read_at: None,
        }
    }
}

/// 在线连接
///
/// 不落库，仅在连接注册表的生命周期内存在
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub connection_id: Uuid,
    pub user_id: Uuid,
    pub connected_at: DateTime<Utc>,
}

/// 用户角色
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Role {
    /// 患者
    Patient,
    /// 医生
    Doctor,
    /// 护士
    Nurse,
    /// 管理员
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Doctor => "doctor",
            Role::Nurse => "nurse",
            Role::Admin => "admin",
        }
    }
}

/// 用户基本信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub name: String,
    pub role: Role,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// 医生档案
///
/// id 同时作为通知接收人的用户ID使用
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Doctor {
    pub id: Uuid,
    pub name: String,
    pub specialty: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 护士档案
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Nurse {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// 诊室信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    pub name: String,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 时间槽冲突策略
///
/// Global：同一时刻全系统至多一条非终止预约；
/// PerResource：申请阶段不检查占用，冲突在分配阶段按医生/护士/诊室判定
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    #[default]
    Global,
    PerResource,
}

impl ConflictPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictPolicy::Global => "global",
            ConflictPolicy::PerResource => "per_resource",
        }
    }
}

impl std::str::FromStr for ConflictPolicy {
    type Err = crate::error::ClinicError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "global" => Ok(ConflictPolicy::Global),
            "per_resource" => Ok(ConflictPolicy::PerResource),
            other => Err(crate::error::ClinicError::Config(format!(
                "Unknown conflict policy: {}",
                other
            ))),
        }
    }
}

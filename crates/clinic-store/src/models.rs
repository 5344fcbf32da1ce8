//! 数据库模型

use chrono::{DateTime, Utc};
use clinic_core::models::*;
use sqlx::FromRow;
use uuid::Uuid;

// 数据库表模型 - 使用FromRow trait用于SQL查询

/// 数据库预约表
#[derive(Debug, FromRow)]
pub struct DbAppointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Option<Uuid>,
    pub nurse_id: Option<Uuid>,
    pub room_id: Option<Uuid>,
    pub scheduled_time: DateTime<Utc>,
    pub status: String, // 存储为字符串，转换为AppointmentStatus枚举
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl From<DbAppointment> for Appointment {
    fn from(row: DbAppointment) -> Self {
        Appointment {
            id: row.id,
            patient_id: row.patient_id,
            doctor_id: row.doctor_id,
            nurse_id: row.nurse_id,
            room_id: row.room_id,
            scheduled_time: row.scheduled_time,
            status: parse_status(&row.status),
            cancel_reason: row.cancel_reason,
            created_at: row.created_at,
            closed_at: row.closed_at,
            cancelled_at: row.cancelled_at,
        }
    }
}

pub(crate) fn parse_status(status: &str) -> AppointmentStatus {
    match status {
        "REQUESTED" => AppointmentStatus::Requested,
        "ASSIGNED" => AppointmentStatus::Assigned,
        "CLOSED" => AppointmentStatus::Closed,
        "CANCELLED" => AppointmentStatus::Cancelled,
        _ => AppointmentStatus::Requested, // 默认状态
    }
}

/// 数据库通知表
#[derive(Debug, FromRow)]
pub struct DbNotification {
    pub id: Uuid,
    pub from_user_id: Uuid,
    pub to_user_id: Uuid,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
}

impl From<DbNotification> for Notification {
    fn from(row: DbNotification) -> Self {
        Notification {
            id: row.id,
            from_user_id: row.from_user_id,
            to_user_id: row.to_user_id,
            message: row.message,
            created_at: row.created_at,
            is_read: row.is_read,
            read_at: row.read_at,
        }
    }
}

/// 数据库用户表
#[derive(Debug, FromRow)]
pub struct DbUser {
    pub id: Uuid,
    pub username: String,
    pub name: String,
    pub role: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<DbUser> for User {
    fn from(row: DbUser) -> Self {
        User {
            id: row.id,
            username: row.username,
            name: row.name,
            role: match row.role.as_str() {
                "doctor" => Role::Doctor,
                "nurse" => Role::Nurse,
                "admin" => Role::Admin,
                _ => Role::Patient,
            },
            is_active: row.is_active,
            created_at: row.created_at,
        }
    }
}

/// 数据库医生表
#[derive(Debug, FromRow)]
pub struct DbDoctor {
    pub id: Uuid,
    pub name: String,
    pub specialty: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<DbDoctor> for Doctor {
    fn from(row: DbDoctor) -> Self {
        Doctor {
            id: row.id,
            name: row.name,
            specialty: row.specialty,
            created_at: row.created_at,
        }
    }
}

/// 数据库护士表
#[derive(Debug, FromRow)]
pub struct DbNurse {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl From<DbNurse> for Nurse {
    fn from(row: DbNurse) -> Self {
        Nurse {
            id: row.id,
            name: row.name,
            created_at: row.created_at,
        }
    }
}

/// 数据库诊室表
#[derive(Debug, FromRow)]
pub struct DbRoom {
    pub id: Uuid,
    pub name: String,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<DbRoom> for Room {
    fn from(row: DbRoom) -> Self {
        Room {
            id: row.id,
            name: row.name,
            location: row.location,
            created_at: row.created_at,
        }
    }
}

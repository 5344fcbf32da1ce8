//! 调度领域事件
//!
//! 调度引擎在状态变更提交后发布，供通知链路异步消费

use chrono::{DateTime, Utc};
use clinic_core::Appointment;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 调度事件类型
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulingEventKind {
    AppointmentAssigned,
    AppointmentClosed,
    AppointmentCancelled,
}

impl SchedulingEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AppointmentAssigned => "appointment.assigned",
            Self::AppointmentClosed => "appointment.closed",
            Self::AppointmentCancelled => "appointment.cancelled",
        }
    }
}

/// 调度事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingEvent {
    pub id: Uuid,
    pub kind: SchedulingEventKind,
    /// 事件发生时预约的快照
    pub appointment: Appointment,
    /// 通知接收人
    pub recipients: Vec<Uuid>,
    pub occurred_at: DateTime<Utc>,
}

impl SchedulingEvent {
    pub fn new(kind: SchedulingEventKind, appointment: Appointment, recipients: Vec<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            appointment,
            recipients,
            occurred_at: Utc::now(),
        }
    }
}

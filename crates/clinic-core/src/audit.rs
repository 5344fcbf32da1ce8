//! 审计日志接入
//!
//! 调度与通知操作的旁路审计记录；写入失败只记录日志，不影响主流程

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// 审计动作类型
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AuditAction {
    AppointmentRequested,
    AppointmentAssigned,
    AppointmentClosed,
    AppointmentCancelled,
    NotificationDispatched,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AppointmentRequested => "appointment.requested",
            Self::AppointmentAssigned => "appointment.assigned",
            Self::AppointmentClosed => "appointment.closed",
            Self::AppointmentCancelled => "appointment.cancelled",
            Self::NotificationDispatched => "notification.dispatched",
        }
    }
}

/// 审计记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub action: AuditAction,
    pub subject_id: Uuid,
    pub detail: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(action: AuditAction, subject_id: Uuid, detail: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            subject_id,
            detail,
            recorded_at: Utc::now(),
        }
    }
}

/// 审计日志接收端
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// 记录一条审计日志
    async fn record(&self, record: AuditRecord) -> Result<()>;
}

/// 基于 tracing 的默认审计实现
#[derive(Debug, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, record: AuditRecord) -> Result<()> {
        tracing::info!(
            "[audit] {} subject={} detail={}",
            record.action.as_str(),
            record.subject_id,
            record.detail
        );
        Ok(())
    }
}

/// 异步提交审计记录，失败不向调用方传播
pub fn record_detached(sink: &Arc<dyn AuditSink>, record: AuditRecord) {
    let sink = sink.clone();
    tokio::spawn(async move {
        let action = record.action.clone();
        if let Err(e) = sink.record(record).await {
            tracing::warn!("Failed to record audit event {}: {}", action.as_str(), e);
        }
    });
}

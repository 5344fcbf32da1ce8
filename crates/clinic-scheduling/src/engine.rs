//! 调度引擎
//!
//! 预约生命周期的唯一入口：时间槽条件写入、状态迁移校验、
//! 资源占用判定与领域事件发布

use crate::events::{SchedulingEvent, SchedulingEventKind};
use crate::state_machine::{AppointmentEvent, AppointmentStateMachine};
use chrono::{DateTime, NaiveDate, Utc};
use clinic_core::audit::{record_detached, AuditAction, AuditRecord, AuditSink};
use clinic_core::{Appointment, AppointmentStatus, ClinicError, Result};
use clinic_store::EntityStore;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// 瞬时存储失败的有界重试参数
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// 调度引擎
///
/// "查槽+占槽"由存储层一次原子原语完成，引擎只在瞬时失败时
/// 有界重试；事件发布走无界通道，绝不阻塞调用方
pub struct SchedulingEngine {
    store: Arc<dyn EntityStore>,
    state_machine: AppointmentStateMachine,
    events: mpsc::UnboundedSender<SchedulingEvent>,
    audit: Arc<dyn AuditSink>,
    max_attempts: u32,
    retry_backoff: Duration,
}

impl SchedulingEngine {
    /// 创建新的调度引擎，返回引擎与领域事件接收端
    pub fn new(
        store: Arc<dyn EntityStore>,
        audit: Arc<dyn AuditSink>,
    ) -> (Self, mpsc::UnboundedReceiver<SchedulingEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = Self {
            store,
            state_machine: AppointmentStateMachine::new(),
            events: tx,
            audit,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        };
        (engine, rx)
    }

    /// 覆盖重试参数
    pub fn with_retry(mut self, max_attempts: u32, backoff: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_backoff = backoff;
        self
    }

    /// 申请预约
    ///
    /// 时间槽占用时返回 `SlotUnavailable`；检查与插入由存储层
    /// 原子完成，并发同槽请求至多一个成功
    pub async fn request_appointment(
        &self,
        patient_id: Uuid,
        scheduled_time: DateTime<Utc>,
    ) -> Result<Appointment> {
        if scheduled_time <= Utc::now() {
            return Err(ClinicError::Validation(format!(
                "Scheduled time {} is in the past",
                scheduled_time
            )));
        }

        let appointment = Appointment::new_requested(patient_id, scheduled_time);
        let stored = self
            .retry_transient(|| {
                self.store
                    .insert_appointment_if_slot_free(appointment.clone())
            })
            .await?;

        tracing::info!(
            "Appointment {} requested by patient {} at {}",
            stored.id,
            patient_id,
            scheduled_time
        );
        self.audit(
            AuditAction::AppointmentRequested,
            stored.id,
            json!({ "patient_id": patient_id, "scheduled_time": scheduled_time }),
        );

        Ok(stored)
    }

    /// 分配医生、护士与诊室
    ///
    /// 仅允许从 Requested 状态分配；医生/护士/诊室在同一时刻
    /// 已被其他非终止预约占用时返回 `ResourceConflict`
    pub async fn assign_appointment(
        &self,
        appointment_id: Uuid,
        doctor_id: Uuid,
        nurse_id: Uuid,
        room_id: Uuid,
    ) -> Result<Appointment> {
        let current = self.get_appointment_or_fail(appointment_id).await?;
        self.state_machine
            .transition(current.status, &AppointmentEvent::Assign)?;

        if self.store.get_doctor(doctor_id).await?.is_none() {
            return Err(ClinicError::NotFound(format!(
                "Doctor {} not found",
                doctor_id
            )));
        }
        if self.store.get_nurse(nurse_id).await?.is_none() {
            return Err(ClinicError::NotFound(format!(
                "Nurse {} not found",
                nurse_id
            )));
        }
        if self.store.get_room(room_id).await?.is_none() {
            return Err(ClinicError::NotFound(format!("Room {} not found", room_id)));
        }

        let assigned = self
            .retry_transient(|| {
                self.store
                    .assign_if_resources_free(appointment_id, doctor_id, nurse_id, room_id)
            })
            .await?;

        tracing::info!(
            "Appointment {} assigned to doctor {}, nurse {}, room {}",
            appointment_id,
            doctor_id,
            nurse_id,
            room_id
        );
        self.audit(
            AuditAction::AppointmentAssigned,
            appointment_id,
            json!({ "doctor_id": doctor_id, "nurse_id": nurse_id, "room_id": room_id }),
        );
        self.emit(SchedulingEvent::new(
            SchedulingEventKind::AppointmentAssigned,
            assigned.clone(),
            vec![assigned.patient_id, doctor_id, nurse_id],
        ));

        Ok(assigned)
    }

    /// 完成预约
    pub async fn close_appointment(&self, appointment_id: Uuid) -> Result<bool> {
        let current = self.get_appointment_or_fail(appointment_id).await?;
        self.state_machine
            .transition(current.status, &AppointmentEvent::Close)?;

        let closed = self
            .retry_transient(|| {
                self.store.transition_status(
                    appointment_id,
                    AppointmentStatus::Assigned,
                    AppointmentStatus::Closed,
                    None,
                )
            })
            .await?;

        tracing::info!("Appointment {} closed", appointment_id);
        self.audit(
            AuditAction::AppointmentClosed,
            appointment_id,
            json!({ "closed_at": closed.closed_at }),
        );
        self.emit(SchedulingEvent::new(
            SchedulingEventKind::AppointmentClosed,
            closed.clone(),
            vec![closed.patient_id],
        ));

        Ok(true)
    }

    /// 取消预约并释放其时间槽
    ///
    /// 允许从 Requested 或 Assigned 取消；终止状态返回
    /// `InvalidTransition`
    pub async fn cancel_appointment(
        &self,
        appointment_id: Uuid,
        reason: impl Into<String>,
    ) -> Result<Appointment> {
        let current = self.get_appointment_or_fail(appointment_id).await?;
        self.state_machine
            .transition(current.status, &AppointmentEvent::Cancel)?;

        let reason = reason.into();
        let cancelled = self
            .retry_transient(|| {
                self.store.transition_status(
                    appointment_id,
                    current.status,
                    AppointmentStatus::Cancelled,
                    Some(reason.clone()),
                )
            })
            .await?;

        let mut recipients = vec![cancelled.patient_id];
        if let Some(doctor_id) = cancelled.doctor_id {
            recipients.push(doctor_id);
        }
        if let Some(nurse_id) = cancelled.nurse_id {
            recipients.push(nurse_id);
        }

        tracing::info!("Appointment {} cancelled: {}", appointment_id, reason);
        self.audit(
            AuditAction::AppointmentCancelled,
            appointment_id,
            json!({ "reason": reason }),
        );
        self.emit(SchedulingEvent::new(
            SchedulingEventKind::AppointmentCancelled,
            cancelled.clone(),
            recipients,
        ));

        Ok(cancelled)
    }

    /// 只读的时间槽占用查询
    ///
    /// 与条件插入使用同一冲突谓词，仅作预检，不替代原子插入
    pub async fn is_slot_unavailable(&self, time: DateTime<Utc>) -> Result<bool> {
        self.store.slot_occupied(time).await
    }

    // ========== 查询接口 ==========

    pub async fn get_appointment(&self, id: Uuid) -> Result<Option<Appointment>> {
        self.store.get_appointment(id).await
    }

    pub async fn appointments_by_patient(&self, patient_id: Uuid) -> Result<Vec<Appointment>> {
        self.store.appointments_by_patient(patient_id).await
    }

    pub async fn appointments_by_doctor(&self, doctor_id: Uuid) -> Result<Vec<Appointment>> {
        self.store.appointments_by_doctor(doctor_id).await
    }

    pub async fn appointments_by_nurse(&self, nurse_id: Uuid) -> Result<Vec<Appointment>> {
        self.store.appointments_by_nurse(nurse_id).await
    }

    pub async fn all_appointments(&self) -> Result<Vec<Appointment>> {
        self.store.all_appointments().await
    }

    /// 仍有非终止预约的日期列表
    pub async fn active_dates(&self) -> Result<Vec<NaiveDate>> {
        self.store.active_dates().await
    }

    /// 获取状态机实例
    pub fn state_machine(&self) -> &AppointmentStateMachine {
        &self.state_machine
    }

    // ========== 内部辅助 ==========

    async fn get_appointment_or_fail(&self, id: Uuid) -> Result<Appointment> {
        self.store
            .get_appointment(id)
            .await?
            .ok_or_else(|| ClinicError::NotFound(format!("Appointment {} not found", id)))
    }

    /// 瞬时存储失败的有界退避重试；其他错误直接返回
    async fn retry_transient<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Err(ClinicError::TransientStore(msg)) if attempt < self.max_attempts => {
                    tracing::warn!(
                        "Transient store failure (attempt {}/{}): {}",
                        attempt,
                        self.max_attempts,
                        msg
                    );
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn emit(&self, event: SchedulingEvent) {
        if self.events.send(event).is_err() {
            tracing::warn!("Scheduling event channel closed, dropping event");
        }
    }

    fn audit(&self, action: AuditAction, subject_id: Uuid, detail: serde_json::Value) {
        record_detached(&self.audit, AuditRecord::new(action, subject_id, detail));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinic_core::{ConflictPolicy, Doctor, Nurse, Room, TracingAuditSink};
    use clinic_store::MemoryStore;

    struct Fixture {
        engine: Arc<SchedulingEngine>,
        events: mpsc::UnboundedReceiver<SchedulingEvent>,
        doctor_id: Uuid,
        nurse_id: Uuid,
        room_id: Uuid,
    }

    async fn fixture(policy: ConflictPolicy) -> Fixture {
        let store = Arc::new(MemoryStore::new(policy));
        let doctor_id = Uuid::new_v4();
        let nurse_id = Uuid::new_v4();
        let room_id = Uuid::new_v4();

        store
            .upsert_doctor(Doctor {
                id: doctor_id,
                name: "Dr. Chen".to_string(),
                specialty: Some("Cardiology".to_string()),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        store
            .upsert_nurse(Nurse {
                id: nurse_id,
                name: "Nurse Li".to_string(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        store
            .upsert_room(Room {
                id: room_id,
                name: "Room 101".to_string(),
                location: Some("Building A".to_string()),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let (engine, events) = SchedulingEngine::new(store, Arc::new(TracingAuditSink));
        Fixture {
            engine: Arc::new(engine),
            events,
            doctor_id,
            nurse_id,
            room_id,
        }
    }

    fn slot(hours: i64) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::hours(hours)
    }

    /// 在指定状态下准备一条预约
    async fn appointment_in(fx: &Fixture, status: AppointmentStatus, time: DateTime<Utc>) -> Uuid {
        let appointment = fx
            .engine
            .request_appointment(Uuid::new_v4(), time)
            .await
            .unwrap();
        let id = appointment.id;

        match status {
            AppointmentStatus::Requested => {}
            AppointmentStatus::Assigned => {
                fx.engine
                    .assign_appointment(id, fx.doctor_id, fx.nurse_id, fx.room_id)
                    .await
                    .unwrap();
            }
            AppointmentStatus::Closed => {
                fx.engine
                    .assign_appointment(id, fx.doctor_id, fx.nurse_id, fx.room_id)
                    .await
                    .unwrap();
                fx.engine.close_appointment(id).await.unwrap();
            }
            AppointmentStatus::Cancelled => {
                fx.engine
                    .cancel_appointment(id, "test cancellation")
                    .await
                    .unwrap();
            }
        }
        id
    }

    #[tokio::test]
    async fn test_request_rejects_past_time() {
        let fx = fixture(ConflictPolicy::Global).await;
        let result = fx
            .engine
            .request_appointment(Uuid::new_v4(), Utc::now() - chrono::Duration::hours(1))
            .await;
        assert!(matches!(result, Err(ClinicError::Validation(_))));
    }

    #[tokio::test]
    async fn test_concurrent_requests_single_winner() {
        let fx = fixture(ConflictPolicy::Global).await;
        let time = slot(2);

        let engine = fx.engine.clone();
        let first = engine.request_appointment(Uuid::new_v4(), time);
        let engine = fx.engine.clone();
        let second = engine.request_appointment(Uuid::new_v4(), time);

        let (a, b) = tokio::join!(first, second);
        let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);

        let loser = if a.is_err() { a } else { b };
        assert!(matches!(loser, Err(ClinicError::SlotUnavailable(_))));
    }

    #[tokio::test]
    async fn test_cancel_frees_slot() {
        let fx = fixture(ConflictPolicy::Global).await;
        let time = slot(2);

        let first = fx
            .engine
            .request_appointment(Uuid::new_v4(), time)
            .await
            .unwrap();
        assert!(fx.engine.is_slot_unavailable(time).await.unwrap());

        let blocked = fx.engine.request_appointment(Uuid::new_v4(), time).await;
        assert!(matches!(blocked, Err(ClinicError::SlotUnavailable(_))));

        fx.engine
            .cancel_appointment(first.id, "patient request")
            .await
            .unwrap();
        assert!(!fx.engine.is_slot_unavailable(time).await.unwrap());

        assert!(fx
            .engine
            .request_appointment(Uuid::new_v4(), time)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_transition_matrix_closure() {
        // 三种操作与四种状态的完整组合
        let statuses = AppointmentStateMachine::all_states();
        let mut hour = 2;

        for status in statuses {
            let fx = fixture(ConflictPolicy::Global).await;
            let time = slot(hour);
            hour += 1;

            let id = appointment_in(&fx, status, time).await;

            let assign = fx
                .engine
                .assign_appointment(id, fx.doctor_id, fx.nurse_id, fx.room_id)
                .await;
            match status {
                AppointmentStatus::Requested => assert!(assign.is_ok()),
                _ => assert!(matches!(
                    assign,
                    Err(ClinicError::InvalidTransition { .. })
                )),
            }

            // assign 成功后预约已进入 Assigned，重建一条再测 close/cancel
            let fx = fixture(ConflictPolicy::Global).await;
            let id = appointment_in(&fx, status, slot(hour)).await;
            hour += 1;

            let close = fx.engine.close_appointment(id).await;
            match status {
                AppointmentStatus::Assigned => assert!(close.is_ok()),
                _ => assert!(matches!(close, Err(ClinicError::InvalidTransition { .. }))),
            }

            let fx = fixture(ConflictPolicy::Global).await;
            let id = appointment_in(&fx, status, slot(hour)).await;
            hour += 1;

            let cancel = fx.engine.cancel_appointment(id, "matrix test").await;
            match status {
                AppointmentStatus::Requested | AppointmentStatus::Assigned => {
                    assert!(cancel.is_ok())
                }
                _ => assert!(matches!(
                    cancel,
                    Err(ClinicError::InvalidTransition { .. })
                )),
            }
        }
    }

    #[tokio::test]
    async fn test_assign_emits_event_to_patient_doctor_nurse() {
        let mut fx = fixture(ConflictPolicy::Global).await;
        let patient_id = Uuid::new_v4();

        let appointment = fx
            .engine
            .request_appointment(patient_id, slot(2))
            .await
            .unwrap();
        fx.engine
            .assign_appointment(appointment.id, fx.doctor_id, fx.nurse_id, fx.room_id)
            .await
            .unwrap();

        let event = fx.events.recv().await.unwrap();
        assert_eq!(event.kind, SchedulingEventKind::AppointmentAssigned);
        assert_eq!(event.recipients.len(), 3);
        assert!(event.recipients.contains(&patient_id));
        assert!(event.recipients.contains(&fx.doctor_id));
        assert!(event.recipients.contains(&fx.nurse_id));
    }

    #[tokio::test]
    async fn test_cancel_after_assignment_notifies_care_team() {
        let mut fx = fixture(ConflictPolicy::Global).await;
        let patient_id = Uuid::new_v4();

        let appointment = fx
            .engine
            .request_appointment(patient_id, slot(2))
            .await
            .unwrap();
        fx.engine
            .assign_appointment(appointment.id, fx.doctor_id, fx.nurse_id, fx.room_id)
            .await
            .unwrap();
        fx.engine
            .cancel_appointment(appointment.id, "doctor unavailable")
            .await
            .unwrap();

        let assigned = fx.events.recv().await.unwrap();
        assert_eq!(assigned.kind, SchedulingEventKind::AppointmentAssigned);

        let cancelled = fx.events.recv().await.unwrap();
        assert_eq!(cancelled.kind, SchedulingEventKind::AppointmentCancelled);
        assert_eq!(cancelled.recipients.len(), 3);
    }

    #[tokio::test]
    async fn test_assign_unknown_doctor_is_not_found() {
        let fx = fixture(ConflictPolicy::Global).await;
        let appointment = fx
            .engine
            .request_appointment(Uuid::new_v4(), slot(2))
            .await
            .unwrap();

        let result = fx
            .engine
            .assign_appointment(appointment.id, Uuid::new_v4(), fx.nurse_id, fx.room_id)
            .await;
        assert!(matches!(result, Err(ClinicError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_per_resource_policy_conflicts_on_assignment() {
        let fx = fixture(ConflictPolicy::PerResource).await;
        let time = slot(2);

        // 同一时刻允许两条申请
        let first = fx
            .engine
            .request_appointment(Uuid::new_v4(), time)
            .await
            .unwrap();
        let second = fx
            .engine
            .request_appointment(Uuid::new_v4(), time)
            .await
            .unwrap();

        fx.engine
            .assign_appointment(first.id, fx.doctor_id, fx.nurse_id, fx.room_id)
            .await
            .unwrap();

        // 同一医生在该时刻已被占用
        let result = fx
            .engine
            .assign_appointment(second.id, fx.doctor_id, fx.nurse_id, fx.room_id)
            .await;
        assert!(matches!(result, Err(ClinicError::ResourceConflict(_))));
    }

    #[tokio::test]
    async fn test_active_dates_tracks_open_appointments() {
        let fx = fixture(ConflictPolicy::Global).await;
        let time = slot(26);

        let appointment = fx
            .engine
            .request_appointment(Uuid::new_v4(), time)
            .await
            .unwrap();
        let dates = fx.engine.active_dates().await.unwrap();
        assert!(dates.contains(&time.date_naive()));

        fx.engine
            .cancel_appointment(appointment.id, "plans changed")
            .await
            .unwrap();
        let dates = fx.engine.active_dates().await.unwrap();
        assert!(!dates.contains(&time.date_naive()));
    }
}

//! 调度事件监听器
//!
//! 消费调度引擎发布的领域事件，逐个接收人生成通知并交给分发器。
//! 通知链路相对预约主流程是尽力而为：分发失败记录日志后继续。

use crate::dispatcher::NotificationDispatcher;
use chrono::SecondsFormat;
use clinic_scheduling::{SchedulingEvent, SchedulingEventKind};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// 调度事件监听器
pub struct EventListener {
    dispatcher: Arc<NotificationDispatcher>,
    /// 系统通知的发送方用户ID
    system_user_id: Uuid,
}

impl EventListener {
    pub fn new(dispatcher: Arc<NotificationDispatcher>, system_user_id: Uuid) -> Self {
        Self {
            dispatcher,
            system_user_id,
        }
    }

    /// 启动后台消费任务，事件通道关闭后任务退出
    pub fn spawn(self, mut events: mpsc::UnboundedReceiver<SchedulingEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                self.handle_event(event).await;
            }
            tracing::info!("Scheduling event channel closed, listener exiting");
        })
    }

    async fn handle_event(&self, event: SchedulingEvent) {
        let message = render_message(&event);

        for recipient in &event.recipients {
            if let Err(e) = self
                .dispatcher
                .dispatch(self.system_user_id, *recipient, &message)
                .await
            {
                tracing::error!(
                    "Failed to dispatch {} notification for event {}: {}",
                    event.kind.as_str(),
                    event.id,
                    e
                );
            }
        }
    }
}

/// 事件到用户可读文案
///
/// 文案只依赖预约快照，同一事件的重复投递生成相同内容，
/// 从而可以被去重器识别
fn render_message(event: &SchedulingEvent) -> String {
    let time = event
        .appointment
        .scheduled_time
        .to_rfc3339_opts(SecondsFormat::Secs, true);

    match event.kind {
        SchedulingEventKind::AppointmentAssigned => format!(
            "Appointment {} at {} has been assigned",
            event.appointment.id, time
        ),
        SchedulingEventKind::AppointmentClosed => format!(
            "Appointment {} at {} has been completed",
            event.appointment.id, time
        ),
        SchedulingEventKind::AppointmentCancelled => match &event.appointment.cancel_reason {
            Some(reason) => format!(
                "Appointment {} at {} has been cancelled: {}",
                event.appointment.id, time, reason
            ),
            None => format!(
                "Appointment {} at {} has been cancelled",
                event.appointment.id, time
            ),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::NotificationDeduplicator;
    use crate::registry::ConnectionRegistry;
    use chrono::{Duration, Utc};
    use clinic_core::{Appointment, TracingAuditSink};
    use clinic_store::{EntityStore, MemoryStore};

    fn test_dispatcher() -> (Arc<NotificationDispatcher>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::default());
        let dedup = NotificationDeduplicator::new(store.clone(), Duration::minutes(5));
        let dispatcher = Arc::new(NotificationDispatcher::new(
            store.clone(),
            ConnectionRegistry::new(),
            dedup,
            Arc::new(TracingAuditSink),
        ));
        (dispatcher, store)
    }

    fn assigned_event(recipients: Vec<Uuid>) -> SchedulingEvent {
        let mut appointment =
            Appointment::new_requested(Uuid::new_v4(), Utc::now() + Duration::hours(2));
        appointment.status = clinic_core::AppointmentStatus::Assigned;
        SchedulingEvent::new(SchedulingEventKind::AppointmentAssigned, appointment, recipients)
    }

    #[tokio::test]
    async fn test_listener_notifies_every_recipient() {
        let (dispatcher, store) = test_dispatcher();
        let system_id = Uuid::new_v4();
        let listener = EventListener::new(dispatcher, system_id);

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = listener.spawn(rx);

        let recipients = vec![Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        tx.send(assigned_event(recipients.clone())).unwrap();
        drop(tx);
        handle.await.unwrap();

        for recipient in recipients {
            let inbox = store.notifications_for_user(recipient, true).await.unwrap();
            assert_eq!(inbox.len(), 1);
            assert_eq!(inbox[0].from_user_id, system_id);
        }
    }

    #[tokio::test]
    async fn test_redelivered_event_deduplicated() {
        let (dispatcher, store) = test_dispatcher();
        let listener = EventListener::new(dispatcher, Uuid::new_v4());

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = listener.spawn(rx);

        let recipient = Uuid::new_v4();
        let event = assigned_event(vec![recipient]);
        // 同一事件被重复投递两次
        tx.send(event.clone()).unwrap();
        tx.send(event).unwrap();
        drop(tx);
        handle.await.unwrap();

        let inbox = store.notifications_for_user(recipient, false).await.unwrap();
        assert_eq!(inbox.len(), 1);
    }

    #[test]
    fn test_rendered_message_is_deterministic() {
        let event = assigned_event(vec![Uuid::new_v4()]);
        assert_eq!(render_message(&event), render_message(&event));
        assert!(render_message(&event).contains("assigned"));
    }

    /// 完整走一遍预约主场景：申请、分配扇出、同槽拒绝、取消释放
    #[tokio::test]
    async fn test_booking_scenario_end_to_end() {
        use clinic_core::{
            ClinicError, ConflictPolicy, Doctor, Nurse, Room, TracingAuditSink,
        };
        use clinic_scheduling::SchedulingEngine;

        let store: Arc<dyn EntityStore> = Arc::new(MemoryStore::new(ConflictPolicy::Global));
        let registry = ConnectionRegistry::new();
        let dedup = NotificationDeduplicator::new(store.clone(), Duration::minutes(5));
        let dispatcher = Arc::new(NotificationDispatcher::new(
            store.clone(),
            registry.clone(),
            dedup,
            Arc::new(TracingAuditSink),
        ));

        let (engine, events) = SchedulingEngine::new(store.clone(), Arc::new(TracingAuditSink));
        let listener_handle = EventListener::new(dispatcher.clone(), Uuid::nil()).spawn(events);

        let doctor_id = Uuid::new_v4();
        let nurse_id = Uuid::new_v4();
        let room_id = Uuid::new_v4();
        store
            .upsert_doctor(Doctor {
                id: doctor_id,
                name: "Dr. Chen".to_string(),
                specialty: None,
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
                location: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        // 患者 P 两端在线
        let patient = Uuid::new_v4();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let c1 = Uuid::new_v4();
        registry.on_connect(patient, c1, tx1).await;
        registry.on_connect(patient, Uuid::new_v4(), tx2).await;

        // P 申请 -> 分配，P 的两条连接都收到推送
        let slot = Utc::now() + Duration::hours(24);
        let appointment = engine.request_appointment(patient, slot).await.unwrap();
        engine
            .assign_appointment(appointment.id, doctor_id, nurse_id, room_id)
            .await
            .unwrap();
        let push = rx1.recv().await.unwrap();
        assert!(push.message.contains("assigned"));
        assert_eq!(rx2.recv().await.unwrap().id, push.id);

        // Q 申请同一时间槽被拒绝
        let q = Uuid::new_v4();
        let blocked = engine.request_appointment(q, slot).await;
        assert!(matches!(blocked, Err(ClinicError::SlotUnavailable(_))));

        // c1 断开后 P 取消，仅 c2 收到推送
        registry.on_disconnect(c1).await;
        engine
            .cancel_appointment(appointment.id, "patient request")
            .await
            .unwrap();
        let push = rx2.recv().await.unwrap();
        assert!(push.message.contains("cancelled"));
        assert!(rx1.try_recv().is_err());

        // 时间槽释放，Q 再次申请成功
        engine.request_appointment(q, slot).await.unwrap();

        // 关闭事件通道并等待监听器清空队列，再核对医生/护士的收件箱
        drop(engine);
        listener_handle.await.unwrap();

        let doctor_inbox = store.notifications_for_user(doctor_id, false).await.unwrap();
        assert_eq!(doctor_inbox.len(), 2); // assigned + cancelled
        let nurse_inbox = store.notifications_for_user(nurse_id, false).await.unwrap();
        assert_eq!(nurse_inbox.len(), 2);
    }
}

//! 调度引擎演示程序
//!
//! 展示预约调度核心的完整流程：申请、分配、冲突拒绝、取消释放
//! 与实时通知扇出

use chrono::{Duration, Utc};
use clinic_core::{ConflictPolicy, Doctor, Nurse, Room, TracingAuditSink, User};
use clinic_notify::{
    ConnectionRegistry, EventListener, NotificationDeduplicator, NotificationDispatcher,
};
use clinic_scheduling::SchedulingEngine;
use clinic_store::{EntityStore, MemoryStore};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志
    tracing_subscriber::fmt::init();

    println!("🏥 预约调度核心演示\n");

    // 1. 搭建内存存储与调度/通知链路
    let store: Arc<dyn EntityStore> = Arc::new(MemoryStore::new(ConflictPolicy::Global));
    let audit = Arc::new(TracingAuditSink);

    let (engine, events) = SchedulingEngine::new(store.clone(), audit.clone());
    let registry = ConnectionRegistry::new();
    let dedup = NotificationDeduplicator::new(store.clone(), Duration::minutes(5));
    let dispatcher = Arc::new(NotificationDispatcher::new(
        store.clone(),
        registry.clone(),
        dedup,
        audit,
    ));
    let _listener = EventListener::new(dispatcher.clone(), Uuid::nil()).spawn(events);
    println!("✅ 调度引擎与通知链路就绪");

    // 2. 注入目录记录
    let (patient, doctor, nurse, room) = seed_directory(&store).await?;
    println!("✅ 目录记录注入完成");

    // 3. 患者两端在线
    let (tx1, mut rx1) = mpsc::unbounded_channel();
    let (tx2, mut rx2) = mpsc::unbounded_channel();
    let phone = Uuid::new_v4();
    registry.on_connect(patient, phone, tx1).await;
    registry.on_connect(patient, Uuid::new_v4(), tx2).await;
    println!("✅ 患者 {} 两条连接在线", patient);

    // 4. 申请预约
    let slot = Utc::now() + Duration::hours(24);
    let appointment = engine.request_appointment(patient, slot).await?;
    println!("\n📋 预约 {} 已申请，状态 {:?}", appointment.id, appointment.status);

    // 5. 同一时间槽的再次申请被拒绝
    match engine.request_appointment(Uuid::new_v4(), slot).await {
        Err(e) => println!("🚫 同槽申请被拒绝: {}", e),
        Ok(_) => unreachable!("conflicting booking must not succeed"),
    }

    // 6. 分配医生、护士与诊室
    let assigned = engine
        .assign_appointment(appointment.id, doctor, nurse, room)
        .await?;
    println!("👨‍⚕️ 预约已分配，状态 {:?}", assigned.status);

    // 等待通知链路完成扇出
    let push = rx1.recv().await.expect("phone connection receives push");
    println!("📨 连接1收到推送: {}", push.message);
    let push = rx2.recv().await.expect("second connection receives push");
    println!("📨 连接2收到推送: {}", push.message);

    // 7. 一端下线后取消预约，仅存活连接收到推送
    registry.on_disconnect(phone).await;
    let cancelled = engine
        .cancel_appointment(appointment.id, "patient requested")
        .await?;
    println!("\n🗓 预约已取消，状态 {:?}", cancelled.status);

    let push = rx2.recv().await.expect("live connection receives push");
    println!("📨 存活连接收到推送: {}", push.message);

    // 8. 时间槽释放后可再次预约
    let rebooked = engine.request_appointment(Uuid::new_v4(), slot).await?;
    println!("✅ 时间槽已释放，新预约 {} 成功", rebooked.id);

    // 9. 未读通知统计
    let unread = dispatcher.unread_count(patient).await?;
    println!("\n📊 患者未读通知: {}", unread);

    Ok(())
}

/// 注入演示目录记录
async fn seed_directory(
    store: &Arc<dyn EntityStore>,
) -> Result<(Uuid, Uuid, Uuid, Uuid), Box<dyn std::error::Error>> {
    let now = Utc::now();

    let patient = User {
        id: Uuid::new_v4(),
        username: "patient".to_string(),
        name: "Jane Doe".to_string(),
        role: clinic_core::Role::Patient,
        is_active: true,
        created_at: now,
    };
    store.upsert_user(patient.clone()).await?;

    let doctor = Doctor {
        id: Uuid::new_v4(),
        name: "Dr. Chen".to_string(),
        specialty: Some("Cardiology".to_string()),
        created_at: now,
    };
    store.upsert_doctor(doctor.clone()).await?;

    let nurse = Nurse {
        id: Uuid::new_v4(),
        name: "Nurse Li".to_string(),
        created_at: now,
    };
    store.upsert_nurse(nurse.clone()).await?;

    let room = Room {
        id: Uuid::new_v4(),
        name: "Room 101".to_string(),
        location: Some("Building A".to_string()),
        created_at: now,
    };
    store.upsert_room(room.clone()).await?;

    Ok((patient.id, doctor.id, nurse.id, room.id))
}

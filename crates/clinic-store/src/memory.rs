//! 内存存储实现
//!
//! 单个写锁覆盖全部表，条件写入在一次持锁中完成检查与落表，
//! 以此串行化同一冲突键上的并发请求。用于测试与单机部署。

use crate::store::EntityStore;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use clinic_core::{
    Appointment, AppointmentStatus, ClinicError, ConflictPolicy, Doctor, Notification, Nurse,
    Result, Room, User,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// 内存表集合
#[derive(Debug, Default)]
struct Tables {
    appointments: HashMap<Uuid, Appointment>,
    notifications: HashMap<Uuid, Notification>,
    users: HashMap<Uuid, User>,
    doctors: HashMap<Uuid, Doctor>,
    nurses: HashMap<Uuid, Nurse>,
    rooms: HashMap<Uuid, Room>,
}

impl Tables {
    /// 该时刻仍占用时间槽的非终止预约
    fn active_at(&self, time: DateTime<Utc>) -> impl Iterator<Item = &Appointment> {
        self.appointments
            .values()
            .filter(move |a| a.scheduled_time == time && a.occupies_slot())
    }
}

/// 内存实体存储
#[derive(Debug, Clone)]
pub struct MemoryStore {
    policy: ConflictPolicy,
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new(policy: ConflictPolicy) -> Self {
        Self {
            policy,
            tables: Arc::new(RwLock::new(Tables::default())),
        }
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(ConflictPolicy::Global)
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn insert_appointment_if_slot_free(
        &self,
        appointment: Appointment,
    ) -> Result<Appointment> {
        let mut tables = self.tables.write().await;

        // Global 策略：同一时刻全系统至多一条非终止预约。
        // PerResource 策略在申请阶段不判冲突，占用在分配阶段按资源判定。
        if self.policy == ConflictPolicy::Global
            && tables.active_at(appointment.scheduled_time).next().is_some()
        {
            return Err(ClinicError::SlotUnavailable(format!(
                "Slot {} is already taken",
                appointment.scheduled_time
            )));
        }

        tables
            .appointments
            .insert(appointment.id, appointment.clone());
        Ok(appointment)
    }

    async fn slot_occupied(&self, time: DateTime<Utc>) -> Result<bool> {
        let tables = self.tables.read().await;
        Ok(self.policy == ConflictPolicy::Global && tables.active_at(time).next().is_some())
    }

    async fn assign_if_resources_free(
        &self,
        id: Uuid,
        doctor_id: Uuid,
        nurse_id: Uuid,
        room_id: Uuid,
    ) -> Result<Appointment> {
        let mut tables = self.tables.write().await;

        let current = tables
            .appointments
            .get(&id)
            .cloned()
            .ok_or_else(|| ClinicError::NotFound(format!("Appointment {} not found", id)))?;

        if current.status != AppointmentStatus::Requested {
            return Err(ClinicError::InvalidTransition {
                from: current.status.to_string(),
                event: "assign".to_string(),
            });
        }

        // 同一时刻的其他非终止预约不得占用相同的医生/护士/诊室
        let conflict = tables.active_at(current.scheduled_time).find(|a| {
            a.id != id
                && (a.doctor_id == Some(doctor_id)
                    || a.nurse_id == Some(nurse_id)
                    || a.room_id == Some(room_id))
        });
        if let Some(other) = conflict {
            return Err(ClinicError::ResourceConflict(format!(
                "Doctor/nurse/room already committed to appointment {} at {}",
                other.id, current.scheduled_time
            )));
        }

        let appointment = tables
            .appointments
            .get_mut(&id)
            .ok_or_else(|| ClinicError::NotFound(format!("Appointment {} not found", id)))?;
        appointment.doctor_id = Some(doctor_id);
        appointment.nurse_id = Some(nurse_id);
        appointment.room_id = Some(room_id);
        appointment.status = AppointmentStatus::Assigned;
        Ok(appointment.clone())
    }

    async fn transition_status(
        &self,
        id: Uuid,
        expected: AppointmentStatus,
        to: AppointmentStatus,
        reason: Option<String>,
    ) -> Result<Appointment> {
        let mut tables = self.tables.write().await;

        let appointment = tables
            .appointments
            .get_mut(&id)
            .ok_or_else(|| ClinicError::NotFound(format!("Appointment {} not found", id)))?;

        if appointment.status != expected {
            return Err(ClinicError::InvalidTransition {
                from: appointment.status.to_string(),
                event: to.to_string(),
            });
        }

        appointment.status = to;
        match to {
            AppointmentStatus::Closed => appointment.closed_at = Some(Utc::now()),
            AppointmentStatus::Cancelled => {
                appointment.cancelled_at = Some(Utc::now());
                appointment.cancel_reason = reason;
            }
            _ => {}
        }
        Ok(appointment.clone())
    }

    async fn get_appointment(&self, id: Uuid) -> Result<Option<Appointment>> {
        Ok(self.tables.read().await.appointments.get(&id).cloned())
    }

    async fn appointments_by_patient(&self, patient_id: Uuid) -> Result<Vec<Appointment>> {
        let tables = self.tables.read().await;
        let mut items: Vec<Appointment> = tables
            .appointments
            .values()
            .filter(|a| a.patient_id == patient_id)
            .cloned()
            .collect();
        items.sort_by_key(|a| a.scheduled_time);
        Ok(items)
    }

    async fn appointments_by_doctor(&self, doctor_id: Uuid) -> Result<Vec<Appointment>> {
        let tables = self.tables.read().await;
        let mut items: Vec<Appointment> = tables
            .appointments
            .values()
            .filter(|a| a.doctor_id == Some(doctor_id))
            .cloned()
            .collect();
        items.sort_by_key(|a| a.scheduled_time);
        Ok(items)
    }

    async fn appointments_by_nurse(&self, nurse_id: Uuid) -> Result<Vec<Appointment>> {
        let tables = self.tables.read().await;
        let mut items: Vec<Appointment> = tables
            .appointments
            .values()
            .filter(|a| a.nurse_id == Some(nurse_id))
            .cloned()
            .collect();
        items.sort_by_key(|a| a.scheduled_time);
        Ok(items)
    }

    async fn all_appointments(&self) -> Result<Vec<Appointment>> {
        let tables = self.tables.read().await;
        let mut items: Vec<Appointment> = tables.appointments.values().cloned().collect();
        items.sort_by_key(|a| a.scheduled_time);
        Ok(items)
    }

    async fn active_dates(&self) -> Result<Vec<NaiveDate>> {
        let tables = self.tables.read().await;
        let mut dates: Vec<NaiveDate> = tables
            .appointments
            .values()
            .filter(|a| a.occupies_slot())
            .map(|a| a.scheduled_time.date_naive())
            .collect();
        dates.sort();
        dates.dedup();
        Ok(dates)
    }

    async fn insert_notification(&self, notification: Notification) -> Result<Notification> {
        let mut tables = self.tables.write().await;
        tables
            .notifications
            .insert(notification.id, notification.clone());
        Ok(notification)
    }

    async fn recent_duplicate(
        &self,
        from_user_id: Uuid,
        to_user_id: Uuid,
        message: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Notification>> {
        let tables = self.tables.read().await;
        Ok(tables
            .notifications
            .values()
            .filter(|n| {
                n.from_user_id == from_user_id
                    && n.to_user_id == to_user_id
                    && n.message == message
                    && n.created_at >= since
            })
            .max_by_key(|n| n.created_at)
            .cloned())
    }

    async fn get_notification(&self, id: Uuid) -> Result<Option<Notification>> {
        Ok(self.tables.read().await.notifications.get(&id).cloned())
    }

    async fn mark_notification_read(&self, id: Uuid) -> Result<Notification> {
        let mut tables = self.tables.write().await;
        let notification = tables
            .notifications
            .get_mut(&id)
            .ok_or_else(|| ClinicError::NotFound(format!("Notification {} not found", id)))?;

        if !notification.is_read {
            notification.is_read = true;
            notification.read_at = Some(Utc::now());
        }
        Ok(notification.clone())
    }

    async fn mark_all_read(&self, user_id: Uuid) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();
        let mut flipped = 0;
        for notification in tables.notifications.values_mut() {
            if notification.to_user_id == user_id && !notification.is_read {
                notification.is_read = true;
                notification.read_at = Some(now);
                flipped += 1;
            }
        }
        Ok(flipped)
    }

    async fn notifications_for_user(
        &self,
        user_id: Uuid,
        unread_only: bool,
    ) -> Result<Vec<Notification>> {
        let tables = self.tables.read().await;
        let mut items: Vec<Notification> = tables
            .notifications
            .values()
            .filter(|n| n.to_user_id == user_id && (!unread_only || !n.is_read))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }

    async fn unread_count(&self, user_id: Uuid) -> Result<u64> {
        let tables = self.tables.read().await;
        Ok(tables
            .notifications
            .values()
            .filter(|n| n.to_user_id == user_id && !n.is_read)
            .count() as u64)
    }

    async fn upsert_user(&self, user: User) -> Result<()> {
        self.tables.write().await.users.insert(user.id, user);
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn upsert_doctor(&self, doctor: Doctor) -> Result<()> {
        self.tables.write().await.doctors.insert(doctor.id, doctor);
        Ok(())
    }

    async fn get_doctor(&self, id: Uuid) -> Result<Option<Doctor>> {
        Ok(self.tables.read().await.doctors.get(&id).cloned())
    }

    async fn upsert_nurse(&self, nurse: Nurse) -> Result<()> {
        self.tables.write().await.nurses.insert(nurse.id, nurse);
        Ok(())
    }

    async fn get_nurse(&self, id: Uuid) -> Result<Option<Nurse>> {
        Ok(self.tables.read().await.nurses.get(&id).cloned())
    }

    async fn upsert_room(&self, room: Room) -> Result<()> {
        self.tables.write().await.rooms.insert(room.id, room);
        Ok(())
    }

    async fn get_room(&self, id: Uuid) -> Result<Option<Room>> {
        Ok(self.tables.read().await.rooms.get(&id).cloned())
    }
}

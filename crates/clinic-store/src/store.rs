//! 实体存储适配接口
//!
//! 调度引擎与通知分发器依赖的原子读写原语。条件写入（条件插入、
//! 资源占用校验、状态 CAS）必须在实现内部原子完成，调用方不得
//! 以"先查后写"的两步调用替代。

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use clinic_core::{
    Appointment, AppointmentStatus, Doctor, Notification, Nurse, Result, Room, User,
};
use uuid::Uuid;

/// 实体存储适配器
///
/// 所有实现必须保证：同一冲突键上的并发条件写入至多一个成功
#[async_trait]
pub trait EntityStore: Send + Sync {
    // ========== 预约相关操作 ==========

    /// 原子条件插入：仅当时间槽按冲突策略未被占用时写入新预约
    ///
    /// 占用时返回 `SlotUnavailable`
    async fn insert_appointment_if_slot_free(&self, appointment: Appointment)
        -> Result<Appointment>;

    /// 判断时间槽是否已被非终止预约占用（与条件插入使用同一谓词）
    async fn slot_occupied(&self, time: DateTime<Utc>) -> Result<bool>;

    /// 原子分配：校验当前状态为 Requested 且医生/护士/诊室在该时刻
    /// 未被其他非终止预约占用，然后写入分配结果并转为 Assigned
    async fn assign_if_resources_free(
        &self,
        id: Uuid,
        doctor_id: Uuid,
        nurse_id: Uuid,
        room_id: Uuid,
    ) -> Result<Appointment>;

    /// 比较并交换式的状态迁移，附带终止时间戳与取消原因
    async fn transition_status(
        &self,
        id: Uuid,
        expected: AppointmentStatus,
        to: AppointmentStatus,
        reason: Option<String>,
    ) -> Result<Appointment>;

    async fn get_appointment(&self, id: Uuid) -> Result<Option<Appointment>>;

    async fn appointments_by_patient(&self, patient_id: Uuid) -> Result<Vec<Appointment>>;

    async fn appointments_by_doctor(&self, doctor_id: Uuid) -> Result<Vec<Appointment>>;

    async fn appointments_by_nurse(&self, nurse_id: Uuid) -> Result<Vec<Appointment>>;

    async fn all_appointments(&self) -> Result<Vec<Appointment>>;

    /// 仍有非终止预约的日期列表，升序去重
    async fn active_dates(&self) -> Result<Vec<NaiveDate>>;

    // ========== 通知相关操作 ==========

    async fn insert_notification(&self, notification: Notification) -> Result<Notification>;

    /// 查找 since 之后创建的相同 (from, to, message) 通知，供去重器使用
    async fn recent_duplicate(
        &self,
        from_user_id: Uuid,
        to_user_id: Uuid,
        message: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Notification>>;

    async fn get_notification(&self, id: Uuid) -> Result<Option<Notification>>;

    /// 单向翻转 unread -> read；已读时原样返回
    async fn mark_notification_read(&self, id: Uuid) -> Result<Notification>;

    /// 返回本次翻转的通知条数
    async fn mark_all_read(&self, user_id: Uuid) -> Result<u64>;

    async fn notifications_for_user(
        &self,
        user_id: Uuid,
        unread_only: bool,
    ) -> Result<Vec<Notification>>;

    async fn unread_count(&self, user_id: Uuid) -> Result<u64>;

    // ========== 目录记录操作 ==========

    async fn upsert_user(&self, user: User) -> Result<()>;

    async fn get_user(&self, id: Uuid) -> Result<Option<User>>;

    async fn upsert_doctor(&self, doctor: Doctor) -> Result<()>;

    async fn get_doctor(&self, id: Uuid) -> Result<Option<Doctor>>;

    async fn upsert_nurse(&self, nurse: Nurse) -> Result<()>;

    async fn get_nurse(&self, id: Uuid) -> Result<Option<Nurse>>;

    async fn upsert_room(&self, room: Room) -> Result<()>;

    async fn get_room(&self, id: Uuid) -> Result<Option<Room>>;
}

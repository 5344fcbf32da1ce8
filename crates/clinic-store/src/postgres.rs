//! PostgreSQL存储实现
//!
//! 时间槽唯一性由非终止行上的部分唯一索引保证，条件插入走
//! `ON CONFLICT DO NOTHING`；分配在事务内串行化同一时刻的竞争。

use crate::connection::DatabasePool;
use crate::models::*;
use crate::store::EntityStore;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use clinic_core::{
    Appointment, AppointmentStatus, ClinicError, ConflictPolicy, Doctor, Notification, Nurse,
    Result, Room, User,
};
use sqlx::Row;
use uuid::Uuid;

/// PostgreSQL实体存储
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: DatabasePool,
    policy: ConflictPolicy,
}

/// sqlx错误到统一错误类型的映射
fn map_db_err(e: sqlx::Error) -> ClinicError {
    match &e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            ClinicError::TransientStore(e.to_string())
        }
        _ => ClinicError::Database(e.to_string()),
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

impl PostgresStore {
    pub fn new(pool: DatabasePool, policy: ConflictPolicy) -> Self {
        Self { pool, policy }
    }

    /// 创建数据库表
    pub async fn create_tables(&self) -> Result<()> {
        let pool = self.pool.pool();

        // 创建预约表
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS appointments (
                id UUID PRIMARY KEY,
                patient_id UUID NOT NULL,
                doctor_id UUID,
                nurse_id UUID,
                room_id UUID,
                scheduled_time TIMESTAMP WITH TIME ZONE NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'REQUESTED',
                cancel_reason TEXT,
                created_at TIMESTAMP WITH TIME ZONE DEFAULT NOW(),
                closed_at TIMESTAMP WITH TIME ZONE,
                cancelled_at TIMESTAMP WITH TIME ZONE
            )
        "#,
        )
        .execute(pool)
        .await
        .map_err(map_db_err)?;

        // 创建通知表
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS notifications (
                id UUID PRIMARY KEY,
                from_user_id UUID NOT NULL,
                to_user_id UUID NOT NULL,
                message TEXT NOT NULL,
                created_at TIMESTAMP WITH TIME ZONE DEFAULT NOW(),
                is_read BOOLEAN NOT NULL DEFAULT FALSE,
                read_at TIMESTAMP WITH TIME ZONE
            )
        "#,
        )
        .execute(pool)
        .await
        .map_err(map_db_err)?;

        // 创建目录表
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id UUID PRIMARY KEY,
                username VARCHAR(64) UNIQUE NOT NULL,
                name VARCHAR(255) NOT NULL,
                role VARCHAR(16) NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
            )
        "#,
        )
        .execute(pool)
        .await
        .map_err(map_db_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS doctors (
                id UUID PRIMARY KEY,
                name VARCHAR(255) NOT NULL,
                specialty VARCHAR(64),
                created_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
            )
        "#,
        )
        .execute(pool)
        .await
        .map_err(map_db_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS nurses (
                id UUID PRIMARY KEY,
                name VARCHAR(255) NOT NULL,
                created_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
            )
        "#,
        )
        .execute(pool)
        .await
        .map_err(map_db_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rooms (
                id UUID PRIMARY KEY,
                name VARCHAR(255) NOT NULL,
                location VARCHAR(255),
                created_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
            )
        "#,
        )
        .execute(pool)
        .await
        .map_err(map_db_err)?;

        self.create_indexes().await?;

        tracing::info!("Database tables created successfully");
        Ok(())
    }

    /// 创建数据库索引
    async fn create_indexes(&self) -> Result<()> {
        let pool = self.pool.pool();

        let mut indexes = vec![
            "CREATE INDEX IF NOT EXISTS idx_appointments_patient_id ON appointments(patient_id)",
            "CREATE INDEX IF NOT EXISTS idx_appointments_doctor_id ON appointments(doctor_id)",
            "CREATE INDEX IF NOT EXISTS idx_appointments_nurse_id ON appointments(nurse_id)",
            "CREATE INDEX IF NOT EXISTS idx_appointments_scheduled_time ON appointments(scheduled_time)",
            "CREATE INDEX IF NOT EXISTS idx_notifications_to_user ON notifications(to_user_id, is_read)",
            "CREATE INDEX IF NOT EXISTS idx_notifications_dedup ON notifications(from_user_id, to_user_id, created_at)",
        ];

        // Global 策略的时间槽唯一性约束：非终止行上的部分唯一索引
        if self.policy == ConflictPolicy::Global {
            indexes.push(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_appointments_active_slot \
                 ON appointments(scheduled_time) WHERE status IN ('REQUESTED', 'ASSIGNED')",
            );
        }

        for index_sql in indexes {
            sqlx::query(index_sql)
                .execute(pool)
                .await
                .map_err(map_db_err)?;
        }

        tracing::info!("Database indexes created successfully");
        Ok(())
    }
}

#[async_trait]
impl EntityStore for PostgresStore {
    async fn insert_appointment_if_slot_free(
        &self,
        appointment: Appointment,
    ) -> Result<Appointment> {
        let pool = self.pool.pool();

        let sql = match self.policy {
            ConflictPolicy::Global => {
                r#"
                INSERT INTO appointments
                    (id, patient_id, doctor_id, nurse_id, room_id, scheduled_time, status,
                     cancel_reason, created_at, closed_at, cancelled_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                ON CONFLICT (scheduled_time) WHERE status IN ('REQUESTED', 'ASSIGNED')
                DO NOTHING
                RETURNING *
            "#
            }
            ConflictPolicy::PerResource => {
                r#"
                INSERT INTO appointments
                    (id, patient_id, doctor_id, nurse_id, room_id, scheduled_time, status,
                     cancel_reason, created_at, closed_at, cancelled_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                RETURNING *
            "#
            }
        };

        let row = sqlx::query_as::<_, DbAppointment>(sql)
            .bind(appointment.id)
            .bind(appointment.patient_id)
            .bind(appointment.doctor_id)
            .bind(appointment.nurse_id)
            .bind(appointment.room_id)
            .bind(appointment.scheduled_time)
            .bind(appointment.status.as_str())
            .bind(&appointment.cancel_reason)
            .bind(appointment.created_at)
            .bind(appointment.closed_at)
            .bind(appointment.cancelled_at)
            .fetch_optional(pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    ClinicError::SlotUnavailable(format!(
                        "Slot {} is already taken",
                        appointment.scheduled_time
                    ))
                } else {
                    map_db_err(e)
                }
            })?;

        match row {
            Some(row) => Ok(Appointment::from(row)),
            None => Err(ClinicError::SlotUnavailable(format!(
                "Slot {} is already taken",
                appointment.scheduled_time
            ))),
        }
    }

    async fn slot_occupied(&self, time: DateTime<Utc>) -> Result<bool> {
        if self.policy != ConflictPolicy::Global {
            return Ok(false);
        }

        let occupied: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM appointments
                WHERE scheduled_time = $1 AND status IN ('REQUESTED', 'ASSIGNED')
            )
        "#,
        )
        .bind(time)
        .fetch_one(self.pool.pool())
        .await
        .map_err(map_db_err)?;

        Ok(occupied)
    }

    async fn assign_if_resources_free(
        &self,
        id: Uuid,
        doctor_id: Uuid,
        nurse_id: Uuid,
        room_id: Uuid,
    ) -> Result<Appointment> {
        let mut tx = self.pool.pool().begin().await.map_err(map_db_err)?;

        let current = sqlx::query_as::<_, DbAppointment>(
            "SELECT * FROM appointments WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_db_err)?
        .map(Appointment::from)
        .ok_or_else(|| ClinicError::NotFound(format!("Appointment {} not found", id)))?;

        if current.status != AppointmentStatus::Requested {
            return Err(ClinicError::InvalidTransition {
                from: current.status.to_string(),
                event: "assign".to_string(),
            });
        }

        // 同一时刻的资源竞争在事务级咨询锁下串行化
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(current.scheduled_time.timestamp())
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;

        let conflict: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM appointments
                WHERE id <> $1
                  AND scheduled_time = $2
                  AND status IN ('REQUESTED', 'ASSIGNED')
                  AND (doctor_id = $3 OR nurse_id = $4 OR room_id = $5)
            )
        "#,
        )
        .bind(id)
        .bind(current.scheduled_time)
        .bind(doctor_id)
        .bind(nurse_id)
        .bind(room_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_db_err)?;

        if conflict {
            return Err(ClinicError::ResourceConflict(format!(
                "Doctor/nurse/room already committed at {}",
                current.scheduled_time
            )));
        }

        let row = sqlx::query_as::<_, DbAppointment>(
            r#"
            UPDATE appointments
            SET doctor_id = $2, nurse_id = $3, room_id = $4, status = 'ASSIGNED'
            WHERE id = $1
            RETURNING *
        "#,
        )
        .bind(id)
        .bind(doctor_id)
        .bind(nurse_id)
        .bind(room_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_db_err)?;

        tx.commit().await.map_err(map_db_err)?;
        Ok(Appointment::from(row))
    }

    async fn transition_status(
        &self,
        id: Uuid,
        expected: AppointmentStatus,
        to: AppointmentStatus,
        reason: Option<String>,
    ) -> Result<Appointment> {
        let pool = self.pool.pool();

        let row = sqlx::query_as::<_, DbAppointment>(
            r#"
            UPDATE appointments
            SET status = $3,
                closed_at = CASE WHEN $3::text = 'CLOSED' THEN NOW() ELSE closed_at END,
                cancelled_at = CASE WHEN $3::text = 'CANCELLED' THEN NOW() ELSE cancelled_at END,
                cancel_reason = COALESCE($4, cancel_reason)
            WHERE id = $1 AND status = $2
            RETURNING *
        "#,
        )
        .bind(id)
        .bind(expected.as_str())
        .bind(to.as_str())
        .bind(&reason)
        .fetch_optional(pool)
        .await
        .map_err(map_db_err)?;

        if let Some(row) = row {
            return Ok(Appointment::from(row));
        }

        // CAS 落空：区分不存在与状态不符
        let current = self.get_appointment(id).await?;
        match current {
            None => Err(ClinicError::NotFound(format!(
                "Appointment {} not found",
                id
            ))),
            Some(appointment) => Err(ClinicError::InvalidTransition {
                from: appointment.status.to_string(),
                event: to.to_string(),
            }),
        }
    }

    async fn get_appointment(&self, id: Uuid) -> Result<Option<Appointment>> {
        let row = sqlx::query_as::<_, DbAppointment>("SELECT * FROM appointments WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(map_db_err)?;
        Ok(row.map(Appointment::from))
    }

    async fn appointments_by_patient(&self, patient_id: Uuid) -> Result<Vec<Appointment>> {
        let rows = sqlx::query_as::<_, DbAppointment>(
            "SELECT * FROM appointments WHERE patient_id = $1 ORDER BY scheduled_time",
        )
        .bind(patient_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(map_db_err)?;
        Ok(rows.into_iter().map(Appointment::from).collect())
    }

    async fn appointments_by_doctor(&self, doctor_id: Uuid) -> Result<Vec<Appointment>> {
        let rows = sqlx::query_as::<_, DbAppointment>(
            "SELECT * FROM appointments WHERE doctor_id = $1 ORDER BY scheduled_time",
        )
        .bind(doctor_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(map_db_err)?;
        Ok(rows.into_iter().map(Appointment::from).collect())
    }

    async fn appointments_by_nurse(&self, nurse_id: Uuid) -> Result<Vec<Appointment>> {
        let rows = sqlx::query_as::<_, DbAppointment>(
            "SELECT * FROM appointments WHERE nurse_id = $1 ORDER BY scheduled_time",
        )
        .bind(nurse_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(map_db_err)?;
        Ok(rows.into_iter().map(Appointment::from).collect())
    }

    async fn all_appointments(&self) -> Result<Vec<Appointment>> {
        let rows = sqlx::query_as::<_, DbAppointment>(
            "SELECT * FROM appointments ORDER BY scheduled_time",
        )
        .fetch_all(self.pool.pool())
        .await
        .map_err(map_db_err)?;
        Ok(rows.into_iter().map(Appointment::from).collect())
    }

    async fn active_dates(&self) -> Result<Vec<NaiveDate>> {
        let dates: Vec<NaiveDate> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT DATE(scheduled_time) AS active_date FROM appointments
            WHERE status IN ('REQUESTED', 'ASSIGNED')
            ORDER BY active_date
        "#,
        )
        .fetch_all(self.pool.pool())
        .await
        .map_err(map_db_err)?;
        Ok(dates)
    }

    async fn insert_notification(&self, notification: Notification) -> Result<Notification> {
        let row = sqlx::query_as::<_, DbNotification>(
            r#"
            INSERT INTO notifications
                (id, from_user_id, to_user_id, message, created_at, is_read, read_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
        "#,
        )
        .bind(notification.id)
        .bind(notification.from_user_id)
        .bind(notification.to_user_id)
        .bind(&notification.message)
        .bind(notification.created_at)
        .bind(notification.is_read)
        .bind(notification.read_at)
        .fetch_one(self.pool.pool())
        .await
        .map_err(map_db_err)?;
        Ok(Notification::from(row))
    }

    async fn recent_duplicate(
        &self,
        from_user_id: Uuid,
        to_user_id: Uuid,
        message: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<Notification>> {
        let row = sqlx::query_as::<_, DbNotification>(
            r#"
            SELECT * FROM notifications
            WHERE from_user_id = $1 AND to_user_id = $2 AND message = $3 AND created_at >= $4
            ORDER BY created_at DESC
            LIMIT 1
        "#,
        )
        .bind(from_user_id)
        .bind(to_user_id)
        .bind(message)
        .bind(since)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(map_db_err)?;
        Ok(row.map(Notification::from))
    }

    async fn get_notification(&self, id: Uuid) -> Result<Option<Notification>> {
        let row = sqlx::query_as::<_, DbNotification>("SELECT * FROM notifications WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(map_db_err)?;
        Ok(row.map(Notification::from))
    }

    async fn mark_notification_read(&self, id: Uuid) -> Result<Notification> {
        let row = sqlx::query_as::<_, DbNotification>(
            r#"
            UPDATE notifications
            SET is_read = TRUE, read_at = COALESCE(read_at, NOW())
            WHERE id = $1
            RETURNING *
        "#,
        )
        .bind(id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(map_db_err)?;

        row.map(Notification::from)
            .ok_or_else(|| ClinicError::NotFound(format!("Notification {} not found", id)))
    }

    async fn mark_all_read(&self, user_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET is_read = TRUE, read_at = NOW()
            WHERE to_user_id = $1 AND is_read = FALSE
        "#,
        )
        .bind(user_id)
        .execute(self.pool.pool())
        .await
        .map_err(map_db_err)?;
        Ok(result.rows_affected())
    }

    async fn notifications_for_user(
        &self,
        user_id: Uuid,
        unread_only: bool,
    ) -> Result<Vec<Notification>> {
        let rows = sqlx::query_as::<_, DbNotification>(
            r#"
            SELECT * FROM notifications
            WHERE to_user_id = $1 AND (NOT $2 OR is_read = FALSE)
            ORDER BY created_at DESC
        "#,
        )
        .bind(user_id)
        .bind(unread_only)
        .fetch_all(self.pool.pool())
        .await
        .map_err(map_db_err)?;
        Ok(rows.into_iter().map(Notification::from).collect())
    }

    async fn unread_count(&self, user_id: Uuid) -> Result<u64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS unread FROM notifications WHERE to_user_id = $1 AND is_read = FALSE",
        )
        .bind(user_id)
        .fetch_one(self.pool.pool())
        .await
        .map_err(map_db_err)?;
        let count: i64 = row.get("unread");
        Ok(count as u64)
    }

    async fn upsert_user(&self, user: User) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, name, role, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
            SET username = $2, name = $3, role = $4, is_active = $5
        "#,
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.name)
        .bind(user.role.as_str())
        .bind(user.is_active)
        .bind(user.created_at)
        .execute(self.pool.pool())
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, DbUser>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(map_db_err)?;
        Ok(row.map(User::from))
    }

    async fn upsert_doctor(&self, doctor: Doctor) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO doctors (id, name, specialty, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET name = $2, specialty = $3
        "#,
        )
        .bind(doctor.id)
        .bind(&doctor.name)
        .bind(&doctor.specialty)
        .bind(doctor.created_at)
        .execute(self.pool.pool())
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    async fn get_doctor(&self, id: Uuid) -> Result<Option<Doctor>> {
        let row = sqlx::query_as::<_, DbDoctor>("SELECT * FROM doctors WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(map_db_err)?;
        Ok(row.map(Doctor::from))
    }

    async fn upsert_nurse(&self, nurse: Nurse) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO nurses (id, name, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET name = $2
        "#,
        )
        .bind(nurse.id)
        .bind(&nurse.name)
        .bind(nurse.created_at)
        .execute(self.pool.pool())
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    async fn get_nurse(&self, id: Uuid) -> Result<Option<Nurse>> {
        let row = sqlx::query_as::<_, DbNurse>("SELECT * FROM nurses WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(map_db_err)?;
        Ok(row.map(Nurse::from))
    }

    async fn upsert_room(&self, room: Room) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO rooms (id, name, location, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET name = $2, location = $3
        "#,
        )
        .bind(room.id)
        .bind(&room.name)
        .bind(&room.location)
        .bind(room.created_at)
        .execute(self.pool.pool())
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    async fn get_room(&self, id: Uuid) -> Result<Option<Room>> {
        let row = sqlx::query_as::<_, DbRoom>("SELECT * FROM rooms WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(map_db_err)?;
        Ok(row.map(Room::from))
    }
}

//! 通知去重器
//!
//! 判定同一 (message, from, to) 是否在窗口期内已经发送过。
//! 窗口保证为尽力而为：进程内以按键互斥把"查重+写入"合并为
//! 单个逻辑单元；跨进程部署下仍可能出现极少量重复，属已记录的
//! 限制而非缺陷。

use chrono::{Duration, Utc};
use clinic_core::{Notification, Result};
use clinic_store::EntityStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

type DedupKey = (Uuid, Uuid, String);

/// 通知去重器
pub struct NotificationDeduplicator {
    store: Arc<dyn EntityStore>,
    window: Duration,
    guards: Mutex<HashMap<DedupKey, Arc<Mutex<()>>>>,
}

impl NotificationDeduplicator {
    pub fn new(store: Arc<dyn EntityStore>, window: Duration) -> Self {
        Self {
            store,
            window,
            guards: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// 窗口期内存在相同通知时返回该通知
    pub async fn should_suppress(
        &self,
        from_user_id: Uuid,
        to_user_id: Uuid,
        message: &str,
    ) -> Result<Option<Notification>> {
        self.should_suppress_within(from_user_id, to_user_id, message, self.window)
            .await
    }

    /// 以调用方指定的窗口判定
    pub async fn should_suppress_within(
        &self,
        from_user_id: Uuid,
        to_user_id: Uuid,
        message: &str,
        window: Duration,
    ) -> Result<Option<Notification>> {
        let since = Utc::now() - window;
        self.store
            .recent_duplicate(from_user_id, to_user_id, message, since)
            .await
    }

    /// 获取该键的进程内互斥锁，持有期间查重与写入不会交错
    pub async fn key_guard(
        &self,
        from_user_id: Uuid,
        to_user_id: Uuid,
        message: &str,
    ) -> OwnedMutexGuard<()> {
        let key = (from_user_id, to_user_id, message.to_string());
        let guard = {
            let mut guards = self.guards.lock().await;
            // 无人持有的键顺手清理，防止键集合无界增长
            guards.retain(|_, mutex| Arc::strong_count(mutex) > 1);
            guards.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        guard.lock_owned().await
    }
}

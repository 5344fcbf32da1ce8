//! 通知分发器
//!
//! 持久化通知并向接收人的全部在线连接推送。持久化是送达保证，
//! 在线推送为尽力而为；推送失败静默丢弃，不影响触发方。

use crate::dedup::NotificationDeduplicator;
use crate::registry::{ConnectionRegistry, PushMessage};
use clinic_core::audit::{record_detached, AuditAction, AuditRecord, AuditSink};
use clinic_core::{Notification, Result};
use clinic_store::EntityStore;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// 通知分发器
pub struct NotificationDispatcher {
    store: Arc<dyn EntityStore>,
    registry: ConnectionRegistry,
    dedup: NotificationDeduplicator,
    audit: Arc<dyn AuditSink>,
}

impl NotificationDispatcher {
    pub fn new(
        store: Arc<dyn EntityStore>,
        registry: ConnectionRegistry,
        dedup: NotificationDeduplicator,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            registry,
            dedup,
            audit,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// 分发一条通知
    ///
    /// 窗口期内已有相同 (message, from, to) 时直接返回既有通知，
    /// 不产生新记录；否则持久化后向在线连接推送
    pub async fn dispatch(
        &self,
        from_user_id: Uuid,
        to_user_id: Uuid,
        message: &str,
    ) -> Result<Notification> {
        // 同键的查重与写入在持锁期间不会交错
        let _guard = self.dedup.key_guard(from_user_id, to_user_id, message).await;

        if let Some(existing) = self
            .dedup
            .should_suppress(from_user_id, to_user_id, message)
            .await?
        {
            tracing::debug!(
                "Duplicate notification to user {} suppressed within window",
                to_user_id
            );
            return Ok(existing);
        }

        let notification = self
            .store
            .insert_notification(Notification::new(from_user_id, to_user_id, message))
            .await?;

        let delivered = self
            .registry
            .push_to_user(to_user_id, PushMessage::from(&notification))
            .await;

        tracing::info!(
            "Notification {} dispatched to user {} ({} live connections)",
            notification.id,
            to_user_id,
            delivered
        );
        record_detached(
            &self.audit,
            AuditRecord::new(
                AuditAction::NotificationDispatched,
                notification.id,
                json!({ "to_user_id": to_user_id, "delivered": delivered }),
            ),
        );

        Ok(notification)
    }

    /// 标记通知为已读；重复标记同样成功
    pub async fn mark_read(&self, notification_id: Uuid) -> Result<bool> {
        let notification = self.store.mark_notification_read(notification_id).await?;
        tracing::debug!("Notification {} marked read", notification.id);
        Ok(true)
    }

    /// 标记用户全部未读通知为已读
    pub async fn mark_all_read(&self, user_id: Uuid) -> Result<bool> {
        let flipped = self.store.mark_all_read(user_id).await?;
        tracing::debug!("Marked {} notifications read for user {}", flipped, user_id);
        Ok(true)
    }

    pub async fn unread_count(&self, user_id: Uuid) -> Result<u64> {
        self.store.unread_count(user_id).await
    }

    pub async fn notifications_for_user(
        &self,
        user_id: Uuid,
        unread_only: bool,
    ) -> Result<Vec<Notification>> {
        self.store.notifications_for_user(user_id, unread_only).await
    }

    pub async fn get_notification(&self, id: Uuid) -> Result<Option<Notification>> {
        self.store.get_notification(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use clinic_core::TracingAuditSink;
    use clinic_store::MemoryStore;
    use tokio::sync::mpsc;

    fn dispatcher_with(window: Duration) -> (NotificationDispatcher, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::default());
        let registry = ConnectionRegistry::new();
        let dedup = NotificationDeduplicator::new(store.clone(), window);
        let dispatcher = NotificationDispatcher::new(
            store.clone(),
            registry,
            dedup,
            Arc::new(TracingAuditSink),
        );
        (dispatcher, store)
    }

    #[tokio::test]
    async fn test_duplicate_within_window_persists_once() {
        let (dispatcher, _store) = dispatcher_with(Duration::minutes(5));
        let from = Uuid::new_v4();
        let to = Uuid::new_v4();

        let first = dispatcher
            .dispatch(from, to, "appointment assigned")
            .await
            .unwrap();
        let second = dispatcher
            .dispatch(from, to, "appointment assigned")
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(
            dispatcher.notifications_for_user(to, false).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_elapsed_window_persists_twice() {
        let (dispatcher, _store) = dispatcher_with(Duration::milliseconds(50));
        let from = Uuid::new_v4();
        let to = Uuid::new_v4();

        dispatcher
            .dispatch(from, to, "appointment assigned")
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(80)).await;
        dispatcher
            .dispatch(from, to, "appointment assigned")
            .await
            .unwrap();

        assert_eq!(
            dispatcher.notifications_for_user(to, false).await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn test_different_recipients_not_deduplicated() {
        let (dispatcher, _store) = dispatcher_with(Duration::minutes(5));
        let from = Uuid::new_v4();

        let first = dispatcher
            .dispatch(from, Uuid::new_v4(), "appointment assigned")
            .await
            .unwrap();
        let second = dispatcher
            .dispatch(from, Uuid::new_v4(), "appointment assigned")
            .await
            .unwrap();
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_mark_read_is_idempotent() {
        let (dispatcher, _store) = dispatcher_with(Duration::minutes(5));
        let to = Uuid::new_v4();
        let notification = dispatcher
            .dispatch(Uuid::new_v4(), to, "appointment closed")
            .await
            .unwrap();

        assert!(dispatcher.mark_read(notification.id).await.unwrap());
        assert!(dispatcher.mark_read(notification.id).await.unwrap());

        let stored = dispatcher
            .get_notification(notification.id)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.is_read);
    }

    #[tokio::test]
    async fn test_unread_count_and_mark_all_read() {
        let (dispatcher, _store) = dispatcher_with(Duration::minutes(5));
        let to = Uuid::new_v4();

        dispatcher
            .dispatch(Uuid::new_v4(), to, "first message")
            .await
            .unwrap();
        dispatcher
            .dispatch(Uuid::new_v4(), to, "second message")
            .await
            .unwrap();
        assert_eq!(dispatcher.unread_count(to).await.unwrap(), 2);

        assert!(dispatcher.mark_all_read(to).await.unwrap());
        assert_eq!(dispatcher.unread_count(to).await.unwrap(), 0);
        assert!(dispatcher
            .notifications_for_user(to, true)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_pushes_to_live_connections() {
        let (dispatcher, _store) = dispatcher_with(Duration::minutes(5));
        let to = Uuid::new_v4();

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let c1 = Uuid::new_v4();
        dispatcher.registry().on_connect(to, c1, tx1).await;
        dispatcher.registry().on_connect(to, Uuid::new_v4(), tx2).await;

        let notification = dispatcher
            .dispatch(Uuid::new_v4(), to, "appointment assigned")
            .await
            .unwrap();
        assert_eq!(rx1.recv().await.unwrap().id, notification.id);
        assert_eq!(rx2.recv().await.unwrap().id, notification.id);

        // c1 断开后的新通知只送达存活连接
        dispatcher.registry().on_disconnect(c1).await;
        let second = dispatcher
            .dispatch(Uuid::new_v4(), to, "appointment cancelled")
            .await
            .unwrap();
        assert_eq!(rx2.recv().await.unwrap().id, second.id);
        assert!(rx1.try_recv().is_err());
    }
}

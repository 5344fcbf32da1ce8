//! 连接注册表
//!
//! 跟踪在线传输连接与用户的归属关系，支持同一用户多端同时在线，
//! 断开即清理。注册表信任上游鉴权解析出的 user_id。

use chrono::{DateTime, Utc};
use clinic_core::Notification;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// 推送给客户端的通知载荷
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PushMessage {
    pub id: Uuid,
    pub from_user_id: Uuid,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Notification> for PushMessage {
    fn from(notification: &Notification) -> Self {
        Self {
            id: notification.id,
            from_user_id: notification.from_user_id,
            message: notification.message.clone(),
            created_at: notification.created_at,
        }
    }
}

/// 单个连接的消息发送端
pub type PushSender = mpsc::UnboundedSender<PushMessage>;

/// 连接表项
#[derive(Debug)]
struct ConnectionEntry {
    user_id: Uuid,
    connected_at: DateTime<Utc>,
    sender: PushSender,
}

#[derive(Debug, Default)]
struct RegistryInner {
    /// connection_id -> 连接表项
    connections: HashMap<Uuid, ConnectionEntry>,
    /// user_id -> 该用户全部在线连接
    user_connections: HashMap<Uuid, HashSet<Uuid>>,
}

/// 连接注册表
///
/// 不变式：一个 connection_id 至多归属一个用户；
/// 每条连接持有独立发送端，同连接内推送保持分发顺序
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册新连接
    pub async fn on_connect(&self, user_id: Uuid, connection_id: Uuid, sender: PushSender) {
        let mut inner = self.inner.write().await;

        // 重复的 connection_id 先解除旧归属
        if let Some(previous) = inner.connections.remove(&connection_id) {
            if let Some(set) = inner.user_connections.get_mut(&previous.user_id) {
                set.remove(&connection_id);
                if set.is_empty() {
                    inner.user_connections.remove(&previous.user_id);
                }
            }
        }

        inner.connections.insert(
            connection_id,
            ConnectionEntry {
                user_id,
                connected_at: Utc::now(),
                sender,
            },
        );
        inner
            .user_connections
            .entry(user_id)
            .or_default()
            .insert(connection_id);

        tracing::debug!("Connection {} registered for user {}", connection_id, user_id);
    }

    /// 注销连接；未知 connection_id 为空操作
    pub async fn on_disconnect(&self, connection_id: Uuid) {
        let mut inner = self.inner.write().await;

        let Some(entry) = inner.connections.remove(&connection_id) else {
            // 断开竞态或重复断开信号
            tracing::debug!("Disconnect for unknown connection {}", connection_id);
            return;
        };

        if let Some(set) = inner.user_connections.get_mut(&entry.user_id) {
            set.remove(&connection_id);
            if set.is_empty() {
                inner.user_connections.remove(&entry.user_id);
            }
        }

        tracing::debug!(
            "Connection {} for user {} closed",
            connection_id,
            entry.user_id
        );
    }

    /// 用户当前在线的连接集合
    pub async fn live_connections_for(&self, user_id: Uuid) -> Vec<Uuid> {
        let inner = self.inner.read().await;
        inner
            .user_connections
            .get(&user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// 向用户的全部在线连接推送，返回送达的连接数
    ///
    /// 发送端已关闭的连接静默跳过，清理交给 on_disconnect
    pub async fn push_to_user(&self, user_id: Uuid, payload: PushMessage) -> usize {
        let inner = self.inner.read().await;

        let Some(connection_ids) = inner.user_connections.get(&user_id) else {
            return 0;
        };

        let mut delivered = 0;
        for connection_id in connection_ids {
            if let Some(entry) = inner.connections.get(connection_id) {
                if entry.sender.send(payload.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    pub async fn connection_count(&self, user_id: Uuid) -> usize {
        let inner = self.inner.read().await;
        inner
            .user_connections
            .get(&user_id)
            .map(|set| set.len())
            .unwrap_or(0)
    }

    pub async fn total_connections(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    /// 连接建立时间，主要用于诊断
    pub async fn connected_at(&self, connection_id: Uuid) -> Option<DateTime<Utc>> {
        let inner = self.inner.read().await;
        inner
            .connections
            .get(&connection_id)
            .map(|entry| entry.connected_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> PushMessage {
        PushMessage {
            id: Uuid::new_v4(),
            from_user_id: Uuid::new_v4(),
            message: "Your appointment has been assigned".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_multiple_connections_same_user() {
        let registry = ConnectionRegistry::new();
        let user_id = Uuid::new_v4();

        for _ in 0..3 {
            let (tx, _rx) = mpsc::unbounded_channel();
            registry.on_connect(user_id, Uuid::new_v4(), tx).await;
        }

        assert_eq!(registry.connection_count(user_id).await, 3);
        assert_eq!(registry.total_connections().await, 3);
    }

    #[tokio::test]
    async fn test_push_reaches_all_live_connections() {
        let registry = ConnectionRegistry::new();
        let user_id = Uuid::new_v4();

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let c1 = Uuid::new_v4();
        let c2 = Uuid::new_v4();
        registry.on_connect(user_id, c1, tx1).await;
        registry.on_connect(user_id, c2, tx2).await;

        let message = payload();
        let delivered = registry.push_to_user(user_id, message.clone()).await;
        assert_eq!(delivered, 2);
        assert_eq!(rx1.recv().await.unwrap(), message);
        assert_eq!(rx2.recv().await.unwrap(), message);

        // c1 断开后仅 c2 收到
        registry.on_disconnect(c1).await;
        let second = payload();
        let delivered = registry.push_to_user(user_id, second.clone()).await;
        assert_eq!(delivered, 1);
        assert_eq!(rx2.recv().await.unwrap(), second);
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_push_without_connections_is_silent() {
        let registry = ConnectionRegistry::new();
        let delivered = registry.push_to_user(Uuid::new_v4(), payload()).await;
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_disconnect_unknown_connection_is_noop() {
        let registry = ConnectionRegistry::new();
        registry.on_disconnect(Uuid::new_v4()).await;

        // 重复断开同样安全
        let user_id = Uuid::new_v4();
        let (tx, _rx) = mpsc::unbounded_channel();
        let connection_id = Uuid::new_v4();
        registry.on_connect(user_id, connection_id, tx).await;
        registry.on_disconnect(connection_id).await;
        registry.on_disconnect(connection_id).await;
        assert_eq!(registry.total_connections().await, 0);
    }

    #[tokio::test]
    async fn test_closed_receiver_dropped_silently() {
        let registry = ConnectionRegistry::new();
        let user_id = Uuid::new_v4();

        let (tx, rx) = mpsc::unbounded_channel();
        registry.on_connect(user_id, Uuid::new_v4(), tx).await;
        drop(rx);

        // 连接仍登记在册，但推送不会报错
        let delivered = registry.push_to_user(user_id, payload()).await;
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_ordering_preserved_per_connection() {
        let registry = ConnectionRegistry::new();
        let user_id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.on_connect(user_id, Uuid::new_v4(), tx).await;

        let first = payload();
        let second = payload();
        registry.push_to_user(user_id, first.clone()).await;
        registry.push_to_user(user_id, second.clone()).await;

        assert_eq!(rx.recv().await.unwrap().id, first.id);
        assert_eq!(rx.recv().await.unwrap().id, second.id);
    }

    #[tokio::test]
    async fn test_live_connections_listing() {
        let registry = ConnectionRegistry::new();
        let user_id = Uuid::new_v4();
        let connection_id = Uuid::new_v4();
        let (tx, _rx) = mpsc::unbounded_channel();

        registry.on_connect(user_id, connection_id, tx).await;
        let live = registry.live_connections_for(user_id).await;
        assert_eq!(live, vec![connection_id]);
        assert!(registry.connected_at(connection_id).await.is_some());
    }
}

//! # Clinic Notify
//!
//! 实时通知模块，包括：
//! - 连接注册表：用户与在线连接的归属关系，多端在线与断开清理
//! - 通知去重器：窗口期内相同通知至多推送一次（尽力而为）
//! - 通知分发器：持久化通知并向在线连接扇出推送
//! - 事件监听器：把调度领域事件转换为用户通知

pub mod dedup;
pub mod dispatcher;
pub mod listener;
pub mod registry;

// 重新导出主要类型
pub use dedup::NotificationDeduplicator;
pub use dispatcher::NotificationDispatcher;
pub use listener::EventListener;
pub use registry::{ConnectionRegistry, PushMessage, PushSender};

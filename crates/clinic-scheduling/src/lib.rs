//! # Clinic Scheduling
//!
//! 预约调度模块，提供完整的预约生命周期管理，包括：
//! - 预约状态机：管理预约的生命周期状态转换
//! - 调度引擎：原子化的时间槽占用与资源分配
//! - 领域事件：状态变更后的异步通知源

pub mod engine;
pub mod events;
pub mod state_machine;

// 重新导出主要类型
pub use engine::SchedulingEngine;
pub use events::{SchedulingEvent, SchedulingEventKind};
pub use state_machine::{AppointmentEvent, AppointmentStateMachine};

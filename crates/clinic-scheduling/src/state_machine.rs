//! 预约状态机
//!
//! 管理预约的完整生命周期状态转换

use clinic_core::{AppointmentStatus, ClinicError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 预约状态转换事件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AppointmentEvent {
    Assign,
    Close,
    Cancel,
}

impl AppointmentEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assign => "assign",
            Self::Close => "close",
            Self::Cancel => "cancel",
        }
    }
}

/// 预约状态机
#[derive(Debug)]
pub struct AppointmentStateMachine {
    transitions: HashMap<(AppointmentStatus, AppointmentEvent), AppointmentStatus>,
}

impl AppointmentStateMachine {
    /// 创建新的状态机实例
    pub fn new() -> Self {
        let mut transitions = HashMap::new();

        // 定义状态转换规则；Closed/Cancelled 为终止状态，无出边
        transitions.insert(
            (AppointmentStatus::Requested, AppointmentEvent::Assign),
            AppointmentStatus::Assigned,
        );
        transitions.insert(
            (AppointmentStatus::Assigned, AppointmentEvent::Close),
            AppointmentStatus::Closed,
        );
        transitions.insert(
            (AppointmentStatus::Requested, AppointmentEvent::Cancel),
            AppointmentStatus::Cancelled,
        );
        transitions.insert(
            (AppointmentStatus::Assigned, AppointmentEvent::Cancel),
            AppointmentStatus::Cancelled,
        );

        Self { transitions }
    }

    /// 检查状态转换是否有效
    pub fn can_transition(&self, from: AppointmentStatus, event: &AppointmentEvent) -> bool {
        self.transitions.contains_key(&(from, event.clone()))
    }

    /// 执行状态转换
    pub fn transition(
        &self,
        from: AppointmentStatus,
        event: &AppointmentEvent,
    ) -> Result<AppointmentStatus> {
        match self.transitions.get(&(from, event.clone())) {
            Some(to) => Ok(*to),
            None => Err(ClinicError::InvalidTransition {
                from: from.to_string(),
                event: event.as_str().to_string(),
            }),
        }
    }

    /// 获取所有可能的状态
    pub fn all_states() -> Vec<AppointmentStatus> {
        vec![
            AppointmentStatus::Requested,
            AppointmentStatus::Assigned,
            AppointmentStatus::Closed,
            AppointmentStatus::Cancelled,
        ]
    }

    /// 获取状态的所有可能事件
    pub fn possible_events(&self, current_state: AppointmentStatus) -> Vec<AppointmentEvent> {
        self.transitions
            .keys()
            .filter(|(state, _)| *state == current_state)
            .map(|(_, event)| event.clone())
            .collect()
    }
}

impl Default for AppointmentStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        let sm = AppointmentStateMachine::new();

        // 测试有效转换
        assert!(sm.can_transition(AppointmentStatus::Requested, &AppointmentEvent::Assign));
        assert!(sm.can_transition(AppointmentStatus::Assigned, &AppointmentEvent::Close));
        assert!(sm.can_transition(AppointmentStatus::Requested, &AppointmentEvent::Cancel));
        assert!(sm.can_transition(AppointmentStatus::Assigned, &AppointmentEvent::Cancel));
    }

    #[test]
    fn test_terminal_states_have_no_outgoing_edges() {
        let sm = AppointmentStateMachine::new();

        for status in [AppointmentStatus::Closed, AppointmentStatus::Cancelled] {
            assert!(sm.possible_events(status).is_empty());
        }
    }

    #[test]
    fn test_full_transition_matrix() {
        let sm = AppointmentStateMachine::new();
        let events = [
            AppointmentEvent::Assign,
            AppointmentEvent::Close,
            AppointmentEvent::Cancel,
        ];

        // 每个事件与每个状态的完整组合
        for status in AppointmentStateMachine::all_states() {
            for event in &events {
                let allowed = matches!(
                    (status, event),
                    (AppointmentStatus::Requested, AppointmentEvent::Assign)
                        | (AppointmentStatus::Assigned, AppointmentEvent::Close)
                        | (AppointmentStatus::Requested, AppointmentEvent::Cancel)
                        | (AppointmentStatus::Assigned, AppointmentEvent::Cancel)
                );
                assert_eq!(sm.can_transition(status, event), allowed);

                match sm.transition(status, event) {
                    Ok(_) => assert!(allowed),
                    Err(ClinicError::InvalidTransition { .. }) => assert!(!allowed),
                    Err(other) => panic!("unexpected error: {}", other),
                }
            }
        }
    }

    #[test]
    fn test_transition_targets() {
        let sm = AppointmentStateMachine::new();

        assert_eq!(
            sm.transition(AppointmentStatus::Requested, &AppointmentEvent::Assign)
                .unwrap(),
            AppointmentStatus::Assigned
        );
        assert_eq!(
            sm.transition(AppointmentStatus::Assigned, &AppointmentEvent::Close)
                .unwrap(),
            AppointmentStatus::Closed
        );
        assert_eq!(
            sm.transition(AppointmentStatus::Assigned, &AppointmentEvent::Cancel)
                .unwrap(),
            AppointmentStatus::Cancelled
        );
    }
}

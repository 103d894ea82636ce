//! 状态投影：StatusSnapshot
//!
//! 外部（日志、`!status` 命令、watch 订阅者）只看轻量的投影状态；完整状态在 Agent 内部。

use serde::Serialize;

use crate::world::Vec3;

/// Agent 阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum AgentPhase {
    /// 等待 `!start`
    Paused,
    Idle,
    Executing,
    Reconnecting,
    Stopped,
}

/// 对外发布的状态快照
#[derive(Clone, Debug, Serialize)]
pub struct StatusSnapshot {
    pub phase: AgentPhase,
    pub current_task: Option<String>,
    pub current_priority: Option<u8>,
    pub pending: usize,
    pub active_goal: Option<String>,
    pub health: f32,
    pub food: f32,
    pub position: Vec3,
    pub is_day: bool,
    pub roleplay: bool,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            phase: AgentPhase::Idle,
            current_task: None,
            current_priority: None,
            pending: 0,
            active_goal: None,
            health: 20.0,
            food: 20.0,
            position: Vec3::default(),
            is_day: true,
            roleplay: false,
        }
    }
}

impl StatusSnapshot {
    /// 单行摘要，用于聊天回复
    pub fn summary(&self) -> String {
        let task = self.current_task.as_deref().unwrap_or("idle");
        format!(
            "{:?} | task: {} | pending: {} | hp {:.0} food {:.0} | pos {} | {}",
            self.phase,
            task,
            self.pending,
            self.health,
            self.food,
            self.position,
            if self.is_day { "day" } else { "night" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_defaults_to_idle() {
        let s = StatusSnapshot::default();
        let line = s.summary();
        assert!(line.contains("task: idle"));
        assert!(line.contains("day"));
    }
}

//! 长期目标与目标管理器
//!
//! 目标随快照持久化；每个决策周期读取最高优先级的未结束目标。
//! 状态机：Pending → Active（被选中）→ Completed / Failed。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::Priority;
use crate::memory::spatial::now_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalKind {
    Build,
    Gather,
    Craft,
    Explore,
    Survive,
    Trade,
}

impl std::fmt::Display for GoalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GoalKind::Build => "build",
            GoalKind::Gather => "gather",
            GoalKind::Craft => "craft",
            GoalKind::Explore => "explore",
            GoalKind::Survive => "survive",
            GoalKind::Trade => "trade",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl GoalPriority {
    /// 为该目标生成的任务使用的队列优先级
    pub fn task_priority(self) -> Priority {
        match self {
            GoalPriority::Low => Priority::Explore,
            GoalPriority::Medium => Priority::Resource,
            GoalPriority::High => Priority::Survival,
            GoalPriority::Critical => Priority::Critical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalStatus {
    Pending,
    Active,
    Completed,
    Failed,
}

impl GoalStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, GoalStatus::Completed | GoalStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub kind: GoalKind,
    /// 如 `{ "item": "oak_log", "count": 64 }` 或 `{ "structure": "shelter" }`
    #[serde(default)]
    pub params: Map<String, Value>,
    pub priority: GoalPriority,
    pub status: GoalStatus,
    #[serde(default)]
    pub sub_goals: Vec<Goal>,
    pub created: i64,
    #[serde(default)]
    pub completed_at: Option<i64>,
    #[serde(default)]
    pub attempts: u32,
}

impl Goal {
    pub fn new(kind: GoalKind, priority: GoalPriority) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            params: Map::new(),
            priority,
            status: GoalStatus::Pending,
            sub_goals: Vec::new(),
            created: now_ms(),
            completed_at: None,
            attempts: 0,
        }
    }

    pub fn gather(item: &str, count: u32, priority: GoalPriority) -> Self {
        Self::new(GoalKind::Gather, priority)
            .with_param("item", item)
            .with_param("count", count)
    }

    pub fn craft(item: &str, count: u32, priority: GoalPriority) -> Self {
        Self::new(GoalKind::Craft, priority)
            .with_param("item", item)
            .with_param("count", count)
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    pub fn param_u32(&self, key: &str) -> Option<u32> {
        self.params
            .get(key)
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
    }

    pub fn item(&self) -> Option<&str> {
        self.param_str("item")
    }

    /// 数量参数，缺省为 1
    pub fn count(&self) -> u32 {
        self.param_u32("count").unwrap_or(1)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// 第一个未结束的子目标
    pub fn next_sub_goal(&self) -> Option<&Goal> {
        self.sub_goals.iter().find(|g| !g.is_terminal())
    }

    /// 人类可读描述，用于状态与聊天
    pub fn describe(&self) -> String {
        match (self.kind, self.item()) {
            (GoalKind::Gather | GoalKind::Craft, Some(item)) => {
                format!("{} {} {} [{:?}]", self.kind, self.count(), item, self.status)
            }
            (GoalKind::Build, _) => format!(
                "build {} [{:?}]",
                self.param_str("structure").unwrap_or("shelter"),
                self.status
            ),
            _ => format!("{} [{:?}]", self.kind, self.status),
        }
    }
}

fn find_in<'a>(goals: &'a [Goal], id: &str) -> Option<&'a Goal> {
    goals
        .iter()
        .find_map(|g| if g.id == id { Some(g) } else { find_in(&g.sub_goals, id) })
}

fn find_in_mut<'a>(goals: &'a mut [Goal], id: &str) -> Option<&'a mut Goal> {
    for goal in goals.iter_mut() {
        if goal.id == id {
            return Some(goal);
        }
        if let Some(found) = find_in_mut(&mut goal.sub_goals, id) {
            return Some(found);
        }
    }
    None
}

/// 目标集合；子目标嵌套在父目标内，按 id 可递归查找
#[derive(Debug, Default)]
pub struct GoalManager {
    goals: Vec<Goal>,
    max_attempts: u32,
}

impl GoalManager {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            goals: Vec::new(),
            max_attempts: max_attempts.max(1),
        }
    }

    /// 添加顶层目标，返回 id
    pub fn add(&mut self, goal: Goal) -> String {
        tracing::info!(goal = %goal.describe(), id = %goal.id, "new goal created");
        let id = goal.id.clone();
        self.goals.push(goal);
        id
    }

    pub fn create(&mut self, kind: GoalKind, priority: GoalPriority, params: Map<String, Value>) -> String {
        let mut goal = Goal::new(kind, priority);
        goal.params = params;
        self.add(goal)
    }

    pub fn goals(&self) -> &[Goal] {
        &self.goals
    }

    /// 用快照中的目标整体替换
    pub fn replace(&mut self, goals: Vec<Goal>) {
        self.goals = goals;
    }

    pub fn get(&self, id: &str) -> Option<&Goal> {
        find_in(&self.goals, id)
    }

    /// 优先级最高的未结束顶层目标；同优先级取最早创建的
    pub fn highest_priority(&self) -> Option<&Goal> {
        self.goals
            .iter()
            .filter(|g| !g.is_terminal())
            .fold(None, |best: Option<&Goal>, g| match best {
                Some(b) if b.priority >= g.priority => Some(b),
                _ => Some(g),
            })
    }

    pub fn has_open_goals(&self) -> bool {
        self.goals.iter().any(|g| !g.is_terminal())
    }

    /// 未结束的同类目标（Gather / Craft 按 item 匹配）
    pub fn find(&self, kind: GoalKind, item: Option<&str>) -> Option<&Goal> {
        self.goals
            .iter()
            .find(|g| !g.is_terminal() && g.kind == kind && (item.is_none() || g.item() == item))
    }

    pub fn activate(&mut self, id: &str) {
        if let Some(goal) = find_in_mut(&mut self.goals, id) {
            if goal.status == GoalStatus::Pending {
                goal.status = GoalStatus::Active;
            }
        }
    }

    /// 记录分解出的子目标（只分解一次）
    pub fn set_sub_goals(&mut self, id: &str, sub_goals: Vec<Goal>) -> bool {
        match find_in_mut(&mut self.goals, id) {
            Some(goal) if goal.sub_goals.is_empty() => {
                tracing::info!(goal = %goal.describe(), subs = sub_goals.len(), "goal decomposed");
                goal.sub_goals = sub_goals;
                true
            }
            _ => false,
        }
    }

    pub fn mark_complete(&mut self, id: &str) -> bool {
        let Some(goal) = find_in_mut(&mut self.goals, id) else {
            return false;
        };
        if goal.is_terminal() {
            return false;
        }
        goal.status = GoalStatus::Completed;
        goal.completed_at = Some(now_ms());
        tracing::info!(goal = %goal.describe(), id, "goal completed");
        true
    }

    pub fn mark_failed(&mut self, id: &str, reason: &str) {
        if let Some(goal) = find_in_mut(&mut self.goals, id) {
            goal.status = GoalStatus::Failed;
            goal.completed_at = Some(now_ms());
            tracing::warn!(goal = %goal.describe(), id, reason, "goal failed");
        }
    }

    /// 记录一次失败；达到上限后转为 Failed，否则回到 Pending。返回新状态
    pub fn record_failure(&mut self, id: &str) -> Option<GoalStatus> {
        let max = self.max_attempts;
        let goal = find_in_mut(&mut self.goals, id)?;
        if goal.is_terminal() {
            return Some(goal.status);
        }
        goal.attempts += 1;
        if goal.attempts >= max {
            goal.status = GoalStatus::Failed;
            goal.completed_at = Some(now_ms());
            tracing::warn!(goal = %goal.describe(), attempts = goal.attempts, "goal abandoned");
        } else {
            goal.status = GoalStatus::Pending;
            tracing::info!(goal = %goal.describe(), attempts = goal.attempts, "goal attempt failed");
        }
        Some(goal.status)
    }

    /// 删除已结束的顶层目标，保留最近 keep 个；返回删除数量
    pub fn prune_finished(&mut self, keep: usize) -> usize {
        let finished = self.goals.iter().filter(|g| g.is_terminal()).count();
        let mut to_drop = finished.saturating_sub(keep);
        let before = self.goals.len();
        self.goals.retain(|g| {
            if to_drop > 0 && g.is_terminal() {
                to_drop -= 1;
                false
            } else {
                true
            }
        });
        before - self.goals.len()
    }
}

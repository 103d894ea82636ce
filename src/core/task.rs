//! 任务定义：优先级、任务种类（按类型携带各自字段）、执行结果
//!
//! 去重按结构比较（类型 + 优先级 + 目标/位置/物品），不使用分配的 id。

use std::fmt;

use serde::Serialize;

use crate::world::{BlockRef, EntityRef, Vec3};

/// 位置/目标视为同一的距离
const DEDUP_DISTANCE: f64 = 2.0;

/// 任务优先级（全序；数值仅用于日志与状态展示）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Priority {
    Idle,
    Explore,
    Resource,
    Craft,
    UserCommand,
    Survival,
    Combat,
    Critical,
}

impl Priority {
    pub fn value(self) -> u8 {
        match self {
            Priority::Idle => 10,
            Priority::Explore => 30,
            Priority::Resource => 60,
            Priority::Craft => 63,
            Priority::UserCommand => 70,
            Priority::Survival => 80,
            Priority::Combat => 100,
            Priority::Critical => 200,
        }
    }

    pub fn is_critical(self) -> bool {
        self >= Priority::Critical
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.value())
    }
}

/// 任务种类：每个变体只携带自己需要的字段
#[derive(Debug, Clone, PartialEq)]
pub enum TaskKind {
    Combat { target: EntityRef },
    Flee { threat: EntityRef },
    Eat { item: String },
    /// 采集一个方块所在的同类簇
    Mine { block: BlockRef },
    /// 采集直到背包中 item 达到 count
    Gather {
        item: String,
        count: u32,
        goal_id: Option<String>,
    },
    /// 狩猎附近的被动动物
    Hunt,
    Craft {
        item: String,
        quantity: u32,
        goal_id: Option<String>,
    },
    Go { position: Vec3, range: f64 },
    Explore,
    Sleep,
    EmergencyHide,
    BuildShelter,
}

impl TaskKind {
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::Combat { .. } => "combat",
            TaskKind::Flee { .. } => "flee",
            TaskKind::Eat { .. } => "eat",
            TaskKind::Mine { .. } => "mine",
            TaskKind::Gather { .. } => "gather",
            TaskKind::Hunt => "hunt",
            TaskKind::Craft { .. } => "craft",
            TaskKind::Go { .. } => "go",
            TaskKind::Explore => "explore",
            TaskKind::Sleep => "sleep",
            TaskKind::EmergencyHide => "emergency_hide",
            TaskKind::BuildShelter => "build_shelter",
        }
    }

    /// 关联的目标 id（Gather / Craft 由目标分解产生时携带）
    pub fn goal_id(&self) -> Option<&str> {
        match self {
            TaskKind::Gather { goal_id, .. } | TaskKind::Craft { goal_id, .. } => {
                goal_id.as_deref()
            }
            _ => None,
        }
    }

    fn target(&self) -> Option<&EntityRef> {
        match self {
            TaskKind::Combat { target } => Some(target),
            TaskKind::Flee { threat } => Some(threat),
            _ => None,
        }
    }

    fn position(&self) -> Option<Vec3> {
        match self {
            TaskKind::Mine { block } => Some(block.position),
            TaskKind::Go { position, .. } => Some(*position),
            _ => None,
        }
    }

    fn item(&self) -> Option<&str> {
        match self {
            TaskKind::Eat { item } => Some(item),
            TaskKind::Gather { item, .. } | TaskKind::Craft { item, .. } => Some(item),
            _ => None,
        }
    }

    fn block_type(&self) -> Option<&str> {
        match self {
            TaskKind::Mine { block } => Some(&block.name),
            _ => None,
        }
    }

    fn has_fields(&self) -> bool {
        self.target().is_some() || self.position().is_some() || self.item().is_some()
    }
}

/// 队列中的任务
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub kind: TaskKind,
    pub priority: Priority,
}

impl Task {
    pub fn new(kind: TaskKind, priority: Priority) -> Self {
        Self { kind, priority }
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// 结构去重：类型与优先级相同，且目标 id 相同 / 目标或位置相距 < 2 / 物品或方块类型相同；
    /// 无字段的任务只要类型与优先级相同即视为重复
    pub fn is_duplicate_of(&self, other: &Task) -> bool {
        if std::mem::discriminant(&self.kind) != std::mem::discriminant(&other.kind)
            || self.priority != other.priority
        {
            return false;
        }
        if !self.kind.has_fields() && !other.kind.has_fields() {
            return true;
        }

        if let (Some(a), Some(b)) = (self.kind.target(), other.kind.target()) {
            if a.id == b.id || a.position.distance_to(b.position) < DEDUP_DISTANCE {
                return true;
            }
        }
        if let (Some(a), Some(b)) = (self.kind.position(), other.kind.position()) {
            if a.distance_to(b) < DEDUP_DISTANCE {
                return true;
            }
        }
        if let (Some(a), Some(b)) = (self.kind.item(), other.kind.item()) {
            if a == b {
                return true;
            }
        }
        matches!(
            (self.kind.block_type(), other.kind.block_type()),
            (Some(a), Some(b)) if a == b
        )
    }

    /// 与当前任务比较：类型相同且目标 id 相同或位置相距 < 2
    pub fn same_as_current(&self, current: &Task) -> bool {
        if std::mem::discriminant(&self.kind) != std::mem::discriminant(&current.kind) {
            return false;
        }
        if let (Some(a), Some(b)) = (self.kind.target(), current.kind.target()) {
            return a.id == b.id || a.position.distance_to(b.position) < DEDUP_DISTANCE;
        }
        if let (Some(a), Some(b)) = (self.kind.position(), current.kind.position()) {
            return a.distance_to(b) < DEDUP_DISTANCE;
        }
        self.is_duplicate_of(current)
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TaskKind::Combat { target } | TaskKind::Flee { threat: target } => {
                write!(f, "{} {}#{}", self.name(), target.name, target.id)
            }
            TaskKind::Eat { item } => write!(f, "eat {item}"),
            TaskKind::Mine { block } => write!(f, "mine {} at {}", block.name, block.position),
            TaskKind::Gather { item, count, .. } => write!(f, "gather {count} {item}"),
            TaskKind::Craft { item, quantity, .. } => write!(f, "craft {quantity} {item}"),
            TaskKind::Go { position, .. } => write!(f, "go {position}"),
            _ => f.write_str(self.name()),
        }
    }
}

/// 处理器单次调用的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskOutcome {
    Done,
    Failed,
    /// 被更高优先级任务或 !stop 打断；与 Failed 区分
    Interrupted,
    /// 下一轮继续执行（如持续战斗）
    Continue,
}

impl TaskOutcome {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskOutcome::Continue)
    }
}

//! Agent 聚合根
//!
//! 持有配置、游戏客户端句柄、任务队列、空间记忆与目标管理器；
//! 思考循环、决策引擎、执行器、聊天命令都通过 `&Agent` 访问共享状态，不使用全局单例。
//! 锁均为 tokio 锁，任何游戏动作的 await 期间都不持锁。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use regex::Regex;
use tokio::sync::{watch, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::{AddOutcome, AgentError, AgentPhase, StatusSnapshot, Task, TaskQueue};
use crate::crafting::Crafter;
use crate::decision::GoalManager;
use crate::memory::{AgentSnapshot, SpatialMemory};
use crate::navigation::Navigator;
use crate::world::{Actions, GameClient, WorldView};

/// 由配置编译的名称匹配规则
#[derive(Debug, Clone)]
pub struct Patterns {
    pub hostile: Regex,
    pub food: Regex,
    pub restorative: Regex,
    pub hazard: Regex,
}

impl Patterns {
    pub fn from_config(cfg: &AppConfig) -> Result<Self, AgentError> {
        let compile = |name: &str, pattern: &str| {
            Regex::new(pattern).map_err(|e| AgentError::ConfigError(format!("{name}: {e}")))
        };
        Ok(Self {
            hostile: compile("combat.hostile_pattern", &cfg.combat.hostile_pattern)?,
            food: compile("survival.food_pattern", &cfg.survival.food_pattern)?,
            restorative: compile(
                "survival.restorative_pattern",
                &cfg.survival.restorative_pattern,
            )?,
            hazard: compile("navigation.hazard_pattern", &cfg.navigation.hazard_pattern)?,
        })
    }
}

pub struct Agent {
    pub config: AppConfig,
    pub client: Arc<dyn GameClient>,
    pub patterns: Patterns,
    pub queue: Mutex<TaskQueue>,
    pub memory: RwLock<SpatialMemory>,
    pub goals: RwLock<GoalManager>,
    active: AtomicBool,
    roleplay: AtomicBool,
    reconnecting: AtomicBool,
    status_tx: watch::Sender<StatusSnapshot>,
}

impl Agent {
    pub fn new(config: AppConfig, client: Arc<dyn GameClient>) -> Result<Self, AgentError> {
        let patterns = Patterns::from_config(&config)?;
        let (status_tx, _) = watch::channel(StatusSnapshot::default());
        let active = config.agent.auto_start;
        let roleplay = config.agent.roleplay;
        let max_attempts = config.agent.max_goal_attempts;
        Ok(Self {
            config,
            client,
            patterns,
            queue: Mutex::new(TaskQueue::new()),
            memory: RwLock::new(SpatialMemory::new()),
            goals: RwLock::new(GoalManager::new(max_attempts)),
            active: AtomicBool::new(active),
            roleplay: AtomicBool::new(roleplay),
            reconnecting: AtomicBool::new(false),
            status_tx,
        })
    }

    /// 入队（加锁包装）
    pub async fn enqueue(&self, task: Task) -> AddOutcome {
        self.queue.lock().await.add(task)
    }

    /// 为某个任务创建导航器
    pub fn navigator<'a>(&'a self, token: &'a CancellationToken) -> Navigator<'a> {
        Navigator::new(self, token)
    }

    pub fn crafter<'a>(&'a self, token: &'a CancellationToken) -> Crafter<'a> {
        Crafter::new(self, token)
    }

    /// 是否处于自主模式（auto_start = false 时需 `!start`）
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    pub fn roleplay(&self) -> bool {
        self.roleplay.load(Ordering::Relaxed)
    }

    /// 切换进阶模式，返回新状态
    pub fn toggle_roleplay(&self) -> bool {
        !self.roleplay.fetch_xor(true, Ordering::Relaxed)
    }

    pub fn chat(&self, message: &str) {
        tracing::debug!(message, "chat out");
        self.client.chat(message);
    }

    /// 背包中第一个匹配名称规则的物品
    pub fn find_inventory_item(&self, pattern: &Regex) -> Option<String> {
        self.client
            .inventory()
            .into_iter()
            .find(|i| i.count > 0 && pattern.is_match(&i.name))
            .map(|i| i.name)
    }

    // ---- 快照 / 重连 ----

    /// 当前可持久化状态
    pub async fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            memory: self.memory.read().await.data().clone(),
            goals: self.goals.read().await.goals().to_vec(),
            saved_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// 从快照恢复记忆与目标
    pub async fn restore(&self, snapshot: AgentSnapshot) {
        let goals = snapshot.goals.len();
        *self.memory.write().await = SpatialMemory::from_data(snapshot.memory);
        self.goals.write().await.replace(snapshot.goals);
        tracing::info!(goals, "agent state restored from snapshot");
    }

    pub fn set_reconnecting(&self, reconnecting: bool) {
        self.reconnecting.store(reconnecting, Ordering::Relaxed);
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting.load(Ordering::Relaxed)
    }

    /// 重连后：清空队列与运行期记忆；持久记忆与目标保留
    pub async fn reset_transient(&self) {
        self.queue.lock().await.clear();
        self.memory.write().await.reset_transient();
        self.client.stop_moving().await;
        tracing::info!("transient state reset");
    }

    // ---- 状态投影 ----

    pub fn subscribe_status(&self) -> watch::Receiver<StatusSnapshot> {
        self.status_tx.subscribe()
    }

    pub async fn status(&self) -> StatusSnapshot {
        let (current_task, current_priority, pending, executing) = {
            let q = self.queue.lock().await;
            (
                q.current_task().map(|t| t.to_string()),
                q.current_task().map(|t| t.priority.value()),
                q.pending_len(),
                q.current().is_some(),
            )
        };
        let active_goal = self
            .goals
            .read()
            .await
            .highest_priority()
            .map(|g| g.describe());
        let phase = if self.is_reconnecting() {
            AgentPhase::Reconnecting
        } else if !self.is_active() {
            AgentPhase::Paused
        } else if executing {
            AgentPhase::Executing
        } else {
            AgentPhase::Idle
        };
        StatusSnapshot {
            phase,
            current_task,
            current_priority,
            pending,
            active_goal,
            health: self.client.health(),
            food: self.client.food(),
            position: self.client.position(),
            is_day: self.client.is_day(),
            roleplay: self.roleplay(),
        }
    }

    /// 重新计算状态并发布到 watch 通道
    pub async fn publish_status(&self) -> StatusSnapshot {
        let status = self.status().await;
        self.status_tx.send_replace(status.clone());
        status
    }

    pub fn publish_phase(&self, phase: AgentPhase) {
        self.status_tx.send_modify(|s| s.phase = phase);
    }
}

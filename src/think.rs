//! 反射层（思考循环）
//!
//! 每个 tick 并行执行战斗检查与生存检查；资源扫描与导航检查各自按更慢的周期运行，
//! 用上次运行时间判断是否到期，不是每个分支每次都触发。
//! 检查只向任务队列提交任务或更新空间记忆，本身不执行任何游戏动作。

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::agent::Agent;
use crate::core::{AddOutcome, Priority, Task, TaskKind};
use crate::world::{BlockRef, EntityKind, WorldView};

/// 饥饿值高于此值时才为回血进食
const WELL_FED: f32 = 18.0;
/// 单次导航检查最多标记的危险方块数
const MAX_HAZARDS_PER_CHECK: usize = 10;

/// 周期门：距上次运行超过 interval 才放行（首次总是放行）
#[derive(Debug)]
struct Cadence {
    interval: Duration,
    last: Option<Instant>,
}

impl Cadence {
    fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    fn due(&mut self, now: Instant) -> bool {
        if self.last.is_some_and(|last| now.duration_since(last) < self.interval) {
            return false;
        }
        self.last = Some(now);
        true
    }
}

pub struct ThinkLoop {
    agent: Arc<Agent>,
    resource_index: usize,
    resource_cadence: Cadence,
    navigation_cadence: Cadence,
}

impl ThinkLoop {
    pub fn new(agent: Arc<Agent>) -> Self {
        let timing = &agent.config.timing;
        let resource_cadence = Cadence::new(Duration::from_millis(timing.resource_check_ms));
        let navigation_cadence = Cadence::new(Duration::from_millis(timing.navigation_check_ms));
        Self {
            agent,
            resource_index: 0,
            resource_cadence,
            navigation_cadence,
        }
    }

    /// 执行一次思考；返回本次成功入队的任务
    pub async fn tick(&mut self) -> Vec<Task> {
        let mut queued = Vec::new();
        if self.agent.is_active() {
            let (combat, survival) = tokio::join!(self.check_combat(), self.check_survival());
            for task in combat.into_iter().chain(survival) {
                if self.agent.enqueue(task.clone()).await == AddOutcome::Queued {
                    queued.push(task);
                }
            }
        }

        let now = Instant::now();
        if self.resource_cadence.due(now) {
            self.check_resources().await;
        }
        if self.navigation_cadence.due(now) {
            self.check_navigation().await;
        }
        queued
    }

    /// 最近的敌对生物：太近且血量低时 CRITICAL 逃跑，交战距离内则战斗
    pub async fn check_combat(&self) -> Option<Task> {
        let client = &self.agent.client;
        let cfg = &self.agent.config.combat;
        let hostile = &self.agent.patterns.hostile;
        let me = client.position();

        let nearest = client.nearest_entity(&|e| {
            e.kind == EntityKind::Mob
                && hostile.is_match(&e.name)
                && me.distance_to(e.position) <= cfg.scan_radius
        })?;
        let dist = me.distance_to(nearest.position);

        if dist < cfg.flee_distance && client.health() < cfg.flee_health {
            tracing::warn!(mob = %nearest.name, dist, health = client.health(), "threat too close, flee");
            return Some(Task::new(TaskKind::Flee { threat: nearest }, Priority::Critical));
        }
        if dist < cfg.engage_distance {
            let priority = if dist < cfg.critical_distance {
                Priority::Critical
            } else {
                Priority::Combat
            };
            tracing::debug!(mob = %nearest.name, dist, %priority, "hostile in range");
            return Some(Task::new(TaskKind::Combat { target: nearest }, priority));
        }
        None
    }

    /// 饥饿时吃普通食物；血量低且不饿时吃回血食物
    pub async fn check_survival(&self) -> Option<Task> {
        let client = &self.agent.client;
        let cfg = &self.agent.config.survival;
        let patterns = &self.agent.patterns;
        let food = client.food();

        if food < cfg.eat_at_food {
            if let Some(item) = self.agent.find_inventory_item(&patterns.food) {
                return Some(Task::new(TaskKind::Eat { item }, Priority::Survival));
            }
        }
        if client.health() < cfg.eat_at_health && food > WELL_FED {
            if let Some(item) = self.agent.find_inventory_item(&patterns.restorative) {
                return Some(Task::new(TaskKind::Eat { item }, Priority::Survival));
            }
        }
        None
    }

    /// 每次只扫描 scan_types 中的一种，轮换进行
    pub async fn check_resources(&mut self) {
        let types = &self.agent.config.resources.scan_types;
        if types.is_empty() {
            return;
        }
        let block_type = types[self.resource_index % types.len()].clone();
        self.resource_index = self.resource_index.wrapping_add(1);

        let radius = self.agent.config.resources.scan_radius;
        let found = self
            .agent
            .client
            .find_block(&|b: &BlockRef| b.name == block_type, radius);
        if let Some(block) = found {
            let added = self
                .agent
                .memory
                .write()
                .await
                .save_resource(&block_type, block.position);
            if added {
                tracing::debug!(block = %block_type, at = %block.position, "resource remembered");
            }
        }
    }

    /// 标记附近危险方块，并采样位置做卡住检测
    pub async fn check_navigation(&self) {
        let client = &self.agent.client;
        let hazard = &self.agent.patterns.hazard;
        let radius = self.agent.config.navigation.danger_block_distance;
        let hazards = client.find_blocks(&|b| hazard.is_match(&b.name), radius, MAX_HAZARDS_PER_CHECK);
        let pos = client.position();

        let mut memory = self.agent.memory.write().await;
        for block in &hazards {
            memory.mark_dangerous(block.position);
        }
        if memory.record_position(pos) {
            tracing::debug!(at = %pos, "agent appears stuck");
        }
    }
}

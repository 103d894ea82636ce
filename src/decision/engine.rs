//! 决策引擎（慎思层）
//!
//! 每个决策周期按固定顺序评估，命中第一条即返回：
//! 紧急生存 → 夜间无庇护所 → 夜间有床 → 推进最高优先级目标 → 空闲默认。
//! 队列空闲时才做常规决策；紧急生存分支不受此限制，直接以 CRITICAL 入队打断当前任务。

use crate::agent::Agent;
use crate::core::{AddOutcome, Priority, Task, TaskKind};
use crate::handlers::building;
use crate::world::{ItemStack, WorldView};

use super::goal::{Goal, GoalKind, GoalPriority, GoalStatus};

/// 夜间无庇护所时的建材目标
const SHELTER_MATERIAL: &str = "cobblestone";
const SHELTER_MATERIAL_COUNT: u32 = 100;
/// 空闲时维持的木头库存
const MIN_WOOD_STOCK: u32 = 10;
const WOOD: &str = "oak_log";

/// 背包里回复饱食度最多的食物
pub fn best_food(inventory: &[ItemStack]) -> Option<&ItemStack> {
    inventory
        .iter()
        .filter(|i| i.count > 0 && i.food_points.is_some_and(|p| p > 0.0))
        .max_by(|a, b| a.food_points.unwrap_or(0.0).total_cmp(&b.food_points.unwrap_or(0.0)))
}

fn held_bed(inventory: &[ItemStack]) -> bool {
    inventory.iter().any(|i| i.count > 0 && i.name.ends_with("_bed"))
}

pub struct DecisionEngine<'a> {
    agent: &'a Agent,
}

impl<'a> DecisionEngine<'a> {
    pub fn new(agent: &'a Agent) -> Self {
        Self { agent }
    }

    /// 一个决策周期：产生的任务直接入队
    pub async fn tick(&self) -> Option<(Task, AddOutcome)> {
        if !self.agent.is_active() {
            return None;
        }
        let task = match self.emergency() {
            Some(task) => Some(task),
            None => {
                let busy = {
                    let q = self.agent.queue.lock().await;
                    q.has_tasks() || q.is_executing()
                };
                if busy {
                    return None;
                }
                self.decide().await
            }
        }?;
        tracing::info!(task = %task, priority = %task.priority, "decision");
        let outcome = self.agent.enqueue(task.clone()).await;
        Some((task, outcome))
    }

    /// 紧急生存：生命或饥饿低于紧急阈值时吃东西或狩猎
    pub fn emergency(&self) -> Option<Task> {
        let client = &self.agent.client;
        let cfg = &self.agent.config.survival;
        let (health, food) = (client.health(), client.food());
        let inventory = client.inventory();
        let meal = best_food(&inventory);

        if health < cfg.emergency_health && food < 20.0 {
            if let Some(item) = meal {
                tracing::warn!(health, food, "health critical, eating");
                return Some(Task::new(TaskKind::Eat { item: item.name.clone() }, Priority::Critical));
            }
        }
        if food < cfg.emergency_food {
            tracing::warn!(food, "starving");
            let kind = match meal {
                Some(item) => TaskKind::Eat { item: item.name.clone() },
                None => TaskKind::Hunt,
            };
            return Some(Task::new(kind, Priority::Critical));
        }
        None
    }

    /// 按完整顺序决策一次，不入队
    pub async fn decide(&self) -> Option<Task> {
        if let Some(task) = self.emergency() {
            return Some(task);
        }
        let client = &self.agent.client;
        let night = !client.is_day();

        if night && !self.agent.memory.read().await.has_shelter() {
            return Some(self.shelter_at_night().await);
        }
        if night && held_bed(&client.inventory()) {
            return Some(Task::new(TaskKind::Sleep, GoalPriority::High.task_priority()));
        }

        let goal = self.agent.goals.read().await.highest_priority().cloned();
        match goal {
            Some(goal) => self.pursue(goal).await,
            None => self.idle_default().await,
        }
    }

    /// 有建材就盖庇护所；否则建立采集建材的目标并先躲过今晚
    async fn shelter_at_night(&self) -> Task {
        let client = &self.agent.client;
        let priority = GoalPriority::High.task_priority();
        let material = building::pick_material(
            client.count_item("cobblestone"),
            client.count_item("oak_planks"),
        );
        if material.is_some() {
            return Task::new(TaskKind::BuildShelter, priority);
        }

        let mut goals = self.agent.goals.write().await;
        if goals.find(GoalKind::Gather, Some(SHELTER_MATERIAL)).is_none() {
            tracing::info!("night without shelter, planning to gather building material");
            goals.add(Goal::gather(SHELTER_MATERIAL, SHELTER_MATERIAL_COUNT, GoalPriority::High));
        }
        Task::new(TaskKind::EmergencyHide, priority)
    }

    /// 推进目标：按类型分解为具体任务；已满足的目标直接完成
    async fn pursue(&self, goal: Goal) -> Option<Task> {
        let client = &self.agent.client;
        self.agent.goals.write().await.activate(&goal.id);
        tracing::debug!(goal = %goal.describe(), "pursuing goal");
        let priority = goal.priority.task_priority();

        match goal.kind {
            GoalKind::Gather | GoalKind::Craft => {
                let Some(item) = goal.item().map(str::to_string) else {
                    self.agent.goals.write().await.mark_failed(&goal.id, "missing item parameter");
                    return None;
                };
                let count = goal.count();
                if client.count_item(&item) >= count {
                    self.agent.goals.write().await.mark_complete(&goal.id);
                    return None;
                }
                let goal_id = Some(goal.id.clone());
                let kind = if goal.kind == GoalKind::Gather {
                    TaskKind::Gather { item, count, goal_id }
                } else {
                    TaskKind::Craft { item, quantity: count, goal_id }
                };
                Some(Task::new(kind, priority))
            }
            GoalKind::Build => self.pursue_build(&goal).await,
            GoalKind::Explore => {
                self.agent.goals.write().await.mark_complete(&goal.id);
                Some(Task::new(TaskKind::Explore, priority))
            }
            GoalKind::Survive => {
                self.agent.goals.write().await.mark_complete(&goal.id);
                let inventory = client.inventory();
                let kind = match best_food(&inventory) {
                    Some(item) if client.food() < 20.0 => TaskKind::Eat { item: item.name.clone() },
                    _ => TaskKind::Hunt,
                };
                Some(Task::new(kind, priority))
            }
            GoalKind::Trade => {
                self.agent
                    .goals
                    .write()
                    .await
                    .mark_failed(&goal.id, "no trading partner available");
                None
            }
        }
    }

    /// 建造目标：已有庇护所即完成；建材不足时分解出采集子目标
    async fn pursue_build(&self, goal: &Goal) -> Option<Task> {
        let client = &self.agent.client;
        if self.agent.memory.read().await.has_shelter() {
            self.agent.goals.write().await.mark_complete(&goal.id);
            return None;
        }
        let priority = goal.priority.task_priority();
        let material = building::pick_material(
            client.count_item("cobblestone"),
            client.count_item("oak_planks"),
        );
        if material.is_some() {
            return Some(Task::new(TaskKind::BuildShelter, priority));
        }

        let mut goals = self.agent.goals.write().await;
        goals.set_sub_goals(
            &goal.id,
            vec![Goal::gather(SHELTER_MATERIAL, SHELTER_MATERIAL_COUNT, goal.priority)],
        );
        let (sub_failed, next) = {
            let current = goals.get(&goal.id)?;
            (
                current.sub_goals.iter().any(|g| g.status == GoalStatus::Failed),
                current.next_sub_goal().cloned(),
            )
        };
        if sub_failed {
            goals.mark_failed(&goal.id, "building material could not be gathered");
            return None;
        }
        let sub = next?;
        Some(Task::new(
            TaskKind::Gather {
                item: sub.item().unwrap_or(SHELTER_MATERIAL).to_string(),
                count: sub.count(),
                goal_id: Some(sub.id),
            },
            priority,
        ))
    }

    /// 没有目标：木头不足就建立采集目标（下个周期执行），否则低优先级探索
    async fn idle_default(&self) -> Option<Task> {
        if self.agent.client.count_item(WOOD) < MIN_WOOD_STOCK {
            self.agent
                .goals
                .write()
                .await
                .add(Goal::gather(WOOD, MIN_WOOD_STOCK, GoalPriority::Medium));
            return None;
        }
        Some(Task::new(TaskKind::Explore, Priority::Explore))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::AppConfig;
    use crate::world::{SimWorld, Vec3};

    fn agent(world: SimWorld) -> Agent {
        Agent::new(AppConfig::default(), Arc::new(world)).unwrap()
    }

    #[tokio::test]
    async fn test_night_without_shelter_creates_gather_goal() {
        let a = agent(SimWorld::new().at_night());
        let task = DecisionEngine::new(&a).decide().await.unwrap();
        assert!(matches!(task.kind, TaskKind::EmergencyHide));
        let goals = a.goals.read().await;
        let goal = goals.find(GoalKind::Gather, Some("cobblestone")).unwrap();
        assert_eq!(goal.count(), 100);
        assert_eq!(goal.priority, GoalPriority::High);

        drop(goals);
        // 再来一次不会重复建立目标
        DecisionEngine::new(&a).decide().await.unwrap();
        assert_eq!(a.goals.read().await.goals().len(), 1);
    }

    #[tokio::test]
    async fn test_night_with_material_builds_shelter() {
        let a = agent(SimWorld::new().at_night().with_item("cobblestone", 120));
        let task = DecisionEngine::new(&a).decide().await.unwrap();
        assert!(matches!(task.kind, TaskKind::BuildShelter));
    }

    #[tokio::test]
    async fn test_night_with_shelter_and_bed_sleeps() {
        let a = agent(SimWorld::new().at_night().with_item("white_bed", 1));
        a.memory.write().await.set_shelter(true);
        let task = DecisionEngine::new(&a).decide().await.unwrap();
        assert!(matches!(task.kind, TaskKind::Sleep));
    }

    #[tokio::test]
    async fn test_emergency_eat_and_hunt() {
        let a = agent(
            SimWorld::new()
                .with_health(5.0)
                .with_food(15.0)
                .with_food_item("apple", 1, 4.0)
                .with_food_item("cooked_beef", 2, 8.0),
        );
        let task = DecisionEngine::new(&a).emergency().unwrap();
        assert_eq!(task.priority, Priority::Critical);
        assert!(matches!(task.kind, TaskKind::Eat { ref item } if item == "cooked_beef"));

        let b = agent(SimWorld::new().with_food(3.0));
        let task = DecisionEngine::new(&b).emergency().unwrap();
        assert!(matches!(task.kind, TaskKind::Hunt));

        let c = agent(SimWorld::new().with_health(5.0));
        assert!(DecisionEngine::new(&c).emergency().is_none());
    }

    #[tokio::test]
    async fn test_gather_goal_becomes_task_then_completes() {
        let world = Arc::new(SimWorld::new());
        let a = Agent::new(AppConfig::default(), world.clone()).unwrap();
        let id = a
            .goals
            .write()
            .await
            .add(Goal::gather("cobblestone", 2, GoalPriority::High));

        let task = DecisionEngine::new(&a).decide().await.unwrap();
        assert_eq!(task.priority, Priority::Survival);
        assert_eq!(task.kind.goal_id(), Some(id.as_str()));
        assert_eq!(a.goals.read().await.get(&id).unwrap().status, GoalStatus::Active);

        let rich = agent(SimWorld::new().with_item("cobblestone", 5));
        let id = rich
            .goals
            .write()
            .await
            .add(Goal::gather("cobblestone", 2, GoalPriority::High));
        assert!(DecisionEngine::new(&rich).decide().await.is_none());
        assert_eq!(rich.goals.read().await.get(&id).unwrap().status, GoalStatus::Completed);
    }

    #[tokio::test]
    async fn test_build_goal_decomposes_into_gather() {
        let a = agent(SimWorld::new());
        let id = a.goals.write().await.add(
            Goal::new(GoalKind::Build, GoalPriority::Medium).with_param("structure", "shelter"),
        );
        let task = DecisionEngine::new(&a).decide().await.unwrap();
        let TaskKind::Gather { item, count, goal_id } = task.kind else {
            panic!("expected gather, got {task}");
        };
        assert_eq!((item.as_str(), count), ("cobblestone", 100));
        let goals = a.goals.read().await;
        let parent = goals.get(&id).unwrap();
        assert_eq!(parent.sub_goals.len(), 1);
        assert_eq!(goal_id.as_deref(), Some(parent.sub_goals[0].id.as_str()));
    }

    #[tokio::test]
    async fn test_idle_creates_wood_goal_then_explores() {
        let a = agent(SimWorld::new());
        assert!(DecisionEngine::new(&a).decide().await.is_none());
        assert!(a.goals.read().await.find(GoalKind::Gather, Some("oak_log")).is_some());

        let stocked = agent(SimWorld::new().with_item("oak_log", 12));
        let task = DecisionEngine::new(&stocked).decide().await.unwrap();
        assert_eq!(task.priority, Priority::Explore);
        assert!(matches!(task.kind, TaskKind::Explore));
    }

    #[tokio::test]
    async fn test_tick_waits_for_idle_queue_except_emergency() {
        let a = agent(SimWorld::new().with_item("oak_log", 12));
        a.enqueue(Task::new(
            TaskKind::Go { position: Vec3::new(5.0, 64.0, 5.0), range: 1.0 },
            Priority::UserCommand,
        ))
        .await;
        assert!(DecisionEngine::new(&a).tick().await.is_none());

        let hungry = agent(SimWorld::new().with_food(2.0).with_food_item("bread", 1, 5.0));
        hungry.enqueue(Task::new(TaskKind::Explore, Priority::Explore)).await;
        let (task, outcome) = DecisionEngine::new(&hungry).tick().await.unwrap();
        assert_eq!(outcome, AddOutcome::Queued);
        assert_eq!(task.priority, Priority::Critical);
    }
}

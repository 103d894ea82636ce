//! 进阶（roleplay）模式：沿固定的发展阶梯推进
//!
//! 木头 → 木板 → 工作台 → 木制工具 → 圆石 → 熔炉 → 食物 → 煤。
//! 队列空闲时每次只入队第一个缺失的步骤。

use rand::Rng;

use crate::agent::Agent;
use crate::core::{AddOutcome, Priority, Task, TaskKind};
use crate::world::{BlockRef, ItemStack, WorldView};

const MIN_LOGS: u32 = 8;
const MIN_PLANKS: u32 = 4;
const MIN_COBBLESTONE: u32 = 20;
const FURNACE_COBBLESTONE: u32 = 8;
const MIN_FOOD: u32 = 10;
const MIN_COAL: u32 = 5;
const SEARCH_RADIUS: f64 = 32.0;
const ANIMAL_RADIUS: f64 = 16.0;
const ANIMALS: [&str; 5] = ["pig", "cow", "chicken", "sheep", "rabbit"];
const WOODEN_TOOLS: [&str; 3] = ["wooden_pickaxe", "wooden_axe", "wooden_sword"];

fn total(inventory: &[ItemStack], pred: impl Fn(&str) -> bool) -> u32 {
    inventory.iter().filter(|i| pred(&i.name)).map(|i| i.count).sum()
}

/// 与原木对应的木板名
pub fn planks_for(log: &str) -> String {
    match log.strip_suffix("_log") {
        Some(wood) => format!("{wood}_planks"),
        None => "oak_planks".to_string(),
    }
}

pub struct Progression<'a> {
    agent: &'a Agent,
}

impl<'a> Progression<'a> {
    pub fn new(agent: &'a Agent) -> Self {
        Self { agent }
    }

    /// 进阶模式开启且队列空闲时推进一步
    pub async fn tick(&self) -> Option<(Task, AddOutcome)> {
        if !self.agent.roleplay() || !self.agent.is_active() {
            return None;
        }
        if self.agent.queue.lock().await.has_tasks() {
            return None;
        }
        let task = self.next_step()?;
        tracing::info!(task = %task, "progression step");
        let outcome = self.agent.enqueue(task.clone()).await;
        Some((task, outcome))
    }

    /// 手里有，或附近已经放下
    fn has_station(&self, name: &str) -> bool {
        let client = &self.agent.client;
        client.count_item(name) > 0
            || client
                .find_block(&|b: &BlockRef| b.name == name, self.agent.config.crafting.station_travel_radius)
                .is_some()
    }

    fn mine_nearest(&self, matches: impl Fn(&str) -> bool) -> Option<Task> {
        self.agent
            .client
            .find_block(&|b: &BlockRef| matches(&b.name), SEARCH_RADIUS)
            .map(|block| Task::new(TaskKind::Mine { block }, Priority::Resource))
    }

    fn craft(item: &str, quantity: u32) -> Task {
        Task::new(
            TaskKind::Craft {
                item: item.to_string(),
                quantity,
                goal_id: None,
            },
            Priority::Craft,
        )
    }

    fn explore() -> Task {
        Task::new(TaskKind::Explore, Priority::Explore)
    }

    /// 当前阶梯上第一个缺失的步骤
    pub fn next_step(&self) -> Option<Task> {
        let client = &self.agent.client;
        let inventory = client.inventory();
        let logs = total(&inventory, |n| n.ends_with("_log"));
        let planks = total(&inventory, |n| n.ends_with("_planks"));
        let cobblestone = client.count_item("cobblestone");
        let food = total(&inventory, |n| self.agent.patterns.food.is_match(n));
        let has_table = self.has_station("crafting_table");
        let has_furnace = self.has_station("furnace");
        let has_pickaxe = inventory.iter().any(|i| i.name.ends_with("_pickaxe"));

        if logs < MIN_LOGS && planks < MIN_PLANKS && !has_table {
            return Some(self.mine_nearest(|n| n.ends_with("_log")).unwrap_or_else(Self::explore));
        }
        if planks < MIN_PLANKS && !has_table {
            let log = inventory.iter().find(|i| i.name.ends_with("_log"))?;
            return Some(Self::craft(&planks_for(&log.name), MIN_PLANKS));
        }
        if !has_table {
            return Some(Self::craft("crafting_table", 1));
        }
        if let Some(tool) = WOODEN_TOOLS.iter().find(|t| client.count_item(t) == 0) {
            if planks >= 2 || logs > 0 {
                return Some(Self::craft(tool, 1));
            }
        }
        if has_pickaxe && cobblestone < MIN_COBBLESTONE {
            if let Some(task) = self.mine_nearest(|n| n == "stone" || n == "cobblestone") {
                return Some(task);
            }
        }
        if cobblestone >= FURNACE_COBBLESTONE && !has_furnace {
            return Some(Self::craft("furnace", 1));
        }
        if food < MIN_FOOD {
            let me = client.position();
            let animal_near = client
                .nearest_entity(&|e| ANIMALS.contains(&e.name.as_str()))
                .is_some_and(|e| me.distance_to(e.position) < ANIMAL_RADIUS);
            return Some(if animal_near {
                Task::new(TaskKind::Hunt, Priority::Resource)
            } else {
                Self::explore()
            });
        }
        if has_furnace && client.count_item("coal") < MIN_COAL {
            if let Some(task) = self.mine_nearest(|n| n == "coal_ore") {
                return Some(task);
            }
        }
        let chance = self.agent.config.agent.idle_explore_chance;
        rand::thread_rng().gen_bool(chance.clamp(0.0, 1.0)).then(Self::explore)
    }
}

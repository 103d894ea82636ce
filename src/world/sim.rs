//! 进程内模拟世界（用于测试与演示，无需真实服务器）
//!
//! 实现完整的 GameClient：寻路直接瞬移到目标（可配置延迟或永久卡住），
//! 挖掘按掉落表放入背包，合成严格检查原料与工作台。记录合成调用与配方查询次数，便于断言。

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::core::{ConnectionFault, Reconnect};

use super::{
    ActionError, Actions, BlockRef, Cell, EntityKind, EntityRef, EquipSlot, ItemStack, Recipe,
    RecipeCatalog, Vec3, WorldView,
};

/// 单次合成调用记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CraftCall {
    pub item: String,
    pub times: u32,
    pub at_station: bool,
}

#[derive(Debug, Default)]
struct SimState {
    position: Vec3,
    health: f32,
    food: f32,
    day: bool,
    entities: Vec<EntityRef>,
    next_entity_id: u64,
    blocks: HashMap<Cell, String>,
    inventory: BTreeMap<String, u32>,
    food_values: HashMap<String, f32>,
    recipes: HashMap<String, Vec<Recipe>>,
    known_items: HashSet<String>,
    drops: HashMap<String, String>,
    equipped: Option<String>,
    craft_calls: Vec<CraftCall>,
    recipe_lookups: usize,
    chat_log: Vec<String>,
    move_delay: Option<Duration>,
    stalled: bool,
    sleeping: bool,
    /// 每次合成少产出的数量（模拟动画被打断）
    craft_shortfall: u32,
    reconnects: u32,
    /// 模拟客户端库内部崩溃：移动调用直接 panic
    faulty: bool,
}

/// 模拟世界
#[derive(Debug)]
pub struct SimWorld {
    state: Mutex<SimState>,
}

impl Default for SimWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl SimWorld {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                position: Vec3::new(0.0, 64.0, 0.0),
                health: 20.0,
                food: 20.0,
                day: true,
                next_entity_id: 1,
                ..SimState::default()
            }),
        }
    }

    /// 演示世界：一片地面、几棵树、石头与煤矿、岩浆、几只生物与常用配方
    pub fn demo() -> Self {
        let mut world = Self::new().with_food(17.0).with_food_item("bread", 3, 5.0);
        for x in -6..=6 {
            for z in -6..=6 {
                world = world.with_block("grass_block", Vec3::new(x as f64, 63.0, z as f64));
            }
        }
        for y in 64..=67 {
            world = world
                .with_block("oak_log", Vec3::new(8.0, y as f64, 3.0))
                .with_block("oak_log", Vec3::new(-9.0, y as f64, -4.0));
        }
        for x in 14..=18 {
            for z in -2..=2 {
                world = world.with_block("stone", Vec3::new(x as f64, 63.0, z as f64));
            }
        }
        world = world
            .with_block("coal_ore", Vec3::new(16.0, 62.0, 0.0))
            .with_block("coal_ore", Vec3::new(17.0, 62.0, 0.0))
            .with_block("lava", Vec3::new(20.0, 63.0, 20.0))
            .with_entity("zombie", Vec3::new(30.0, 64.0, 30.0))
            .with_entity("pig", Vec3::new(-12.0, 64.0, 5.0))
            .with_entity("cow", Vec3::new(-14.0, 64.0, 9.0))
            .with_drop("stone", "cobblestone")
            .with_drop("coal_ore", "coal")
            .with_drop("grass_block", "dirt");
        for recipe in standard_recipes() {
            world = world.with_recipe(recipe);
        }
        world
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_mut(&mut self) -> &mut SimState {
        self.state.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_position(mut self, pos: Vec3) -> Self {
        self.state_mut().position = pos;
        self
    }

    pub fn with_health(mut self, health: f32) -> Self {
        self.state_mut().health = health;
        self
    }

    pub fn with_food(mut self, food: f32) -> Self {
        self.state_mut().food = food;
        self
    }

    pub fn at_night(mut self) -> Self {
        self.state_mut().day = false;
        self
    }

    pub fn with_item(mut self, name: &str, count: u32) -> Self {
        let s = self.state_mut();
        *s.inventory.entry(name.to_string()).or_insert(0) += count;
        s.known_items.insert(name.to_string());
        self
    }

    pub fn with_food_item(mut self, name: &str, count: u32, points: f32) -> Self {
        self.state_mut().food_values.insert(name.to_string(), points);
        self.with_item(name, count)
    }

    pub fn with_block(mut self, name: &str, pos: Vec3) -> Self {
        let s = self.state_mut();
        s.blocks.insert(pos.cell(), name.to_string());
        s.known_items.insert(name.to_string());
        self
    }

    pub fn with_entity(self, name: &str, pos: Vec3) -> Self {
        self.spawn_entity(name, pos);
        self
    }

    pub fn with_recipe(mut self, recipe: Recipe) -> Self {
        let s = self.state_mut();
        s.known_items.insert(recipe.result.clone());
        for ing in &recipe.ingredients {
            s.known_items.insert(ing.item.clone());
        }
        s.recipes.entry(recipe.result.clone()).or_default().push(recipe);
        self
    }

    pub fn with_drop(mut self, block: &str, item: &str) -> Self {
        let s = self.state_mut();
        s.drops.insert(block.to_string(), item.to_string());
        s.known_items.insert(item.to_string());
        self
    }

    pub fn spawn_entity(&self, name: &str, pos: Vec3) -> u64 {
        let mut s = self.state();
        let id = s.next_entity_id;
        s.next_entity_id += 1;
        s.entities.push(EntityRef::mob(id, name, pos));
        id
    }

    pub fn remove_entity(&self, id: u64) {
        self.state().entities.retain(|e| e.id != id);
    }

    pub fn set_position(&self, pos: Vec3) {
        self.state().position = pos;
    }

    pub fn set_health(&self, health: f32) {
        self.state().health = health;
    }

    pub fn set_food(&self, food: f32) {
        self.state().food = food;
    }

    pub fn set_day(&self, day: bool) {
        self.state().day = day;
    }

    /// 寻路永不完成（用于超时与中断测试）
    pub fn set_stalled(&self, stalled: bool) {
        self.state().stalled = stalled;
    }

    pub fn set_faulty(&self, faulty: bool) {
        self.state().faulty = faulty;
    }

    pub fn set_move_delay(&self, delay: Option<Duration>) {
        self.state().move_delay = delay;
    }

    pub fn set_craft_shortfall(&self, shortfall: u32) {
        self.state().craft_shortfall = shortfall;
    }

    pub fn craft_calls(&self) -> Vec<CraftCall> {
        self.state().craft_calls.clone()
    }

    pub fn recipe_lookups(&self) -> usize {
        self.state().recipe_lookups
    }

    pub fn chat_messages(&self) -> Vec<String> {
        self.state().chat_log.clone()
    }

    pub fn equipped(&self) -> Option<String> {
        self.state().equipped.clone()
    }

    pub fn is_sleeping(&self) -> bool {
        self.state().sleeping
    }

    pub fn block_name_at(&self, pos: Vec3) -> Option<String> {
        self.state().blocks.get(&pos.cell()).cloned()
    }

    pub fn reconnect_count(&self) -> u32 {
        self.state().reconnects
    }
}

#[async_trait]
impl Reconnect for SimWorld {
    async fn reconnect(&self) -> Result<(), ConnectionFault> {
        let mut s = self.state();
        s.reconnects += 1;
        s.sleeping = false;
        Ok(())
    }
}

#[async_trait]
impl Actions for SimWorld {
    async fn go_to(&self, target: Vec3, _range: f64) -> Result<(), ActionError> {
        let (delay, stalled, faulty) = {
            let s = self.state();
            (s.move_delay, s.stalled, s.faulty)
        };
        if faulty {
            panic!("client fault while moving to {target}");
        }
        if stalled {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.state().position = target;
        Ok(())
    }

    async fn stop_moving(&self) {}

    async fn dig(&self, block: &BlockRef) -> Result<(), ActionError> {
        let mut s = self.state();
        let cell = block.position.cell();
        let name = s
            .blocks
            .remove(&cell)
            .ok_or_else(|| ActionError::Rejected(format!("no block at {cell}")))?;
        let drop = s.drops.get(&name).cloned().unwrap_or(name);
        *s.inventory.entry(drop).or_insert(0) += 1;
        Ok(())
    }

    async fn place_block(&self, reference: &BlockRef, face: Vec3) -> Result<(), ActionError> {
        let mut s = self.state();
        let target = (reference.position + face).cell();
        if s.blocks.contains_key(&target) {
            return Err(ActionError::Rejected(format!("{target} is occupied")));
        }
        let item = s
            .equipped
            .clone()
            .ok_or_else(|| ActionError::NotAvailable("nothing in hand".to_string()))?;
        let count = s.inventory.get(&item).copied().unwrap_or(0);
        if count == 0 {
            return Err(ActionError::NotAvailable(item));
        }
        consume_one(&mut s, &item);
        s.blocks.insert(target, item);
        Ok(())
    }

    async fn equip(&self, item: &str, _slot: EquipSlot) -> Result<(), ActionError> {
        let mut s = self.state();
        if s.inventory.get(item).copied().unwrap_or(0) == 0 {
            return Err(ActionError::NotAvailable(item.to_string()));
        }
        s.equipped = Some(item.to_string());
        Ok(())
    }

    async fn consume(&self) -> Result<(), ActionError> {
        let mut s = self.state();
        let item = s
            .equipped
            .clone()
            .ok_or_else(|| ActionError::NotAvailable("nothing in hand".to_string()))?;
        let points = s
            .food_values
            .get(&item)
            .copied()
            .ok_or_else(|| ActionError::Rejected(format!("{item} is not edible")))?;
        if s.food >= 20.0 {
            return Err(ActionError::Rejected("not hungry".to_string()));
        }
        consume_one(&mut s, &item);
        s.food = (s.food + points).min(20.0);
        Ok(())
    }

    async fn attack(&self, entity: &EntityRef) -> Result<(), ActionError> {
        let mut s = self.state();
        let target = s
            .entities
            .iter_mut()
            .find(|e| e.id == entity.id)
            .ok_or_else(|| ActionError::NotAvailable(format!("entity {}", entity.id)))?;
        target.health -= 6.0;
        if target.health <= 0.0 {
            let id = target.id;
            s.entities.retain(|e| e.id != id);
        }
        Ok(())
    }

    async fn craft(
        &self,
        recipe: &Recipe,
        times: u32,
        station: Option<&BlockRef>,
    ) -> Result<(), ActionError> {
        let mut s = self.state();
        if recipe.requires_station && station.is_none() {
            return Err(ActionError::Rejected(format!(
                "{} requires a crafting station",
                recipe.result
            )));
        }
        for ing in &recipe.ingredients {
            let have = s.inventory.get(&ing.item).copied().unwrap_or(0);
            if have < ing.count * times {
                return Err(ActionError::Rejected(format!(
                    "missing {} (have {have}, need {})",
                    ing.item,
                    ing.count * times
                )));
            }
        }
        for ing in &recipe.ingredients {
            if let Some(have) = s.inventory.get_mut(&ing.item) {
                *have -= ing.count * times;
            }
        }
        s.inventory.retain(|_, c| *c > 0);
        let produced = (recipe.result_count * times).saturating_sub(s.craft_shortfall);
        if produced > 0 {
            *s.inventory.entry(recipe.result.clone()).or_insert(0) += produced;
        }
        s.craft_calls.push(CraftCall {
            item: recipe.result.clone(),
            times,
            at_station: station.is_some(),
        });
        Ok(())
    }

    async fn sleep_in(&self, _bed: &BlockRef) -> Result<(), ActionError> {
        let mut s = self.state();
        if s.day {
            return Err(ActionError::Rejected("can only sleep at night".to_string()));
        }
        s.sleeping = true;
        s.day = true;
        Ok(())
    }

    fn chat(&self, message: &str) {
        self.state().chat_log.push(message.to_string());
    }
}

fn consume_one(s: &mut SimState, item: &str) {
    if let Some(count) = s.inventory.get_mut(item) {
        *count -= 1;
        if *count == 0 {
            s.inventory.remove(item);
            if s.equipped.as_deref() == Some(item) {
                s.equipped = None;
            }
        }
    }
}

impl WorldView for SimWorld {
    fn position(&self) -> Vec3 {
        self.state().position
    }

    fn health(&self) -> f32 {
        self.state().health
    }

    fn food(&self) -> f32 {
        self.state().food
    }

    fn is_day(&self) -> bool {
        self.state().day
    }

    fn entities(&self) -> Vec<EntityRef> {
        self.state().entities.clone()
    }

    fn entity(&self, id: u64) -> Option<EntityRef> {
        self.state().entities.iter().find(|e| e.id == id).cloned()
    }

    fn find_blocks(
        &self,
        matcher: &dyn Fn(&BlockRef) -> bool,
        max_distance: f64,
        count: usize,
    ) -> Vec<BlockRef> {
        let s = self.state();
        let me = s.position;
        let mut found: Vec<(f64, BlockRef)> = s
            .blocks
            .iter()
            .map(|(cell, name)| BlockRef::new(name.clone(), cell.origin()))
            .filter_map(|b| {
                let d = me.distance_to(b.position);
                (d <= max_distance && matcher(&b)).then_some((d, b))
            })
            .collect();
        found.sort_by(|a, b| a.0.total_cmp(&b.0));
        found.into_iter().take(count).map(|(_, b)| b).collect()
    }

    fn block_at(&self, pos: Vec3) -> Option<BlockRef> {
        let cell = pos.cell();
        let name = self
            .state()
            .blocks
            .get(&cell)
            .cloned()
            .unwrap_or_else(|| "air".to_string());
        Some(BlockRef::new(name, cell.origin()))
    }

    fn inventory(&self) -> Vec<ItemStack> {
        let s = self.state();
        s.inventory
            .iter()
            .map(|(name, count)| ItemStack {
                name: name.clone(),
                count: *count,
                food_points: s.food_values.get(name).copied(),
            })
            .collect()
    }
}

impl RecipeCatalog for SimWorld {
    fn recipes_for(&self, item: &str) -> Vec<Recipe> {
        let mut s = self.state();
        s.recipe_lookups += 1;
        s.recipes.get(item).cloned().unwrap_or_default()
    }

    fn is_known_item(&self, item: &str) -> bool {
        let s = self.state();
        s.known_items.contains(item) || s.recipes.contains_key(item)
    }
}

/// 演示世界使用的常用配方
pub fn standard_recipes() -> Vec<Recipe> {
    vec![
        Recipe::new("oak_planks", 4).ingredient("oak_log", 1),
        Recipe::new("stick", 4).ingredient("oak_planks", 2),
        Recipe::new("crafting_table", 1).ingredient("oak_planks", 4),
        Recipe::new("wooden_pickaxe", 1)
            .ingredient("oak_planks", 3)
            .ingredient("stick", 2)
            .with_station(),
        Recipe::new("wooden_axe", 1)
            .ingredient("oak_planks", 3)
            .ingredient("stick", 2)
            .with_station(),
        Recipe::new("wooden_sword", 1)
            .ingredient("oak_planks", 2)
            .ingredient("stick", 1)
            .with_station(),
        Recipe::new("stone_pickaxe", 1)
            .ingredient("cobblestone", 3)
            .ingredient("stick", 2)
            .with_station(),
        Recipe::new("furnace", 1).ingredient("cobblestone", 8).with_station(),
        Recipe::new("chest", 1).ingredient("oak_planks", 8).with_station(),
        Recipe::new("white_bed", 1)
            .ingredient("white_wool", 3)
            .ingredient("oak_planks", 3)
            .with_station(),
        Recipe::new("torch", 4).ingredient("coal", 1).ingredient("stick", 1),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dig_uses_drop_table() {
        let world = SimWorld::new()
            .with_block("stone", Vec3::new(1.0, 63.0, 0.0))
            .with_drop("stone", "cobblestone");
        let block = world.block_at(Vec3::new(1.5, 63.2, 0.5)).unwrap();
        world.dig(&block).await.unwrap();
        assert_eq!(world.count_item("cobblestone"), 1);
        assert_eq!(world.block_at(block.position).unwrap().name, "air");
    }

    #[tokio::test]
    async fn test_craft_checks_ingredients_and_station() {
        let world = SimWorld::new().with_item("oak_planks", 2).with_item("stick", 2);
        let recipe = Recipe::new("wooden_pickaxe", 1)
            .ingredient("oak_planks", 3)
            .ingredient("stick", 2)
            .with_station();
        assert!(world.craft(&recipe, 1, None).await.is_err());
        let table = BlockRef::new("crafting_table", Vec3::new(1.0, 64.0, 0.0));
        assert!(world.craft(&recipe, 1, Some(&table)).await.is_err());
        assert!(world.craft_calls().is_empty());
    }

    #[test]
    fn test_find_blocks_nearest_first() {
        let world = SimWorld::new()
            .with_block("oak_log", Vec3::new(10.0, 64.0, 0.0))
            .with_block("oak_log", Vec3::new(2.0, 64.0, 0.0));
        let found = world.find_blocks(&|b| b.name == "oak_log", 32.0, 5);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].position.x, 2.0);
    }
}

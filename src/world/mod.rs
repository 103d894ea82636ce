//! 游戏世界边界：感知（WorldView）、动作（Actions）、配方目录（RecipeCatalog）
//!
//! 协议客户端、寻路、方块元数据都在边界之外；核心只消费这里定义的能力。
//! 三个 trait 合成为 GameClient，Agent 通过 `Arc<dyn GameClient>` 持有。

pub mod geometry;
pub mod sim;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use geometry::{Cell, Vec3};
pub use sim::SimWorld;

/// 外部动作失败（寻路失败、超时、被服务器拒绝等）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActionError {
    #[error("No path to target: {0}")]
    NoPath(String),

    #[error("Action timed out")]
    Timeout,

    #[error("Not available: {0}")]
    NotAvailable(String),

    #[error("Action rejected: {0}")]
    Rejected(String),

    #[error("Disconnected from server")]
    Disconnected,
}

/// 实体类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    Mob,
    Player,
    Object,
}

/// 世界中的实体引用（快照）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: u64,
    pub name: String,
    pub kind: EntityKind,
    pub position: Vec3,
    pub health: f32,
    pub height: f64,
}

impl EntityRef {
    pub fn mob(id: u64, name: impl Into<String>, position: Vec3) -> Self {
        Self {
            id,
            name: name.into(),
            kind: EntityKind::Mob,
            position,
            health: 20.0,
            height: 1.8,
        }
    }
}

/// 方块引用（位置为整数格坐标）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRef {
    pub name: String,
    pub position: Vec3,
}

impl BlockRef {
    pub fn new(name: impl Into<String>, position: Vec3) -> Self {
        Self {
            name: name.into(),
            position,
        }
    }

    pub fn is_air(&self) -> bool {
        self.name == "air"
    }
}

/// 背包物品堆
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemStack {
    pub name: String,
    pub count: u32,
    /// 食物回复量；非食物为 None
    pub food_points: Option<f32>,
}

/// 装备槽
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EquipSlot {
    Hand,
    OffHand,
}

/// 配方原料
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ingredient {
    pub item: String,
    pub count: u32,
}

/// 配方：原料列表、单次产出数量、是否需要工作台
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    pub result: String,
    pub result_count: u32,
    pub ingredients: Vec<Ingredient>,
    pub requires_station: bool,
}

impl Recipe {
    pub fn new(result: impl Into<String>, result_count: u32) -> Self {
        Self {
            result: result.into(),
            result_count,
            ingredients: Vec::new(),
            requires_station: false,
        }
    }

    pub fn ingredient(mut self, item: impl Into<String>, count: u32) -> Self {
        self.ingredients.push(Ingredient {
            item: item.into(),
            count,
        });
        self
    }

    pub fn with_station(mut self) -> Self {
        self.requires_station = true;
        self
    }
}

/// 感知接口：位置、状态值、实体与方块查询、背包
pub trait WorldView: Send + Sync {
    fn position(&self) -> Vec3;

    fn health(&self) -> f32;

    fn food(&self) -> f32;

    fn is_day(&self) -> bool;

    fn entities(&self) -> Vec<EntityRef>;

    fn entity(&self, id: u64) -> Option<EntityRef>;

    /// 在 max_distance 内查找匹配方块，按距离由近到远，最多 count 个
    fn find_blocks(
        &self,
        matcher: &dyn Fn(&BlockRef) -> bool,
        max_distance: f64,
        count: usize,
    ) -> Vec<BlockRef>;

    fn block_at(&self, pos: Vec3) -> Option<BlockRef>;

    fn inventory(&self) -> Vec<ItemStack>;

    fn find_block(&self, matcher: &dyn Fn(&BlockRef) -> bool, max_distance: f64) -> Option<BlockRef> {
        self.find_blocks(matcher, max_distance, 1).into_iter().next()
    }

    fn nearest_entity(&self, predicate: &dyn Fn(&EntityRef) -> bool) -> Option<EntityRef> {
        let me = self.position();
        self.entities()
            .into_iter()
            .filter(|e| predicate(e))
            .min_by(|a, b| {
                me.distance_to(a.position)
                    .total_cmp(&me.distance_to(b.position))
            })
    }

    fn count_item(&self, name: &str) -> u32 {
        self.inventory()
            .iter()
            .filter(|i| i.name == name)
            .map(|i| i.count)
            .sum()
    }
}

/// 动作接口：每个调用都是一个挂起点
#[async_trait]
pub trait Actions: Send + Sync {
    /// 走到 target 的 range 范围内；超时由调用方施加
    async fn go_to(&self, target: Vec3, range: f64) -> Result<(), ActionError>;

    /// 放弃当前寻路目标
    async fn stop_moving(&self);

    async fn dig(&self, block: &BlockRef) -> Result<(), ActionError>;

    /// 在 reference 方块的 face 方向上放置手持方块
    async fn place_block(&self, reference: &BlockRef, face: Vec3) -> Result<(), ActionError>;

    async fn equip(&self, item: &str, slot: EquipSlot) -> Result<(), ActionError>;

    /// 食用手持物品
    async fn consume(&self) -> Result<(), ActionError>;

    async fn attack(&self, entity: &EntityRef) -> Result<(), ActionError>;

    async fn craft(
        &self,
        recipe: &Recipe,
        times: u32,
        station: Option<&BlockRef>,
    ) -> Result<(), ActionError>;

    async fn sleep_in(&self, bed: &BlockRef) -> Result<(), ActionError>;

    fn chat(&self, message: &str);
}

/// 配方目录：完整配方图，不按当前背包过滤
pub trait RecipeCatalog: Send + Sync {
    fn recipes_for(&self, item: &str) -> Vec<Recipe>;

    fn is_known_item(&self, item: &str) -> bool;
}

/// 核心持有的完整客户端能力
pub trait GameClient: WorldView + Actions + RecipeCatalog {}

impl<T: WorldView + Actions + RecipeCatalog + ?Sized> GameClient for T {}

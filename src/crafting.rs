//! 递归合成解析器
//!
//! `ensure_item(item, quantity)` 把配方图当作依赖树深度优先满足：
//! 已持有足够数量直接成功；无配方即为基础资源（返回 MissingBaseResource，由调用方决定是否去采集）；
//! 否则按原料种类数升序逐个尝试配方，先递归满足原料，再按需寻找/放置工作台，最后调用合成。
//! 每条调用链维护访问列表，遇到循环配方立即失败。

use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::agent::Agent;
use crate::config::VerifyMode;
use crate::navigation::NavError;
use crate::world::{ActionError, Actions, BlockRef, EquipSlot, Recipe, RecipeCatalog, Vec3, WorldView};

/// 合成后等待库存刷新的时间
const CRAFT_SETTLE: Duration = Duration::from_millis(200);
/// 放置工作台后等待方块出现的时间
const PLACE_SETTLE: Duration = Duration::from_millis(500);
/// 放置工作台时寻找参照方块的半径
const PLACE_REFERENCE_RADIUS: f64 = 4.0;
/// 合成前补齐原料的最多轮数
const INGREDIENT_PASSES: usize = 3;

/// 配方执行 times 次所需的各原料数量；溢出视为数量过大
fn requirements(recipe: &Recipe, times: u32) -> Result<Vec<(String, u32)>, CraftError> {
    recipe
        .ingredients
        .iter()
        .map(|ing| {
            ing.count
                .checked_mul(times)
                .map(|count| (ing.item.clone(), count))
                .ok_or_else(|| CraftError::QuantityTooLarge(recipe.result.clone()))
        })
        .collect()
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CraftError {
    #[error("unknown item: {0}")]
    UnknownItem(String),

    #[error("missing base resource: {item} (need {needed} more)")]
    MissingBaseResource { item: String, needed: u32 },

    #[error("need {0} to craft")]
    NeedStation(String),

    #[error("cyclic recipe: {0}")]
    Cycle(String),

    #[error("crafted {actual} {item}, expected {expected}")]
    ShortCraft {
        item: String,
        expected: u32,
        actual: u32,
    },

    #[error("quantity too large to craft {0}")]
    QuantityTooLarge(String),

    #[error("crafting interrupted")]
    Interrupted,

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error("failed to reach station: {0}")]
    Navigation(String),
}

impl From<NavError> for CraftError {
    fn from(e: NavError) -> Self {
        match e {
            NavError::Interrupted => CraftError::Interrupted,
            other => CraftError::Navigation(other.to_string()),
        }
    }
}

/// 名称变体：原样、'-' 换成 '_'、去掉 '_'、加 "minecraft:" 前缀
pub fn name_variants(raw: &str) -> Vec<String> {
    let lowered = raw.trim().to_lowercase();
    let mut variants = vec![
        lowered.clone(),
        lowered.replace('-', "_"),
        lowered.replace('_', ""),
        format!("minecraft:{lowered}"),
    ];
    variants.dedup();
    variants
}

/// 某个任务使用的合成器
pub struct Crafter<'a> {
    agent: &'a Agent,
    token: &'a CancellationToken,
}

impl<'a> Crafter<'a> {
    pub fn new(agent: &'a Agent, token: &'a CancellationToken) -> Self {
        Self { agent, token }
    }

    fn checkpoint(&self) -> Result<(), CraftError> {
        if self.token.is_cancelled() {
            Err(CraftError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// 找到配方目录认识的名称变体
    pub fn resolve_name(&self, raw: &str) -> Option<String> {
        name_variants(raw)
            .into_iter()
            .find(|v| self.agent.client.is_known_item(v))
    }

    /// 确保背包中至少有 quantity 个 item
    pub async fn ensure_item(&self, item: &str, quantity: u32) -> Result<(), CraftError> {
        self.ensure(item.to_string(), quantity, 0, Vec::new()).await
    }

    fn ensure(
        &self,
        item: String,
        quantity: u32,
        depth: usize,
        chain: Vec<String>,
    ) -> BoxFuture<'_, Result<(), CraftError>> {
        async move {
            let client = &self.agent.client;
            if !client.is_known_item(&item) {
                return Err(CraftError::UnknownItem(item));
            }
            let held = client.count_item(&item);
            if held >= quantity {
                return Ok(());
            }
            if chain.contains(&item) {
                let mut path = chain.clone();
                path.push(item);
                return Err(CraftError::Cycle(path.join(" -> ")));
            }
            self.checkpoint()?;

            let missing = quantity - held;
            let mut recipes = client.recipes_for(&item);
            if recipes.is_empty() {
                return Err(CraftError::MissingBaseResource {
                    item,
                    needed: missing,
                });
            }
            // 稳定排序：原料种类少的配方优先
            recipes.sort_by_key(|r| r.ingredients.len());
            tracing::debug!(item = %item, quantity, missing, depth, candidates = recipes.len(), "resolving");

            let mut chain = chain;
            chain.push(item.clone());
            let mut last_err = None;
            for recipe in &recipes {
                match self.try_recipe(recipe, &item, quantity, missing, depth, &chain).await {
                    Ok(()) => return Ok(()),
                    Err(CraftError::Interrupted) => return Err(CraftError::Interrupted),
                    Err(e) => {
                        tracing::debug!(item = %item, error = %e, "recipe candidate failed");
                        last_err = Some(e);
                    }
                }
            }
            Err(last_err.unwrap_or(CraftError::UnknownItem(item)))
        }
        .boxed()
    }

    async fn try_recipe(
        &self,
        recipe: &Recipe,
        item: &str,
        quantity: u32,
        missing: u32,
        depth: usize,
        chain: &[String],
    ) -> Result<(), CraftError> {
        let times = missing.div_ceil(recipe.result_count.max(1));
        let needs = requirements(recipe, times)?;
        self.secure(&needs, depth, chain).await?;
        self.checkpoint()?;

        let station = if recipe.requires_station {
            Some(self.ensure_station(depth, chain).await?)
        } else {
            None
        };

        // 后满足的原料或工作台可能用掉先满足的原料，合成前逐项复核
        for _ in 0..INGREDIENT_PASSES {
            if self.holds_all(&needs) {
                break;
            }
            self.checkpoint()?;
            self.secure(&needs, depth, chain).await?;
        }
        self.checkpoint()?;

        let client = &self.agent.client;
        client.craft(recipe, times, station.as_ref()).await?;
        tokio::time::sleep(CRAFT_SETTLE).await;

        let held = client.count_item(item);
        let crafted = u64::from(recipe.result_count) * u64::from(times);
        self.agent.memory.write().await.record_crafted(crafted);
        tracing::info!(item, times, held, depth, "crafted");

        if held < quantity {
            match self.agent.config.crafting.verify {
                VerifyMode::Lenient => {}
                VerifyMode::Warn => {
                    tracing::warn!(item, expected = quantity, actual = held, "craft produced fewer items than expected");
                }
                VerifyMode::Strict => {
                    return Err(CraftError::ShortCraft {
                        item: item.to_string(),
                        expected: quantity,
                        actual: held,
                    })
                }
            }
        }
        Ok(())
    }

    /// 按顺序递归满足每种原料
    async fn secure(
        &self,
        needs: &[(String, u32)],
        depth: usize,
        chain: &[String],
    ) -> Result<(), CraftError> {
        for (ingredient, count) in needs {
            self.ensure(ingredient.clone(), *count, depth + 1, chain.to_vec())
                .await?;
        }
        Ok(())
    }

    fn holds_all(&self, needs: &[(String, u32)]) -> bool {
        needs
            .iter()
            .all(|(ingredient, count)| self.agent.client.count_item(ingredient) >= *count)
    }

    /// 找到可用的工作台：附近已有 → 远处已有则走过去 → 背包中有（或递归合成一个）则放下
    async fn ensure_station(&self, depth: usize, chain: &[String]) -> Result<BlockRef, CraftError> {
        let cfg = &self.agent.config.crafting;
        let station_item = cfg.station_item.as_str();
        let client = &self.agent.client;
        let nav = self.agent.navigator(self.token);
        let is_station = |b: &BlockRef| b.name == station_item;

        if let Some(block) = client.find_block(&is_station, cfg.station_search_radius) {
            return Ok(block);
        }
        if let Some(block) = client.find_block(&is_station, cfg.station_travel_radius) {
            nav.go_to(block.position, 2.0, self.agent.config.navigation.default_timeout())
                .await?;
            return Ok(block);
        }

        if client.count_item(station_item) == 0 {
            self.ensure(station_item.to_string(), 1, depth + 1, chain.to_vec())
                .await?;
        }
        self.place_near(station_item).await?;
        tokio::time::sleep(PLACE_SETTLE).await;

        let block = client
            .find_block(&is_station, cfg.station_travel_radius)
            .ok_or_else(|| CraftError::NeedStation(station_item.to_string()))?;
        if client.position().distance_to(block.position) > cfg.station_search_radius {
            nav.go_to(block.position, 2.0, self.agent.config.navigation.default_timeout())
                .await?;
        }
        Ok(block)
    }

    /// 在附近实心方块上方放置 item
    pub async fn place_near(&self, item: &str) -> Result<BlockRef, CraftError> {
        let client = &self.agent.client;
        let me = client.position().cell().origin();
        let reference = client
            .find_blocks(
                &|b: &BlockRef| {
                    !b.is_air()
                        && !self.agent.patterns.hazard.is_match(&b.name)
                        && b.position.cell() != me.offset(0.0, -1.0, 0.0).cell()
                        && client
                            .block_at(b.position.offset(0.0, 1.0, 0.0))
                            .is_some_and(|above| above.is_air())
                },
                PLACE_REFERENCE_RADIUS,
                1,
            )
            .into_iter()
            .next()
            .ok_or_else(|| CraftError::NeedStation(item.to_string()))?;
        client.equip(item, EquipSlot::Hand).await?;
        client.place_block(&reference, Vec3::new(0.0, 1.0, 0.0)).await?;
        tracing::info!(item, at = %reference.position.offset(0.0, 1.0, 0.0), "placed block");
        Ok(BlockRef::new(item, reference.position.offset(0.0, 1.0, 0.0)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::AppConfig;
    use crate::world::{SimWorld, WorldView};

    fn agent_with(world: Arc<SimWorld>, verify: VerifyMode) -> Agent {
        let mut cfg = AppConfig::default();
        cfg.crafting.verify = verify;
        Agent::new(cfg, world).unwrap()
    }

    fn plank_table_world() -> SimWorld {
        SimWorld::new()
            .with_block("grass_block", Vec3::new(1.0, 63.0, 0.0))
            .with_recipe(Recipe::new("oak_planks", 4).ingredient("oak_log", 1))
            .with_recipe(Recipe::new("crafting_table", 1).ingredient("oak_planks", 4))
    }

    #[tokio::test]
    async fn test_base_case_no_lookups() {
        let world = Arc::new(plank_table_world().with_item("oak_planks", 5));
        let agent = agent_with(world.clone(), VerifyMode::Warn);
        let token = CancellationToken::new();
        agent.crafter(&token).ensure_item("oak_planks", 3).await.unwrap();
        assert_eq!(world.recipe_lookups(), 0);
        assert!(world.craft_calls().is_empty());
    }

    #[tokio::test]
    async fn test_recursive_plank_then_table() {
        let world = Arc::new(plank_table_world().with_item("oak_log", 1));
        let agent = agent_with(world.clone(), VerifyMode::Strict);
        let token = CancellationToken::new();
        agent
            .crafter(&token)
            .ensure_item("crafting_table", 1)
            .await
            .unwrap();

        let calls = world.craft_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].item, "oak_planks");
        assert_eq!(calls[0].times, 1);
        assert_eq!(calls[1].item, "crafting_table");
        assert_eq!(world.count_item("oak_log"), 0);
        assert_eq!(world.count_item("crafting_table"), 1);
    }

    #[tokio::test]
    async fn test_cycle_terminates() {
        let world = Arc::new(
            SimWorld::new()
                .with_recipe(Recipe::new("a", 1).ingredient("b", 1))
                .with_recipe(Recipe::new("b", 1).ingredient("a", 1)),
        );
        let agent = agent_with(world, VerifyMode::Warn);
        let token = CancellationToken::new();
        let err = agent.crafter(&token).ensure_item("a", 1).await.unwrap_err();
        assert!(matches!(err, CraftError::Cycle(ref path) if path == "a -> b -> a"));
    }

    #[tokio::test]
    async fn test_ingredient_used_up_by_sibling_is_restored() {
        // stick 用掉了已备好的木板，合成前需要再用原木补回
        let world = Arc::new(
            plank_table_world()
                .with_item("oak_planks", 2)
                .with_item("oak_log", 1)
                .with_recipe(Recipe::new("stick", 4).ingredient("oak_planks", 2))
                .with_recipe(
                    Recipe::new("sign_post", 1)
                        .ingredient("oak_planks", 2)
                        .ingredient("stick", 1),
                ),
        );
        let agent = agent_with(world.clone(), VerifyMode::Strict);
        let token = CancellationToken::new();
        agent.crafter(&token).ensure_item("sign_post", 1).await.unwrap();

        assert_eq!(world.count_item("sign_post"), 1);
        assert_eq!(world.count_item("oak_log"), 0);
        assert_eq!(world.count_item("oak_planks"), 2);
        assert_eq!(world.count_item("stick"), 3);
        let crafted: Vec<String> = world.craft_calls().into_iter().map(|c| c.item).collect();
        assert_eq!(crafted, ["stick", "oak_planks", "sign_post"]);
    }

    #[tokio::test]
    async fn test_oversized_quantity_fails_without_crafting() {
        let world = Arc::new(plank_table_world().with_item("oak_log", 1));
        let agent = agent_with(world.clone(), VerifyMode::Warn);
        let token = CancellationToken::new();
        let err = agent
            .crafter(&token)
            .ensure_item("crafting_table", u32::MAX)
            .await
            .unwrap_err();
        assert_eq!(err, CraftError::QuantityTooLarge("crafting_table".into()));
        assert!(world.craft_calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_base_resource() {
        let world = Arc::new(plank_table_world());
        let agent = agent_with(world, VerifyMode::Warn);
        let token = CancellationToken::new();
        let err = agent
            .crafter(&token)
            .ensure_item("crafting_table", 1)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            CraftError::MissingBaseResource {
                item: "oak_log".into(),
                needed: 1
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_item() {
        let world = Arc::new(SimWorld::new());
        let agent = agent_with(world, VerifyMode::Warn);
        let token = CancellationToken::new();
        let err = agent.crafter(&token).ensure_item("unobtainium", 1).await.unwrap_err();
        assert_eq!(err, CraftError::UnknownItem("unobtainium".into()));
    }

    #[tokio::test]
    async fn test_falls_back_to_next_recipe() {
        let world = Arc::new(
            SimWorld::new()
                .with_item("birch_log", 1)
                .with_item("resin", 1)
                .with_recipe(Recipe::new("planks", 4).ingredient("oak_log", 1))
                .with_recipe(
                    Recipe::new("planks", 4)
                        .ingredient("birch_log", 1)
                        .ingredient("resin", 1),
                ),
        );
        let agent = agent_with(world.clone(), VerifyMode::Warn);
        let token = CancellationToken::new();
        agent.crafter(&token).ensure_item("planks", 4).await.unwrap();
        assert_eq!(world.count_item("planks"), 4);
        assert_eq!(world.count_item("birch_log"), 0);
    }

    #[tokio::test]
    async fn test_station_is_crafted_and_placed() {
        let world = Arc::new(
            plank_table_world()
                .with_item("oak_log", 2)
                .with_recipe(
                    Recipe::new("wooden_pickaxe", 1)
                        .ingredient("oak_planks", 3)
                        .with_station(),
                ),
        );
        let agent = agent_with(world.clone(), VerifyMode::Strict);
        let token = CancellationToken::new();
        agent
            .crafter(&token)
            .ensure_item("wooden_pickaxe", 1)
            .await
            .unwrap();
        assert_eq!(world.count_item("wooden_pickaxe"), 1);
        assert_eq!(
            world.block_name_at(Vec3::new(1.0, 64.0, 0.0)).as_deref(),
            Some("crafting_table")
        );
        assert!(world.craft_calls().last().unwrap().at_station);
    }

    #[tokio::test]
    async fn test_strict_verify_rejects_short_craft() {
        let world = Arc::new(plank_table_world().with_item("oak_log", 1));
        world.set_craft_shortfall(1);
        let agent = agent_with(world, VerifyMode::Strict);
        let token = CancellationToken::new();
        let err = agent.crafter(&token).ensure_item("oak_planks", 4).await.unwrap_err();
        assert!(matches!(err, CraftError::ShortCraft { expected: 4, actual: 3, .. }));
    }

    #[tokio::test]
    async fn test_interrupted_before_craft() {
        let world = Arc::new(plank_table_world().with_item("oak_log", 1));
        let agent = agent_with(world.clone(), VerifyMode::Warn);
        let token = CancellationToken::new();
        token.cancel();
        let err = agent.crafter(&token).ensure_item("oak_planks", 4).await.unwrap_err();
        assert_eq!(err, CraftError::Interrupted);
        assert!(world.craft_calls().is_empty());
    }

    #[test]
    fn test_name_variants() {
        let v = name_variants("Oak-Planks");
        assert_eq!(v[0], "oak-planks");
        assert!(v.contains(&"oak_planks".to_string()));
        assert!(v.contains(&"minecraft:oak-planks".to_string()));
    }
}

//! 采矿与采集
//!
//! 挖一个方块时连同与之相连的同类方块（矿脉、整棵树）一起挖掉。

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use crate::core::{AgentError, TaskOutcome};
use crate::navigation::NavError;
use crate::world::{Actions, BlockRef, Cell, EquipSlot, Vec3, WorldView};

use super::TaskContext;

const MAX_CLUSTER: usize = 64;
const MAX_SEARCH_ITERATIONS: usize = 1000;
const REACH: f64 = 4.0;
const DIG_INTERVAL: Duration = Duration::from_millis(100);
const APPROACH_TIMEOUT: Duration = Duration::from_secs(10);

/// 六个面加上竖直方向的斜角邻居
const CLUSTER_OFFSETS: [(f64, f64, f64); 14] = [
    (1.0, 0.0, 0.0),
    (-1.0, 0.0, 0.0),
    (0.0, 1.0, 0.0),
    (0.0, -1.0, 0.0),
    (0.0, 0.0, 1.0),
    (0.0, 0.0, -1.0),
    (1.0, 1.0, 0.0),
    (-1.0, 1.0, 0.0),
    (1.0, -1.0, 0.0),
    (-1.0, -1.0, 0.0),
    (0.0, 1.0, 1.0),
    (0.0, 1.0, -1.0),
    (0.0, -1.0, 1.0),
    (0.0, -1.0, -1.0),
];

/// 工具材质（好到差）
const TOOL_MATERIALS: [&str; 6] = ["netherite", "diamond", "iron", "stone", "golden", "wooden"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ToolClass {
    Axe,
    Pickaxe,
    Shovel,
}

impl ToolClass {
    fn for_block(name: &str) -> Option<Self> {
        let has = |keys: &[&str]| keys.iter().any(|k| name.contains(k));
        if has(&["log", "wood", "planks", "leaves"]) {
            Some(Self::Axe)
        } else if has(&["stone", "ore", "coal", "iron", "gold", "diamond", "emerald"]) {
            Some(Self::Pickaxe)
        } else if has(&["dirt", "sand", "gravel", "clay", "grass"]) {
            Some(Self::Shovel)
        } else {
            None
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            Self::Axe => "_axe",
            Self::Pickaxe => "_pickaxe",
            Self::Shovel => "_shovel",
        }
    }
}

/// 某种物品可以从哪些方块采集
pub fn source_blocks(item: &str) -> Vec<String> {
    match item {
        "cobblestone" => vec!["stone".into(), "cobblestone".into()],
        "coal" => vec!["coal_ore".into()],
        "dirt" => vec!["dirt".into(), "grass_block".into()],
        other => vec![other.to_string()],
    }
}

/// 从起点出发广度优先收集相连的同名方块
fn find_cluster<W: WorldView + ?Sized>(client: &W, start: &BlockRef) -> Vec<BlockRef> {
    let mut cluster = vec![start.clone()];
    let mut visited: HashSet<Cell> = HashSet::from([start.position.cell()]);
    let mut frontier = VecDeque::from([start.position]);
    let mut iterations = 0;

    while let Some(pos) = frontier.pop_front() {
        if cluster.len() >= MAX_CLUSTER || iterations >= MAX_SEARCH_ITERATIONS {
            break;
        }
        for (dx, dy, dz) in CLUSTER_OFFSETS {
            iterations += 1;
            let next = pos.offset(dx, dy, dz);
            if !visited.insert(next.cell()) {
                continue;
            }
            let Some(block) = client.block_at(next) else {
                continue;
            };
            if block.name == start.name {
                frontier.push_back(block.position);
                cluster.push(block);
                if cluster.len() >= MAX_CLUSTER {
                    break;
                }
            }
        }
    }
    cluster
}

async fn equip_tool(ctx: &TaskContext<'_>, block_name: &str) {
    let Some(class) = ToolClass::for_block(block_name) else {
        return;
    };
    let client = ctx.client();
    let tool = TOOL_MATERIALS
        .iter()
        .map(|m| format!("{m}{}", class.suffix()))
        .find(|t| client.count_item(t) > 0);
    if let Some(tool) = tool {
        if let Err(e) = client.equip(&tool, EquipSlot::Hand).await {
            tracing::debug!(tool = %tool, error = %e, "equip tool failed");
        }
    }
}

/// 挖掉目标方块所在的整簇同类方块，由近到远
pub async fn mine(ctx: &TaskContext<'_>, block: &BlockRef) -> Result<TaskOutcome, AgentError> {
    let client = ctx.client();
    let mut remaining = find_cluster(client, block);
    tracing::info!(block = %block.name, cluster = remaining.len(), "mining cluster");
    let mut mined = 0usize;

    while !remaining.is_empty() {
        ctx.checkpoint()?;
        let me = client.position();
        let idx = remaining
            .iter()
            .enumerate()
            .min_by(|a, b| {
                me.distance_to(a.1.position)
                    .total_cmp(&me.distance_to(b.1.position))
            })
            .map(|(i, _)| i)
            .unwrap_or(0);
        let target = remaining.swap_remove(idx);

        let still_there = client
            .block_at(target.position)
            .is_some_and(|b| b.name == target.name);
        if !still_there {
            continue;
        }

        if me.distance_to(target.position) > REACH {
            match ctx.nav().go_to(target.position, 3.0, APPROACH_TIMEOUT).await {
                Ok(()) => {}
                Err(NavError::Interrupted) => return Err(AgentError::Interrupted),
                Err(e) => {
                    tracing::debug!(at = %target.position, error = %e, "cannot reach block");
                    continue;
                }
            }
        }

        equip_tool(ctx, &target.name).await;
        if let Err(e) = client.dig(&target).await {
            tracing::debug!(at = %target.position, error = %e, "dig failed");
            continue;
        }
        mined += 1;
        {
            let mut memory = ctx.agent.memory.write().await;
            memory.record_mined();
            memory.save_resource(&target.name, target.position);
        }
        ctx.pause(DIG_INTERVAL).await?;
    }

    if mined == 0 {
        return Err(AgentError::TaskFailed(format!("could not mine {}", block.name)));
    }
    tracing::info!(block = %block.name, mined, "mining finished");
    Ok(TaskOutcome::Done)
}

/// 采集直到背包里有 count 个 item；每轮挖一簇后返回 Continue
pub async fn gather(ctx: &TaskContext<'_>, item: &str, count: u32) -> Result<TaskOutcome, AgentError> {
    let client = ctx.client();
    let have = client.count_item(item);
    if have >= count {
        tracing::info!(item, have, "gather target reached");
        return Ok(TaskOutcome::Done);
    }

    let sources = source_blocks(item);
    let radius = ctx.agent.config.resources.scan_radius;
    let visible = client.find_block(&|b: &BlockRef| sources.contains(&b.name), radius);
    if let Some(block) = visible {
        tracing::debug!(item, have, count, source = %block.name, "gathering");
        mine(ctx, &block).await?;
        return Ok(if client.count_item(item) >= count {
            TaskOutcome::Done
        } else {
            TaskOutcome::Continue
        });
    }

    let remembered: Option<(String, Vec3)> = {
        let memory = ctx.agent.memory.read().await;
        let me = client.position();
        sources
            .iter()
            .filter_map(|s| memory.nearest_resource(s, me).map(|r| (s.clone(), r.position)))
            .min_by(|a, b| me.distance_to(a.1).total_cmp(&me.distance_to(b.1)))
    };
    if let Some((source, pos)) = remembered {
        tracing::info!(item, source = %source, at = %pos, "heading to remembered resource");
        let result = ctx
            .nav()
            .go_to_safe(pos, 3.0, ctx.agent.config.navigation.default_timeout())
            .await;
        // 到达后重新扫描；旧记录作废，真正看到时会再记下
        ctx.agent.memory.write().await.forget_resource(&source, pos);
        result?;
        return Ok(TaskOutcome::Continue);
    }

    Err(AgentError::TaskFailed(format!("no {item} source nearby")))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::agent::Agent;
    use crate::config::AppConfig;
    use crate::core::Priority;
    use crate::world::SimWorld;

    fn setup(world: SimWorld) -> (Arc<SimWorld>, Agent) {
        let world = Arc::new(world);
        let agent = Agent::new(AppConfig::default(), world.clone()).unwrap();
        (world, agent)
    }

    fn ctx(agent: &Agent) -> TaskContext<'_> {
        TaskContext::new(agent, CancellationToken::new(), Priority::Resource)
    }

    #[test]
    fn test_tool_class() {
        assert_eq!(ToolClass::for_block("oak_log"), Some(ToolClass::Axe));
        assert_eq!(ToolClass::for_block("iron_ore"), Some(ToolClass::Pickaxe));
        assert_eq!(ToolClass::for_block("gravel"), Some(ToolClass::Shovel));
        assert_eq!(ToolClass::for_block("white_wool"), None);
    }

    #[test]
    fn test_cluster_follows_connected_blocks() {
        let world = SimWorld::new()
            .with_block("oak_log", Vec3::new(5.0, 64.0, 0.0))
            .with_block("oak_log", Vec3::new(5.0, 65.0, 0.0))
            .with_block("oak_log", Vec3::new(6.0, 66.0, 0.0))
            .with_block("oak_log", Vec3::new(9.0, 64.0, 0.0))
            .with_block("stone", Vec3::new(5.0, 63.0, 0.0));
        let start = BlockRef::new("oak_log", Vec3::new(5.0, 64.0, 0.0));
        let cluster = find_cluster(&world, &start);
        assert_eq!(cluster.len(), 3);
        assert!(cluster.iter().all(|b| b.name == "oak_log"));
    }

    #[tokio::test]
    async fn test_mine_whole_tree() {
        let (world, agent) = setup(
            SimWorld::new()
                .with_item("wooden_axe", 1)
                .with_block("oak_log", Vec3::new(5.0, 64.0, 0.0))
                .with_block("oak_log", Vec3::new(5.0, 65.0, 0.0))
                .with_block("oak_log", Vec3::new(5.0, 66.0, 0.0))
                .with_block("oak_log", Vec3::new(20.0, 64.0, 0.0)),
        );
        let start = BlockRef::new("oak_log", Vec3::new(5.0, 64.0, 0.0));
        assert_eq!(mine(&ctx(&agent), &start).await.unwrap(), TaskOutcome::Done);
        assert_eq!(world.count_item("oak_log"), 3);
        assert_eq!(world.block_name_at(Vec3::new(20.0, 64.0, 0.0)).as_deref(), Some("oak_log"));
        assert_eq!(world.equipped().as_deref(), Some("wooden_axe"));
        let memory = agent.memory.read().await;
        assert_eq!(memory.stats().blocks_mined, 3);
        assert!(memory.resource_count() >= 1);
    }

    #[tokio::test]
    async fn test_mine_prefers_better_pickaxe() {
        let (world, agent) = setup(
            SimWorld::new()
                .with_item("wooden_pickaxe", 1)
                .with_item("stone_pickaxe", 1)
                .with_block("stone", Vec3::new(2.0, 64.0, 0.0)),
        );
        let start = BlockRef::new("stone", Vec3::new(2.0, 64.0, 0.0));
        mine(&ctx(&agent), &start).await.unwrap();
        assert_eq!(world.equipped().as_deref(), Some("stone_pickaxe"));
    }

    #[tokio::test]
    async fn test_mine_missing_block_fails() {
        let (_world, agent) = setup(SimWorld::new());
        let start = BlockRef::new("stone", Vec3::new(2.0, 64.0, 0.0));
        assert!(mine(&ctx(&agent), &start).await.is_err());
    }

    #[tokio::test]
    async fn test_gather_until_count() {
        let (world, agent) = setup(
            SimWorld::new()
                .with_drop("stone", "cobblestone")
                .with_block("stone", Vec3::new(3.0, 64.0, 0.0))
                .with_block("stone", Vec3::new(3.0, 64.0, 10.0)),
        );
        let ctx = ctx(&agent);
        assert_eq!(gather(&ctx, "cobblestone", 2).await.unwrap(), TaskOutcome::Continue);
        assert_eq!(world.count_item("cobblestone"), 1);
        assert_eq!(gather(&ctx, "cobblestone", 2).await.unwrap(), TaskOutcome::Done);
        assert_eq!(world.count_item("cobblestone"), 2);
    }

    #[tokio::test]
    async fn test_gather_uses_remembered_resource() {
        let far = Vec3::new(100.0, 64.0, 0.0);
        let (world, agent) = setup(
            SimWorld::new()
                .with_drop("coal_ore", "coal")
                .with_block("coal_ore", far),
        );
        agent.memory.write().await.save_resource("coal_ore", far);
        let ctx = ctx(&agent);
        assert_eq!(gather(&ctx, "coal", 1).await.unwrap(), TaskOutcome::Continue);
        assert!(world.position().distance_to(far) <= 3.0 * 3.0);
        assert_eq!(agent.memory.read().await.resource_count(), 0);
        // 到达后直接可见
        assert_eq!(gather(&ctx, "coal", 1).await.unwrap(), TaskOutcome::Done);
        assert_eq!(world.count_item("coal"), 1);
    }

    #[tokio::test]
    async fn test_gather_without_source_fails() {
        let (_world, agent) = setup(SimWorld::new());
        let err = gather(&ctx(&agent), "iron_ore", 3).await.unwrap_err();
        assert!(err.to_string().contains("no iron_ore source"));
    }
}

//! 建造：在身边盖一个带门洞的 5×5×4 空心小屋

use std::time::Duration;

use crate::core::{AgentError, TaskOutcome};
use crate::world::{Actions, EquipSlot, Vec3, WorldView};

use super::TaskContext;

const SIZE: i32 = 5;
const HEIGHT: i32 = 4;
const MIN_MATERIAL: u32 = 100;
const REACH: f64 = 4.0;
const PLACE_INTERVAL: Duration = Duration::from_millis(50);

/// 找参照方块的顺序：下、上、四周
const NEIGHBOURS: [(f64, f64, f64); 6] = [
    (0.0, -1.0, 0.0),
    (0.0, 1.0, 0.0),
    (1.0, 0.0, 0.0),
    (-1.0, 0.0, 0.0),
    (0.0, 0.0, 1.0),
    (0.0, 0.0, -1.0),
];

/// 按库存选择建材：圆石优先，其次木板
pub fn pick_material(cobblestone: u32, planks: u32) -> Option<&'static str> {
    if cobblestone >= MIN_MATERIAL {
        Some("cobblestone")
    } else if planks > MIN_MATERIAL {
        Some("oak_planks")
    } else {
        None
    }
}

/// 小屋所有方块的相对坐标：先墙（逐层）后屋顶
fn shelter_layout() -> Vec<(i32, i32, i32)> {
    let mut cells = Vec::new();
    for y in 0..HEIGHT {
        for x in 0..SIZE {
            for z in 0..SIZE {
                let interior = x > 0 && x < SIZE - 1 && z > 0 && z < SIZE - 1;
                let doorway = x == 2 && z == 0 && y <= 1;
                if !interior && !doorway {
                    cells.push((x, y, z));
                }
            }
        }
    }
    for x in 0..SIZE {
        for z in 0..SIZE {
            cells.push((x, HEIGHT, z));
        }
    }
    cells
}

/// 在 pos 放一块 material；返回是否放成功
async fn place_at(ctx: &TaskContext<'_>, pos: Vec3, material: &str) -> Result<bool, AgentError> {
    let client = ctx.client();
    if let Some(existing) = client.block_at(pos) {
        if existing.name == material {
            return Ok(true);
        }
        if !existing.is_air() {
            if let Err(e) = client.dig(&existing).await {
                tracing::debug!(at = %pos, error = %e, "clearing block failed");
                return Ok(false);
            }
        }
    }

    let timeout = ctx.agent.config.navigation.waypoint_timeout();
    if client.position().distance_to(pos) > REACH {
        ctx.nav().go_to_safe(pos, 3.0, timeout).await?;
    }
    if client.position().distance_to(pos) < 1.5 {
        ctx.nav().go_to_safe(pos.offset(-2.0, 0.0, -2.0), 0.0, timeout).await?;
    }

    let reference = NEIGHBOURS.iter().find_map(|&(dx, dy, dz)| {
        client
            .block_at(pos.offset(dx, dy, dz))
            .filter(|b| !b.is_air())
            .map(|b| (b, Vec3::new(-dx, -dy, -dz)))
    });
    let Some((reference, face)) = reference else {
        tracing::debug!(at = %pos, "no reference block to place against");
        return Ok(false);
    };

    client.equip(material, EquipSlot::Hand).await?;
    match client.place_block(&reference, face).await {
        Ok(()) => Ok(true),
        Err(e) => {
            tracing::debug!(at = %pos, error = %e, "place failed");
            Ok(false)
        }
    }
}

pub async fn build_shelter(ctx: &TaskContext<'_>) -> Result<TaskOutcome, AgentError> {
    let client = ctx.client();
    let Some(material) = pick_material(client.count_item("cobblestone"), client.count_item("oak_planks"))
    else {
        return Err(AgentError::TaskFailed(format!(
            "not enough building material (need {MIN_MATERIAL} cobblestone)"
        )));
    };

    let origin = client.position().cell().origin().offset(1.0, 0.0, 1.0);
    tracing::info!(material, at = %origin, "building shelter");

    let mut placed = 0usize;
    for (x, y, z) in shelter_layout() {
        ctx.checkpoint()?;
        let pos = origin.offset(x as f64, y as f64, z as f64);
        if place_at(ctx, pos, material).await? {
            placed += 1;
        }
        ctx.pause(PLACE_INTERVAL).await?;
    }
    if placed == 0 {
        return Err(AgentError::TaskFailed("could not place any shelter block".to_string()));
    }

    let half = f64::from(SIZE / 2);
    let center = origin.offset(half, 0.0, half);
    {
        let mut memory = ctx.agent.memory.write().await;
        memory.set_shelter(true);
        memory.set_home(center);
        memory.save_location("shelter", center, "shelter");
        memory.save_zone("shelter", center, half + 1.0, "shelter");
        memory.add_achievement("build_shelter");
    }
    tracing::info!(placed, at = %center, "shelter completed");
    Ok(TaskOutcome::Done)
}

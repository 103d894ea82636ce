//! 生存类任务：进食、狩猎、睡觉、紧急躲避

use std::time::Duration;

use crate::core::{AgentError, TaskOutcome};
use crate::world::{Actions, BlockRef, EquipSlot, WorldView};

use super::TaskContext;

const HUNT_RADIUS: f64 = 32.0;
const HUNT_MAX_ROUNDS: usize = 20;
const ATTACK_REACH: f64 = 3.0;
const ATTACK_INTERVAL: Duration = Duration::from_millis(250);
const BED_SEARCH_RADIUS: f64 = 32.0;
const EAT_SETTLE: Duration = Duration::from_millis(500);

const ANIMALS: [&str; 5] = ["pig", "cow", "chicken", "sheep", "rabbit"];

pub async fn eat(ctx: &TaskContext<'_>, item: &str) -> Result<TaskOutcome, AgentError> {
    let client = ctx.client();
    tracing::info!(item, health = client.health(), food = client.food(), "eating");
    client.equip(item, EquipSlot::Hand).await?;
    client.consume().await?;
    ctx.pause(EAT_SETTLE).await?;
    tracing::info!(item, food = client.food(), "ate");
    Ok(TaskOutcome::Done)
}

/// 追击并击杀最近的被动动物
pub async fn hunt(ctx: &TaskContext<'_>) -> Result<TaskOutcome, AgentError> {
    let client = ctx.client();
    let me = client.position();
    let Some(animal) = client.nearest_entity(&|e| {
        ANIMALS.contains(&e.name.as_str()) && me.distance_to(e.position) <= HUNT_RADIUS
    }) else {
        return Err(AgentError::TaskFailed("No animals found".to_string()));
    };
    tracing::info!(animal = %animal.name, "hunting");

    for _ in 0..HUNT_MAX_ROUNDS {
        ctx.checkpoint()?;
        let Some(current) = client.entity(animal.id) else {
            break;
        };
        if client.position().distance_to(current.position) > ATTACK_REACH {
            ctx.nav()
                .go_to(current.position, 2.0, Duration::from_secs(10))
                .await?;
        }
        client.attack(&current).await?;
        if client.entity(animal.id).is_none() {
            break;
        }
        ctx.pause(ATTACK_INTERVAL).await?;
    }

    if client.entity(animal.id).is_some() {
        return Err(AgentError::TaskFailed(format!("{} escaped", animal.name)));
    }
    ctx.agent.memory.write().await.record_kill();
    Ok(TaskOutcome::Done)
}

/// 找到（或放下）一张床
async fn find_bed(ctx: &TaskContext<'_>) -> Result<Option<BlockRef>, AgentError> {
    let client = ctx.client();
    let is_bed = |b: &BlockRef| b.name.ends_with("_bed");
    if let Some(bed) = client.find_block(&is_bed, BED_SEARCH_RADIUS) {
        return Ok(Some(bed));
    }
    let held = client
        .inventory()
        .into_iter()
        .find(|i| i.count > 0 && i.name.ends_with("_bed"));
    match held {
        Some(item) => Ok(Some(ctx.crafter().place_near(&item.name).await?)),
        None => Ok(None),
    }
}

/// 夜间在附近的床上睡觉
pub async fn sleep(ctx: &TaskContext<'_>) -> Result<TaskOutcome, AgentError> {
    let client = ctx.client();
    if client.is_day() {
        tracing::debug!("daytime, skipping sleep");
        return Ok(TaskOutcome::Done);
    }
    let bed = find_bed(ctx)
        .await?
        .ok_or_else(|| AgentError::TaskFailed("No bed nearby".to_string()))?;
    ctx.nav()
        .go_to(bed.position, 2.0, ctx.agent.config.navigation.default_timeout())
        .await?;
    client.sleep_in(&bed).await?;
    tracing::info!(at = %bed.position, "slept through the night");
    Ok(TaskOutcome::Done)
}

/// 没有庇护所的夜晚：能睡就睡，否则原地停下
pub async fn emergency_hide(ctx: &TaskContext<'_>) -> Result<TaskOutcome, AgentError> {
    let client = ctx.client();
    if client.is_day() {
        return Ok(TaskOutcome::Done);
    }
    match sleep(ctx).await {
        Ok(outcome) => Ok(outcome),
        Err(e) if e.is_interruption() => Err(e),
        Err(e) => {
            tracing::info!(error = %e, "cannot sleep, holding position");
            client.stop_moving().await;
            Ok(TaskOutcome::Done)
        }
    }
}

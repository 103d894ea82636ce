//! 战斗与逃跑
//!
//! 战斗是多轮任务：每轮重新读取目标位置，调整距离后攻击一次并返回 Continue。

use std::time::Duration;

use crate::core::{AgentError, TaskOutcome};
use crate::navigation::NavError;
use crate::world::{Actions, EntityRef, EquipSlot, WorldView};

use super::TaskContext;

/// 苦力怕近于此距离时后撤
const CREEPER_DANGER_DISTANCE: f64 = 4.0;
const CREEPER_RETREAT: f64 = 5.0;
const FLEE_DISTANCE: f64 = 10.0;
const BACK_OFF: f64 = 2.0;
const APPROACH_TIMEOUT: Duration = Duration::from_secs(15);

/// 武器优先级（高到低）
const WEAPONS: [&str; 6] = [
    "netherite_sword",
    "diamond_sword",
    "iron_sword",
    "stone_sword",
    "golden_sword",
    "wooden_sword",
];

/// 导航失败不影响战斗，打断除外
fn ignore_nav_error(result: Result<(), NavError>) -> Result<(), AgentError> {
    match result {
        Err(NavError::Interrupted) => Err(AgentError::Interrupted),
        Err(e) => {
            tracing::debug!(error = %e, "combat movement failed");
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}

pub async fn fight(ctx: &TaskContext<'_>, target: &EntityRef) -> Result<TaskOutcome, AgentError> {
    let client = ctx.client();
    let cfg = &ctx.agent.config.combat;
    let Some(target) = client.entity(target.id) else {
        return Ok(TaskOutcome::Done);
    };
    let dist = client.position().distance_to(target.position);
    if dist > cfg.scan_radius {
        tracing::info!(mob = %target.name, dist, "target too far, leaving combat");
        return Ok(TaskOutcome::Done);
    }
    ctx.checkpoint()?;

    let nav = ctx.nav();
    if client.health() < cfg.flee_health {
        tracing::warn!(mob = %target.name, health = client.health(), "low health, fleeing");
        ignore_nav_error(nav.move_away(target.position, FLEE_DISTANCE).await)?;
        return Ok(TaskOutcome::Done);
    }
    if target.name.contains("creeper") && dist < CREEPER_DANGER_DISTANCE {
        tracing::info!(dist, "creeper too close, retreating");
        ignore_nav_error(nav.move_away(target.position, CREEPER_RETREAT).await)?;
        return Ok(TaskOutcome::Done);
    }

    if dist > cfg.combat_distance {
        ignore_nav_error(
            nav.go_to_safe(target.position, cfg.combat_distance, APPROACH_TIMEOUT)
                .await,
        )?;
    } else if dist < cfg.combat_distance - 1.0 {
        ignore_nav_error(nav.move_away(target.position, BACK_OFF).await)?;
    }
    ctx.checkpoint()?;

    if let Some(weapon) = WEAPONS.iter().find(|w| client.count_item(w) > 0) {
        if let Err(e) = client.equip(weapon, EquipSlot::Hand).await {
            tracing::debug!(weapon, error = %e, "equip weapon failed");
        }
    }
    if let Err(e) = client.attack(&target).await {
        tracing::debug!(mob = %target.name, error = %e, "attack failed");
    }

    if client.entity(target.id).is_none() {
        ctx.agent.memory.write().await.record_kill();
        tracing::info!(mob = %target.name, "target defeated");
        return Ok(TaskOutcome::Done);
    }
    Ok(TaskOutcome::Continue)
}

/// 朝威胁反方向跑 10 格；拉开到扫描半径以外即完成，否则下一轮继续
pub async fn flee(ctx: &TaskContext<'_>, threat: &EntityRef) -> Result<TaskOutcome, AgentError> {
    let client = ctx.client();
    let threat_pos = client
        .entity(threat.id)
        .map(|e| e.position)
        .unwrap_or(threat.position);
    ignore_nav_error(ctx.nav().move_away(threat_pos, FLEE_DISTANCE).await)?;

    let Some(current) = client.entity(threat.id) else {
        return Ok(TaskOutcome::Done);
    };
    if client.position().distance_to(current.position) > ctx.agent.config.combat.scan_radius {
        Ok(TaskOutcome::Done)
    } else {
        Ok(TaskOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::agent::Agent;
    use crate::config::AppConfig;
    use crate::core::Priority;
    use crate::world::{SimWorld, Vec3};

    fn setup(world: SimWorld) -> (Arc<SimWorld>, Agent) {
        let world = Arc::new(world);
        let agent = Agent::new(AppConfig::default(), world.clone()).unwrap();
        (world, agent)
    }

    #[tokio::test]
    async fn test_fight_until_target_dies() {
        let (world, agent) = setup(SimWorld::new().with_item("wooden_sword", 1));
        let id = world.spawn_entity("zombie", Vec3::new(3.5, 64.0, 0.0));
        let target = world.entity(id).unwrap();
        let ctx = TaskContext::new(&agent, CancellationToken::new(), Priority::Combat);

        let mut rounds = 0;
        loop {
            rounds += 1;
            match fight(&ctx, &target).await.unwrap() {
                TaskOutcome::Continue => continue,
                TaskOutcome::Done => break,
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(rounds, 4);
        assert!(world.entity(id).is_none());
        assert_eq!(world.equipped().as_deref(), Some("wooden_sword"));
        assert_eq!(agent.memory.read().await.stats().mobs_killed, 1);
    }

    #[tokio::test]
    async fn test_fight_done_when_target_far() {
        let (world, agent) = setup(SimWorld::new());
        let id = world.spawn_entity("skeleton", Vec3::new(40.0, 64.0, 0.0));
        let target = world.entity(id).unwrap();
        let ctx = TaskContext::new(&agent, CancellationToken::new(), Priority::Combat);
        assert_eq!(fight(&ctx, &target).await.unwrap(), TaskOutcome::Done);
        assert!(world.entity(id).is_some());
    }

    #[tokio::test]
    async fn test_fight_interrupted() {
        let (world, agent) = setup(SimWorld::new());
        let id = world.spawn_entity("zombie", Vec3::new(2.0, 64.0, 0.0));
        let target = world.entity(id).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let ctx = TaskContext::new(&agent, token, Priority::Combat);
        let err = fight(&ctx, &target).await.unwrap_err();
        assert!(err.is_interruption());
    }

    #[tokio::test]
    async fn test_creeper_retreat() {
        let (world, agent) = setup(SimWorld::new());
        let id = world.spawn_entity("creeper", Vec3::new(2.0, 64.0, 0.0));
        let target = world.entity(id).unwrap();
        let ctx = TaskContext::new(&agent, CancellationToken::new(), Priority::Critical);
        assert_eq!(fight(&ctx, &target).await.unwrap(), TaskOutcome::Done);
        assert!(world.position().x < -2.0);
        assert!(world.entity(id).is_some());
    }

    #[tokio::test]
    async fn test_flee_moves_away() {
        let (world, agent) = setup(SimWorld::new().with_health(5.0));
        let id = world.spawn_entity("zombie", Vec3::new(1.0, 64.0, 0.0));
        let threat = world.entity(id).unwrap();
        let ctx = TaskContext::new(&agent, CancellationToken::new(), Priority::Critical);
        let outcome = flee(&ctx, &threat).await.unwrap();
        assert_eq!(outcome, TaskOutcome::Continue);
        assert!((world.position().x - -10.0).abs() < 1e-6);
    }
}

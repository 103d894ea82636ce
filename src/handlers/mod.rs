//! 任务处理器：按任务种类分派
//!
//! 处理器在每个安全检查点检查取消 token，被打断时尽快返回；
//! 内部错误以 `Err` 返回，由执行器统一降级为 Failed。

pub mod building;
pub mod combat;
pub mod mining;
pub mod survival;

use tokio_util::sync::CancellationToken;

use crate::agent::Agent;
use crate::core::{AgentError, Priority, Task, TaskKind, TaskOutcome};
use crate::crafting::{CraftError, Crafter};
use crate::navigation::{NavError, Navigator};
use crate::world::{Actions, EquipSlot, GameClient, Vec3};

/// 处理器调用上下文
pub struct TaskContext<'a> {
    pub agent: &'a Agent,
    pub token: CancellationToken,
    pub priority: Priority,
}

impl<'a> TaskContext<'a> {
    pub fn new(agent: &'a Agent, token: CancellationToken, priority: Priority) -> Self {
        Self {
            agent,
            token,
            priority,
        }
    }

    pub fn client(&self) -> &dyn GameClient {
        self.agent.client.as_ref()
    }

    pub fn nav(&self) -> Navigator<'_> {
        self.agent.navigator(&self.token)
    }

    pub fn crafter(&self) -> Crafter<'_> {
        self.agent.crafter(&self.token)
    }

    pub fn is_interrupted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 安全检查点：已被打断则返回 Interrupted
    pub fn checkpoint(&self) -> Result<(), AgentError> {
        if self.is_interrupted() {
            Err(AgentError::Interrupted)
        } else {
            Ok(())
        }
    }

    /// 带取消的等待
    pub async fn pause(&self, duration: std::time::Duration) -> Result<(), AgentError> {
        tokio::select! {
            _ = self.token.cancelled() => Err(AgentError::Interrupted),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

/// 调用任务对应的处理器
pub async fn dispatch(ctx: &TaskContext<'_>, task: &Task) -> Result<TaskOutcome, AgentError> {
    match &task.kind {
        TaskKind::Combat { target } => combat::fight(ctx, target).await,
        TaskKind::Flee { threat } => combat::flee(ctx, threat).await,
        TaskKind::Eat { item } => survival::eat(ctx, item).await,
        TaskKind::Hunt => survival::hunt(ctx).await,
        TaskKind::Sleep => survival::sleep(ctx).await,
        TaskKind::EmergencyHide => survival::emergency_hide(ctx).await,
        TaskKind::Mine { block } => mining::mine(ctx, block).await,
        TaskKind::Gather { item, count, .. } => mining::gather(ctx, item, *count).await,
        TaskKind::BuildShelter => building::build_shelter(ctx).await,
        TaskKind::Craft { item, quantity, .. } => craft(ctx, item, *quantity).await,
        TaskKind::Go { position, range } => go(ctx, *position, *range).await,
        TaskKind::Explore => explore(ctx).await,
    }
}

async fn go(ctx: &TaskContext<'_>, position: Vec3, range: f64) -> Result<TaskOutcome, AgentError> {
    let timeout = ctx.agent.config.navigation.default_timeout();
    ctx.nav().go_to_safe(position, range, timeout).await?;
    tracing::info!(%position, "arrived");
    Ok(TaskOutcome::Done)
}

async fn explore(ctx: &TaskContext<'_>) -> Result<TaskOutcome, AgentError> {
    match ctx.nav().explore().await {
        Ok(_) => Ok(TaskOutcome::Done),
        Err(NavError::NoSafeDestination) => {
            Err(AgentError::TaskFailed("no safe place to explore".to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// 合成：解析名称变体后递归满足，成功后自动放置工作方块或装备工具；失败时在聊天中说明
async fn craft(ctx: &TaskContext<'_>, raw_item: &str, quantity: u32) -> Result<TaskOutcome, AgentError> {
    let crafter = ctx.crafter();
    let Some(item) = crafter.resolve_name(raw_item) else {
        let err = CraftError::UnknownItem(raw_item.to_string());
        ctx.agent.chat(&format!("Cannot craft {raw_item}: {err}"));
        return Err(err.into());
    };

    if let Err(e) = crafter.ensure_item(&item, quantity).await {
        if !matches!(e, CraftError::Interrupted) {
            ctx.agent.chat(&format!("Cannot craft {item}: {e}"));
        }
        return Err(e.into());
    }
    tracing::info!(item = %item, quantity, "craft complete");
    post_craft(ctx, &item).await;
    Ok(TaskOutcome::Done)
}

const PLACEABLE_STATIONS: [&str; 3] = ["crafting_table", "furnace", "chest"];
const TOOL_SUFFIXES: [&str; 4] = ["_pickaxe", "_sword", "_axe", "_shovel"];

async fn post_craft(ctx: &TaskContext<'_>, item: &str) {
    if PLACEABLE_STATIONS.contains(&item) {
        match ctx.crafter().place_near(item).await {
            Ok(block) => {
                ctx.agent
                    .memory
                    .write()
                    .await
                    .save_location(item, block.position, "station");
            }
            Err(e) => tracing::warn!(item, error = %e, "auto-place after craft failed"),
        }
    } else if TOOL_SUFFIXES.iter().any(|s| item.ends_with(s)) {
        if let Err(e) = ctx.client().equip(item, EquipSlot::Hand).await {
            tracing::warn!(item, error = %e, "auto-equip after craft failed");
        }
    }
}

//! 聊天命令：解析 `!` 开头的文本并注入任务
//!
//! 会产生动作的命令（`!goto`、`!home`、`!craft`）以 UserCommand 优先级入队；
//! 查询类命令直接通过聊天回复。未知命令静默忽略。

use thiserror::Error;

use crate::agent::Agent;
use crate::core::{AddOutcome, Priority, Task, TaskKind};
use crate::world::{Actions, ItemStack, Vec3, WorldView};

const GOTO_RANGE: f64 = 1.0;
const HOME_RANGE: f64 = 2.0;

/// 常用的简称
const ITEM_ALIASES: [(&str, &str); 6] = [
    ("planks", "oak_planks"),
    ("table", "crafting_table"),
    ("workbench", "crafting_table"),
    ("sticks", "stick"),
    ("pickaxe", "wooden_pickaxe"),
    ("sword", "wooden_sword"),
];

/// 单条 !craft 命令允许的最大数量（满背包）
pub const MAX_CRAFT_QUANTITY: u32 = 36 * 64;

const HELP: &str = "Commands: !inv, !pos, !health, !status, !memory, !home, !stop, \
                    !goto <x> <y> <z>, !craft <item> [qty], !roleplay, !start, !help";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("unknown command: {0}")]
    Unknown(String),

    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("Quantity must be at most {0}")]
    QuantityTooLarge(u32),
}

/// 解析后的聊天命令
#[derive(Debug, Clone, PartialEq)]
pub enum ChatCommand {
    Inventory,
    Position,
    Health,
    Status,
    Memory,
    Home,
    Stop,
    Goto(Vec3),
    Craft { item: String, quantity: u32 },
    Roleplay,
    Start,
    Help,
}

/// 解析一行聊天；不是命令返回 Ok(None)
pub fn parse(message: &str) -> Result<Option<ChatCommand>, ChatError> {
    let mut args = message.split_whitespace();
    let Some(head) = args.next() else {
        return Ok(None);
    };
    let Some(name) = head.strip_prefix('!') else {
        return Ok(None);
    };
    let rest: Vec<&str> = args.collect();

    let command = match name.to_lowercase().as_str() {
        "inv" | "inventory" => ChatCommand::Inventory,
        "pos" | "position" => ChatCommand::Position,
        "health" | "hp" => ChatCommand::Health,
        "status" => ChatCommand::Status,
        "memory" => ChatCommand::Memory,
        "home" => ChatCommand::Home,
        "stop" => ChatCommand::Stop,
        "goto" => parse_goto(&rest)?,
        "craft" => parse_craft(&rest)?,
        "roleplay" | "rp" => ChatCommand::Roleplay,
        "start" => ChatCommand::Start,
        "help" => ChatCommand::Help,
        other => return Err(ChatError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

fn parse_goto(args: &[&str]) -> Result<ChatCommand, ChatError> {
    const USAGE: &str = "!goto <x> <y> <z>";
    let coords: Vec<f64> = args
        .iter()
        .take(3)
        .map(|a| a.parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|_| ChatError::Usage(USAGE))?;
    match coords[..] {
        [x, y, z] if x.is_finite() && y.is_finite() && z.is_finite() => {
            Ok(ChatCommand::Goto(Vec3::new(x, y, z)))
        }
        _ => Err(ChatError::Usage(USAGE)),
    }
}

/// 最后一个参数是数字且前面还有词时视为数量；其余词用 `_` 连接为物品名
fn parse_craft(args: &[&str]) -> Result<ChatCommand, ChatError> {
    const USAGE: &str = "!craft <item> [qty]";
    let (words, quantity) = match args.split_last() {
        None => return Err(ChatError::Usage(USAGE)),
        Some((last, init)) if !init.is_empty() => match last.parse::<u32>() {
            Ok(qty) => (init, qty),
            Err(_) => (args, 1),
        },
        Some(_) => (args, 1),
    };
    if quantity > MAX_CRAFT_QUANTITY {
        return Err(ChatError::QuantityTooLarge(MAX_CRAFT_QUANTITY));
    }
    let joined = words.join("_").to_lowercase();
    let item = ITEM_ALIASES
        .iter()
        .find(|(alias, _)| *alias == joined)
        .map(|(_, name)| name.to_string())
        .unwrap_or(joined);
    Ok(ChatCommand::Craft {
        item,
        quantity: quantity.max(1),
    })
}

fn inventory_summary(items: &[ItemStack]) -> String {
    let parts: Vec<String> = items
        .iter()
        .filter(|i| i.count > 0)
        .map(|i| format!("{}x{}", i.name, i.count))
        .collect();
    if parts.is_empty() {
        "empty".to_string()
    } else {
        parts.join(", ")
    }
}

/// 处理一条来自 sender 的聊天；忽略自己发出的消息
pub async fn handle_chat(agent: &Agent, sender: &str, message: &str) {
    if sender == agent.config.connection.username {
        return;
    }
    tracing::info!(sender, message, "chat in");
    match parse(message) {
        Ok(Some(command)) => execute(agent, command).await,
        Ok(None) => {}
        Err(ChatError::Unknown(name)) => tracing::debug!(command = %name, "unknown chat command"),
        Err(e) => agent.chat(&e.to_string()),
    }
}

/// 执行命令并回复
pub async fn execute(agent: &Agent, command: ChatCommand) {
    let client = &agent.client;
    match command {
        ChatCommand::Inventory => {
            agent.chat(&format!("Inventory: {}", inventory_summary(&client.inventory())));
        }
        ChatCommand::Position => {
            let p = client.position();
            agent.chat(&format!("Position: X={:.1}, Y={:.1}, Z={:.1}", p.x, p.y, p.z));
        }
        ChatCommand::Health => {
            agent.chat(&format!(
                "Health: {:.1}/20, Food: {:.0}/20",
                client.health(),
                client.food()
            ));
        }
        ChatCommand::Status => {
            let status = agent.publish_status().await;
            agent.chat(&status.summary());
        }
        ChatCommand::Memory => {
            let reply = {
                let memory = agent.memory.read().await;
                let data = memory.data();
                let stats = memory.stats();
                format!(
                    "Memory: {} places, {} resources, {} danger zones, shelter: {}, mined {}, crafted {}, killed {}",
                    data.known_locations.len(),
                    memory.resource_count(),
                    memory.danger_count(),
                    if memory.has_shelter() { "yes" } else { "no" },
                    stats.blocks_mined,
                    stats.items_crafted,
                    stats.mobs_killed,
                )
            };
            agent.chat(&reply);
        }
        ChatCommand::Home => {
            let home = agent.memory.read().await.home();
            match home {
                Some(position) => {
                    agent.chat("Going home");
                    submit(agent, TaskKind::Go { position, range: HOME_RANGE }).await;
                }
                None => agent.chat("No home saved"),
            }
        }
        ChatCommand::Stop => {
            agent.queue.lock().await.clear();
            client.stop_moving().await;
            tracing::info!("stopped by chat command");
            agent.chat("Stopped");
        }
        ChatCommand::Goto(position) => {
            agent.chat(&format!("Going to {position}"));
            submit(agent, TaskKind::Go { position, range: GOTO_RANGE }).await;
        }
        ChatCommand::Craft { item, quantity } => {
            agent.chat(&format!("Crafting {item} x{quantity}"));
            submit(
                agent,
                TaskKind::Craft {
                    item,
                    quantity,
                    goal_id: None,
                },
            )
            .await;
        }
        ChatCommand::Roleplay => {
            if agent.toggle_roleplay() {
                tracing::info!("progression mode enabled");
                agent.chat("Roleplay mode ON, starting to progress");
            } else {
                tracing::info!("progression mode disabled");
                agent.chat("Roleplay mode OFF");
            }
        }
        ChatCommand::Start => {
            agent.set_active(true);
            agent.publish_status().await;
            agent.chat("Autonomous mode started");
        }
        ChatCommand::Help => agent.chat(HELP),
    }
}

async fn submit(agent: &Agent, kind: TaskKind) {
    let task = Task::new(kind, Priority::UserCommand);
    if agent.enqueue(task.clone()).await == AddOutcome::Duplicate {
        tracing::debug!(task = %task, "command already queued");
    }
}

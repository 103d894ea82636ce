//! Voxel Agent 演示入口
//!
//! 在进程内模拟世界上运行完整的 Agent：标准输入的每一行作为聊天消息（如 `!status`、`!goto 5 64 5`），
//! 输入 `quit` 或 Ctrl+C 退出；退出前保存记忆与目标快照。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use voxel_agent::core::{
    start_agent, Command, HaltCleanup, ShutdownCoordinator, ShutdownManager, SnapshotCleanup,
};
use voxel_agent::memory::create_store;
use voxel_agent::world::SimWorld;
use voxel_agent::{load_config, observability, Agent, AppConfig};

fn main() -> anyhow::Result<()> {
    observability::init();

    // 所有循环都跑在同一个线程上，交错只发生在 await 点
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build runtime")?;
    runtime.block_on(run())
}

async fn run() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    observability::log_startup(&cfg);

    let world = Arc::new(SimWorld::demo());
    let store = create_store(&cfg.memory).context("Failed to open snapshot store")?;
    let agent = Arc::new(Agent::new(cfg, world.clone()).context("Failed to create agent")?);

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();
    let handle = start_agent(agent.clone(), store.clone(), world, shutdown.clone()).await;

    let commands = handle.commands.clone();
    let sender = "Player".to_string();
    let console = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            let command = if line == "quit" {
                Command::Quit
            } else {
                Command::Chat {
                    sender: sender.clone(),
                    message: line,
                }
            };
            if commands.send(command).is_err() {
                break;
            }
        }
    });

    shutdown.wait_for_shutdown().await;
    console.abort();
    handle.join().await;

    let mut coordinator = ShutdownCoordinator::new();
    coordinator.register(HaltCleanup::new(agent.clone()));
    coordinator.register(SnapshotCleanup::new(agent, store));
    coordinator.run_cleanup().await;
    Ok(())
}

//! 可观测性：tracing 订阅器初始化
//!
//! 默认级别 info，可通过 RUST_LOG 覆盖（如 `RUST_LOG=voxel_agent=debug`）。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::AppConfig;

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // 重复初始化（如测试中）时忽略
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}

/// 启动时打印关键配置
pub fn log_startup(cfg: &AppConfig) {
    tracing::info!(
        host = %cfg.connection.host,
        port = cfg.connection.port,
        username = %cfg.connection.username,
        think_ms = cfg.timing.think_interval_ms,
        roleplay = cfg.agent.roleplay,
        auto_start = cfg.agent.auto_start,
        backend = %cfg.memory.backend,
        "agent configuration"
    );
}

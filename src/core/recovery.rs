//! 错误恢复引擎
//!
//! 根据 ConnectionFault 返回 RecoveryAction：重连（指数退避）、重置状态或终止。

use std::time::Duration;

use crate::config::ConnectionSection;
use crate::core::{ConnectionFault, RecoveryAction};

/// 退避上限
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// 连接故障恢复策略
#[derive(Debug, Clone)]
pub struct RecoveryEngine {
    auto_reconnect: bool,
    base_delay: Duration,
    max_attempts: u32,
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::from_config(&ConnectionSection::default())
    }
}

impl RecoveryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(cfg: &ConnectionSection) -> Self {
        Self {
            auto_reconnect: cfg.auto_reconnect,
            base_delay: Duration::from_millis(cfg.reconnect_delay_ms),
            max_attempts: cfg.max_reconnect_attempts,
        }
    }

    /// attempt 为已进行的重连次数（从 0 开始）
    pub fn handle(&self, fault: &ConnectionFault, attempt: u32) -> RecoveryAction {
        match fault {
            ConnectionFault::AuthFailed(_) => RecoveryAction::Abort,
            ConnectionFault::Desync => RecoveryAction::ResetState,
            _ if !self.auto_reconnect || attempt >= self.max_attempts => RecoveryAction::Abort,
            _ => RecoveryAction::Reconnect {
                delay: self.backoff(attempt),
            },
        }
    }

    /// base * 2^attempt，上限 60 秒
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base_delay.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

//! Agent 错误类型与恢复动作
//!
//! 处理器内部错误在执行器边界统一降级为 TaskOutcome::Failed；打断单独区分。
//! 连接层故障交给 RecoveryEngine 决定重连 / 重置 / 终止。

use std::time::Duration;

use thiserror::Error;

use crate::crafting::CraftError;
use crate::memory::StoreError;
use crate::navigation::NavError;
use crate::world::ActionError;

/// Agent 运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Action failed: {0}")]
    Action(#[from] ActionError),

    #[error("Navigation failed: {0}")]
    Navigation(#[from] NavError),

    #[error("Crafting failed: {0}")]
    Craft(#[from] CraftError),

    #[error("Persistence failed: {0}")]
    Store(#[from] StoreError),

    #[error("Task failed: {0}")]
    TaskFailed(String),

    #[error("Interrupted")]
    Interrupted,

    #[error("Connection fault: {0}")]
    Connection(ConnectionFault),

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl AgentError {
    /// 是否为打断（而非失败）
    pub fn is_interruption(&self) -> bool {
        matches!(
            self,
            AgentError::Interrupted
                | AgentError::Navigation(NavError::Interrupted)
                | AgentError::Craft(CraftError::Interrupted)
        )
    }
}

/// 连接层故障
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionFault {
    #[error("disconnected: {0}")]
    Disconnected(String),

    #[error("kicked: {0}")]
    Kicked(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("connection timed out")]
    TimedOut,

    /// 服务器强制修正位置等导致本地状态失效，无需重连
    #[error("world state desynchronized")]
    Desync,
}

/// 恢复引擎根据故障类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 等待 delay 后重连；重连后清空队列与运行期记忆
    Reconnect { delay: Duration },
    /// 不断线，仅清空队列与运行期记忆
    ResetState,
    /// 放弃（认证失败或超出重连次数）
    Abort,
}

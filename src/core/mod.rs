//! 核心编排层：任务与优先级队列、执行器、错误与恢复、状态投影、关闭、主控循环

pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod recovery;
pub mod shutdown;
pub mod state;
pub mod task;
pub mod task_queue;

pub use error::{AgentError, ConnectionFault, RecoveryAction};
pub use executor::{TaskExecutor, Tick};
pub use orchestrator::{load_snapshot, save_snapshot, start_agent, AgentHandle, Command, Reconnect};
pub use recovery::RecoveryEngine;
pub use shutdown::{
    HaltCleanup, ShutdownCleanup, ShutdownCoordinator, ShutdownManager, ShutdownReason,
    SnapshotCleanup,
};
pub use state::{AgentPhase, StatusSnapshot};
pub use task::{Priority, Task, TaskKind, TaskOutcome};
pub use task_queue::{ActiveTask, AddOutcome, TaskQueue};

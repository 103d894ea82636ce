//! 优雅关闭
//!
//! 统一监听关闭信号（Ctrl+C、SIGTERM、`!quit`、致命错误），取消所有循环后执行清理：
//! 保存最后一次记忆与目标快照、停止移动。

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::agent::Agent;
use crate::memory::SnapshotStore;
use crate::world::Actions;

/// 关闭信号管理器
#[derive(Clone)]
pub struct ShutdownManager {
    shutdown_token: CancellationToken,
    reason_tx: broadcast::Sender<ShutdownReason>,
}

/// 关闭原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C 或 quit 命令
    UserInitiated,
    /// SIGTERM 信号
    Signal,
    /// 致命错误（如重连次数耗尽）
    FatalError(String),
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (reason_tx, _) = broadcast::channel(1);
        Self {
            shutdown_token: CancellationToken::new(),
            reason_tx,
        }
    }

    /// 获取关闭 token（各循环据此退出）
    pub fn token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// 触发关闭
    pub fn shutdown(&self, reason: ShutdownReason) {
        tracing::info!(?reason, "shutdown requested");
        let _ = self.reason_tx.send(reason);
        self.shutdown_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.reason_tx.subscribe()
    }

    pub async fn wait_for_shutdown(&self) {
        self.shutdown_token.cancelled().await;
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    tracing::info!("Received SIGTERM, initiating graceful shutdown...");
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 关闭时需要执行的清理任务
#[async_trait::async_trait]
pub trait ShutdownCleanup: Send + Sync {
    async fn cleanup(&self) -> anyhow::Result<()>;

    /// 清理任务名称（用于日志）
    fn name(&self) -> &'static str;
}

/// 关闭协调器：按注册顺序执行清理，每项有超时
pub struct ShutdownCoordinator {
    cleanup_tasks: Vec<Arc<dyn ShutdownCleanup>>,
    timeout_secs: u64,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            cleanup_tasks: Vec::new(),
            timeout_secs: 5,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn register<T: ShutdownCleanup + 'static>(&mut self, task: T) {
        self.cleanup_tasks.push(Arc::new(task));
    }

    pub async fn run_cleanup(&self) {
        tracing::info!("Running {} cleanup tasks...", self.cleanup_tasks.len());
        let timeout = tokio::time::Duration::from_secs(self.timeout_secs);

        for task in &self.cleanup_tasks {
            let name = task.name();
            match tokio::time::timeout(timeout, task.cleanup()).await {
                Ok(Ok(())) => tracing::info!("Cleanup task '{}' completed successfully", name),
                Ok(Err(e)) => tracing::warn!("Cleanup task '{}' failed: {}", name, e),
                Err(_) => tracing::warn!(
                    "Cleanup task '{}' timed out after {}s",
                    name,
                    self.timeout_secs
                ),
            }
        }
        tracing::info!("All cleanup tasks finished");
    }
}

/// 退出前保存最后一次快照
pub struct SnapshotCleanup {
    agent: Arc<Agent>,
    store: Arc<dyn SnapshotStore>,
}

impl SnapshotCleanup {
    pub fn new(agent: Arc<Agent>, store: Arc<dyn SnapshotStore>) -> Self {
        Self { agent, store }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for SnapshotCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        let snapshot = self.agent.snapshot().await;
        let session_id = &self.agent.config.memory.session_id;
        self.store.save(session_id, &snapshot).await?;
        self.agent.memory.write().await.mark_saved();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Snapshot"
    }
}

/// 清空队列并停止移动
pub struct HaltCleanup {
    agent: Arc<Agent>,
}

impl HaltCleanup {
    pub fn new(agent: Arc<Agent>) -> Self {
        Self { agent }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for HaltCleanup {
    async fn cleanup(&self) -> anyhow::Result<()> {
        self.agent.queue.lock().await.clear();
        self.agent.client.stop_moving().await;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Halt"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::core::{Priority, Task, TaskKind};
    use crate::memory::JsonFileStore;
    use crate::world::{SimWorld, Vec3};

    #[test]
    fn test_shutdown_manager_token() {
        let manager = ShutdownManager::new();
        let token = manager.token();
        assert!(!manager.is_shutdown());
        manager.shutdown(ShutdownReason::UserInitiated);
        assert!(token.is_cancelled());
        assert!(manager.is_shutdown());
    }

    #[tokio::test]
    async fn test_reason_is_broadcast() {
        let manager = ShutdownManager::new();
        let mut rx = manager.subscribe();
        manager.shutdown(ShutdownReason::FatalError("reconnect attempts exhausted".into()));
        assert_eq!(
            rx.recv().await.unwrap(),
            ShutdownReason::FatalError("reconnect attempts exhausted".into())
        );
    }

    #[tokio::test]
    async fn test_coordinator_saves_snapshot_and_halts() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn SnapshotStore> = Arc::new(JsonFileStore::new(dir.path()));
        let agent = Arc::new(Agent::new(AppConfig::default(), Arc::new(SimWorld::new())).unwrap());
        agent.memory.write().await.set_home(Vec3::new(4.0, 64.0, 4.0));
        agent.enqueue(Task::new(TaskKind::Explore, Priority::Explore)).await;

        let mut coordinator = ShutdownCoordinator::new().with_timeout(2);
        coordinator.register(HaltCleanup::new(agent.clone()));
        coordinator.register(SnapshotCleanup::new(agent.clone(), store.clone()));
        coordinator.run_cleanup().await;

        assert!(!agent.queue.lock().await.has_tasks());
        assert!(!agent.memory.read().await.is_dirty());
        let saved = store.load("default").await.unwrap().unwrap();
        assert_eq!(saved.memory.home, Some(Vec3::new(4.0, 64.0, 4.0)));
    }
}

//! Agent 编排器：主控循环
//!
//! 加载快照后在同一运行时上启动若干独立计时的循环：
//! 思考（反射层）、执行器、决策（慎思层 / 进阶模式）、记忆维护、自动保存，
//! 以及一个消费外部命令（聊天、连接故障、死亡、退出）的命令循环。
//! 所有循环共享关闭 token；状态通过 watch 通道对外发布。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::agent::Agent;
use crate::chat;
use crate::core::{
    AgentPhase, ConnectionFault, RecoveryAction, RecoveryEngine, ShutdownManager, ShutdownReason,
    StatusSnapshot, TaskExecutor,
};
use crate::decision::{DecisionEngine, Progression};
use crate::memory::SnapshotStore;
use crate::think::ThinkLoop;
use crate::world::WorldView;

/// 已结束目标保留的数量
const KEEP_FINISHED_GOALS: usize = 20;

/// 连接边界：断线后重新建立会话
#[async_trait]
pub trait Reconnect: Send + Sync {
    async fn reconnect(&self) -> Result<(), ConnectionFault>;
}

/// 从外部（聊天、连接层、控制台）发往编排器的命令
#[derive(Debug, Clone)]
pub enum Command {
    /// 收到聊天消息
    Chat { sender: String, message: String },
    /// 连接层故障，交给 RecoveryEngine 决定如何恢复
    Fault(ConnectionFault),
    /// 死亡：死亡地点记为危险格
    Died,
    /// 立即保存快照
    Save,
    /// 退出
    Quit,
}

/// 运行中的 Agent 句柄
pub struct AgentHandle {
    pub commands: mpsc::UnboundedSender<Command>,
    pub status: watch::Receiver<StatusSnapshot>,
    pub shutdown: Arc<ShutdownManager>,
    loops: Vec<JoinHandle<()>>,
}

impl AgentHandle {
    pub fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::warn!("command loop already stopped");
        }
    }

    /// 等待所有循环退出
    pub async fn join(self) {
        for result in join_all(self.loops).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "agent loop panicked");
            }
        }
    }
}

/// 以固定周期运行 f，直到 token 被取消
fn every<F, Fut>(name: &'static str, period: Duration, token: CancellationToken, mut f: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => f().await,
            }
        }
        tracing::debug!(name, "loop stopped");
    })
}

/// 加载快照（失败只记日志）
pub async fn load_snapshot(agent: &Agent, store: &dyn SnapshotStore) {
    let session_id = &agent.config.memory.session_id;
    match store.load(session_id).await {
        Ok(Some(snapshot)) => agent.restore(snapshot).await,
        Ok(None) => tracing::info!(session_id, "no saved state, starting fresh"),
        Err(e) => tracing::warn!(session_id, error = %e, "failed to load saved state"),
    }
}

/// 保存当前快照
pub async fn save_snapshot(agent: &Agent, store: &dyn SnapshotStore) {
    let snapshot = agent.snapshot().await;
    let session_id = &agent.config.memory.session_id;
    match store.save(session_id, &snapshot).await {
        Ok(()) => {
            agent.memory.write().await.mark_saved();
            tracing::debug!(session_id, "state saved");
        }
        Err(e) => tracing::warn!(session_id, error = %e, "failed to save state"),
    }
}

/// 慎思层一次：进阶模式下只保留紧急生存分支，其余交给发展阶梯
async fn deliberate(agent: &Agent) {
    if !agent.is_active() || agent.is_reconnecting() {
        return;
    }
    let engine = DecisionEngine::new(agent);
    if !agent.roleplay() {
        engine.tick().await;
        return;
    }
    match engine.emergency() {
        Some(task) => {
            agent.enqueue(task).await;
        }
        None => {
            Progression::new(agent).tick().await;
        }
    }
}

/// 记忆维护：清理过期条目与已结束目标
async fn maintain(agent: &Agent) {
    let removed = agent.memory.write().await.cleanup();
    let pruned = agent.goals.write().await.prune_finished(KEEP_FINISHED_GOALS);
    if removed + pruned > 0 {
        tracing::debug!(removed, pruned, "memory maintenance");
    }
}

/// 启动所有循环；返回句柄
pub async fn start_agent(
    agent: Arc<Agent>,
    store: Arc<dyn SnapshotStore>,
    connection: Arc<dyn Reconnect>,
    shutdown: Arc<ShutdownManager>,
) -> AgentHandle {
    load_snapshot(&agent, store.as_ref()).await;
    let timing = agent.config.timing.clone();
    let token = shutdown.token();
    let mut loops = Vec::new();

    let think_period = timing.think_interval();
    let mut think = ThinkLoop::new(Arc::clone(&agent));
    let think_agent = Arc::clone(&agent);
    let think_token = token.clone();
    loops.push(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(think_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = think_token.cancelled() => break,
                _ = ticker.tick() => {
                    if !think_agent.is_reconnecting() {
                        think.tick().await;
                    }
                }
            }
        }
        tracing::debug!(name = "think", "loop stopped");
    }));

    let executor = TaskExecutor::new(Arc::clone(&agent));
    let exec_agent = Arc::clone(&agent);
    loops.push(every("executor", timing.task_interval(), token.clone(), move || {
        let executor = executor.clone();
        let agent = Arc::clone(&exec_agent);
        async move {
            if !agent.is_reconnecting() {
                executor.tick().await;
            }
            agent.publish_status().await;
        }
    }));

    let decide_agent = Arc::clone(&agent);
    loops.push(every("decision", timing.decision_interval(), token.clone(), move || {
        let agent = Arc::clone(&decide_agent);
        async move { deliberate(&agent).await }
    }));

    let maintain_agent = Arc::clone(&agent);
    loops.push(every("memory", timing.memory_update_interval(), token.clone(), move || {
        let agent = Arc::clone(&maintain_agent);
        async move { maintain(&agent).await }
    }));

    let save_agent = Arc::clone(&agent);
    let save_store = Arc::clone(&store);
    let mut first_save = true;
    loops.push(every("autosave", timing.save_interval(), token.clone(), move || {
        let agent = Arc::clone(&save_agent);
        let store = Arc::clone(&save_store);
        // interval 的第一次 tick 立即触发，跳过
        let skip = std::mem::take(&mut first_save);
        async move {
            if !skip {
                save_snapshot(&agent, store.as_ref()).await;
            }
        }
    }));

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
    let status = agent.subscribe_status();
    loops.push(tokio::spawn(command_loop(
        agent,
        store,
        connection,
        Arc::clone(&shutdown),
        cmd_rx,
    )));

    tracing::info!(loops = loops.len(), "agent started");
    AgentHandle {
        commands: cmd_tx,
        status,
        shutdown,
        loops,
    }
}

async fn command_loop(
    agent: Arc<Agent>,
    store: Arc<dyn SnapshotStore>,
    connection: Arc<dyn Reconnect>,
    shutdown: Arc<ShutdownManager>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
) {
    let recovery = RecoveryEngine::from_config(&agent.config.connection);
    let token = shutdown.token();
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                match cmd {
                    Command::Chat { sender, message } => {
                        chat::handle_chat(&agent, &sender, &message).await;
                    }
                    Command::Fault(fault) => {
                        recover(&agent, &recovery, connection.as_ref(), &shutdown, fault).await;
                    }
                    Command::Died => {
                        let pos = agent.client.position();
                        agent.memory.write().await.mark_dangerous(pos);
                        agent.queue.lock().await.clear();
                        tracing::warn!(at = %pos, "agent died, death spot marked dangerous");
                    }
                    Command::Save => save_snapshot(&agent, store.as_ref()).await,
                    Command::Quit => {
                        shutdown.shutdown(ShutdownReason::UserInitiated);
                        break;
                    }
                }
            }
        }
    }
    tracing::debug!(name = "command", "loop stopped");
}

/// 按恢复策略处理连接故障；重连失败时继续退避，直到成功、放弃或关闭
async fn recover(
    agent: &Agent,
    recovery: &RecoveryEngine,
    connection: &dyn Reconnect,
    shutdown: &ShutdownManager,
    fault: ConnectionFault,
) {
    let mut fault = fault;
    let mut attempt = 0;
    loop {
        tracing::warn!(%fault, attempt, "connection fault");
        match recovery.handle(&fault, attempt) {
            RecoveryAction::ResetState => {
                agent.reset_transient().await;
                return;
            }
            RecoveryAction::Abort => {
                agent.set_reconnecting(false);
                agent.publish_phase(AgentPhase::Stopped);
                shutdown.shutdown(ShutdownReason::FatalError(fault.to_string()));
                return;
            }
            RecoveryAction::Reconnect { delay } => {
                agent.set_reconnecting(true);
                agent.queue.lock().await.clear();
                agent.publish_phase(AgentPhase::Reconnecting);
                tracing::info!(delay_ms = delay.as_millis() as u64, "reconnecting");
                tokio::select! {
                    _ = shutdown.wait_for_shutdown() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                match connection.reconnect().await {
                    Ok(()) => {
                        agent.reset_transient().await;
                        agent.set_reconnecting(false);
                        agent.publish_status().await;
                        tracing::info!(attempt, "reconnected");
                        return;
                    }
                    Err(next) => {
                        fault = next;
                        attempt += 1;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::config::AppConfig;
    use crate::core::{Priority, Task, TaskKind};
    use crate::memory::{JsonFileStore, NoopStore};
    use crate::world::{SimWorld, Vec3};

    fn fast_config() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.timing.think_interval_ms = 10;
        cfg.timing.task_interval_ms = 10;
        cfg.timing.decision_interval_ms = 20;
        cfg.timing.memory_update_ms = 50;
        cfg.agent.idle_explore_chance = 0.0;
        cfg.connection.reconnect_delay_ms = 5;
        cfg
    }

    async fn start(world: Arc<SimWorld>, cfg: AppConfig, store: Arc<dyn SnapshotStore>) -> (Arc<Agent>, AgentHandle) {
        let agent = Arc::new(Agent::new(cfg, world.clone()).unwrap());
        let handle = start_agent(agent.clone(), store, world, Arc::new(ShutdownManager::new())).await;
        (agent, handle)
    }

    async fn wait_until(mut pred: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if pred() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_chat_goto_runs_to_completion_and_quit_stops_loops() {
        let world = Arc::new(SimWorld::new());
        let mut cfg = fast_config();
        cfg.agent.auto_start = false;
        let (_, handle) = start(world.clone(), cfg, Arc::new(NoopStore)).await;
        handle.send(Command::Chat {
            sender: "Steve".into(),
            message: "!goto 6 64 2".into(),
        });
        assert!(wait_until(|| world.position() == Vec3::new(6.0, 64.0, 2.0)).await);

        handle.send(Command::Quit);
        let shutdown = handle.shutdown.clone();
        tokio::time::timeout(Duration::from_secs(2), handle.join())
            .await
            .unwrap();
        assert!(shutdown.is_shutdown());
    }

    #[tokio::test]
    async fn test_reflex_fights_nearby_hostile() {
        let world = Arc::new(SimWorld::new().with_item("wooden_sword", 1));
        let id = world.spawn_entity("zombie", Vec3::new(3.5, 64.0, 0.0));
        let (agent, handle) = start(world.clone(), fast_config(), Arc::new(NoopStore)).await;
        assert!(wait_until(|| world.entity(id).is_none()).await);
        assert!(wait_until(|| agent.memory.try_read().is_ok_and(|m| m.stats().mobs_killed == 1)).await);
        handle.shutdown.shutdown(ShutdownReason::UserInitiated);
        handle.join().await;
    }

    #[tokio::test]
    async fn test_disconnect_reconnects_and_resets_queue() {
        let world = Arc::new(SimWorld::new());
        let mut cfg = fast_config();
        cfg.agent.auto_start = false;
        let (agent, handle) = start(world.clone(), cfg, Arc::new(NoopStore)).await;
        agent.enqueue(Task::new(TaskKind::Hunt, Priority::Resource)).await;
        agent.memory.write().await.mark_dangerous(Vec3::new(9.0, 64.0, 9.0));

        handle.send(Command::Fault(ConnectionFault::Disconnected("socket closed".into())));
        assert!(wait_until(|| world.reconnect_count() == 1).await);
        assert!(wait_until(|| !agent.is_reconnecting()).await);
        assert!(!agent.queue.lock().await.has_tasks());
        assert!(agent.memory.read().await.is_dangerous(Vec3::new(9.0, 64.0, 9.0)));
        handle.shutdown.shutdown(ShutdownReason::UserInitiated);
        handle.join().await;
    }

    #[tokio::test]
    async fn test_auth_failure_shuts_down() {
        let world = Arc::new(SimWorld::new());
        let (_, handle) = start(world, fast_config(), Arc::new(NoopStore)).await;
        let mut reasons = handle.shutdown.subscribe();
        handle.send(Command::Fault(ConnectionFault::AuthFailed("invalid session".into())));
        let reason = tokio::time::timeout(Duration::from_secs(1), reasons.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(reason, ShutdownReason::FatalError(_)));
        handle.join().await;
    }

    struct FlakyConnection {
        failures_left: AtomicU32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Reconnect for FlakyConnection {
        async fn reconnect(&self) -> Result<(), ConnectionFault> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(ConnectionFault::TimedOut);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_recover_retries_with_backoff() {
        let mut cfg = fast_config();
        cfg.connection.reconnect_delay_ms = 1;
        let agent = Agent::new(cfg, Arc::new(SimWorld::new())).unwrap();
        let recovery = RecoveryEngine::from_config(&agent.config.connection);
        let connection = FlakyConnection {
            failures_left: AtomicU32::new(2),
            calls: AtomicU32::new(0),
        };
        let shutdown = ShutdownManager::new();
        recover(
            &agent,
            &recovery,
            &connection,
            &shutdown,
            ConnectionFault::Kicked("restart".into()),
        )
        .await;
        assert_eq!(connection.calls.load(Ordering::SeqCst), 3);
        assert!(!agent.is_reconnecting());
        assert!(!shutdown.is_shutdown());
    }

    #[tokio::test]
    async fn test_death_marks_spot_and_save_command_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn SnapshotStore> = Arc::new(JsonFileStore::new(dir.path()));
        let world = Arc::new(SimWorld::new().with_position(Vec3::new(12.3, 64.0, -4.2)));
        let mut cfg = fast_config();
        cfg.agent.auto_start = false;
        let (agent, handle) = start(world, cfg, store.clone()).await;

        handle.send(Command::Died);
        handle.send(Command::Save);
        assert!(wait_until(|| agent.memory.try_read().is_ok_and(|m| m.danger_count() == 1)).await);
        let mut saved = None;
        for _ in 0..100 {
            saved = store.load("default").await.unwrap();
            if saved.as_ref().is_some_and(|s| !s.memory.dangerous_areas.is_empty()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(saved.unwrap().memory.dangerous_areas.contains(&Vec3::new(12.3, 64.0, -4.2).cell()));
        handle.shutdown.shutdown(ShutdownReason::UserInitiated);
        handle.join().await;
    }
}

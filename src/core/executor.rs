//! 任务执行器
//!
//! 每个 tick 推进一步状态机：
//! 1. 可打断（CRITICAL 入队且当前任务低于 CRITICAL）时强制抢占当前任务，不再调用其处理器；
//! 2. 处理器仍在运行时直接返回，同一时刻只执行一个任务；
//! 3. 有当前任务时在后台启动其处理器，直到下一个让出点；
//! 4. 否则从队列取出下一个任务设为当前，队列空时按概率追加探索任务。
//!
//! 处理器放在独立的 tokio 任务里运行，tick 本身从不等待游戏动作，抢占因此可以在处理器挂起时发生。
//! 处理器错误在这里统一降级为 Failed，打断单独记为 Interrupted；每次执行输出结构化审计日志（JSON）。

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::agent::Agent;
use crate::core::{AddOutcome, AgentError, Priority, Task, TaskKind, TaskOutcome};
use crate::decision::GoalStatus;
use crate::handlers::{dispatch, TaskContext};
use crate::world::Actions;

/// 一次 tick 做了什么
#[derive(Debug)]
pub enum Tick {
    /// 当前任务被 CRITICAL 任务抢占
    Preempted(Option<Task>),
    /// 处理器仍在运行
    Busy,
    /// 当前任务的处理器已在后台启动；句柄在处理器让出后给出结果
    Running(JoinHandle<TaskOutcome>),
    /// 从队列取出新任务设为当前
    Started(Task),
    /// 队列为空；explore_queued 表示是否追加了空闲探索
    Idle { explore_queued: bool },
}

/// 执行器：持有 Agent 句柄，由编排器按 task_interval 周期调用 tick
#[derive(Clone)]
pub struct TaskExecutor {
    agent: Arc<Agent>,
}

impl TaskExecutor {
    pub fn new(agent: Arc<Agent>) -> Self {
        Self { agent }
    }

    pub async fn tick(&self) -> Tick {
        let mut q = self.agent.queue.lock().await;

        if q.can_interrupt() {
            let preempted = q.preempt();
            drop(q);
            if let Some(task) = &preempted {
                tracing::warn!(task = %task, "task preempted by critical task");
            }
            self.agent.client.stop_moving().await;
            return Tick::Preempted(preempted);
        }

        if q.is_executing() {
            return Tick::Busy;
        }

        if let Some(active) = q.current() {
            let (seq, task, token) = (active.seq, active.task.clone(), active.token.clone());
            q.set_executing(true);
            drop(q);
            tracing::info!(task = %task, priority = %task.priority, "executing task");
            let agent = Arc::clone(&self.agent);
            return Tick::Running(tokio::spawn(run_task(agent, seq, task, token)));
        }

        if let Some(task) = q.next() {
            q.begin(task.clone());
            tracing::info!(task = %task, priority = %task.priority, "task started");
            return Tick::Started(task);
        }
        drop(q);

        Tick::Idle {
            explore_queued: self.maybe_explore().await,
        }
    }

    /// 没有长期目标、未开启进阶模式时，按 idle_explore_chance 追加低优先级探索
    async fn maybe_explore(&self) -> bool {
        if !self.agent.is_active() || self.agent.roleplay() {
            return false;
        }
        if self.agent.goals.read().await.has_open_goals() {
            return false;
        }
        let chance = self.agent.config.agent.idle_explore_chance.clamp(0.0, 1.0);
        if !rand::thread_rng().gen_bool(chance) {
            return false;
        }
        let task = Task::new(TaskKind::Explore, Priority::Explore);
        self.agent.enqueue(task).await == AddOutcome::Queued
    }
}

/// 调用处理器直到让出点，并按结果更新队列与目标
async fn run_task(agent: Arc<Agent>, seq: u64, task: Task, token: CancellationToken) -> TaskOutcome {
    let start = Instant::now();
    let ctx = TaskContext::new(&agent, token.clone(), task.priority);
    // 处理器 panic 也必须走到 finish，否则执行标志永远不会清除
    let result = match AssertUnwindSafe(dispatch(&ctx, &task)).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(AgentError::TaskFailed(format!(
            "handler panicked: {}",
            panic_message(payload.as_ref())
        ))),
    };

    let (outcome, error) = match result {
        Ok(TaskOutcome::Continue) if token.is_cancelled() => (TaskOutcome::Interrupted, None),
        Ok(outcome) => (outcome, None),
        Err(e) if e.is_interruption() => (TaskOutcome::Interrupted, None),
        Err(e) => (TaskOutcome::Failed, Some(e.to_string())),
    };

    let audit = serde_json::json!({
        "event": "task_audit",
        "task": task.name(),
        "detail": task.to_string(),
        "priority": task.priority.value(),
        "outcome": outcome,
        "error": error,
        "duration_ms": start.elapsed().as_millis() as u64,
    });
    tracing::info!(audit = %audit.to_string(), "task");

    match outcome {
        TaskOutcome::Done => tracing::info!(task = %task, "task done"),
        TaskOutcome::Interrupted => tracing::warn!(task = %task, "task interrupted"),
        TaskOutcome::Failed => {
            let reason = error.as_deref().unwrap_or("unknown");
            tracing::warn!(task = %task, error = reason, "task failed");
            // 合成失败由处理器自己在聊天里说明
            if task.priority == Priority::UserCommand && !matches!(task.kind, TaskKind::Craft { .. }) {
                agent.chat(&format!("Could not {task}: {reason}"));
            }
        }
        TaskOutcome::Continue => tracing::debug!(task = %task, "task continues next tick"),
    }

    {
        let mut q = agent.queue.lock().await;
        if outcome == TaskOutcome::Continue {
            q.yield_current(seq);
        } else {
            q.finish(seq);
        }
    }

    if let Some(goal_id) = task.kind.goal_id() {
        settle_goal(&agent, goal_id, outcome).await;
    }
    outcome
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

/// 目标任务结束后的记账：完成即标记；失败计一次尝试并回退到探索
async fn settle_goal(agent: &Agent, goal_id: &str, outcome: TaskOutcome) {
    match outcome {
        TaskOutcome::Done => {
            agent.goals.write().await.mark_complete(goal_id);
        }
        TaskOutcome::Failed => {
            let status = agent.goals.write().await.record_failure(goal_id);
            if status == Some(GoalStatus::Failed) {
                agent.chat("Giving up on a goal after repeated failures");
            }
            agent.enqueue(Task::new(TaskKind::Explore, Priority::Explore)).await;
        }
        TaskOutcome::Interrupted | TaskOutcome::Continue => {}
    }
}

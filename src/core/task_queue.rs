//! 优先级任务队列
//!
//! 一个「当前」任务 + 按优先级降序排列的待执行集合（同优先级保持插入顺序）。
//! CRITICAL 任务入队时若当前任务低于 CRITICAL，则置 interrupt 标志并取消当前任务的 token，
//! 让正在等待的导航/挖掘立即返回。

use std::time::Instant;

use tokio_util::sync::CancellationToken;

use super::task::{Priority, Task};

/// 正在执行（或等待下一轮继续）的任务
#[derive(Debug)]
pub struct ActiveTask {
    /// 单调递增序号，finish 时用于确认仍是同一任务
    pub seq: u64,
    pub task: Task,
    pub token: CancellationToken,
    pub started_at: Instant,
}

/// add 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Queued,
    Duplicate,
}

#[derive(Debug, Default)]
pub struct TaskQueue {
    pending: Vec<Task>,
    current: Option<ActiveTask>,
    executing: bool,
    interrupt_flag: bool,
    next_seq: u64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 入队：与待执行集合及当前任务去重；重复则丢弃（只记日志）
    pub fn add(&mut self, task: Task) -> AddOutcome {
        // 先去重再判断打断：与当前任务重复的 CRITICAL 任务无需抢占
        if let Some(dup) = self.pending.iter().find(|t| task.is_duplicate_of(t)) {
            tracing::debug!(task = %task, existing = %dup, "duplicate task dropped");
            return AddOutcome::Duplicate;
        }
        if let Some(current) = &self.current {
            if task.same_as_current(&current.task) {
                tracing::debug!(task = %task, "task already current, dropped");
                return AddOutcome::Duplicate;
            }
        }

        if task.priority.is_critical() {
            if let Some(current) = &self.current {
                if !current.task.priority.is_critical() {
                    self.interrupt_flag = true;
                    current.token.cancel();
                    tracing::info!(
                        incoming = %task,
                        current = %current.task,
                        "critical task requests interrupt"
                    );
                }
            }
        }

        tracing::debug!(task = %task, priority = %task.priority, "task queued");
        self.pending.push(task);
        // sort_by 为稳定排序，同优先级保持插入顺序
        self.pending.sort_by(|a, b| b.priority.cmp(&a.priority));
        AddOutcome::Queued
    }

    /// 弹出最高优先级的待执行任务
    pub fn next(&mut self) -> Option<Task> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.pending.remove(0))
        }
    }

    /// 将任务设为当前任务；重置 interrupt 标志，返回该任务的取消 token
    pub fn begin(&mut self, task: Task) -> (u64, CancellationToken) {
        if let Some(old) = self.current.take() {
            old.token.cancel();
        }
        self.next_seq += 1;
        let token = CancellationToken::new();
        self.current = Some(ActiveTask {
            seq: self.next_seq,
            task,
            token: token.clone(),
            started_at: Instant::now(),
        });
        self.interrupt_flag = false;
        (self.next_seq, token)
    }

    /// 任务结束（done / failed / interrupted）：清除当前任务、执行标志与 interrupt 标志
    ///
    /// seq 不匹配（期间被 clear 或抢占）时什么都不做，执行标志已归新任务所有
    pub fn finish(&mut self, seq: u64) -> Option<ActiveTask> {
        if self.is_current(seq) {
            self.executing = false;
            self.interrupt_flag = false;
            self.current.take()
        } else {
            None
        }
    }

    /// 处理器返回 Continue：保留当前任务，下一轮再调用
    pub fn yield_current(&mut self, seq: u64) {
        if self.is_current(seq) {
            self.executing = false;
        }
    }

    pub fn is_current(&self, seq: u64) -> bool {
        self.current.as_ref().is_some_and(|c| c.seq == seq)
    }

    /// 抢占：强制清除当前任务与执行标志（不会再调用其处理器）
    pub fn preempt(&mut self) -> Option<Task> {
        self.executing = false;
        self.interrupt_flag = false;
        self.current.take().map(|active| {
            active.token.cancel();
            active.task
        })
    }

    /// 清空待执行集合与当前任务，重置所有标志
    pub fn clear(&mut self) {
        self.pending.clear();
        if let Some(active) = self.current.take() {
            active.token.cancel();
        }
        self.executing = false;
        self.interrupt_flag = false;
    }

    /// 待执行非空或存在当前任务
    pub fn has_tasks(&self) -> bool {
        !self.pending.is_empty() || self.current.is_some()
    }

    /// interrupt 标志已置、存在当前任务且其优先级低于 CRITICAL
    pub fn can_interrupt(&self) -> bool {
        self.interrupt_flag
            && self
                .current
                .as_ref()
                .is_some_and(|c| !c.task.priority.is_critical())
    }

    pub fn is_executing(&self) -> bool {
        self.executing
    }

    pub fn set_executing(&mut self, executing: bool) {
        self.executing = executing;
    }

    pub fn interrupt_requested(&self) -> bool {
        self.interrupt_flag
    }

    pub fn current(&self) -> Option<&ActiveTask> {
        self.current.as_ref()
    }

    pub fn current_task(&self) -> Option<&Task> {
        self.current.as_ref().map(|c| &c.task)
    }

    pub fn pending(&self) -> &[Task] {
        &self.pending
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// 待执行或当前任务中是否已有指定优先级以上的任务
    pub fn has_at_least(&self, priority: Priority) -> bool {
        self.pending.iter().any(|t| t.priority >= priority)
            || self.current_task().is_some_and(|t| t.priority >= priority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::TaskKind;
    use crate::world::{EntityRef, Vec3};

    fn go(x: f64, p: Priority) -> Task {
        Task::new(
            TaskKind::Go {
                position: Vec3::new(x, 64.0, 0.0),
                range: 1.0,
            },
            p,
        )
    }

    #[test]
    fn test_next_returns_max_priority_with_stable_ties() {
        let mut q = TaskQueue::new();
        q.add(go(0.0, Priority::Explore));
        q.add(go(10.0, Priority::Combat));
        q.add(go(20.0, Priority::Explore));
        q.add(go(30.0, Priority::Combat));
        q.add(go(40.0, Priority::Survival));

        let order: Vec<f64> = std::iter::from_fn(|| q.next())
            .map(|t| match t.kind {
                TaskKind::Go { position, .. } => position.x,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(order, vec![10.0, 30.0, 40.0, 0.0, 20.0]);
        assert!(q.next().is_none());
    }

    #[test]
    fn test_dedup_idempotence() {
        let mut q = TaskQueue::new();
        assert_eq!(q.add(go(0.0, Priority::Resource)), AddOutcome::Queued);
        assert_eq!(q.add(go(1.0, Priority::Resource)), AddOutcome::Duplicate);
        assert_eq!(q.pending_len(), 1);
    }

    #[test]
    fn test_dedup_against_current() {
        let mut q = TaskQueue::new();
        q.begin(go(0.0, Priority::UserCommand));
        assert_eq!(q.add(go(0.5, Priority::UserCommand)), AddOutcome::Duplicate);
        assert!(!q.has_at_least(Priority::Survival));
    }

    #[test]
    fn test_critical_sets_interrupt_and_cancels_token() {
        let mut q = TaskQueue::new();
        let target = EntityRef::mob(1, "zombie", Vec3::new(5.0, 64.0, 0.0));
        let (_, token) = q.begin(Task::new(TaskKind::Combat { target }, Priority::Combat));
        assert!(!q.can_interrupt());

        q.add(Task::new(TaskKind::Eat { item: "bread".into() }, Priority::Critical));
        assert!(q.interrupt_requested());
        assert!(q.can_interrupt());
        assert!(token.is_cancelled());

        let preempted = q.preempt().unwrap();
        assert_eq!(preempted.name(), "combat");
        assert!(q.current().is_none());
        assert!(!q.can_interrupt());
        assert_eq!(q.next().unwrap().priority, Priority::Critical);
    }

    #[test]
    fn test_critical_does_not_interrupt_critical() {
        let mut q = TaskQueue::new();
        let (_, token) = q.begin(go(0.0, Priority::Critical));
        q.add(Task::new(TaskKind::Hunt, Priority::Critical));
        assert!(!q.interrupt_requested());
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_critical_duplicate_of_current_does_not_interrupt() {
        let mut q = TaskQueue::new();
        let threat = EntityRef::mob(3, "creeper", Vec3::new(4.0, 64.0, 0.0));
        let (_, token) = q.begin(Task::new(
            TaskKind::Flee { threat: threat.clone() },
            Priority::Survival,
        ));
        let outcome = q.add(Task::new(TaskKind::Flee { threat }, Priority::Critical));
        assert_eq!(outcome, AddOutcome::Duplicate);
        assert!(!q.interrupt_requested());
        assert!(!token.is_cancelled());
        assert_eq!(q.pending_len(), 0);
    }

    #[test]
    fn test_begin_resets_interrupt_flag() {
        let mut q = TaskQueue::new();
        q.begin(go(0.0, Priority::Explore));
        q.add(Task::new(TaskKind::Flee {
            threat: EntityRef::mob(3, "creeper", Vec3::default()),
        }, Priority::Critical));
        assert!(q.interrupt_requested());
        q.preempt();
        let next = q.next().unwrap();
        q.begin(next);
        assert!(!q.interrupt_requested());
    }

    #[test]
    fn test_finish_ignores_stale_seq() {
        let mut q = TaskQueue::new();
        let (seq, _) = q.begin(go(0.0, Priority::Explore));
        q.set_executing(true);
        q.clear();
        q.begin(go(50.0, Priority::Explore));
        assert!(q.finish(seq).is_none());
        assert!(q.current().is_some());
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut q = TaskQueue::new();
        q.add(go(0.0, Priority::Explore));
        let (_, token) = q.begin(go(9.0, Priority::Explore));
        q.set_executing(true);
        q.clear();
        assert!(!q.has_tasks());
        assert!(!q.is_executing());
        assert!(token.is_cancelled());
    }
}

//! Task Registry - 活动任务注册表
//!
//! 进程级单例, 记录所有在跑批量任务: 任务状态对象、取消令牌与
//! 执行句柄。取消是单向的: 一旦置位, 任何路径都不得复位。

use dashmap::DashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::worker::TaskState;

/// 注册表条目
pub struct TaskEntry {
    pub state: Arc<TaskState>,
    pub cancel: CancellationToken,
    /// 批次执行句柄, spawn 之后补挂
    pub handle: Option<JoinHandle<()>>,
}

/// 任务快照 (状态查询用)
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    pub task_id: String,
    pub cancelled: bool,
}

/// 活动任务注册表
pub struct TaskRegistry {
    tasks: DashMap<String, TaskEntry>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: DashMap::new(),
        }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// 注册任务, 返回其取消令牌
    pub fn register(&self, task_id: &str, state: Arc<TaskState>) -> CancellationToken {
        let cancel = CancellationToken::new();
        self.tasks.insert(
            task_id.to_string(),
            TaskEntry {
                state,
                cancel: cancel.clone(),
                handle: None,
            },
        );
        tracing::debug!(task_id = %task_id, "Task registered");
        cancel
    }

    /// 补挂执行句柄
    pub fn attach_handle(&self, task_id: &str, handle: JoinHandle<()>) {
        if let Some(mut entry) = self.tasks.get_mut(task_id) {
            entry.handle = Some(handle);
        }
    }

    /// 请求取消任务。幂等; 返回任务是否存在。
    pub fn cancel(&self, task_id: &str) -> bool {
        match self.tasks.get(task_id) {
            Some(entry) => {
                entry.cancel.cancel();
                tracing::info!(task_id = %task_id, "Task cancellation requested");
                true
            }
            None => false,
        }
    }

    /// 查询任务的注册表侧取消标志
    pub fn is_cancelled(&self, task_id: &str) -> bool {
        self.tasks
            .get(task_id)
            .map(|entry| entry.cancel.is_cancelled())
            .unwrap_or(false)
    }

    /// 获取任务状态对象
    pub fn state(&self, task_id: &str) -> Option<Arc<TaskState>> {
        self.tasks.get(task_id).map(|entry| entry.state.clone())
    }

    /// 获取任务的取消令牌
    pub fn cancel_token(&self, task_id: &str) -> Option<CancellationToken> {
        self.tasks.get(task_id).map(|entry| entry.cancel.clone())
    }

    /// 任务结束后摘除
    pub fn remove(&self, task_id: &str) {
        self.tasks.remove(task_id);
        tracing::debug!(task_id = %task_id, "Task deregistered");
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.tasks.contains_key(task_id)
    }

    /// 所有活动任务的快照
    pub fn snapshot(&self) -> Vec<RegistrySnapshot> {
        self.tasks
            .iter()
            .map(|entry| RegistrySnapshot {
                task_id: entry.key().clone(),
                cancelled: entry.cancel.is_cancelled(),
            })
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.tasks.len()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::make_task_state;

    #[tokio::test]
    async fn test_register_and_cancel() {
        let registry = TaskRegistry::new().arc();
        let state = make_task_state("t1", registry.clone());
        let token = registry.register("t1", state);

        assert!(registry.contains("t1"));
        assert!(!registry.is_cancelled("t1"));

        assert!(registry.cancel("t1"));
        assert!(registry.is_cancelled("t1"));
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let registry = TaskRegistry::new().arc();
        let state = make_task_state("t2", registry.clone());
        registry.register("t2", state);

        assert!(registry.cancel("t2"));
        assert!(registry.cancel("t2"));
        assert!(registry.is_cancelled("t2"));
    }

    #[tokio::test]
    async fn test_cancel_unknown_task() {
        let registry = TaskRegistry::new();
        assert!(!registry.cancel("ghost"));
        assert!(!registry.is_cancelled("ghost"));
    }

    #[tokio::test]
    async fn test_remove_clears_entry() {
        let registry = TaskRegistry::new().arc();
        let state = make_task_state("t3", registry.clone());
        registry.register("t3", state);
        assert_eq!(registry.active_count(), 1);

        registry.remove("t3");
        assert!(!registry.contains("t3"));
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn test_snapshot_reflects_cancellation() {
        let registry = TaskRegistry::new().arc();
        registry.register("a", make_task_state("a", registry.clone()));
        registry.register("b", make_task_state("b", registry.clone()));
        registry.cancel("b");

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        let b = snapshot.iter().find(|s| s.task_id == "b").unwrap();
        assert!(b.cancelled);
    }
}

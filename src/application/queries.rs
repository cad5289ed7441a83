//! Queries - 读路径用例

use serde::Serialize;
use std::sync::Arc;

use crate::domain::task::{DeviceOutcome, TaskCounters};
use crate::infrastructure::memory::TaskRegistry;
use crate::infrastructure::worker::{RepairStats, RpcRepairCoordinator};

/// 任务状态视图
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatusView {
    pub task_id: String,
    pub status: String,
    pub progress: f64,
    pub message: String,
    pub started_at: Option<String>,
    pub last_update_at: Option<String>,
    pub finished_at: Option<String>,
    pub counters: TaskCounters,
    pub details: Vec<DeviceOutcome>,
}

/// 任务状态查询处理器
pub struct QueryTaskStatusHandler {
    registry: Arc<TaskRegistry>,
}

impl QueryTaskStatusHandler {
    pub fn new(registry: Arc<TaskRegistry>) -> Self {
        Self { registry }
    }

    /// 查询活动任务的状态快照; 已结束或未知的任务返回 None
    pub fn handle(&self, task_id: &str) -> Option<TaskStatusView> {
        let state = self.registry.state(task_id)?;
        let snapshot = state.snapshot();

        let mut message = snapshot.message;
        // 进行中的消息也要带上封号口径说明
        if snapshot.counters.suspended_accounts > 0 && !message.contains("账户已封停") {
            message.push_str(&format!(
                " ({} 账户已封停但算作登录失败)",
                snapshot.counters.suspended_accounts
            ));
        }

        Some(TaskStatusView {
            task_id: snapshot.task_id,
            status: snapshot.status.as_str().to_string(),
            progress: snapshot.progress,
            message,
            started_at: snapshot.started_at.map(|t| t.to_rfc3339()),
            last_update_at: snapshot.last_update_at.map(|t| t.to_rfc3339()),
            finished_at: snapshot.finished_at.map(|t| t.to_rfc3339()),
            counters: snapshot.counters,
            details: snapshot.outcomes,
        })
    }
}

/// RPC 修复统计查询处理器
pub struct GetRepairStatsHandler {
    repair: Arc<RpcRepairCoordinator>,
}

impl GetRepairStatsHandler {
    pub fn new(repair: Arc<RpcRepairCoordinator>) -> Self {
        Self { repair }
    }

    pub fn handle(&self) -> RepairStats {
        self.repair.stats()
    }
}

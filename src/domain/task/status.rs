//! 任务状态定义
//!
//! 区分两个概念:
//! - `TaskStatus`: 任务生命周期状态 (initializing → running → 终态)
//! - `AggregateStatus`: 批量任务完成后对外上报的聚合结论

use serde::{Deserialize, Serialize};

/// 任务生命周期状态
///
/// `cancelled` 只能从 `running` 到达; `completed`/`failed` 由协调器判定,
/// 一旦进入终态不再变更。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// 已创建, 尚未开始执行
    Initializing,
    /// 执行中
    Running,
    /// 全部设备处理完成 (含部分成功)
    Completed,
    /// 失败终态
    Failed,
    /// 已取消
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Initializing => "initializing",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "initializing" => Some(TaskStatus::Initializing),
            "running" => Some(TaskStatus::Running),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            "cancelled" => Some(TaskStatus::Cancelled),
            _ => None,
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// 批量任务的聚合结论
///
/// 状态查询接口返回的顶层状态字段。`Completed` 表示部分成功或
/// 全部封号等"非干净失败"的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateStatus {
    /// 仍在处理
    Processing,
    /// 全部成功
    Succeeded,
    /// 处理完成, 结果混合 (部分成功 / 全部封号 / 封号+失败混合)
    Completed,
    /// 干净的全部失败, 或被取消
    Failed,
}

impl AggregateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateStatus::Processing => "processing",
            AggregateStatus::Succeeded => "succeeded",
            AggregateStatus::Completed => "completed",
            AggregateStatus::Failed => "failed",
        }
    }
}

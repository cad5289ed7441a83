//! Commands - 写路径用例
//!
//! 外层接入面 (HTTP/CLI) 只与这里的处理器交互, 不直接触碰引擎内部。

use std::sync::Arc;
use uuid::Uuid;

use crate::domain::device::DeviceWorkItem;
use crate::infrastructure::memory::TaskRegistry;
use crate::infrastructure::worker::{BatchCoordinator, WorkflowMode};

use super::error::EngineError;
use super::ports::TaskStorePort;

/// 发起批量任务
pub struct StartBatchCommand {
    /// 不指定则生成新 ID
    pub task_id: Option<String>,
    pub mode: WorkflowMode,
    pub items: Vec<DeviceWorkItem>,
}

/// 批量任务发起处理器
pub struct StartBatchHandler {
    coordinator: BatchCoordinator,
    store: Arc<dyn TaskStorePort>,
}

impl StartBatchHandler {
    pub fn new(coordinator: BatchCoordinator, store: Arc<dyn TaskStorePort>) -> Self {
        Self { coordinator, store }
    }

    /// 校验输入, 登记任务与账号, 后台拉起批次, 返回任务 ID
    pub async fn handle(&self, command: StartBatchCommand) -> Result<String, EngineError> {
        for item in &command.items {
            if item.account.username.trim().is_empty() {
                return Err(EngineError::validation(format!(
                    "Device {} has an empty username",
                    item.display_name()
                )));
            }
            if item.box_ip.trim().is_empty() || item.device_ip.trim().is_empty() {
                return Err(EngineError::validation(format!(
                    "Device {} is missing box/device address",
                    item.display_name()
                )));
            }
        }

        let task_id = command
            .task_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        // 登记任务与账号, 后续状态写穿与备份/封号标记才会命中。
        // 登记失败降级为日志, 不阻断任务。
        if let Err(err) = self.store.create_task(&task_id, command.mode.as_str()).await {
            tracing::warn!(task_id = %task_id, "Failed to register task row: {}", err);
        }
        for item in &command.items {
            if let Err(err) = self.store.ensure_account(&item.account.username).await {
                tracing::warn!(
                    username = %item.account.username,
                    "Failed to register account row: {}",
                    err
                );
            }
        }

        self.coordinator
            .spawn_batch(&task_id, command.mode, command.items)?;

        tracing::info!(task_id = %task_id, "Batch task accepted");
        Ok(task_id)
    }
}

/// 任务取消处理器
pub struct CancelTaskHandler {
    registry: Arc<TaskRegistry>,
}

impl CancelTaskHandler {
    pub fn new(registry: Arc<TaskRegistry>) -> Self {
        Self { registry }
    }

    /// 请求取消。任务不存在 (从未注册或已结束) 返回校验错误。
    pub fn handle(&self, task_id: &str) -> Result<(), EngineError> {
        if self.registry.cancel(task_id) {
            Ok(())
        } else {
            Err(EngineError::validation(format!(
                "Task {} not found or already finished",
                task_id
            )))
        }
    }
}

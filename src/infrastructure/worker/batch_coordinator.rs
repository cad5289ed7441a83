//! Batch Coordinator - 批量任务编排
//!
//! 扇出: 每个 DeviceWorkItem 一个 tokio 任务, 派发前逐个复查取消;
//! 扇入: 逐个 join, 单设备的 panic 与故障都折叠成该设备的失败结果,
//! 永不中断整个批次。全部归队后按判定表产出任务终态。

use futures_util::future::join_all;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::application::error::EngineError;
use crate::application::ports::{NotifierPort, TaskStorePort};
use crate::config::EngineConfig;
use crate::domain::device::DeviceWorkItem;
use crate::domain::task::{
    AggregateStatus, DeviceOutcome, KeywordClassifier, OutcomeClass, OutcomeClassifier,
};
use crate::infrastructure::memory::TaskRegistry;

use super::device_workflow::{DeviceWorkflow, WorkflowMode, WorkflowOutcome};
use super::task_state::{RetryPolicy, TaskState};

/// 批量任务协调器
#[derive(Clone)]
pub struct BatchCoordinator {
    workflow: Arc<DeviceWorkflow>,
    registry: Arc<TaskRegistry>,
    store: Arc<dyn TaskStorePort>,
    notifier: Arc<dyn NotifierPort>,
    classifier: Arc<dyn OutcomeClassifier>,
    retry: RetryPolicy,
}

impl BatchCoordinator {
    pub fn new(
        workflow: Arc<DeviceWorkflow>,
        registry: Arc<TaskRegistry>,
        store: Arc<dyn TaskStorePort>,
        notifier: Arc<dyn NotifierPort>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            workflow,
            registry,
            store,
            notifier,
            classifier: Arc::new(KeywordClassifier),
            retry: RetryPolicy::new(config.max_retries, config.retry_base_secs),
        }
    }

    /// 注册任务状态与取消令牌。空批次直接拒绝。
    fn prepare(
        &self,
        task_id: &str,
        items: &[DeviceWorkItem],
    ) -> Result<(Arc<TaskState>, CancellationToken), EngineError> {
        if items.is_empty() {
            return Err(EngineError::validation("No devices to process"));
        }
        if self.registry.contains(task_id) {
            return Err(EngineError::validation(format!(
                "Task {} is already running",
                task_id
            )));
        }

        let state = Arc::new(TaskState::new(
            task_id,
            items.len(),
            self.retry.clone(),
            self.registry.clone(),
            self.store.clone(),
            self.notifier.clone(),
        ));
        let cancel = self.registry.register(task_id, state.clone());
        Ok((state, cancel))
    }

    /// 同步执行批量任务 (测试与内联调用用)
    pub async fn execute_batch(
        &self,
        task_id: &str,
        mode: WorkflowMode,
        items: Vec<DeviceWorkItem>,
    ) -> Result<AggregateStatus, EngineError> {
        let (state, cancel) = self.prepare(task_id, &items)?;
        Ok(self.run_batch(state, cancel, mode, items).await)
    }

    /// 后台执行批量任务, 立即返回。取消经注册表即刻生效。
    pub fn spawn_batch(
        &self,
        task_id: &str,
        mode: WorkflowMode,
        items: Vec<DeviceWorkItem>,
    ) -> Result<(), EngineError> {
        let (state, cancel) = self.prepare(task_id, &items)?;
        let coordinator = self.clone();
        let task_id = task_id.to_string();
        let handle = tokio::spawn(async move {
            coordinator.run_batch(state, cancel, mode, items).await;
        });
        self.registry.attach_handle(&task_id, handle);
        Ok(())
    }

    async fn run_batch(
        &self,
        state: Arc<TaskState>,
        cancel: CancellationToken,
        mode: WorkflowMode,
        items: Vec<DeviceWorkItem>,
    ) -> AggregateStatus {
        let task_id = state.task_id().to_string();
        let total = items.len();

        state
            .start(&format!("Processing {} devices concurrently", total))
            .await;

        // 扇出; 派发前逐个复查取消, 已取消则剩余设备不再派发
        let mut handles = Vec::with_capacity(total);
        let mut dispatched = 0usize;
        for item in items {
            if state.check_cancelled() {
                tracing::info!(
                    task_id = %task_id,
                    dispatched,
                    total,
                    "Cancellation observed, skipping remaining dispatches"
                );
                break;
            }
            dispatched += 1;

            let workflow = self.workflow.clone();
            let state = state.clone();
            let cancel = cancel.clone();
            let display_name = item.display_name();
            let device_id = item.device_id;
            handles.push((
                device_id,
                display_name,
                tokio::spawn(async move { workflow.run(mode, &item, &state, &cancel).await }),
            ));
        }

        // 扇入: 单设备故障与 panic 均隔离为该设备的失败结果
        let joined = join_all(handles.into_iter().map(|(id, name, h)| async move {
            (id, name, h.await)
        }))
        .await;

        for (device_id, device_name, joined_result) in joined {
            let outcome = match joined_result {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(EngineError::Cancelled)) => {
                    // 取消的设备不计入结果, 终态由取消分支统一报告
                    continue;
                }
                Ok(Err(err)) => WorkflowOutcome {
                    success: false,
                    suspended: false,
                    message: err.to_string(),
                    backed_up: false,
                },
                Err(join_err) => {
                    tracing::error!(
                        task_id = %task_id,
                        device = %device_name,
                        "Device worker panicked: {}",
                        join_err
                    );
                    WorkflowOutcome {
                        success: false,
                        suspended: false,
                        message: format!("Worker panicked: {}", join_err),
                        backed_up: false,
                    }
                }
            };

            let mut class =
                self.classifier
                    .classify(outcome.success, outcome.suspended, &outcome.message);
            let mut message = outcome.message.clone();
            // 完整流水线里登录成功但没有备份产物不算成功
            if mode == WorkflowMode::Full && class == OutcomeClass::Success && !outcome.backed_up {
                class = OutcomeClass::LoginOnly;
                if message.is_empty() {
                    message = "Logged in but backup was not completed".to_string();
                }
            }
            let device_outcome = DeviceOutcome::new(device_id, &device_name, class, message);

            tracing::info!(
                task_id = %task_id,
                device = %device_name,
                result = class.as_str(),
                "Device processing finished"
            );
            self.notifier.on_device_completed(&task_id, &device_outcome);
            state.record_outcome(device_outcome, class);

            let counters = state.counters();
            let percent = counters.completed_devices as f64 / total as f64 * 100.0;
            state.update_progress(
                percent,
                &format!(
                    "Processed {}/{} devices",
                    counters.completed_devices, total
                ),
            );
        }

        // 终态判定
        let cancelled = state.check_cancelled();
        let counters = state.counters();
        let (status, message) = counters.final_status(&task_id, cancelled);

        if cancelled {
            state.cancel(&message).await;
        } else {
            match status {
                AggregateStatus::Succeeded | AggregateStatus::Completed => {
                    state.complete(&message).await
                }
                _ => state.fail(&message).await,
            }
        }

        tracing::info!(
            task_id = %task_id,
            status = status.as_str(),
            successful = counters.successful_devices,
            login_only = counters.login_only_devices,
            failed = counters.failed_devices,
            suspended = counters.suspended_accounts,
            "{}",
            message
        );
        self.notifier.on_task_finished(&task_id, status, &message);
        self.registry.remove(&task_id);

        status
    }
}

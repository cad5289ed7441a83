//! Task State - 单任务生命周期状态机
//!
//! 每个批量任务持有一个 `TaskState`: 状态/进度/消息、取消标志、
//! 结果计数器与每设备结果明细。状态变更写穿数据库 (尽力而为,
//! "任务不存在" 降级为 info 日志) 并经 Notifier 推送。
//!
//! 取消采用双源判定: 本地原子标志 + 注册表令牌, 任一置位即视为
//! 已取消, 并把结论固化到本地标志, 之后不再查注册表。

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::application::error::EngineError;
use crate::application::ports::{NotifierPort, StoreError, TaskStorePort};
use crate::domain::task::{DeviceOutcome, OutcomeClass, TaskCounters, TaskStatus};
use crate::infrastructure::memory::TaskRegistry;

/// 进度监听回调
pub type ProgressListener = Box<dyn Fn(f64, &str) + Send + Sync>;

/// 错误监听回调: (操作名, 错误)
pub type ErrorListener = Box<dyn Fn(&str, &EngineError) + Send + Sync>;

/// 重试策略: 指数退避 base * 2^attempt
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 重试次数上限 (不含首次尝试)
    pub max_retries: u32,
    /// 基础延迟
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay_secs: u64) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_secs(base_delay_secs),
        }
    }

    /// 第 attempt 次失败后的等待时长 (attempt 从 0 起)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.pow(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 5)
    }
}

struct StateInner {
    status: TaskStatus,
    progress: f64,
    message: String,
    started_at: Option<DateTime<Utc>>,
    last_update_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

/// 任务状态快照
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub status: TaskStatus,
    pub progress: f64,
    pub message: String,
    pub started_at: Option<DateTime<Utc>>,
    pub last_update_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub counters: TaskCounters,
    pub outcomes: Vec<DeviceOutcome>,
}

/// 单任务状态
pub struct TaskState {
    task_id: String,
    inner: Mutex<StateInner>,
    cancelled: AtomicBool,
    counters: Mutex<TaskCounters>,
    outcomes: Mutex<Vec<DeviceOutcome>>,
    listeners: Mutex<Vec<ProgressListener>>,
    error_listeners: Mutex<Vec<ErrorListener>>,
    retry: RetryPolicy,
    registry: Arc<TaskRegistry>,
    store: Arc<dyn TaskStorePort>,
    notifier: Arc<dyn NotifierPort>,
}

impl TaskState {
    pub fn new(
        task_id: impl Into<String>,
        total_devices: usize,
        retry: RetryPolicy,
        registry: Arc<TaskRegistry>,
        store: Arc<dyn TaskStorePort>,
        notifier: Arc<dyn NotifierPort>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            inner: Mutex::new(StateInner {
                status: TaskStatus::Initializing,
                progress: 0.0,
                message: String::new(),
                started_at: None,
                last_update_at: None,
                finished_at: None,
            }),
            cancelled: AtomicBool::new(false),
            counters: Mutex::new(TaskCounters::new(total_devices)),
            outcomes: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            error_listeners: Mutex::new(Vec::new()),
            retry,
            registry,
            store,
            notifier,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// 注册进度监听器
    pub fn add_progress_listener(&self, listener: ProgressListener) {
        self.listeners.lock().unwrap().push(listener);
    }

    /// 注册错误监听器, 每次可重试失败时收到通知
    pub fn add_error_listener(&self, listener: ErrorListener) {
        self.error_listeners.lock().unwrap().push(listener);
    }

    /// 监听器彼此隔离, 单个 panic 不影响其余监听器和重试流程
    fn notify_error(&self, op_name: &str, err: &EngineError) {
        let listeners = self.error_listeners.lock().unwrap();
        for listener in listeners.iter() {
            if catch_unwind(AssertUnwindSafe(|| listener(op_name, err))).is_err() {
                tracing::warn!(task_id = %self.task_id, "Error listener panicked");
            }
        }
    }

    /// 任务进入运行态
    pub async fn start(&self, message: &str) {
        {
            let mut inner = self.inner.lock().unwrap();
            let now = Utc::now();
            inner.status = TaskStatus::Running;
            inner.message = message.to_string();
            inner.started_at = Some(now);
            inner.last_update_at = Some(now);
        }
        tracing::info!(task_id = %self.task_id, "Task started: {}", message);
        self.notifier.on_status(&self.task_id, message);
        self.persist_status(TaskStatus::Running).await;
    }

    /// 更新进度; percent 夹取到 [0, 100]
    pub fn update_progress(&self, percent: f64, message: &str) {
        let percent = percent.clamp(0.0, 100.0);
        {
            let mut inner = self.inner.lock().unwrap();
            inner.progress = percent;
            inner.message = message.to_string();
            inner.last_update_at = Some(Utc::now());
        }
        self.notifier.on_progress(&self.task_id, percent, message);

        // 监听器彼此隔离, 单个 panic 不影响其余监听器和任务本身
        let listeners = self.listeners.lock().unwrap();
        for listener in listeners.iter() {
            if catch_unwind(AssertUnwindSafe(|| listener(percent, message))).is_err() {
                tracing::warn!(task_id = %self.task_id, "Progress listener panicked");
            }
        }
    }

    /// 双源取消判定, 结论单向固化到本地标志
    pub fn check_cancelled(&self) -> bool {
        if self.cancelled.load(Ordering::SeqCst) {
            return true;
        }
        if self.registry.is_cancelled(&self.task_id) {
            self.cancelled.store(true, Ordering::SeqCst);
            return true;
        }
        false
    }

    /// 本地标志直接置位 (批次协调器确认取消后调用)
    pub fn mark_cancelled(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// 任务成功结束
    pub async fn complete(&self, message: &str) {
        {
            let mut inner = self.inner.lock().unwrap();
            let now = Utc::now();
            inner.status = TaskStatus::Completed;
            inner.progress = 100.0;
            inner.message = message.to_string();
            inner.last_update_at = Some(now);
            inner.finished_at = Some(now);
        }
        tracing::info!(task_id = %self.task_id, "Task completed: {}", message);
        self.persist_status(TaskStatus::Completed).await;
    }

    /// 任务失败结束
    pub async fn fail(&self, message: &str) {
        {
            let mut inner = self.inner.lock().unwrap();
            let now = Utc::now();
            inner.status = TaskStatus::Failed;
            inner.message = message.to_string();
            inner.last_update_at = Some(now);
            inner.finished_at = Some(now);
        }
        tracing::warn!(task_id = %self.task_id, "Task failed: {}", message);
        self.persist_status(TaskStatus::Failed).await;
    }

    /// 任务被取消
    pub async fn cancel(&self, message: &str) {
        self.mark_cancelled();
        {
            let mut inner = self.inner.lock().unwrap();
            let now = Utc::now();
            inner.status = TaskStatus::Cancelled;
            inner.message = message.to_string();
            inner.last_update_at = Some(now);
            inner.finished_at = Some(now);
        }
        tracing::info!(task_id = %self.task_id, "Task cancelled: {}", message);
        self.persist_status(TaskStatus::Cancelled).await;
    }

    /// 带重试的操作执行。取消错误直接向上传播, 不消耗重试额度;
    /// 其余错误按指数退避重试, 退避等待期间每秒复查取消。
    pub async fn run_with_retry<T, F, Fut>(
        &self,
        op_name: &str,
        mut op: F,
    ) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, EngineError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            if self.check_cancelled() {
                return Err(EngineError::Cancelled);
            }

            match op().await {
                Ok(value) => return Ok(value),
                Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
                Err(err) if attempt < self.retry.max_retries => {
                    self.notify_error(op_name, &err);
                    let delay = self.retry.backoff(attempt);
                    attempt += 1;
                    tracing::warn!(
                        task_id = %self.task_id,
                        op = %op_name,
                        attempt,
                        max_retries = self.retry.max_retries,
                        delay_secs = delay.as_secs(),
                        "Operation failed, retrying: {}",
                        err
                    );
                    if !self.wait_with_cancel(delay).await {
                        return Err(EngineError::Cancelled);
                    }
                }
                Err(err) => {
                    tracing::error!(
                        task_id = %self.task_id,
                        op = %op_name,
                        "Operation failed after {} retries: {}",
                        self.retry.max_retries,
                        err
                    );
                    return Err(err);
                }
            }
        }
    }

    /// 可取消等待: 按 1 秒粒度分段睡眠, 每段之间复查取消标志。
    /// 返回 false 表示等待被取消打断。
    pub async fn wait_with_cancel(&self, duration: Duration) -> bool {
        let mut remaining = duration;
        let step = Duration::from_secs(1);
        while remaining > Duration::ZERO {
            if self.check_cancelled() {
                return false;
            }
            let chunk = remaining.min(step);
            tokio::time::sleep(chunk).await;
            remaining = remaining.saturating_sub(chunk);
        }
        !self.check_cancelled()
    }

    /// 记录单设备结果并更新计数器
    pub fn record_outcome(&self, outcome: DeviceOutcome, class: OutcomeClass) {
        self.counters.lock().unwrap().record(class);
        self.outcomes.lock().unwrap().push(outcome);
    }

    pub fn counters(&self) -> TaskCounters {
        self.counters.lock().unwrap().clone()
    }

    pub fn status(&self) -> TaskStatus {
        self.inner.lock().unwrap().status
    }

    /// 完整状态快照
    pub fn snapshot(&self) -> TaskSnapshot {
        let inner = self.inner.lock().unwrap();
        TaskSnapshot {
            task_id: self.task_id.clone(),
            status: inner.status,
            progress: inner.progress,
            message: inner.message.clone(),
            started_at: inner.started_at,
            last_update_at: inner.last_update_at,
            finished_at: inner.finished_at,
            counters: self.counters.lock().unwrap().clone(),
            outcomes: self.outcomes.lock().unwrap().clone(),
        }
    }

    /// 状态写穿数据库。写失败只记日志, 不影响任务结论;
    /// "任务不存在" 是正常情况 (临时任务 ID 未入库)。
    async fn persist_status(&self, status: TaskStatus) {
        match self.store.update_task_status(&self.task_id, status.as_str()).await {
            Ok(()) => {}
            Err(StoreError::TaskNotFound(_)) => {
                tracing::info!(
                    task_id = %self.task_id,
                    "Task not in database, skipping status write-through"
                );
            }
            Err(err) => {
                tracing::warn!(
                    task_id = %self.task_id,
                    "Failed to persist task status: {}",
                    err
                );
            }
        }
    }
}

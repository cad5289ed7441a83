//! Event Publisher Implementation
//!
//! WebSocket 事件推送实现 (帧协议与心跳由外层传输负责, 这里只提供
//! "向任务 X 推一条消息" 的能力)。
//!
//! 投递语义: 尽力而为, 至多一次。任务无活跃监听者时事件进入该任务的
//! 内存消息列表 (有界), 供后续一次性取回, 不是真正的补投。

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::application::ports::NotifierPort;
use crate::domain::task::{AggregateStatus, DeviceOutcome};

/// 单任务缓冲消息上限, 超出丢弃最旧的
const BUFFER_LIMIT: usize = 200;

/// WebSocket 事件类型
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum TaskEvent {
    /// 任务级状态行
    Status { task_id: String, message: String },
    /// 进度更新
    Progress {
        task_id: String,
        percent: f64,
        message: String,
    },
    /// 单设备处理完成
    DeviceCompleted {
        task_id: String,
        device_name: String,
        login_status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// 任务终态
    TaskFinished {
        task_id: String,
        status: String,
        message: String,
    },
}

/// 事件发布器
pub struct WsEventPublisher {
    /// task_id -> broadcast sender
    task_channels: DashMap<String, broadcast::Sender<TaskEvent>>,
    /// task_id -> 无监听者时的缓冲消息列表
    buffered: DashMap<String, Vec<TaskEvent>>,
}

impl WsEventPublisher {
    pub fn new() -> Self {
        Self {
            task_channels: DashMap::new(),
            buffered: DashMap::new(),
        }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// 注册任务的事件通道
    pub fn register_task(&self, task_id: &str) -> broadcast::Receiver<TaskEvent> {
        if let Some(sender) = self.task_channels.get(task_id) {
            return sender.subscribe();
        }

        let (tx, rx) = broadcast::channel(100);
        self.task_channels.insert(task_id.to_string(), tx);
        rx
    }

    /// 取消注册任务, 同时清空缓冲
    pub fn unregister_task(&self, task_id: &str) {
        self.task_channels.remove(task_id);
        self.buffered.remove(task_id);
    }

    /// 获取任务的事件接收器
    pub fn subscribe(&self, task_id: &str) -> Option<broadcast::Receiver<TaskEvent>> {
        self.task_channels.get(task_id).map(|s| s.subscribe())
    }

    /// 取回并清空任务的缓冲消息
    pub fn drain_buffered(&self, task_id: &str) -> Vec<TaskEvent> {
        self.buffered
            .remove(task_id)
            .map(|(_, msgs)| msgs)
            .unwrap_or_default()
    }

    /// 发布事件到指定任务; 无监听者时落入缓冲
    fn publish(&self, task_id: &str, event: TaskEvent) {
        if let Some(sender) = self.task_channels.get(task_id) {
            if sender.send(event.clone()).is_ok() {
                return;
            }
        }

        let mut buf = self.buffered.entry(task_id.to_string()).or_default();
        if buf.len() >= BUFFER_LIMIT {
            buf.remove(0);
        }
        buf.push(event);
        tracing::debug!(task_id = %task_id, "Event buffered (no active listener)");
    }
}

impl NotifierPort for WsEventPublisher {
    fn on_status(&self, task_id: &str, message: &str) {
        self.publish(
            task_id,
            TaskEvent::Status {
                task_id: task_id.to_string(),
                message: message.to_string(),
            },
        );
    }

    fn on_progress(&self, task_id: &str, percent: f64, message: &str) {
        self.publish(
            task_id,
            TaskEvent::Progress {
                task_id: task_id.to_string(),
                percent,
                message: message.to_string(),
            },
        );
    }

    fn on_device_completed(&self, task_id: &str, outcome: &DeviceOutcome) {
        self.publish(
            task_id,
            TaskEvent::DeviceCompleted {
                task_id: task_id.to_string(),
                device_name: outcome.device_name.clone(),
                login_status: outcome.login_status.as_str().to_string(),
                error: if outcome.error_message.is_empty() {
                    None
                } else {
                    Some(outcome.error_message.clone())
                },
            },
        );
    }

    fn on_task_finished(&self, task_id: &str, status: AggregateStatus, message: &str) {
        self.publish(
            task_id,
            TaskEvent::TaskFinished {
                task_id: task_id.to_string(),
                status: status.as_str().to_string(),
                message: message.to_string(),
            },
        );
    }
}

impl Default for WsEventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

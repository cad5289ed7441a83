//! Notifier Port - 推送通知下沉抽象
//!
//! 扁平回调接口, 取代历史实现中嵌套的 progress 对象垫片。
//! 投递语义: 尽力而为, 至多一次; 无监听者时由实现方决定缓冲或丢弃。
//! 通知失败永远不升级为任务失败。

use crate::domain::task::{AggregateStatus, DeviceOutcome};

/// Notifier Port
pub trait NotifierPort: Send + Sync {
    /// 任务级状态行 (人类可读)
    fn on_status(&self, task_id: &str, message: &str);

    /// 进度更新, percent 已被调用方夹取到 [0, 100]
    fn on_progress(&self, task_id: &str, percent: f64, message: &str);

    /// 单个设备处理完成
    fn on_device_completed(&self, task_id: &str, outcome: &DeviceOutcome);

    /// 任务终态
    fn on_task_finished(&self, task_id: &str, status: AggregateStatus, message: &str);
}

//! Domain Layer - 领域模型
//!
//! - task: 任务生命周期、三态结果分类与聚合判定
//! - device: 设备工作项

pub mod device;
pub mod task;

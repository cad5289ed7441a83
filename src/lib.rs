//! Boxhive - 云手机设备农场批量账号任务引擎
//!
//! 架构设计: DDD + CQRS + Hexagonal Architecture
//!
//! 领域层 (domain/):
//! - Task Context: 任务状态/三态结果分类/聚合计数
//! - Device Context: 设备工作项与账号凭据
//!
//! 应用层 (application/):
//! - Ports: 端口定义（DeviceFarm, LoginService, UiInspector, TaskStore, Notifier）
//! - Commands: 批量任务发起与取消
//! - Queries: 任务状态与修复统计查询
//!
//! 基础设施层 (infrastructure/):
//! - Farm: 设备农场与登录子服务 HTTP 适配器
//! - Memory: 活动任务注册表
//! - Worker: 批次协调/单设备工作流/RPC 自愈/端口分配
//! - Persistence: SQLite 存储
//! - Events: WebSocket 事件发布

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

#[cfg(test)]
mod test_support;

pub use config::{load_config, AppConfig};

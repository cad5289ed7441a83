//! Task Store Port - 持久化下沉抽象
//!
//! 任务状态写穿、账号备份标记与端口占用记录。所有写入对引擎都是
//! 尽力而为: 写失败记日志, 不影响任务业务结论。
//! "任务不存在" 是公认的非异常结果 (临时/测试任务 ID 从未入库),
//! 必须与真正的写入失败区分。

use async_trait::async_trait;
use std::collections::HashSet;
use thiserror::Error;

/// 持久化错误
#[derive(Debug, Error)]
pub enum StoreError {
    /// 任务不在数据库中 (正常情况, 调用方降级为 info 日志)
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Database error: {0}")]
    Database(String),
}

/// 端口类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortKind {
    /// ADB / uiautomator2 端口
    U2,
    /// HOST_RPA 控制面端口
    Rpc,
}

impl PortKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortKind::U2 => "u2",
            PortKind::Rpc => "rpc",
        }
    }
}

/// Task Store Port
#[async_trait]
pub trait TaskStorePort: Send + Sync {
    /// 登记任务 (入库后状态写穿才会命中); 已存在则保留原记录
    async fn create_task(&self, task_id: &str, task_type: &str) -> Result<(), StoreError>;

    /// 登记账号, 已存在则返回现有 ID
    async fn ensure_account(&self, username: &str) -> Result<i64, StoreError>;

    /// 写穿任务状态; 任务未入库时返回 `TaskNotFound`
    async fn update_task_status(&self, task_id: &str, status: &str) -> Result<(), StoreError>;

    /// 备份导出成功后置位账号的持久化备份标记
    async fn mark_account_backed_up(&self, account_id: i64) -> Result<(), StoreError>;

    /// 封号判定成立后置位账号的持久化封号标记
    async fn mark_account_suspended(&self, username: &str) -> Result<(), StoreError>;

    /// 按用户名查账号 ID (账号可能未入库)
    async fn account_id_by_username(&self, username: &str) -> Result<Option<i64>, StoreError>;

    /// 同一宿主机下已占用的端口集合 (端口扫描排除用)
    async fn reserved_ports(&self, box_ip: &str, kind: PortKind)
        -> Result<HashSet<u16>, StoreError>;

    /// 记录新分配的端口
    async fn save_device_port(
        &self,
        box_ip: &str,
        device_name: &str,
        kind: PortKind,
        port: u16,
    ) -> Result<(), StoreError>;
}

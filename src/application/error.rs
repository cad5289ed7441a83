//! 应用层错误定义
//!
//! 引擎统一错误类型。`Cancelled` 是控制流出口而非故障:
//! 重试循环立即向上传播, 任务层面上报为取消而不是失败。

use thiserror::Error;

use super::ports::{FarmError, LoginError, StoreError};

/// 引擎错误
#[derive(Debug, Error)]
pub enum EngineError {
    /// 任务已被取消 (不重试, 不计为失败)
    #[error("Task cancelled")]
    Cancelled,

    /// 输入验证错误
    #[error("Validation error: {0}")]
    Validation(String),

    /// 设备农场 API 错误
    #[error("Device farm error: {0}")]
    Farm(#[from] FarmError),

    /// 登录子服务错误
    #[error("Login service error: {0}")]
    Login(#[from] LoginError),

    /// 持久化错误
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// RPC 修复后仍不可达 (特殊的瞬态失败子类)
    #[error("RPC repair failed for container {container}")]
    RpcUnavailable { container: String },

    /// 内部错误
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// 是否为取消信号
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }
}

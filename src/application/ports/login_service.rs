//! Login Service Port - 登录子服务与 UI 状态检测抽象
//!
//! 登录子服务驱动模拟器 UI 完成账号登录 (耗时可达数分钟);
//! UI 检测能力 (`UiInspectorPort`) 用于登录后的实时封号复核与
//! 备份前的登录状态确认, 对本引擎是黑盒能力。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 登录子服务错误
#[derive(Debug, Error)]
pub enum LoginError {
    #[error("Login request timed out")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Login service error: {0}")]
    Service(String),
}

impl LoginError {
    /// 瞬态传输层错误可按任务重试策略重试;
    /// 服务明确返回的登录失败不重试。
    pub fn is_transient(&self) -> bool {
        matches!(self, LoginError::Timeout | LoginError::Network(_))
    }
}

/// 单账号登录请求
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub device_ip: String,
    pub u2_port: u16,
    pub rpc_port: u16,
    pub username: String,
    pub password: String,
    pub secret_key: String,
}

/// 登录子服务应答
#[derive(Debug, Clone, Deserialize)]
pub struct LoginReply {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Login Service Port
#[async_trait]
pub trait LoginServicePort: Send + Sync {
    /// 执行单账号登录 (慢调用, 超时约 240 秒)
    async fn login(&self, request: &LoginRequest) -> Result<LoginReply, LoginError>;

    /// 查询已知封号账号用户名列表
    async fn suspended_usernames(&self) -> Result<Vec<String>, LoginError>;
}

/// UI 检测结论
#[derive(Debug, Clone, Default)]
pub struct UiLoginCheck {
    /// 宽松判定: 未发现失败指标即为 true
    pub logged_in: bool,
    /// 是否发现明确的封号指标
    pub suspended: bool,
    /// 命中的指标描述 (日志用)
    pub detail: String,
}

/// UI 状态检测错误 (调用方应降级而非中断)
#[derive(Debug, Error)]
#[error("UI inspection failed: {0}")]
pub struct UiError(pub String);

/// UI Inspector Port
///
/// 宽松默认: 实现方在未发现明确的封号/登录失败/错误页指标时,
/// 即使没有成功指标也应返回 logged_in=true, 避免指标列表不全
/// 造成误判漏备份。收紧该语义会改变可观测行为。
#[async_trait]
pub trait UiInspectorPort: Send + Sync {
    async fn confirm_logged_in(&self, device_ip: &str, u2_port: u16)
        -> Result<UiLoginCheck, UiError>;
}

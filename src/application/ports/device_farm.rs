//! Device Farm Port - 设备农场 HTTP API 抽象
//!
//! 设备农场是黑盒 RPC: 容器列表 / 端口信息 / 重启 / 删除 / 备份导出,
//! 所有接口返回 `{code, msg}` 信封, code 200 为成功。
//! 具体实现在 infrastructure/farm 层。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 设备农场错误
#[derive(Debug, Error)]
pub enum FarmError {
    #[error("Request timed out")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Farm API error (code {code}): {message}")]
    Api { code: i64, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// `GET /get/{ip}` 返回的容器条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// 实例位编号
    #[serde(rename = "index")]
    pub index: u16,
    /// 运行状态, "running" 表示在线
    #[serde(rename = "State")]
    pub state: String,
    /// 容器名称
    #[serde(rename = "Names")]
    pub names: String,
}

impl ContainerInfo {
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}

/// `GET /and_api/v1/get_api_info/{ip}/{name}` 返回的端口信息,
/// 字段格式均为 "host:port" 字符串
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiInfo {
    #[serde(rename = "ADB", default)]
    pub adb: Option<String>,
    #[serde(rename = "HOST_RPA", default)]
    pub host_rpa: Option<String>,
}

/// Device Farm Port
#[async_trait]
pub trait DeviceFarmPort: Send + Sync {
    /// 获取宿主机上的容器列表
    async fn list_containers(&self, box_ip: &str) -> Result<Vec<ContainerInfo>, FarmError>;

    /// 查询容器实际绑定的端口信息
    async fn get_api_info(&self, box_ip: &str, container_name: &str) -> Result<ApiInfo, FarmError>;

    /// 重启容器 (RPC 修复用)
    async fn reboot_container(&self, box_ip: &str, container_name: &str) -> Result<(), FarmError>;

    /// 删除容器 (端点回收, 工作流每个出口都必须到达)
    async fn remove_container(&self, box_ip: &str, container_name: &str) -> Result<(), FarmError>;

    /// 备份导出容器到本地路径
    async fn export_container(
        &self,
        box_ip: &str,
        container_name: &str,
        local_path: &str,
    ) -> Result<(), FarmError>;
}

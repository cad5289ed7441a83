//! 设备工作项定义

use serde::{Deserialize, Serialize};

/// 账号凭据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountCredentials {
    pub username: String,
    pub password: String,
    pub secret_key: String,
    /// 数据库账号 ID (可能未入库)
    pub account_id: Option<i64>,
}

/// (账号, 设备端点, 实例位) 三元组, 批量任务的并发处理单元
///
/// instance_slot + device_ip + box_ip 在任意时刻唯一确定一对物理端口,
/// 但端口值可能在设备冲突或迁移时被重新分配。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceWorkItem {
    /// 容器所在宿主机 IP
    pub box_ip: String,
    /// 设备 IP (登录子服务寻址用)
    pub device_ip: String,
    /// 容器名称, 未知时由端口分配器动态解析
    pub container_name: Option<String>,
    /// 实例位编号 (1 起), 用于推导默认端口
    pub instance_slot: u16,
    pub account: AccountCredentials,
    pub device_id: Option<i64>,
    pub device_name: Option<String>,
}

impl DeviceWorkItem {
    /// 日志与结果上报用的设备标识
    pub fn display_name(&self) -> String {
        self.device_name
            .clone()
            .unwrap_or_else(|| self.device_ip.clone())
    }
}

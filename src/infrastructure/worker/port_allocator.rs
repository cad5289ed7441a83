//! Port Allocator - 容器端口解析与分配
//!
//! 每个容器实例位 (slot) 对应一对端口: u2 (ADB/uiautomator2) 与
//! RPC (HOST_RPA 控制面)。默认按基数+slot 计算; 动态查询农场 API
//! 拿实际绑定端口, 查询失败静默回退到计算值 (容器在线但查询接口
//! 偶发超时是常态, 回退值大概率正确)。

use std::collections::HashSet;
use std::sync::Arc;

use crate::application::ports::{DeviceFarmPort, PortKind, TaskStorePort};
use crate::config::PortConfig;

/// 一对端口
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortPair {
    pub u2_port: u16,
    pub rpc_port: u16,
}

/// 按实例位计算默认端口
pub fn calculate_default_ports(config: &PortConfig, slot: u16) -> PortPair {
    PortPair {
        u2_port: config.u2_base + slot,
        rpc_port: config.rpc_base + slot,
    }
}

/// 从 "host:port" 串提取端口号
fn parse_port(endpoint: &str) -> Option<u16> {
    endpoint.rsplit(':').next()?.trim().parse().ok()
}

/// 端口分配器
pub struct PortAllocator {
    farm: Arc<dyn DeviceFarmPort>,
    store: Arc<dyn TaskStorePort>,
    config: PortConfig,
}

impl PortAllocator {
    pub fn new(
        farm: Arc<dyn DeviceFarmPort>,
        store: Arc<dyn TaskStorePort>,
        config: PortConfig,
    ) -> Self {
        Self {
            farm,
            store,
            config,
        }
    }

    /// 解析容器实际端口: 动态查询优先, 失败静默回退到计算值。
    /// 两个字段只要有一个解析失败就整体回退, 避免混用两套来源。
    pub async fn resolve_ports(
        &self,
        box_ip: &str,
        container_name: &str,
        slot: u16,
    ) -> PortPair {
        let defaults = calculate_default_ports(&self.config, slot);

        let info = match self.farm.get_api_info(box_ip, container_name).await {
            Ok(info) => info,
            Err(err) => {
                tracing::debug!(
                    box_ip = %box_ip,
                    container = %container_name,
                    "API info lookup failed, using calculated ports: {}",
                    err
                );
                return defaults;
            }
        };

        let u2 = info.adb.as_deref().and_then(parse_port);
        let rpc = info.host_rpa.as_deref().and_then(parse_port);

        match (u2, rpc) {
            (Some(u2_port), Some(rpc_port)) => {
                tracing::debug!(
                    box_ip = %box_ip,
                    container = %container_name,
                    u2_port,
                    rpc_port,
                    "Resolved ports from farm API"
                );
                PortPair { u2_port, rpc_port }
            }
            _ => {
                tracing::debug!(
                    box_ip = %box_ip,
                    container = %container_name,
                    "Incomplete API info, using calculated ports"
                );
                defaults
            }
        }
    }

    /// 容器名未知时按实例位在容器列表中定位 (要求在线), 再解析端口。
    /// 找不到在线容器时同样回退到计算值。
    pub async fn resolve_ports_by_slot(&self, box_ip: &str, slot: u16) -> PortPair {
        let container = match self.farm.list_containers(box_ip).await {
            Ok(containers) => containers
                .into_iter()
                .find(|c| c.index == slot && c.is_running()),
            Err(err) => {
                tracing::debug!(
                    box_ip = %box_ip,
                    slot,
                    "Container listing failed, using calculated ports: {}",
                    err
                );
                None
            }
        };

        match container {
            Some(c) => self.resolve_ports(box_ip, &c.names, slot).await,
            None => calculate_default_ports(&self.config, slot),
        }
    }

    /// 分配一个未占用的新端口: 从基数起逐个向上扫描, 跳过会话内
    /// 已分配与数据库已记录的端口。扫描额度耗尽返回 None,
    /// 由调用方决定失败语义。
    pub async fn allocate_new_port(
        &self,
        box_ip: &str,
        device_name: &str,
        kind: PortKind,
        session_used: &mut HashSet<u16>,
    ) -> Option<u16> {
        let reserved = match self.store.reserved_ports(box_ip, kind).await {
            Ok(ports) => ports,
            Err(err) => {
                tracing::warn!(
                    box_ip = %box_ip,
                    "Failed to load reserved ports, excluding session set only: {}",
                    err
                );
                HashSet::new()
            }
        };

        let base = match kind {
            PortKind::U2 => self.config.u2_base,
            PortKind::Rpc => self.config.rpc_base,
        };

        let mut candidate = base;
        for _ in 0..self.config.scan_max_attempts {
            candidate += 1;
            if session_used.contains(&candidate) || reserved.contains(&candidate) {
                continue;
            }

            session_used.insert(candidate);
            if let Err(err) = self
                .store
                .save_device_port(box_ip, device_name, kind, candidate)
                .await
            {
                tracing::warn!(
                    box_ip = %box_ip,
                    port = candidate,
                    "Failed to persist allocated port: {}",
                    err
                );
            }
            return Some(candidate);
        }

        tracing::error!(
            box_ip = %box_ip,
            kind = kind.as_str(),
            attempts = self.config.scan_max_attempts,
            "Port scan exhausted without finding a free port"
        );
        None
    }
}

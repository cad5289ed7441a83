//! RPC Repair Coordinator - 容器 RPC 连通性自愈
//!
//! 登录前置检查: 容器 RPC 端口探测不通时重启容器并等待落定,
//! 再复查一次。修复失败的容器进入黑名单冷却 (30 分钟), 期间
//! 直接短路返回不可用, 防止对同一台坏容器反复重启。
//!
//! 统计口径: 初次探测即通也计入成功修复 (保持历史统计连续性)。

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use async_trait::async_trait;

use crate::application::error::EngineError;
use crate::application::ports::DeviceFarmPort;
use crate::config::EngineConfig;

use super::port_allocator::{PortAllocator, PortPair};

/// 修复等级, 决定重启后的落定等待时长
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairLevel {
    /// 轻量修复: 重启后等 30 秒
    Light,
    /// 完整修复: 重启后等 60 秒
    Full,
}

/// 修复统计快照
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RepairStats {
    pub total_attempts: u64,
    pub successful_repairs: u64,
    pub failed_repairs: u64,
    pub success_rate: String,
    pub blacklisted_containers: Vec<String>,
}

/// TCP 连通性探测 (测试中可替换)
#[async_trait]
pub trait TcpProbe: Send + Sync {
    async fn probe(&self, host: &str, port: u16, timeout: Duration) -> bool;
}

/// 真实 TCP 探测
pub struct TokioTcpProbe;

#[async_trait]
impl TcpProbe for TokioTcpProbe {
    async fn probe(&self, host: &str, port: u16, timeout: Duration) -> bool {
        let addr = format!("{}:{}", host, port);
        matches!(
            tokio::time::timeout(timeout, tokio::net::TcpStream::connect(&addr)).await,
            Ok(Ok(_))
        )
    }
}

/// RPC 修复协调器 (进程级单例)
pub struct RpcRepairCoordinator {
    farm: Arc<dyn DeviceFarmPort>,
    allocator: Arc<PortAllocator>,
    probe: Arc<dyn TcpProbe>,
    /// "box_ip/container" -> 拉黑时刻
    blacklist: DashMap<String, Instant>,
    cooldown: Duration,
    probe_timeout: Duration,
    light_wait: Duration,
    full_wait: Duration,
    total_attempts: AtomicU64,
    successful_repairs: AtomicU64,
    failed_repairs: AtomicU64,
}

impl RpcRepairCoordinator {
    pub fn new(
        farm: Arc<dyn DeviceFarmPort>,
        allocator: Arc<PortAllocator>,
        probe: Arc<dyn TcpProbe>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            farm,
            allocator,
            probe,
            blacklist: DashMap::new(),
            cooldown: Duration::from_secs(config.rpc_blacklist_cooldown_secs),
            probe_timeout: Duration::from_secs(config.rpc_probe_timeout_secs),
            light_wait: Duration::from_secs(config.repair_light_wait_secs),
            full_wait: Duration::from_secs(config.repair_full_wait_secs),
            total_attempts: AtomicU64::new(0),
            successful_repairs: AtomicU64::new(0),
            failed_repairs: AtomicU64::new(0),
        }
    }

    fn blacklist_key(box_ip: &str, container_name: &str) -> String {
        format!("{}/{}", box_ip, container_name)
    }

    /// 容器是否在黑名单冷却期内; 过期条目顺手摘除
    pub fn is_blacklisted(&self, box_ip: &str, container_name: &str) -> bool {
        let key = Self::blacklist_key(box_ip, container_name);
        match self.blacklist.get(&key) {
            Some(entry) => {
                if entry.elapsed() < self.cooldown {
                    true
                } else {
                    drop(entry);
                    self.blacklist.remove(&key);
                    false
                }
            }
            None => false,
        }
    }

    fn add_to_blacklist(&self, box_ip: &str, container_name: &str) {
        let key = Self::blacklist_key(box_ip, container_name);
        self.blacklist.insert(key, Instant::now());
        tracing::warn!(
            box_ip = %box_ip,
            container = %container_name,
            cooldown_secs = self.cooldown.as_secs(),
            "Container blacklisted after failed repair"
        );
    }

    /// 统计快照
    pub fn stats(&self) -> RepairStats {
        let total = self.total_attempts.load(Ordering::Relaxed);
        let successful = self.successful_repairs.load(Ordering::Relaxed);
        let success_rate = if total == 0 {
            "0.0%".to_string()
        } else {
            format!("{:.1}%", successful as f64 / total as f64 * 100.0)
        };

        let blacklisted_containers = self
            .blacklist
            .iter()
            .filter(|entry| entry.value().elapsed() < self.cooldown)
            .map(|entry| entry.key().clone())
            .collect();

        RepairStats {
            total_attempts: total,
            successful_repairs: successful,
            failed_repairs: self.failed_repairs.load(Ordering::Relaxed),
            success_rate,
            blacklisted_containers,
        }
    }

    /// 确保容器 RPC 可达, 返回最终解析的端口对。
    ///
    /// 流程: 黑名单检查 → 解析端口 → 探测 → (不通则) 重启容器 →
    /// 可取消的落定等待 → 重新解析端口 → 复查探测。
    pub async fn ensure_rpc_available(
        &self,
        box_ip: &str,
        device_ip: &str,
        container_name: &str,
        slot: u16,
        level: RepairLevel,
        cancel: &CancellationToken,
    ) -> Result<PortPair, EngineError> {
        if self.is_blacklisted(box_ip, container_name) {
            tracing::warn!(
                box_ip = %box_ip,
                container = %container_name,
                "Container is blacklisted, skipping repair"
            );
            return Err(EngineError::RpcUnavailable {
                container: container_name.to_string(),
            });
        }

        self.total_attempts.fetch_add(1, Ordering::Relaxed);

        let ports = self.allocator.resolve_ports(box_ip, container_name, slot).await;
        if self
            .probe
            .probe(device_ip, ports.rpc_port, self.probe_timeout)
            .await
        {
            self.successful_repairs.fetch_add(1, Ordering::Relaxed);
            return Ok(ports);
        }

        tracing::info!(
            box_ip = %box_ip,
            container = %container_name,
            rpc_port = ports.rpc_port,
            "RPC unreachable, attempting container reboot"
        );

        if let Err(err) = self.farm.reboot_container(box_ip, container_name).await {
            tracing::error!(
                box_ip = %box_ip,
                container = %container_name,
                "Container reboot failed: {}",
                err
            );
            self.failed_repairs.fetch_add(1, Ordering::Relaxed);
            self.add_to_blacklist(box_ip, container_name);
            return Err(EngineError::RpcUnavailable {
                container: container_name.to_string(),
            });
        }

        let settle = match level {
            RepairLevel::Light => self.light_wait,
            RepairLevel::Full => self.full_wait,
        };
        tokio::select! {
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            _ = tokio::time::sleep(settle) => {}
        }

        // 重启后容器可能换了端口绑定
        let ports = self.allocator.resolve_ports(box_ip, container_name, slot).await;
        if self
            .probe
            .probe(device_ip, ports.rpc_port, self.probe_timeout)
            .await
        {
            tracing::info!(
                box_ip = %box_ip,
                container = %container_name,
                "RPC recovered after reboot"
            );
            self.successful_repairs.fetch_add(1, Ordering::Relaxed);
            return Ok(ports);
        }

        self.failed_repairs.fetch_add(1, Ordering::Relaxed);
        self.add_to_blacklist(box_ip, container_name);
        Err(EngineError::RpcUnavailable {
            container: container_name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PortConfig;
    use crate::test_support::{FakeFarm, FakeProbe, FakeStore};

    fn coordinator(farm: Arc<FakeFarm>, probe: FakeProbe) -> RpcRepairCoordinator {
        let allocator = Arc::new(PortAllocator::new(
            farm.clone(),
            Arc::new(FakeStore::default()),
            PortConfig::default(),
        ));
        RpcRepairCoordinator::new(farm, allocator, Arc::new(probe), &EngineConfig::default())
    }

    #[tokio::test]
    async fn test_initial_probe_success_counts_as_repair() {
        let coord = coordinator(Arc::new(FakeFarm::default()), FakeProbe::always_up());
        let cancel = CancellationToken::new();

        let ports = coord
            .ensure_rpc_available("10.0.0.1", "10.0.0.5", "dev_3", 3, RepairLevel::Light, &cancel)
            .await
            .unwrap();
        assert_eq!(ports.rpc_port, 7103);

        let stats = coord.stats();
        assert_eq!(stats.total_attempts, 1);
        assert_eq!(stats.successful_repairs, 1);
        assert_eq!(stats.failed_repairs, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reboot_then_recover() {
        let farm = Arc::new(FakeFarm::default());
        // 第一次探测失败, 重启后恢复
        let coord = coordinator(farm.clone(), FakeProbe::up_after(1));
        let cancel = CancellationToken::new();

        let result = coord
            .ensure_rpc_available("10.0.0.1", "10.0.0.5", "dev_3", 3, RepairLevel::Light, &cancel)
            .await;
        assert!(result.is_ok());

        assert_eq!(farm.rebooted_containers(), vec!["dev_3".to_string()]);
        let stats = coord.stats();
        assert_eq!(stats.successful_repairs, 1);
        assert!(!coord.is_blacklisted("10.0.0.1", "dev_3"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_repair_blacklists_container() {
        let coord = coordinator(Arc::new(FakeFarm::default()), FakeProbe::always_down());
        let cancel = CancellationToken::new();

        let err = coord
            .ensure_rpc_available("10.0.0.1", "10.0.0.5", "dev_3", 3, RepairLevel::Full, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::RpcUnavailable { .. }));
        assert!(coord.is_blacklisted("10.0.0.1", "dev_3"));

        let stats = coord.stats();
        assert_eq!(stats.success_rate, "0.0%");
        assert_eq!(stats.blacklisted_containers, vec!["10.0.0.1/dev_3"]);

        // 黑名单期间短路, 不再计入尝试
        let err = coord
            .ensure_rpc_available("10.0.0.1", "10.0.0.5", "dev_3", 3, RepairLevel::Full, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::RpcUnavailable { .. }));
        assert_eq!(coord.stats().total_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blacklist_expires_after_cooldown() {
        let coord = coordinator(Arc::new(FakeFarm::default()), FakeProbe::always_down());
        let cancel = CancellationToken::new();

        let _ = coord
            .ensure_rpc_available("10.0.0.1", "10.0.0.5", "dev_3", 3, RepairLevel::Light, &cancel)
            .await;
        assert!(coord.is_blacklisted("10.0.0.1", "dev_3"));

        tokio::time::advance(Duration::from_secs(30 * 60 + 1)).await;
        assert!(!coord.is_blacklisted("10.0.0.1", "dev_3"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reboot_failure_blacklists_without_wait() {
        let farm = Arc::new(FakeFarm::default().failing_reboot());
        let coord = coordinator(farm, FakeProbe::always_down());
        let cancel = CancellationToken::new();

        let started = tokio::time::Instant::now();
        let err = coord
            .ensure_rpc_available("10.0.0.1", "10.0.0.5", "dev_3", 3, RepairLevel::Full, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::RpcUnavailable { .. }));
        // 重启都没成功, 不应消耗落定等待
        assert_eq!(started.elapsed().as_secs(), 0);
        assert_eq!(coord.stats().failed_repairs, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_wait_is_cancellable() {
        let coord = coordinator(Arc::new(FakeFarm::default()), FakeProbe::always_down());
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            cancel_clone.cancel();
        });

        let err = coord
            .ensure_rpc_available("10.0.0.1", "10.0.0.5", "dev_3", 3, RepairLevel::Full, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}

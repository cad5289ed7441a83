//! Configuration Types
//!
//! 定义所有配置结构体

use serde::Deserialize;

/// 应用主配置
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// 设备农场 API 配置
    #[serde(default)]
    pub farm: FarmConfig,

    /// 登录子服务配置
    #[serde(default)]
    pub login: LoginConfig,

    /// 数据库配置
    #[serde(default)]
    pub database: DatabaseConfig,

    /// 引擎配置
    #[serde(default)]
    pub engine: EngineConfig,

    /// 端口分配配置
    #[serde(default)]
    pub ports: PortConfig,

    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 设备农场 API 配置
#[derive(Debug, Clone, Deserialize)]
pub struct FarmConfig {
    /// 设备农场 API 基础 URL
    #[serde(default = "default_farm_url")]
    pub base_url: String,

    /// 常规请求超时 (秒)
    #[serde(default = "default_farm_timeout")]
    pub timeout_secs: u64,

    /// 备份导出超时 (秒), 导出大镜像较慢
    #[serde(default = "default_export_timeout")]
    pub export_timeout_secs: u64,
}

fn default_farm_url() -> String {
    "http://127.0.0.1:5000".to_string()
}

fn default_farm_timeout() -> u64 {
    10
}

fn default_export_timeout() -> u64 {
    180
}

impl Default for FarmConfig {
    fn default() -> Self {
        Self {
            base_url: default_farm_url(),
            timeout_secs: default_farm_timeout(),
            export_timeout_secs: default_export_timeout(),
        }
    }
}

/// 登录子服务配置
#[derive(Debug, Clone, Deserialize)]
pub struct LoginConfig {
    /// 登录子服务基础 URL
    #[serde(default = "default_login_url")]
    pub base_url: String,

    /// 登录请求超时 (秒), 模拟器 UI 登录很慢
    #[serde(default = "default_login_timeout")]
    pub timeout_secs: u64,
}

fn default_login_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_login_timeout() -> u64 {
    240
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            base_url: default_login_url(),
            timeout_secs: default_login_timeout(),
        }
    }
}

/// 数据库配置
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// 数据库文件路径
    #[serde(default = "default_db_path")]
    pub path: String,

    /// 最大连接数
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_db_path() -> String {
    "data/boxhive.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

impl DatabaseConfig {
    /// 获取数据库 URL
    pub fn database_url(&self) -> String {
        format!("sqlite:{}?mode=rwc", self.path)
    }
}

/// 引擎配置
///
/// 等待时长均为经验调参值, 保留为可配置默认值而非硬编码不变量
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// 重试次数上限 (不含首次尝试)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// 重试基础延迟 (秒), 指数退避: base * 2^attempt
    #[serde(default = "default_retry_base")]
    pub retry_base_secs: u64,

    /// 登录前随机抖动下限 (秒)
    #[serde(default = "default_jitter_min")]
    pub pre_login_jitter_min_secs: f64,

    /// 登录前随机抖动上限 (秒)
    #[serde(default = "default_jitter_max")]
    pub pre_login_jitter_max_secs: f64,

    /// 登录后 UI 稳定等待 (秒)
    #[serde(default = "default_ui_settle")]
    pub ui_settle_secs: u64,

    /// RPC 修复黑名单冷却 (秒)
    #[serde(default = "default_blacklist_cooldown")]
    pub rpc_blacklist_cooldown_secs: u64,

    /// 轻量修复重启后等待 (秒)
    #[serde(default = "default_light_wait")]
    pub repair_light_wait_secs: u64,

    /// 完整修复重启后等待 (秒)
    #[serde(default = "default_full_wait")]
    pub repair_full_wait_secs: u64,

    /// RPC TCP 探测超时 (秒)
    #[serde(default = "default_probe_timeout")]
    pub rpc_probe_timeout_secs: u64,

    /// 备份导出目标目录
    #[serde(default = "default_backup_dir")]
    pub backup_dir: String,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base() -> u64 {
    5
}

fn default_jitter_min() -> f64 {
    2.0
}

fn default_jitter_max() -> f64 {
    6.0
}

fn default_ui_settle() -> u64 {
    3
}

fn default_blacklist_cooldown() -> u64 {
    30 * 60
}

fn default_light_wait() -> u64 {
    30
}

fn default_full_wait() -> u64 {
    60
}

fn default_probe_timeout() -> u64 {
    3
}

fn default_backup_dir() -> String {
    "data/backups".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_base_secs: default_retry_base(),
            pre_login_jitter_min_secs: default_jitter_min(),
            pre_login_jitter_max_secs: default_jitter_max(),
            ui_settle_secs: default_ui_settle(),
            rpc_blacklist_cooldown_secs: default_blacklist_cooldown(),
            repair_light_wait_secs: default_light_wait(),
            repair_full_wait_secs: default_full_wait(),
            rpc_probe_timeout_secs: default_probe_timeout(),
            backup_dir: default_backup_dir(),
        }
    }
}

/// 端口分配配置
#[derive(Debug, Clone, Deserialize)]
pub struct PortConfig {
    /// u2 端口基数, 实例位 1 → 5001
    #[serde(default = "default_u2_base")]
    pub u2_base: u16,

    /// RPC 端口基数, 实例位 1 → 7101
    #[serde(default = "default_rpc_base")]
    pub rpc_base: u16,

    /// 新端口扫描尝试上限
    #[serde(default = "default_scan_attempts")]
    pub scan_max_attempts: u32,
}

fn default_u2_base() -> u16 {
    5000
}

fn default_rpc_base() -> u16 {
    7100
}

fn default_scan_attempts() -> u32 {
    1000
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            u2_base: default_u2_base(),
            rpc_base: default_rpc_base(),
            scan_max_attempts: default_scan_attempts(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.farm.base_url, "http://127.0.0.1:5000");
        assert_eq!(config.login.base_url, "http://127.0.0.1:8000");
        assert_eq!(config.login.timeout_secs, 240);
        assert_eq!(config.engine.max_retries, 3);
        assert_eq!(config.engine.rpc_blacklist_cooldown_secs, 1800);
        assert_eq!(config.ports.u2_base, 5000);
        assert_eq!(config.ports.rpc_base, 7100);
        assert_eq!(config.ports.scan_max_attempts, 1000);
    }

    #[test]
    fn test_database_url() {
        let config = DatabaseConfig::default();
        assert_eq!(config.database_url(), "sqlite:data/boxhive.db?mode=rwc");
    }
}

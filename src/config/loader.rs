//! Configuration Loader
//!
//! 实现多源配置加载与合并逻辑
//!
//! 优先级（从高到低）：
//! 1. 环境变量
//! 2. 配置文件（config.toml）
//! 3. 默认值

use config::{Config, ConfigError as ConfigCrateError, Environment, File};
use std::path::Path;
use thiserror::Error;

use super::types::AppConfig;

/// 配置加载错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigCrateError> for ConfigError {
    fn from(err: ConfigCrateError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

/// 配置文件搜索路径
const CONFIG_FILE_NAMES: &[&str] = &["config", "config.local"];

/// 加载应用配置
///
/// # 环境变量示例
/// - `BOXHIVE_FARM__BASE_URL=http://farm-host:5000`
/// - `BOXHIVE_LOGIN__BASE_URL=http://login-host:8000`
/// - `BOXHIVE_DATABASE__PATH=/data/boxhive.db`
/// - `BOXHIVE_ENGINE__MAX_RETRIES=5`
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from_path(None)
}

/// 从指定路径加载配置
pub fn load_config_from_path(config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder();

    // 1. 默认值（最低优先级）
    builder = builder
        .set_default("farm.base_url", "http://127.0.0.1:5000")?
        .set_default("farm.timeout_secs", 10)?
        .set_default("farm.export_timeout_secs", 180)?
        .set_default("login.base_url", "http://127.0.0.1:8000")?
        .set_default("login.timeout_secs", 240)?
        .set_default("database.path", "data/boxhive.db")?
        .set_default("database.max_connections", 5)?
        .set_default("engine.max_retries", 3)?
        .set_default("engine.retry_base_secs", 5)?
        .set_default("engine.pre_login_jitter_min_secs", 2.0)?
        .set_default("engine.pre_login_jitter_max_secs", 6.0)?
        .set_default("engine.ui_settle_secs", 3)?
        .set_default("engine.rpc_blacklist_cooldown_secs", 30 * 60)?
        .set_default("engine.repair_light_wait_secs", 30)?
        .set_default("engine.repair_full_wait_secs", 60)?
        .set_default("engine.rpc_probe_timeout_secs", 3)?
        .set_default("engine.backup_dir", "data/backups")?
        .set_default("ports.u2_base", 5000)?
        .set_default("ports.rpc_base", 7100)?
        .set_default("ports.scan_max_attempts", 1000)?
        .set_default("log.level", "info")?;

    // 2. 配置文件（如果存在）
    if let Some(path) = config_path {
        builder = builder.add_source(File::from(path).required(true));
    } else {
        for name in CONFIG_FILE_NAMES {
            builder = builder.add_source(File::with_name(name).required(false));
        }
    }

    // 3. 环境变量（最高优先级）
    // 前缀: BOXHIVE_, 层级分隔符: __ (双下划线)
    builder = builder.add_source(
        Environment::with_prefix("BOXHIVE")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;

    let app_config: AppConfig = config
        .try_deserialize()
        .map_err(|e| ConfigError::ParseError(format!("Failed to deserialize config: {}", e)))?;

    validate_config(&app_config)?;

    Ok(app_config)
}

/// 验证配置有效性
fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.farm.base_url.is_empty() {
        return Err(ConfigError::ValidationError(
            "Farm base URL cannot be empty".to_string(),
        ));
    }

    if config.login.base_url.is_empty() {
        return Err(ConfigError::ValidationError(
            "Login service base URL cannot be empty".to_string(),
        ));
    }

    if config.database.path.is_empty() {
        return Err(ConfigError::ValidationError(
            "Database path cannot be empty".to_string(),
        ));
    }

    if config.engine.pre_login_jitter_min_secs > config.engine.pre_login_jitter_max_secs {
        return Err(ConfigError::ValidationError(
            "Jitter min cannot exceed jitter max".to_string(),
        ));
    }

    if config.ports.scan_max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "Port scan attempts cannot be 0".to_string(),
        ));
    }

    Ok(())
}

/// 打印配置信息（用于启动时日志）
pub fn print_config(config: &AppConfig) {
    tracing::info!("=== Application Configuration ===");
    tracing::info!("Farm API: {}", config.farm.base_url);
    tracing::info!("Farm Timeout: {}s", config.farm.timeout_secs);
    tracing::info!("Login Service: {}", config.login.base_url);
    tracing::info!("Login Timeout: {}s", config.login.timeout_secs);
    tracing::info!("Database: {}", config.database.path);
    tracing::info!(
        "Retry Policy: {} retries, base {}s",
        config.engine.max_retries,
        config.engine.retry_base_secs
    );
    tracing::info!(
        "Port Bases: u2={}, rpc={}",
        config.ports.u2_base,
        config.ports.rpc_base
    );
    tracing::info!("Backup Dir: {}", config.engine.backup_dir);
    tracing::info!("Log Level: {}", config.log.level);
    tracing::info!("=================================");
}

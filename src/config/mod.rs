//! Configuration - 配置加载与类型定义

mod loader;
mod types;

pub use loader::{load_config, load_config_from_path, print_config, ConfigError};
pub use types::{
    AppConfig, DatabaseConfig, EngineConfig, FarmConfig, LogConfig, LoginConfig, PortConfig,
};

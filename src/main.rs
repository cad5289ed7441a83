//! Boxhive - 设备农场批量账号任务引擎
//!
//! 启动流程: 配置 → 日志 → 数据库 → 适配器 → 引擎装配 → 等待关闭信号。
//! 对外接入面 (HTTP/CLI) 以库的 application 层为界另行挂载。

use std::sync::Arc;

use boxhive::application::{CancelTaskHandler, GetRepairStatsHandler, QueryTaskStatusHandler};
use boxhive::config::{load_config, print_config};
use boxhive::infrastructure::events::WsEventPublisher;
use boxhive::infrastructure::farm::{HttpFarmClient, HttpLoginClient};
use boxhive::infrastructure::memory::TaskRegistry;
use boxhive::infrastructure::persistence::sqlite::{create_pool, run_migrations, SqliteTaskStore};
use boxhive::infrastructure::worker::{
    BatchCoordinator, DeviceWorkflow, PortAllocator, RpcRepairCoordinator, TokioTcpProbe,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载配置（优先级：环境变量 > 配置文件 > 默认值）
    let config = load_config().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    // 初始化日志
    let log_filter = format!("{},boxhive={}", config.log.level, config.log.level);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_filter)),
        )
        .init();

    tracing::info!("Boxhive - 设备农场批量账号任务引擎");
    print_config(&config);

    // 确保数据目录存在
    tokio::fs::create_dir_all(&config.engine.backup_dir).await?;
    if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    // 初始化数据库
    let pool = create_pool(&config.database).await?;
    run_migrations(&pool).await?;
    let store = Arc::new(SqliteTaskStore::new(pool));

    // HTTP 适配器
    let farm = Arc::new(
        HttpFarmClient::new(&config.farm)
            .map_err(|e| anyhow::anyhow!("Failed to build farm client: {}", e))?,
    );
    let login = Arc::new(
        HttpLoginClient::new(&config.login)
            .map_err(|e| anyhow::anyhow!("Failed to build login client: {}", e))?,
    );
    // UI 状态检测复用登录子服务的检测端点
    let ui = Arc::new(
        boxhive::infrastructure::farm::HttpUiInspector::new(&config.login)
            .map_err(|e| anyhow::anyhow!("Failed to build UI inspector: {}", e))?,
    );

    // 事件发布器与任务注册表
    let publisher = WsEventPublisher::new().arc();
    let registry = TaskRegistry::new().arc();

    // 引擎装配
    let allocator = Arc::new(PortAllocator::new(
        farm.clone(),
        store.clone(),
        config.ports.clone(),
    ));
    let repair = Arc::new(RpcRepairCoordinator::new(
        farm.clone(),
        allocator.clone(),
        Arc::new(TokioTcpProbe),
        &config.engine,
    ));
    let workflow = Arc::new(DeviceWorkflow::new(
        farm,
        login,
        ui,
        store.clone(),
        repair.clone(),
        config.engine.clone(),
    ));
    let coordinator = BatchCoordinator::new(
        workflow,
        registry.clone(),
        store.clone(),
        publisher.clone(),
        &config.engine,
    );

    // 对外用例处理器 (接入面挂载点)
    let _start = boxhive::application::StartBatchHandler::new(coordinator, store);
    let _cancel = CancelTaskHandler::new(registry.clone());
    let _status = QueryTaskStatusHandler::new(registry.clone());
    let _repair_stats = GetRepairStatsHandler::new(repair.clone());

    tracing::info!("Engine initialized, waiting for shutdown signal");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to listen for ctrl-c: {}", e))?;
    tracing::info!("Received shutdown signal");

    // 优雅关闭: 取消所有活动任务
    for snapshot in registry.snapshot() {
        registry.cancel(&snapshot.task_id);
    }

    let stats = repair.stats();
    tracing::info!(
        total_attempts = stats.total_attempts,
        successful_repairs = stats.successful_repairs,
        failed_repairs = stats.failed_repairs,
        "Engine shutdown complete"
    );

    Ok(())
}

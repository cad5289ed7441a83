//! Device Workflow - 单设备登录/备份流水线
//!
//! 一个 DeviceWorkItem 的完整处理: 抖动 → RPC 自愈 → 登录 →
//! 封号复核 → UI 落定复查 → 备份闸门 → 导出 → 容器回收。
//!
//! 容器回收是硬约束: 除登录保活模式外, 流水线的每个出口
//! (成功/失败/封号/取消) 都必须到达 remove_container。
//! 取消 (`EngineError::Cancelled`) 是唯一向上传播的错误,
//! 其余故障一律折叠为失败结果交给批次协调器分类。

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::application::error::EngineError;
use crate::application::ports::{
    DeviceFarmPort, LoginReply, LoginRequest, LoginServicePort, TaskStorePort, UiInspectorPort,
};
use crate::config::EngineConfig;
use crate::domain::device::DeviceWorkItem;
use crate::domain::task::KeywordClassifier;

use super::port_allocator::PortPair;
use super::rpc_repair::{RepairLevel, RpcRepairCoordinator};
use super::task_state::TaskState;

/// 工作流模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowMode {
    /// 登录 + 备份 + 回收
    Full,
    /// 仅登录, 保留容器在线
    LoginOnly,
    /// 仅备份已登录的容器, 之后回收
    BackupOnly,
}

impl WorkflowMode {
    /// 任务登记用的类型标签
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowMode::Full => "login_backup",
            WorkflowMode::LoginOnly => "login_only",
            WorkflowMode::BackupOnly => "backup_only",
        }
    }
}

/// 单设备处理结果 (分类前的原始事实)
#[derive(Debug, Clone)]
pub struct WorkflowOutcome {
    pub success: bool,
    pub suspended: bool,
    pub message: String,
    pub backed_up: bool,
}

impl WorkflowOutcome {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            suspended: false,
            message: message.into(),
            backed_up: false,
        }
    }
}

/// 单设备工作流执行器
pub struct DeviceWorkflow {
    farm: Arc<dyn DeviceFarmPort>,
    login: Arc<dyn LoginServicePort>,
    ui: Arc<dyn UiInspectorPort>,
    store: Arc<dyn TaskStorePort>,
    repair: Arc<RpcRepairCoordinator>,
    config: EngineConfig,
}

impl DeviceWorkflow {
    pub fn new(
        farm: Arc<dyn DeviceFarmPort>,
        login: Arc<dyn LoginServicePort>,
        ui: Arc<dyn UiInspectorPort>,
        store: Arc<dyn TaskStorePort>,
        repair: Arc<RpcRepairCoordinator>,
        config: EngineConfig,
    ) -> Self {
        Self {
            farm,
            login,
            ui,
            store,
            repair,
            config,
        }
    }

    /// 执行单设备工作流
    pub async fn run(
        &self,
        mode: WorkflowMode,
        item: &DeviceWorkItem,
        state: &TaskState,
        cancel: &CancellationToken,
    ) -> Result<WorkflowOutcome, EngineError> {
        // 批内错峰: 随机抖动, 避免同一宿主机瞬时压满
        let jitter_secs = {
            let mut rng = rand::thread_rng();
            rng.gen_range(
                self.config.pre_login_jitter_min_secs..=self.config.pre_login_jitter_max_secs,
            )
        };
        if !state.wait_with_cancel(Duration::from_secs_f64(jitter_secs)).await {
            return Err(EngineError::Cancelled);
        }

        let container_name = match self.resolve_container_name(item).await {
            Some(name) => name,
            None => {
                return Ok(WorkflowOutcome::failed(format!(
                    "No running container at slot {} on {}",
                    item.instance_slot, item.box_ip
                )))
            }
        };

        let result = self
            .run_pipeline(mode, item, &container_name, state, cancel)
            .await;

        // 容器回收: 登录保活模式除外, 任何出口都要执行
        if mode != WorkflowMode::LoginOnly {
            if let Err(err) = self
                .farm
                .remove_container(&item.box_ip, &container_name)
                .await
            {
                tracing::warn!(
                    box_ip = %item.box_ip,
                    container = %container_name,
                    "Container removal failed: {}",
                    err
                );
            }
        }

        result
    }

    async fn resolve_container_name(&self, item: &DeviceWorkItem) -> Option<String> {
        if let Some(name) = &item.container_name {
            return Some(name.clone());
        }
        match self.farm.list_containers(&item.box_ip).await {
            Ok(containers) => containers
                .into_iter()
                .find(|c| c.index == item.instance_slot && c.is_running())
                .map(|c| c.names),
            Err(err) => {
                tracing::warn!(
                    box_ip = %item.box_ip,
                    slot = item.instance_slot,
                    "Container listing failed: {}",
                    err
                );
                None
            }
        }
    }

    async fn run_pipeline(
        &self,
        mode: WorkflowMode,
        item: &DeviceWorkItem,
        container_name: &str,
        state: &TaskState,
        cancel: &CancellationToken,
    ) -> Result<WorkflowOutcome, EngineError> {
        if state.check_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let ports = match self
            .repair
            .ensure_rpc_available(
                &item.box_ip,
                &item.device_ip,
                container_name,
                item.instance_slot,
                RepairLevel::Light,
                cancel,
            )
            .await
        {
            Ok(ports) => ports,
            Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
            Err(EngineError::RpcUnavailable { .. }) => {
                return Ok(WorkflowOutcome::failed("RPC repair failed"));
            }
            Err(err) => return Ok(WorkflowOutcome::failed(err.to_string())),
        };

        if mode == WorkflowMode::BackupOnly {
            return self.backup_stage(item, container_name, &ports, state).await;
        }

        let reply = match self.login_stage(item, &ports, state).await {
            Ok(reply) => reply,
            Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
            Err(err) => return Ok(WorkflowOutcome::failed(err.to_string())),
        };

        let mut logged_in = reply.success;
        let mut suspended = KeywordClassifier::message_indicates_suspension(&reply.message)
            || reply.status.as_deref() == Some("suspended");
        let mut message = reply.message.clone();

        // 已知封号列表复核 (尽力而为, 查询失败不阻断)
        match self.login.suspended_usernames().await {
            Ok(list) => {
                if list.iter().any(|u| u == &item.account.username) {
                    tracing::info!(
                        username = %item.account.username,
                        "Account is on the known suspended list"
                    );
                    suspended = true;
                    logged_in = false;
                    if message.is_empty() {
                        message = "账户已封停".to_string();
                    }
                }
            }
            Err(err) => {
                tracing::debug!("Suspended list lookup failed, skipping: {}", err);
            }
        }

        // 登录成功后 UI 落定复查 (宽松判定: UI 报错时保留 API 结论)
        if logged_in && !suspended {
            if !state
                .wait_with_cancel(Duration::from_secs(self.config.ui_settle_secs))
                .await
            {
                return Err(EngineError::Cancelled);
            }

            match self.ui.confirm_logged_in(&item.device_ip, ports.u2_port).await {
                Ok(check) => {
                    if check.suspended {
                        suspended = true;
                        logged_in = false;
                        message = check.detail;
                    } else if !check.logged_in {
                        logged_in = false;
                        message = check.detail;
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        device = %item.display_name(),
                        "UI re-check failed, keeping API login result: {}",
                        err
                    );
                }
            }
        }

        let mut backed_up = false;
        if mode == WorkflowMode::Full && logged_in && !suspended {
            // 备份闸门: 二次 UI 确认, UI 报错时回退到 API 结论放行
            let gate_open = match self.ui.confirm_logged_in(&item.device_ip, ports.u2_port).await {
                Ok(check) => check.logged_in && !check.suspended,
                Err(_) => true,
            };
            if gate_open {
                backed_up = self.export_backup(item, container_name).await;
            } else {
                tracing::info!(
                    device = %item.display_name(),
                    "Backup gate closed by UI confirmation"
                );
            }
        }

        if suspended {
            if let Err(err) = self
                .store
                .mark_account_suspended(&item.account.username)
                .await
            {
                tracing::debug!(
                    username = %item.account.username,
                    "Failed to persist suspension flag: {}",
                    err
                );
            }
        }

        Ok(WorkflowOutcome {
            success: logged_in && !suspended,
            suspended,
            message,
            backed_up,
        })
    }

    /// 登录调用。瞬态传输错误按任务重试策略退避重试;
    /// 服务明确拒绝折叠为失败应答, 不消耗重试额度。
    async fn login_stage(
        &self,
        item: &DeviceWorkItem,
        ports: &PortPair,
        state: &TaskState,
    ) -> Result<LoginReply, EngineError> {
        let request = LoginRequest {
            device_ip: item.device_ip.clone(),
            u2_port: ports.u2_port,
            rpc_port: ports.rpc_port,
            username: item.account.username.clone(),
            password: item.account.password.clone(),
            secret_key: item.account.secret_key.clone(),
        };

        state
            .run_with_retry("login", || {
                let request = request.clone();
                async move {
                    match self.login.login(&request).await {
                        Ok(reply) => Ok(reply),
                        Err(err) if err.is_transient() => Err(EngineError::Login(err)),
                        Err(err) => Ok(LoginReply {
                            success: false,
                            message: err.to_string(),
                            status: None,
                        }),
                    }
                }
            })
            .await
    }

    /// 仅备份模式: UI 确认仍在登录态后导出。
    /// UI 报错时宽松放行 (容器是上一轮登录留下的, 大概率还在登录态)。
    async fn backup_stage(
        &self,
        item: &DeviceWorkItem,
        container_name: &str,
        ports: &PortPair,
        state: &TaskState,
    ) -> Result<WorkflowOutcome, EngineError> {
        if state.check_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let (logged_in, suspended) =
            match self.ui.confirm_logged_in(&item.device_ip, ports.u2_port).await {
                Ok(check) => (check.logged_in, check.suspended),
                Err(err) => {
                    tracing::warn!(
                        device = %item.display_name(),
                        "UI check failed before backup, assuming logged in: {}",
                        err
                    );
                    (true, false)
                }
            };

        if suspended {
            return Ok(WorkflowOutcome {
                success: false,
                suspended: true,
                message: "账户已封停".to_string(),
                backed_up: false,
            });
        }
        if !logged_in {
            return Ok(WorkflowOutcome::failed("Account is not logged in"));
        }

        let backed_up = self.export_backup(item, container_name).await;
        if backed_up {
            Ok(WorkflowOutcome {
                success: true,
                suspended: false,
                message: String::new(),
                backed_up: true,
            })
        } else {
            Ok(WorkflowOutcome::failed("Backup export failed"))
        }
    }

    /// 导出备份到 `{backup_dir}/{username}.tar.gz`,
    /// 成功后置位账号的持久化备份标记 (尽力而为)。
    async fn export_backup(&self, item: &DeviceWorkItem, container_name: &str) -> bool {
        let local_path = format!(
            "{}/{}.tar.gz",
            self.config.backup_dir.trim_end_matches('/'),
            item.account.username
        );

        if let Err(err) = self
            .farm
            .export_container(&item.box_ip, container_name, &local_path)
            .await
        {
            tracing::warn!(
                device = %item.display_name(),
                local_path = %local_path,
                "Backup export failed: {}",
                err
            );
            return false;
        }

        let account_id = match item.account.account_id {
            Some(id) => Some(id),
            None => self
                .store
                .account_id_by_username(&item.account.username)
                .await
                .unwrap_or_else(|err| {
                    tracing::debug!("Account lookup failed: {}", err);
                    None
                }),
        };

        match account_id {
            Some(id) => {
                if let Err(err) = self.store.mark_account_backed_up(id).await {
                    tracing::warn!(
                        username = %item.account.username,
                        "Failed to persist backup flag: {}",
                        err
                    );
                }
            }
            None => {
                tracing::info!(
                    username = %item.account.username,
                    "Account not in database, skipping backup flag"
                );
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PortConfig;
    use crate::infrastructure::memory::TaskRegistry;
    use crate::infrastructure::worker::PortAllocator;
    use crate::test_support::{
        make_task_state, FakeFarm, FakeLogin, FakeProbe, FakeStore, FakeUi,
    };

    struct Fixture {
        workflow: DeviceWorkflow,
        farm: Arc<FakeFarm>,
        login: Arc<FakeLogin>,
        store: Arc<FakeStore>,
        state: Arc<TaskState>,
        cancel: CancellationToken,
    }

    fn fixture(farm: FakeFarm, login: FakeLogin, ui: FakeUi) -> Fixture {
        let farm = Arc::new(farm);
        let login = Arc::new(login);
        let store = Arc::new(FakeStore::default());
        let allocator = Arc::new(PortAllocator::new(
            farm.clone(),
            store.clone(),
            PortConfig::default(),
        ));
        let repair = Arc::new(RpcRepairCoordinator::new(
            farm.clone(),
            allocator.clone(),
            Arc::new(FakeProbe::always_up()),
            &EngineConfig::default(),
        ));
        let registry = TaskRegistry::new().arc();
        let state = make_task_state("wf-test", registry);

        let workflow = DeviceWorkflow::new(
            farm.clone(),
            login.clone(),
            Arc::new(ui),
            store.clone(),
            repair,
            EngineConfig::default(),
        );

        Fixture {
            workflow,
            farm,
            login,
            store,
            state,
            cancel: CancellationToken::new(),
        }
    }

    fn work_item() -> DeviceWorkItem {
        DeviceWorkItem {
            box_ip: "10.0.0.1".to_string(),
            device_ip: "10.0.0.5".to_string(),
            container_name: Some("dev_3".to_string()),
            instance_slot: 3,
            account: crate::domain::device::AccountCredentials {
                username: "alice".to_string(),
                password: "pw".to_string(),
                secret_key: "2fa".to_string(),
                account_id: Some(1),
            },
            device_id: Some(1),
            device_name: Some("dev_3".to_string()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_workflow_success_backs_up_and_removes() {
        let f = fixture(
            FakeFarm::default(),
            FakeLogin::succeeding(),
            FakeUi::logged_in(),
        );

        let outcome = f
            .workflow
            .run(WorkflowMode::Full, &work_item(), &f.state, &f.cancel)
            .await
            .unwrap();

        assert!(outcome.success);
        assert!(outcome.backed_up);
        assert!(!outcome.suspended);
        assert!(f.farm.removed_containers().contains(&"dev_3".to_string()));
        assert_eq!(f.farm.exported_paths(), vec!["data/backups/alice.tar.gz"]);
        assert!(f.store.backed_up_ids().contains(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ui_recheck_suspension_overrides_api_success() {
        let f = fixture(
            FakeFarm::default(),
            FakeLogin::succeeding(),
            FakeUi::suspended("账户已封停"),
        );

        let outcome = f
            .workflow
            .run(WorkflowMode::Full, &work_item(), &f.state, &f.cancel)
            .await
            .unwrap();

        assert!(!outcome.success);
        assert!(outcome.suspended);
        assert!(!outcome.backed_up);
        assert!(f.store.suspended_usernames().contains(&"alice".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_failure_still_removes_container() {
        let f = fixture(
            FakeFarm::default(),
            FakeLogin::failing("wrong password"),
            FakeUi::logged_in(),
        );

        let outcome = f
            .workflow
            .run(WorkflowMode::Full, &work_item(), &f.state, &f.cancel)
            .await
            .unwrap();

        assert!(!outcome.success);
        assert!(!outcome.suspended);
        assert!(!outcome.backed_up);
        assert!(f.farm.removed_containers().contains(&"dev_3".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspension_marker_in_reply_flags_suspended() {
        let f = fixture(
            FakeFarm::default(),
            FakeLogin::failing("account suspended by platform"),
            FakeUi::logged_in(),
        );

        let outcome = f
            .workflow
            .run(WorkflowMode::Full, &work_item(), &f.state, &f.cancel)
            .await
            .unwrap();

        assert!(!outcome.success);
        assert!(outcome.suspended);
        assert!(!outcome.backed_up);
        assert!(f.store.suspended_usernames().contains(&"alice".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspended_list_overrides_api_success() {
        let f = fixture(
            FakeFarm::default(),
            FakeLogin::succeeding().with_suspended_list(vec!["alice".to_string()]),
            FakeUi::logged_in(),
        );

        let outcome = f
            .workflow
            .run(WorkflowMode::Full, &work_item(), &f.state, &f.cancel)
            .await
            .unwrap();

        assert!(!outcome.success);
        assert!(outcome.suspended);
        assert!(!outcome.backed_up);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ui_recheck_flips_login_to_failed() {
        let f = fixture(
            FakeFarm::default(),
            FakeLogin::succeeding(),
            FakeUi::not_logged_in("login page detected"),
        );

        let outcome = f
            .workflow
            .run(WorkflowMode::Full, &work_item(), &f.state, &f.cancel)
            .await
            .unwrap();

        assert!(!outcome.success);
        assert!(!outcome.suspended);
        assert!(!outcome.backed_up);
        assert_eq!(outcome.message, "login page detected");
    }

    #[tokio::test(start_paused = true)]
    async fn test_ui_error_is_lenient() {
        // UI 检测报错时保留 API 登录结论, 备份继续
        let f = fixture(
            FakeFarm::default(),
            FakeLogin::succeeding(),
            FakeUi::erroring(),
        );

        let outcome = f
            .workflow
            .run(WorkflowMode::Full, &work_item(), &f.state, &f.cancel)
            .await
            .unwrap();

        assert!(outcome.success);
        assert!(outcome.backed_up);
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_only_keeps_container() {
        let f = fixture(
            FakeFarm::default(),
            FakeLogin::succeeding(),
            FakeUi::logged_in(),
        );

        let outcome = f
            .workflow
            .run(WorkflowMode::LoginOnly, &work_item(), &f.state, &f.cancel)
            .await
            .unwrap();

        assert!(outcome.success);
        assert!(!outcome.backed_up);
        assert!(f.farm.removed_containers().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backup_only_skips_login() {
        let f = fixture(
            FakeFarm::default(),
            FakeLogin::failing("should not be called"),
            FakeUi::logged_in(),
        );
        // 账号 ID 未随工作项下发, 走数据库回查
        f.store.preset_account("alice", 7);
        let mut item = work_item();
        item.account.account_id = None;

        let outcome = f
            .workflow
            .run(WorkflowMode::BackupOnly, &item, &f.state, &f.cancel)
            .await
            .unwrap();

        assert!(outcome.success);
        assert!(outcome.backed_up);
        assert_eq!(f.login.login_calls(), 0);
        assert!(f.store.backed_up_ids().contains(&7));
        assert!(f.farm.removed_containers().contains(&"dev_3".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_login_error_is_retried() {
        let f = fixture(
            FakeFarm::default(),
            FakeLogin::transient_then_success(2),
            FakeUi::logged_in(),
        );

        let outcome = f
            .workflow
            .run(WorkflowMode::Full, &work_item(), &f.state, &f.cancel)
            .await
            .unwrap();

        assert!(outcome.success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_export_failure_reports_login_without_backup() {
        let f = fixture(
            FakeFarm::default().failing_export(),
            FakeLogin::succeeding(),
            FakeUi::logged_in(),
        );

        let outcome = f
            .workflow
            .run(WorkflowMode::Full, &work_item(), &f.state, &f.cancel)
            .await
            .unwrap();

        // 工作流上报原始事实 (登录成功 + 无备份), 批次协调器据此降级为 login-only
        assert!(outcome.success);
        assert!(!outcome.backed_up);
        assert!(f.store.backed_up_ids().is_empty());
        assert!(f.farm.removed_containers().contains(&"dev_3".to_string()));
    }
}

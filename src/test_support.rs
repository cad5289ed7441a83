//! 测试夹具: 各端口的内存假实现, 带调用记录

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::application::ports::{
    ApiInfo, ContainerInfo, DeviceFarmPort, FarmError, LoginError, LoginReply, LoginRequest,
    LoginServicePort, NotifierPort, PortKind, StoreError, TaskStorePort, UiError, UiInspectorPort,
    UiLoginCheck,
};
use crate::domain::task::{AggregateStatus, DeviceOutcome};
use crate::infrastructure::memory::TaskRegistry;
use crate::infrastructure::worker::{RetryPolicy, TaskState, TcpProbe};

/// 测试用 TaskState 构造
pub fn make_task_state(task_id: &str, registry: Arc<TaskRegistry>) -> Arc<TaskState> {
    Arc::new(TaskState::new(
        task_id,
        1,
        RetryPolicy::default(),
        registry,
        Arc::new(FakeStore::default()),
        Arc::new(FakeNotifier::default()),
    ))
}

// ---------------------------------------------------------------------------
// FakeStore
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeStore {
    created: Mutex<Vec<(String, String)>>,
    statuses: Mutex<Vec<(String, String)>>,
    backed_up: Mutex<Vec<i64>>,
    suspended: Mutex<Vec<String>>,
    accounts: Mutex<HashMap<String, i64>>,
    reserved: Mutex<HashMap<(String, &'static str), HashSet<u16>>>,
}

impl FakeStore {
    pub fn created_tasks(&self) -> Vec<(String, String)> {
        self.created.lock().unwrap().clone()
    }

    pub fn recorded_statuses(&self, task_id: &str) -> Vec<String> {
        self.statuses
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == task_id)
            .map(|(_, s)| s.clone())
            .collect()
    }

    pub fn backed_up_ids(&self) -> Vec<i64> {
        self.backed_up.lock().unwrap().clone()
    }

    pub fn suspended_usernames(&self) -> Vec<String> {
        self.suspended.lock().unwrap().clone()
    }

    pub fn preset_account(&self, username: &str, id: i64) {
        self.accounts.lock().unwrap().insert(username.to_string(), id);
    }

    pub fn preset_reserved(&self, box_ip: &str, kind: PortKind, port: u16) {
        self.reserved
            .lock()
            .unwrap()
            .entry((box_ip.to_string(), kind.as_str()))
            .or_default()
            .insert(port);
    }
}

#[async_trait]
impl TaskStorePort for FakeStore {
    async fn create_task(&self, task_id: &str, task_type: &str) -> Result<(), StoreError> {
        self.created
            .lock()
            .unwrap()
            .push((task_id.to_string(), task_type.to_string()));
        Ok(())
    }

    async fn ensure_account(&self, username: &str) -> Result<i64, StoreError> {
        let mut accounts = self.accounts.lock().unwrap();
        if let Some(id) = accounts.get(username) {
            return Ok(*id);
        }
        let id = accounts.values().max().copied().unwrap_or(0) + 1;
        accounts.insert(username.to_string(), id);
        Ok(id)
    }

    async fn update_task_status(&self, task_id: &str, status: &str) -> Result<(), StoreError> {
        self.statuses
            .lock()
            .unwrap()
            .push((task_id.to_string(), status.to_string()));
        Ok(())
    }

    async fn mark_account_backed_up(&self, account_id: i64) -> Result<(), StoreError> {
        self.backed_up.lock().unwrap().push(account_id);
        Ok(())
    }

    async fn mark_account_suspended(&self, username: &str) -> Result<(), StoreError> {
        self.suspended.lock().unwrap().push(username.to_string());
        Ok(())
    }

    async fn account_id_by_username(&self, username: &str) -> Result<Option<i64>, StoreError> {
        Ok(self.accounts.lock().unwrap().get(username).copied())
    }

    async fn reserved_ports(
        &self,
        box_ip: &str,
        kind: PortKind,
    ) -> Result<HashSet<u16>, StoreError> {
        Ok(self
            .reserved
            .lock()
            .unwrap()
            .get(&(box_ip.to_string(), kind.as_str()))
            .cloned()
            .unwrap_or_default())
    }

    async fn save_device_port(
        &self,
        box_ip: &str,
        _device_name: &str,
        kind: PortKind,
        port: u16,
    ) -> Result<(), StoreError> {
        self.preset_reserved(box_ip, kind, port);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeNotifier
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeNotifier {
    statuses: Mutex<Vec<(String, String)>>,
    progress: Mutex<Vec<(String, f64, String)>>,
    devices: Mutex<Vec<(String, DeviceOutcome)>>,
    finished: Mutex<Vec<(String, AggregateStatus, String)>>,
}

impl FakeNotifier {
    pub fn device_completed_count(&self, task_id: &str) -> usize {
        self.devices
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == task_id)
            .count()
    }

    pub fn finished(&self, task_id: &str) -> Option<(AggregateStatus, String)> {
        self.finished
            .lock()
            .unwrap()
            .iter()
            .find(|(id, _, _)| id == task_id)
            .map(|(_, status, message)| (*status, message.clone()))
    }

    pub fn last_progress(&self, task_id: &str) -> Option<f64> {
        self.progress
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _, _)| id == task_id)
            .last()
            .map(|(_, p, _)| *p)
    }
}

impl NotifierPort for FakeNotifier {
    fn on_status(&self, task_id: &str, message: &str) {
        self.statuses
            .lock()
            .unwrap()
            .push((task_id.to_string(), message.to_string()));
    }

    fn on_progress(&self, task_id: &str, percent: f64, message: &str) {
        self.progress
            .lock()
            .unwrap()
            .push((task_id.to_string(), percent, message.to_string()));
    }

    fn on_device_completed(&self, task_id: &str, outcome: &DeviceOutcome) {
        self.devices
            .lock()
            .unwrap()
            .push((task_id.to_string(), outcome.clone()));
    }

    fn on_task_finished(&self, task_id: &str, status: AggregateStatus, message: &str) {
        self.finished
            .lock()
            .unwrap()
            .push((task_id.to_string(), status, message.to_string()));
    }
}

// ---------------------------------------------------------------------------
// FakeFarm
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeFarm {
    containers: Mutex<HashMap<String, Vec<ContainerInfo>>>,
    api_info: Mutex<HashMap<(String, String), ApiInfo>>,
    api_info_fails: bool,
    reboot_fails: bool,
    export_fails: bool,
    removed: Mutex<Vec<String>>,
    rebooted: Mutex<Vec<String>>,
    exported: Mutex<Vec<String>>,
}

impl FakeFarm {
    pub fn with_container(self, box_ip: &str, index: u16, state: &str, names: &str) -> Self {
        self.containers
            .lock()
            .unwrap()
            .entry(box_ip.to_string())
            .or_default()
            .push(ContainerInfo {
                index,
                state: state.to_string(),
                names: names.to_string(),
            });
        self
    }

    pub fn with_api_info(self, box_ip: &str, name: &str, adb: &str, host_rpa: &str) -> Self {
        self.api_info.lock().unwrap().insert(
            (box_ip.to_string(), name.to_string()),
            ApiInfo {
                adb: Some(adb.to_string()),
                host_rpa: Some(host_rpa.to_string()),
            },
        );
        self
    }

    pub fn with_partial_api_info(self, box_ip: &str, name: &str, adb: &str) -> Self {
        self.api_info.lock().unwrap().insert(
            (box_ip.to_string(), name.to_string()),
            ApiInfo {
                adb: Some(adb.to_string()),
                host_rpa: None,
            },
        );
        self
    }

    pub fn failing_api_info(mut self) -> Self {
        self.api_info_fails = true;
        self
    }

    pub fn failing_reboot(mut self) -> Self {
        self.reboot_fails = true;
        self
    }

    pub fn failing_export(mut self) -> Self {
        self.export_fails = true;
        self
    }

    pub fn removed_containers(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }

    pub fn rebooted_containers(&self) -> Vec<String> {
        self.rebooted.lock().unwrap().clone()
    }

    pub fn exported_paths(&self) -> Vec<String> {
        self.exported.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeviceFarmPort for FakeFarm {
    async fn list_containers(&self, box_ip: &str) -> Result<Vec<ContainerInfo>, FarmError> {
        Ok(self
            .containers
            .lock()
            .unwrap()
            .get(box_ip)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_api_info(
        &self,
        box_ip: &str,
        container_name: &str,
    ) -> Result<ApiInfo, FarmError> {
        if self.api_info_fails {
            return Err(FarmError::Timeout);
        }
        Ok(self
            .api_info
            .lock()
            .unwrap()
            .get(&(box_ip.to_string(), container_name.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn reboot_container(&self, _box_ip: &str, container_name: &str) -> Result<(), FarmError> {
        if self.reboot_fails {
            return Err(FarmError::Api {
                code: 500,
                message: "reboot failed".to_string(),
            });
        }
        self.rebooted.lock().unwrap().push(container_name.to_string());
        Ok(())
    }

    async fn remove_container(&self, _box_ip: &str, container_name: &str) -> Result<(), FarmError> {
        self.removed.lock().unwrap().push(container_name.to_string());
        Ok(())
    }

    async fn export_container(
        &self,
        _box_ip: &str,
        _container_name: &str,
        local_path: &str,
    ) -> Result<(), FarmError> {
        if self.export_fails {
            return Err(FarmError::Api {
                code: 500,
                message: "export failed".to_string(),
            });
        }
        self.exported.lock().unwrap().push(local_path.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeLogin
// ---------------------------------------------------------------------------

type LoginBehavior = Arc<dyn Fn(&str) -> Result<bool, String> + Send + Sync>;

pub struct FakeLogin {
    behavior: LoginBehavior,
    suspended_list: Vec<String>,
    transient_failures: AtomicU32,
    calls: AtomicU64,
}

impl FakeLogin {
    pub fn succeeding() -> Self {
        Self::per_user(|_| Ok(true))
    }

    pub fn failing(message: &str) -> Self {
        let message = message.to_string();
        Self::per_user(move |_| Err(message.clone()))
    }

    /// 按用户名定制行为: Ok(true)=成功, Ok(false)=普通失败, Err(msg)=带消息失败
    pub fn per_user<F>(behavior: F) -> Self
    where
        F: Fn(&str) -> Result<bool, String> + Send + Sync + 'static,
    {
        Self {
            behavior: Arc::new(behavior),
            suspended_list: Vec::new(),
            transient_failures: AtomicU32::new(0),
            calls: AtomicU64::new(0),
        }
    }

    /// 前 n 次调用返回瞬态网络错误, 之后成功
    pub fn transient_then_success(n: u32) -> Self {
        let mut login = Self::succeeding();
        login.transient_failures = AtomicU32::new(n);
        login
    }

    pub fn with_suspended_list(mut self, usernames: Vec<String>) -> Self {
        self.suspended_list = usernames;
        self
    }

    pub fn login_calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LoginServicePort for FakeLogin {
    async fn login(&self, request: &LoginRequest) -> Result<LoginReply, LoginError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(LoginError::Network("connection reset".to_string()));
        }

        match (self.behavior)(&request.username) {
            Ok(true) => Ok(LoginReply {
                success: true,
                message: String::new(),
                status: None,
            }),
            Ok(false) => Ok(LoginReply {
                success: false,
                message: "login failed".to_string(),
                status: None,
            }),
            Err(message) => Ok(LoginReply {
                success: false,
                message,
                status: None,
            }),
        }
    }

    async fn suspended_usernames(&self) -> Result<Vec<String>, LoginError> {
        Ok(self.suspended_list.clone())
    }
}

// ---------------------------------------------------------------------------
// FakeUi
// ---------------------------------------------------------------------------

pub enum FakeUi {
    LoggedIn,
    NotLoggedIn(String),
    Suspended(String),
    Erroring,
}

impl FakeUi {
    pub fn logged_in() -> Self {
        FakeUi::LoggedIn
    }

    pub fn not_logged_in(detail: &str) -> Self {
        FakeUi::NotLoggedIn(detail.to_string())
    }

    pub fn suspended(detail: &str) -> Self {
        FakeUi::Suspended(detail.to_string())
    }

    pub fn erroring() -> Self {
        FakeUi::Erroring
    }
}

#[async_trait]
impl UiInspectorPort for FakeUi {
    async fn confirm_logged_in(
        &self,
        _device_ip: &str,
        _u2_port: u16,
    ) -> Result<UiLoginCheck, UiError> {
        match self {
            FakeUi::LoggedIn => Ok(UiLoginCheck {
                logged_in: true,
                suspended: false,
                detail: String::new(),
            }),
            FakeUi::NotLoggedIn(detail) => Ok(UiLoginCheck {
                logged_in: false,
                suspended: false,
                detail: detail.clone(),
            }),
            FakeUi::Suspended(detail) => Ok(UiLoginCheck {
                logged_in: false,
                suspended: true,
                detail: detail.clone(),
            }),
            FakeUi::Erroring => Err(UiError("ui dump failed".to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// FakeProbe
// ---------------------------------------------------------------------------

pub struct FakeProbe {
    /// 前 threshold 次探测失败, 之后成功
    threshold: u32,
    count: AtomicU32,
}

impl FakeProbe {
    pub fn always_up() -> Self {
        Self::up_after(0)
    }

    pub fn always_down() -> Self {
        Self::up_after(u32::MAX)
    }

    pub fn up_after(threshold: u32) -> Self {
        Self {
            threshold,
            count: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl TcpProbe for FakeProbe {
    async fn probe(&self, _host: &str, _port: u16, _timeout: Duration) -> bool {
        let n = self.count.fetch_add(1, Ordering::SeqCst);
        n >= self.threshold
    }
}

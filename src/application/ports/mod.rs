//! Application Ports - 出站端口定义
//!
//! 定义引擎与外部协作者 (设备农场 / 登录子服务 / 持久化 / 推送) 的抽象接口

mod device_farm;
mod login_service;
mod notifier;
mod task_store;

pub use device_farm::{ApiInfo, ContainerInfo, DeviceFarmPort, FarmError};
pub use login_service::{
    LoginError, LoginReply, LoginRequest, LoginServicePort, UiError, UiInspectorPort, UiLoginCheck,
};
pub use notifier::NotifierPort;
pub use task_store::{PortKind, StoreError, TaskStorePort};

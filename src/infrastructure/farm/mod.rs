//! Farm - 设备农场与登录子服务的 HTTP 适配器

mod http_farm_client;
mod http_login_client;
mod http_ui_inspector;

pub use http_farm_client::HttpFarmClient;
pub use http_login_client::HttpLoginClient;
pub use http_ui_inspector::HttpUiInspector;

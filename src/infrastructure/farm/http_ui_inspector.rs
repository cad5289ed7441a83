//! HTTP UI Inspector
//!
//! 登录子服务暴露的设备 UI 状态检测端点的适配。服务端通过
//! uiautomator2 抓取当前界面并回报指标命中情况; 这里在指标之外
//! 再做一层封号关键字兜底。
//!
//! 宽松语义: 只要没有命中封号/登录失败/错误页指标, 即视为登录态,
//! 成功指标缺失不单独降级。

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::application::ports::{UiError, UiInspectorPort, UiLoginCheck};
use crate::config::LoginConfig;
use crate::domain::task::KeywordClassifier;

/// UI 检测超时 (秒)。抓取一次界面远快于完整登录。
const UI_CHECK_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct UiCheckReply {
    /// 命中的失败指标 (空表示未发现问题)
    #[serde(default)]
    failure_indicator: Option<String>,
    /// 服务端明确的封号判定
    #[serde(default)]
    suspended: bool,
}

/// HTTP UI 检测客户端
pub struct HttpUiInspector {
    client: Client,
    base_url: String,
}

impl HttpUiInspector {
    pub fn new(config: &LoginConfig) -> Result<Self, UiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(UI_CHECK_TIMEOUT_SECS))
            .build()
            .map_err(|e| UiError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl UiInspectorPort for HttpUiInspector {
    async fn confirm_logged_in(
        &self,
        device_ip: &str,
        u2_port: u16,
    ) -> Result<UiLoginCheck, UiError> {
        let url = format!("{}/api/account-status", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[("deviceIp", device_ip), ("u2Port", &u2_port.to_string())])
            .send()
            .await
            .map_err(|e| UiError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UiError(format!("UI check returned HTTP {}", status)));
        }

        let reply: UiCheckReply = response
            .json()
            .await
            .map_err(|e| UiError(format!("Invalid UI check reply: {}", e)))?;

        let detail = reply.failure_indicator.unwrap_or_default();
        let suspended =
            reply.suspended || KeywordClassifier::message_indicates_suspension(&detail);

        Ok(UiLoginCheck {
            logged_in: detail.is_empty() && !suspended,
            suspended,
            detail,
        })
    }
}

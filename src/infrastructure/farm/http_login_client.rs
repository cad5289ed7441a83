//! HTTP Login Service Client
//!
//! 登录子服务的 reqwest 实现。登录端点驱动模拟器 UI 完成账号登录,
//! 单次调用可达数分钟, 故使用长超时客户端。

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::application::ports::{LoginError, LoginReply, LoginRequest, LoginServicePort};
use crate::config::LoginConfig;

/// 登录请求体 (服务端约定 camelCase 字段)
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginBody<'a> {
    device_ip: &'a str,
    u2_port: u16,
    myt_rpc_port: u16,
    username: &'a str,
    password: &'a str,
    secret_key: &'a str,
}

#[derive(Debug, Deserialize)]
struct SuspendedReply {
    #[serde(default)]
    suspended_usernames: Vec<String>,
}

/// HTTP 登录子服务客户端
pub struct HttpLoginClient {
    client: Client,
    base_url: String,
}

impl HttpLoginClient {
    pub fn new(config: &LoginConfig) -> Result<Self, LoginError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LoginError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn map_send_error(err: reqwest::Error) -> LoginError {
        if err.is_timeout() {
            LoginError::Timeout
        } else {
            LoginError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl LoginServicePort for HttpLoginClient {
    async fn login(&self, request: &LoginRequest) -> Result<LoginReply, LoginError> {
        let url = format!("{}/api/single-account-login", self.base_url);
        let body = LoginBody {
            device_ip: &request.device_ip,
            u2_port: request.u2_port,
            myt_rpc_port: request.rpc_port,
            username: &request.username,
            password: &request.password,
            secret_key: &request.secret_key,
        };

        tracing::info!(
            device_ip = %request.device_ip,
            username = %request.username,
            u2_port = request.u2_port,
            rpc_port = request.rpc_port,
            "Dispatching login request"
        );

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(LoginError::Service(format!(
                "Login service returned HTTP {}",
                status
            )));
        }

        response
            .json::<LoginReply>()
            .await
            .map_err(|e| LoginError::Service(format!("Invalid login reply: {}", e)))
    }

    async fn suspended_usernames(&self) -> Result<Vec<String>, LoginError> {
        let url = format!("{}/device-users/suspended-accounts", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(LoginError::Service(format!(
                "Suspended list query returned HTTP {}",
                status
            )));
        }

        let reply: SuspendedReply = response
            .json()
            .await
            .map_err(|e| LoginError::Service(format!("Invalid suspended list reply: {}", e)))?;

        Ok(reply.suspended_usernames)
    }
}

//! HTTP Device Farm Client
//!
//! 设备农场 API 的 reqwest 实现。所有端点走 GET, 返回 `{code, msg}`
//! 信封, code 200 为成功。备份导出是慢操作, 使用独立的长超时客户端。

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::application::ports::{ApiInfo, ContainerInfo, DeviceFarmPort, FarmError};
use crate::config::FarmConfig;

/// 农场 API 信封; msg 缺失时解析为 None
#[derive(Debug, Deserialize)]
struct FarmEnvelope<T> {
    code: i64,
    msg: Option<T>,
}

/// HTTP 设备农场客户端
pub struct HttpFarmClient {
    client: Client,
    /// 导出专用客户端, 超时更长
    export_client: Client,
    base_url: String,
}

impl HttpFarmClient {
    pub fn new(config: &FarmConfig) -> Result<Self, FarmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| FarmError::Network(format!("Failed to build HTTP client: {}", e)))?;

        let export_client = Client::builder()
            .timeout(Duration::from_secs(config.export_timeout_secs))
            .build()
            .map_err(|e| FarmError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            export_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn map_send_error(err: reqwest::Error) -> FarmError {
        if err.is_timeout() {
            FarmError::Timeout
        } else {
            FarmError::Network(err.to_string())
        }
    }

    /// 发送 GET 请求并解析 `{code, msg}` 信封, 返回 msg 负载
    async fn get_envelope<T: serde::de::DeserializeOwned>(
        &self,
        client: &Client,
        url: &str,
    ) -> Result<T, FarmError> {
        let response = client
            .get(url)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FarmError::Api {
                code: status.as_u16() as i64,
                message: format!("HTTP {}", status),
            });
        }

        let envelope: FarmEnvelope<T> = response
            .json()
            .await
            .map_err(|e| FarmError::InvalidResponse(e.to_string()))?;

        if envelope.code != 200 {
            return Err(FarmError::Api {
                code: envelope.code,
                message: "Farm API returned non-200 code".to_string(),
            });
        }

        envelope
            .msg
            .ok_or_else(|| FarmError::InvalidResponse("Envelope has no msg payload".to_string()))
    }

    /// 只关心成败的动作端点 (reboot / remove / export)
    async fn get_action(&self, client: &Client, url: &str) -> Result<(), FarmError> {
        let response = client
            .get(url)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FarmError::Api {
                code: status.as_u16() as i64,
                message: format!("HTTP {}", status),
            });
        }

        let envelope: FarmEnvelope<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| FarmError::InvalidResponse(e.to_string()))?;

        if envelope.code != 200 {
            let message = envelope
                .msg
                .map(|v| v.to_string())
                .unwrap_or_else(|| "Farm API returned non-200 code".to_string());
            return Err(FarmError::Api {
                code: envelope.code,
                message,
            });
        }

        Ok(())
    }
}

#[async_trait]
impl DeviceFarmPort for HttpFarmClient {
    async fn list_containers(&self, box_ip: &str) -> Result<Vec<ContainerInfo>, FarmError> {
        let url = self.url(&format!("/get/{}", box_ip));
        self.get_envelope(&self.client, &url).await
    }

    async fn get_api_info(
        &self,
        box_ip: &str,
        container_name: &str,
    ) -> Result<ApiInfo, FarmError> {
        let url = self.url(&format!(
            "/and_api/v1/get_api_info/{}/{}",
            box_ip, container_name
        ));
        self.get_envelope(&self.client, &url).await
    }

    async fn reboot_container(&self, box_ip: &str, container_name: &str) -> Result<(), FarmError> {
        let url = self.url(&format!("/reboot/{}/{}", box_ip, container_name));
        tracing::info!(box_ip = %box_ip, container = %container_name, "Rebooting container");
        self.get_action(&self.client, &url).await
    }

    async fn remove_container(&self, box_ip: &str, container_name: &str) -> Result<(), FarmError> {
        let url = self.url(&format!("/remove/{}/{}", box_ip, container_name));
        tracing::info!(box_ip = %box_ip, container = %container_name, "Removing container");
        self.get_action(&self.client, &url).await
    }

    async fn export_container(
        &self,
        box_ip: &str,
        container_name: &str,
        local_path: &str,
    ) -> Result<(), FarmError> {
        let url = self.url(&format!("/dc_api/v1/batch_export/{}", box_ip));
        tracing::info!(
            box_ip = %box_ip,
            container = %container_name,
            local_path = %local_path,
            "Exporting container backup"
        );

        let response = self
            .export_client
            .get(&url)
            .query(&[("name", container_name), ("localPath", local_path)])
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FarmError::Api {
                code: status.as_u16() as i64,
                message: format!("HTTP {}", status),
            });
        }

        let envelope: FarmEnvelope<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| FarmError::InvalidResponse(e.to_string()))?;

        if envelope.code != 200 {
            let message = envelope
                .msg
                .map(|v| v.to_string())
                .unwrap_or_else(|| "Export failed".to_string());
            return Err(FarmError::Api {
                code: envelope.code,
                message,
            });
        }

        Ok(())
    }
}

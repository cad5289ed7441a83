//! 设备级处理结果与三态分类
//!
//! 每个 DeviceWorkItem 产生一个 `DeviceOutcome`, 创建后不可变。
//! 分类策略通过 `OutcomeClassifier` 可插拔, 默认实现为关键字子串匹配,
//! 将来可替换为结构化错误码而不影响聚合算法。

use serde::{Deserialize, Serialize};

/// 结果分类: 封号在聚合计数上算失败, 但单独跟踪用于上报;
/// LoginOnly 表示登录成功但没有产出有效备份 (完整流水线里
/// 不算成功, 也不算硬失败)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeClass {
    Success,
    LoginOnly,
    Failed,
    Suspended,
}

impl OutcomeClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeClass::Success => "success",
            OutcomeClass::LoginOnly => "login_only",
            OutcomeClass::Failed => "failed",
            OutcomeClass::Suspended => "suspended",
        }
    }
}

/// 单个设备的处理结果, 追加到任务结果列表后不再修改
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceOutcome {
    pub device_id: Option<i64>,
    pub device_name: String,
    pub login_status: OutcomeClass,
    pub error_message: String,
    pub account_status: String,
}

impl DeviceOutcome {
    pub fn new(
        device_id: Option<i64>,
        device_name: impl Into<String>,
        class: OutcomeClass,
        error_message: impl Into<String>,
    ) -> Self {
        let account_status = match class {
            OutcomeClass::Success | OutcomeClass::LoginOnly => "active",
            OutcomeClass::Suspended => "suspended",
            OutcomeClass::Failed => "unknown",
        };
        Self {
            device_id,
            device_name: device_name.into(),
            login_status: class,
            error_message: if class == OutcomeClass::Success {
                String::new()
            } else {
                error_message.into()
            },
            account_status: account_status.to_string(),
        }
    }
}

/// 结果分类策略
pub trait OutcomeClassifier: Send + Sync {
    /// 根据成功标志 / 显式封号标志 / 错误消息分类
    fn classify(&self, success: bool, suspended: bool, error_message: &str) -> OutcomeClass;
}

/// 已知的封号关键字 (大小写不敏感子串匹配)
const SUSPENSION_MARKERS: &[&str] = &["suspend", "封停"];

/// 默认分类器: 错误消息中出现封号关键字即判为 Suspended
#[derive(Debug, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn message_indicates_suspension(message: &str) -> bool {
        if message.is_empty() {
            return false;
        }
        let lower = message.to_lowercase();
        SUSPENSION_MARKERS.iter().any(|m| lower.contains(m))
    }
}

impl OutcomeClassifier for KeywordClassifier {
    fn classify(&self, success: bool, suspended: bool, error_message: &str) -> OutcomeClass {
        if success {
            return OutcomeClass::Success;
        }
        if suspended || Self::message_indicates_suspension(error_message) {
            return OutcomeClass::Suspended;
        }
        OutcomeClass::Failed
    }
}

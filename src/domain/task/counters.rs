//! 任务计数器与最终状态判定
//!
//! 不变量:
//! - `completed == successful + login_only + failed` 在任意观测点成立
//! - `suspended <= failed` (封号在计数上属于失败)

use super::outcome::OutcomeClass;
use super::status::AggregateStatus;
use serde::{Deserialize, Serialize};

/// 批量任务计数器
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TaskCounters {
    pub total_devices: usize,
    pub completed_devices: usize,
    pub successful_devices: usize,
    /// 登录成功但没有产出有效备份的设备数
    pub login_only_devices: usize,
    pub failed_devices: usize,
    pub suspended_accounts: usize,
}

impl TaskCounters {
    pub fn new(total_devices: usize) -> Self {
        Self {
            total_devices,
            ..Default::default()
        }
    }

    /// 记录一个设备结果
    pub fn record(&mut self, class: OutcomeClass) {
        self.completed_devices += 1;
        match class {
            OutcomeClass::Success => self.successful_devices += 1,
            OutcomeClass::LoginOnly => self.login_only_devices += 1,
            OutcomeClass::Failed => self.failed_devices += 1,
            OutcomeClass::Suspended => {
                // 封号计入失败, 同时单独计数
                self.failed_devices += 1;
                self.suspended_accounts += 1;
            }
        }
        debug_assert_eq!(
            self.completed_devices,
            self.successful_devices + self.login_only_devices + self.failed_devices
        );
        debug_assert!(self.suspended_accounts <= self.failed_devices);
    }

    pub fn all_completed(&self) -> bool {
        self.total_devices > 0 && self.completed_devices >= self.total_devices
    }

    /// 计算最终聚合状态与上报消息
    ///
    /// 判定表 (取消优先):
    /// - 观测到取消 → failed (附带已完成计数)
    /// - 全部成功 → succeeded
    /// - 有任一成功或仅登录 → completed (部分产出永远优先于"全部失败")
    /// - 零成功且全部封号 → completed (封号是预期运营结果, 不算硬失败)
    /// - 零成功且封号/失败混合 → completed
    /// - 零成功且零封号 → failed (干净的全部失败)
    pub fn final_status(&self, task_id: &str, cancelled: bool) -> (AggregateStatus, String) {
        let total = self.total_devices;
        let successful = self.successful_devices;
        let login_only = self.login_only_devices;
        let failed = self.failed_devices;
        let suspended = self.suspended_accounts;

        if cancelled {
            let message = format!(
                "Task {} was cancelled. Processed: {}/{}, Successful: {}, Failed: {} before cancellation.",
                task_id, self.completed_devices, total, successful, failed
            );
            return (AggregateStatus::Failed, message);
        }

        let (status, mut message) = if successful == total {
            (
                AggregateStatus::Succeeded,
                format!(
                    "Task {} completed. All {} devices logged in successfully.",
                    task_id, total
                ),
            )
        } else if successful > 0 || login_only > 0 {
            (
                AggregateStatus::Completed,
                format!(
                    "Task {} completed with mixed results: {} succeeded, {} login-only, {} failed (of which {} suspended) out of {} devices.",
                    task_id, successful, login_only, failed, suspended, total
                ),
            )
        } else if suspended == total {
            (
                AggregateStatus::Completed,
                format!(
                    "Task {} completed. All {} accounts processed were suspended.",
                    task_id, total
                ),
            )
        } else if suspended > 0 {
            (
                AggregateStatus::Completed,
                format!(
                    "Task {} completed. All {} devices failed or were suspended ({}s, {}f, {}susp).",
                    task_id,
                    total,
                    successful,
                    failed - suspended,
                    suspended
                ),
            )
        } else {
            (
                AggregateStatus::Failed,
                format!(
                    "Task {} completed. All {} devices failed to log in.",
                    task_id, total
                ),
            )
        };

        if suspended > 0 {
            message.push_str(&format!(" ({} 账户已封停但算作登录失败)", suspended));
        }

        (status, message)
    }
}

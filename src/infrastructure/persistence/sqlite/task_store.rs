//! SQLite Task Store - 任务状态写穿与账号/端口持久化

use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use std::collections::HashSet;

use super::database::DbPool;
use crate::application::ports::{PortKind, StoreError, TaskStorePort};

/// SQLite 任务存储
pub struct SqliteTaskStore {
    pool: DbPool,
}

impl SqliteTaskStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn map_db_error(err: sqlx::Error) -> StoreError {
        StoreError::Database(err.to_string())
    }
}

#[async_trait]
impl TaskStorePort for SqliteTaskStore {
    async fn create_task(&self, task_id: &str, task_type: &str) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO tasks (id, task_type, status, created_at, updated_at)
            VALUES (?, ?, 'initializing', ?, ?)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(task_id)
        .bind(task_type)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(Self::map_db_error)?;
        Ok(())
    }

    async fn ensure_account(&self, username: &str) -> Result<i64, StoreError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO accounts (username, updated_at) VALUES (?, ?)
            ON CONFLICT (username) DO NOTHING
            "#,
        )
        .bind(username)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(Self::map_db_error)?;

        let row = sqlx::query("SELECT id FROM accounts WHERE username = ?")
            .bind(username)
            .fetch_one(&self.pool)
            .await
            .map_err(Self::map_db_error)?;

        Ok(row.get::<i64, _>("id"))
    }

    async fn update_task_status(&self, task_id: &str, status: &str) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query("UPDATE tasks SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status)
            .bind(&now)
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(Self::map_db_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::TaskNotFound(task_id.to_string()));
        }
        Ok(())
    }

    async fn mark_account_backed_up(&self, account_id: i64) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query("UPDATE accounts SET backed_up = 1, updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(account_id)
            .execute(&self.pool)
            .await
            .map_err(Self::map_db_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AccountNotFound(account_id.to_string()));
        }
        Ok(())
    }

    async fn mark_account_suspended(&self, username: &str) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let result =
            sqlx::query("UPDATE accounts SET suspended = 1, updated_at = ? WHERE username = ?")
                .bind(&now)
                .bind(username)
                .execute(&self.pool)
                .await
                .map_err(Self::map_db_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AccountNotFound(username.to_string()));
        }
        Ok(())
    }

    async fn account_id_by_username(&self, username: &str) -> Result<Option<i64>, StoreError> {
        let row = sqlx::query("SELECT id FROM accounts WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::map_db_error)?;

        Ok(row.map(|r| r.get::<i64, _>("id")))
    }

    async fn reserved_ports(
        &self,
        box_ip: &str,
        kind: PortKind,
    ) -> Result<HashSet<u16>, StoreError> {
        let rows = sqlx::query("SELECT port FROM device_ports WHERE box_ip = ? AND port_kind = ?")
            .bind(box_ip)
            .bind(kind.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(Self::map_db_error)?;

        Ok(rows
            .into_iter()
            .map(|r| r.get::<i64, _>("port") as u16)
            .collect())
    }

    async fn save_device_port(
        &self,
        box_ip: &str,
        device_name: &str,
        kind: PortKind,
        port: u16,
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO device_ports (box_ip, device_name, port_kind, port, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (box_ip, port_kind, port) DO UPDATE SET device_name = excluded.device_name
            "#,
        )
        .bind(box_ip)
        .bind(device_name)
        .bind(kind.as_str())
        .bind(port as i64)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(Self::map_db_error)?;
        Ok(())
    }
}

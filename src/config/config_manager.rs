// ==========================================
// 施工时刻表导入引擎 - 配置管理器
// ==========================================
// 职责: 配置查询与覆写
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::import_config_trait::{ConfigResult, ImportConfigReader};
use crate::db::{open_sqlite_connection, DEFAULT_BUSY_TIMEOUT_MS};
use crate::domain::types::ImportMode;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

// ==========================================
// 配置键
// ==========================================
pub mod config_keys {
    pub const WORKER_COUNT: &str = "worker_count";
    pub const STOP_ON_FIRST_ERROR: &str = "stop_on_first_error";
    pub const BUSY_TIMEOUT_MS: &str = "busy_timeout_ms";
    pub const BUSY_RETRY_LIMIT: &str = "busy_retry_limit";
    pub const WARM_REGION_CACHE: &str = "warm_region_cache";
    pub const IMPORT_MODE: &str = "import_mode";
}

pub const DEFAULT_WORKER_COUNT: usize = 4;
pub const DEFAULT_BUSY_RETRY_LIMIT: u32 = 100;

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> ConfigResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    pub fn get_global_config_value(&self, key: &str) -> ConfigResult<Option<String>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 写入 global 配置（存在则覆盖）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> ConfigResult<()> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    /// 读取并解析；缺失或格式错误时返回默认值
    fn get_parsed_or_default<T>(&self, key: &str, default: T) -> ConfigResult<T>
    where
        T: FromStr + Copy,
    {
        let Some(raw) = self.get_global_config_value(key)? else {
            return Ok(default);
        };
        match raw.trim().parse::<T>() {
            Ok(value) => Ok(value),
            Err(_) => {
                tracing::warn!(config_key = key, raw_value = %raw, "配置值格式错误，使用默认值");
                Ok(default)
            }
        }
    }

    fn get_bool_or_default(&self, key: &str, default: bool) -> ConfigResult<bool> {
        let Some(raw) = self.get_global_config_value(key)? else {
            return Ok(default);
        };
        match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => {
                tracing::warn!(config_key = key, raw_value = %raw, "布尔配置格式错误，使用默认值");
                Ok(default)
            }
        }
    }
}

// ==========================================
// ImportConfigReader Trait 实现
// ==========================================
#[async_trait]
impl ImportConfigReader for ConfigManager {
    async fn get_worker_count(&self) -> ConfigResult<usize> {
        let count = self.get_parsed_or_default(config_keys::WORKER_COUNT, DEFAULT_WORKER_COUNT)?;
        Ok(count.max(1))
    }

    async fn get_busy_timeout_ms(&self) -> ConfigResult<u64> {
        self.get_parsed_or_default(config_keys::BUSY_TIMEOUT_MS, DEFAULT_BUSY_TIMEOUT_MS)
    }

    async fn get_busy_retry_limit(&self) -> ConfigResult<u32> {
        self.get_parsed_or_default(config_keys::BUSY_RETRY_LIMIT, DEFAULT_BUSY_RETRY_LIMIT)
    }

    async fn get_warm_region_cache(&self) -> ConfigResult<bool> {
        self.get_bool_or_default(config_keys::WARM_REGION_CACHE, true)
    }

    async fn get_stop_on_first_error(&self) -> ConfigResult<bool> {
        self.get_bool_or_default(config_keys::STOP_ON_FIRST_ERROR, false)
    }

    async fn get_import_mode(&self) -> ConfigResult<ImportMode> {
        Ok(self
            .get_global_config_value(config_keys::IMPORT_MODE)?
            .map(|raw| ImportMode::parse(&raw))
            .unwrap_or(ImportMode::Reconciled))
    }
}

// ==========================================
// 施工时刻表导入引擎 - 导入运行设置
// ==========================================
// 职责: 一次性读取导入编排所需配置；解析数据库路径
// ==========================================

use crate::config::import_config_trait::{ConfigResult, ImportConfigReader};
use crate::config::config_manager::{DEFAULT_BUSY_RETRY_LIMIT, DEFAULT_WORKER_COUNT};
use crate::db::DEFAULT_BUSY_TIMEOUT_MS;
use crate::domain::types::ImportMode;
use crate::importer::document_importer::ImportOptions;
use std::path::PathBuf;

/// 覆盖默认数据库路径的环境变量
pub const DB_PATH_ENV: &str = "BBP_IMPORT_DB_PATH";

const DB_FILE_NAME: &str = "bbp_import.db";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSettings {
    pub worker_count: usize,
    pub stop_on_first_error: bool,
    pub busy_timeout_ms: u64,
    pub busy_retry_limit: u32,
    pub warm_region_cache: bool,
    pub import_mode: ImportMode,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            stop_on_first_error: false,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            busy_retry_limit: DEFAULT_BUSY_RETRY_LIMIT,
            warm_region_cache: true,
            import_mode: ImportMode::Reconciled,
        }
    }
}

impl ImportSettings {
    pub async fn load(reader: &dyn ImportConfigReader) -> ConfigResult<Self> {
        Ok(Self {
            worker_count: reader.get_worker_count().await?,
            stop_on_first_error: reader.get_stop_on_first_error().await?,
            busy_timeout_ms: reader.get_busy_timeout_ms().await?,
            busy_retry_limit: reader.get_busy_retry_limit().await?,
            warm_region_cache: reader.get_warm_region_cache().await?,
            import_mode: reader.get_import_mode().await?,
        })
    }

    pub fn import_options(&self) -> ImportOptions {
        ImportOptions {
            stop_on_first_error: self.stop_on_first_error,
        }
    }
}

/// 默认数据库路径: $BBP_IMPORT_DB_PATH，否则 <data_dir>/bbp-import/bbp_import.db
pub fn default_db_path() -> PathBuf {
    if let Ok(path) = std::env::var(DB_PATH_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("bbp-import")
        .join(DB_FILE_NAME)
}

// ==========================================
// 施工时刻表导入引擎 - 配置层
// ==========================================
// 职责: 导入编排配置读取
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod import_config_trait;
pub mod settings;

// 重导出核心配置管理器
pub use config_manager::{config_keys, ConfigManager};
pub use import_config_trait::{ConfigResult, ImportConfigReader};
pub use settings::{default_db_path, ImportSettings, DB_PATH_ENV};

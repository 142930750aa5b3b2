// ==========================================
// 施工时刻表导入引擎 - 导入配置读取 Trait
// ==========================================
// 职责: 定义导入编排所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::domain::types::ImportMode;
use async_trait::async_trait;
use std::error::Error;

pub type ConfigResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

// ==========================================
// ImportConfigReader Trait
// ==========================================
// 实现者: ConfigManager（从 config_kv 表读取）
#[async_trait]
pub trait ImportConfigReader: Send + Sync {
    // ===== 并发 =====

    /// 导入 worker 数量
    ///
    /// # 默认值
    /// - 4（至少为 1）
    async fn get_worker_count(&self) -> ConfigResult<usize>;

    /// SQLite busy_timeout（毫秒）
    ///
    /// # 默认值
    /// - 5000
    async fn get_busy_timeout_ms(&self) -> ConfigResult<u64>;

    /// busy_timeout 到期后文档整体重试的次数上限
    ///
    /// # 默认值
    /// - 100
    async fn get_busy_retry_limit(&self) -> ConfigResult<u32>;

    /// worker 启动前是否预热区域缓存
    ///
    /// # 默认值
    /// - true
    async fn get_warm_region_cache(&self) -> ConfigResult<bool>;

    // ===== 失败策略 =====

    /// 单列车失败是否终止整个文档
    ///
    /// # 默认值
    /// - false（记录失败并继续）
    async fn get_stop_on_first_error(&self) -> ConfigResult<bool>;

    // ===== 导入模式 =====

    /// # 默认值
    /// - RECONCILED
    async fn get_import_mode(&self) -> ConfigResult<ImportMode>;
}

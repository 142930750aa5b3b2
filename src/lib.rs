// ==========================================
// 施工时刻表导入引擎 - 核心库
// ==========================================
// 技术栈: Rust + SQLite (rusqlite)
// 系统定位: 施工期时刻表变更文档的协调与幂等写入
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 输入 DTO 与规范模型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 引用解析与协调
pub mod engine;

// 导入层 - 写入编排与并发池
pub mod importer;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一/建表）
pub mod db;

// 日志系统
pub mod logging;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{
    Dialect, ImportMode, ReferenceKind, RegulationKind, SectionKind, SurrogateId, TrainKey,
};

// 领域实体
pub use domain::{CanonicalRegulation, CanonicalTrain, ImportDocument, ReconciledDocument};

// 引擎
pub use engine::{
    CancellationToken, ImportPhase, ImportProgress, ProgressSink, ReconciliationFactory,
    ReferenceCache, ReferenceResolver,
};

// 导入
pub use importer::{
    DirectImporter, DocumentImportReport, DocumentImporter, DocumentOutcome, ImportError,
    ImportPool,
};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "bbp-import";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}

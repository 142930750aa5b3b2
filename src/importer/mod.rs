// ==========================================
// 施工时刻表导入引擎 - 导入层
// ==========================================
// 职责: 文档写入编排（协调模式 / 直接模式）与并发导入池
// ==========================================

// 模块声明
pub mod direct_importer;
pub mod document_importer;
pub mod error;
pub mod import_pool;

// 重导出核心类型
pub use direct_importer::{DirectImportReport, DirectImporter, HeaderKey};
pub use document_importer::{DocumentImportReport, DocumentImporter, ImportOptions, TrainFailure};
pub use error::{ImportError, ImportResult};
pub use import_pool::{DocumentOutcome, ImportPool};

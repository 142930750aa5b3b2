// ==========================================
// 施工时刻表导入引擎 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化；唯一冲突统一走 find_or_insert
// ==========================================

pub mod claim;
pub mod document_repo;
pub mod error;
pub mod reference_repo;
pub mod regulation_repo;
pub mod train_repo;

// 重导出核心仓储
pub use claim::{find_or_insert, Claim, UpsertOutcome, Upserted};
pub use document_repo::{DocumentRepository, NewDocument, RouteSectionRow};
pub use error::{RepositoryError, RepositoryResult};
pub use reference_repo::ReferenceRepository;
pub use regulation_repo::RegulationRepository;
pub use train_repo::{
    NodeTimeRow, StopRow, TrainAttributes, TrainHeaderRepository, TrainRepository,
    VariantAttributes,
};

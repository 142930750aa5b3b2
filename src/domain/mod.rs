// ==========================================
// 施工时刻表导入引擎 - 领域模型层
// ==========================================
// 职责: 定义输入 DTO、规范模型、封闭枚举、自然键规范化
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod document;
pub mod natural_key;
pub mod train;
pub mod types;

// 重导出核心类型
pub use document::{
    DocumentHeader, HoldFragment, ImportDocument, KeyedFragment, NodeTimeFragment,
    ParameterOverrideFragment, ReplacementServiceFragment, RouteSectionFragment, SenderIdentity,
    StopCancellationFragment, StopFragment, SubstituteTrain, TrainFragment, VersionTriple,
};
pub use train::{
    merge_fill_absent, CanonicalRegulation, CanonicalTrain, ReconciledDocument,
    ReconciliationStats,
};
pub use types::{
    Dialect, ImportMode, ReferenceKind, RegulationKind, SectionKind, SurrogateId, TrainKey,
};

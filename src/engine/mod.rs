// ==========================================
// 施工时刻表导入引擎 - 引擎层
// ==========================================
// 职责: 引用解析、片段协调、进度/取消、按键锁
// 红线: 协调工厂不做 I/O；解析器只通过仓储访问数据库
// ==========================================

pub mod events;
pub mod keyed_lock;
pub mod reconciliation;
pub mod reference_resolver;

// 重导出核心引擎
pub use events::{
    CancellationToken, Cancelled, CollectingProgressSink, ImportPhase, ImportProgress,
    NoOpProgressSink, ProgressSink, TracingProgressSink,
};
pub use keyed_lock::KeyedLocks;
pub use reconciliation::ReconciliationFactory;
pub use reference_resolver::{CacheKey, ReferenceCache, ReferenceResolver, StageMark};

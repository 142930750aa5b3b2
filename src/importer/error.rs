// ==========================================
// 施工时刻表导入引擎 - 导入层错误类型
// ==========================================
// 工具: thiserror 派生宏
// 说明: 唯一冲突竞争在仓储层已恢复，不会出现在这里
// ==========================================

use crate::domain::types::ReferenceKind;
use crate::engine::events::Cancelled;
use crate::repository::error::RepositoryError;
use chrono::NaiveDate;
use thiserror::Error;

/// 导入层错误类型
#[derive(Error, Debug)]
pub enum ImportError {
    // ===== 文档级致命错误 =====
    #[error("必需引用无法解析 (file={file}): {kind} '{key}'")]
    UnresolvedMandatoryReference {
        kind: ReferenceKind,
        key: String,
        file: String,
    },

    #[error("子集合数据结构错误 (file={file}): {detail}")]
    MalformedChildData { file: String, detail: String },

    // ===== 单列车失败 =====
    #[error("列车 {train_number}@{traffic_day} 写入失败: {reason}")]
    PerTrainFailure {
        train_number: u32,
        traffic_day: NaiveDate,
        reason: String,
    },

    // ===== 取消 =====
    #[error("导入已取消")]
    Cancelled,

    // ===== 下层错误 =====
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("载荷序列化失败: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 带文件名/案件号上下文的文档失败
    #[error("文档导入失败 (file={file}, case={case_number}): {source}")]
    Document {
        file: String,
        case_number: String,
        #[source]
        source: Box<ImportError>,
    },

    #[error("导入 worker 异常: {0}")]
    Worker(String),
}

impl From<Cancelled> for ImportError {
    fn from(_: Cancelled) -> Self {
        ImportError::Cancelled
    }
}

// 实现 From<rusqlite::Error>（经由仓储层映射，保留唯一冲突识别）
impl From<rusqlite::Error> for ImportError {
    fn from(err: rusqlite::Error) -> Self {
        ImportError::Repository(RepositoryError::from(err))
    }
}

impl ImportError {
    /// 为错误附加文档上下文（已包装的不重复包装）
    pub fn in_document(self, file: &str, case_number: &str) -> Self {
        match self {
            ImportError::Document { .. } => self,
            other => ImportError::Document {
                file: file.to_string(),
                case_number: case_number.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// 剥掉文档上下文后的根错误
    pub fn root(&self) -> &ImportError {
        match self {
            ImportError::Document { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), ImportError::Cancelled)
    }

    /// 写锁被其他连接占用（IMMEDIATE 事务尚未开始，文档未写入）
    pub fn is_busy(&self) -> bool {
        matches!(self.root(), ImportError::Repository(e) if e.is_busy())
    }
}

/// Result 类型别名
pub type ImportResult<T> = Result<T, ImportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_context_wraps_once() {
        let err = ImportError::Cancelled
            .in_document("a.xml", "V-1")
            .in_document("b.xml", "V-2");

        match &err {
            ImportError::Document { file, .. } => assert_eq!(file, "a.xml"),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(err.is_cancelled());
        assert!(err.to_string().contains("case=V-1"));
    }

    #[test]
    fn test_busy_is_seen_through_document_context() {
        let err = ImportError::from(RepositoryError::DatabaseBusy("database is locked".to_string()))
            .in_document("a.xml", "V-1");
        assert!(err.is_busy());
        assert!(!err.is_cancelled());
        assert!(!ImportError::Cancelled.is_busy());
    }
}

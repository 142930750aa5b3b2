// ==========================================
// 施工时刻表导入引擎 - 仓储层错误类型
// ==========================================
// 工具: thiserror 派生宏
// 红线: 唯一约束冲突只按 SQLite 扩展错误码识别（并发插入竞争的唯一信号）
//       写锁被占用（busy_timeout 到期）单独识别，供上层退避重试
// ==========================================

use rusqlite::ffi;
use thiserror::Error;

/// 仓储层错误类型
#[derive(Error, Debug)]
pub enum RepositoryError {
    // ===== 数据库错误 =====
    #[error("记录未找到: {entity} with key={key}")]
    NotFound { entity: String, key: String },

    #[error("数据库连接失败: {0}")]
    DatabaseConnectionError(String),

    #[error("数据库查询失败: {0}")]
    DatabaseQueryError(String),

    #[error("数据库写锁被占用: {0}")]
    DatabaseBusy(String),

    #[error("唯一约束违反: {0}")]
    UniqueConstraintViolation(String),

    #[error("外键约束违反: {0}")]
    ForeignKeyViolation(String),

    #[error("约束违反: {0}")]
    ConstraintViolation(String),

    #[error("载荷序列化失败: {0}")]
    Serialization(#[from] serde_json::Error),

    // ===== 通用错误 =====
    #[error("内部错误: {0}")]
    InternalError(String),
}

impl RepositoryError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, RepositoryError::UniqueConstraintViolation(_))
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, RepositoryError::DatabaseBusy(_))
    }
}

// 实现 From<rusqlite::Error>
impl From<rusqlite::Error> for RepositoryError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref failure, ref msg) => {
                let detail = msg.clone().unwrap_or_else(|| failure.to_string());
                match failure.extended_code {
                    ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                        RepositoryError::UniqueConstraintViolation(detail)
                    }
                    ffi::SQLITE_CONSTRAINT_FOREIGNKEY => RepositoryError::ForeignKeyViolation(detail),
                    _ if failure.code == rusqlite::ErrorCode::ConstraintViolation => {
                        RepositoryError::ConstraintViolation(detail)
                    }
                    _ if matches!(
                        failure.code,
                        rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                    ) =>
                    {
                        RepositoryError::DatabaseBusy(detail)
                    }
                    _ if failure.code == rusqlite::ErrorCode::CannotOpen => {
                        RepositoryError::DatabaseConnectionError(detail)
                    }
                    _ => RepositoryError::DatabaseQueryError(detail),
                }
            }
            rusqlite::Error::QueryReturnedNoRows => RepositoryError::NotFound {
                entity: "Unknown".to_string(),
                key: "Unknown".to_string(),
            },
            _ => RepositoryError::DatabaseQueryError(err.to_string()),
        }
    }
}

/// Result 类型别名
pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_unique_violation_is_recognized_by_extended_code() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE t (id INTEGER PRIMARY KEY, code TEXT NOT NULL UNIQUE);
             INSERT INTO t (code) VALUES ('EFS');",
        )
        .unwrap();

        let err: RepositoryError = conn
            .execute("INSERT INTO t (code) VALUES ('EFS')", [])
            .unwrap_err()
            .into();
        assert!(err.is_unique_violation(), "unexpected error: {err}");
    }

    #[test]
    fn test_not_null_violation_is_not_a_unique_violation() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, code TEXT NOT NULL UNIQUE);")
            .unwrap();

        let err: RepositoryError = conn
            .execute("INSERT INTO t (code) VALUES (NULL)", [])
            .unwrap_err()
            .into();
        assert!(matches!(err, RepositoryError::ConstraintViolation(_)));
    }

    #[test]
    fn test_locked_writer_is_reported_as_busy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("busy.db");
        let holder = Connection::open(&path).unwrap();
        holder.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY);").unwrap();
        holder.execute_batch("BEGIN IMMEDIATE;").unwrap();

        let other = Connection::open(&path).unwrap();
        other.busy_timeout(std::time::Duration::from_millis(10)).unwrap();
        let err: RepositoryError = other.execute_batch("BEGIN IMMEDIATE;").unwrap_err().into();

        assert!(err.is_busy(), "unexpected error: {err}");
        assert!(!err.is_unique_violation());
    }
}

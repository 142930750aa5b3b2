// ==========================================
// 施工时刻表导入引擎 - 插入竞争处理
// ==========================================
// 职责: "查询 → 插入 → 唯一冲突时重新查询" 的通用实现
// 说明: 多个导入 worker 同时写同一个库时，唯一冲突是预期内的竞争结果，
//       读取胜出者的行并继续，而不是报错
// ==========================================

use crate::repository::error::{RepositoryError, RepositoryResult};
use tracing::debug;

/// 查找或插入的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim<T> {
    /// 本次插入了新行
    Inserted(T),
    /// 行已存在（包括竞争失败后读取到的胜出者）
    Existing(T),
}

impl<T> Claim<T> {
    pub fn into_inner(self) -> T {
        match self {
            Claim::Inserted(v) | Claim::Existing(v) => v,
        }
    }

    pub fn is_inserted(&self) -> bool {
        matches!(self, Claim::Inserted(_))
    }
}

/// 可变行的写入结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    /// 已有行被修改（列车: 字段不同；调整: 载荷补缺）
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upserted {
    pub id: i64,
    pub outcome: UpsertOutcome,
}

/// 查找或插入
///
/// # 参数
/// - entity: 实体名（用于日志与错误）
/// - find: 按自然键查询
/// - insert: 插入新行并返回其代理键
///
/// # 流程
/// 1. find 命中 → Existing
/// 2. insert 成功 → Inserted
/// 3. insert 唯一冲突 → 再次 find，返回胜出者（Existing）
pub fn find_or_insert<T, F, I>(entity: &str, find: F, insert: I) -> RepositoryResult<Claim<T>>
where
    F: Fn() -> RepositoryResult<Option<T>>,
    I: FnOnce() -> RepositoryResult<T>,
{
    if let Some(existing) = find()? {
        return Ok(Claim::Existing(existing));
    }

    match insert() {
        Ok(inserted) => Ok(Claim::Inserted(inserted)),
        Err(e) if e.is_unique_violation() => {
            debug!(entity = %entity, detail = %e, "插入竞争失败，读取胜出者");
            find()?
                .map(Claim::Existing)
                .ok_or_else(|| RepositoryError::NotFound {
                    entity: entity.to_string(),
                    key: format!("唯一冲突后未找到: {}", e),
                })
        }
        Err(e) => Err(e),
    }
}

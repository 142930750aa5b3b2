// ==========================================
// 施工时刻表导入引擎 - 引用解析器
// ==========================================
// 职责: 自然键 → 代理键（首次出现时创建行），带跨 worker 共享缓存
// 流程: 会话暂存 → 共享缓存（分片读写锁）→ SELECT → INSERT → 唯一冲突重读
// 红线: 事务内新建的 id 只暂存在会话中，提交后才发布到共享缓存；
//       回滚的行永远不会进入共享缓存
// ==========================================

use crate::domain::natural_key::{
    normalize_identifier, normalize_name, normalize_region, normalize_route_number,
    normalize_station_code,
};
use crate::domain::types::{ReferenceKind, SurrogateId};
use crate::repository::claim::Claim;
use crate::repository::error::RepositoryResult;
use crate::repository::reference_repo::ReferenceRepository;
use rusqlite::Connection;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

const SHARD_COUNT: usize = 16;

// 多段键的分隔符（不会出现在规范化后的键中）
const KEY_SEPARATOR: char = '\u{1f}';

/// 缓存键: (引用类型, 规范化后的自然键)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub kind: ReferenceKind,
    pub key: String,
}

impl CacheKey {
    pub fn new(kind: ReferenceKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
        }
    }
}

// ==========================================
// ReferenceCache - 导入会话共享缓存
// ==========================================
pub struct ReferenceCache {
    shards: Vec<RwLock<HashMap<CacheKey, SurrogateId>>>,
    registered: Mutex<HashSet<(String, String)>>,
}

impl Default for ReferenceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceCache {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect(),
            registered: Mutex::new(HashSet::new()),
        }
    }

    fn shard(&self, key: &CacheKey) -> &RwLock<HashMap<CacheKey, SurrogateId>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    pub fn get(&self, key: &CacheKey) -> Option<SurrogateId> {
        let shard = match self.shard(key).read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        shard.get(key).copied()
    }

    pub fn insert(&self, key: CacheKey, id: SurrogateId) {
        let mut shard = match self.shard(&key).write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        shard.insert(key, id);
    }

    /// 发布事务提交后的暂存 id
    pub fn publish(&self, staged: Vec<(CacheKey, SurrogateId)>) {
        let count = staged.len();
        for (key, id) in staged {
            self.insert(key, id);
        }
        if count > 0 {
            debug!(count, "发布暂存引用到共享缓存");
        }
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| match shard.read() {
                Ok(guard) => guard.len(),
                Err(poisoned) => poisoned.into_inner().len(),
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// (scope, value) 首次出现时返回 true
    pub fn try_register_once(&self, scope: &str, value: &str) -> bool {
        let mut registered = match self.registered.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        registered.insert((scope.to_string(), value.to_string()))
    }

    fn unregister(&self, scope: &str, value: &str) {
        let mut registered = match self.registered.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        registered.remove(&(scope.to_string(), value.to_string()));
    }

    /// 预热整张引用表（并发 worker 启动前调用）
    pub fn warm_up(&self, conn: &Connection, kind: ReferenceKind) -> RepositoryResult<usize> {
        let rows = ReferenceRepository::new(conn).load_all(kind)?;
        let count = rows.len();
        for (key, id) in rows {
            self.insert(CacheKey::new(kind, key), SurrogateId(id));
        }
        info!(kind = %kind, count, "引用缓存预热完成");
        Ok(count)
    }
}

/// 单列自然键按类型规范化
fn normalize_for(kind: ReferenceKind, raw: &str) -> Option<String> {
    match kind {
        ReferenceKind::Station => normalize_station_code(raw),
        ReferenceKind::Route => normalize_route_number(raw),
        ReferenceKind::Region => normalize_region(raw),
        ReferenceKind::Customer => normalize_name(raw),
        // 多段键走专用入口
        ReferenceKind::Case | ReferenceKind::Sender | ReferenceKind::StationRoute => None,
    }
}

// ==========================================
// ReferenceResolver - 单个 worker 的解析会话
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PublishMode {
    /// 自动提交：新建 id 立即发布
    Immediate,
    /// 事务内：新建 id 暂存，提交后由调用方发布
    Staged,
}

/// 暂存位置标记（配合保存点回滚）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageMark(usize);

pub struct ReferenceResolver<'a> {
    conn: &'a Connection,
    cache: &'a ReferenceCache,
    mode: PublishMode,
    staged: Vec<(CacheKey, SurrogateId)>,
    staged_index: HashMap<CacheKey, SurrogateId>,
}

impl<'a> ReferenceResolver<'a> {
    /// 自动提交模式（连接上没有未提交事务）
    pub fn autocommit(conn: &'a Connection, cache: &'a ReferenceCache) -> Self {
        Self::with_mode(conn, cache, PublishMode::Immediate)
    }

    /// 事务模式（连接上有进行中的事务）
    pub fn transactional(conn: &'a Connection, cache: &'a ReferenceCache) -> Self {
        Self::with_mode(conn, cache, PublishMode::Staged)
    }

    fn with_mode(conn: &'a Connection, cache: &'a ReferenceCache, mode: PublishMode) -> Self {
        Self {
            conn,
            cache,
            mode,
            staged: Vec::new(),
            staged_index: HashMap::new(),
        }
    }

    pub fn cache(&self) -> &'a ReferenceCache {
        self.cache
    }

    // ===== 单列自然键 =====

    /// 解析车站/线路/区域/客户；规范化后为空返回 UNRESOLVED（不访问数据库）
    pub fn resolve(&mut self, kind: ReferenceKind, raw: &str) -> RepositoryResult<SurrogateId> {
        let Some(key) = normalize_for(kind, raw) else {
            return Ok(SurrogateId::UNRESOLVED);
        };
        let cache_key = CacheKey::new(kind, key.clone());
        self.lookup_or_claim(cache_key, |repo| repo.claim_single(kind, &key))
    }

    /// 可选引用：未解析时记录警告并返回 None
    pub fn resolve_optional(
        &mut self,
        kind: ReferenceKind,
        raw: Option<&str>,
        context: &str,
    ) -> RepositoryResult<Option<i64>> {
        let Some(raw) = raw else {
            return Ok(None);
        };
        let id = self.resolve(kind, raw)?;
        if !id.is_resolved() {
            warn!(kind = %kind, key = %raw, context = %context, "可选引用无法解析，写入 NULL");
        }
        Ok(id.as_nullable())
    }

    // ===== 多段键 =====

    pub fn resolve_station_on_route(
        &mut self,
        station: SurrogateId,
        route: SurrogateId,
    ) -> RepositoryResult<SurrogateId> {
        if !station.is_resolved() || !route.is_resolved() {
            return Ok(SurrogateId::UNRESOLVED);
        }
        let cache_key = CacheKey::new(
            ReferenceKind::StationRoute,
            format!("{}{}{}", station.0, KEY_SEPARATOR, route.0),
        );
        self.lookup_or_claim(cache_key, |repo| repo.claim_station_route(station.0, route.0))
    }

    pub fn resolve_sender(
        &mut self,
        name: &str,
        email: Option<&str>,
        department: Option<&str>,
    ) -> RepositoryResult<SurrogateId> {
        let Some(name) = normalize_name(name) else {
            return Ok(SurrogateId::UNRESOLVED);
        };
        let email = email.and_then(normalize_name).map(|e| e.to_lowercase()).unwrap_or_default();
        let department = department.and_then(normalize_name).unwrap_or_default();
        let cache_key = CacheKey::new(
            ReferenceKind::Sender,
            format!("{name}{KEY_SEPARATOR}{email}{KEY_SEPARATOR}{department}"),
        );
        self.lookup_or_claim(cache_key, |repo| repo.claim_sender(&name, &email, &department))
    }

    pub fn resolve_case(&mut self, case_number: &str, timetable_year: i32) -> RepositoryResult<SurrogateId> {
        let Some(number) = normalize_identifier(case_number) else {
            return Ok(SurrogateId::UNRESOLVED);
        };
        let cache_key = CacheKey::new(
            ReferenceKind::Case,
            format!("{number}{KEY_SEPARATOR}{timetable_year}"),
        );
        self.lookup_or_claim(cache_key, |repo| repo.claim_case(&number, timetable_year))
    }

    /// 登记案件的施工措施号（会话内每个 (案件, 措施号) 只写一次）
    ///
    /// # 返回
    /// - true: 本会话首次登记
    pub fn register_construction_measure(
        &mut self,
        case_id: SurrogateId,
        measure_number: &str,
    ) -> RepositoryResult<bool> {
        let Some(measure) = normalize_identifier(measure_number) else {
            return Ok(false);
        };
        let scope = format!("measure{KEY_SEPARATOR}{}", case_id.0);
        if !self.cache.try_register_once(&scope, &measure) {
            return Ok(false);
        }
        match ReferenceRepository::new(self.conn).claim_construction_measure(case_id.0, &measure) {
            Ok(_) => Ok(true),
            Err(e) => {
                self.cache.unregister(&scope, &measure);
                Err(e)
            }
        }
    }

    // ===== 通用流程 =====

    fn lookup_or_claim<F>(&mut self, key: CacheKey, claim: F) -> RepositoryResult<SurrogateId>
    where
        F: FnOnce(&ReferenceRepository<'a>) -> RepositoryResult<Claim<i64>>,
    {
        if let Some(id) = self.staged_index.get(&key) {
            return Ok(*id);
        }
        if let Some(id) = self.cache.get(&key) {
            return Ok(id);
        }

        let repo = ReferenceRepository::new(self.conn);
        match claim(&repo)? {
            Claim::Existing(id) => {
                // 已提交的行（自身未提交的行一定在暂存表中）
                let id = SurrogateId(id);
                self.cache.insert(key, id);
                Ok(id)
            }
            Claim::Inserted(id) => {
                let id = SurrogateId(id);
                debug!(kind = %key.kind, key = %key.key, id = id.0, "新建引用行");
                match self.mode {
                    PublishMode::Immediate => self.cache.insert(key, id),
                    PublishMode::Staged => {
                        self.staged_index.insert(key.clone(), id);
                        self.staged.push((key, id));
                    }
                }
                Ok(id)
            }
        }
    }

    // ===== 暂存管理 =====

    pub fn mark(&self) -> StageMark {
        StageMark(self.staged.len())
    }

    /// 丢弃标记之后暂存的 id（对应保存点回滚）
    pub fn rollback_to(&mut self, mark: StageMark) {
        if mark.0 >= self.staged.len() {
            return;
        }
        for (key, _) in self.staged.drain(mark.0..) {
            self.staged_index.remove(&key);
        }
    }

    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    /// 取出暂存 id（事务提交后交给 ReferenceCache::publish）
    pub fn into_staged(self) -> Vec<(CacheKey, SurrogateId)> {
        self.staged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn station_count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM station", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_blank_key_resolves_to_sentinel_without_store_access() {
        let conn = setup();
        let cache = ReferenceCache::new();
        let mut resolver = ReferenceResolver::autocommit(&conn, &cache);

        assert_eq!(resolver.resolve(ReferenceKind::Station, "   ").unwrap(), SurrogateId::UNRESOLVED);
        assert_eq!(resolver.resolve(ReferenceKind::Route, "000").unwrap(), SurrogateId::UNRESOLVED);
        assert_eq!(station_count(&conn), 0);
    }

    #[test]
    fn test_normalized_keys_share_one_row() {
        let conn = setup();
        let cache = ReferenceCache::new();
        let mut resolver = ReferenceResolver::autocommit(&conn, &cache);

        let a = resolver.resolve(ReferenceKind::Station, "efs").unwrap();
        let b = resolver.resolve(ReferenceKind::Station, " EFS ").unwrap();
        let route_a = resolver.resolve(ReferenceKind::Route, "06100").unwrap();
        let route_b = resolver.resolve(ReferenceKind::Route, "6100").unwrap();

        assert_eq!(a, b);
        assert_eq!(route_a, route_b);
        assert_eq!(station_count(&conn), 1);
    }

    #[test]
    fn test_staged_ids_are_discarded_on_rollback() {
        let mut conn = setup();
        let cache = ReferenceCache::new();

        let tx = conn.transaction().unwrap();
        let staged = {
            let mut resolver = ReferenceResolver::transactional(&tx, &cache);
            let id = resolver.resolve(ReferenceKind::Station, "EFS").unwrap();
            assert!(id.is_resolved());
            assert!(cache.is_empty());
            resolver.into_staged()
        };
        tx.rollback().unwrap();
        drop(staged);

        assert!(cache.get(&CacheKey::new(ReferenceKind::Station, "EFS")).is_none());
        assert_eq!(station_count(&conn), 0);
    }

    #[test]
    fn test_staged_ids_are_published_after_commit() {
        let mut conn = setup();
        let cache = ReferenceCache::new();

        let tx = conn.transaction().unwrap();
        let staged = {
            let mut resolver = ReferenceResolver::transactional(&tx, &cache);
            resolver.resolve(ReferenceKind::Station, "EFS").unwrap();
            resolver.into_staged()
        };
        tx.commit().unwrap();
        cache.publish(staged);

        assert!(cache.get(&CacheKey::new(ReferenceKind::Station, "EFS")).is_some());
    }

    #[test]
    fn test_rollback_to_mark_keeps_earlier_entries() {
        let conn = setup();
        let cache = ReferenceCache::new();
        let mut resolver = ReferenceResolver::transactional(&conn, &cache);

        resolver.resolve(ReferenceKind::Station, "EFS").unwrap();
        let mark = resolver.mark();
        resolver.resolve(ReferenceKind::Station, "FF").unwrap();
        resolver.rollback_to(mark);

        let staged = resolver.into_staged();
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].0, CacheKey::new(ReferenceKind::Station, "EFS"));
    }

    #[test]
    fn test_construction_measure_registered_once_per_case() {
        let conn = setup();
        let cache = ReferenceCache::new();
        let mut resolver = ReferenceResolver::autocommit(&conn, &cache);
        let case_a = resolver.resolve_case("V-1", 2024).unwrap();
        let case_b = resolver.resolve_case("V-2", 2024).unwrap();

        assert!(resolver.register_construction_measure(case_a, "BBMN 100").unwrap());
        assert!(!resolver.register_construction_measure(case_a, "bbmn100").unwrap());
        assert!(resolver.register_construction_measure(case_b, "BBMN100").unwrap());

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM construction_measure", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 2);
    }

    #[test]
    fn test_warm_up_loads_regions() {
        let conn = setup();
        conn.execute_batch("INSERT INTO region (short_name) VALUES ('MITTE'), ('SUED');")
            .unwrap();
        let cache = ReferenceCache::new();

        assert_eq!(cache.warm_up(&conn, ReferenceKind::Region).unwrap(), 2);
        assert!(cache.get(&CacheKey::new(ReferenceKind::Region, "SUED")).is_some());
    }
}

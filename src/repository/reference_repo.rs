// ==========================================
// 施工时刻表导入引擎 - 引用数据仓储
// ==========================================
// 职责: 车站/线路/区域/客户/发送方/案件/施工措施号的 "查找或插入"
// 红线: 引用行创建后不可变，本仓储不提供更新和删除
// 说明: 键已由调用方规范化；本层只负责 SQL
// ==========================================

use crate::domain::types::ReferenceKind;
use crate::repository::claim::{find_or_insert, Claim};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension};

/// 单列自然键的表与列
fn single_key_table(kind: ReferenceKind) -> RepositoryResult<(&'static str, &'static str)> {
    match kind {
        ReferenceKind::Station => Ok(("station", "code")),
        ReferenceKind::Route => Ok(("route", "number")),
        ReferenceKind::Region => Ok(("region", "short_name")),
        ReferenceKind::Customer => Ok(("customer", "name")),
        other => Err(RepositoryError::InternalError(format!(
            "{} 不是单列自然键",
            other
        ))),
    }
}

// ==========================================
// ReferenceRepository
// ==========================================
pub struct ReferenceRepository<'c> {
    conn: &'c Connection,
}

impl<'c> ReferenceRepository<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    // ===== 单列自然键 =====

    pub fn find_single(&self, kind: ReferenceKind, key: &str) -> RepositoryResult<Option<i64>> {
        let (table, column) = single_key_table(kind)?;
        let sql = format!("SELECT id FROM {table} WHERE {column} = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![key], |row| row.get(0))
            .optional()?)
    }

    pub fn claim_single(&self, kind: ReferenceKind, key: &str) -> RepositoryResult<Claim<i64>> {
        let (table, column) = single_key_table(kind)?;
        find_or_insert(
            table,
            || self.find_single(kind, key),
            || {
                let sql = format!("INSERT INTO {table} ({column}) VALUES (?1)");
                self.conn.execute(&sql, params![key])?;
                Ok(self.conn.last_insert_rowid())
            },
        )
    }

    /// 整表读取 (自然键, 代理键)，用于缓存预热
    pub fn load_all(&self, kind: ReferenceKind) -> RepositoryResult<Vec<(String, i64)>> {
        let (table, column) = single_key_table(kind)?;
        let sql = format!("SELECT {column}, id FROM {table} ORDER BY id");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ===== 车站-线路关联 =====

    pub fn claim_station_route(&self, station_id: i64, route_id: i64) -> RepositoryResult<Claim<i64>> {
        let find = || -> RepositoryResult<Option<i64>> {
            Ok(self
                .conn
                .query_row(
                    "SELECT id FROM station_route WHERE station_id = ?1 AND route_id = ?2",
                    params![station_id, route_id],
                    |row| row.get(0),
                )
                .optional()?)
        };
        find_or_insert("station_route", find, || {
            self.conn.execute(
                "INSERT INTO station_route (station_id, route_id) VALUES (?1, ?2)",
                params![station_id, route_id],
            )?;
            Ok(self.conn.last_insert_rowid())
        })
    }

    // ===== 发送方 =====
    // 缺失的 email / department 以空串参与唯一键（SQLite 中 NULL 互不相等）

    pub fn claim_sender(&self, name: &str, email: &str, department: &str) -> RepositoryResult<Claim<i64>> {
        let find = || -> RepositoryResult<Option<i64>> {
            Ok(self
                .conn
                .query_row(
                    "SELECT id FROM sender WHERE name = ?1 AND email = ?2 AND department = ?3",
                    params![name, email, department],
                    |row| row.get(0),
                )
                .optional()?)
        };
        find_or_insert("sender", find, || {
            self.conn.execute(
                "INSERT INTO sender (name, email, department) VALUES (?1, ?2, ?3)",
                params![name, email, department],
            )?;
            Ok(self.conn.last_insert_rowid())
        })
    }

    // ===== 案件 (Vorgang) =====

    pub fn claim_case(&self, case_number: &str, timetable_year: i32) -> RepositoryResult<Claim<i64>> {
        let find = || -> RepositoryResult<Option<i64>> {
            Ok(self
                .conn
                .query_row(
                    "SELECT id FROM vorgang WHERE case_number = ?1 AND timetable_year = ?2",
                    params![case_number, timetable_year],
                    |row| row.get(0),
                )
                .optional()?)
        };
        find_or_insert("vorgang", find, || {
            self.conn.execute(
                "INSERT INTO vorgang (case_number, timetable_year) VALUES (?1, ?2)",
                params![case_number, timetable_year],
            )?;
            Ok(self.conn.last_insert_rowid())
        })
    }

    // ===== 施工措施号 (BBMN) =====

    pub fn claim_construction_measure(
        &self,
        case_id: i64,
        measure_number: &str,
    ) -> RepositoryResult<Claim<i64>> {
        let find = || -> RepositoryResult<Option<i64>> {
            Ok(self
                .conn
                .query_row(
                    "SELECT id FROM construction_measure WHERE vorgang_id = ?1 AND measure_number = ?2",
                    params![case_id, measure_number],
                    |row| row.get(0),
                )
                .optional()?)
        };
        find_or_insert("construction_measure", find, || {
            self.conn.execute(
                "INSERT INTO construction_measure (vorgang_id, measure_number) VALUES (?1, ?2)",
                params![case_id, measure_number],
            )?;
            Ok(self.conn.last_insert_rowid())
        })
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

    #[test]
    fn test_claim_single_is_idempotent() {
        let conn = setup();
        let repo = ReferenceRepository::new(&conn);

        let first = repo.claim_single(ReferenceKind::Station, "EFS").unwrap();
        let second = repo.claim_single(ReferenceKind::Station, "EFS").unwrap();

        assert!(first.is_inserted());
        assert_eq!(second, Claim::Existing(first.into_inner()));
    }

    #[test]
    fn test_two_part_kind_is_rejected_as_single_key() {
        let conn = setup();
        let repo = ReferenceRepository::new(&conn);
        let result = repo.claim_single(ReferenceKind::Sender, "x");
        assert!(matches!(result, Err(RepositoryError::InternalError(_))));
    }

    #[test]
    fn test_sender_with_missing_fields_is_deduplicated() {
        let conn = setup();
        let repo = ReferenceRepository::new(&conn);

        let a = repo.claim_sender("Netz Mitte", "", "").unwrap().into_inner();
        let b = repo.claim_sender("Netz Mitte", "", "").unwrap().into_inner();
        let c = repo.claim_sender("Netz Mitte", "bau@netz.example", "").unwrap().into_inner();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_load_all_returns_inserted_regions() {
        let conn = setup();
        let repo = ReferenceRepository::new(&conn);
        let mitte = repo.claim_single(ReferenceKind::Region, "MITTE").unwrap().into_inner();
        let sued = repo.claim_single(ReferenceKind::Region, "SUED").unwrap().into_inner();

        let all = repo.load_all(ReferenceKind::Region).unwrap();
        assert_eq!(all, vec![("MITTE".to_string(), mitte), ("SUED".to_string(), sued)]);
    }
}

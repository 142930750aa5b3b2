// ==========================================
// 施工时刻表导入引擎 - 调整仓储
// ==========================================
// 职责: regulation 行 (列车, 类型, 锚点站) 至多一行
// 红线: 第二次贡献只补缺合并 JSON 载荷，从不覆盖已有值
// ==========================================

use crate::domain::train::merge_fill_absent;
use crate::domain::types::RegulationKind;
use crate::repository::claim::{find_or_insert, Claim, UpsertOutcome, Upserted};
use crate::repository::error::RepositoryResult;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

pub struct RegulationRepository<'c> {
    conn: &'c Connection,
}

impl<'c> RegulationRepository<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    fn find(
        &self,
        train_id: i64,
        kind: RegulationKind,
        anchor_code: &str,
    ) -> RepositoryResult<Option<(i64, String)>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, payload_json FROM regulation WHERE train_id = ?1 AND kind = ?2 AND anchor_code = ?3",
                params![train_id, kind.as_db_str(), anchor_code],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?)
    }

    /// 插入或补缺合并
    ///
    /// # 返回
    /// - Inserted: 新调整
    /// - Updated: 已有载荷被补充了缺失字段
    /// - Unchanged: 已有载荷已包含全部字段
    pub fn upsert(
        &self,
        train_id: i64,
        kind: RegulationKind,
        anchor_code: &str,
        anchor_station_id: Option<i64>,
        payload: &Value,
    ) -> RepositoryResult<Upserted> {
        let payload_json = serde_json::to_string(payload)?;

        let claim = find_or_insert(
            "regulation",
            || self.find(train_id, kind, anchor_code),
            || {
                self.conn.execute(
                    r#"
                    INSERT INTO regulation (train_id, kind, anchor_code, anchor_station_id, payload_json)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    "#,
                    params![train_id, kind.as_db_str(), anchor_code, anchor_station_id, payload_json],
                )?;
                Ok((self.conn.last_insert_rowid(), payload_json.clone()))
            },
        )?;

        let (id, stored_json) = match claim {
            Claim::Inserted((id, _)) => {
                return Ok(Upserted {
                    id,
                    outcome: UpsertOutcome::Inserted,
                })
            }
            Claim::Existing(existing) => existing,
        };

        let mut stored: Value = serde_json::from_str(&stored_json)?;
        if !merge_fill_absent(&mut stored, payload) {
            return Ok(Upserted {
                id,
                outcome: UpsertOutcome::Unchanged,
            });
        }

        self.conn.execute(
            r#"
            UPDATE regulation SET
                payload_json = ?2,
                anchor_station_id = COALESCE(anchor_station_id, ?3),
                updated_at = datetime('now')
            WHERE id = ?1
            "#,
            params![id, serde_json::to_string(&stored)?, anchor_station_id],
        )?;
        Ok(Upserted {
            id,
            outcome: UpsertOutcome::Updated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;
    use serde_json::json;

    fn setup() -> (Connection, i64) {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        // 关闭外键，直接构造最小列车行
        conn.execute_batch(
            "PRAGMA foreign_keys = OFF;
             INSERT INTO train (id, document_id, train_number, traffic_day) VALUES (1, 1, 4711, '2024-03-01');",
        )
        .unwrap();
        (conn, 1)
    }

    fn stored_payload(conn: &Connection, id: i64) -> Value {
        let raw: String = conn
            .query_row("SELECT payload_json FROM regulation WHERE id = ?1", [id], |row| row.get(0))
            .unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn test_second_contribution_fills_absent_fields_only() {
        let (conn, train_id) = setup();
        let repo = RegulationRepository::new(&conn);

        let first = repo
            .upsert(train_id, RegulationKind::Hold, "EFS", None, &json!({"minutes": 5}))
            .unwrap();
        let second = repo
            .upsert(
                train_id,
                RegulationKind::Hold,
                "EFS",
                None,
                &json!({"minutes": 9, "reason": "Kreuzung"}),
            )
            .unwrap();

        assert_eq!(first.outcome, UpsertOutcome::Inserted);
        assert_eq!(second, Upserted { id: first.id, outcome: UpsertOutcome::Updated });
        assert_eq!(stored_payload(&conn, first.id), json!({"minutes": 5, "reason": "Kreuzung"}));
    }

    #[test]
    fn test_identical_contribution_is_unchanged() {
        let (conn, train_id) = setup();
        let repo = RegulationRepository::new(&conn);
        let payload = json!({"mode": "BUS"});

        repo.upsert(train_id, RegulationKind::PartialCancellation, "EFS", None, &payload)
            .unwrap();
        let again = repo
            .upsert(train_id, RegulationKind::PartialCancellation, "EFS", None, &payload)
            .unwrap();

        assert_eq!(again.outcome, UpsertOutcome::Unchanged);
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM regulation", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}

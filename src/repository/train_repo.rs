// ==========================================
// 施工时刻表导入引擎 - 列车仓储
// ==========================================
// 职责: train 行按 (文档, 车次, 运行日) 匹配或插入；停站/节点时刻整体替换
// 红线: 重复导入只在字段不同的时候更新
// ==========================================

use crate::db::with_savepoint;
use crate::domain::types::TrainKey;
use crate::repository::claim::{find_or_insert, Claim, UpsertOutcome, Upserted};
use crate::repository::error::RepositoryResult;
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension, Row};

/// 列车的可变字段（引用已解析为代理键）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrainAttributes {
    pub designation: Option<String>,
    pub customer_id: Option<i64>,
    pub from_station_id: Option<i64>,
    pub to_station_id: Option<i64>,
    pub speed_kmh: Option<u32>,
    pub brake_position: Option<String>,
    pub brake_ratio: Option<u32>,
    pub load_t: Option<u32>,
    pub length_m: Option<u32>,
    pub remarks: Option<String>,
    pub is_synthesized: bool,
    pub extras_json: Option<String>,
}

impl TrainAttributes {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            designation: row.get("designation")?,
            customer_id: row.get("customer_id")?,
            from_station_id: row.get("from_station_id")?,
            to_station_id: row.get("to_station_id")?,
            speed_kmh: row.get("speed_kmh")?,
            brake_position: row.get("brake_position")?,
            brake_ratio: row.get("brake_ratio")?,
            load_t: row.get("load_t")?,
            length_m: row.get("length_m")?,
            remarks: row.get("remarks")?,
            is_synthesized: row.get::<_, i64>("is_synthesized")? != 0,
            extras_json: row.get("extras_json")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopRow {
    pub station_id: i64,
    pub arrival: Option<NaiveDateTime>,
    pub departure: Option<NaiveDateTime>,
    pub activity: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTimeRow {
    pub station_id: i64,
    pub arrival: Option<NaiveDateTime>,
    pub departure: Option<NaiveDateTime>,
}

// ==========================================
// TrainRepository
// ==========================================
pub struct TrainRepository<'c> {
    conn: &'c Connection,
}

impl<'c> TrainRepository<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn find_id(&self, document_id: i64, key: &TrainKey) -> RepositoryResult<Option<i64>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id FROM train WHERE document_id = ?1 AND train_number = ?2 AND traffic_day = ?3",
                params![document_id, key.number, key.traffic_day],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn load_attributes(&self, train_id: i64) -> RepositoryResult<TrainAttributes> {
        Ok(self.conn.query_row(
            r#"
            SELECT designation, customer_id, from_station_id, to_station_id,
                   speed_kmh, brake_position, brake_ratio, load_t, length_m,
                   remarks, is_synthesized, extras_json
            FROM train WHERE id = ?1
            "#,
            params![train_id],
            TrainAttributes::from_row,
        )?)
    }

    /// 匹配或插入列车；已存在且字段不同时更新
    pub fn upsert(
        &self,
        document_id: i64,
        key: &TrainKey,
        attrs: &TrainAttributes,
    ) -> RepositoryResult<Upserted> {
        let claim = find_or_insert(
            "train",
            || self.find_id(document_id, key),
            || self.insert(document_id, key, attrs),
        )?;

        let id = match claim {
            Claim::Inserted(id) => {
                return Ok(Upserted {
                    id,
                    outcome: UpsertOutcome::Inserted,
                })
            }
            Claim::Existing(id) => id,
        };

        if self.load_attributes(id)? == *attrs {
            return Ok(Upserted {
                id,
                outcome: UpsertOutcome::Unchanged,
            });
        }

        self.conn.execute(
            r#"
            UPDATE train SET
                designation = ?2, customer_id = ?3, from_station_id = ?4, to_station_id = ?5,
                speed_kmh = ?6, brake_position = ?7, brake_ratio = ?8, load_t = ?9, length_m = ?10,
                remarks = ?11, is_synthesized = ?12, extras_json = ?13,
                updated_at = datetime('now')
            WHERE id = ?1
            "#,
            params![
                id,
                attrs.designation,
                attrs.customer_id,
                attrs.from_station_id,
                attrs.to_station_id,
                attrs.speed_kmh,
                attrs.brake_position,
                attrs.brake_ratio,
                attrs.load_t,
                attrs.length_m,
                attrs.remarks,
                attrs.is_synthesized,
                attrs.extras_json,
            ],
        )?;
        Ok(Upserted {
            id,
            outcome: UpsertOutcome::Updated,
        })
    }

    fn insert(&self, document_id: i64, key: &TrainKey, attrs: &TrainAttributes) -> RepositoryResult<i64> {
        self.conn.execute(
            r#"
            INSERT INTO train (
                document_id, train_number, traffic_day,
                designation, customer_id, from_station_id, to_station_id,
                speed_kmh, brake_position, brake_ratio, load_t, length_m,
                remarks, is_synthesized, extras_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
            params![
                document_id,
                key.number,
                key.traffic_day,
                attrs.designation,
                attrs.customer_id,
                attrs.from_station_id,
                attrs.to_station_id,
                attrs.speed_kmh,
                attrs.brake_position,
                attrs.brake_ratio,
                attrs.load_t,
                attrs.length_m,
                attrs.remarks,
                attrs.is_synthesized,
                attrs.extras_json,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// 整体替换停站（保存点内）
    pub fn replace_schedule_stops(&self, train_id: i64, stops: &[StopRow]) -> RepositoryResult<usize> {
        with_savepoint(self.conn, "sp_schedule_stops", || {
            self.conn
                .execute("DELETE FROM schedule_stop WHERE train_id = ?1", params![train_id])?;
            let mut stmt = self.conn.prepare_cached(
                r#"
                INSERT INTO schedule_stop (train_id, seq, station_id, arrival, departure, activity)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )?;
            for (seq, stop) in stops.iter().enumerate() {
                stmt.execute(params![
                    train_id,
                    seq as i64,
                    stop.station_id,
                    stop.arrival,
                    stop.departure,
                    stop.activity,
                ])?;
            }
            Ok(stops.len())
        })
    }

    /// 整体替换节点时刻（保存点内）
    pub fn replace_node_times(&self, train_id: i64, node_times: &[NodeTimeRow]) -> RepositoryResult<usize> {
        with_savepoint(self.conn, "sp_node_times", || {
            self.conn
                .execute("DELETE FROM node_time WHERE train_id = ?1", params![train_id])?;
            let mut stmt = self.conn.prepare_cached(
                "INSERT INTO node_time (train_id, seq, station_id, arrival, departure) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (seq, node) in node_times.iter().enumerate() {
                stmt.execute(params![train_id, seq as i64, node.station_id, node.arrival, node.departure])?;
            }
            Ok(node_times.len())
        })
    }

    /// 标记某站的停站为已取消，返回受影响行数
    pub fn mark_stop_cancelled(&self, train_id: i64, station_id: i64) -> RepositoryResult<usize> {
        Ok(self.conn.execute(
            "UPDATE schedule_stop SET cancelled = 1 WHERE train_id = ?1 AND station_id = ?2 AND cancelled = 0",
            params![train_id, station_id],
        )?)
    }
}

// ==========================================
// 直接导入: 车次头 + 变体
// ==========================================

/// 变体的可变字段
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariantAttributes {
    pub designation: Option<String>,
    pub customer_id: Option<i64>,
    pub from_station_id: Option<i64>,
    pub to_station_id: Option<i64>,
    pub remarks: Option<String>,
}

pub struct TrainHeaderRepository<'c> {
    conn: &'c Connection,
}

impl<'c> TrainHeaderRepository<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// 查找或插入车次头 (车次, 时刻表年度)
    pub fn claim_header(&self, train_number: u32, timetable_year: i32) -> RepositoryResult<Claim<i64>> {
        let find = || -> RepositoryResult<Option<i64>> {
            Ok(self
                .conn
                .query_row(
                    "SELECT id FROM train_header WHERE train_number = ?1 AND timetable_year = ?2",
                    params![train_number, timetable_year],
                    |row| row.get(0),
                )
                .optional()?)
        };
        find_or_insert("train_header", find, || {
            self.conn.execute(
                "INSERT INTO train_header (train_number, timetable_year) VALUES (?1, ?2)",
                params![train_number, timetable_year],
            )?;
            Ok(self.conn.last_insert_rowid())
        })
    }

    /// 匹配或插入变体 (车次头, 文档, 运行日)
    pub fn upsert_variant(
        &self,
        header_id: i64,
        document_id: i64,
        traffic_day: NaiveDate,
        attrs: &VariantAttributes,
    ) -> RepositoryResult<Upserted> {
        let find = || -> RepositoryResult<Option<(i64, VariantAttributes)>> {
            Ok(self
                .conn
                .query_row(
                    r#"
                    SELECT id, designation, customer_id, from_station_id, to_station_id, remarks
                    FROM train_variant
                    WHERE header_id = ?1 AND document_id = ?2 AND traffic_day = ?3
                    "#,
                    params![header_id, document_id, traffic_day],
                    |row| {
                        Ok((
                            row.get(0)?,
                            VariantAttributes {
                                designation: row.get(1)?,
                                customer_id: row.get(2)?,
                                from_station_id: row.get(3)?,
                                to_station_id: row.get(4)?,
                                remarks: row.get(5)?,
                            },
                        ))
                    },
                )
                .optional()?)
        };

        let claim = find_or_insert("train_variant", find, || {
            self.conn.execute(
                r#"
                INSERT INTO train_variant (
                    header_id, document_id, traffic_day,
                    designation, customer_id, from_station_id, to_station_id, remarks
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    header_id,
                    document_id,
                    traffic_day,
                    attrs.designation,
                    attrs.customer_id,
                    attrs.from_station_id,
                    attrs.to_station_id,
                    attrs.remarks,
                ],
            )?;
            Ok((self.conn.last_insert_rowid(), attrs.clone()))
        })?;

        match claim {
            Claim::Inserted((id, _)) => Ok(Upserted {
                id,
                outcome: UpsertOutcome::Inserted,
            }),
            Claim::Existing((id, existing)) if existing == *attrs => Ok(Upserted {
                id,
                outcome: UpsertOutcome::Unchanged,
            }),
            Claim::Existing((id, _)) => {
                self.conn.execute(
                    r#"
                    UPDATE train_variant SET
                        designation = ?2, customer_id = ?3, from_station_id = ?4,
                        to_station_id = ?5, remarks = ?6, updated_at = datetime('now')
                    WHERE id = ?1
                    "#,
                    params![
                        id,
                        attrs.designation,
                        attrs.customer_id,
                        attrs.from_station_id,
                        attrs.to_station_id,
                        attrs.remarks,
                    ],
                )?;
                Ok(Upserted {
                    id,
                    outcome: UpsertOutcome::Updated,
                })
            }
        }
    }
}

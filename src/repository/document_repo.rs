// ==========================================
// 施工时刻表导入引擎 - 文档仓储
// ==========================================
// 职责: document 行 (案件, 文件名) 唯一；施工线路区段整体替换
// 红线: 文档行创建后只允许补写 imported_at
// ==========================================

use crate::db::with_savepoint;
use crate::domain::document::VersionTriple;
use crate::domain::types::Dialect;
use crate::repository::claim::{find_or_insert, Claim};
use crate::repository::error::RepositoryResult;
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension};

/// 待写入的文档头
#[derive(Debug, Clone)]
pub struct NewDocument<'a> {
    pub case_id: i64,
    pub file_name: &'a str,
    pub dialect: Dialect,
    pub region_id: i64,
    pub sender_id: Option<i64>,
    pub exported_at: NaiveDateTime,
    pub version: VersionTriple,
    pub valid_from: Option<NaiveDate>,
    pub valid_to: Option<NaiveDate>,
}

/// 已解析引用的施工线路区段
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteSectionRow {
    pub route_id: Option<i64>,
    pub from_station_id: Option<i64>,
    pub to_station_id: Option<i64>,
    pub construction_start: NaiveDateTime,
    pub construction_end: NaiveDateTime,
    pub description: Option<String>,
}

// ==========================================
// DocumentRepository
// ==========================================
pub struct DocumentRepository<'c> {
    conn: &'c Connection,
}

impl<'c> DocumentRepository<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn find_id(&self, case_id: i64, file_name: &str) -> RepositoryResult<Option<i64>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id FROM document WHERE vorgang_id = ?1 AND file_name = ?2",
                params![case_id, file_name],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// 查找或插入文档行（重复导入返回同一行）
    pub fn claim(&self, doc: &NewDocument<'_>) -> RepositoryResult<Claim<i64>> {
        find_or_insert(
            "document",
            || self.find_id(doc.case_id, doc.file_name),
            || {
                self.conn.execute(
                    r#"
                    INSERT INTO document (
                        vorgang_id, file_name, dialect, region_id, sender_id,
                        exported_at, version_major, version_minor, version_sub,
                        valid_from, valid_to
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                    "#,
                    params![
                        doc.case_id,
                        doc.file_name,
                        doc.dialect.as_db_str(),
                        doc.region_id,
                        doc.sender_id,
                        doc.exported_at,
                        doc.version.major,
                        doc.version.minor,
                        doc.version.sub,
                        doc.valid_from,
                        doc.valid_to,
                    ],
                )?;
                Ok(self.conn.last_insert_rowid())
            },
        )
    }

    /// 标记导入完成（只在 imported_at 为空时写入）
    ///
    /// # 返回
    /// - true: 本次写入了时间戳
    /// - false: 已标记过，未做修改
    pub fn mark_imported(&self, document_id: i64, at: NaiveDateTime) -> RepositoryResult<bool> {
        let changed = self.conn.execute(
            "UPDATE document SET imported_at = ?2 WHERE id = ?1 AND imported_at IS NULL",
            params![document_id, at],
        )?;
        Ok(changed == 1)
    }

    pub fn imported_at(&self, document_id: i64) -> RepositoryResult<Option<NaiveDateTime>> {
        Ok(self
            .conn
            .query_row(
                "SELECT imported_at FROM document WHERE id = ?1",
                params![document_id],
                |row| row.get::<_, Option<NaiveDateTime>>(0),
            )
            .optional()?
            .flatten())
    }

    /// 整体替换文档的施工线路区段（保存点内，全有或全无）
    pub fn replace_route_sections(
        &self,
        document_id: i64,
        sections: &[RouteSectionRow],
    ) -> RepositoryResult<usize> {
        with_savepoint(self.conn, "sp_route_sections", || {
            self.conn.execute(
                "DELETE FROM route_section WHERE document_id = ?1",
                params![document_id],
            )?;

            let mut stmt = self.conn.prepare_cached(
                r#"
                INSERT INTO route_section (
                    document_id, seq, route_id, from_station_id, to_station_id,
                    construction_start, construction_end, description
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )?;
            for (seq, section) in sections.iter().enumerate() {
                stmt.execute(params![
                    document_id,
                    seq as i64,
                    section.route_id,
                    section.from_station_id,
                    section.to_station_id,
                    section.construction_start,
                    section.construction_end,
                    section.description,
                ])?;
            }
            Ok(sections.len())
        })
    }
}

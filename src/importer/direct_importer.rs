// ==========================================
// 施工时刻表导入引擎 - 直接导入流程
// ==========================================
// 职责: 不经协调，直接写入 车次头 (车次, 时刻表年度) + 每文档变体
// 流程:
//   1. 事务外解析案件/发送方（立即持久）
//   2. 开启事务 → 区域（必需）→ 文档行 → 车次头/变体
//   3. 提交 → 发布暂存引用
// 并发: 车次头 "查找或插入" 在按键锁内执行；锁只覆盖单个键
// 红线: 取消或失败时文档行、车次头、变体一并回滚
// ==========================================

use crate::domain::document::{ImportDocument, TrainFragment};
use crate::domain::types::ReferenceKind;
use crate::engine::events::{CancellationToken, ImportPhase, ImportProgress, ProgressSink};
use crate::engine::keyed_lock::KeyedLocks;
use crate::engine::reference_resolver::{ReferenceCache, ReferenceResolver};
use crate::importer::error::{ImportError, ImportResult};
use crate::repository::claim::UpsertOutcome;
use crate::repository::document_repo::{DocumentRepository, NewDocument};
use crate::repository::train_repo::{TrainHeaderRepository, VariantAttributes};
use rusqlite::{Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// (车次, 时刻表年度)
pub type HeaderKey = (u32, i32);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectImportReport {
    pub file_name: String,
    pub document_id: i64,
    pub headers_created: usize,
    pub variants_inserted: usize,
    pub variants_updated: usize,
    pub variants_unchanged: usize,
}

pub struct DirectImporter {
    cache: Arc<ReferenceCache>,
    locks: Arc<KeyedLocks<HeaderKey>>,
}

impl DirectImporter {
    pub fn new(cache: Arc<ReferenceCache>, locks: Arc<KeyedLocks<HeaderKey>>) -> Self {
        Self { cache, locks }
    }

    /// 直接导入整个文档: 引用 → 文档行 → 车次头/变体
    ///
    /// # 返回
    /// - Err(ImportError::Document): 事务已回滚（案件/发送方除外）
    #[instrument(skip_all, fields(file = %document.header.file_name, case_number = %document.header.case_number))]
    pub fn import_document(
        &self,
        conn: &mut Connection,
        document: &ImportDocument,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> ImportResult<DirectImportReport> {
        let header = &document.header;
        self.import_document_inner(conn, document, progress, cancel).map_err(|e| {
            if e.is_cancelled() {
                warn!("直接导入已取消，事务已回滚");
            }
            e.in_document(&header.file_name, &header.case_number)
        })
    }

    fn import_document_inner(
        &self,
        conn: &mut Connection,
        document: &ImportDocument,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> ImportResult<DirectImportReport> {
        let header = &document.header;
        cancel.check()?;

        // === 步骤 1: 事务外引用 ===
        let (case_id, sender_id) = {
            let mut resolver = ReferenceResolver::autocommit(conn, &self.cache);
            let case_id = resolver.resolve_case(&header.case_number, header.timetable_year)?;
            if !case_id.is_resolved() {
                return Err(ImportError::UnresolvedMandatoryReference {
                    kind: ReferenceKind::Case,
                    key: header.case_number.clone(),
                    file: header.file_name.clone(),
                });
            }
            let sender_id = resolver.resolve_sender(
                &header.sender.name,
                header.sender.email.as_deref(),
                header.sender.department.as_deref(),
            )?;
            (case_id, sender_id)
        };

        // === 步骤 2: 文档行 + 车次头/变体 ===
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut resolver = ReferenceResolver::transactional(&tx, &self.cache);

        let region_id = resolver.resolve(ReferenceKind::Region, &header.region)?;
        if !region_id.is_resolved() {
            return Err(ImportError::UnresolvedMandatoryReference {
                kind: ReferenceKind::Region,
                key: header.region.clone(),
                file: header.file_name.clone(),
            });
        }

        let document_id = DocumentRepository::new(&tx)
            .claim(&NewDocument {
                case_id: case_id.0,
                file_name: &header.file_name,
                dialect: header.dialect,
                region_id: region_id.0,
                sender_id: sender_id.as_nullable(),
                exported_at: header.exported_at,
                version: header.version,
                valid_from: header.valid_from,
                valid_to: header.valid_to,
            })?
            .into_inner();

        let report = self.write_variants(
            &tx,
            &mut resolver,
            &header.file_name,
            document_id,
            header.timetable_year,
            &document.trains,
            progress,
            cancel,
        )?;

        // === 步骤 3: 提交 → 发布 ===
        debug!(staged = resolver.staged_len(), "提交直接导入事务");
        let staged = resolver.into_staged();
        tx.commit()?;
        self.cache.publish(staged);

        Ok(report)
    }

    /// 写入车次头与变体（文档行已存在），单独一个事务
    pub fn import_variants(
        &self,
        conn: &mut Connection,
        document_id: i64,
        timetable_year: i32,
        trains: &[TrainFragment],
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> ImportResult<DirectImportReport> {
        cancel.check()?;

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut resolver = ReferenceResolver::transactional(&tx, &self.cache);
        let report = self.write_variants(
            &tx,
            &mut resolver,
            "",
            document_id,
            timetable_year,
            trains,
            progress,
            cancel,
        )?;

        let staged = resolver.into_staged();
        tx.commit()?;
        self.cache.publish(staged);

        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    fn write_variants(
        &self,
        conn: &Connection,
        resolver: &mut ReferenceResolver<'_>,
        file_name: &str,
        document_id: i64,
        timetable_year: i32,
        trains: &[TrainFragment],
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> ImportResult<DirectImportReport> {
        let headers = TrainHeaderRepository::new(conn);
        let mut report = DirectImportReport {
            file_name: file_name.to_string(),
            document_id,
            ..Default::default()
        };

        let total = trains.len();
        for (i, fragment) in trains.iter().enumerate() {
            cancel.check()?;

            let key = (fragment.number, timetable_year);
            let header = self
                .locks
                .with_lock(&key, || headers.claim_header(fragment.number, timetable_year))?;
            if header.is_inserted() {
                report.headers_created += 1;
            }

            let context = format!("{}@{}", fragment.number, fragment.traffic_day);
            let attrs = VariantAttributes {
                designation: fragment.designation.clone(),
                customer_id: resolver.resolve_optional(
                    ReferenceKind::Customer,
                    fragment.operator.as_deref(),
                    &context,
                )?,
                from_station_id: resolver.resolve_optional(
                    ReferenceKind::Station,
                    fragment.departure_station.as_deref(),
                    &context,
                )?,
                to_station_id: resolver.resolve_optional(
                    ReferenceKind::Station,
                    fragment.arrival_station.as_deref(),
                    &context,
                )?,
                remarks: fragment.remarks.clone(),
            };

            let variant =
                headers.upsert_variant(header.into_inner(), document_id, fragment.traffic_day, &attrs)?;
            match variant.outcome {
                UpsertOutcome::Inserted => report.variants_inserted += 1,
                UpsertOutcome::Updated => report.variants_updated += 1,
                UpsertOutcome::Unchanged => report.variants_unchanged += 1,
            }

            progress.report(&ImportProgress {
                file_name: report.file_name.clone(),
                phase: ImportPhase::Trains,
                current: i + 1,
                total,
            });
        }

        info!(
            document_id,
            headers_created = report.headers_created,
            variants = report.variants_inserted + report.variants_updated + report.variants_unchanged,
            "直接导入完成"
        );
        Ok(report)
    }
}

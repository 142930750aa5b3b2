// ==========================================
// 施工时刻表导入引擎 - 文档写入编排
// ==========================================
// 职责: 一个文档 = 一个 IMMEDIATE 事务；每列车一个保存点
// 流程:
//   1. 事务外解析案件/发送方/施工措施号（立即持久）
//   2. 开启事务 → 区域（必需）→ 文档行
//   3. 施工线路区段整体替换
//   4. 协调工厂（每文档一次）
//   5. 逐列车写入（单列车失败只回滚自己的保存点）
//   6. 次级阶段: 取消停站标记
//   7. 提交 → 发布暂存引用
// 红线: 任何文档级错误都回滚整个事务，并带上文件名/案件号返回
// ==========================================

use crate::db::with_savepoint;
use crate::domain::document::{DocumentHeader, ImportDocument};
use crate::domain::train::{CanonicalTrain, ReconciliationStats};
use crate::domain::types::{ReferenceKind, RegulationKind, SurrogateId};
use crate::engine::events::{CancellationToken, ImportPhase, ImportProgress, ProgressSink};
use crate::engine::reconciliation::ReconciliationFactory;
use crate::engine::reference_resolver::{ReferenceCache, ReferenceResolver};
use crate::importer::error::{ImportError, ImportResult};
use crate::repository::claim::UpsertOutcome;
use crate::repository::document_repo::{DocumentRepository, NewDocument, RouteSectionRow};
use crate::repository::regulation_repo::RegulationRepository;
use crate::repository::train_repo::{NodeTimeRow, StopRow, TrainAttributes, TrainRepository};
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// 编排选项
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportOptions {
    /// 首个单列车失败即终止整个文档
    pub stop_on_first_error: bool,
}

/// 单列车失败记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainFailure {
    pub train_number: u32,
    pub traffic_day: NaiveDate,
    pub reason: String,
}

/// 文档导入报告
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentImportReport {
    pub file_name: String,
    pub case_id: i64,
    pub document_id: i64,
    pub document_created: bool,

    pub route_sections: usize,

    pub trains_inserted: usize,
    pub trains_updated: usize,
    pub trains_unchanged: usize,

    pub regulations_inserted: usize,
    pub regulations_merged: usize,
    pub regulations_unchanged: usize,

    pub stops_cancelled: usize,

    pub failures: Vec<TrainFailure>,
    pub reconciliation: ReconciliationStats,
}

impl DocumentImportReport {
    pub fn persisted_trains(&self) -> usize {
        self.trains_inserted + self.trains_updated + self.trains_unchanged
    }

    fn count_train(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.trains_inserted += 1,
            UpsertOutcome::Updated => self.trains_updated += 1,
            UpsertOutcome::Unchanged => self.trains_unchanged += 1,
        }
    }

    fn count_regulation(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.regulations_inserted += 1,
            UpsertOutcome::Updated => self.regulations_merged += 1,
            UpsertOutcome::Unchanged => self.regulations_unchanged += 1,
        }
    }
}

/// 单列车写入结果（保存点成功后才计入报告）
struct TrainWrite {
    train_id: i64,
    train: UpsertOutcome,
    regulations: Vec<UpsertOutcome>,
}

// ==========================================
// DocumentImporter
// ==========================================
pub struct DocumentImporter {
    cache: Arc<ReferenceCache>,
    factory: ReconciliationFactory,
    options: ImportOptions,
}

impl DocumentImporter {
    pub fn new(cache: Arc<ReferenceCache>, options: ImportOptions) -> Self {
        Self {
            cache,
            factory: ReconciliationFactory::new(),
            options,
        }
    }

    pub fn cache(&self) -> &Arc<ReferenceCache> {
        &self.cache
    }

    /// 导入单个文档
    ///
    /// # 返回
    /// - Ok(report): 事务已提交（report.failures 记录被跳过的列车）
    /// - Err(ImportError::Document): 事务已回滚
    #[instrument(skip_all, fields(file = %document.header.file_name, case_number = %document.header.case_number))]
    pub fn import(
        &self,
        conn: &mut Connection,
        document: &ImportDocument,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> ImportResult<DocumentImportReport> {
        let header = &document.header;
        info!(
            dialect = %header.dialect,
            exported_at = %header.exported_at,
            trains = document.trains.len(),
            secondary = document.secondary_fragment_count(),
            "开始导入文档"
        );

        match self.import_inner(conn, document, progress, cancel) {
            Ok(report) => {
                info!(
                    document_id = report.document_id,
                    persisted = report.persisted_trains(),
                    failed = report.failures.len(),
                    regulations = report.regulations_inserted + report.regulations_merged,
                    "文档导入完成"
                );
                Ok(report)
            }
            Err(e) => {
                if e.is_cancelled() {
                    warn!("文档导入已取消，事务已回滚");
                } else if e.is_busy() {
                    debug!(error = %e, "数据库写锁被占用，文档未写入");
                } else {
                    error!(error = %e, "文档导入失败，事务已回滚");
                }
                Err(e.in_document(&header.file_name, &header.case_number))
            }
        }
    }

    fn import_inner(
        &self,
        conn: &mut Connection,
        document: &ImportDocument,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> ImportResult<DocumentImportReport> {
        let header = &document.header;
        cancel.check()?;

        // === 步骤 1: 事务外引用（立即持久）===
        let (case_id, sender_id) = self.resolve_durable_references(conn, header)?;

        // === 步骤 2: 开启事务 ===
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

        let claim = DocumentRepository::new(&tx).claim(&NewDocument {
            case_id: case_id.0,
            file_name: &header.file_name,
            dialect: header.dialect,
            region_id: region_id.0,
            sender_id: sender_id.as_nullable(),
            exported_at: header.exported_at,
            version: header.version,
            valid_from: header.valid_from,
            valid_to: header.valid_to,
        })?;
        let mut report = DocumentImportReport {
            file_name: header.file_name.clone(),
            case_id: case_id.0,
            document_id: claim.into_inner(),
            document_created: claim.is_inserted(),
            ..Default::default()
        };
        debug!(document_id = report.document_id, created = report.document_created, "文档行就绪");

        // === 步骤 3: 施工线路区段 ===
        let sections = self.build_route_sections(&mut resolver, document, progress, cancel)?;
        report.route_sections =
            DocumentRepository::new(&tx).replace_route_sections(report.document_id, &sections)?;

        // === 步骤 4: 协调 ===
        let reconciled = self.factory.reconcile_cancellable(document, cancel)?;
        report.reconciliation = reconciled.stats.clone();

        // === 步骤 5: 逐列车写入 ===
        let total = reconciled.trains.len();
        let mut persisted: Vec<(i64, &CanonicalTrain)> = Vec::with_capacity(total);
        for (i, train) in reconciled.trains.iter().enumerate() {
            cancel.check()?;

            let mark = resolver.mark();
            let result = with_savepoint(&tx, "sp_train", || {
                persist_train(&tx, &mut resolver, report.document_id, &header.file_name, train)
            });

            match result {
                Ok(write) => {
                    report.count_train(write.train);
                    for outcome in &write.regulations {
                        report.count_regulation(*outcome);
                    }
                    persisted.push((write.train_id, train));
                }
                Err(e) => {
                    resolver.rollback_to(mark);
                    warn!(
                        file = %header.file_name,
                        case_id = case_id.0,
                        train_number = train.key.number,
                        traffic_day = %train.key.traffic_day,
                        error = %e,
                        "列车写入失败，已回滚该列车"
                    );
                    let failure = TrainFailure {
                        train_number: train.key.number,
                        traffic_day: train.key.traffic_day,
                        reason: e.to_string(),
                    };
                    if self.options.stop_on_first_error {
                        return Err(ImportError::PerTrainFailure {
                            train_number: failure.train_number,
                            traffic_day: failure.traffic_day,
                            reason: failure.reason,
                        });
                    }
                    report.failures.push(failure);
                }
            }

            progress.report(&ImportProgress {
                file_name: header.file_name.clone(),
                phase: ImportPhase::Trains,
                current: i + 1,
                total,
            });
        }

        // === 步骤 6: 次级阶段（取消停站）===
        report.stops_cancelled =
            self.apply_stop_cancellations(&tx, &mut resolver, &persisted, &header.file_name, progress, cancel)?;

        // === 步骤 7: 提交 → 发布 ===
        debug!(staged = resolver.staged_len(), "提交文档事务");
        let staged = resolver.into_staged();
        tx.commit()?;
        self.cache.publish(staged);

        Ok(report)
    }

    /// 案件（必需）、发送方（可选）、施工措施号: 自动提交模式解析
    fn resolve_durable_references(
        &self,
        conn: &Connection,
        header: &DocumentHeader,
    ) -> ImportResult<(SurrogateId, SurrogateId)> {
        let mut resolver = ReferenceResolver::autocommit(conn, &self.cache);

        let case_id = resolver.resolve_case(&header.case_number, header.timetable_year)?;
        if !case_id.is_resolved() {
            return Err(ImportError::UnresolvedMandatoryReference {
                kind: ReferenceKind::Case,
                key: header.case_number.clone(),
                file: header.file_name.clone(),
            });
        }

        let sender = &header.sender;
        let sender_id = resolver.resolve_sender(
            &sender.name,
            sender.email.as_deref(),
            sender.department.as_deref(),
        )?;
        if !sender_id.is_resolved() {
            warn!(file = %header.file_name, "发送方缺失，文档写入 NULL");
        }

        let mut registered = 0;
        for measure in &header.construction_measures {
            if resolver.register_construction_measure(case_id, measure)? {
                registered += 1;
            }
        }
        debug!(case_id = case_id.0, registered, "施工措施号登记完成");

        Ok((case_id, sender_id))
    }

    /// 校验并解析施工线路区段（完全相同的区段只保留一次）
    fn build_route_sections(
        &self,
        resolver: &mut ReferenceResolver<'_>,
        document: &ImportDocument,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> ImportResult<Vec<RouteSectionRow>> {
        let file = &document.header.file_name;
        let total = document.route_sections.len();
        let mut seen = HashSet::new();
        let mut rows = Vec::with_capacity(total);

        for (i, section) in document.route_sections.iter().enumerate() {
            cancel.check()?;

            let (Some(construction_start), Some(construction_end)) =
                (section.construction_start, section.construction_end)
            else {
                return Err(ImportError::MalformedChildData {
                    file: file.clone(),
                    detail: format!(
                        "线路 {} 区段 {}-{} 缺少施工起止时间",
                        section.route_number, section.from_station, section.to_station
                    ),
                });
            };

            let route = resolver.resolve(ReferenceKind::Route, &section.route_number)?;
            let from = resolver.resolve(ReferenceKind::Station, &section.from_station)?;
            let to = resolver.resolve(ReferenceKind::Station, &section.to_station)?;
            resolver.resolve_station_on_route(from, route)?;
            resolver.resolve_station_on_route(to, route)?;

            let row = RouteSectionRow {
                route_id: route.as_nullable(),
                from_station_id: from.as_nullable(),
                to_station_id: to.as_nullable(),
                construction_start,
                construction_end,
                description: section.description.clone(),
            };
            if seen.insert(row.clone()) {
                rows.push(row);
            } else {
                debug!(route = %section.route_number, "重复施工区段，跳过");
            }

            progress.report(&ImportProgress {
                file_name: file.clone(),
                phase: ImportPhase::RouteSections,
                current: i + 1,
                total,
            });
        }
        Ok(rows)
    }

    fn apply_stop_cancellations(
        &self,
        conn: &Connection,
        resolver: &mut ReferenceResolver<'_>,
        persisted: &[(i64, &CanonicalTrain)],
        file: &str,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> ImportResult<usize> {
        let targets: Vec<(i64, &str)> = persisted
            .iter()
            .flat_map(|(train_id, train)| {
                train
                    .regulations
                    .iter()
                    .filter(|r| r.kind == RegulationKind::StopCancellation)
                    .map(move |r| (*train_id, r.anchor_station.as_str()))
            })
            .collect();

        let total = targets.len();
        let repo = TrainRepository::new(conn);
        let mut cancelled = 0;
        for (i, (train_id, station)) in targets.into_iter().enumerate() {
            cancel.check()?;
            let station_id = resolver.resolve(ReferenceKind::Station, station)?;
            if station_id.is_resolved() {
                let affected = repo.mark_stop_cancelled(train_id, station_id.0)?;
                if affected == 0 {
                    debug!(train_id, station = %station, "取消停站未匹配到停站记录");
                }
                cancelled += affected;
            }
            progress.report(&ImportProgress {
                file_name: file.to_string(),
                phase: ImportPhase::SecondaryFragments,
                current: i + 1,
                total,
            });
        }
        Ok(cancelled)
    }

    /// 标记文档导入完成（独立短事务，幂等）
    ///
    /// # 返回
    /// - true: 本次写入了 imported_at
    pub fn mark_import_completed(&self, conn: &mut Connection, document_id: i64) -> ImportResult<bool> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let marked = DocumentRepository::new(&tx).mark_imported(document_id, Utc::now().naive_utc())?;
        tx.commit()?;
        if marked {
            info!(document_id, "文档已标记导入完成");
        }
        Ok(marked)
    }
}

/// 写入单列车: 列车行 → 停站 → 节点时刻 → 调整
fn persist_train(
    conn: &Connection,
    resolver: &mut ReferenceResolver<'_>,
    document_id: i64,
    file: &str,
    train: &CanonicalTrain,
) -> ImportResult<TrainWrite> {
    let context = train.key.to_string();
    let attrs = TrainAttributes {
        designation: train.designation.clone(),
        customer_id: resolver.resolve_optional(ReferenceKind::Customer, train.operator.as_deref(), &context)?,
        from_station_id: resolver.resolve_optional(
            ReferenceKind::Station,
            train.departure_station.as_deref(),
            &context,
        )?,
        to_station_id: resolver.resolve_optional(
            ReferenceKind::Station,
            train.arrival_station.as_deref(),
            &context,
        )?,
        speed_kmh: train.speed_kmh,
        brake_position: train.brake_position.clone(),
        brake_ratio: train.brake_ratio,
        load_t: train.load_t,
        length_m: train.length_m,
        remarks: train.remarks.clone(),
        is_synthesized: train.is_synthesized,
        extras_json: train.extras.as_ref().map(serde_json::to_string).transpose()?,
    };

    let trains = TrainRepository::new(conn);
    let upserted = trains.upsert(document_id, &train.key, &attrs)?;

    // 停站与节点时刻的车站是必需引用
    let mut mandatory_station = |code: &str| -> ImportResult<i64> {
        let id = resolver.resolve(ReferenceKind::Station, code)?;
        if id.is_resolved() {
            Ok(id.0)
        } else {
            Err(ImportError::UnresolvedMandatoryReference {
                kind: ReferenceKind::Station,
                key: code.to_string(),
                file: file.to_string(),
            })
        }
    };

    let mut stops = Vec::with_capacity(train.stops.len());
    for stop in &train.stops {
        stops.push(StopRow {
            station_id: mandatory_station(&stop.station)?,
            arrival: stop.arrival,
            departure: stop.departure,
            activity: stop.activity.clone(),
        });
    }
    let mut node_times = Vec::with_capacity(train.node_times.len());
    for node in &train.node_times {
        node_times.push(NodeTimeRow {
            station_id: mandatory_station(&node.station)?,
            arrival: node.arrival,
            departure: node.departure,
        });
    }
    trains.replace_schedule_stops(upserted.id, &stops)?;
    trains.replace_node_times(upserted.id, &node_times)?;

    let regulations = RegulationRepository::new(conn);
    let mut outcomes = Vec::with_capacity(train.regulations.len());
    for regulation in &train.regulations {
        let anchor_id = resolver.resolve(ReferenceKind::Station, &regulation.anchor_station)?;
        let upserted = regulations.upsert(
            upserted.id,
            regulation.kind,
            &regulation.anchor_station,
            anchor_id.as_nullable(),
            &regulation.payload,
        )?;
        outcomes.push(upserted.outcome);
    }

    Ok(TrainWrite {
        train_id: upserted.id,
        train: upserted.outcome,
        regulations: outcomes,
    })
}

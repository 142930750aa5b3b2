// ==========================================
// 施工时刻表导入引擎 - 并发导入池
// ==========================================
// 职责: 固定数量 worker（spawn_blocking）消费共享 FIFO，按导出时间从旧到新
// 约束: 每个 worker 独占自己的 SQLite 连接；每个文档一个事务
// 共享: 引用缓存 / 施工措施号去重集合 / 车次头按键锁
// 写锁: SQLite 写锁被占用时退避重试（文档整体幂等）
// 取消: 令牌触发后回滚进行中的文档，worker 停止取新文档
// ==========================================

use crate::config::settings::ImportSettings;
use crate::db::open_sqlite_connection_with_timeout;
use crate::domain::document::ImportDocument;
use crate::domain::types::{ImportMode, ReferenceKind};
use crate::engine::events::{CancellationToken, ProgressSink};
use crate::engine::keyed_lock::KeyedLocks;
use crate::engine::reference_resolver::ReferenceCache;
use crate::importer::direct_importer::{DirectImportReport, DirectImporter, HeaderKey};
use crate::importer::document_importer::{DocumentImportReport, DocumentImporter};
use crate::importer::error::{ImportError, ImportResult};
use futures::future::join_all;
use rusqlite::Connection;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, instrument, warn, Span};
use uuid::Uuid;

/// 单个文档的处理结果
#[derive(Debug)]
pub enum DocumentOutcome {
    Reconciled(DocumentImportReport),
    Direct(DirectImportReport),
    Failed { file_name: String, error: ImportError },
    /// 取消后未开始处理
    Skipped { file_name: String },
}

impl DocumentOutcome {
    pub fn file_name(&self) -> &str {
        match self {
            DocumentOutcome::Reconciled(report) => &report.file_name,
            DocumentOutcome::Direct(report) => &report.file_name,
            DocumentOutcome::Failed { file_name, .. } | DocumentOutcome::Skipped { file_name } => {
                file_name
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DocumentOutcome::Reconciled(_) | DocumentOutcome::Direct(_))
    }
}

/// 队列项: (队列序号, 文档)
type QueueItem = (usize, ImportDocument);

/// 写锁退避: 起始 / 上限
const BUSY_BACKOFF_START: Duration = Duration::from_millis(20);
const BUSY_BACKOFF_MAX: Duration = Duration::from_millis(500);

struct WorkerContext {
    db_path: String,
    settings: ImportSettings,
    queue: Mutex<VecDeque<QueueItem>>,
    results: Mutex<Vec<(usize, DocumentOutcome)>>,
    reconciled: DocumentImporter,
    direct: DirectImporter,
    progress: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
}

// ==========================================
// ImportPool
// ==========================================
pub struct ImportPool {
    db_path: String,
    settings: ImportSettings,
    cache: Arc<ReferenceCache>,
    header_locks: Arc<KeyedLocks<HeaderKey>>,
    progress: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
}

impl ImportPool {
    pub fn new(
        db_path: impl Into<String>,
        settings: ImportSettings,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            db_path: db_path.into(),
            settings,
            cache: Arc::new(ReferenceCache::new()),
            header_locks: Arc::new(KeyedLocks::new()),
            progress,
            cancel,
        }
    }

    /// 复用已有缓存（同一会话内多批次导入）
    pub fn with_cache(mut self, cache: Arc<ReferenceCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> &Arc<ReferenceCache> {
        &self.cache
    }

    /// 导入全部文档，返回顺序与队列顺序（导出时间升序）一致
    #[instrument(skip_all, fields(session_id, documents = documents.len(), workers = self.settings.worker_count))]
    pub async fn run(&self, mut documents: Vec<ImportDocument>) -> ImportResult<Vec<DocumentOutcome>> {
        let session_id = Uuid::new_v4();
        Span::current().record("session_id", tracing::field::display(session_id));

        documents.sort_by_key(|doc| doc.header.exported_at);
        let total = documents.len();
        info!(total, mode = ?self.settings.import_mode, "导入池启动");

        if self.settings.warm_region_cache {
            self.warm_up().await?;
        }

        let context = Arc::new(WorkerContext {
            db_path: self.db_path.clone(),
            settings: self.settings.clone(),
            queue: Mutex::new(documents.into_iter().enumerate().collect()),
            results: Mutex::new(Vec::with_capacity(total)),
            reconciled: DocumentImporter::new(Arc::clone(&self.cache), self.settings.import_options()),
            direct: DirectImporter::new(Arc::clone(&self.cache), Arc::clone(&self.header_locks)),
            progress: Arc::clone(&self.progress),
            cancel: self.cancel.clone(),
        });

        let worker_count = self.settings.worker_count.max(1).min(total.max(1));
        let handles = (0..worker_count).map(|worker_id| {
            let context = Arc::clone(&context);
            tokio::task::spawn_blocking(move || run_worker(worker_id, &context))
        });

        for joined in join_all(handles).await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(e) => return Err(ImportError::Worker(e.to_string())),
            }
        }

        let mut outcomes = {
            let mut results = lock_or_recover(&context.results);
            std::mem::take(&mut *results)
        };
        {
            let mut queue = lock_or_recover(&context.queue);
            for (seq, document) in queue.drain(..) {
                outcomes.push((
                    seq,
                    DocumentOutcome::Skipped {
                        file_name: document.header.file_name,
                    },
                ));
            }
        }
        outcomes.sort_by_key(|(seq, _)| *seq);

        let succeeded = outcomes.iter().filter(|(_, o)| o.is_success()).count();
        info!(total, succeeded, failed = total - succeeded, "导入池结束");
        Ok(outcomes.into_iter().map(|(_, outcome)| outcome).collect())
    }

    async fn warm_up(&self) -> ImportResult<()> {
        let db_path = self.db_path.clone();
        let busy_timeout_ms = self.settings.busy_timeout_ms;
        let cache = Arc::clone(&self.cache);
        tokio::task::spawn_blocking(move || -> ImportResult<()> {
            let conn = open_sqlite_connection_with_timeout(&db_path, busy_timeout_ms)?;
            cache.warm_up(&conn, ReferenceKind::Region)?;
            Ok(())
        })
        .await
        .map_err(|e| ImportError::Worker(e.to_string()))?
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// worker 主循环: 取队首 → 导入 → 记录结果；取消后停止
fn run_worker(worker_id: usize, context: &WorkerContext) -> ImportResult<()> {
    let mut conn = open_sqlite_connection_with_timeout(&context.db_path, context.settings.busy_timeout_ms)?;
    info!(worker_id, "导入 worker 启动");

    loop {
        if context.cancel.is_cancelled() {
            warn!(worker_id, "收到取消信号，worker 停止");
            break;
        }
        let next = lock_or_recover(&context.queue).pop_front();
        let Some((seq, document)) = next else {
            break;
        };

        let outcome = import_one(context, &mut conn, &document);
        let stop = matches!(&outcome, DocumentOutcome::Failed { error, .. } if error.is_cancelled());
        lock_or_recover(&context.results).push((seq, outcome));
        if stop {
            warn!(worker_id, "文档被取消，worker 停止");
            break;
        }
    }

    info!(worker_id, "导入 worker 结束");
    Ok(())
}

fn import_one(context: &WorkerContext, conn: &mut Connection, document: &ImportDocument) -> DocumentOutcome {
    let file_name = document.header.file_name.clone();
    let progress = context.progress.as_ref();

    let result = match context.settings.import_mode {
        ImportMode::Reconciled => retry_on_busy(context, document, || {
            context.reconciled.import(conn, document, progress, &context.cancel)
        })
        .and_then(|report| {
            retry_on_busy(context, document, || {
                context.reconciled.mark_import_completed(conn, report.document_id)
            })
            .map(|_| DocumentOutcome::Reconciled(report))
        }),
        ImportMode::Direct => retry_on_busy(context, document, || {
            context.direct.import_document(conn, document, progress, &context.cancel)
        })
        .and_then(|report| {
            retry_on_busy(context, document, || {
                context.reconciled.mark_import_completed(conn, report.document_id)
            })
            .map(|_| DocumentOutcome::Direct(report))
        }),
    };

    match result {
        Ok(outcome) => outcome,
        Err(error) => {
            if !error.is_cancelled() {
                error!(file = %file_name, error = %error, "文档导入失败");
            }
            DocumentOutcome::Failed { file_name, error }
        }
    }
}

/// 写锁被其他 worker 占用且 busy_timeout 已到期: 退避后重试整个操作
///
/// busy 只会出现在取得写锁之前（事务外引用均为查找或插入），因此重试是幂等的
fn retry_on_busy<T>(
    context: &WorkerContext,
    document: &ImportDocument,
    mut op: impl FnMut() -> ImportResult<T>,
) -> ImportResult<T> {
    let header = &document.header;
    let mut backoff = BUSY_BACKOFF_START;
    let mut attempt = 0;
    loop {
        match op() {
            Err(e) if e.is_busy() && attempt < context.settings.busy_retry_limit => {
                if context.cancel.is_cancelled() {
                    return Err(ImportError::Cancelled.in_document(&header.file_name, &header.case_number));
                }
                attempt += 1;
                warn!(
                    file = %header.file_name,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "数据库写锁被占用，退避后重试"
                );
                std::thread::sleep(backoff);
                backoff = (backoff * 2).min(BUSY_BACKOFF_MAX);
            }
            other => return other,
        }
    }
}

// ==========================================
// 施工时刻表导入引擎 - 命令行入口
// ==========================================
// 用法: bbp-import [--db <path>] [--log-json] <document.json>...
// 输入: 方言映射阶段产出的 ImportDocument JSON 文件
// ==========================================

use anyhow::{bail, Context, Result};
use bbp_import::config::{default_db_path, ConfigManager, ImportSettings};
use bbp_import::db::{init_schema, open_sqlite_connection};
use bbp_import::engine::{CancellationToken, TracingProgressSink};
use bbp_import::importer::{DocumentOutcome, ImportPool};
use bbp_import::logging::{self, LogFormat};
use bbp_import::ImportDocument;
use std::path::PathBuf;
use std::sync::Arc;

struct CliArgs {
    db_path: PathBuf,
    documents: Vec<PathBuf>,
    json_log: bool,
}

fn parse_args() -> Result<CliArgs> {
    let mut db_path = None;
    let mut documents = Vec::new();
    let mut json_log = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--db" => {
                let path = args.next().context("--db 需要一个路径参数")?;
                db_path = Some(PathBuf::from(path));
            }
            "--log-json" => json_log = true,
            "-h" | "--help" => {
                println!("用法: bbp-import [--db <path>] [--log-json] <document.json>...");
                std::process::exit(0);
            }
            _ => documents.push(PathBuf::from(arg)),
        }
    }

    if documents.is_empty() {
        bail!("至少需要一个文档文件（用法: bbp-import [--db <path>] <document.json>...）");
    }

    Ok(CliArgs {
        db_path: db_path.unwrap_or_else(default_db_path),
        documents,
        json_log,
    })
}

fn read_document(path: &PathBuf) -> Result<ImportDocument> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("读取文档失败: {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("文档 JSON 格式错误: {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args()?;
    logging::init(if args.json_log {
        LogFormat::Json
    } else {
        LogFormat::Text
    });

    tracing::info!("==================================================");
    tracing::info!("施工时刻表导入引擎 {}", bbp_import::VERSION);
    tracing::info!("使用数据库: {}", args.db_path.display());
    tracing::info!("==================================================");

    if let Some(parent) = args.db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("无法创建数据目录: {}", parent.display()))?;
        }
    }
    let db_path = args.db_path.to_string_lossy().to_string();

    {
        let conn = open_sqlite_connection(&db_path).context("无法打开数据库")?;
        init_schema(&conn).context("初始化数据库结构失败")?;
    }

    let settings = {
        let config = ConfigManager::new(&db_path).map_err(|e| anyhow::anyhow!(e))?;
        ImportSettings::load(&config)
            .await
            .map_err(|e| anyhow::anyhow!(e))?
    };

    let documents = args
        .documents
        .iter()
        .map(read_document)
        .collect::<Result<Vec<_>>>()?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("收到中断信号，正在取消导入");
                cancel.cancel();
            }
        });
    }

    let pool = ImportPool::new(db_path, settings, Arc::new(TracingProgressSink), cancel);
    let outcomes = pool.run(documents).await?;

    let mut failed = 0;
    for outcome in &outcomes {
        match outcome {
            DocumentOutcome::Reconciled(report) => println!(
                "OK     {}  trains={} (+{} ~{} ={})  regulations=+{} merged={}  failed_trains={}",
                report.file_name,
                report.persisted_trains(),
                report.trains_inserted,
                report.trains_updated,
                report.trains_unchanged,
                report.regulations_inserted,
                report.regulations_merged,
                report.failures.len(),
            ),
            DocumentOutcome::Direct(report) => println!(
                "OK     {}  headers_created={}  variants=+{} ~{} ={}",
                report.file_name,
                report.headers_created,
                report.variants_inserted,
                report.variants_updated,
                report.variants_unchanged,
            ),
            DocumentOutcome::Failed { file_name, error } => {
                failed += 1;
                println!("FAILED {}  {}", file_name, error);
            }
            DocumentOutcome::Skipped { file_name } => {
                failed += 1;
                println!("SKIP   {}", file_name);
            }
        }
    }

    if failed > 0 {
        bail!("{} 个文档未成功导入", failed);
    }
    Ok(())
}

// ==========================================
// 施工时刻表导入引擎 - 日志初始化
// ==========================================
// 输出: 文本（终端）或 JSON 行（采集）
// 过滤: RUST_LOG 优先；缺省时本 crate 为 info，依赖库只报 warn
// 并发: 导入池 worker 运行在阻塞线程上，日志带线程 ID 以区分 worker
// ==========================================

use tracing_subscriber::{fmt, EnvFilter};

/// 缺省过滤指令
pub const DEFAULT_DIRECTIVES: &str = "warn,bbp_import=info";

/// 日志输出格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// 初始化日志系统
///
/// # 环境变量
/// - RUST_LOG: 覆盖缺省过滤指令
///   例如: RUST_LOG=debug 或 RUST_LOG=bbp_import::engine=trace
///
/// # 示例
/// ```no_run
/// use bbp_import::logging::{self, LogFormat};
/// logging::init(LogFormat::Text);
/// ```
pub fn init(format: LogFormat) {
    match format {
        LogFormat::Text => fmt()
            .with_env_filter(env_filter())
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .init(),
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(env_filter())
            .with_current_span(true)
            .with_thread_ids(true)
            .init(),
    }
}

/// 初始化测试环境的日志系统
///
/// 使用更详细的日志级别，便于调试
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

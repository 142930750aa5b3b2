// ==========================================
// 施工时刻表导入引擎 - 进度上报与协作式取消
// ==========================================
// 职责: 定义进度接收 trait 与取消令牌，实现依赖倒置
// 说明: 引擎只上报 {阶段, 当前, 总数}，展示层自行实现 ProgressSink
// ==========================================

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

// ==========================================
// 导入阶段
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImportPhase {
    /// 施工线路区段
    RouteSections,
    /// 列车与调整
    Trains,
    /// 次级片段（取消停站等）
    SecondaryFragments,
}

impl ImportPhase {
    pub fn as_str(&self) -> &str {
        match self {
            ImportPhase::RouteSections => "RouteSections",
            ImportPhase::Trains => "Trains",
            ImportPhase::SecondaryFragments => "SecondaryFragments",
        }
    }
}

/// 进度事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportProgress {
    pub file_name: String,
    pub phase: ImportPhase,
    pub current: usize,
    pub total: usize,
}

// ==========================================
// ProgressSink Trait
// ==========================================
// 实现者: 展示层进度条 / CLI 日志 / 测试收集器
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: &ImportProgress);
}

/// 空实现（不需要进度时使用）
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpProgressSink;

impl ProgressSink for NoOpProgressSink {
    fn report(&self, _progress: &ImportProgress) {}
}

/// 以 tracing debug 日志输出进度
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn report(&self, progress: &ImportProgress) {
        tracing::debug!(
            file = %progress.file_name,
            phase = progress.phase.as_str(),
            current = progress.current,
            total = progress.total,
            "导入进度"
        );
    }
}

/// 收集所有进度事件（测试/诊断用）
#[derive(Debug, Default)]
pub struct CollectingProgressSink {
    events: Mutex<Vec<ImportProgress>>,
}

impl CollectingProgressSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ImportProgress> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ProgressSink for CollectingProgressSink {
    fn report(&self, progress: &ImportProgress) {
        match self.events.lock() {
            Ok(mut events) => events.push(progress.clone()),
            Err(poisoned) => poisoned.into_inner().push(progress.clone()),
        }
    }
}

// ==========================================
// 协作式取消
// ==========================================

/// 取消标记（在循环边界检查到取消时返回）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// 取消令牌（克隆后共享同一个信号）
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// 循环边界检查点
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_shared_between_clones() {
        let token = CancellationToken::new();
        let worker_view = token.clone();
        assert!(worker_view.check().is_ok());

        token.cancel();
        assert_eq!(worker_view.check(), Err(Cancelled));
    }

    #[test]
    fn test_collecting_sink_keeps_order() {
        let sink = CollectingProgressSink::new();
        for current in 1..=3 {
            sink.report(&ImportProgress {
                file_name: "a.xml".to_string(),
                phase: ImportPhase::Trains,
                current,
                total: 3,
            });
        }
        let events = sink.events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].current, 3);
    }
}

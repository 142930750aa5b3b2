// ==========================================
// 施工时刻表导入引擎 - 规范列车与调整模型
// ==========================================
// 职责: 协调工厂的输出（每个 (车次, 运行日) 一个规范列车）
// 红线: 调整载荷合并只补缺，不覆盖已有值
// ==========================================

use crate::domain::document::{NodeTimeFragment, StopFragment};
use crate::domain::types::{RegulationKind, TrainKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ==========================================
// CanonicalTrain - 规范列车
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalTrain {
    pub key: TrainKey,

    // ===== 运营属性 =====
    pub designation: Option<String>,
    pub operator: Option<String>,
    pub departure_station: Option<String>,
    pub arrival_station: Option<String>,

    // ===== 技术参数 =====
    pub speed_kmh: Option<u32>,
    pub brake_position: Option<String>,
    pub brake_ratio: Option<u32>,
    pub load_t: Option<u32>,
    pub length_m: Option<u32>,
    pub remarks: Option<String>,

    /// 仅因替代运输/替代列车片段引用而存在
    pub is_synthesized: bool,

    // ===== 子集合（按声明顺序）=====
    pub stops: Vec<StopFragment>,
    pub node_times: Vec<NodeTimeFragment>,
    pub extras: Option<Value>,

    // ===== 调整（按贡献顺序，已去重）=====
    pub regulations: Vec<CanonicalRegulation>,
}

impl CanonicalTrain {
    /// 创建只有端点的最小合成列车
    pub fn synthesized(
        key: TrainKey,
        departure_station: Option<String>,
        arrival_station: Option<String>,
        designation: Option<String>,
    ) -> Self {
        Self {
            key,
            designation,
            operator: None,
            departure_station,
            arrival_station,
            speed_kmh: None,
            brake_position: None,
            brake_ratio: None,
            load_t: None,
            length_m: None,
            remarks: None,
            is_synthesized: true,
            stops: Vec::new(),
            node_times: Vec::new(),
            extras: None,
            regulations: Vec::new(),
        }
    }

    pub fn regulation(&self, kind: RegulationKind, anchor_station: &str) -> Option<&CanonicalRegulation> {
        self.regulations
            .iter()
            .find(|r| r.kind == kind && r.anchor_station == anchor_station)
    }
}

// ==========================================
// CanonicalRegulation - 规范调整
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRegulation {
    pub kind: RegulationKind,
    pub anchor_station: String, // 已规范化的车站代码
    pub payload: Value,
}

// ==========================================
// ReconciliationStats - 协调统计
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationStats {
    pub seeded_trains: usize,
    pub merged_duplicate_declarations: usize,
    pub synthesized_trains: usize,
    pub regulations: usize,
    pub duplicate_regulations: usize,
    pub suppressed_by_cancellation: usize,
    pub unmatched_fragments: usize,
    pub unrecognized_section_kinds: usize,
    pub unanchored_fragments: usize,
}

/// 协调结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledDocument {
    pub trains: Vec<CanonicalTrain>,
    pub stats: ReconciliationStats,
}

// ==========================================
// 载荷合并
// ==========================================

/// 将 incoming 合并进 existing（只补缺，不覆盖）
///
/// - 对象: 逐键递归；existing 中缺失或为 null 的键取 incoming 的值
/// - 非对象: existing 为 null 时整体取 incoming，否则保持不变
///
/// 返回 existing 是否被修改
pub fn merge_fill_absent(existing: &mut Value, incoming: &Value) -> bool {
    match (existing, incoming) {
        (Value::Object(target), Value::Object(source)) => {
            let mut changed = false;
            for (key, value) in source {
                let populated = target.get(key).map_or(false, |v| !v.is_null());
                if populated {
                    if let Some(current) = target.get_mut(key) {
                        changed |= merge_fill_absent(current, value);
                    }
                } else if !value.is_null() {
                    target.insert(key.clone(), value.clone());
                    changed = true;
                }
            }
            changed
        }
        (target @ Value::Null, source) if !source.is_null() => {
            *target = source.clone();
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_fills_missing_keys_only() {
        let mut existing = json!({"minutes": 5, "reason": null});
        let changed = merge_fill_absent(
            &mut existing,
            &json!({"minutes": 12, "reason": "Kreuzung", "extra": true}),
        );
        assert!(changed);
        assert_eq!(existing, json!({"minutes": 5, "reason": "Kreuzung", "extra": true}));
    }

    #[test]
    fn test_merge_is_noop_when_everything_populated() {
        let mut existing = json!({"a": {"b": 1}});
        assert!(!merge_fill_absent(&mut existing, &json!({"a": {"b": 2}})));
        assert_eq!(existing, json!({"a": {"b": 1}}));
    }

    #[test]
    fn test_merge_nested_objects() {
        let mut existing = json!({"a": {"b": 1}});
        assert!(merge_fill_absent(&mut existing, &json!({"a": {"c": 2}})));
        assert_eq!(existing, json!({"a": {"b": 1, "c": 2}}));
    }
}

// ==========================================
// 施工时刻表导入引擎 - 协调工厂
// ==========================================
// 职责: 将直接声明、替代运输、替代列车、取消停站、停车等待、参数变更
//       等片段合并为每个 (车次, 运行日) 一个规范列车 + 去重调整集合
// 流程: 播种 → 合并替代运输 → 合并次级片段 → 去重（贯穿全程）
// 红线: 纯计算，无 I/O；输出只依赖输入顺序（不依赖哈希迭代顺序）
// ==========================================

use crate::domain::document::{
    HoldFragment, ImportDocument, KeyedFragment, ParameterOverrideFragment,
    ReplacementServiceFragment, StopCancellationFragment, TrainFragment,
};
use crate::domain::natural_key::normalize_station_code;
use crate::domain::train::{
    merge_fill_absent, CanonicalRegulation, CanonicalTrain, ReconciledDocument,
    ReconciliationStats,
};
use crate::domain::types::{RegulationKind, SectionKind, TrainKey};
use crate::engine::events::{CancellationToken, Cancelled};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

// ==========================================
// ReconciliationFactory - 协调工厂
// ==========================================
#[derive(Debug, Default, Clone, Copy)]
pub struct ReconciliationFactory;

impl ReconciliationFactory {
    pub fn new() -> Self {
        Self
    }

    /// 协调单个文档（不可取消）
    pub fn reconcile(&self, document: &ImportDocument) -> ReconciledDocument {
        match self.reconcile_cancellable(document, &CancellationToken::new()) {
            Ok(reconciled) => reconciled,
            // 新建令牌不会被取消
            Err(Cancelled) => ReconciledDocument {
                trains: Vec::new(),
                stats: ReconciliationStats::default(),
            },
        }
    }

    /// 协调单个文档，在每个片段迭代开始时检查取消
    pub fn reconcile_cancellable(
        &self,
        document: &ImportDocument,
        cancel: &CancellationToken,
    ) -> Result<ReconciledDocument, Cancelled> {
        let mut builder = TrainSetBuilder::default();

        // === 步骤 1: 播种 ===
        for fragment in &document.trains {
            cancel.check()?;
            builder.seed(fragment);
        }

        // === 步骤 2: 合并替代运输块 ===
        for fragment in &document.replacement_services {
            cancel.check()?;
            builder.merge_replacement_service(fragment);
        }

        // === 步骤 3: 合并次级片段 ===
        for fragment in &document.stop_cancellations {
            cancel.check()?;
            builder.merge_stop_cancellation(fragment);
        }
        for fragment in &document.holds {
            cancel.check()?;
            builder.merge_hold(fragment);
        }
        for fragment in &document.parameter_overrides {
            cancel.check()?;
            builder.merge_parameter_override(fragment);
        }

        let reconciled = builder.finish();
        info!(
            file = %document.header.file_name,
            trains = reconciled.trains.len(),
            synthesized = reconciled.stats.synthesized_trains,
            regulations = reconciled.stats.regulations,
            unmatched = reconciled.stats.unmatched_fragments,
            "文档协调完成"
        );
        Ok(reconciled)
    }
}

// ==========================================
// 内部构建器
// ==========================================

struct TrainSlot {
    train: CanonicalTrain,
    regulation_keys: HashSet<(RegulationKind, String)>,
    /// 直接声明为全程停运（与锚点能否解析无关）
    fully_cancelled: bool,
}

#[derive(Default)]
struct TrainSetBuilder {
    slots: Vec<TrainSlot>,
    index: HashMap<TrainKey, usize>,
    stats: ReconciliationStats,
}

impl TrainSetBuilder {
    fn push(&mut self, train: CanonicalTrain) -> usize {
        let idx = self.slots.len();
        self.index.insert(train.key.clone(), idx);
        self.slots.push(TrainSlot {
            train,
            regulation_keys: HashSet::new(),
            fully_cancelled: false,
        });
        idx
    }

    /// 合成最小列车条目
    fn synthesize(
        &mut self,
        key: TrainKey,
        departure: Option<&str>,
        arrival: Option<&str>,
        designation: Option<String>,
    ) -> usize {
        debug!(train = %key, "合成列车条目");
        self.stats.synthesized_trains += 1;
        self.push(CanonicalTrain::synthesized(
            key,
            departure.map(|s| s.trim().to_string()),
            arrival.map(|s| s.trim().to_string()),
            designation,
        ))
    }

    /// 挂接调整（首个写入者胜出）
    fn attach(
        &mut self,
        idx: usize,
        kind: RegulationKind,
        anchor: Option<String>,
        payload: Value,
    ) -> bool {
        let slot = &mut self.slots[idx];
        let Some(anchor_station) = anchor else {
            self.stats.unanchored_fragments += 1;
            warn!(train = %slot.train.key, kind = %kind, "调整缺少可解析的锚点站，跳过");
            return false;
        };

        if !slot.regulation_keys.insert((kind, anchor_station.clone())) {
            self.stats.duplicate_regulations += 1;
            debug!(
                train = %slot.train.key,
                kind = %kind,
                anchor = %anchor_station,
                "重复调整，保留首个"
            );
            return false;
        }

        slot.train.regulations.push(CanonicalRegulation {
            kind,
            anchor_station,
            payload: compact(payload),
        });
        true
    }

    // ===== 步骤 1 =====
    fn seed(&mut self, fragment: &TrainFragment) {
        let key = fragment.train_key();
        let idx = match self.index.get(&key) {
            Some(&idx) => {
                self.stats.merged_duplicate_declarations += 1;
                fill_from_fragment(&mut self.slots[idx].train, fragment);
                idx
            }
            None => {
                self.stats.seeded_trains += 1;
                self.push(train_from_fragment(fragment))
            }
        };

        let Some(raw_kind) = fragment.section_kind.as_deref() else {
            return;
        };
        let section_kind = SectionKind::parse(raw_kind);
        if section_kind == SectionKind::FullCancellation {
            self.slots[idx].fully_cancelled = true;
        }
        match section_kind.baseline_regulation() {
            Some(kind) => {
                let anchor = first_anchor(&[
                    fragment.departure_station.as_deref(),
                    fragment.arrival_station.as_deref(),
                ]);
                let payload = json!({
                    "section_kind": raw_kind.trim(),
                    "departure_station": fragment.departure_station,
                    "arrival_station": fragment.arrival_station,
                    "remarks": fragment.remarks,
                });
                self.attach(idx, kind, anchor, payload);
            }
            None => {
                self.stats.unrecognized_section_kinds += 1;
                warn!(train = %key, section_kind = %raw_kind, "未识别的区段类型，不生成基础调整");
            }
        }
    }

    // ===== 步骤 2 =====
    fn merge_replacement_service(&mut self, fragment: &ReplacementServiceFragment) {
        let key = fragment.train_key();
        let idx = match self.index.get(&key) {
            Some(&idx) => idx,
            None => self.synthesize(
                key.clone(),
                Some(fragment.cancelled_from.as_str()),
                fragment.cancelled_to.as_deref(),
                None,
            ),
        };

        if self.slots[idx].fully_cancelled {
            self.stats.suppressed_by_cancellation += 1;
            debug!(train = %key, "列车已全程停运，忽略替代运输调整");
        } else {
            let payload = json!({
                "cancelled_from": fragment.cancelled_from.trim(),
                "cancelled_to": fragment.cancelled_to,
                "mode": fragment.mode,
                "remarks": fragment.remarks,
                "substitute_train": fragment.substitute.as_ref().map(|s| s.number),
            });
            let anchor = normalize_station_code(&fragment.cancelled_from);
            self.attach(idx, RegulationKind::PartialCancellation, anchor, payload);
        }

        let Some(substitute) = &fragment.substitute else {
            return;
        };
        let substitute_key = substitute.train_key();
        if self.index.contains_key(&substitute_key) {
            // 已有直接声明或更早的片段，保持原样
            return;
        }
        let sidx = self.synthesize(
            substitute_key,
            Some(substitute.departure_station.as_str()),
            Some(substitute.arrival_station.as_str()),
            substitute.designation.clone(),
        );
        let payload = json!({
            "substitutes_train": fragment.train_number,
            "substitutes_traffic_day": fragment.traffic_day,
            "arrival_station": substitute.arrival_station.trim(),
        });
        let anchor = normalize_station_code(&substitute.departure_station);
        self.attach(sidx, RegulationKind::AdditionalService, anchor, payload);
    }

    // ===== 步骤 3 =====
    fn merge_secondary(
        &mut self,
        key: TrainKey,
        kind: RegulationKind,
        station: &str,
        payload: Value,
    ) {
        match self.index.get(&key) {
            Some(&idx) => {
                self.attach(idx, kind, normalize_station_code(station), payload);
            }
            None => {
                self.stats.unmatched_fragments += 1;
                warn!(train = %key, kind = %kind, station = %station, "片段没有对应列车，丢弃");
            }
        }
    }

    fn merge_stop_cancellation(&mut self, fragment: &StopCancellationFragment) {
        self.merge_secondary(
            fragment.train_key(),
            RegulationKind::StopCancellation,
            &fragment.station,
            json!({ "remarks": fragment.remarks }),
        );
    }

    fn merge_hold(&mut self, fragment: &HoldFragment) {
        self.merge_secondary(
            fragment.train_key(),
            RegulationKind::Hold,
            &fragment.station,
            json!({ "minutes": fragment.minutes, "reason": fragment.reason }),
        );
    }

    fn merge_parameter_override(&mut self, fragment: &ParameterOverrideFragment) {
        self.merge_secondary(
            fragment.train_key(),
            RegulationKind::ParameterOverride,
            &fragment.station,
            json!({
                "speed_kmh": fragment.speed_kmh,
                "brake_ratio": fragment.brake_ratio,
                "load_t": fragment.load_t,
                "length_m": fragment.length_m,
                "extras": fragment.extras,
            }),
        );
    }

    fn finish(mut self) -> ReconciledDocument {
        self.stats.regulations = self
            .slots
            .iter()
            .map(|slot| slot.train.regulations.len())
            .sum();
        ReconciledDocument {
            trains: self.slots.into_iter().map(|slot| slot.train).collect(),
            stats: self.stats,
        }
    }
}

// ==========================================
// 辅助函数
// ==========================================

fn train_from_fragment(fragment: &TrainFragment) -> CanonicalTrain {
    CanonicalTrain {
        key: fragment.train_key(),
        designation: fragment.designation.clone(),
        operator: fragment.operator.clone(),
        departure_station: fragment.departure_station.clone(),
        arrival_station: fragment.arrival_station.clone(),
        speed_kmh: fragment.speed_kmh,
        brake_position: fragment.brake_position.clone(),
        brake_ratio: fragment.brake_ratio,
        load_t: fragment.load_t,
        length_m: fragment.length_m,
        remarks: fragment.remarks.clone(),
        is_synthesized: false,
        stops: fragment.stops.clone(),
        node_times: fragment.node_times.clone(),
        extras: fragment.extras.clone(),
        regulations: Vec::new(),
    }
}

/// 同键的第二个直接声明: 只补缺
fn fill_from_fragment(train: &mut CanonicalTrain, fragment: &TrainFragment) {
    fn fill<T: Clone>(target: &mut Option<T>, source: &Option<T>) {
        if target.is_none() {
            *target = source.clone();
        }
    }

    fill(&mut train.designation, &fragment.designation);
    fill(&mut train.operator, &fragment.operator);
    fill(&mut train.departure_station, &fragment.departure_station);
    fill(&mut train.arrival_station, &fragment.arrival_station);
    fill(&mut train.speed_kmh, &fragment.speed_kmh);
    fill(&mut train.brake_position, &fragment.brake_position);
    fill(&mut train.brake_ratio, &fragment.brake_ratio);
    fill(&mut train.load_t, &fragment.load_t);
    fill(&mut train.length_m, &fragment.length_m);
    fill(&mut train.remarks, &fragment.remarks);

    if train.stops.is_empty() {
        train.stops = fragment.stops.clone();
    }
    if train.node_times.is_empty() {
        train.node_times = fragment.node_times.clone();
    }
    match (&mut train.extras, &fragment.extras) {
        (Some(existing), Some(incoming)) => {
            merge_fill_absent(existing, incoming);
        }
        (target @ None, Some(incoming)) => *target = Some(incoming.clone()),
        _ => {}
    }
}

/// 取第一个可解析的车站代码作为锚点
fn first_anchor(candidates: &[Option<&str>]) -> Option<String> {
    candidates
        .iter()
        .flatten()
        .find_map(|raw| normalize_station_code(raw))
}

/// 去掉顶层 null 字段
fn compact(mut payload: Value) -> Value {
    if let Value::Object(map) = &mut payload {
        map.retain(|_, v| !v.is_null());
    }
    payload
}

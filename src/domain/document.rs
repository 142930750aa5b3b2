// ==========================================
// 施工时刻表导入引擎 - 文档输入模型
// ==========================================
// 职责: 方言映射阶段产出的规范化 DTO（每个文档一份）
// 约定: 所有片段按 (车次, 运行日) 定位，并携带车站代码锚点
// 红线: 本模块不做解析，只承载数据
// ==========================================

use crate::domain::types::{Dialect, TrainKey};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

// ==========================================
// ImportDocument - 单个导入文档
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportDocument {
    pub header: DocumentHeader,
    #[serde(default)]
    pub route_sections: Vec<RouteSectionFragment>,
    #[serde(default)]
    pub trains: Vec<TrainFragment>,
    #[serde(default)]
    pub replacement_services: Vec<ReplacementServiceFragment>,
    #[serde(default)]
    pub stop_cancellations: Vec<StopCancellationFragment>,
    #[serde(default)]
    pub holds: Vec<HoldFragment>,
    #[serde(default)]
    pub parameter_overrides: Vec<ParameterOverrideFragment>,
}

// ==========================================
// DocumentHeader - 文档头
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentHeader {
    // ===== 文档定位 =====
    pub file_name: String,
    pub dialect: Dialect,
    pub case_number: String, // 案件号 (Vorgang)
    pub timetable_year: i32, // 时刻表年度

    // ===== 导出信息 =====
    pub exported_at: NaiveDateTime,
    pub sender: SenderIdentity,
    pub version: VersionTriple,

    // ===== 有效期与区域 =====
    pub valid_from: Option<NaiveDate>,
    pub valid_to: Option<NaiveDate>,
    pub region: String,

    // ===== 施工措施号 =====
    #[serde(default)]
    pub construction_measures: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderIdentity {
    pub name: String,
    pub email: Option<String>,
    pub department: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionTriple {
    pub major: u32,
    pub minor: u32,
    pub sub: u32,
}

// ==========================================
// RouteSectionFragment - 施工线路区段
// ==========================================
// 施工起止时间缺一即为结构性错误（文档级致命）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSectionFragment {
    pub route_number: String,
    pub from_station: String,
    pub to_station: String,
    pub construction_start: Option<NaiveDateTime>, // Baubeginn
    pub construction_end: Option<NaiveDateTime>,   // Bauende
    pub description: Option<String>,
}

// ==========================================
// TrainFragment - 直接声明的列车
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainFragment {
    pub number: u32,
    pub traffic_day: NaiveDate,

    // ===== 运营属性 =====
    pub designation: Option<String>, // 列车种类
    pub operator: Option<String>,    // 运营商（客户法定名称）
    pub section_kind: Option<String>,

    // ===== 运行端点 =====
    pub departure_station: Option<String>,
    pub arrival_station: Option<String>,

    // ===== 技术参数 =====
    pub speed_kmh: Option<u32>,
    pub brake_position: Option<String>,
    pub brake_ratio: Option<u32>, // 制动百分比
    pub load_t: Option<u32>,
    pub length_m: Option<u32>,
    pub remarks: Option<String>,

    // ===== 子集合 =====
    #[serde(default)]
    pub stops: Vec<StopFragment>,
    #[serde(default)]
    pub node_times: Vec<NodeTimeFragment>,

    /// 方言特有字段（不透明，按 JSON 落库）
    pub extras: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopFragment {
    pub station: String,
    pub arrival: Option<NaiveDateTime>,
    pub departure: Option<NaiveDateTime>,
    pub activity: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTimeFragment {
    pub station: String,
    pub arrival: Option<NaiveDateTime>,
    pub departure: Option<NaiveDateTime>,
}

// ==========================================
// ReplacementServiceFragment - 替代运输块
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplacementServiceFragment {
    pub train_number: u32,
    pub traffic_day: NaiveDate,
    pub cancelled_from: String,
    pub cancelled_to: Option<String>,
    pub mode: Option<String>, // 替代方式（如 BUS）
    pub remarks: Option<String>,
    pub substitute: Option<SubstituteTrain>,
}

/// 替代运输块中内嵌的替代列车
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstituteTrain {
    pub number: u32,
    pub traffic_day: NaiveDate,
    pub departure_station: String,
    pub arrival_station: String,
    pub designation: Option<String>,
}

// ==========================================
// 次级片段: 取消停站 / 停车等待 / 参数变更
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopCancellationFragment {
    pub train_number: u32,
    pub traffic_day: NaiveDate,
    pub station: String,
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldFragment {
    pub train_number: u32,
    pub traffic_day: NaiveDate,
    pub station: String,
    pub minutes: Option<u32>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterOverrideFragment {
    pub train_number: u32,
    pub traffic_day: NaiveDate,
    pub station: String,
    pub speed_kmh: Option<u32>,
    pub brake_ratio: Option<u32>,
    pub load_t: Option<u32>,
    pub length_m: Option<u32>,
    pub extras: Option<serde_json::Value>,
}

// ==========================================
// 片段键
// ==========================================
pub trait KeyedFragment {
    fn train_key(&self) -> TrainKey;
}

impl KeyedFragment for TrainFragment {
    fn train_key(&self) -> TrainKey {
        TrainKey::new(self.number, self.traffic_day)
    }
}

impl KeyedFragment for ReplacementServiceFragment {
    fn train_key(&self) -> TrainKey {
        TrainKey::new(self.train_number, self.traffic_day)
    }
}

impl KeyedFragment for SubstituteTrain {
    fn train_key(&self) -> TrainKey {
        TrainKey::new(self.number, self.traffic_day)
    }
}

impl KeyedFragment for StopCancellationFragment {
    fn train_key(&self) -> TrainKey {
        TrainKey::new(self.train_number, self.traffic_day)
    }
}

impl KeyedFragment for HoldFragment {
    fn train_key(&self) -> TrainKey {
        TrainKey::new(self.train_number, self.traffic_day)
    }
}

impl KeyedFragment for ParameterOverrideFragment {
    fn train_key(&self) -> TrainKey {
        TrainKey::new(self.train_number, self.traffic_day)
    }
}

impl ImportDocument {
    /// 次级片段总数（用于进度统计）
    pub fn secondary_fragment_count(&self) -> usize {
        self.stop_cancellations.len() + self.holds.len() + self.parameter_overrides.len()
    }
}

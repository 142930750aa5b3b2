// ==========================================
// 施工时刻表导入引擎 - 领域类型定义
// ==========================================
// 职责: 代理键、引用类型、区段类型、调整类型等封闭枚举
// 红线: 未识别的区段类型必须是可区分的变体，不允许静默默认
// ==========================================

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 代理键 (Surrogate Id)
// ==========================================
// 0 表示"未解析"哨兵值，落库时写 NULL
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SurrogateId(pub i64);

impl SurrogateId {
    /// 未解析哨兵值
    pub const UNRESOLVED: SurrogateId = SurrogateId(0);

    pub fn is_resolved(self) -> bool {
        self.0 > 0
    }

    /// 转换为可空列值（未解析 → NULL）
    pub fn as_nullable(self) -> Option<i64> {
        if self.is_resolved() {
            Some(self.0)
        } else {
            None
        }
    }
}

impl fmt::Display for SurrogateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ==========================================
// 引用类型 (Reference Kind)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceKind {
    Station,      // 车站代码 (Ril100)
    Route,        // 线路号
    StationRoute, // 车站-线路关联
    Region,       // 区域简称
    Customer,     // 客户（运营商法定名称）
    Sender,       // 发送方身份
    Case,         // 案件 (Vorgang)
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::Station => "STATION",
            ReferenceKind::Route => "ROUTE",
            ReferenceKind::StationRoute => "STATION_ROUTE",
            ReferenceKind::Region => "REGION",
            ReferenceKind::Customer => "CUSTOMER",
            ReferenceKind::Sender => "SENDER",
            ReferenceKind::Case => "CASE",
        }
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==========================================
// 文档方言 (Dialect)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Dialect {
    Zvf,       // 临时时刻表变更汇总
    Uebergabe, // 交接文件
    Fplo,      // 时刻表调度令
    Kss,       // 施工期运行方案
}

impl Dialect {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Dialect::Zvf => "ZVF",
            Dialect::Uebergabe => "UEBERGABE",
            Dialect::Fplo => "FPLO",
            Dialect::Kss => "KSS",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

// ==========================================
// 列车键 (Train Key)
// ==========================================
// (车次, 运行日) 在单个文档内唯一
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TrainKey {
    pub number: u32,
    pub traffic_day: NaiveDate,
}

impl TrainKey {
    pub fn new(number: u32, traffic_day: NaiveDate) -> Self {
        Self {
            number,
            traffic_day,
        }
    }
}

impl fmt::Display for TrainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.number, self.traffic_day)
    }
}

// ==========================================
// 调整类型 (Regulation Kind)
// ==========================================
// 去重键: (列车, 类型, 锚点站)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegulationKind {
    FullCancellation,    // 全程停运
    PartialCancellation, // 部分停运
    Diversion,           // 绕行
    AdditionalService,   // 加开
    EarlyRun,            // 提前运行
    Delay,               // 原线晚点
    ParameterOverride,   // 参数变更
    Hold,                // 停车等待
    StopCancellation,    // 取消停站
}

impl RegulationKind {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            RegulationKind::FullCancellation => "FULL_CANCELLATION",
            RegulationKind::PartialCancellation => "PARTIAL_CANCELLATION",
            RegulationKind::Diversion => "DIVERSION",
            RegulationKind::AdditionalService => "ADDITIONAL_SERVICE",
            RegulationKind::EarlyRun => "EARLY_RUN",
            RegulationKind::Delay => "DELAY",
            RegulationKind::ParameterOverride => "PARAMETER_OVERRIDE",
            RegulationKind::Hold => "HOLD",
            RegulationKind::StopCancellation => "STOP_CANCELLATION",
        }
    }
}

impl fmt::Display for RegulationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

// ==========================================
// 区段类型 (Section Kind)
// ==========================================
// 来源: 直接声明列车片段上的区段标记（各方言写法不同）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SectionKind {
    Diversion,
    AdditionalService,
    EarlyRun,
    DelayOnRegularRoute,
    FullCancellation,
    ReplacementSection,
    /// 未识别的原始值（记录日志后跳过）
    Unrecognized(String),
}

impl SectionKind {
    /// 解析方言中的区段标记
    ///
    /// 大小写与首尾空白不敏感；德语与英文代码都接受
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "umleitung" | "diversion" | "umgeleitet" => SectionKind::Diversion,
            "mehrverkehr" | "zusatzverkehr" | "additional_service" | "sonderzug" => {
                SectionKind::AdditionalService
            }
            "vorplan" | "frueher" | "früher" | "early_run" => SectionKind::EarlyRun,
            "verspaetung" | "verspätung" | "regelweg_verspaetet" | "delay" => {
                SectionKind::DelayOnRegularRoute
            }
            "ausfall" | "totalausfall" | "full_cancellation" => SectionKind::FullCancellation,
            "ersatzverkehr" | "sev" | "teilausfall" | "replacement_section" => {
                SectionKind::ReplacementSection
            }
            _ => SectionKind::Unrecognized(raw.trim().to_string()),
        }
    }

    /// 区段类型对应的基础调整类型
    pub fn baseline_regulation(&self) -> Option<RegulationKind> {
        match self {
            SectionKind::Diversion => Some(RegulationKind::Diversion),
            SectionKind::AdditionalService => Some(RegulationKind::AdditionalService),
            SectionKind::EarlyRun => Some(RegulationKind::EarlyRun),
            SectionKind::DelayOnRegularRoute => Some(RegulationKind::Delay),
            SectionKind::FullCancellation => Some(RegulationKind::FullCancellation),
            SectionKind::ReplacementSection => Some(RegulationKind::PartialCancellation),
            SectionKind::Unrecognized(_) => None,
        }
    }
}

// ==========================================
// 导入模式 (Import Mode)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportMode {
    Reconciled, // 协调 + 事务写入
    Direct,     // 车次头 + 变体直接写入
}

impl ImportMode {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "DIRECT" => ImportMode::Direct,
            _ => ImportMode::Reconciled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_kind_parse() {
        assert_eq!(SectionKind::parse(" Umleitung "), SectionKind::Diversion);
        assert_eq!(SectionKind::parse("SEV"), SectionKind::ReplacementSection);
        assert_eq!(SectionKind::parse("Totalausfall"), SectionKind::FullCancellation);
        assert_eq!(
            SectionKind::parse("Regelweg-Verspaetet"),
            SectionKind::DelayOnRegularRoute
        );
        assert_eq!(
            SectionKind::parse("Kuriosum"),
            SectionKind::Unrecognized("Kuriosum".to_string())
        );
        assert_eq!(SectionKind::parse("Kuriosum").baseline_regulation(), None);
    }

    #[test]
    fn test_surrogate_id_sentinel() {
        assert!(!SurrogateId::UNRESOLVED.is_resolved());
        assert_eq!(SurrogateId::UNRESOLVED.as_nullable(), None);
        assert_eq!(SurrogateId(7).as_nullable(), Some(7));
    }
}

// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 临时数据库初始化、测试文档构造、计数查询
// ==========================================
#![allow(dead_code)]

use bbp_import::db::{init_schema, open_sqlite_connection};
use bbp_import::domain::{
    DocumentHeader, ImportDocument, ReplacementServiceFragment, RouteSectionFragment,
    SenderIdentity, StopCancellationFragment, StopFragment, TrainFragment, VersionTriple,
};
use bbp_import::engine::{CancellationToken, ImportPhase, ImportProgress, ProgressSink};
use bbp_import::Dialect;
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use std::error::Error;
use tempfile::NamedTempFile;

/// 创建临时测试数据库并初始化 schema
///
/// # 返回
/// - NamedTempFile: 临时数据库文件（需要保持存活）
/// - String: 数据库文件路径
pub fn create_test_db() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file.path().to_str().unwrap().to_string();

    let conn = open_sqlite_connection(&db_path)?;
    init_schema(&conn)?;

    Ok((temp_file, db_path))
}

pub fn open(db_path: &str) -> Connection {
    open_sqlite_connection(db_path).expect("Failed to open db")
}

pub fn count(conn: &Connection, sql: &str) -> i64 {
    conn.query_row(sql, [], |row| row.get(0)).expect("count query failed")
}

// ==========================================
// 测试数据构造
// ==========================================

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
}

pub fn at(d: u32, h: u32, m: u32) -> NaiveDateTime {
    day(d).and_hms_opt(h, m, 0).unwrap()
}

pub fn header(file_name: &str) -> DocumentHeader {
    DocumentHeader {
        file_name: file_name.to_string(),
        dialect: Dialect::Zvf,
        case_number: "V-2024-0815".to_string(),
        timetable_year: 2024,
        exported_at: at(1, 6, 0),
        sender: SenderIdentity {
            name: "Netz Mitte Baubetrieb".to_string(),
            email: Some("bbp@netz.example".to_string()),
            department: None,
        },
        version: VersionTriple {
            major: 1,
            minor: 2,
            sub: 0,
        },
        valid_from: Some(day(1)),
        valid_to: Some(day(31)),
        region: "Mitte".to_string(),
        construction_measures: vec!["BBMN 4711".to_string()],
    }
}

pub fn document(file_name: &str) -> ImportDocument {
    ImportDocument {
        header: header(file_name),
        route_sections: Vec::new(),
        trains: Vec::new(),
        replacement_services: Vec::new(),
        stop_cancellations: Vec::new(),
        holds: Vec::new(),
        parameter_overrides: Vec::new(),
    }
}

pub fn route_section(route: &str, from: &str, to: &str) -> RouteSectionFragment {
    RouteSectionFragment {
        route_number: route.to_string(),
        from_station: from.to_string(),
        to_station: to.to_string(),
        construction_start: Some(at(1, 22, 0)),
        construction_end: Some(at(2, 5, 0)),
        description: Some("Gleiserneuerung".to_string()),
    }
}

pub fn stop(station: &str, h: u32, m: u32) -> StopFragment {
    StopFragment {
        station: station.to_string(),
        arrival: Some(at(1, h, m)),
        departure: Some(at(1, h, m + 1)),
        activity: None,
    }
}

pub fn train(number: u32, from: &str, to: &str) -> TrainFragment {
    TrainFragment {
        number,
        traffic_day: day(1),
        designation: Some("RE".to_string()),
        operator: Some("Regio Mitte GmbH".to_string()),
        departure_station: Some(from.to_string()),
        arrival_station: Some(to.to_string()),
        speed_kmh: Some(160),
        stops: vec![stop(from, 8, 0), stop(to, 9, 0)],
        ..Default::default()
    }
}

pub fn replacement(number: u32, cancelled_from: &str, cancelled_to: &str) -> ReplacementServiceFragment {
    ReplacementServiceFragment {
        train_number: number,
        traffic_day: day(1),
        cancelled_from: cancelled_from.to_string(),
        cancelled_to: Some(cancelled_to.to_string()),
        mode: Some("BUS".to_string()),
        remarks: None,
        substitute: None,
    }
}

pub fn stop_cancellation(number: u32, station: &str) -> StopCancellationFragment {
    StopCancellationFragment {
        train_number: number,
        traffic_day: day(1),
        station: station.to_string(),
        remarks: None,
    }
}

// ==========================================
// 进度回调
// ==========================================

/// 列车阶段进度达到 after 时触发取消（模拟用户中途取消）
pub struct CancelAfterTrains {
    pub cancel: CancellationToken,
    pub after: usize,
}

impl CancelAfterTrains {
    pub fn new(after: usize) -> Self {
        Self {
            cancel: CancellationToken::new(),
            after,
        }
    }
}

impl ProgressSink for CancelAfterTrains {
    fn report(&self, progress: &ImportProgress) {
        if progress.phase == ImportPhase::Trains && progress.current >= self.after {
            self.cancel.cancel();
        }
    }
}

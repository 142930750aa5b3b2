// ==========================================
// 施工时刻表导入引擎 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为（外键、WAL、busy_timeout）
// - 提供空库的建表引导（幂等，不做迁移）
// - 提供保存点辅助函数（子集合整体替换、单列车失败隔离）
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要"每个连接"单独开启
/// - busy_timeout 需要"每个连接"单独配置
/// - WAL 让读者不阻塞写者（内存库会返回 "memory"，忽略即可）
pub fn configure_sqlite_connection(conn: &Connection, busy_timeout_ms: u64) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(busy_timeout_ms))?;
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    open_sqlite_connection_with_timeout(db_path, DEFAULT_BUSY_TIMEOUT_MS)
}

/// 打开 SQLite 连接（自定义 busy_timeout，导入 worker 使用）
pub fn open_sqlite_connection_with_timeout(
    db_path: &str,
    busy_timeout_ms: u64,
) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn, busy_timeout_ms)?;
    Ok(conn)
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 初始化 schema（幂等）
///
/// 说明：只负责空库引导；已有库的结构变更不在本引擎职责内
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;

    match read_schema_version(conn)? {
        Some(v) if v != CURRENT_SCHEMA_VERSION => {
            tracing::warn!(
                found = v,
                expected = CURRENT_SCHEMA_VERSION,
                "schema_version 与代码期望不一致"
            );
        }
        _ => {}
    }
    Ok(())
}

/// 在保存点内执行（成功 RELEASE，失败 ROLLBACK TO + RELEASE）
///
/// 可以嵌套；保存点名只需在同一嵌套层级内有意义
pub fn with_savepoint<T, E, F>(conn: &Connection, name: &str, f: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E>,
    E: From<rusqlite::Error>,
{
    conn.execute_batch(&format!("SAVEPOINT {name}"))?;
    match f() {
        Ok(value) => {
            conn.execute_batch(&format!("RELEASE {name}"))?;
            Ok(value)
        }
        Err(e) => {
            conn.execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name}"))?;
            Err(e)
        }
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- ===== 配置 =====
CREATE TABLE IF NOT EXISTS config_kv (
    scope_id TEXT NOT NULL DEFAULT 'global',
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (scope_id, key)
);

-- ===== 引用数据（创建后不可变）=====
CREATE TABLE IF NOT EXISTS region (
    id INTEGER PRIMARY KEY,
    short_name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS station (
    id INTEGER PRIMARY KEY,
    code TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS route (
    id INTEGER PRIMARY KEY,
    number TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS station_route (
    id INTEGER PRIMARY KEY,
    station_id INTEGER NOT NULL REFERENCES station(id),
    route_id INTEGER NOT NULL REFERENCES route(id),
    UNIQUE (station_id, route_id)
);

CREATE TABLE IF NOT EXISTS customer (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS sender (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT NOT NULL DEFAULT '',
    department TEXT NOT NULL DEFAULT '',
    UNIQUE (name, email, department)
);

CREATE TABLE IF NOT EXISTS vorgang (
    id INTEGER PRIMARY KEY,
    case_number TEXT NOT NULL,
    timetable_year INTEGER NOT NULL,
    UNIQUE (case_number, timetable_year)
);

CREATE TABLE IF NOT EXISTS construction_measure (
    id INTEGER PRIMARY KEY,
    vorgang_id INTEGER NOT NULL REFERENCES vorgang(id),
    measure_number TEXT NOT NULL,
    UNIQUE (vorgang_id, measure_number)
);

-- ===== 文档 =====
CREATE TABLE IF NOT EXISTS document (
    id INTEGER PRIMARY KEY,
    vorgang_id INTEGER NOT NULL REFERENCES vorgang(id),
    file_name TEXT NOT NULL,
    dialect TEXT NOT NULL,
    region_id INTEGER NOT NULL REFERENCES region(id),
    sender_id INTEGER REFERENCES sender(id),
    exported_at TEXT NOT NULL,
    version_major INTEGER NOT NULL,
    version_minor INTEGER NOT NULL,
    version_sub INTEGER NOT NULL,
    valid_from TEXT,
    valid_to TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    imported_at TEXT,
    UNIQUE (vorgang_id, file_name)
);

CREATE TABLE IF NOT EXISTS route_section (
    id INTEGER PRIMARY KEY,
    document_id INTEGER NOT NULL REFERENCES document(id) ON DELETE CASCADE,
    seq INTEGER NOT NULL,
    route_id INTEGER REFERENCES route(id),
    from_station_id INTEGER REFERENCES station(id),
    to_station_id INTEGER REFERENCES station(id),
    construction_start TEXT NOT NULL,
    construction_end TEXT NOT NULL,
    description TEXT,
    UNIQUE (document_id, seq)
);

-- ===== 列车 =====
CREATE TABLE IF NOT EXISTS train (
    id INTEGER PRIMARY KEY,
    document_id INTEGER NOT NULL REFERENCES document(id) ON DELETE CASCADE,
    train_number INTEGER NOT NULL,
    traffic_day TEXT NOT NULL,
    designation TEXT,
    customer_id INTEGER REFERENCES customer(id),
    from_station_id INTEGER REFERENCES station(id),
    to_station_id INTEGER REFERENCES station(id),
    speed_kmh INTEGER,
    brake_position TEXT,
    brake_ratio INTEGER,
    load_t INTEGER,
    length_m INTEGER,
    remarks TEXT,
    is_synthesized INTEGER NOT NULL DEFAULT 0,
    extras_json TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (document_id, train_number, traffic_day)
);

CREATE TABLE IF NOT EXISTS schedule_stop (
    id INTEGER PRIMARY KEY,
    train_id INTEGER NOT NULL REFERENCES train(id) ON DELETE CASCADE,
    seq INTEGER NOT NULL,
    station_id INTEGER NOT NULL REFERENCES station(id),
    arrival TEXT,
    departure TEXT,
    activity TEXT,
    cancelled INTEGER NOT NULL DEFAULT 0,
    UNIQUE (train_id, seq)
);

CREATE TABLE IF NOT EXISTS node_time (
    id INTEGER PRIMARY KEY,
    train_id INTEGER NOT NULL REFERENCES train(id) ON DELETE CASCADE,
    seq INTEGER NOT NULL,
    station_id INTEGER NOT NULL REFERENCES station(id),
    arrival TEXT,
    departure TEXT,
    UNIQUE (train_id, seq)
);

CREATE TABLE IF NOT EXISTS regulation (
    id INTEGER PRIMARY KEY,
    train_id INTEGER NOT NULL REFERENCES train(id) ON DELETE CASCADE,
    kind TEXT NOT NULL,
    anchor_code TEXT NOT NULL,
    anchor_station_id INTEGER REFERENCES station(id),
    payload_json TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (train_id, kind, anchor_code)
);

-- ===== 直接导入: 车次头 + 变体 =====
CREATE TABLE IF NOT EXISTS train_header (
    id INTEGER PRIMARY KEY,
    train_number INTEGER NOT NULL,
    timetable_year INTEGER NOT NULL,
    UNIQUE (train_number, timetable_year)
);

CREATE TABLE IF NOT EXISTS train_variant (
    id INTEGER PRIMARY KEY,
    header_id INTEGER NOT NULL REFERENCES train_header(id),
    document_id INTEGER NOT NULL REFERENCES document(id) ON DELETE CASCADE,
    traffic_day TEXT NOT NULL,
    designation TEXT,
    customer_id INTEGER REFERENCES customer(id),
    from_station_id INTEGER REFERENCES station(id),
    to_station_id INTEGER REFERENCES station(id),
    remarks TEXT,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (header_id, document_id, traffic_day)
);

CREATE INDEX IF NOT EXISTS idx_train_document ON train(document_id);
CREATE INDEX IF NOT EXISTS idx_regulation_train ON regulation(train_id);
CREATE INDEX IF NOT EXISTS idx_route_section_document ON route_section(document_id);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), Some(CURRENT_SCHEMA_VERSION));
    }

    #[test]
    fn test_savepoint_rolls_back_on_error() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let result: Result<(), rusqlite::Error> = with_savepoint(&conn, "sp_test", || {
            conn.execute("INSERT INTO station (code) VALUES ('EFS')", [])?;
            Err(rusqlite::Error::QueryReturnedNoRows)
        });
        assert!(result.is_err());

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM station", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}

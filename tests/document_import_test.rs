// ==========================================
// 文档导入编排测试
// ==========================================
// 测试目标: 单文档事务、单列车失败隔离、幂等重导入、取消回滚
// ==========================================

mod test_helpers;

use bbp_import::domain::HoldFragment;
use bbp_import::engine::{
    CancellationToken, CollectingProgressSink, ImportPhase, NoOpProgressSink, ReferenceCache,
};
use bbp_import::importer::{DocumentImporter, ImportError, ImportOptions};
use bbp_import::logging;
use bbp_import::ReferenceKind;
use serde_json::Value;
use std::sync::Arc;
use test_helpers::*;

fn importer() -> DocumentImporter {
    DocumentImporter::new(Arc::new(ReferenceCache::new()), ImportOptions::default())
}

fn regulation_payload(conn: &rusqlite::Connection, kind: &str, anchor: &str) -> Value {
    let raw: String = conn
        .query_row(
            "SELECT payload_json FROM regulation WHERE kind = ?1 AND anchor_code = ?2",
            [kind, anchor],
            |row| row.get(0),
        )
        .expect("regulation not found");
    serde_json::from_str(&raw).unwrap()
}

#[test]
fn test_replacement_service_without_direct_train_synthesizes_one_train() {
    logging::init_test();
    let (_temp_file, db_path) = create_test_db().unwrap();
    let mut conn = open(&db_path);

    let mut doc = document("zvf_a.xml");
    doc.replacement_services.push(replacement(4711, "EFS", "EF"));

    let report = importer()
        .import(&mut conn, &doc, &NoOpProgressSink, &CancellationToken::new())
        .unwrap();

    assert_eq!(report.trains_inserted, 1);
    assert_eq!(report.regulations_inserted, 1);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM train"), 1);
    assert_eq!(
        count(&conn, "SELECT is_synthesized FROM train WHERE train_number = 4711"),
        1
    );
    assert_eq!(
        count(
            &conn,
            "SELECT COUNT(*) FROM regulation WHERE kind = 'PARTIAL_CANCELLATION' AND anchor_code = 'EFS'"
        ),
        1
    );
}

#[test]
fn test_reimport_is_idempotent() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let mut conn = open(&db_path);
    let importer = importer();

    let mut doc = document("zvf_b.xml");
    doc.route_sections.push(route_section("6100", "EFS", "EF"));
    doc.trains.push(train(100, "EFS", "EF"));
    doc.trains.push(train(101, "EF", "EFS"));
    doc.replacement_services.push(replacement(100, "EFS", "EF"));

    let first = importer
        .import(&mut conn, &doc, &NoOpProgressSink, &CancellationToken::new())
        .unwrap();
    let second = importer
        .import(&mut conn, &doc, &NoOpProgressSink, &CancellationToken::new())
        .unwrap();

    assert!(first.document_created);
    assert!(!second.document_created);
    assert_eq!(first.document_id, second.document_id);
    assert_eq!(second.trains_inserted, 0);
    assert_eq!(second.trains_unchanged, 2);
    assert_eq!(second.regulations_unchanged, 1);

    assert_eq!(count(&conn, "SELECT COUNT(*) FROM document"), 1);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM train"), 2);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM regulation"), 1);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM schedule_stop"), 4);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM station"), 2);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM construction_measure"), 1);
}

#[test]
fn test_identical_route_sections_are_replaced_not_accumulated() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let mut conn = open(&db_path);
    let importer = importer();

    let mut doc = document("zvf_c.xml");
    doc.route_sections.push(route_section("6100", "EFS", "EF"));
    doc.route_sections.push(route_section("6100", "EF", "NDH"));
    doc.route_sections.push(route_section("06100", "efs", "EF"));

    let first = importer
        .import(&mut conn, &doc, &NoOpProgressSink, &CancellationToken::new())
        .unwrap();
    let second = importer
        .import(&mut conn, &doc, &NoOpProgressSink, &CancellationToken::new())
        .unwrap();

    assert_eq!(first.route_sections, 2);
    assert_eq!(second.route_sections, 2);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM route_section"), 2);
    assert_eq!(count(&conn, "SELECT MAX(seq) FROM route_section"), 1);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM route"), 1);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM station_route"), 3);
}

#[test]
fn test_failing_train_is_isolated_and_document_commits() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let mut conn = open(&db_path);

    let mut doc = document("zvf_d.xml");
    doc.trains.push(train(1, "EFS", "EF"));
    let mut broken = train(2, "EFS", "EF");
    broken.stops.push(stop("??", 10, 0));
    broken.section_kind = Some("Umleitung".to_string());
    doc.trains.push(broken);
    doc.trains.push(train(3, "EF", "EFS"));

    let report = importer()
        .import(&mut conn, &doc, &NoOpProgressSink, &CancellationToken::new())
        .unwrap();

    assert_eq!(report.persisted_trains(), 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].train_number, 2);

    assert_eq!(count(&conn, "SELECT COUNT(*) FROM document"), 1);
    let numbers: Vec<u32> = conn
        .prepare("SELECT train_number FROM train ORDER BY train_number")
        .unwrap()
        .query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(numbers, vec![1, 3]);
    // 失败列车的调整与停站随保存点一起回滚
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM regulation"), 0);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM schedule_stop"), 4);
}

#[test]
fn test_stop_on_first_error_fails_whole_document() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let mut conn = open(&db_path);
    let importer = DocumentImporter::new(
        Arc::new(ReferenceCache::new()),
        ImportOptions {
            stop_on_first_error: true,
        },
    );

    let mut doc = document("zvf_e.xml");
    doc.trains.push(train(1, "EFS", "EF"));
    let mut broken = train(2, "EFS", "EF");
    broken.stops.push(stop("??", 10, 0));
    doc.trains.push(broken);

    let err = importer
        .import(&mut conn, &doc, &NoOpProgressSink, &CancellationToken::new())
        .unwrap_err();

    assert!(matches!(
        err.root(),
        ImportError::PerTrainFailure { train_number: 2, .. }
    ));
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM document"), 0);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM train"), 0);
}

#[test]
fn test_missing_region_is_fatal_and_rolls_back() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let mut conn = open(&db_path);

    let mut doc = document("zvf_f.xml");
    doc.header.region = "   ".to_string();
    doc.trains.push(train(1, "EFS", "EF"));

    let err = importer()
        .import(&mut conn, &doc, &NoOpProgressSink, &CancellationToken::new())
        .unwrap_err();

    match err.root() {
        ImportError::UnresolvedMandatoryReference { kind, file, .. } => {
            assert_eq!(*kind, ReferenceKind::Region);
            assert_eq!(file, "zvf_f.xml");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.to_string().contains("zvf_f.xml"));
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM document"), 0);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM train"), 0);
}

#[test]
fn test_route_section_without_construction_end_is_fatal() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let mut conn = open(&db_path);
    let cache = Arc::new(ReferenceCache::new());
    let importer = DocumentImporter::new(Arc::clone(&cache), ImportOptions::default());

    let mut doc = document("zvf_g.xml");
    let mut section = route_section("6100", "EFS", "EF");
    section.construction_end = None;
    doc.route_sections.push(section);

    let err = importer
        .import(&mut conn, &doc, &NoOpProgressSink, &CancellationToken::new())
        .unwrap_err();

    assert!(matches!(err.root(), ImportError::MalformedChildData { .. }));
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM document"), 0);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM station"), 0);
    // 回滚事务中创建的区域不会进入共享缓存
    let region = bbp_import::engine::CacheKey::new(ReferenceKind::Region, "MITTE");
    assert!(cache.get(&region).is_none());
}

#[test]
fn test_cancelled_import_rolls_back() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let mut conn = open(&db_path);

    let mut doc = document("zvf_h.xml");
    doc.trains.push(train(1, "EFS", "EF"));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = importer()
        .import(&mut conn, &doc, &NoOpProgressSink, &cancel)
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM document"), 0);
}

#[test]
fn test_cancel_between_trains_rolls_back_whole_document() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let mut conn = open(&db_path);
    let cache = Arc::new(ReferenceCache::new());
    let importer = DocumentImporter::new(Arc::clone(&cache), ImportOptions::default());

    let mut doc = document("zvf_cancel_mid.xml");
    doc.route_sections.push(route_section("6100", "EFS", "EF"));
    doc.trains.push(train(1, "EFS", "EF"));
    doc.trains.push(train(2, "EF", "NDH"));
    doc.trains.push(train(3, "NDH", "EFS"));
    // 第一列车写入后取消
    let sink = CancelAfterTrains::new(1);

    let err = importer
        .import(&mut conn, &doc, &sink, &sink.cancel)
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM document"), 0);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM train"), 0);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM route_section"), 0);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM schedule_stop"), 0);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM station"), 0);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM region"), 0);
    // 案件在事务外登记，保持持久
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM vorgang"), 1);

    let station = bbp_import::engine::CacheKey::new(ReferenceKind::Station, "EFS");
    let region = bbp_import::engine::CacheKey::new(ReferenceKind::Region, "MITTE");
    assert!(cache.get(&station).is_none());
    assert!(cache.get(&region).is_none());
}

#[test]
fn test_regulation_contributions_merge_across_reimports() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let mut conn = open(&db_path);
    let importer = importer();

    let hold = |minutes, reason: Option<&str>| HoldFragment {
        train_number: 1,
        traffic_day: day(1),
        station: "EF".to_string(),
        minutes: Some(minutes),
        reason: reason.map(str::to_string),
    };

    let mut doc = document("zvf_i.xml");
    doc.trains.push(train(1, "EFS", "EF"));
    doc.holds.push(hold(5, None));
    importer
        .import(&mut conn, &doc, &NoOpProgressSink, &CancellationToken::new())
        .unwrap();

    doc.holds = vec![hold(9, Some("Kreuzung"))];
    let second = importer
        .import(&mut conn, &doc, &NoOpProgressSink, &CancellationToken::new())
        .unwrap();

    assert_eq!(second.regulations_merged, 1);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM regulation"), 1);
    assert_eq!(
        regulation_payload(&conn, "HOLD", "EF"),
        serde_json::json!({"minutes": 5, "reason": "Kreuzung"})
    );
}

#[test]
fn test_stop_cancellation_flags_schedule_stop() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let mut conn = open(&db_path);
    let progress = CollectingProgressSink::new();

    let mut doc = document("zvf_j.xml");
    let mut t = train(1, "EFS", "NDH");
    t.stops.insert(1, stop("EF", 8, 30));
    doc.trains.push(t);
    doc.stop_cancellations.push(stop_cancellation(1, "ef"));
    // 未知列车的次级片段被丢弃
    doc.stop_cancellations.push(stop_cancellation(999, "EF"));

    let report = importer()
        .import(&mut conn, &doc, &progress, &CancellationToken::new())
        .unwrap();

    assert_eq!(report.stops_cancelled, 1);
    assert_eq!(report.reconciliation.unmatched_fragments, 1);
    assert_eq!(
        count(
            &conn,
            "SELECT s.cancelled FROM schedule_stop s JOIN station st ON st.id = s.station_id WHERE st.code = 'EF'"
        ),
        1
    );
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM train"), 1);

    let events = progress.events();
    assert!(events.iter().any(|e| e.phase == ImportPhase::Trains && e.current == 1 && e.total == 1));
    assert!(events.iter().any(|e| e.phase == ImportPhase::SecondaryFragments && e.total == 1));
}

#[test]
fn test_mark_import_completed_is_idempotent() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let mut conn = open(&db_path);
    let importer = importer();

    let report = importer
        .import(&mut conn, &document("zvf_k.xml"), &NoOpProgressSink, &CancellationToken::new())
        .unwrap();

    assert!(importer.mark_import_completed(&mut conn, report.document_id).unwrap());
    assert!(!importer.mark_import_completed(&mut conn, report.document_id).unwrap());
    assert_eq!(
        count(&conn, "SELECT COUNT(*) FROM document WHERE imported_at IS NOT NULL"),
        1
    );
}

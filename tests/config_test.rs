// ==========================================
// 配置层测试
// ==========================================

mod test_helpers;

use bbp_import::config::{config_keys, ConfigManager, ImportConfigReader, ImportSettings};
use bbp_import::ImportMode;
use test_helpers::*;

#[tokio::test]
async fn test_defaults_when_config_kv_is_empty() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let config = ConfigManager::new(&db_path).unwrap();

    let settings = ImportSettings::load(&config).await.unwrap();

    assert_eq!(settings, ImportSettings::default());
    assert_eq!(settings.import_mode, ImportMode::Reconciled);
    assert!(settings.warm_region_cache);
    assert!(!settings.stop_on_first_error);
}

#[tokio::test]
async fn test_overrides_are_read_from_global_scope() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let config = ConfigManager::new(&db_path).unwrap();

    config.set_global_config_value(config_keys::WORKER_COUNT, "8").unwrap();
    config.set_global_config_value(config_keys::STOP_ON_FIRST_ERROR, "true").unwrap();
    config.set_global_config_value(config_keys::BUSY_TIMEOUT_MS, "250").unwrap();
    config.set_global_config_value(config_keys::BUSY_RETRY_LIMIT, "7").unwrap();
    config.set_global_config_value(config_keys::WARM_REGION_CACHE, "off").unwrap();
    config.set_global_config_value(config_keys::IMPORT_MODE, "direct").unwrap();

    let settings = ImportSettings::load(&config).await.unwrap();

    assert_eq!(settings.worker_count, 8);
    assert!(settings.stop_on_first_error);
    assert_eq!(settings.busy_timeout_ms, 250);
    assert_eq!(settings.busy_retry_limit, 7);
    assert!(!settings.warm_region_cache);
    assert_eq!(settings.import_mode, ImportMode::Direct);
    assert!(settings.import_options().stop_on_first_error);
}

#[tokio::test]
async fn test_invalid_values_fall_back_to_defaults() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let config = ConfigManager::new(&db_path).unwrap();

    config.set_global_config_value(config_keys::WORKER_COUNT, "viele").unwrap();
    config.set_global_config_value(config_keys::STOP_ON_FIRST_ERROR, "vielleicht").unwrap();

    assert_eq!(config.get_worker_count().await.unwrap(), ImportSettings::default().worker_count);
    assert!(!config.get_stop_on_first_error().await.unwrap());

    config.set_global_config_value(config_keys::WORKER_COUNT, "0").unwrap();
    assert_eq!(config.get_worker_count().await.unwrap(), 1);
}

#[test]
fn test_set_global_config_value_overwrites() {
    let (_temp_file, db_path) = create_test_db().unwrap();
    let config = ConfigManager::new(&db_path).unwrap();

    config.set_global_config_value("import_mode", "DIRECT").unwrap();
    config.set_global_config_value("import_mode", "RECONCILED").unwrap();

    assert_eq!(
        config.get_global_config_value("import_mode").unwrap().as_deref(),
        Some("RECONCILED")
    );
    let conn = open(&db_path);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM config_kv"), 1);
}

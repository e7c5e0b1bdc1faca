use std::sync::{Mutex, MutexGuard, OnceLock};

use codeforlife_deploy::config::{Config, Env};
use codeforlife_deploy::db::{DatabaseSettings, Db};
use codeforlife_deploy::error::Error;
use codeforlife_deploy::store::FileObjectStore;
use secrecy::ExposeSecret;

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn lock_env() -> MutexGuard<'static, ()> {
    match ENV_LOCK.get_or_init(|| Mutex::new(())).lock() {
        Ok(g) => g,
        Err(e) => e.into_inner(),
    }
}

const DB_VARS: &[&str] = &["DB_NAME", "DB_USER", "DB_PASSWORD", "DB_HOST", "DB_PORT"];

fn clear_db_vars() {
    for name in DB_VARS {
        unsafe { std::env::remove_var(name) };
    }
}

fn deployed_config() -> Config {
    Config {
        app_id: None,
        app_version: None,
        app_bucket: "cfl-apps".to_string(),
        app_folder: "codeforlife".to_string(),
        rds_db_name: Some("portal".to_string()),
        rds_schema_name: Some("public".to_string()),
        rds_instance_name: Some("rds-main".to_string()),
        gae_service: None,
        google_cloud_project: None,
        otel_endpoint: None,
        log_level: "info".to_string(),
    }
}

#[test]
fn local_settings_use_defaults() {
    let _g = lock_env();
    clear_db_vars();

    let settings = DatabaseSettings::from_env().unwrap();
    assert_eq!(settings.name, "codeforlife");
    assert_eq!(settings.user, "root");
    assert_eq!(settings.password.expose_secret(), "password");
    assert_eq!(settings.host, "localhost");
    assert_eq!(settings.port, 5432);
}

#[test]
fn local_settings_reject_bad_port() {
    let _g = lock_env();
    clear_db_vars();
    unsafe { std::env::set_var("DB_PORT", "not-a-port") };

    assert!(matches!(DatabaseSettings::from_env(), Err(Error::Config(_))));

    clear_db_vars();
}

#[tokio::test]
async fn deployed_settings_come_from_bucket_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir
        .path()
        .join("cfl-apps/codeforlife/dbMetadata/rds-main/portal/public.dbdata");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(
        &path,
        r#"{"DBEngine":"postgres","Database":"portal","user":"cfl","password":"pw","Endpoint":"rds.internal","Port":5432}"#,
    )
    .unwrap();

    let store = FileObjectStore::new(dir.path());
    let settings = DatabaseSettings::resolve(Env::Production, &deployed_config(), &store)
        .await
        .unwrap();
    assert_eq!(settings.host, "rds.internal");
    assert_eq!(settings.name, "portal");
}

#[tokio::test]
async fn deployed_settings_fail_without_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileObjectStore::new(dir.path());
    let result = DatabaseSettings::resolve(Env::Staging, &deployed_config(), &store).await;
    assert!(matches!(result, Err(Error::NotFound { .. })));
}

#[tokio::test]
#[ignore] // Requires running Postgres
async fn connects_and_checks_health() {
    let settings = {
        let _g = lock_env();
        DatabaseSettings::from_env().unwrap()
    };
    let db = Db::connect(&settings).await.unwrap();
    assert!(db.health_check().await.is_ok());
}

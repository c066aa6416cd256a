use std::{
    env, fs,
    path::PathBuf,
    sync::{Mutex, MutexGuard, OnceLock},
};

use tempfile::TempDir;
use webhook_provider::config::{ConfigError, ConfigLoader, ScheduleMode};

const KEYS: &[&str] = &[
    "MOONLIGHT_PROFILE",
    "MOONLIGHT_API_BIND_ADDR",
    "MOONLIGHT_LOG_LEVEL",
    "MOONLIGHT_GITHUB_ORG",
    "MOONLIGHT_GITHUB_API_BASE",
    "MOONLIGHT_GITHUB_TOKEN",
    "MOONLIGHT_GITHUB_APP_ID",
    "MOONLIGHT_GITHUB_APP_PRIVATE_KEY",
    "MOONLIGHT_CATALOG_BASE_URL",
    "MOONLIGHT_PROVIDER_FREQUENCY_SECONDS",
    "MOONLIGHT_PROVIDER_TIMEOUT_SECONDS",
    "MOONLIGHT_PROVIDER_JITTER_PCT_MAX",
    "MOONLIGHT_PROVIDER_CONCURRENCY",
    "MOONLIGHT_PROVIDER_FULL_SCAN_MAX_PAGES",
    "MOONLIGHT_PROVIDER_SCHEDULE",
];

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn env_guard() -> MutexGuard<'static, ()> {
    env_lock()
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

fn clear_env() {
    for key in KEYS {
        unsafe {
            env::remove_var(key);
        }
    }
}

fn set_env(key: &str, value: &str) {
    unsafe {
        env::set_var(key, value);
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    let path = dir.path().join(name);
    fs::write(path, contents).unwrap();
}

fn empty_dir_loader() -> (TempDir, ConfigLoader) {
    let temp_dir = TempDir::new().unwrap();
    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    (temp_dir, loader)
}

#[test]
fn loads_defaults_when_only_org_is_set() {
    let _guard = env_guard();
    clear_env();
    set_env("MOONLIGHT_GITHUB_ORG", "PicPay");

    let (_dir, loader) = empty_dir_loader();
    let cfg = loader.load().expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:7007");
    assert_eq!(cfg.log_level, "info");
    assert_eq!(cfg.github_org, "PicPay");
    assert_eq!(cfg.github_api_base, "https://api.github.com");
    assert_eq!(cfg.identity_url(), "https://github.com/PicPay");
    assert_eq!(cfg.provider.frequency_seconds, 3600);
    assert_eq!(cfg.provider.concurrency, 5);
    assert_eq!(cfg.provider.full_scan_max_pages, None);
    assert_eq!(cfg.provider.schedule, ScheduleMode::Interval);
    cfg.bind_addr().expect("default bind addr parses");
    clear_env();
}

#[test]
fn missing_org_is_rejected() {
    let _guard = env_guard();
    clear_env();

    let (_dir, loader) = empty_dir_loader();
    let err = loader.load().expect_err("org is required");
    assert!(err.to_string().contains("MOONLIGHT_GITHUB_ORG"));
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "MOONLIGHT_GITHUB_ORG=PicPay\nMOONLIGHT_API_BIND_ADDR=127.0.0.1:3000\n",
    );
    write_env_file(
        &temp_dir,
        ".env.staging",
        "MOONLIGHT_API_BIND_ADDR=192.168.0.10:5000\nMOONLIGHT_PROVIDER_CONCURRENCY=8\n",
    );
    write_env_file(
        &temp_dir,
        ".env.staging.local",
        "MOONLIGHT_API_BIND_ADDR=10.0.0.5:6000\n",
    );
    // Profile is chosen by .env.local before the profile files load.
    write_env_file(
        &temp_dir,
        ".env.local",
        "MOONLIGHT_PROFILE=staging\nMOONLIGHT_API_BIND_ADDR=127.0.0.1:4000\n",
    );

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with layered env files");

    assert_eq!(cfg.profile, "staging");
    assert_eq!(cfg.api_bind_addr, "10.0.0.5:6000");
    assert_eq!(cfg.provider.concurrency, 8);
    clear_env();
}

#[test]
fn os_environment_has_highest_precedence() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "MOONLIGHT_GITHUB_ORG=FromFile\nMOONLIGHT_API_BIND_ADDR=127.0.0.1:3000\n",
    );
    set_env("MOONLIGHT_API_BIND_ADDR", "0.0.0.0:9090");
    set_env("MOONLIGHT_GITHUB_ORG", "FromEnv");

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with env override");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:9090");
    assert_eq!(cfg.github_org, "FromEnv");

    clear_env();
}

#[test]
fn invalid_bind_addr_returns_error() {
    let _guard = env_guard();
    clear_env();
    set_env("MOONLIGHT_GITHUB_ORG", "PicPay");
    set_env("MOONLIGHT_API_BIND_ADDR", "not-an-addr");

    let (_dir, loader) = empty_dir_loader();
    let err = loader.load().expect_err("invalid bind addr should fail");
    assert!(format!("{}", err).contains("invalid api bind address"));

    clear_env();
}

#[test]
fn provider_settings_are_parsed() {
    let _guard = env_guard();
    clear_env();
    set_env("MOONLIGHT_GITHUB_ORG", "PicPay");
    set_env("MOONLIGHT_PROVIDER_FREQUENCY_SECONDS", "900");
    set_env("MOONLIGHT_PROVIDER_CONCURRENCY", "10");
    set_env("MOONLIGHT_PROVIDER_FULL_SCAN_MAX_PAGES", "3");
    set_env("MOONLIGHT_PROVIDER_SCHEDULE", "manual");
    set_env("MOONLIGHT_CATALOG_BASE_URL", "http://backstage.internal:7007");

    let (_dir, loader) = empty_dir_loader();
    let cfg = loader.load().expect("provider settings load");

    assert_eq!(cfg.provider.frequency_seconds, 900);
    assert_eq!(cfg.provider.concurrency, 10);
    assert_eq!(cfg.provider.full_scan_max_pages, Some(3));
    assert_eq!(cfg.provider.schedule, ScheduleMode::Manual);
    assert_eq!(
        cfg.catalog_base_url.as_deref(),
        Some("http://backstage.internal:7007")
    );
    clear_env();
}

#[test]
fn invalid_provider_settings_are_rejected() {
    let _guard = env_guard();
    clear_env();
    set_env("MOONLIGHT_GITHUB_ORG", "PicPay");
    set_env("MOONLIGHT_PROVIDER_SCHEDULE", "cron");

    let (_dir, loader) = empty_dir_loader();
    let err = loader.load().expect_err("unknown schedule should fail");
    assert!(err.to_string().contains("'cron'"));

    clear_env();
    set_env("MOONLIGHT_GITHUB_ORG", "PicPay");
    set_env("MOONLIGHT_PROVIDER_CONCURRENCY", "0");
    let err = loader.load().expect_err("zero concurrency should fail");
    assert!(err.to_string().contains("concurrency"));

    clear_env();
    set_env("MOONLIGHT_GITHUB_ORG", "PicPay");
    set_env("MOONLIGHT_GITHUB_APP_ID", "42");
    let err = loader.load().expect_err("app id without key should fail");
    assert!(err.to_string().contains("MOONLIGHT_GITHUB_APP_PRIVATE_KEY"));

    clear_env();
}

#[test]
fn malformed_numbers_are_rejected() {
    let _guard = env_guard();
    let (_dir, loader) = empty_dir_loader();

    for (key, value) in [
        ("MOONLIGHT_PROVIDER_FREQUENCY_SECONDS", "abc"),
        ("MOONLIGHT_PROVIDER_TIMEOUT_SECONDS", "-5"),
        ("MOONLIGHT_PROVIDER_CONCURRENCY", "ten"),
        ("MOONLIGHT_PROVIDER_FULL_SCAN_MAX_PAGES", "1.5"),
        ("MOONLIGHT_PROVIDER_JITTER_PCT_MAX", "lots"),
    ] {
        clear_env();
        set_env("MOONLIGHT_GITHUB_ORG", "PicPay");
        set_env(key, value);

        let err = loader.load().expect_err("malformed number should fail");
        match &err {
            ConfigError::InvalidNumber { key: bad_key, value: bad_value } => {
                assert_eq!(format!("MOONLIGHT_{}", bad_key), key);
                assert_eq!(bad_value, value);
            }
            other => panic!("unexpected error for {key}: {other}"),
        }
        assert!(err.to_string().contains(value));
    }

    clear_env();
    set_env("MOONLIGHT_GITHUB_ORG", "PicPay");
    set_env("MOONLIGHT_PROVIDER_FREQUENCY_SECONDS", "  ");
    let config = loader.load().expect("blank number falls back to default");
    assert_eq!(config.provider.frequency_seconds, 3600);

    clear_env();
}

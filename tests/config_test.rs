use anyhow::Result;
use mumu_manager::automation::AutoStartSchedule;
use mumu_manager::cache::CacheStrategy;
use mumu_manager::utils::validation::Validate;
use mumu_manager::{AppConfig, AutomationConfig, AutomationSettings};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

#[test]
fn test_config_and_settings_build_engine_config() -> Result<()> {
    let dir = TempDir::new()?;
    let settings_path = dir.path().join("automation_settings.json");
    let config_path = dir.path().join("mumu-manager.toml");

    std::fs::write(
        &config_path,
        format!(
            r#"
[automation]
settings_file = "{}"
monitor_interval_seconds = 15
retry_base_delay_seconds = 0.5
shutdown_on_overload = false

[cache]
strategy = "aggressive"
"#,
            settings_path.display().to_string().replace('\\', "/")
        ),
    )?;
    std::fs::write(
        &settings_path,
        r#"{
            "enable_auto_start": true,
            "auto_start_time": "06:05",
            "from_instance": 10,
            "to_instance": 29,
            "batch_size": 4,
            "batch_delay": 12.5
        }"#,
    )?;

    let app = AppConfig::load(Some(config_path.as_path()))?;
    assert_ok!(app.validate());
    assert_eq!(app.cache.as_ref().and_then(|c| c.strategy), Some(CacheStrategy::Aggressive));

    let settings = AutomationSettings::load(app.settings_file())?;
    assert_ok!(settings.validate());

    let config = settings.to_automation_config(AutomationConfig {
        monitor_interval: app.monitor_interval(),
        shutdown_on_overload: app.shutdown_on_overload(),
        retry_base_delay: app.retry_base_delay(),
        ..AutomationConfig::default()
    })?;

    assert_eq!((config.from_instance, config.to_instance), (10, 29));
    assert_eq!(config.batch_size, 4);
    assert_eq!(config.batch_delay, Duration::from_millis(12_500));
    assert_eq!(config.start_delay, Duration::from_secs(5));
    assert_eq!(config.monitor_interval, Duration::from_secs(15));
    assert_eq!(config.retry_base_delay, Duration::from_millis(500));
    assert!(!config.shutdown_on_overload);
    assert!(config.enable_cpu_protection);

    let schedule = settings.schedule()?;
    assert!(schedule.enabled);
    assert_eq!(schedule.time_string(), "06:05");
    Ok(())
}

#[test]
fn test_bad_settings_are_reported() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("automation_settings.json");

    std::fs::write(&path, r#"{"auto_start_time": "25:99"}"#)?;
    let settings = AutomationSettings::load(&path)?;
    assert_err!(settings.validate());

    std::fs::write(&path, r#"{"from_instance": 9, "to_instance": 2}"#)?;
    assert_err!(AutomationSettings::load(&path)?.validate());

    std::fs::write(&path, "\"not an object\"")?;
    assert_err!(AutomationSettings::load(&path));
    Ok(())
}

#[test]
fn test_missing_config_file_is_an_error_only_when_named() {
    assert_err!(AppConfig::load(Some(Path::new("/no/such/mumu-manager.toml"))));
    assert_ok!(AppConfig::from_toml_str(""));
}

#[test]
fn test_disabled_schedule_never_waits() {
    let schedule = AutoStartSchedule::default();
    assert!(!schedule.enabled);
    assert_eq!(tokio_test::block_on(schedule.wait_until_due()), None);
}

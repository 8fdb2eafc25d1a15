//! Integration tests for cohort-config

use cohort_config::domains::logging::{LogFormat, LogLevel};
use cohort_config::*;
use std::io::Write;
use std::time::Duration;
use temp_env::with_vars;

#[test]
fn test_default_config_validation() {
    let config = CohortConfig::default();
    assert!(config.validate_all().is_ok());
}

#[test]
fn test_config_loader_from_env() {
    let vars = vec![
        ("COHORT_MAX_ENGINES", Some("8")),
        ("COHORT_PRESERVE_IDS", Some("true")),
        ("COHORT_DEFAULT_RETRIES", Some("3")),
        ("COHORT_LOG_LEVEL", Some("debug")),
        ("COHORT_LOG_FORMAT", Some("json")),
        ("COHORT_MAX_FRAME_BYTES", Some("4096")),
    ];

    with_vars(vars, || {
        let config = ConfigLoader::new().from_env().unwrap();

        assert_eq!(config.controller.max_engines, 8);
        assert!(config.controller.preserve_ids);
        assert_eq!(config.scheduler.default_retries, 3);
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.ipc.max_frame_bytes, 4096);
    });
}

#[test]
fn test_invalid_env_value_is_reported() {
    with_vars(vec![("COHORT_MAX_ENGINES", Some("many"))], || {
        let err = ConfigLoader::new().from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::EnvError(ref msg) if msg.contains("COHORT_MAX_ENGINES")
        ));
    });
}

#[test]
fn test_env_override_is_validated() {
    with_vars(vec![("COHORT_MAX_ENGINES", Some("0"))], || {
        let err = ConfigLoader::new().from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::DomainError { ref domain, .. } if domain == "controller"
        ));
    });
}

#[test]
fn test_custom_prefix() {
    with_vars(vec![("MYAPP_DEFAULT_RETRIES", Some("7"))], || {
        let config = ConfigLoader::with_prefix("MYAPP").from_env().unwrap();
        assert_eq!(config.scheduler.default_retries, 7);
    });
}

#[test]
fn test_yaml_config_serialization() {
    let config = CohortConfig::default();
    let yaml = serde_yaml::to_string(&config).unwrap();

    let parsed: CohortConfig = serde_yaml::from_str(&yaml).unwrap();
    assert!(parsed.validate_all().is_ok());
    assert_eq!(parsed, config);
}

#[test]
fn test_partial_yaml_uses_defaults() {
    let yaml = r#"
controller:
  max_engines: 16
ipc:
  handshake_timeout: 2500
"#;

    with_vars(Vec::<(&str, Option<&str>)>::new(), || {
        let config = ConfigLoader::new().from_yaml(yaml).unwrap();
        assert_eq!(config.controller.max_engines, 16);
        assert!(!config.controller.preserve_ids);
        assert_eq!(config.ipc.handshake_timeout, Duration::from_millis(2500));
        assert_eq!(config.ipc.max_frame_bytes, 16 * 1024 * 1024);
        assert_eq!(config.scheduler, SchedulerConfig::default());
    });
}

#[test]
fn test_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "scheduler:\n  default_retries: 2\n  clear_between_tasks: true\nlogging:\n  level: warn"
    )
    .unwrap();

    with_vars(vec![("COHORT_LOG_LEVEL", None::<&str>)], || {
        let config = ConfigLoader::new().load(Some(file.path())).unwrap();
        assert_eq!(config.scheduler.default_retries, 2);
        assert!(config.scheduler.clear_between_tasks);
        assert_eq!(config.logging.level, LogLevel::Warn);
    });
}

#[test]
fn test_invalid_yaml_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "controller: [not, a, map]").unwrap();

    let err = ConfigLoader::new().from_file(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::ParseError(_)));
}

#[test]
fn test_missing_file() {
    let err = ConfigLoader::new()
        .from_file("/definitely/not/here/cohort.yaml")
        .unwrap_err();
    assert!(matches!(err, ConfigError::FileReadError(_)));
}

#[test]
fn test_generate_sample() {
    let sample = CohortConfig::generate_sample();
    assert!(sample.contains("max_engines"));
    assert!(sample.contains("max_frame_bytes"));
}

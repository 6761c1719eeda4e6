use std::env;
use std::sync::{Mutex, OnceLock};

use signflow_cli::commands::{config, doctor, migrate};
use serde_json::Value;

#[test]
fn migrate_applies_schema_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = database_url(&dir);

    with_env(&[("SIGNFLOW_DATABASE_URL", url.as_str())], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["message"], "applied 1 pending migration(s)");

        let again = parse_payload(&migrate::run().output);
        assert_eq!(again["status"], "ok");
        assert_eq!(again["message"], "schema already up to date");
    });
}

#[test]
fn migrate_returns_config_failure_for_non_sqlite_url() {
    with_env(&[("SIGNFLOW_DATABASE_URL", "postgres://localhost/signflow")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn doctor_flags_pending_migrations_until_migrate_runs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = database_url(&dir);

    with_env(
        &[("SIGNFLOW_DATABASE_URL", url.as_str()), ("SIGNFLOW_DIRECTORY_ADMINISTRATORS", "ADMIN")],
        || {
            let before = doctor::run(true);
            assert_eq!(before.exit_code, 1);
            let report = parse_payload(&before.output);
            assert_eq!(report["overall_status"], "fail");
            assert_eq!(check(&report, "schema_migrations")["status"], "fail");
            assert_eq!(check(&report, "database_connectivity")["status"], "pass");

            assert_eq!(migrate::run().exit_code, 0);

            let after = doctor::run(true);
            assert_eq!(after.exit_code, 0);
            let report = parse_payload(&after.output);
            assert_eq!(report["overall_status"], "pass");
            assert_eq!(check(&report, "routing_directory")["status"], "pass");
        },
    );
}

#[test]
fn doctor_warns_without_administrators_and_skips_on_bad_config() {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = database_url(&dir);

    with_env(&[("SIGNFLOW_DATABASE_URL", url.as_str())], || {
        assert_eq!(migrate::run().exit_code, 0);
        let report = parse_payload(&doctor::run(true).output);
        assert_eq!(report["overall_status"], "warn");
        assert_eq!(check(&report, "routing_directory")["status"], "warn");
    });

    with_env(&[("SIGNFLOW_ROUTING_CONFLICT_RETRIES", "lots")], || {
        let result = doctor::run(false);
        assert_eq!(result.exit_code, 1);
        assert!(result.output.contains("[fail] config_validation"));
        assert!(result.output.contains("[skip] database_connectivity"));
    });
}

#[test]
fn config_reports_sources_and_redacts_gateway_token() {
    with_env(
        &[
            ("SIGNFLOW_DATABASE_URL", "sqlite::memory:"),
            ("SIGNFLOW_SERVER_GATEWAY_TOKEN", "gateway-secret-value"),
        ],
        || {
            let result = config::run();
            assert_eq!(result.exit_code, 0);
            assert!(result
                .output
                .contains("- database.url = sqlite::memory: (source: env (SIGNFLOW_DATABASE_URL))"));
            assert!(result.output.contains("- server.gateway_token = gate***"));
            assert!(!result.output.contains("gateway-secret-value"));
            assert!(result.output.contains("- routing.conflict_retries = 3 (source: default)"));
        },
    );
}

fn database_url(dir: &tempfile::TempDir) -> String {
    format!("sqlite://{}", dir.path().join("signflow.db").display())
}

fn check<'a>(report: &'a Value, name: &str) -> &'a Value {
    report["checks"]
        .as_array()
        .and_then(|checks| checks.iter().find(|check| check["name"] == name))
        .expect("doctor check should be present")
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    let keys = [
        "SIGNFLOW_DATABASE_URL",
        "SIGNFLOW_DATABASE_MAX_CONNECTIONS",
        "SIGNFLOW_DATABASE_TIMEOUT_SECS",
        "SIGNFLOW_SERVER_BIND_ADDRESS",
        "SIGNFLOW_SERVER_PORT",
        "SIGNFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "SIGNFLOW_SERVER_GATEWAY_TOKEN",
        "SIGNFLOW_ROUTING_MAX_CHAIN_LENGTH",
        "SIGNFLOW_ROUTING_CONFLICT_RETRIES",
        "SIGNFLOW_ROUTING_DEFAULT_PAGE_SIZE",
        "SIGNFLOW_DIRECTORY_ADMINISTRATORS",
        "SIGNFLOW_LOGGING_LEVEL",
        "SIGNFLOW_LOGGING_FORMAT",
        "SIGNFLOW_LOG_LEVEL",
        "SIGNFLOW_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::ExposeSecret;
use signflow_core::config::{AppConfig, LoadOptions};
use toml::Value;

use crate::commands::CommandResult;

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return CommandResult::text(2, format!("config validation failed: {error}")),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_keys: &[&str]| {
        field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let gateway_token = config
        .server
        .gateway_token
        .as_ref()
        .map(|token| redact_token(token.expose_secret()))
        .unwrap_or_else(|| "<unset>".to_string());
    let administrators = if config.directory.administrators.is_empty() {
        "<none>".to_string()
    } else {
        config.directory.administrators.join(",")
    };

    let entries = [
        ("database.url", config.database.url.clone(), &["SIGNFLOW_DATABASE_URL"][..]),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["SIGNFLOW_DATABASE_MAX_CONNECTIONS"][..],
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["SIGNFLOW_DATABASE_TIMEOUT_SECS"][..],
        ),
        ("server.bind_address", config.server.bind_address.clone(), &["SIGNFLOW_SERVER_BIND_ADDRESS"][..]),
        ("server.port", config.server.port.to_string(), &["SIGNFLOW_SERVER_PORT"][..]),
        (
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            &["SIGNFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS"][..],
        ),
        ("server.gateway_token", gateway_token, &["SIGNFLOW_SERVER_GATEWAY_TOKEN"][..]),
        (
            "routing.max_chain_length",
            config.routing.max_chain_length.to_string(),
            &["SIGNFLOW_ROUTING_MAX_CHAIN_LENGTH"][..],
        ),
        (
            "routing.conflict_retries",
            config.routing.conflict_retries.to_string(),
            &["SIGNFLOW_ROUTING_CONFLICT_RETRIES"][..],
        ),
        (
            "routing.default_page_size",
            config.routing.default_page_size.to_string(),
            &["SIGNFLOW_ROUTING_DEFAULT_PAGE_SIZE"][..],
        ),
        ("directory.administrators", administrators, &["SIGNFLOW_DIRECTORY_ADMINISTRATORS"][..]),
        ("directory.members", format!("{} entries", config.directory.members.len()), &[][..]),
        ("directory.forms", format!("{} entries", config.directory.forms.len()), &[][..]),
        (
            "logging.level",
            config.logging.level.clone(),
            &["SIGNFLOW_LOGGING_LEVEL", "SIGNFLOW_LOG_LEVEL"][..],
        ),
        (
            "logging.format",
            format!("{:?}", config.logging.format).to_ascii_lowercase(),
            &["SIGNFLOW_LOGGING_FORMAT", "SIGNFLOW_LOG_FORMAT"][..],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_keys) in entries {
        lines.push(render_line(key, &value, source(key, env_keys)));
    }

    CommandResult::text(0, lines.join("\n"))
}

fn detect_config_path() -> Option<PathBuf> {
    ["signflow.toml", "config/signflow.toml"].into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    match trimmed.chars().count() {
        0 => "<empty>".to_string(),
        1..=8 => "<redacted>".to_string(),
        _ => format!("{}***", trimmed.chars().take(4).collect::<String>()),
    }
}

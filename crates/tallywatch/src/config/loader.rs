use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

pub const ENV_DB_PATH: &str = "TALLYWATCH_DB_PATH";
pub const ENV_WORKERS: &str = "TALLYWATCH_WORKERS";
pub const ENV_LOG: &str = "TALLYWATCH_LOG";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let mut config: Config = serde_json::from_value(json_value)?;

    apply_env_overrides(&mut config)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

/// Applies `TALLYWATCH_*` environment variables on top of the file.
pub fn apply_env_overrides(config: &mut Config) -> Result<(), ConfigError> {
    if let Ok(path) = std::env::var(ENV_DB_PATH) {
        if !path.trim().is_empty() {
            config.database.path = Some(PathBuf::from(path));
        }
    }

    if let Ok(raw) = std::env::var(ENV_WORKERS) {
        let count = raw
            .trim()
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| ConfigError::InvalidOverride {
                name: ENV_WORKERS.to_string(),
                value: raw.clone(),
                reason: "expected a positive integer".to_string(),
            })?;
        config.workers.count = count;
    }

    if let Ok(level) = std::env::var(ENV_LOG) {
        if !level.trim().is_empty() {
            config.logging.level = level;
        }
    }

    Ok(())
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(invalid(format!(
            "Unsupported config version: {}",
            config.version
        )));
    }

    let unit_values = [
        ("extraction.review_threshold", config.extraction.review_threshold),
        ("extraction.repair_confidence", config.extraction.repair_confidence),
        (
            "validation.low_confidence_threshold",
            config.validation.low_confidence_threshold,
        ),
        (
            "validation.critical_confidence_threshold",
            config.validation.critical_confidence_threshold,
        ),
        (
            "validation.aggregate_confidence_threshold",
            config.validation.aggregate_confidence_threshold,
        ),
    ];
    for (name, value) in unit_values {
        if !(0.0..=1.0).contains(&value) {
            return Err(invalid(format!("{} must be within 0..=1, got {}", name, value)));
        }
    }
    if config.validation.critical_confidence_threshold > config.validation.low_confidence_threshold
    {
        return Err(invalid(
            "validation.critical_confidence_threshold must not exceed low_confidence_threshold",
        ));
    }
    if config.provider.retry.base_delay_ms > config.provider.retry.max_delay_ms {
        return Err(invalid(
            "provider.retry.base_delay_ms must not exceed max_delay_ms",
        ));
    }

    // Mark vocabulary: non-empty, unique, made of configured glyphs only.
    let marks = &config.extraction.marks;
    if marks.glyphs.is_empty() {
        return Err(invalid("extraction.marks.glyphs must not be empty"));
    }
    let mut symbols = HashSet::new();
    for entry in &marks.entries {
        if entry.symbol.is_empty() {
            return Err(invalid("extraction.marks entry has an empty symbol"));
        }
        if !symbols.insert(entry.symbol.as_str()) {
            return Err(invalid(format!(
                "extraction.marks symbol '{}' is listed twice",
                entry.symbol
            )));
        }
        if let Some(c) = entry.symbol.chars().find(|c| !marks.is_glyph(*c)) {
            return Err(invalid(format!(
                "extraction.marks symbol '{}' uses '{}', which is not a mark glyph",
                entry.symbol, c
            )));
        }
    }

    let mut parties = HashSet::new();
    for party in &config.extraction.parties {
        if !parties.insert(party.as_str()) {
            return Err(invalid(format!("extraction.parties lists '{}' twice", party)));
        }
    }

    let mut rule_ids = HashSet::new();
    for rule in &config.agent.rules {
        if !rule_ids.insert(&rule.id) {
            return Err(ConfigError::InvalidRule {
                id: rule.id.clone(),
                reason: "Duplicate rule ID".to_string(),
            });
        }
        rule.check().map_err(|reason| ConfigError::InvalidRule {
            id: rule.id.clone(),
            reason,
        })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;
    use crate::config::schema::LogFormat;
    use crate::extract::MarkMeaning;

    fn clear_env() {
        std::env::remove_var(ENV_DB_PATH);
        std::env::remove_var(ENV_WORKERS);
        std::env::remove_var(ENV_LOG);
    }

    #[test]
    #[serial]
    fn test_load_valid_config() {
        clear_env();
        let config_json = r#"
        {
            "version": "1.0",
            "database": { "path": "/var/lib/tallywatch/t.db" },
            "workers": { "count": 4, "split_pages": true },
            "provider": { "timeout_ms": 5000, "retry": { "max_attempts": 5 } },
            "extraction": {
                "parties": ["party_a", "party_b"],
                "marks": {
                    "entries": [
                        { "symbol": "*", "meaning": "blank" },
                        { "symbol": "**", "meaning": "contested" }
                    ]
                }
            },
            "validation": { "arithmetic_tolerance": 2, "disabled_rules": ["mark-detected"] },
            "logging": { "level": "debug", "format": "json" }
        }
        "#;

        let config = load_config_from_str(config_json).unwrap();
        assert_eq!(config.workers.count, 4);
        assert!(config.workers.split_pages);
        assert_eq!(config.provider.retry.max_attempts, 5);
        assert_eq!(config.provider.retry.base_delay_ms, 500);
        assert_eq!(config.extraction.marks.entries[1].meaning, MarkMeaning::Contested);
        assert_eq!(config.validation.arithmetic_tolerance, 2);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(
            config.database.path.as_deref(),
            Some(Path::new("/var/lib/tallywatch/t.db"))
        );
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tallywatch.json");
        std::fs::write(&path, r#"{"version": "1.0"}"#).unwrap();
        assert!(load_config(&path).is_ok());

        let missing = load_config(dir.path().join("missing.json")).unwrap_err();
        assert!(matches!(missing, ConfigError::ReadFile { .. }));
    }

    #[test]
    #[serial]
    fn test_schema_rejects_unknown_section() {
        clear_env();
        let err = load_config_from_str(r#"{"version": "1.0", "inbox": {}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::SchemaValidation { .. }));
    }

    #[test]
    #[serial]
    fn test_schema_rejects_out_of_range_threshold() {
        clear_env();
        let err = load_config_from_str(
            r#"{"version": "1.0", "validation": {"low_confidence_threshold": 1.5}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::SchemaValidation { .. }));
    }

    #[test]
    #[serial]
    fn test_invalid_version() {
        clear_env();
        assert!(load_config_from_str(r#"{"version": "2.0"}"#).is_err());
    }

    #[test]
    #[serial]
    fn test_duplicate_mark_symbols() {
        clear_env();
        let config_json = r#"
        {
            "version": "1.0",
            "extraction": {
                "marks": {
                    "entries": [
                        { "symbol": "*", "meaning": "blank" },
                        { "symbol": "*", "meaning": "void" }
                    ]
                }
            }
        }
        "#;
        let err = load_config_from_str(config_json).unwrap_err();
        assert!(err.to_string().contains("listed twice"));
    }

    #[test]
    #[serial]
    fn test_mark_symbol_outside_glyphs() {
        clear_env();
        let config_json = r##"
        {
            "version": "1.0",
            "extraction": {
                "marks": {
                    "glyphs": ["*"],
                    "entries": [{ "symbol": "#", "meaning": "void" }]
                }
            }
        }
        "##;
        assert!(load_config_from_str(config_json).is_err());
    }

    #[test]
    #[serial]
    fn test_duplicate_rule_ids() {
        clear_env();
        let rule = r#"{
            "id": "stale",
            "concern": "documents",
            "condition": { "type": "stale_documents", "older_than_minutes": 30 },
            "action": { "type": "alert" }
        }"#;
        let config_json = format!(r#"{{"version": "1.0", "agent": {{"rules": [{rule}, {rule}]}}}}"#);
        let err = load_config_from_str(&config_json).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRule { .. }));
    }

    #[test]
    #[serial]
    fn test_rule_with_wrong_concern() {
        clear_env();
        let config_json = r#"{
            "version": "1.0",
            "agent": { "rules": [{
                "id": "overdue",
                "concern": "kpis",
                "condition": { "type": "overdue_critical", "older_than_minutes": 30 },
                "action": { "type": "escalate" }
            }]}
        }"#;
        assert!(matches!(
            load_config_from_str(config_json).unwrap_err(),
            ConfigError::InvalidRule { .. }
        ));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        std::env::set_var(ENV_DB_PATH, "/tmp/override.db");
        std::env::set_var(ENV_WORKERS, "7");
        std::env::set_var(ENV_LOG, "tallywatch=trace");

        let config = load_config_from_str(r#"{"version": "1.0", "workers": {"count": 2}}"#).unwrap();
        assert_eq!(config.workers.count, 7);
        assert_eq!(config.logging.level, "tallywatch=trace");
        assert_eq!(config.database.path, Some(PathBuf::from("/tmp/override.db")));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_bad_worker_override() {
        clear_env();
        std::env::set_var(ENV_WORKERS, "zero");
        let err = load_config_from_str(r#"{"version": "1.0"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOverride { .. }));
        clear_env();
    }
}

//! Table-driven tests for configuration loading and validation.

mod common;

use serial_test::serial;

use tallywatch::agent::{Concern, RuleMode};
use tallywatch::config::{load_config, load_config_from_str};
use tallywatch::incident::IncidentType;
use tallywatch::validation::Severity;

use common::{png, TallySheet, TestHarness};

/// Represents a single config loading test case.
struct ConfigTestCase {
    /// Test case name for identification.
    name: &'static str,
    config_json: &'static str,
    should_succeed: bool,
    /// Expected error substring (if should_succeed is false).
    expected_error: Option<&'static str>,
}

const CONFIG_TESTS: &[ConfigTestCase] = &[
    ConfigTestCase {
        name: "minimal",
        config_json: r#"{ "version": "1.0" }"#,
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "full",
        config_json: r#"{
            "version": "1.0",
            "workers": { "count": 8, "max_job_attempts": 5 },
            "provider": {
                "timeout_ms": 10000,
                "breaker": { "failure_threshold": 3, "cooldown_ms": 60000 },
                "languages": ["spa"]
            },
            "incidents": { "escalation_age_minutes": 45, "min_severity": "medium" },
            "agent": {
                "intervals": { "documents_secs": 15, "deadlines_secs": 5 },
                "warning_minutes": { "critical": 5 },
                "rules": [{
                    "id": "void-cluster",
                    "concern": "documents",
                    "condition": {
                        "type": "finding_cluster",
                        "rule_id": "impossible-value",
                        "min_count": 2,
                        "window_minutes": 30,
                        "scope": "department"
                    },
                    "action": {
                        "type": "create_incident",
                        "incident_type": "ANOMALY_CLUSTER",
                        "severity": "critical"
                    },
                    "mode": "recommendation_only"
                }]
            }
        }"#,
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "missing_version",
        config_json: r#"{ "workers": { "count": 2 } }"#,
        should_succeed: false,
        expected_error: Some("version"),
    },
    ConfigTestCase {
        name: "unsupported_version",
        config_json: r#"{ "version": "3.0" }"#,
        should_succeed: false,
        expected_error: Some("3.0"),
    },
    ConfigTestCase {
        name: "zero_workers",
        config_json: r#"{ "version": "1.0", "workers": { "count": 0 } }"#,
        should_succeed: false,
        expected_error: None,
    },
    ConfigTestCase {
        name: "unknown_rule_condition",
        config_json: r#"{
            "version": "1.0",
            "agent": { "rules": [{
                "id": "x",
                "concern": "documents",
                "condition": { "type": "moon_phase" },
                "action": { "type": "alert" }
            }]}
        }"#,
        should_succeed: false,
        expected_error: None,
    },
    ConfigTestCase {
        name: "not_json",
        config_json: "version = 1.0",
        should_succeed: false,
        expected_error: None,
    },
];

#[test]
#[serial]
fn test_config_loading_cases() {
    for case in CONFIG_TESTS {
        let result = load_config_from_str(case.config_json);
        match (&result, case.should_succeed) {
            (Ok(_), true) => {}
            (Err(e), false) => {
                if let Some(expected) = case.expected_error {
                    assert!(
                        e.to_string().contains(expected),
                        "{}: error '{}' should mention '{}'",
                        case.name,
                        e,
                        expected
                    );
                }
            }
            (Ok(_), false) => panic!("{}: expected failure, config loaded", case.name),
            (Err(e), true) => panic!("{}: expected success, got {}", case.name, e),
        }
    }
}

#[test]
#[serial]
fn test_full_config_values() {
    let config = load_config_from_str(CONFIG_TESTS[1].config_json).unwrap();
    assert_eq!(config.workers.count, 8);
    assert_eq!(config.provider.breaker.failure_threshold, 3);
    assert_eq!(config.incidents.min_severity, Severity::Medium);
    assert_eq!(config.agent.intervals.documents_secs, 15);
    // Unset intervals keep their defaults.
    assert_eq!(config.agent.intervals.kpis_secs, 60);
    assert_eq!(config.agent.warning_minutes.critical, 5.0);
    assert_eq!(config.agent.warning_minutes.high, 5.0);

    // Configured rules replace the built-in set.
    assert_eq!(config.agent.rules.len(), 1);
    let rule = &config.agent.rules[0];
    assert_eq!(rule.concern, Concern::Documents);
    assert_eq!(rule.mode, RuleMode::RecommendationOnly);
    assert!(rule.enabled);
}

#[test]
#[serial]
fn test_config_file_drives_the_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tallywatch.json");
    std::fs::write(
        &path,
        r#"{ "version": "1.0", "incidents": { "min_severity": "critical" } }"#,
    )
    .unwrap();
    let mut config = load_config(&path).unwrap();
    config.provider.retry.base_delay_ms = 1;

    // A high-severity impossible value no longer raises an incident.
    let harness = TestHarness::with_config(config);
    let doc = harness.process(
        "mesa.png",
        png(400),
        TallySheet::new("05-001-01-02-003")
            .tally("party_a", "10")
            .total("10")
            .cell("total.e11", "25", 0.99)
            .build(),
    );
    assert!(harness
        .incidents(Default::default())
        .iter()
        .all(|i| i.incident_type != IncidentType::E11VsUrna));
    assert!(!harness.ctx().review.items_for_document(&doc.id).unwrap().is_empty());
}

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::rules::{default_rules, AgentRule};
use crate::document::DocumentFormat;
use crate::extract::{MarkTable, DEFAULT_REPAIR_CONFIDENCE, DEFAULT_REVIEW_THRESHOLD};
use crate::provider::RetryPolicy;
use crate::review::DEFAULT_CLAIM_TTL_MINUTES;
use crate::validation::{Severity, ValidationRules};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub validation: ValidationRules,
    #[serde(default)]
    pub review: ReviewConfig,
    #[serde(default)]
    pub incidents: IncidentConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub intake: IntakeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            database: DatabaseConfig::default(),
            workers: WorkerConfig::default(),
            provider: ProviderConfig::default(),
            extraction: ExtractionConfig::default(),
            validation: ValidationRules::default(),
            review: ReviewConfig::default(),
            incidents: IncidentConfig::default(),
            agent: AgentConfig::default(),
            intake: IntakeConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Configured database file, else the platform data directory.
    pub fn database_path(&self) -> Option<PathBuf> {
        self.database
            .path
            .clone()
            .or_else(crate::db::default_database_path)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Defaults to `<data dir>/tallywatch/tallywatch.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_count")]
    pub count: usize,
    /// How long an idle worker waits on the queue before re-checking shutdown.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Pipeline runs per job before it is marked failed.
    #[serde(default = "default_max_job_attempts")]
    pub max_job_attempts: u32,
    /// Submit multi-page documents as one job per page.
    #[serde(default)]
    pub split_pages: bool,
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_poll_interval_ms() -> u64 {
    200
}

fn default_max_job_attempts() -> u32 {
    3
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            poll_interval_ms: default_poll_interval_ms(),
            max_job_attempts: default_max_job_attempts(),
            split_pages: false,
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub breaker: BreakerConfig,
    /// Languages passed to the OCR engine.
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_languages() -> Vec<String> {
    vec!["spa".to_string()]
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            retry: RetryPolicy::default(),
            breaker: BreakerConfig::default(),
            languages: default_languages(),
        }
    }
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_ms() -> u64 {
    30_000
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

impl BreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Fields below this confidence are flagged for review.
    #[serde(default = "default_review_threshold")]
    pub review_threshold: f64,
    /// Confidence given to readings that needed digit repair.
    #[serde(default = "default_repair_confidence")]
    pub repair_confidence: f64,
    #[serde(default)]
    pub marks: MarkTable,
    /// Party keys expected on the tally sheet, in form order.
    #[serde(default)]
    pub parties: Vec<String>,
}

fn default_review_threshold() -> f64 {
    DEFAULT_REVIEW_THRESHOLD
}

fn default_repair_confidence() -> f64 {
    DEFAULT_REPAIR_CONFIDENCE
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            review_threshold: default_review_threshold(),
            repair_confidence: default_repair_confidence(),
            marks: MarkTable::default(),
            parties: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewConfig {
    #[serde(default = "default_claim_ttl")]
    pub claim_ttl_minutes: i64,
}

fn default_claim_ttl() -> i64 {
    DEFAULT_CLAIM_TTL_MINUTES
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            claim_ttl_minutes: default_claim_ttl(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentConfig {
    /// Critical incidents unresolved for longer than this are escalated.
    #[serde(default = "default_escalation_age")]
    pub escalation_age_minutes: i64,
    /// Failed findings at or above this severity become incidents.
    #[serde(default = "default_min_severity")]
    pub min_severity: Severity,
}

fn default_escalation_age() -> i64 {
    30
}

fn default_min_severity() -> Severity {
    Severity::High
}

impl Default for IncidentConfig {
    fn default() -> Self {
        Self {
            escalation_age_minutes: default_escalation_age(),
            min_severity: default_min_severity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollIntervals {
    #[serde(default = "default_documents_secs")]
    pub documents_secs: u64,
    #[serde(default = "default_incidents_secs")]
    pub incidents_secs: u64,
    #[serde(default = "default_kpis_secs")]
    pub kpis_secs: u64,
    #[serde(default = "default_deadlines_secs")]
    pub deadlines_secs: u64,
}

fn default_documents_secs() -> u64 {
    30
}

fn default_incidents_secs() -> u64 {
    20
}

fn default_kpis_secs() -> u64 {
    60
}

fn default_deadlines_secs() -> u64 {
    10
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            documents_secs: default_documents_secs(),
            incidents_secs: default_incidents_secs(),
            kpis_secs: default_kpis_secs(),
            deadlines_secs: default_deadlines_secs(),
        }
    }
}

/// Minutes before the SLA deadline at which a warning is raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarningThresholds {
    #[serde(default = "default_warn_critical")]
    pub critical: f64,
    #[serde(default = "default_warn_high")]
    pub high: f64,
    #[serde(default = "default_warn_medium")]
    pub medium: f64,
    #[serde(default = "default_warn_low")]
    pub low: f64,
}

fn default_warn_critical() -> f64 {
    3.0
}

fn default_warn_high() -> f64 {
    5.0
}

fn default_warn_medium() -> f64 {
    10.0
}

fn default_warn_low() -> f64 {
    15.0
}

impl Default for WarningThresholds {
    fn default() -> Self {
        Self {
            critical: default_warn_critical(),
            high: default_warn_high(),
            medium: default_warn_medium(),
            low: default_warn_low(),
        }
    }
}

impl WarningThresholds {
    pub fn for_severity(&self, severity: Severity) -> f64 {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub intervals: PollIntervals,
    /// Upper bound of the random delay added to each poll.
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
    #[serde(default)]
    pub warning_minutes: WarningThresholds,
    /// At most one SLA warning per incident within this window.
    #[serde(default = "default_alert_cooldown")]
    pub alert_cooldown_minutes: i64,
    #[serde(default = "default_rules")]
    pub rules: Vec<AgentRule>,
}

fn default_jitter_ms() -> u64 {
    1_000
}

fn default_alert_cooldown() -> i64 {
    10
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            intervals: PollIntervals::default(),
            jitter_ms: default_jitter_ms(),
            warning_minutes: WarningThresholds::default(),
            alert_cooldown_minutes: default_alert_cooldown(),
            rules: default_rules(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntakeConfig {
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_allowed_formats")]
    pub allowed_formats: Vec<DocumentFormat>,
}

fn default_max_bytes() -> usize {
    25 * 1024 * 1024
}

fn default_max_pages() -> u32 {
    20
}

fn default_allowed_formats() -> Vec<DocumentFormat> {
    DocumentFormat::ALL.to_vec()
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_max_bytes(),
            max_pages: default_max_pages(),
            allowed_formats: default_allowed_formats(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_fills_defaults() {
        let config: Config = serde_json::from_str(r#"{"version": "1.0"}"#).unwrap();
        assert!(config.workers.count >= 1);
        assert_eq!(config.provider.retry.max_attempts, 3);
        assert_eq!(config.extraction.review_threshold, 0.85);
        assert_eq!(config.review.claim_ttl_minutes, 30);
        assert_eq!(config.incidents.min_severity, Severity::High);
        assert_eq!(config.agent.rules.len(), default_rules().len());
        assert_eq!(config.intake.allowed_formats.len(), DocumentFormat::ALL.len());
        assert_eq!(config.logging.format, LogFormat::Plain);
    }

    #[test]
    fn test_warning_thresholds_by_severity() {
        let thresholds = WarningThresholds::default();
        assert!(thresholds.for_severity(Severity::Critical) < thresholds.for_severity(Severity::Low));
    }

    #[test]
    fn test_durations() {
        let config = Config::default();
        assert_eq!(config.provider.timeout(), Duration::from_secs(30));
        assert_eq!(config.provider.breaker.cooldown(), Duration::from_secs(30));
        assert_eq!(config.workers.poll_interval(), Duration::from_millis(200));
    }
}

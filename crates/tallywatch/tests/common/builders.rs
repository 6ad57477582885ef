//! Builders for test configurations, provider readings and input files.

#![allow(dead_code)]

use std::io::Cursor;

use lopdf::{dictionary, Object};

use tallywatch::agent::AgentRule;
use tallywatch::config::Config;
use tallywatch::provider::{FixtureProvider, ProviderOutput};
use tallywatch::validation::Severity;

/// Table code used by most fixtures.
pub const TABLE_CODE: &str = "05-001-01-02-003";

const HEADER_KEYS: [&str; 5] = [
    "header.department",
    "header.municipality",
    "header.zone",
    "header.station",
    "header.table",
];

// ─── Config ───

/// Builder for `Config` instances with fast retries and no agent rules.
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        let mut config = Config::default();
        config.workers.count = 1;
        config.workers.poll_interval_ms = 20;
        config.provider.retry.base_delay_ms = 1;
        config.provider.retry.max_delay_ms = 5;
        config.provider.timeout_ms = 2_000;
        config.agent.jitter_ms = 0;
        Self { config }
    }

    pub fn workers(mut self, count: usize) -> Self {
        self.config.workers.count = count;
        self
    }

    pub fn split_pages(mut self, split: bool) -> Self {
        self.config.workers.split_pages = split;
        self
    }

    pub fn max_job_attempts(mut self, attempts: u32) -> Self {
        self.config.workers.max_job_attempts = attempts;
        self
    }

    /// Provider calls per job attempt.
    pub fn provider_attempts(mut self, attempts: u32) -> Self {
        self.config.provider.retry.max_attempts = attempts;
        self
    }

    pub fn breaker(mut self, failure_threshold: u32, cooldown_ms: u64) -> Self {
        self.config.provider.breaker.failure_threshold = failure_threshold;
        self.config.provider.breaker.cooldown_ms = cooldown_ms;
        self
    }

    pub fn min_incident_severity(mut self, severity: Severity) -> Self {
        self.config.incidents.min_severity = severity;
        self
    }

    pub fn rules(mut self, rules: Vec<AgentRule>) -> Self {
        self.config.agent.rules = rules;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Provider readings ───

/// Builder for a provider reading of one tally sheet.
///
/// Cells are read at high confidence unless set otherwise; the header cells
/// follow the table code so cross-validation matches exactly.
pub struct TallySheet {
    code: Option<String>,
    header: Vec<(String, String)>,
    cells: Vec<(String, String, f64)>,
    confidence: f64,
}

impl TallySheet {
    pub fn new(code: &str) -> Self {
        let header = HEADER_KEYS
            .iter()
            .zip(code.split('-'))
            .map(|(key, part)| (key.to_string(), part.to_string()))
            .collect();
        Self {
            code: Some(code.to_string()),
            header,
            cells: Vec::new(),
            confidence: 0.99,
        }
    }

    pub fn tally(mut self, party: &str, text: &str) -> Self {
        let confidence = self.confidence;
        self.cells
            .push((format!("tally.{}", party), text.to_string(), confidence));
        self
    }

    pub fn total(mut self, text: &str) -> Self {
        let confidence = self.confidence;
        self.cells
            .push(("total.urn".to_string(), text.to_string(), confidence));
        self
    }

    /// Adds a cell with its own confidence.
    pub fn cell(mut self, key: &str, text: &str, confidence: f64) -> Self {
        self.cells.push((key.to_string(), text.to_string(), confidence));
        self
    }

    /// Header cell override, for disagreement with the code.
    pub fn header(mut self, key: &str, text: &str) -> Self {
        let key = format!("header.{}", key);
        match self.header.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = text.to_string(),
            None => self.header.push((key, text.to_string())),
        }
        self
    }

    pub fn without_code(mut self) -> Self {
        self.code = None;
        self
    }

    pub fn build(&self) -> ProviderOutput {
        let cells: Vec<(&str, &str, f64)> = self
            .header
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str(), self.confidence))
            .chain(self.cells.iter().map(|(k, v, c)| (k.as_str(), v.as_str(), *c)))
            .collect();
        FixtureProvider::output(&cells, self.code.as_deref())
    }
}

/// A clean sheet: 210 + 188 + 4 blank against a declared 402.
pub fn clean_sheet(code: &str) -> ProviderOutput {
    TallySheet::new(code)
        .tally("party_a", "210")
        .tally("party_b", "188")
        .tally("blank", "4")
        .total("402")
        .build()
}

// ─── Input files ───

/// A small PNG whose bytes differ per `seed`, so each call is a new document.
pub fn png(seed: u32) -> Vec<u8> {
    let [a, b, c, d] = seed.to_be_bytes();
    let mut img = image::RgbImage::new(4, 4);
    img.put_pixel(0, 0, image::Rgb([a, b, c]));
    img.put_pixel(1, 0, image::Rgb([d, 0x7f, 0x01]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)
        .expect("Failed to encode PNG");
    out.into_inner()
}

/// A PDF with `pages` empty pages; `seed` goes into the document title.
pub fn pdf(pages: usize, seed: u32) -> Vec<u8> {
    let mut doc = lopdf::Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let kids: Vec<Object> = (0..pages)
        .map(|_| {
            doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            })
            .into()
        })
        .collect();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = doc.add_object(dictionary! {
        "Title" => Object::string_literal(format!("acta {}", seed)),
    });
    doc.trailer.set("Root", catalog_id);
    doc.trailer.set("Info", info_id);
    let mut out = Vec::new();
    doc.save_to(&mut out).expect("Failed to write PDF");
    out
}

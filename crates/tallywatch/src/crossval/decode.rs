//! Decoding of the machine-readable table code printed on tally forms.
//!
//! Two layouts are accepted:
//! - delimited: `E14 01|001|01|02|003`, `01-001-01-02-003`,
//!   `dept=01;mun=001;zone=01;station=02;table=003`, optionally prefixed by
//!   `E14` or `E-14`;
//! - packed: twelve digits `DDMMMZZPPTTT`.

use serde::{Deserialize, Serialize};

use crate::extract::field::HeaderComponent;
use crate::macros::str_enum;

/// Digit width of each component in the packed layout and canonical id.
const WIDTHS: [usize; 5] = [2, 3, 2, 2, 3];
const PACKED_LEN: usize = 12;

str_enum! {
    pub enum ParseStatus {
        Success => "success",
        Partial => "partial",
        Failed => "failed",
        NotFound => "not_found",
    }
}

/// The five parts of a table identifier. `None` means absent or illegible.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableComponents {
    pub department: Option<String>,
    pub municipality: Option<String>,
    pub zone: Option<String>,
    pub station: Option<String>,
    pub table: Option<String>,
}

impl TableComponents {
    pub fn get(&self, component: HeaderComponent) -> Option<&str> {
        match component {
            HeaderComponent::Department => self.department.as_deref(),
            HeaderComponent::Municipality => self.municipality.as_deref(),
            HeaderComponent::Zone => self.zone.as_deref(),
            HeaderComponent::Station => self.station.as_deref(),
            HeaderComponent::Table => self.table.as_deref(),
        }
    }

    pub fn set(&mut self, component: HeaderComponent, value: Option<String>) {
        let slot = match component {
            HeaderComponent::Department => &mut self.department,
            HeaderComponent::Municipality => &mut self.municipality,
            HeaderComponent::Zone => &mut self.zone,
            HeaderComponent::Station => &mut self.station,
            HeaderComponent::Table => &mut self.table,
        };
        *slot = value;
    }

    pub fn legible_count(&self) -> usize {
        HeaderComponent::ALL
            .iter()
            .filter(|c| self.get(**c).is_some())
            .count()
    }

    /// `DD-MMM-ZZ-PP-TTT`, only when all five parts are known.
    pub fn canonical_id(&self) -> Option<String> {
        let parts = HeaderComponent::ALL
            .iter()
            .zip(WIDTHS)
            .map(|(c, width)| {
                self.get(*c)
                    .map(|v| format!("{:0>width$}", strip_leading_zeros(v), width = width))
            })
            .collect::<Option<Vec<_>>>()?;
        Some(parts.join("-"))
    }

    /// Municipality-level prefix `DD-MMM`, used to group nearby tables.
    pub fn municipality_prefix(&self) -> Option<String> {
        let dept = self.department.as_deref()?;
        let mun = self.municipality.as_deref()?;
        Some(format!(
            "{:0>2}-{:0>3}",
            strip_leading_zeros(dept),
            strip_leading_zeros(mun)
        ))
    }
}

/// `"007"` and `"7"` name the same component; `"000"` is `"0"`.
pub fn strip_leading_zeros(value: &str) -> &str {
    let trimmed = value.trim_start_matches('0');
    if trimmed.is_empty() && !value.is_empty() {
        "0"
    } else {
        trimmed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedCode {
    pub raw: Option<String>,
    pub components: TableComponents,
    pub parse_status: ParseStatus,
    /// Legible components over five.
    pub confidence: f64,
}

impl DecodedCode {
    fn from_components(raw: &str, components: TableComponents) -> Self {
        let legible = components.legible_count();
        let parse_status = match legible {
            5 => ParseStatus::Success,
            0 => ParseStatus::Failed,
            _ => ParseStatus::Partial,
        };
        Self {
            raw: Some(raw.to_string()),
            components,
            parse_status,
            confidence: legible as f64 / 5.0,
        }
    }

    fn failed(raw: &str) -> Self {
        Self::from_components(raw, TableComponents::default())
    }

    pub fn is_usable(&self) -> bool {
        matches!(self.parse_status, ParseStatus::Success | ParseStatus::Partial)
    }
}

pub fn decode(raw_code: Option<&str>) -> DecodedCode {
    let Some(raw) = raw_code.map(str::trim).filter(|s| !s.is_empty()) else {
        return DecodedCode {
            raw: None,
            components: TableComponents::default(),
            parse_status: ParseStatus::NotFound,
            confidence: 0.0,
        };
    };

    let body = strip_prefix(raw);

    let compact: String = body.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.len() == PACKED_LEN && compact.chars().all(|c| c.is_ascii_digit()) {
        return DecodedCode::from_components(raw, decode_packed(&compact));
    }

    match decode_delimited(body) {
        Some(components) => DecodedCode::from_components(raw, components),
        None => DecodedCode::failed(raw),
    }
}

fn strip_prefix(raw: &str) -> &str {
    let upper = raw.to_ascii_uppercase();
    for prefix in ["E-14", "E14", "E 14"] {
        if upper.starts_with(prefix) {
            return raw[prefix.len()..].trim_start_matches(is_separator);
        }
    }
    raw
}

fn is_separator(c: char) -> bool {
    matches!(c, '|' | '-' | ';' | '/' | ':') || c.is_whitespace()
}

fn decode_packed(digits: &str) -> TableComponents {
    let mut components = TableComponents::default();
    let mut offset = 0;
    for (component, width) in HeaderComponent::ALL.iter().zip(WIDTHS) {
        components.set(*component, Some(digits[offset..offset + width].to_string()));
        offset += width;
    }
    components
}

fn component_for_key(key: &str) -> Option<HeaderComponent> {
    match key.trim().to_ascii_lowercase().as_str() {
        "dept" | "dep" | "dd" | "department" | "departamento" => Some(HeaderComponent::Department),
        "mun" | "mm" | "municipality" | "municipio" => Some(HeaderComponent::Municipality),
        "zone" | "zona" | "zz" => Some(HeaderComponent::Zone),
        "station" | "puesto" | "pp" => Some(HeaderComponent::Station),
        "table" | "mesa" | "ttt" => Some(HeaderComponent::Table),
        _ => None,
    }
}

/// Legible component values are digit runs; anything else is kept as absent.
fn legible(value: &str) -> Option<String> {
    let value = value.trim();
    if !value.is_empty() && value.chars().all(|c| c.is_ascii_digit()) {
        Some(value.to_string())
    } else {
        None
    }
}

fn decode_delimited(body: &str) -> Option<TableComponents> {
    let mut components = TableComponents::default();
    let mut position = 0;

    for token in body.split(is_separator).filter(|t| !t.is_empty()) {
        if let Some((key, value)) = token.split_once('=') {
            // Unknown keys are ignored rather than failing the whole code.
            if let Some(component) = component_for_key(key) {
                components.set(component, legible(value));
            }
            continue;
        }
        let component = *HeaderComponent::ALL.get(position)?;
        components.set(component, legible(token));
        position += 1;
    }

    Some(components)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_code() {
        assert_eq!(decode(None).parse_status, ParseStatus::NotFound);
        assert_eq!(decode(Some("   ")).parse_status, ParseStatus::NotFound);
    }

    #[test]
    fn test_delimited_with_prefix() {
        let code = decode(Some("E14 01|001|01|02|003"));
        assert_eq!(code.parse_status, ParseStatus::Success);
        assert_eq!(code.confidence, 1.0);
        assert_eq!(
            code.components.canonical_id().as_deref(),
            Some("01-001-01-02-003")
        );

        let dashed = decode(Some("E-14-01-001-01-02-003"));
        assert_eq!(dashed.components, code.components);
    }

    #[test]
    fn test_packed() {
        let code = decode(Some("010010102003"));
        assert_eq!(code.parse_status, ParseStatus::Success);
        assert_eq!(code.components.table.as_deref(), Some("003"));
        assert_eq!(code.components.municipality.as_deref(), Some("001"));
    }

    #[test]
    fn test_key_value_tokens() {
        let code = decode(Some("dept=5;mun=1;zone=1;station=2;table=3"));
        assert_eq!(code.parse_status, ParseStatus::Success);
        assert_eq!(
            code.components.canonical_id().as_deref(),
            Some("05-001-01-02-003")
        );
    }

    #[test]
    fn test_partial_keeps_legible_parts() {
        let code = decode(Some("01|001|??|02|0X3"));
        assert_eq!(code.parse_status, ParseStatus::Partial);
        assert_eq!(code.components.zone, None);
        assert_eq!(code.components.table, None);
        assert_eq!(code.components.station.as_deref(), Some("02"));
        assert!((code.confidence - 0.6).abs() < 1e-9);
        assert!(code.components.canonical_id().is_none());
    }

    #[test]
    fn test_garbage_fails() {
        assert_eq!(decode(Some("hello world")).parse_status, ParseStatus::Failed);
        assert_eq!(decode(Some("1|2|3|4|5|6|7")).parse_status, ParseStatus::Failed);
    }

    #[test]
    fn test_strip_leading_zeros() {
        assert_eq!(strip_leading_zeros("007"), "7");
        assert_eq!(strip_leading_zeros("000"), "0");
        assert_eq!(strip_leading_zeros("10"), "10");
    }
}

//! Field validation and shipment-record extraction
//!
//! Pattern-matches raw OCR substrings against the formats that appear on
//! shipping labels and assigns a per-field confidence. Malformed input is a
//! normal, expected case here: every validator is a total function that
//! returns a corrected string and a confidence in [0, 1], never an error.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static SHIPMENT_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d{7})-?(\d{4})").unwrap());
static PACK_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(20000\d{11})").unwrap());
static DELIVERY_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{1,2})[-\s]?(ene|feb|mar|abr|may|jun|jul|ago|sep|oct|nov|dic)").unwrap()
});

/// Character confusions the engine makes on digit fields.
const OCR_CONFUSIONS: [(char, char); 7] = [
    ('O', '0'),
    ('o', '0'),
    ('I', '1'),
    ('l', '1'),
    ('S', '5'),
    ('B', '8'),
    ('g', '9'),
];

/// Outcome of validating one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldValidation {
    pub is_valid: bool,
    /// Corrected text; on failure this is the cleaned-but-unmatched input.
    pub corrected: String,
    /// Confidence in [0, 1].
    pub confidence: f32,
}

impl FieldValidation {
    fn valid(corrected: impl Into<String>, confidence: f32) -> Self {
        Self {
            is_valid: true,
            corrected: corrected.into(),
            confidence,
        }
    }

    fn invalid(corrected: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            corrected: corrected.into(),
            confidence: 0.2,
        }
    }
}

/// Replace characters the engine commonly confuses with digits.
fn fix_ocr_confusions(text: &str) -> String {
    let mut fixed = text.trim().to_string();
    for (wrong, right) in OCR_CONFUSIONS {
        fixed = fixed.replace(wrong, &right.to_string());
    }
    fixed
}

/// Validate a shipment number (`NNNNNNN-NNNN`).
pub fn validate_shipment_id(text: &str) -> FieldValidation {
    let cleaned = fix_ocr_confusions(text);
    match SHIPMENT_ID.captures(&cleaned) {
        Some(caps) => FieldValidation::valid(format!("{}-{}", &caps[1], &caps[2]), 0.9),
        None => FieldValidation::invalid(cleaned),
    }
}

/// Validate a pack number (16 digits starting with 20000).
pub fn validate_pack_id(text: &str) -> FieldValidation {
    let cleaned = fix_ocr_confusions(text);
    match PACK_ID.captures(&cleaned) {
        Some(caps) => FieldValidation::valid(&caps[1], 0.9),
        None => FieldValidation::invalid(cleaned),
    }
}

/// Validate a four-digit postal code.
pub fn validate_postal_code(text: &str) -> FieldValidation {
    let cleaned = fix_ocr_confusions(text);
    let digits: String = cleaned.chars().filter(char::is_ascii_digit).collect();
    if digits.len() == 4 {
        FieldValidation::valid(digits, 0.9)
    } else {
        FieldValidation::invalid(cleaned)
    }
}

/// Validate a delivery date (day + Spanish month abbreviation).
pub fn validate_delivery_date(text: &str) -> FieldValidation {
    let cleaned = text.trim().to_lowercase();
    match DELIVERY_DATE.captures(&cleaned) {
        Some(caps) => {
            let day = format!("{:0>2}", &caps[1]);
            FieldValidation::valid(format!("{day}-{}", &caps[2]), 0.8)
        }
        None => FieldValidation::invalid(cleaned),
    }
}

/// Validate a shipping type (residential/commercial).
pub fn validate_shipping_type(text: &str) -> FieldValidation {
    let cleaned = text.trim().to_uppercase();
    if cleaned.contains("RESID") {
        FieldValidation::valid("RESIDENCIAL", 0.8)
    } else if cleaned.contains("COMER") {
        FieldValidation::valid("COMERCIAL", 0.8)
    } else {
        FieldValidation::invalid(cleaned)
    }
}

/// Validate a field by its (fuzzy) type name.
///
/// Field names are matched by substring so both region names and the
/// Spanish form names map to the same validator; unmatched names get the
/// confusion-fix-only path at moderate confidence.
pub fn validate_field(text: &str, field_type: &str) -> FieldValidation {
    let kind = field_type.to_lowercase();

    if kind.contains("shipment") || kind.contains("envio") {
        validate_shipment_id(text)
    } else if kind.contains("pack") || kind.contains("paquete") {
        validate_pack_id(text)
    } else if kind.contains("postal") || kind.contains("cp") {
        validate_postal_code(text)
    } else if kind.contains("date") || kind.contains("fecha") {
        validate_delivery_date(text)
    } else if kind.contains("type") || kind.contains("tipo") {
        validate_shipping_type(text)
    } else {
        FieldValidation::valid(fix_ocr_confusions(text), 0.7)
    }
}

// Label schema patterns for whole-record extraction. They tolerate both the
// accented and bare spellings since extraction runs on normalized text.
static RECORD_CLIENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"([^\n]+)\s*#\d+\s*\n").unwrap());
static RECORD_SALE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)Venta:\s*(\d+)").unwrap());
static RECORD_TRACKING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Env[ií]o:\s*([\d-]+)").unwrap());
static RECORD_DELIVERY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Entrega:\s*([\w.-]+)").unwrap());
static RECORD_POSTAL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)CP:\s*(\d+)").unwrap());
static RECORD_LOCALITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)CP:\s*\d+\s*\n([^\n]+)").unwrap());
static RECORD_ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Direcci[oó]n:\s*([^\n]+)").unwrap());
static RECORD_RECIPIENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Destinatario:\s*([^\n]+)").unwrap());

/// Structured fields extracted from a full recognized label.
///
/// Absent fields are empty strings: a label photo routinely loses some
/// lines, and partial records are still useful downstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentRecord {
    pub client: String,
    pub sale_id: String,
    pub tracking: String,
    pub delivery_date: String,
    pub postal_code: String,
    pub locality: String,
    pub address: String,
    pub recipient: String,
}

impl ShipmentRecord {
    /// Extract the label schema from normalized OCR text.
    pub fn from_text(text: &str) -> Self {
        let capture = |re: &Regex| {
            re.captures(text)
                .map(|caps| caps[1].trim().to_string())
                .unwrap_or_default()
        };

        Self {
            client: capture(&RECORD_CLIENT),
            sale_id: capture(&RECORD_SALE),
            tracking: capture(&RECORD_TRACKING),
            delivery_date: capture(&RECORD_DELIVERY),
            postal_code: capture(&RECORD_POSTAL),
            locality: capture(&RECORD_LOCALITY),
            address: capture(&RECORD_ADDRESS),
            recipient: capture(&RECORD_RECIPIENT),
        }
    }
}

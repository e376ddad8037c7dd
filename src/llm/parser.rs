//! Analysis response parsing.
//!
//! Turns raw generated text into a validated `Analysis`. The JSON object may
//! be wrapped in a Markdown fence or surrounded by prose, including prose
//! with stray braces of its own. Every field is required. Scores are clamped to
//! 0–100; everything else that does not match the schema is rejected as a
//! whole with `ReportError::MalformedAnalysis`.

use chrono::NaiveDate;
use serde_json::{Map, Value};

use crate::types::{Analysis, DailyRisk, ReportError, WarningLevel};

type Object = Map<String, Value>;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse and validate raw analysis text.
pub fn parse_analysis(text: &str) -> Result<Analysis, ReportError> {
    let obj = &extract_json_object(text)
        .ok_or_else(|| malformed("no JSON object found in response"))?;

    Ok(Analysis {
        warning_level: level_field(obj, "warningLevel")?,
        risk_score: score_field(obj, "riskScore")?,
        confidence: score_field(obj, "confidence")?,
        summary: str_field(obj, "summary")?.to_string(),
        key_factors: string_list(obj, "keyFactors")?,
        recommendations: string_list(obj, "recommendations")?,
        daily_risks: daily_risks(obj)?,
        peak_risk_days: date_list(obj, "peakRiskDays")?,
    })
}

/// Clamp a raw score into 0–100.
pub fn clamp_score(raw: i64) -> u8 {
    raw.clamp(0, 100) as u8
}

/// The first complete JSON object in the text, trying each `{` in turn.
/// An object carrying `warningLevel` wins over any earlier one.
fn extract_json_object(text: &str) -> Option<Object> {
    let mut first = None;
    for (start, _) in text.match_indices('{') {
        let mut values = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        if let Some(Ok(Value::Object(obj))) = values.next() {
            if obj.contains_key("warningLevel") {
                return Some(obj);
            }
            first.get_or_insert(obj);
        }
    }
    first
}

fn malformed(msg: impl Into<String>) -> ReportError {
    ReportError::MalformedAnalysis(msg.into())
}

fn field<'a>(obj: &'a Object, name: &str) -> Result<&'a Value, ReportError> {
    match obj.get(name) {
        Some(Value::Null) | None => Err(malformed(format!("missing field `{name}`"))),
        Some(v) => Ok(v),
    }
}

fn str_field<'a>(obj: &'a Object, name: &str) -> Result<&'a str, ReportError> {
    field(obj, name)?
        .as_str()
        .ok_or_else(|| malformed(format!("`{name}` must be a string")))
}

fn parse_level(raw: &str, name: &str) -> Result<WarningLevel, ReportError> {
    raw.parse::<WarningLevel>()
        .map_err(|e| malformed(format!("`{name}`: {e}")))
}

fn level_field(obj: &Object, name: &str) -> Result<WarningLevel, ReportError> {
    parse_level(str_field(obj, name)?, name)
}

/// Integer score, also accepting integral floats (`42.0`) and numeric
/// strings (`"42"`). Out-of-range values are clamped, whether they arrive
/// as numbers or strings.
fn score_field(obj: &Object, name: &str) -> Result<u8, ReportError> {
    let value = field(obj, name)?;
    let not_integer = || malformed(format!("`{name}` must be an integer, got {value}"));

    // `as` saturates, so huge integral floats land on i64::MIN/MAX.
    let integral = |f: Option<f64>| -> Result<i64, ReportError> {
        match f {
            Some(f) if f.is_finite() && f.fract() == 0.0 => Ok(f as i64),
            _ => Err(not_integer()),
        }
    };

    let raw = match value {
        Value::Number(n) => match n.as_i64() {
            Some(i) => i,
            None => integral(n.as_f64())?,
        },
        Value::String(s) => {
            let s = s.trim();
            match s.parse::<i64>() {
                Ok(i) => i,
                Err(_) => integral(s.parse::<f64>().ok())?,
            }
        }
        _ => return Err(not_integer()),
    };

    Ok(clamp_score(raw))
}

fn array_field<'a>(obj: &'a Object, name: &str) -> Result<&'a Vec<Value>, ReportError> {
    field(obj, name)?
        .as_array()
        .ok_or_else(|| malformed(format!("`{name}` must be a list")))
}

fn string_list(obj: &Object, name: &str) -> Result<Vec<String>, ReportError> {
    array_field(obj, name)?
        .iter()
        .enumerate()
        .map(|(i, v)| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| malformed(format!("`{name}[{i}]` must be a string")))
        })
        .collect()
}

fn parse_date(raw: &str, ctx: &str) -> Result<NaiveDate, ReportError> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
        .map_err(|_| malformed(format!("`{ctx}` is not a YYYY-MM-DD date: {raw:?}")))
}

fn date_list(obj: &Object, name: &str) -> Result<Vec<NaiveDate>, ReportError> {
    array_field(obj, name)?
        .iter()
        .enumerate()
        .map(|(i, v)| -> Result<NaiveDate, ReportError> {
            let ctx = format!("{name}[{i}]");
            let raw = v
                .as_str()
                .ok_or_else(|| malformed(format!("`{ctx}` must be a string")))?;
            parse_date(raw, &ctx)
        })
        .collect()
}

fn daily_risks(obj: &Object) -> Result<Vec<DailyRisk>, ReportError> {
    array_field(obj, "dailyRisks")?
        .iter()
        .enumerate()
        .map(|(i, v)| -> Result<DailyRisk, ReportError> {
            let ctx = format!("dailyRisks[{i}]");
            let entry = v
                .as_object()
                .ok_or_else(|| malformed(format!("`{ctx}` must be an object")))?;
            Ok(DailyRisk {
                date: parse_date(str_field(entry, "date")?, &ctx)?,
                risk_level: parse_level(str_field(entry, "risk")?, &ctx)?,
                reason: str_field(entry, "reason")?.to_string(),
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

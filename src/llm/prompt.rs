//! Prompt construction.
//!
//! `build_analysis_prompt` is a pure function of the forecast bundle: no
//! clock, no locale. Identical input always yields identical text.

use std::fmt::Write;

use crate::types::{ForecastBundle, ForecastDay};

/// Output-schema instruction appended after the forecast lines.
const SCHEMA_INSTRUCTION: &str = r#"Provide your analysis in the following JSON format (respond with ONLY valid JSON, no markdown or additional text):

{
  "warningLevel": "Low|Moderate|High|Critical",
  "riskScore": 0-100,
  "confidence": 0-100,
  "summary": "Brief 1-2 sentence summary of the flood risk",
  "keyFactors": ["factor1", "factor2", "factor3"],
  "recommendations": ["recommendation1", "recommendation2", "recommendation3"],
  "dailyRisks": [
    {"date": "YYYY-MM-DD", "risk": "Low|Moderate|High|Critical", "reason": "brief reason"},
    ...
  ],
  "peakRiskDays": ["YYYY-MM-DD", "YYYY-MM-DD"]
}"#;

/// Domain considerations the model must weigh.
pub const CONSIDERATIONS: &[&str] = &[
    "Total rainfall accumulation over the week",
    "Consecutive days of heavy rain",
    "Regional flood history",
    "Monsoon patterns",
    "River basin proximity",
    "Soil saturation potential",
];

/// Build the full analysis prompt for a forecast bundle.
pub fn build_analysis_prompt(bundle: &ForecastBundle) -> String {
    let mut prompt = String::with_capacity(2000);

    let _ = writeln!(
        prompt,
        "Analyze the following {}-day weather forecast for {} and provide a flood risk assessment:",
        bundle.days.len(),
        location_label(bundle),
    );
    prompt.push('\n');

    for (i, day) in bundle.days.iter().enumerate() {
        prompt.push_str(&format_day(i + 1, day));
        prompt.push('\n');
    }

    prompt.push('\n');
    prompt.push_str(SCHEMA_INSTRUCTION);
    prompt.push_str("\n\nConsider:\n");
    for item in CONSIDERATIONS {
        let _ = writeln!(prompt, "- {item}");
    }

    prompt
}

/// "Name, Region, Country", skipping empty parts.
fn location_label(bundle: &ForecastBundle) -> String {
    let loc = &bundle.location;
    [loc.name.as_str(), loc.region.as_str(), loc.country.as_str()]
        .iter()
        .filter(|s| !s.trim().is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_day(n: usize, day: &ForecastDay) -> String {
    format!(
        "Day {n} ({}): {}, Rainfall: {:.1}mm, Temp: {:.1}°C - {:.1}°C, Rain Chance: {:.1}%, Humidity: {:.1}%",
        day.date,
        day.condition,
        day.total_rainfall,
        day.min_temp,
        day.max_temp,
        day.rain_chance,
        day.avg_humidity,
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

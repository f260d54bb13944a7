//! Prompts sent to LLM providers and the strict parser for their replies.

use crate::catalog::Catalog;
use crate::error::ProviderFailure;
use crate::model::{
    AnalysisMode, ChartType, Dimension, DimensionTerm, Filter, FilterOperator, Granularity,
    Metric, MetricTerm, ParameterCandidate, TimeRange,
};
use crate::time::ResolvedTime;
use chrono::NaiveDate;
use itertools::Itertools;
use serde::Deserialize;

/// Longest cost report excerpt embedded in an explanation prompt.
const MAX_REPORT_CHARS: usize = 6000;

pub fn system_prompt(catalog: &Catalog) -> String {
    let services = catalog
        .services
        .iter()
        .map(|e| {
            if e.aliases.is_empty() {
                format!("- \"{}\"", e.canonical)
            } else {
                let aliases = e.aliases.iter().map(|a| format!("\"{}\"", a)).join(", ");
                format!("- \"{}\" (not {})", e.canonical, aliases)
            }
        })
        .join("\n");
    let purchase_types = catalog
        .purchase_types
        .iter()
        .map(|e| format!("- \"{}\"", e.canonical))
        .join("\n");

    format!(
        r#"You translate questions about AWS spending into Cost Explorer query parameters.
Always use the exact service names as they appear on the bill, never abbreviations:
{services}

Purchase types must be one of:
{purchase_types}

Respond with a single JSON object and no other text."#
    )
}

/// Builds the parameter-extraction prompt for one question.
pub fn parameter_prompt(question: &str, today: NaiveDate, hints: &ResolvedTime) -> String {
    let metrics = Metric::ALL.iter().map(|m| m.api_name()).join(", ");
    let dimensions = Dimension::FIXED.iter().map(|d| d.api_key()).join(", ");
    let resolved = hints
        .ranges
        .iter()
        .map(|r| {
            format!(
                "{{\"start_date\": \"{}\", \"end_date\": \"{}\", \"granularity\": \"{}\"}}",
                r.start,
                r.end,
                granularity_name(r.granularity)
            )
        })
        .join(", ");
    let hint_note = if hints.explicit {
        format!("The question's dates resolve to: [{}]", resolved)
    } else {
        format!("The question names no dates; the default window is [{}]", resolved)
    };

    format!(
        r#"Today is {today}.
Question: "{question}"
{hint_note}

Return JSON with exactly these keys:
{{
  "query_type": "usage" | "forecast" | "comparison",
  "metric": one of [{metrics}],
  "time_ranges": [{{"start_date": "YYYY-MM-DD", "end_date": "YYYY-MM-DD", "granularity": "DAILY" | "MONTHLY"}}],
  "filters": [{{"dimension": one of [{dimensions}] or "TAG", "key": "tag key, only for TAG", "values": ["..."], "match": "EQUALS"}}],
  "group_by": [dimension names, or "TAG:key"],
  "comparison": true | false,
  "chart_type": "sparkline" | "timeline" | "bar" | "pie_and_table" | null
}}

Rules:
- end_date is exclusive.
- Comparisons need exactly two time_ranges, each a whole number of calendar months starting on the first of a month.
- Use exact service names in SERVICE filters."#
    )
}

pub fn explanation_prompt(question: &str, report_json: &str) -> String {
    let excerpt: String = report_json.chars().take(MAX_REPORT_CHARS).collect();
    format!(
        r#"Question: "{question}"

Cost data:
{excerpt}

Explain these results in two or three sentences for the person who asked. Mention totals, the largest contributors and any notable change. Plain text only."#
    )
}

pub const EXPLANATION_SYSTEM_PROMPT: &str =
    "You are an AWS cost analyst. Give clear, concise explanations of cost data.";

fn granularity_name(granularity: Granularity) -> &'static str {
    match granularity {
        Granularity::Daily => "DAILY",
        Granularity::Monthly => "MONTHLY",
    }
}

#[derive(Debug, Deserialize)]
struct RawParameters {
    #[serde(default)]
    query_type: Option<String>,
    #[serde(default)]
    metric: Option<String>,
    #[serde(default)]
    time_ranges: Option<Vec<RawTimeRange>>,
    #[serde(default)]
    time_range: Option<RawTimeRange>,
    #[serde(default)]
    filters: Vec<RawFilter>,
    #[serde(default)]
    group_by: Vec<String>,
    #[serde(default)]
    comparison: bool,
    #[serde(default)]
    chart_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTimeRange {
    start_date: String,
    end_date: String,
    granularity: String,
}

#[derive(Debug, Deserialize)]
struct RawFilter {
    dimension: String,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    values: Vec<String>,
    #[serde(default, rename = "match")]
    operator: Option<String>,
}

/// Strips markdown fences and any prose around the outermost JSON object.
pub fn extract_json(text: &str) -> Option<&str> {
    let cleaned = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let start = cleaned.find('{')?;
    let end = cleaned.rfind('}')?;
    (start < end).then(|| &cleaned[start..=end])
}

fn invalid(message: impl Into<String>) -> ProviderFailure {
    ProviderFailure::SchemaInvalid(message.into())
}

/// Parses a provider reply into a candidate, rejecting anything off-schema.
///
/// No repair happens here: unknown enum values, missing keys and malformed
/// dates all fail the attempt.
pub fn parse_parameters(response: &str) -> Result<ParameterCandidate, ProviderFailure> {
    let json = extract_json(response).ok_or_else(|| invalid("no JSON object in response"))?;
    let raw: RawParameters =
        serde_json::from_str(json).map_err(|e| invalid(format!("malformed JSON: {}", e)))?;

    let metric_text = raw.metric.ok_or_else(|| invalid("missing metric"))?;
    let metric = MetricTerm::parse(&metric_text)
        .ok_or_else(|| invalid(format!("unknown metric '{}'", metric_text)))?;

    let raw_ranges = match (raw.time_ranges, raw.time_range) {
        (Some(ranges), _) if !ranges.is_empty() => ranges,
        (_, Some(single)) => vec![single],
        _ => return Err(invalid("missing time range")),
    };
    let mut time_ranges = raw_ranges
        .iter()
        .map(parse_range)
        .collect::<Result<Vec<_>, _>>()?;

    let mut mode = match raw.query_type.as_deref() {
        Some(text) => text.parse::<AnalysisMode>().map_err(invalid)?,
        None => AnalysisMode::Usage,
    };

    let comparison = raw.comparison || mode == AnalysisMode::Comparison;
    if comparison {
        if time_ranges.len() != 2 {
            return Err(invalid(format!(
                "comparison needs two time ranges, got {}",
                time_ranges.len()
            )));
        }
        if let Some(partial) = time_ranges.iter().find(|r| !r.is_month_aligned()) {
            return Err(invalid(format!("comparison range {} is not whole months", partial)));
        }
        time_ranges.sort_by_key(|r| r.start);
        mode = AnalysisMode::Comparison;
    }

    let filters = raw
        .filters
        .iter()
        .map(parse_filter)
        .collect::<Result<Vec<_>, _>>()?;

    let group_by = raw
        .group_by
        .iter()
        .map(|g| DimensionTerm::parse(g).ok_or_else(|| invalid(format!("unknown group-by '{}'", g))))
        .collect::<Result<Vec<_>, _>>()?;

    let chart_hint = match raw.chart_type.as_deref().map(str::trim) {
        None | Some("") | Some("null") => None,
        Some(text) => Some(text.parse::<ChartType>().map_err(invalid)?),
    };

    Ok(ParameterCandidate {
        mode,
        time_ranges,
        metric,
        filters,
        group_by,
        comparison,
        chart_hint,
    })
}

fn parse_range(raw: &RawTimeRange) -> Result<TimeRange, ProviderFailure> {
    let date = |s: &str| {
        NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map_err(|_| invalid(format!("invalid date '{}'", s)))
    };
    let start = date(&raw.start_date)?;
    let end = date(&raw.end_date)?;
    let granularity = raw.granularity.parse::<Granularity>().map_err(invalid)?;
    TimeRange::new(start, end, granularity)
        .ok_or_else(|| invalid(format!("start {} is after end {}", start, end)))
}

fn parse_filter(raw: &RawFilter) -> Result<Filter<DimensionTerm>, ProviderFailure> {
    let dimension = match raw.key.as_deref() {
        Some(key) if raw.dimension.eq_ignore_ascii_case("tag") && !key.trim().is_empty() => {
            DimensionTerm::parse(&format!("TAG:{}", key.trim()))
        }
        _ => DimensionTerm::parse(&raw.dimension),
    }
    .ok_or_else(|| invalid(format!("unknown dimension '{}'", raw.dimension)))?;

    let operator = match raw.operator.as_deref() {
        Some(text) => text.parse::<FilterOperator>().map_err(invalid)?,
        None => FilterOperator::Equals,
    };
    if raw.values.is_empty() && operator != FilterOperator::Absent {
        return Err(invalid(format!("filter on '{}' has no values", raw.dimension)));
    }

    Ok(Filter {
        dimension,
        operator,
        values: raw.values.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"```json
{
  "query_type": "usage",
  "metric": "UnblendedCost",
  "time_ranges": [{"start_date": "2024-07-01", "end_date": "2024-10-01", "granularity": "MONTHLY"}],
  "filters": [{"dimension": "SERVICE", "values": ["EC2"], "match": "EQUALS"}],
  "group_by": ["SERVICE"],
  "comparison": false,
  "chart_type": null
}
```"#;

    #[test]
    fn test_parse_fenced_response() {
        let candidate = parse_parameters(VALID).unwrap();
        assert_eq!(candidate.metric.metric(), Metric::UnblendedCost);
        assert_eq!(candidate.time_ranges.len(), 1);
        assert_eq!(candidate.filters[0].values, vec!["EC2"]);
        assert_eq!(candidate.chart_hint, None);
    }

    #[test]
    fn test_prose_around_json_is_ignored() {
        let response = "Here you go: {\"metric\": \"blended\", \"time_range\": {\"start_date\": \"2024-01-01\", \"end_date\": \"2024-02-01\", \"granularity\": \"daily\"}} hope that helps";
        let candidate = parse_parameters(response).unwrap();
        assert_eq!(candidate.metric.metric(), Metric::BlendedCost);
        assert_eq!(candidate.time_ranges[0].granularity, Granularity::Daily);
    }

    #[test]
    fn test_missing_metric_is_schema_invalid() {
        let response = r#"{"time_ranges": [{"start_date": "2024-01-01", "end_date": "2024-02-01", "granularity": "MONTHLY"}]}"#;
        assert!(matches!(parse_parameters(response), Err(ProviderFailure::SchemaInvalid(_))));
    }

    #[test]
    fn test_invalid_enum_is_schema_invalid() {
        let bad_metric = VALID.replace("UnblendedCost", "Dollars");
        assert!(matches!(parse_parameters(&bad_metric), Err(ProviderFailure::SchemaInvalid(_))));

        let bad_chart = VALID.replace("\"chart_type\": null", "\"chart_type\": \"radar\"");
        assert!(matches!(parse_parameters(&bad_chart), Err(ProviderFailure::SchemaInvalid(_))));

        let bad_dimension = VALID.replace("\"dimension\": \"SERVICE\"", "\"dimension\": \"COLOR\"");
        assert!(matches!(parse_parameters(&bad_dimension), Err(ProviderFailure::SchemaInvalid(_))));
    }

    #[test]
    fn test_partial_month_comparison_is_schema_invalid() {
        let response = r#"{"metric": "NetAmortizedCost", "comparison": true, "time_ranges": [
            {"start_date": "2024-09-01", "end_date": "2024-10-01", "granularity": "MONTHLY"},
            {"start_date": "2024-10-01", "end_date": "2024-10-15", "granularity": "DAILY"}]}"#;
        assert!(matches!(parse_parameters(response), Err(ProviderFailure::SchemaInvalid(_))));
    }

    #[test]
    fn test_comparison_ranges_are_sorted() {
        let response = r#"{"metric": "NetAmortizedCost", "query_type": "comparison", "time_ranges": [
            {"start_date": "2024-08-01", "end_date": "2024-09-01", "granularity": "MONTHLY"},
            {"start_date": "2024-07-01", "end_date": "2024-08-01", "granularity": "MONTHLY"}]}"#;
        let candidate = parse_parameters(response).unwrap();
        assert!(candidate.comparison);
        assert_eq!(candidate.time_ranges[0].start, NaiveDate::from_ymd_opt(2024, 7, 1).unwrap());
    }

    #[test]
    fn test_tag_filter_uses_key() {
        let response = r#"{"metric": "NetAmortizedCost",
            "time_ranges": [{"start_date": "2024-07-01", "end_date": "2024-08-01", "granularity": "MONTHLY"}],
            "filters": [{"dimension": "TAG", "key": "team", "values": ["platform"]}]}"#;
        let candidate = parse_parameters(response).unwrap();
        assert_eq!(candidate.filters[0].dimension.dimension(), Some(Dimension::Tag("team".into())));
    }

    #[test]
    fn test_non_ascii_dimension_is_schema_invalid() {
        let filter = VALID.replace("\"dimension\": \"SERVICE\"", "\"dimension\": \"Zoné\"");
        assert!(matches!(parse_parameters(&filter), Err(ProviderFailure::SchemaInvalid(_))));

        let group_by = VALID.replace("\"group_by\": [\"SERVICE\"]", "\"group_by\": [\"Régión\"]");
        assert!(matches!(parse_parameters(&group_by), Err(ProviderFailure::SchemaInvalid(_))));
    }

    #[test]
    fn test_non_ascii_values_pass_through() {
        let response = VALID.replace("[\"EC2\"]", "[\"Überservice ☁\"]");
        let candidate = parse_parameters(&response).unwrap();
        assert_eq!(candidate.filters[0].values, vec!["Überservice ☁"]);
    }

    #[test]
    fn test_prompt_embeds_today_and_hints() {
        let today = NaiveDate::from_ymd_opt(2024, 10, 1).unwrap();
        let hints = ResolvedTime {
            ranges: vec![TimeRange::new(
                NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(),
                today,
                Granularity::Monthly,
            )
            .unwrap()],
            comparison: false,
            mode: AnalysisMode::Usage,
            explicit: true,
        };
        let prompt = parameter_prompt("EC2 costs last quarter", today, &hints);
        assert!(prompt.contains("Today is 2024-10-01"));
        assert!(prompt.contains("\"start_date\": \"2024-07-01\""));
        assert!(prompt.contains("NetAmortizedCost"));
    }
}

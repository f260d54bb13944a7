//! Core request and parameter types shared by every pipeline stage.

use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A single user question.
///
/// The id is unique per `Query` value so two textually identical questions
/// asked back to back never share a cached answer downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub id: String,
    pub text: String,
    pub preferred_provider: Option<String>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            text: text.into(),
            preferred_provider: None,
        }
    }

    pub fn with_preferred_provider(mut self, provider: impl Into<String>) -> Self {
        self.preferred_provider = Some(provider.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    Meta,
    AccountInfo,
    CostAnalysis,
}

/// Sub-mode of a cost-analysis question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    #[default]
    #[serde(alias = "cost_analysis")]
    Usage,
    Forecast,
    Comparison,
}

impl FromStr for AnalysisMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "usage" | "cost_analysis" | "cost" => Ok(AnalysisMode::Usage),
            "forecast" => Ok(AnalysisMode::Forecast),
            "comparison" | "compare" => Ok(AnalysisMode::Comparison),
            other => Err(format!("unknown query type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Granularity {
    Daily,
    Monthly,
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "DAILY" => Ok(Granularity::Daily),
            "MONTHLY" => Ok(Granularity::Monthly),
            other => Err(format!("unknown granularity '{}'", other)),
        }
    }
}

/// Half-open date window `[start, end)` as the cost API expects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    #[serde(rename = "start_date")]
    pub start: NaiveDate,
    #[serde(rename = "end_date")]
    pub end: NaiveDate,
    pub granularity: Granularity,
}

impl TimeRange {
    /// Builds a range, returning `None` when `start > end`.
    pub fn new(start: NaiveDate, end: NaiveDate, granularity: Granularity) -> Option<Self> {
        (start <= end).then_some(Self {
            start,
            end,
            granularity,
        })
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// Both endpoints sit on the first day of a month.
    pub fn is_month_aligned(&self) -> bool {
        self.start.day() == 1 && self.end.day() == 1 && self.end > self.start
    }

    /// The complete calendar month containing `date`.
    pub fn month_of(date: NaiveDate) -> Self {
        let start = first_of_month(date);
        Self {
            start,
            end: add_months(start, 1),
            granularity: Granularity::Monthly,
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Shifts by whole months, clamping the day to the target month's length.
pub fn add_months(date: NaiveDate, months: i32) -> NaiveDate {
    let shifted = if months >= 0 {
        date.checked_add_months(Months::new(months as u32))
    } else {
        date.checked_sub_months(Months::new(months.unsigned_abs()))
    };
    shifted.unwrap_or(date)
}

/// Cost metrics accepted by the cost-data API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Metric {
    #[default]
    NetAmortizedCost,
    AmortizedCost,
    BlendedCost,
    UnblendedCost,
    NetUnblendedCost,
    UsageQuantity,
}

impl Metric {
    pub const ALL: [Metric; 6] = [
        Metric::NetAmortizedCost,
        Metric::AmortizedCost,
        Metric::BlendedCost,
        Metric::UnblendedCost,
        Metric::NetUnblendedCost,
        Metric::UsageQuantity,
    ];

    pub fn api_name(&self) -> &'static str {
        match self {
            Metric::NetAmortizedCost => "NetAmortizedCost",
            Metric::AmortizedCost => "AmortizedCost",
            Metric::BlendedCost => "BlendedCost",
            Metric::UnblendedCost => "UnblendedCost",
            Metric::NetUnblendedCost => "NetUnblendedCost",
            Metric::UsageQuantity => "UsageQuantity",
        }
    }

    /// Spelling used by the forecast endpoint.
    pub fn forecast_name(&self) -> &'static str {
        match self {
            Metric::NetAmortizedCost => "NET_AMORTIZED_COST",
            Metric::AmortizedCost => "AMORTIZED_COST",
            Metric::BlendedCost => "BLENDED_COST",
            Metric::UnblendedCost => "UNBLENDED_COST",
            Metric::NetUnblendedCost => "NET_UNBLENDED_COST",
            Metric::UsageQuantity => "USAGE_QUANTITY",
        }
    }

    /// Exact canonical spelling (API or forecast form) only.
    pub fn from_canonical(s: &str) -> Option<Metric> {
        Metric::ALL
            .into_iter()
            .find(|m| m.api_name() == s || m.forecast_name() == s)
    }

    /// Canonical spelling or a known synonym ("unblended", "net amortized costs").
    pub fn from_term(s: &str) -> Option<Metric> {
        if let Some(metric) = Metric::from_canonical(s) {
            return Some(metric);
        }
        let squashed: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        let stem = squashed
            .strip_suffix("costs")
            .or_else(|| squashed.strip_suffix("cost"))
            .unwrap_or(&squashed);
        match stem {
            "netamortized" => Some(Metric::NetAmortizedCost),
            "amortized" => Some(Metric::AmortizedCost),
            "blended" => Some(Metric::BlendedCost),
            "unblended" => Some(Metric::UnblendedCost),
            "netunblended" => Some(Metric::NetUnblendedCost),
            "usagequantity" | "usage" => Some(Metric::UsageQuantity),
            _ => None,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_name())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metric::from_term(s).ok_or_else(|| format!("unknown metric '{}'", s))
    }
}

impl Serialize for Metric {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.api_name())
    }
}

impl<'de> Deserialize<'de> for Metric {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Metric::from_canonical(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown metric '{}'", s)))
    }
}

/// A metric as worded by a provider: guaranteed to name some metric, but
/// possibly through a synonym that still needs normalizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct MetricTerm(String);

impl MetricTerm {
    pub fn parse(s: &str) -> Option<Self> {
        Metric::from_term(s).map(|_| MetricTerm(s.trim().to_string()))
    }

    pub fn metric(&self) -> Metric {
        Metric::from_term(&self.0).unwrap_or_default()
    }

    pub fn is_canonical(&self) -> bool {
        Metric::from_canonical(&self.0).is_some()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<Metric> for MetricTerm {
    fn from(metric: Metric) -> Self {
        MetricTerm(metric.api_name().to_string())
    }
}

/// Cost dimensions that can be filtered or grouped on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Dimension {
    Service,
    Region,
    PurchaseType,
    LinkedAccount,
    UsageType,
    InstanceType,
    /// Cost-allocation tag, keyed by tag name.
    Tag(String),
}

impl Dimension {
    pub const FIXED: [Dimension; 6] = [
        Dimension::Service,
        Dimension::Region,
        Dimension::PurchaseType,
        Dimension::LinkedAccount,
        Dimension::UsageType,
        Dimension::InstanceType,
    ];

    pub fn api_key(&self) -> &str {
        match self {
            Dimension::Service => "SERVICE",
            Dimension::Region => "REGION",
            Dimension::PurchaseType => "PURCHASE_TYPE",
            Dimension::LinkedAccount => "LINKED_ACCOUNT",
            Dimension::UsageType => "USAGE_TYPE",
            Dimension::InstanceType => "INSTANCE_TYPE",
            Dimension::Tag(key) => key,
        }
    }

    pub fn is_tag(&self) -> bool {
        matches!(self, Dimension::Tag(_))
    }

    /// Exact canonical spelling: `SERVICE`, `PURCHASE_TYPE`, `TAG:env`.
    pub fn from_canonical(s: &str) -> Option<Dimension> {
        if let Some(key) = s.strip_prefix("TAG:") {
            return (!key.is_empty()).then(|| Dimension::Tag(key.to_string()));
        }
        Dimension::FIXED.into_iter().find(|d| d.api_key() == s)
    }

    /// Canonical spelling or a common shorthand ("services", "account", "tag:env").
    pub fn from_term(s: &str) -> Option<Dimension> {
        let trimmed = s.trim();
        if let Some(dimension) = Dimension::from_canonical(trimmed) {
            return Some(dimension);
        }
        if trimmed.get(..4).is_some_and(|prefix| prefix.eq_ignore_ascii_case("tag:")) {
            let key = trimmed.get(4..).map(str::trim).unwrap_or_default();
            return (!key.is_empty()).then(|| Dimension::Tag(key.to_string()));
        }
        let squashed: String = trimmed
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        match squashed.as_str() {
            "service" | "services" | "awsservice" => Some(Dimension::Service),
            "region" | "regions" | "location" => Some(Dimension::Region),
            "purchasetype" | "purchaseoption" | "pricingmodel" => Some(Dimension::PurchaseType),
            "linkedaccount" | "account" | "accounts" | "awsaccount" => {
                Some(Dimension::LinkedAccount)
            }
            "usagetype" => Some(Dimension::UsageType),
            "instancetype" | "instancetypes" => Some(Dimension::InstanceType),
            _ => None,
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Tag(key) => write!(f, "TAG:{}", key),
            other => f.write_str(other.api_key()),
        }
    }
}

impl Serialize for Dimension {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Dimension {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Dimension::from_canonical(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown dimension '{}'", s)))
    }
}

/// A dimension as worded by a provider, not yet normalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DimensionTerm(String);

impl DimensionTerm {
    pub fn parse(s: &str) -> Option<Self> {
        Dimension::from_term(s).map(|_| DimensionTerm(s.trim().to_string()))
    }

    pub fn dimension(&self) -> Option<Dimension> {
        Dimension::from_term(&self.0)
    }

    pub fn is_canonical(&self) -> bool {
        Dimension::from_canonical(&self.0).is_some()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<Dimension> for DimensionTerm {
    fn from(dimension: Dimension) -> Self {
        DimensionTerm(dimension.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterOperator {
    #[default]
    Equals,
    Absent,
    StartsWith,
    Contains,
}

impl FromStr for FilterOperator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().replace([' ', '-'], "_").as_str() {
            "EQUALS" | "EQ" | "=" => Ok(FilterOperator::Equals),
            "ABSENT" => Ok(FilterOperator::Absent),
            "STARTS_WITH" => Ok(FilterOperator::StartsWith),
            "CONTAINS" => Ok(FilterOperator::Contains),
            other => Err(format!("unknown filter operator '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Filter<D = Dimension> {
    pub dimension: D,
    pub operator: FilterOperator,
    pub values: Vec<String>,
}

impl<D> Filter<D> {
    pub fn equals(dimension: D, values: Vec<String>) -> Self {
        Self {
            dimension,
            operator: FilterOperator::Equals,
            values,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartType {
    Sparkline,
    Timeline,
    Bar,
    #[default]
    PieAndTable,
}

impl FromStr for ChartType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
            "sparkline" => Ok(ChartType::Sparkline),
            "timeline" | "line" | "time_series" => Ok(ChartType::Timeline),
            "bar" | "bar_chart" => Ok(ChartType::Bar),
            "pie_and_table" | "pie" | "table" | "default" => Ok(ChartType::PieAndTable),
            other => Err(format!("unknown chart type '{}'", other)),
        }
    }
}

/// Parameters as a provider proposed them: schema-valid, but terminology
/// not yet normalized.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterCandidate {
    pub mode: AnalysisMode,
    pub time_ranges: Vec<TimeRange>,
    pub metric: MetricTerm,
    pub filters: Vec<Filter<DimensionTerm>>,
    pub group_by: Vec<DimensionTerm>,
    pub comparison: bool,
    pub chart_hint: Option<ChartType>,
}

/// Fully canonical parameters ready for the cost-data client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedParameters {
    pub mode: AnalysisMode,
    pub time_ranges: Vec<TimeRange>,
    pub metric: Metric,
    pub filters: Vec<Filter>,
    pub group_by: Vec<Dimension>,
    pub comparison: bool,
    pub chart_type: ChartType,
}

impl ParsedParameters {
    /// The single range for usage/forecast queries, the baseline for comparisons.
    pub fn primary_range(&self) -> Option<&TimeRange> {
        self.time_ranges.first()
    }

    /// `(baseline, comparison)` when the comparison flag is set.
    pub fn comparison_ranges(&self) -> Option<(&TimeRange, &TimeRange)> {
        match (self.comparison, self.time_ranges.as_slice()) {
            (true, [baseline, compared]) => Some((baseline, compared)),
            _ => None,
        }
    }

    /// Values filtered on for one dimension.
    pub fn filter_values(&self, dimension: &Dimension) -> Vec<&str> {
        self.filters
            .iter()
            .filter(|f| &f.dimension == dimension)
            .flat_map(|f| f.values.iter().map(String::as_str))
            .collect()
    }
}

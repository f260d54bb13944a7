//! The downstream cost-data collaborator and the request shape it receives.

use crate::error::Result;
use crate::model::{AnalysisMode, Dimension, Filter, FilterOperator, Granularity, Metric, ParsedParameters, TimeRange};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

/// Cost Explorer accepts at most this many group-by keys.
pub const MAX_GROUP_BY: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    /// Group-by values in the same order as the request's group-by keys.
    #[serde(default)]
    pub keys: Vec<String>,
    pub amount: f64,
    pub unit: String,
    #[serde(default)]
    pub estimated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostReport {
    pub metric: Metric,
    pub records: Vec<CostRecord>,
}

impl CostReport {
    pub fn empty(metric: Metric) -> Self {
        Self {
            metric,
            records: Vec::new(),
        }
    }

    pub fn total(&self) -> f64 {
        self.records.iter().map(|r| r.amount).sum()
    }
}

#[async_trait]
pub trait CostDataClient: Send + Sync {
    async fn fetch(&self, parameters: &ParsedParameters) -> Result<CostReport>;
}

/// Answers every request with an empty report; used when only the
/// interpreted parameters are wanted.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunCostClient;

#[async_trait]
impl CostDataClient for DryRunCostClient {
    async fn fetch(&self, parameters: &ParsedParameters) -> Result<CostReport> {
        Ok(CostReport::empty(parameters.metric))
    }
}

fn granularity_name(granularity: Granularity) -> &'static str {
    match granularity {
        Granularity::Daily => "DAILY",
        Granularity::Monthly => "MONTHLY",
    }
}

fn match_option(operator: FilterOperator) -> &'static str {
    match operator {
        FilterOperator::Equals => "EQUALS",
        FilterOperator::Absent => "ABSENT",
        FilterOperator::StartsWith => "STARTS_WITH",
        FilterOperator::Contains => "CONTAINS",
    }
}

fn filter_expression(filter: &Filter) -> Value {
    let body = json!({
        "Key": filter.dimension.api_key(),
        "Values": filter.values,
        "MatchOptions": [match_option(filter.operator)],
    });
    match filter.dimension {
        Dimension::Tag(_) => json!({ "Tags": body }),
        _ => json!({ "Dimensions": body }),
    }
}

fn group_definition(dimension: &Dimension) -> Value {
    match dimension {
        Dimension::Tag(key) => json!({"Type": "TAG", "Key": key}),
        other => json!({"Type": "DIMENSION", "Key": other.api_key()}),
    }
}

fn period(range: &TimeRange) -> Value {
    json!({"Start": range.start.to_string(), "End": range.end.to_string()})
}

/// Cost Explorer request bodies for the parameters: one per time range, in
/// the forecast shape for forecast questions.
pub fn cost_explorer_requests(parameters: &ParsedParameters) -> Vec<Value> {
    let filter = match parameters.filters.as_slice() {
        [] => None,
        [single] => Some(filter_expression(single)),
        many => Some(json!({ "And": many.iter().map(filter_expression).collect::<Vec<_>>() })),
    };

    if parameters.group_by.len() > MAX_GROUP_BY {
        warn!(
            "Cost Explorer groups by at most {} keys, dropping {}",
            MAX_GROUP_BY,
            parameters.group_by.len() - MAX_GROUP_BY
        );
    }
    let group_by: Vec<Value> = parameters
        .group_by
        .iter()
        .take(MAX_GROUP_BY)
        .map(group_definition)
        .collect();

    parameters
        .time_ranges
        .iter()
        .map(|range| {
            let mut request = if parameters.mode == AnalysisMode::Forecast {
                json!({
                    "TimePeriod": period(range),
                    "Granularity": granularity_name(range.granularity),
                    "Metric": parameters.metric.forecast_name(),
                })
            } else {
                json!({
                    "TimePeriod": period(range),
                    "Granularity": granularity_name(range.granularity),
                    "Metrics": [parameters.metric.api_name()],
                    "GroupBy": group_by,
                })
            };
            if let (Some(filter), Some(object)) = (&filter, request.as_object_mut()) {
                object.insert("Filter".to_string(), filter.clone());
            }
            request
        })
        .collect()
}

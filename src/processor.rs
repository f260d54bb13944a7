//! The question-to-parameters pipeline: classify, resolve dates, extract,
//! correct, pick a chart, then fetch and explain.

use crate::catalog::Catalog;
use crate::chart::ChartTypeSelector;
use crate::config::PipelineConfig;
use crate::cost_data::{CostDataClient, CostReport, DryRunCostClient};
use crate::error::{QueryError, Result};
use crate::meta::{MetaAnswer, MetaQueryDetector, MetaResponder};
use crate::model::{
    ChartType, Dimension, DimensionTerm, Intent, MetricTerm, ParameterCandidate, ParsedParameters,
    Query,
};
use crate::provider::{ProviderChain, ProviderRequest};
use crate::time::{DateRangeResolver, ResolvedTime};
use crate::validation::ParameterValidator;
use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Parameters for a cost question, before any data is fetched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostInterpretation {
    pub parameters: ParsedParameters,
    /// Strategy whose output was used; `None` when every strategy failed and
    /// defaults were applied.
    pub provider: Option<String>,
    #[serde(skip)]
    pub provider_index: Option<usize>,
    pub corrected: bool,
    pub corrections: Vec<String>,
    pub failed_attempts: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Interpretation {
    Meta { intent: Intent, answer: MetaAnswer },
    Cost(CostInterpretation),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostAnswer {
    pub parameters: ParsedParameters,
    pub chart_type: ChartType,
    pub provider: Option<String>,
    pub corrected: bool,
    pub report: CostReport,
    /// Best-effort narrative; absent when no provider could explain.
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Answer {
    Meta(MetaAnswer),
    Cost(CostAnswer),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    pub query_id: String,
    pub intent: Intent,
    pub answer: Answer,
}

pub struct QueryProcessor {
    config: PipelineConfig,
    detector: MetaQueryDetector,
    responder: MetaResponder,
    resolver: DateRangeResolver,
    chain: ProviderChain,
    validator: ParameterValidator,
    selector: ChartTypeSelector,
    cost_client: Arc<dyn CostDataClient>,
}

impl QueryProcessor {
    /// Builds the pipeline from configuration, with the dry-run cost client.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let catalog = match &config.catalog_path {
            Some(path) => Catalog::load(path)?,
            None => Catalog::builtin(),
        };
        let catalog = Arc::new(catalog);
        let chain = ProviderChain::from_config(&config, catalog.clone());
        Ok(Self::with_parts(config, catalog, chain, Arc::new(DryRunCostClient)))
    }

    pub fn with_parts(
        config: PipelineConfig,
        catalog: Arc<Catalog>,
        chain: ProviderChain,
        cost_client: Arc<dyn CostDataClient>,
    ) -> Self {
        Self {
            detector: MetaQueryDetector::new(),
            responder: MetaResponder::new(config.account.clone()),
            resolver: DateRangeResolver::new(),
            validator: ParameterValidator::new(catalog),
            selector: ChartTypeSelector::new(config.default_chart),
            chain,
            cost_client,
            config,
        }
    }

    pub fn with_cost_client(mut self, cost_client: Arc<dyn CostDataClient>) -> Self {
        self.cost_client = cost_client;
        self
    }

    pub fn chain(&self) -> &ProviderChain {
        &self.chain
    }

    /// Turns a question into parameters without calling the cost-data client.
    ///
    /// Fails only with `IncompleteMonth`.
    pub async fn interpret(&self, query: &Query, today: NaiveDate) -> Result<Interpretation> {
        // Step 1: classify; meta questions never reach a provider
        let intent = self.detector.classify(&query.text);
        info!("[{}] Intent {:?} for '{}'", query.id, intent, query.text);
        if intent != Intent::CostAnalysis {
            return Ok(Interpretation::Meta {
                intent,
                answer: self.responder.respond(&query.text, intent),
            });
        }

        // Step 2: resolve dates
        let hints = self.resolver.resolve(&query.text, today)?;
        debug!("[{}] Time hints: {:?}", query.id, hints);

        // Step 3: provider chain
        let request = ProviderRequest {
            question: &query.text,
            today,
            hints: &hints,
        };
        let outcome = self
            .chain
            .run(&request, query.preferred_provider.as_deref())
            .await;
        let failed_attempts = outcome.failures().count();

        let (candidate, provider) = match outcome.success() {
            Some(result) => match &result.parameters {
                Some(parameters) => (parameters.clone(), Some(result.provider.clone())),
                None => (self.default_candidate(&hints), None),
            },
            None => {
                warn!(
                    "[{}] All {} provider(s) failed, using defaults",
                    query.id, failed_attempts
                );
                (self.default_candidate(&hints), None)
            }
        };
        let candidate = reconcile_ranges(candidate, &hints);
        let chart_hint = candidate.chart_hint;

        // Step 4: correct terminology
        let correction = self.validator.correct(candidate);
        let mut parameters = correction.parameters;

        // Step 5: chart type
        parameters.chart_type = self.selector.select(&query.text, parameters.mode, chart_hint);
        info!(
            "[{}] {} over {} range(s), chart {:?}, via {}",
            query.id,
            parameters.metric,
            parameters.time_ranges.len(),
            parameters.chart_type,
            provider.as_deref().unwrap_or("defaults")
        );

        Ok(Interpretation::Cost(CostInterpretation {
            parameters,
            provider,
            provider_index: outcome.provider_index,
            corrected: correction.corrected,
            corrections: correction.notes,
            failed_attempts,
        }))
    }

    /// Full pipeline: interpretation, cost data, then a best-effort explanation.
    ///
    /// Fails only with `IncompleteMonth` or `CostData`.
    pub async fn process(&self, query: &Query, today: NaiveDate) -> Result<QueryResponse> {
        let interpretation = match self.interpret(query, today).await? {
            Interpretation::Meta { intent, answer } => {
                return Ok(QueryResponse {
                    query_id: query.id.clone(),
                    intent,
                    answer: Answer::Meta(answer),
                })
            }
            Interpretation::Cost(cost) => cost,
        };

        // Step 6: fetch and explain
        let report = self
            .cost_client
            .fetch(&interpretation.parameters)
            .await
            .map_err(|e| match e {
                QueryError::CostData(_) => e,
                other => QueryError::CostData(other.to_string()),
            })?;

        let explanation = match interpretation.provider_index.and_then(|i| self.chain.provider(i)) {
            Some(provider) => match provider.explain(&query.text, &report).await {
                Ok(text) => Some(text),
                Err(e) => {
                    warn!("[{}] No explanation: {}", query.id, e);
                    None
                }
            },
            None => None,
        };

        Ok(QueryResponse {
            query_id: query.id.clone(),
            intent: Intent::CostAnalysis,
            answer: Answer::Cost(CostAnswer {
                chart_type: interpretation.parameters.chart_type,
                parameters: interpretation.parameters,
                provider: interpretation.provider,
                corrected: interpretation.corrected,
                report,
                explanation,
            }),
        })
    }

    /// Used only when no strategy produced parameters at all.
    fn default_candidate(&self, hints: &ResolvedTime) -> ParameterCandidate {
        ParameterCandidate {
            mode: hints.mode,
            time_ranges: hints.ranges.clone(),
            metric: MetricTerm::from(self.config.default_metric),
            filters: Vec::new(),
            group_by: vec![DimensionTerm::from(Dimension::Service)],
            comparison: hints.comparison,
            chart_hint: None,
        }
    }
}

/// Dates the resolver found in the text, or a comparison it enforced, take
/// precedence over the provider's ranges.
fn reconcile_ranges(mut candidate: ParameterCandidate, hints: &ResolvedTime) -> ParameterCandidate {
    if hints.explicit || hints.comparison {
        if candidate.time_ranges != hints.ranges {
            debug!(
                "Replacing provider ranges {:?} with resolved ranges {:?}",
                candidate.time_ranges, hints.ranges
            );
        }
        candidate.time_ranges = hints.ranges.clone();
        candidate.comparison = hints.comparison;
        candidate.mode = hints.mode;
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AnalysisMode, Granularity, Metric, TimeRange};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn candidate(ranges: Vec<TimeRange>, comparison: bool) -> ParameterCandidate {
        ParameterCandidate {
            mode: if comparison { AnalysisMode::Comparison } else { AnalysisMode::Usage },
            time_ranges: ranges,
            metric: MetricTerm::from(Metric::BlendedCost),
            filters: Vec::new(),
            group_by: Vec::new(),
            comparison,
            chart_hint: None,
        }
    }

    #[test]
    fn test_explicit_hints_override_provider_ranges() {
        let resolved = TimeRange::new(date(2024, 7, 1), date(2024, 10, 1), Granularity::Monthly).unwrap();
        let hints = ResolvedTime {
            ranges: vec![resolved],
            comparison: false,
            mode: AnalysisMode::Usage,
            explicit: true,
        };
        let proposed = TimeRange::new(date(2024, 6, 1), date(2024, 9, 1), Granularity::Daily).unwrap();
        let reconciled = reconcile_ranges(candidate(vec![proposed], false), &hints);
        assert_eq!(reconciled.time_ranges, vec![resolved]);
    }

    #[test]
    fn test_default_window_yields_to_provider() {
        let hints = ResolvedTime {
            ranges: vec![TimeRange::new(date(2024, 9, 15), date(2024, 10, 15), Granularity::Daily).unwrap()],
            comparison: false,
            mode: AnalysisMode::Usage,
            explicit: false,
        };
        let july = TimeRange::month_of(date(2024, 7, 1));
        let august = TimeRange::month_of(date(2024, 8, 1));
        let reconciled = reconcile_ranges(candidate(vec![july, august], true), &hints);
        assert!(reconciled.comparison);
        assert_eq!(reconciled.time_ranges, vec![july, august]);
    }

    #[tokio::test]
    async fn test_empty_chain_falls_back_to_defaults() {
        let config = PipelineConfig::default();
        let processor = QueryProcessor::with_parts(
            config,
            Arc::new(Catalog::builtin()),
            ProviderChain::new(Vec::new()),
            Arc::new(DryRunCostClient),
        );
        let interpretation = processor
            .interpret(&Query::new("how much did we spend"), date(2024, 10, 15))
            .await
            .unwrap();
        match interpretation {
            Interpretation::Cost(cost) => {
                assert_eq!(cost.provider, None);
                assert_eq!(cost.parameters.metric, Metric::NetAmortizedCost);
                assert_eq!(cost.parameters.group_by, vec![Dimension::Service]);
                assert_eq!(cost.parameters.time_ranges[0].end, date(2024, 10, 15));
            }
            other => panic!("expected cost interpretation, got {:?}", other),
        }
    }
}

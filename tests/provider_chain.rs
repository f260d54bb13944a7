use async_trait::async_trait;
use chrono::NaiveDate;
use cost_query::catalog::Catalog;
use cost_query::config::{ApiKeySettings, PipelineConfig};
use cost_query::cost_data::{CostReport, DryRunCostClient};
use cost_query::keyword::KeywordProvider;
use cost_query::model::{
    AnalysisMode, Dimension, DimensionTerm, Filter, Intent, Metric, MetricTerm, ParameterCandidate,
    Query,
};
use cost_query::processor::{Answer, Interpretation, QueryProcessor};
use cost_query::provider::{ParameterProvider, ProviderChain, ProviderRequest, ProviderResult};
use cost_query::ProviderFailure;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// A provider that records every call and either fails or proposes a fixed
/// candidate built from the resolved hints.
struct Scripted {
    name: &'static str,
    failure: Option<ProviderFailure>,
    calls: Arc<AtomicUsize>,
    explanation: Option<&'static str>,
}

impl Scripted {
    fn failing(name: &'static str, failure: ProviderFailure) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = Self {
            name,
            failure: Some(failure),
            calls: calls.clone(),
            explanation: None,
        };
        (provider, calls)
    }

    fn succeeding(name: &'static str, explanation: Option<&'static str>) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = Self {
            name,
            failure: None,
            calls: calls.clone(),
            explanation,
        };
        (provider, calls)
    }
}

#[async_trait]
impl ParameterProvider for Scripted {
    fn name(&self) -> &str {
        self.name
    }

    async fn attempt(&self, request: &ProviderRequest<'_>) -> ProviderResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = &self.failure {
            return ProviderResult::failed(self.name, None, failure.clone());
        }
        let candidate = ParameterCandidate {
            mode: request.hints.mode,
            time_ranges: request.hints.ranges.clone(),
            metric: MetricTerm::parse("amortized").unwrap(),
            filters: vec![Filter::equals(
                DimensionTerm::parse("service").unwrap(),
                vec!["Lambda".to_string()],
            )],
            group_by: vec![DimensionTerm::parse("services").unwrap()],
            comparison: request.hints.comparison,
            chart_hint: None,
        };
        ProviderResult::succeeded(self.name, Some("{}".to_string()), candidate)
    }

    async fn explain(&self, question: &str, _report: &CostReport) -> cost_query::Result<String> {
        match self.explanation {
            Some(text) => Ok(text.to_string()),
            None => Err(cost_query::QueryError::ExplanationFailed(question.to_string())),
        }
    }
}

fn keyword() -> Box<dyn ParameterProvider> {
    Box::new(KeywordProvider::new(Arc::new(Catalog::builtin()), Metric::NetAmortizedCost))
}

fn processor(providers: Vec<Box<dyn ParameterProvider>>) -> QueryProcessor {
    QueryProcessor::with_parts(
        PipelineConfig::default(),
        Arc::new(Catalog::builtin()),
        ProviderChain::new(providers),
        Arc::new(DryRunCostClient),
    )
}

#[tokio::test]
async fn test_failures_fall_through_to_keyword_strategy() {
    let (down, down_calls) = Scripted::failing("primary", ProviderFailure::Unavailable("no route".into()));
    let (slow, slow_calls) = Scripted::failing("secondary", ProviderFailure::Timeout(Duration::from_secs(20)));
    let (garbled, garbled_calls) =
        Scripted::failing("tertiary", ProviderFailure::SchemaInvalid("missing metric".into()));
    let processor = processor(vec![Box::new(down), Box::new(slow), Box::new(garbled), keyword()]);

    let interpretation = processor
        .interpret(&Query::new("EC2 costs last quarter"), date(2024, 10, 1))
        .await
        .unwrap();
    match interpretation {
        Interpretation::Cost(cost) => {
            assert_eq!(cost.provider.as_deref(), Some("keyword"));
            assert_eq!(cost.failed_attempts, 3);
        }
        other => panic!("expected cost interpretation, got {:?}", other),
    }
    assert_eq!(down_calls.load(Ordering::SeqCst), 1);
    assert_eq!(slow_calls.load(Ordering::SeqCst), 1);
    assert_eq!(garbled_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_first_success_stops_the_chain() {
    let (primary, primary_calls) = Scripted::succeeding("primary", None);
    let (secondary, secondary_calls) = Scripted::succeeding("secondary", None);
    let processor = processor(vec![Box::new(primary), Box::new(secondary), keyword()]);

    let interpretation = processor
        .interpret(&Query::new("What did Lambda cost in September 2024?"), date(2024, 10, 15))
        .await
        .unwrap();
    let Interpretation::Cost(cost) = interpretation else {
        panic!("expected cost interpretation");
    };
    assert_eq!(cost.provider.as_deref(), Some("primary"));
    assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
    assert_eq!(secondary_calls.load(Ordering::SeqCst), 0);

    // Provider shorthand is corrected the same way as keyword output.
    assert_eq!(cost.parameters.metric, Metric::AmortizedCost);
    assert_eq!(cost.parameters.filter_values(&Dimension::Service), vec!["AWS Lambda"]);
    assert_eq!(cost.parameters.group_by, vec![Dimension::Service]);
    assert!(cost.corrected);
}

#[tokio::test]
async fn test_preferred_provider_is_tried_first() {
    let (primary, primary_calls) = Scripted::succeeding("primary", None);
    let processor = processor(vec![Box::new(primary), keyword()]);

    let query = Query::new("S3 costs this month").with_preferred_provider("keyword");
    let interpretation = processor.interpret(&query, date(2024, 10, 15)).await.unwrap();
    let Interpretation::Cost(cost) = interpretation else {
        panic!("expected cost interpretation");
    };
    assert_eq!(cost.provider.as_deref(), Some("keyword"));
    assert_eq!(primary_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_meta_question_never_reaches_a_provider() {
    let (primary, primary_calls) = Scripted::succeeding("primary", None);
    let processor = processor(vec![Box::new(primary), keyword()]);

    let response = processor
        .process(&Query::new("What can you do?"), date(2024, 10, 15))
        .await
        .unwrap();
    assert_eq!(response.intent, Intent::Meta);
    assert_eq!(primary_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_explanation_comes_from_the_succeeding_provider() {
    let (down, _) = Scripted::failing("primary", ProviderFailure::Unavailable("down".into()));
    let (secondary, _) = Scripted::succeeding("secondary", Some("Lambda spend was flat."));
    let processor = processor(vec![Box::new(down), Box::new(secondary), keyword()]);

    let response = processor
        .process(&Query::new("Lambda costs last month"), date(2024, 10, 15))
        .await
        .unwrap();
    let Answer::Cost(cost) = response.answer else {
        panic!("expected cost answer");
    };
    assert_eq!(cost.provider.as_deref(), Some("secondary"));
    assert_eq!(cost.explanation.as_deref(), Some("Lambda spend was flat."));
}

#[tokio::test]
async fn test_explanation_failure_keeps_the_result() {
    let (primary, _) = Scripted::succeeding("primary", None);
    let processor = processor(vec![Box::new(primary), keyword()]);

    let response = processor
        .process(&Query::new("Lambda costs last month"), date(2024, 10, 15))
        .await
        .unwrap();
    let Answer::Cost(cost) = response.answer else {
        panic!("expected cost answer");
    };
    assert_eq!(cost.explanation, None);
    assert_eq!(cost.parameters.mode, AnalysisMode::Usage);
}

#[tokio::test]
async fn test_unreachable_llm_falls_back_to_keyword() {
    let mut config = PipelineConfig::default();
    config.openai = Some(ApiKeySettings {
        api_key: "test-key".to_string(),
        model: "test-model".to_string(),
        base_url: Some("http://127.0.0.1:9".to_string()),
    });
    config.provider_timeout = Duration::from_secs(2);
    let processor = QueryProcessor::new(config).unwrap();
    assert_eq!(processor.chain().names(), vec!["openai", "keyword"]);

    let interpretation = processor
        .interpret(&Query::new("EC2 costs last quarter"), date(2024, 10, 1))
        .await
        .unwrap();
    let Interpretation::Cost(cost) = interpretation else {
        panic!("expected cost interpretation");
    };
    assert_eq!(cost.provider.as_deref(), Some("keyword"));
    assert_eq!(cost.failed_attempts, 1);
}

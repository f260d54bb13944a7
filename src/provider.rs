//! Parameter-extraction strategies and the ordered chain that tries them.

use crate::catalog::Catalog;
use crate::config::PipelineConfig;
use crate::cost_data::CostReport;
use crate::error::{ProviderFailure, QueryError, Result};
use crate::keyword::KeywordProvider;
use crate::llm::{AnthropicClient, BedrockClient, CompletionClient, OpenAiClient};
use crate::model::ParameterCandidate;
use crate::prompt;
use crate::time::ResolvedTime;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const PARAMETER_MAX_TOKENS: u32 = 1000;
const EXPLANATION_MAX_TOKENS: u32 = 600;

/// What every strategy receives for one attempt.
#[derive(Debug, Clone, Copy)]
pub struct ProviderRequest<'a> {
    pub question: &'a str,
    pub today: NaiveDate,
    pub hints: &'a ResolvedTime,
}

/// Outcome of a single attempt. Lives only as long as the request.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResult {
    pub provider: String,
    pub success: bool,
    pub raw_output: Option<String>,
    pub parameters: Option<ParameterCandidate>,
    pub failure: Option<ProviderFailure>,
}

impl ProviderResult {
    pub fn succeeded(provider: &str, raw_output: Option<String>, parameters: ParameterCandidate) -> Self {
        Self {
            provider: provider.to_string(),
            success: true,
            raw_output,
            parameters: Some(parameters),
            failure: None,
        }
    }

    pub fn failed(provider: &str, raw_output: Option<String>, failure: ProviderFailure) -> Self {
        Self {
            provider: provider.to_string(),
            success: false,
            raw_output,
            parameters: None,
            failure: Some(failure),
        }
    }
}

#[async_trait]
pub trait ParameterProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn attempt(&self, request: &ProviderRequest<'_>) -> ProviderResult;

    /// Narrative for a finished cost report. Strategies without a language
    /// model cannot explain.
    async fn explain(&self, question: &str, _report: &CostReport) -> Result<String> {
        Err(QueryError::ExplanationFailed(format!(
            "{} cannot explain '{}'",
            self.name(),
            question
        )))
    }
}

/// A strategy backed by any completion client, bounded by a timeout.
pub struct LlmProvider {
    client: Box<dyn CompletionClient>,
    catalog: Arc<Catalog>,
    timeout: Duration,
}

impl LlmProvider {
    pub fn new(client: Box<dyn CompletionClient>, catalog: Arc<Catalog>, timeout: Duration) -> Self {
        Self {
            client,
            catalog,
            timeout,
        }
    }
}

#[async_trait]
impl ParameterProvider for LlmProvider {
    fn name(&self) -> &str {
        self.client.name()
    }

    async fn attempt(&self, request: &ProviderRequest<'_>) -> ProviderResult {
        let system = prompt::system_prompt(&self.catalog);
        let user = prompt::parameter_prompt(request.question, request.today, request.hints);

        let completion = tokio::time::timeout(
            self.timeout,
            self.client.complete(&system, &user, PARAMETER_MAX_TOKENS),
        )
        .await;

        let text = match completion {
            Err(_) => return ProviderResult::failed(self.name(), None, ProviderFailure::Timeout(self.timeout)),
            Ok(Err(e)) => return ProviderResult::failed(self.name(), None, e.into()),
            Ok(Ok(text)) => text,
        };

        match prompt::parse_parameters(&text) {
            Ok(candidate) => ProviderResult::succeeded(self.name(), Some(text), candidate),
            Err(failure) => ProviderResult::failed(self.name(), Some(text), failure),
        }
    }

    async fn explain(&self, question: &str, report: &CostReport) -> Result<String> {
        let report_json = serde_json::to_string(report)?;
        let user = prompt::explanation_prompt(question, &report_json);
        let completion = tokio::time::timeout(
            self.timeout,
            self.client
                .complete(prompt::EXPLANATION_SYSTEM_PROMPT, &user, EXPLANATION_MAX_TOKENS),
        )
        .await;

        match completion {
            Err(_) => Err(QueryError::ExplanationFailed(format!(
                "{} timed out after {:?}",
                self.name(),
                self.timeout
            ))),
            Ok(Err(e)) => Err(QueryError::ExplanationFailed(e.to_string())),
            Ok(Ok(text)) => Ok(text.trim().to_string()),
        }
    }
}

/// Every attempt made for one question, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainOutcome {
    pub attempts: Vec<ProviderResult>,
    /// Position in the chain of the strategy that succeeded.
    pub provider_index: Option<usize>,
}

impl ChainOutcome {
    pub fn success(&self) -> Option<&ProviderResult> {
        self.attempts.iter().find(|a| a.success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ProviderResult> {
        self.attempts.iter().filter(|a| !a.success)
    }
}

/// Ordered fallback across strategies; stops at the first success.
pub struct ProviderChain {
    providers: Vec<Box<dyn ParameterProvider>>,
}

impl ProviderChain {
    pub fn new(providers: Vec<Box<dyn ParameterProvider>>) -> Self {
        Self { providers }
    }

    /// Bedrock, then Anthropic, then OpenAI (each only when configured),
    /// then the keyword strategy.
    pub fn from_config(config: &PipelineConfig, catalog: Arc<Catalog>) -> Self {
        let mut providers: Vec<Box<dyn ParameterProvider>> = Vec::new();
        let timeout = config.provider_timeout;

        if let Some(bedrock) = &config.bedrock {
            providers.push(Box::new(LlmProvider::new(
                Box::new(BedrockClient::new(bedrock)),
                catalog.clone(),
                timeout,
            )));
        }
        if let Some(anthropic) = &config.anthropic {
            providers.push(Box::new(LlmProvider::new(
                Box::new(AnthropicClient::new(anthropic)),
                catalog.clone(),
                timeout,
            )));
        }
        if let Some(openai) = &config.openai {
            providers.push(Box::new(LlmProvider::new(
                Box::new(OpenAiClient::new(openai)),
                catalog.clone(),
                timeout,
            )));
        }
        providers.push(Box::new(KeywordProvider::new(catalog, config.default_metric)));

        let chain = Self::new(providers);
        info!("Provider chain: {}", chain.names().join(" -> "));
        chain
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn provider(&self, index: usize) -> Option<&dyn ParameterProvider> {
        self.providers.get(index).map(|p| p.as_ref())
    }

    /// Trial order, with a configured preferred provider moved to the front.
    fn order(&self, preferred: Option<&str>) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.providers.len()).collect();
        if let Some(wanted) = preferred {
            match self.providers.iter().position(|p| p.name().eq_ignore_ascii_case(wanted)) {
                Some(index) => {
                    order.retain(|i| *i != index);
                    order.insert(0, index);
                }
                None => warn!("Preferred provider '{}' is not configured", wanted),
            }
        }
        order
    }

    pub async fn run(&self, request: &ProviderRequest<'_>, preferred: Option<&str>) -> ChainOutcome {
        let mut attempts = Vec::new();
        for index in self.order(preferred) {
            let provider = &self.providers[index];
            let result = provider.attempt(request).await;
            if result.success {
                info!("Provider {} produced parameters", result.provider);
                attempts.push(result);
                return ChainOutcome {
                    attempts,
                    provider_index: Some(index),
                };
            }
            if let Some(failure) = &result.failure {
                warn!("Provider {} failed: {}", result.provider, failure);
            }
            attempts.push(result);
        }
        ChainOutcome {
            attempts,
            provider_index: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AnalysisMode, Granularity, Metric, MetricTerm, TimeRange};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        name: &'static str,
        reply: std::result::Result<&'static str, QueryError>,
        delay: Option<Duration>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CompletionClient for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        async fn complete(&self, _system: &str, _prompt: &str, _max_tokens: u32) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match &self.reply {
                Ok(text) => Ok(text.to_string()),
                Err(e) => Err(QueryError::Llm(e.to_string())),
            }
        }
    }

    fn scripted(
        name: &'static str,
        reply: std::result::Result<&'static str, QueryError>,
        delay: Option<Duration>,
    ) -> (Box<dyn ParameterProvider>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let client = Scripted {
            name,
            reply,
            delay,
            calls: calls.clone(),
        };
        let provider = LlmProvider::new(
            Box::new(client),
            Arc::new(Catalog::builtin()),
            Duration::from_millis(200),
        );
        (Box::new(provider), calls)
    }

    const GOOD: &str = r#"{"metric": "UnblendedCost", "time_ranges": [{"start_date": "2024-09-01", "end_date": "2024-10-01", "granularity": "MONTHLY"}]}"#;

    fn hints() -> ResolvedTime {
        ResolvedTime {
            ranges: vec![TimeRange::new(
                NaiveDate::from_ymd_opt(2024, 9, 15).unwrap(),
                NaiveDate::from_ymd_opt(2024, 10, 15).unwrap(),
                Granularity::Daily,
            )
            .unwrap()],
            comparison: false,
            mode: AnalysisMode::Usage,
            explicit: false,
        }
    }

    #[tokio::test]
    async fn test_chain_stops_at_first_success() {
        let (first, first_calls) = scripted("first", Ok(GOOD), None);
        let (second, second_calls) = scripted("second", Ok(GOOD), None);
        let chain = ProviderChain::new(vec![first, second]);
        let hints = hints();
        let request = ProviderRequest {
            question: "EC2 costs",
            today: NaiveDate::from_ymd_opt(2024, 10, 15).unwrap(),
            hints: &hints,
        };

        let outcome = chain.run(&request, None).await;
        assert_eq!(outcome.provider_index, Some(0));
        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
        let candidate = outcome.success().unwrap().parameters.as_ref().unwrap();
        assert_eq!(candidate.metric, MetricTerm::from(Metric::UnblendedCost));
    }

    #[tokio::test]
    async fn test_failures_advance_the_chain() {
        let (down, _) = scripted("down", Err(QueryError::Llm("connection refused".into())), None);
        let (slow, _) = scripted("slow", Ok(GOOD), Some(Duration::from_secs(5)));
        let (garbled, _) = scripted("garbled", Ok("I'm not sure what you mean"), None);
        let (good, _) = scripted("good", Ok(GOOD), None);
        let chain = ProviderChain::new(vec![down, slow, garbled, good]);
        let hints = hints();
        let request = ProviderRequest {
            question: "EC2 costs",
            today: NaiveDate::from_ymd_opt(2024, 10, 15).unwrap(),
            hints: &hints,
        };

        let outcome = chain.run(&request, None).await;
        assert_eq!(outcome.provider_index, Some(3));
        let failures: Vec<_> = outcome.failures().map(|f| f.failure.clone().unwrap()).collect();
        assert!(matches!(failures[0], ProviderFailure::Unavailable(_)));
        assert!(matches!(failures[1], ProviderFailure::Timeout(_)));
        assert!(matches!(failures[2], ProviderFailure::SchemaInvalid(_)));
        assert_eq!(outcome.success().unwrap().provider, "good");
    }

    #[tokio::test]
    async fn test_preferred_provider_goes_first() {
        let (first, first_calls) = scripted("first", Ok(GOOD), None);
        let (second, second_calls) = scripted("second", Ok(GOOD), None);
        let chain = ProviderChain::new(vec![first, second]);
        let hints = hints();
        let request = ProviderRequest {
            question: "EC2 costs",
            today: NaiveDate::from_ymd_opt(2024, 10, 15).unwrap(),
            hints: &hints,
        };

        let outcome = chain.run(&request, Some("second")).await;
        assert_eq!(outcome.provider_index, Some(1));
        assert_eq!(first_calls.load(Ordering::SeqCst), 0);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_failing_chain_reports_every_attempt() {
        let (down, _) = scripted("down", Err(QueryError::Llm("500".into())), None);
        let chain = ProviderChain::new(vec![down]);
        let hints = hints();
        let request = ProviderRequest {
            question: "EC2 costs",
            today: NaiveDate::from_ymd_opt(2024, 10, 15).unwrap(),
            hints: &hints,
        };

        let outcome = chain.run(&request, None).await;
        assert!(outcome.success().is_none());
        assert_eq!(outcome.provider_index, None);
        assert_eq!(outcome.attempts.len(), 1);
    }

    #[test]
    fn test_default_chain_ends_with_keyword_strategy() {
        let chain = ProviderChain::from_config(&PipelineConfig::default(), Arc::new(Catalog::builtin()));
        assert_eq!(chain.names(), vec!["keyword"]);
    }

    #[tokio::test]
    async fn test_llm_explanation_failure_is_explanation_error() {
        let (down, _) = scripted("down", Err(QueryError::Llm("500".into())), None);
        let err = down
            .explain("EC2 costs", &CostReport::empty(Metric::NetAmortizedCost))
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::ExplanationFailed(_)));
    }
}

//! Intent classification and the static answers for non-cost questions.

use crate::config::AccountContext;
use crate::error::QueryError;
use crate::model::Intent;
use serde::Serialize;
use tracing::{debug, info};

/// Always answered statically, even when cost words appear.
const CAPABILITY_PHRASES: &[&str] = &[
    "what can you do",
    "capabilities",
    "help me get started",
    "what tools",
    "list tools",
    "available tools",
    "tools available",
];

const HELP_PHRASES: &[&str] = &["help", "how does this work", "how do i use", "what is this"];

const ACCOUNT_PHRASES: &[&str] = &[
    "which account",
    "what account",
    "aws account",
    "account information",
    "account info",
    "account id",
    "account number",
];

const REGION_PHRASES: &[&str] = &["what region", "which region", "where is this data", "where is this"];

const COST_WORDS: &[&str] = &[
    "cost", "costs", "spend", "spending", "spent", "charges", "bill", "billing", "expense",
    "expenses", "forecast", "predict", "budget", "usage", "service", "services", "price",
];

/// Maximum word count for a question to be considered too short to classify.
const AMBIGUOUS_WORD_LIMIT: usize = 3;

/// Whole-word phrase match: "help" is found in "help me", not in "helpful".
fn contains_phrase(text: &str, phrase: &str) -> bool {
    text.match_indices(phrase).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + phrase.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

fn contains_any(text: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|p| contains_phrase(text, p))
}

fn has_cost_word(text: &str) -> bool {
    text.split(|c: char| !c.is_alphanumeric())
        .any(|word| COST_WORDS.contains(&word))
}

/// Classifies a question before any other stage runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetaQueryDetector;

impl MetaQueryDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, text: &str) -> Intent {
        let lowered = text.to_lowercase();
        let lowered = lowered.trim();

        if contains_any(lowered, CAPABILITY_PHRASES) {
            return Intent::Meta;
        }

        let costish = has_cost_word(lowered);
        if !costish {
            if contains_any(lowered, ACCOUNT_PHRASES) || contains_any(lowered, REGION_PHRASES) {
                return Intent::AccountInfo;
            }
            if contains_any(lowered, HELP_PHRASES) {
                return Intent::Meta;
            }
            let words = lowered.split_whitespace().count();
            if words <= AMBIGUOUS_WORD_LIMIT {
                let ambiguity = QueryError::ClassificationAmbiguous(format!(
                    "'{}' has no cost or meta keywords, treating as cost analysis",
                    text
                ));
                info!("{}", ambiguity);
            }
        }

        debug!("Classified '{}' as cost analysis", text);
        Intent::CostAnalysis
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInfo {
    pub name: &'static str,
    pub description: &'static str,
}

/// Static answer for a META or ACCOUNT_INFO question.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetaAnswer {
    Capabilities {
        message: String,
        features: Vec<&'static str>,
        example_queries: Vec<&'static str>,
    },
    Tools {
        message: String,
        tools: Vec<ToolInfo>,
    },
    AccountInfo {
        message: String,
        account_id: Option<String>,
        region: String,
    },
    RegionInfo {
        message: String,
        region: String,
    },
    General {
        message: String,
    },
}

const FEATURES: &[&str] = &[
    "Cost analysis grouped by service, region, account or tag",
    "Sparklines, timelines, bar charts and pie charts with tables",
    "Cost forecasting for upcoming periods",
    "Month-to-month cost comparisons",
    "Daily, monthly or custom date ranges",
];

const EXAMPLE_QUERIES: &[&str] = &[
    "Show me my AWS costs for the last 3 months",
    "Give me a sparkline of monthly charges this year",
    "Compare October vs November costs",
    "What will my costs be next month?",
    "Create a timeline of daily costs for the last 30 days",
];

fn tools() -> Vec<ToolInfo> {
    vec![
        ToolInfo {
            name: "get_cost_and_usage",
            description: "Cost and usage data with grouping and filtering",
        },
        ToolInfo {
            name: "get_cost_forecast",
            description: "Cost forecasts for a future period",
        },
        ToolInfo {
            name: "get_cost_and_usage_comparisons",
            description: "Costs of two complete months side by side",
        },
        ToolInfo {
            name: "get_cost_comparison_drivers",
            description: "Analyze what drove cost changes",
        },
        ToolInfo {
            name: "get_dimension_values",
            description: "Known values for services, regions and accounts",
        },
        ToolInfo {
            name: "get_tag_values",
            description: "Known values for cost allocation tags",
        },
    ]
}

/// Answers meta questions from configuration alone, without any provider call.
#[derive(Debug, Clone)]
pub struct MetaResponder {
    account: AccountContext,
}

impl MetaResponder {
    pub fn new(account: AccountContext) -> Self {
        Self { account }
    }

    pub fn respond(&self, text: &str, intent: Intent) -> MetaAnswer {
        let lowered = text.to_lowercase();
        match intent {
            Intent::AccountInfo if contains_any(&lowered, REGION_PHRASES) => MetaAnswer::RegionInfo {
                message: format!("Cost data is retrieved from AWS region {}", self.account.region),
                region: self.account.region.clone(),
            },
            Intent::AccountInfo => {
                let message = match &self.account.account_id {
                    Some(id) => format!("Connected to AWS account {}", id),
                    None => "No AWS account id is configured; set AWS_ACCOUNT_ID to report it".to_string(),
                };
                MetaAnswer::AccountInfo {
                    message,
                    account_id: self.account.account_id.clone(),
                    region: self.account.region.clone(),
                }
            }
            _ if lowered.contains("tools") => MetaAnswer::Tools {
                message: "Available cost data operations".to_string(),
                tools: tools(),
            },
            _ if contains_any(&lowered, CAPABILITY_PHRASES) || contains_any(&lowered, HELP_PHRASES) => {
                MetaAnswer::Capabilities {
                    message: "Ask questions about your AWS costs in plain English".to_string(),
                    features: FEATURES.to_vec(),
                    example_queries: EXAMPLE_QUERIES.to_vec(),
                }
            }
            _ => MetaAnswer::General {
                message: "Ask me about your AWS costs, account information, or what I can do".to_string(),
            },
        }
    }
}

//! Pipeline configuration resolved from the environment.
//!
//! Every setting has a default so an empty environment still yields a
//! working (keyword-only) pipeline.

use crate::error::{QueryError, Result};
use crate::model::{ChartType, Metric};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_BEDROCK_MODEL: &str = "anthropic.claude-3-5-sonnet-20240620-v1:0";
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-sonnet-20240620";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_REGION: &str = "us-east-1";

#[derive(Debug, Clone, PartialEq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BedrockSettings {
    pub region: String,
    pub model_id: String,
    pub credentials: AwsCredentials,
    /// Overrides `https://bedrock-runtime.{region}.amazonaws.com`.
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiKeySettings {
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
}

/// What the meta responder may say about the environment.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AccountContext {
    pub account_id: Option<String>,
    pub region: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub bedrock: Option<BedrockSettings>,
    pub anthropic: Option<ApiKeySettings>,
    pub openai: Option<ApiKeySettings>,
    pub default_metric: Metric,
    pub default_chart: ChartType,
    pub provider_timeout: Duration,
    pub catalog_path: Option<PathBuf>,
    pub account: AccountContext,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bedrock: None,
            anthropic: None,
            openai: None,
            default_metric: Metric::default(),
            default_chart: ChartType::default(),
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
            catalog_path: None,
            account: AccountContext {
                account_id: None,
                region: DEFAULT_REGION.to_string(),
            },
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup, so tests can supply a map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let region = get("AWS_REGION")
            .or_else(|| get("AWS_DEFAULT_REGION"))
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        let bedrock_disabled = get("COST_QUERY_DISABLE_BEDROCK")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        let bedrock = match (get("AWS_ACCESS_KEY_ID"), get("AWS_SECRET_ACCESS_KEY")) {
            (Some(access_key_id), Some(secret_access_key)) if !bedrock_disabled => {
                Some(BedrockSettings {
                    region: region.clone(),
                    model_id: get("BEDROCK_MODEL_ID")
                        .unwrap_or_else(|| DEFAULT_BEDROCK_MODEL.to_string()),
                    credentials: AwsCredentials {
                        access_key_id,
                        secret_access_key,
                        session_token: get("AWS_SESSION_TOKEN"),
                    },
                    endpoint: get("BEDROCK_ENDPOINT"),
                })
            }
            _ => None,
        };

        let anthropic = get("ANTHROPIC_API_KEY").map(|api_key| ApiKeySettings {
            api_key,
            model: get("ANTHROPIC_MODEL").unwrap_or_else(|| DEFAULT_ANTHROPIC_MODEL.to_string()),
            base_url: get("ANTHROPIC_BASE_URL"),
        });

        let openai = get("OPENAI_API_KEY").map(|api_key| ApiKeySettings {
            api_key,
            model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            base_url: get("OPENAI_BASE_URL"),
        });

        let default_metric = match get("COST_QUERY_DEFAULT_METRIC") {
            Some(raw) => raw.parse::<Metric>().map_err(QueryError::Config)?,
            None => Metric::default(),
        };

        let default_chart = match get("COST_QUERY_DEFAULT_CHART") {
            Some(raw) => raw.parse::<ChartType>().map_err(QueryError::Config)?,
            None => ChartType::default(),
        };

        let provider_timeout = match get("COST_QUERY_PROVIDER_TIMEOUT_SECS") {
            Some(raw) => parse_timeout(&raw)?,
            None => DEFAULT_PROVIDER_TIMEOUT,
        };

        Ok(Self {
            bedrock,
            anthropic,
            openai,
            default_metric,
            default_chart,
            provider_timeout,
            catalog_path: get("COST_QUERY_CATALOG").map(PathBuf::from),
            account: AccountContext {
                account_id: get("AWS_ACCOUNT_ID"),
                region,
            },
        })
    }
}

pub fn parse_timeout(raw: &str) -> Result<Duration> {
    let secs: u64 = raw
        .trim()
        .parse()
        .map_err(|_| QueryError::Config(format!("invalid provider timeout '{}'", raw)))?;
    if secs == 0 {
        return Err(QueryError::Config("provider timeout must be positive".to_string()));
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<PipelineConfig> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PipelineConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_empty_environment_uses_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert!(config.bedrock.is_none());
    }

    #[test]
    fn test_bedrock_needs_both_keys() {
        let config = config_from(&[("AWS_ACCESS_KEY_ID", "AKIA")]).unwrap();
        assert!(config.bedrock.is_none());

        let config = config_from(&[
            ("AWS_ACCESS_KEY_ID", "AKIA"),
            ("AWS_SECRET_ACCESS_KEY", "secret"),
            ("AWS_DEFAULT_REGION", "eu-west-1"),
        ])
        .unwrap();
        let bedrock = config.bedrock.unwrap();
        assert_eq!(bedrock.region, "eu-west-1");
        assert_eq!(bedrock.model_id, DEFAULT_BEDROCK_MODEL);
    }

    #[test]
    fn test_bedrock_can_be_disabled() {
        let config = config_from(&[
            ("AWS_ACCESS_KEY_ID", "AKIA"),
            ("AWS_SECRET_ACCESS_KEY", "secret"),
            ("COST_QUERY_DISABLE_BEDROCK", "true"),
        ])
        .unwrap();
        assert!(config.bedrock.is_none());
    }

    #[test]
    fn test_default_overrides() {
        let config = config_from(&[
            ("COST_QUERY_DEFAULT_METRIC", "unblended"),
            ("COST_QUERY_DEFAULT_CHART", "bar"),
            ("COST_QUERY_PROVIDER_TIMEOUT_SECS", "5"),
        ])
        .unwrap();
        assert_eq!(config.default_metric, Metric::UnblendedCost);
        assert_eq!(config.default_chart, ChartType::Bar);
        assert_eq!(config.provider_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        assert!(matches!(
            config_from(&[("COST_QUERY_DEFAULT_METRIC", "dollars")]),
            Err(QueryError::Config(_))
        ));
        assert!(matches!(
            config_from(&[("COST_QUERY_PROVIDER_TIMEOUT_SECS", "0")]),
            Err(QueryError::Config(_))
        ));
    }
}

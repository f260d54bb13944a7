pub mod aws_sigv4;
pub mod catalog;
pub mod chart;
pub mod config;
pub mod cost_data;
pub mod error;
pub mod keyword;
pub mod llm;
pub mod meta;
pub mod model;
pub mod processor;
pub mod prompt;
pub mod provider;
pub mod time;
pub mod validation;

pub use config::PipelineConfig;
pub use error::{ProviderFailure, QueryError, Result};
pub use model::{ChartType, Intent, ParsedParameters, Query};
pub use processor::{Answer, Interpretation, QueryProcessor, QueryResponse};

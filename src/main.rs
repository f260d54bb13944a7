use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use cost_query::config::{parse_timeout, PipelineConfig};
use cost_query::cost_data::cost_explorer_requests;
use cost_query::model::{ChartType, Metric, Query};
use cost_query::processor::{Answer, Interpretation, QueryProcessor};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cost-query")]
#[command(about = "Turn a plain-English AWS cost question into Cost Explorer parameters")]
struct Args {
    /// The cost question in natural language
    question: String,

    /// Date to resolve relative expressions against (YYYY-MM-DD, default: today)
    #[arg(long)]
    today: Option<NaiveDate>,

    /// Provider to try first (bedrock, anthropic, openai, keyword)
    #[arg(short, long)]
    provider: Option<String>,

    /// JSON file replacing the built-in service / purchase-type table
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Default metric when the question names none
    #[arg(long)]
    metric: Option<String>,

    /// Default chart type when the question asks for none
    #[arg(long)]
    chart: Option<String>,

    /// Per-provider timeout in seconds
    #[arg(long)]
    timeout: Option<String>,

    /// Stop after interpretation: no cost data, no explanation
    #[arg(long)]
    interpret_only: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = PipelineConfig::from_env()?;
    if let Some(catalog) = args.catalog {
        config.catalog_path = Some(catalog);
    }
    if let Some(metric) = &args.metric {
        config.default_metric = metric
            .parse::<Metric>()
            .map_err(anyhow::Error::msg)
            .context("--metric")?;
    }
    if let Some(chart) = &args.chart {
        config.default_chart = chart
            .parse::<ChartType>()
            .map_err(anyhow::Error::msg)
            .context("--chart")?;
    }
    if let Some(timeout) = &args.timeout {
        config.provider_timeout = parse_timeout(timeout)?;
    }

    let today = args
        .today
        .unwrap_or_else(|| chrono::Local::now().date_naive());
    let mut query = Query::new(args.question);
    if let Some(provider) = args.provider {
        query = query.with_preferred_provider(provider);
    }

    let processor = QueryProcessor::new(config)?;
    info!("Question: {} (today {})", query.text, today);
    info!("Providers: {}", processor.chain().names().join(", "));

    let output = if args.interpret_only {
        let interpretation = processor.interpret(&query, today).await?;
        let requests = match &interpretation {
            Interpretation::Cost(cost) => cost_explorer_requests(&cost.parameters),
            Interpretation::Meta { .. } => Vec::new(),
        };
        serde_json::json!({
            "query_id": query.id,
            "interpretation": interpretation,
            "cost_explorer_requests": requests,
        })
    } else {
        let response = processor.process(&query, today).await?;
        let requests = match &response.answer {
            Answer::Cost(cost) => cost_explorer_requests(&cost.parameters),
            Answer::Meta(_) => Vec::new(),
        };
        serde_json::json!({
            "response": response,
            "cost_explorer_requests": requests,
        })
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

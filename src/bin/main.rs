use clap::Parser;
use stock_research::{ResearchConfig, ResearchOptions, Researcher};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Iterative deep research over finance news
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The research question
    #[arg(index = 1)]
    query: String,

    /// Focus the question on a ticker symbol
    #[arg(short, long)]
    ticker: Option<String>,

    /// Maximum research steps (overrides MAX_STEPS)
    #[arg(long)]
    max_steps: Option<u32>,

    /// Token budget for the run (overrides TOKEN_BUDGET)
    #[arg(long)]
    token_budget: Option<u64>,

    /// Log every step
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    /// Print the full outcome as JSON
    #[arg(long, default_value_t = false)]
    json: bool,
}

impl Args {
    fn research_query(&self) -> String {
        match &self.ticker {
            Some(ticker) => format!("Regarding {} stock: {}", ticker.trim().to_uppercase(), self.query),
            None => self.query.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load environment variables
    dotenv::dotenv().ok();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ResearchConfig::from_env()?;
    let researcher = Researcher::from_config(config)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing the current step and answering");
            on_signal.cancel();
        }
    });

    let query = args.research_query();
    let options = ResearchOptions {
        max_steps: args.max_steps,
        token_budget: args.token_budget,
        verbose: args.verbose,
    };

    let outcome = researcher.run(&query, options, &cancel).await?;

    info!(
        run_id = %outcome.run_id,
        steps = outcome.steps,
        tokens_spent = outcome.tokens_spent,
        stop_reason = %outcome.stop_reason,
        "Research finished"
    );

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        println!("\n=== RESEARCH ANSWER ===");
        println!("{}", outcome.answer);
        if args.verbose {
            println!("\nReasoning Trace:");
            for (i, trace) in outcome.reasoning_trace.iter().enumerate() {
                println!("  {}: {}", i + 1, trace);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticker_rewrites_query() {
        let args = Args::parse_from(["stock-research", "what moved the stock?", "--ticker", "nvda"]);
        assert_eq!(args.research_query(), "Regarding NVDA stock: what moved the stock?");

        let args = Args::parse_from(["stock-research", "oil outlook", "--max-steps", "4", "--json"]);
        assert_eq!(args.research_query(), "oil outlook");
        assert_eq!(args.max_steps, Some(4));
        assert!(args.json);
    }
}

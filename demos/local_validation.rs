//! Cross-validate a forest on synthetic market data
//!
//! Usage: cargo run --example local_validation -- --folds 4 --trees 3

use anyhow::Result;
use clap::Parser;
use crypto_forest::prelude::*;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Cross-validate a random forest on synthetic data")]
struct Args {
    /// Number of folds
    #[arg(short, long, default_value = "4")]
    folds: usize,

    /// Trees per fold
    #[arg(short, long, default_value = "3")]
    trees: usize,

    /// Number of synthetic samples
    #[arg(short, long, default_value = "400")]
    samples: usize,

    /// Bootstrap sample size per tree
    #[arg(long, default_value = "200")]
    sample_size: usize,

    /// Base random seed
    #[arg(long, default_value = "42")]
    seed: u64,
}

/// A drifting sine market: the label buys while short momentum is positive
fn synthetic_market(n: usize) -> (Vec<String>, Vec<Sample>) {
    let features = ["RSI", "momentum", "EMA8", "EMA55"]
        .iter()
        .map(|f| f.to_string())
        .collect();

    let data = (0..n)
        .map(|i| {
            let phase = i as f64 * 0.15;
            let close = 12.0 + phase.sin() * 3.0 + (i as f64) * 0.002;
            let momentum = phase.cos();
            let action = if momentum > 0.25 { Action::Buy } else { Action::Nothing };
            Sample::new(action)
                .with("close", close)
                .with("EMA8", close - momentum * 0.5)
                .with("EMA55", 12.0 + (i as f64) * 0.002)
                .with("RSI", 50.0 + momentum * 25.0)
                .with("momentum", momentum)
        })
        .collect();

    (features, data)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("crypto_forest=info")
        .init();

    let args = Args::parse();
    let (features, data) = synthetic_market(args.samples);
    info!(samples = data.len(), folds = args.folds, "generated synthetic market");

    let backend = MemoryBackend::new();
    let config = ForestConfig {
        forest_size: args.trees,
        sample_size: args.sample_size,
        retry_delay: Duration::from_secs(1),
        seed: args.seed,
    };

    validate(args.folds, &features, &data, &backend, &backend, &config).await?;
    let summary = validate_results(&backend).await?;

    println!("\nCross-Validation Summary");
    println!("========================");
    for report in &summary.folds {
        println!(
            "Fold #{}: accuracy {:.4}, predicted {:.4} ETH, expected {:.4} ETH",
            report.fold, report.accuracy, report.predicted_returns, report.expected_returns
        );
    }
    println!();
    println!("Mean accuracy:          {:.4}", summary.accuracy);
    println!("Mean predicted returns: {:.4} ETH", summary.predicted_returns);
    println!("Mean expected returns:  {:.4} ETH", summary.expected_returns);

    Ok(())
}

//! Scale-up attempt counters

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{print_json, print_rows, OutputFormat};

#[derive(Tabled)]
struct AttemptRow {
    #[tabled(rename = "Run")]
    run_id: String,
    #[tabled(rename = "Attempts")]
    total: u32,
    #[tabled(rename = "Spot attempts")]
    spot: u32,
}

pub async fn show_attempts(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let attempts = client.attempts().await?;

    if format == OutputFormat::Json {
        return print_json(&attempts);
    }

    let rows = attempts
        .attempts
        .iter()
        .map(|(run_id, state)| AttemptRow {
            run_id: run_id.clone(),
            total: state.total_attempts,
            spot: state.spot_attempts,
        })
        .collect();
    print_rows(rows, "No runs are waiting on a retry");

    if !attempts.exhausted.is_empty() {
        println!();
        println!(
            "{} {}",
            "Failed for lack of capacity:".red().bold(),
            attempts.exhausted.join(", ")
        );
    }

    Ok(())
}

//! Run records known to the provisioner

use anyhow::{Context, Result};
use tabled::Tabled;

use crate::client::{ApiClient, Run};
use crate::output::{color_status, print_info, print_json, print_rows, print_success, OutputFormat};

#[derive(Tabled)]
struct RunRow {
    #[tabled(rename = "Run")]
    id: String,
    #[tabled(rename = "Owner")]
    owner: String,
    #[tabled(rename = "Instance")]
    instance: String,
    #[tabled(rename = "Spot")]
    spot: String,
    #[tabled(rename = "Parent")]
    parent: String,
    #[tabled(rename = "Status")]
    status: String,
}

impl From<&Run> for RunRow {
    fn from(run: &Run) -> Self {
        Self {
            id: run.id.clone(),
            owner: run.owner.clone(),
            instance: match &run.instance.region_id {
                Some(region) => format!("{} @ {}", run.instance.node_type, region),
                None => run.instance.node_type.clone(),
            },
            spot: if run.instance.spot { "yes" } else { "no" }.to_string(),
            parent: run.parent_id.clone().unwrap_or_else(|| "-".to_string()),
            status: color_status(&run.status),
        }
    }
}

pub async fn list_runs(
    client: &ApiClient,
    status: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let runs: Vec<Run> = client
        .runs()
        .await?
        .into_iter()
        .filter(|r| status.as_deref().map_or(true, |s| r.status.eq_ignore_ascii_case(s)))
        .collect();

    if format == OutputFormat::Json {
        return print_json(&runs);
    }

    print_rows(runs.iter().map(RunRow::from).collect(), "No runs found");

    for run in &runs {
        if let Some(reason) = &run.failure_reason {
            print_info(&format!("run {}: {}", run.id, reason));
        }
    }

    Ok(())
}

/// Register or update a run from a JSON file
pub async fn register_run(client: &ApiClient, file: &str, format: OutputFormat) -> Result<()> {
    let content =
        std::fs::read_to_string(file).with_context(|| format!("Failed to read {}", file))?;
    let body: serde_json::Value =
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", file))?;

    let run = client.register_run(&body).await?;

    match format {
        OutputFormat::Json => print_json(&run)?,
        OutputFormat::Table => print_success(&format!("Run {} registered", run.id)),
    }
    Ok(())
}

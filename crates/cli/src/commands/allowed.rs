//! Allowed instance and price types

use anyhow::Result;
use colored::Colorize;

use crate::client::ApiClient;
use crate::output::{format_list, print_json, print_warning, OutputFormat};

pub async fn show_allowed(
    client: &ApiClient,
    tool: Option<String>,
    region: Option<String>,
    all: bool,
    format: OutputFormat,
) -> Result<()> {
    let allowed = client
        .allowed_instances(tool.as_deref(), region.as_deref(), all)
        .await?;

    if format == OutputFormat::Json {
        return print_json(&allowed);
    }

    println!("{}", "Allowed Instances".bold());
    println!("{}", "=".repeat(50));
    println!("Region:                 {}", allowed.region.cyan());
    if let Some(tool) = &tool {
        println!("Tool:                   {}", tool.cyan());
    }
    println!("Catalog generation:     {}", allowed.catalog_generation);
    println!();
    println!("Instance types:         {}", format_list(&allowed.instance_types));
    println!(
        "Tool instance types:    {}",
        format_list(&allowed.docker_instance_types)
    );
    println!("Price types:            {}", format_list(&allowed.price_types));

    if all {
        println!();
        println!("{}", "Listing every catalog type; allow-lists ignored".dimmed());
    } else if allowed.instance_types.is_empty() {
        println!();
        print_warning("No catalog type passes the allow-list for this context");
    }

    Ok(())
}

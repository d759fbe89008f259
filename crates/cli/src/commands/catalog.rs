//! Instance catalog listing

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{ApiClient, Offering};
use crate::output::{
    color_price_model, format_memory_gb, format_price, print_json, print_rows, OutputFormat,
};

/// Row for the offerings table
#[derive(Tabled)]
struct OfferingRow {
    #[tabled(rename = "Type")]
    instance_type: String,
    #[tabled(rename = "Region")]
    region: String,
    #[tabled(rename = "Pricing")]
    price_model: String,
    #[tabled(rename = "vCPU")]
    vcpu: u32,
    #[tabled(rename = "Memory")]
    memory: String,
    #[tabled(rename = "GPU")]
    gpu: u32,
    #[tabled(rename = "Price")]
    price: String,
}

impl From<&Offering> for OfferingRow {
    fn from(o: &Offering) -> Self {
        Self {
            instance_type: o.instance_type.clone(),
            region: o.region.clone(),
            price_model: color_price_model(&o.price_model),
            vcpu: o.vcpu,
            memory: format_memory_gb(o.memory_gb),
            gpu: o.gpu_count,
            price: format_price(o.price_per_unit),
        }
    }
}

pub async fn show_catalog(
    client: &ApiClient,
    region: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let catalog = client.catalog(region.as_deref()).await?;

    if format == OutputFormat::Json {
        return print_json(&catalog);
    }

    let mut offerings = catalog.offerings.clone();
    offerings.sort_by(|a, b| {
        (&a.region, &a.instance_type, &a.price_model).cmp(&(&b.region, &b.instance_type, &b.price_model))
    });

    println!(
        "{} generation {} ({})",
        "Catalog".bold(),
        catalog.generation,
        short_fingerprint(&catalog.fingerprint).dimmed()
    );
    print_rows(
        offerings.iter().map(OfferingRow::from).collect(),
        "No offerings found",
    );

    Ok(())
}

fn short_fingerprint(fingerprint: &str) -> &str {
    fingerprint.get(..12).unwrap_or(fingerprint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_fingerprint() {
        assert_eq!(short_fingerprint("0123456789abcdef"), "0123456789ab");
        assert_eq!(short_fingerprint("abc"), "abc");
    }
}

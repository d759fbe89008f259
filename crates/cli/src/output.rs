//! Output formatting utilities

use anyhow::Result;
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

impl OutputFormat {
    /// Parse a stored format name, falling back to table
    pub fn from_name(name: &str) -> Self {
        <Self as ValueEnum>::from_str(name, true).unwrap_or_default()
    }
}

/// Print any response as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print table rows, or a notice when there are none
pub fn print_rows<R: Tabled>(rows: Vec<R>, empty_message: &str) {
    if rows.is_empty() {
        println!("{}", empty_message.yellow());
        return;
    }
    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Hourly price with four decimals
pub fn format_price(price: f64) -> String {
    format!("${:.4}/h", price)
}

/// Memory in GiB, dropping a zero fraction
pub fn format_memory_gb(memory_gb: f64) -> String {
    if memory_gb.fract() == 0.0 {
        format!("{}Gi", memory_gb as u64)
    } else {
        format!("{:.1}Gi", memory_gb)
    }
}

/// Comma-joined list, or a dash when empty
pub fn format_list(items: &[String]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}

/// Color run status based on value
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "pending" => status.yellow().to_string(),
        "running" => status.blue().to_string(),
        "succeeded" => status.green().to_string(),
        "failed" => status.red().to_string(),
        "stopped" => status.dimmed().to_string(),
        _ => status.to_string(),
    }
}

/// Color price model: spot is the cheaper, revocable one
pub fn color_price_model(price_model: &str) -> String {
    match price_model {
        "spot" => price_model.cyan().to_string(),
        _ => price_model.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_memory() {
        assert_eq!(format_memory_gb(16.0), "16Gi");
        assert_eq!(format_memory_gb(0.5), "0.5Gi");
    }

    #[test]
    fn test_format_price() {
        assert_eq!(format_price(0.096), "$0.0960/h");
    }

    #[test]
    fn test_format_list() {
        assert_eq!(format_list(&[]), "-");
        assert_eq!(
            format_list(&["spot".to_string(), "on_demand".to_string()]),
            "spot, on_demand"
        );
    }

    #[test]
    fn test_format_from_name() {
        assert_eq!(OutputFormat::from_name("JSON"), OutputFormat::Json);
        assert_eq!(OutputFormat::from_name("yaml"), OutputFormat::Table);
    }
}

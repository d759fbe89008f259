//! Stored CLI settings

use anyhow::Result;

use crate::config::Config;
use crate::output::{print_json, print_success, OutputFormat};

pub fn set_api_url(url: &str) -> Result<()> {
    url::Url::parse(url).map_err(|e| anyhow::anyhow!("Invalid API URL '{}': {}", url, e))?;

    let mut config = Config::load()?;
    config.api_url = Some(url.to_string());
    let path = config.save()?;
    print_success(&format!("API URL saved to {}", path.display()));
    Ok(())
}

pub fn set_format(format: OutputFormat) -> Result<()> {
    let mut config = Config::load()?;
    config.default_format = Some(
        match format {
            OutputFormat::Table => "table",
            OutputFormat::Json => "json",
        }
        .to_string(),
    );
    let path = config.save()?;
    print_success(&format!("Default format saved to {}", path.display()));
    Ok(())
}

pub fn show(config: &Config) -> Result<()> {
    print_json(config)
}

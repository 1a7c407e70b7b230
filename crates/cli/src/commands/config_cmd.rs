//! `servechat config`: Print the effective configuration.

use servechat_config::AppConfig;

pub fn show(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("# {}", AppConfig::config_dir().join("config.toml").display());
    println!("{}", config.to_redacted_toml()?);
    Ok(())
}

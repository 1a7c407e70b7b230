//! `servechat serve`: Start the HTTP API server.

use servechat_config::AppConfig;

pub async fn run(
    mut config: AppConfig,
    port_override: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    if !config.has_token() {
        return Err(super::ask::MISSING_TOKEN.into());
    }

    println!("servechat API");
    println!("   Listening:  http://{}:{}/api", config.gateway.host, config.gateway.port);
    println!("   Model:      {}", config.endpoint.model_name);
    if let Some(id) = &config.telemetry.experiment_id {
        println!("   Experiment: {id}");
    }

    servechat_gateway::start(config).await?;

    Ok(())
}

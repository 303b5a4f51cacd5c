//! `lectern serve` — Start the HTTP API server.

pub async fn run(
    port_override: Option<u16>,
    host_override: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config()?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }
    if let Some(host) = host_override {
        config.gateway.host = host;
    }

    println!("Lectern Gateway");
    println!("   Listening:     {}:{}", config.gateway.host, config.gateway.port);
    println!("   Model server:  {}", config.model.default_url);
    println!("   Settings:      {}", config.data_dir().display());

    lectern_gateway::start(config).await?;

    Ok(())
}

//! `lectern status` — Show configuration and model server status.

use lectern_config::AppConfig;
use lectern_conversation::FeatureAvailability;

use super::Session;

pub async fn run(user: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;
    let session = Session::open(&config, user).await;
    let settings = session.controller.settings().await;
    let connection = session.controller.connection().await;

    println!("Lectern Status");
    println!("==============");
    println!("  Config dir:    {}", AppConfig::config_dir().display());
    println!("  Data dir:      {}", config.data_dir().display());
    println!("  Profile:       {}", session.user);
    println!("  Model server:  {}", settings.ollama_url);
    println!("  RAG server:    {}", settings.effective_rag_url());
    println!(
        "  Collections:   {}",
        if settings.rag_collections.is_empty() {
            "(none)".to_string()
        } else {
            settings.rag_collections.join(", ")
        }
    );
    println!("  Threshold:     {}", settings.rag_threshold);
    println!("  Gateway:       {}:{}", config.gateway.host, config.gateway.port);

    println!();
    if connection.connected {
        println!("  Connected, {} model(s) available", connection.models.len());
        if let Some(model) = &connection.selected_model {
            println!("  Selected model: {model}");
        }
    } else {
        println!(
            "  Disconnected: {}",
            connection.error.as_deref().unwrap_or("unknown error")
        );
    }
    println!("  Features:      {}", describe_features(connection.features()));

    let config_path = AppConfig::config_dir().join("config.toml");
    if !config_path.exists() {
        println!("\n  No config file — run `lectern onboard` first");
    }

    session.controller.stop_monitor().await;
    Ok(())
}

fn describe_features(features: FeatureAvailability) -> String {
    let available: Vec<&str> = [
        (features.send, "send"),
        (features.rag, "rag"),
        (features.citations, "citations"),
        (features.system_message, "system message"),
    ]
    .into_iter()
    .filter_map(|(on, name)| on.then_some(name))
    .collect();

    if available.is_empty() {
        "unavailable".into()
    } else {
        available.join(", ")
    }
}

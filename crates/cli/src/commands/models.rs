//! `lectern models` — List the models the server offers.

use super::Session;

pub async fn run(user: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;
    let session = Session::open(&config, user).await;
    let connection = session.controller.connection().await;
    session.controller.stop_monitor().await;

    if !connection.connected {
        let reason = connection.error.unwrap_or_else(|| "unknown error".into());
        return Err(format!("Model server unavailable: {reason}").into());
    }

    for model in &connection.models {
        let marker = if connection.selected_model.as_ref() == Some(model) {
            "*"
        } else {
            " "
        };
        println!("{marker} {model}");
    }
    Ok(())
}

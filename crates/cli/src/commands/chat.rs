//! `lectern chat` — Interactive or single-message chat mode.

use std::io::Write;

use lectern_conversation::{ChatStreamEvent, CitationView};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use super::Session;

/// One line of REPL input.
#[derive(Debug, PartialEq, Eq)]
enum ReplCommand {
    Exit,
    New,
    Sources,
    Retry,
    ListModels,
    SelectModel(String),
    Message(String),
    Unknown(String),
    Blank,
}

fn parse_line(line: &str) -> ReplCommand {
    let line = line.trim();
    if line.is_empty() {
        return ReplCommand::Blank;
    }
    if matches!(line, "exit" | "quit" | "/exit" | "/quit") {
        return ReplCommand::Exit;
    }
    let Some(command) = line.strip_prefix('/') else {
        return ReplCommand::Message(line.to_string());
    };

    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };
    match name {
        "new" => ReplCommand::New,
        "sources" => ReplCommand::Sources,
        "retry" => ReplCommand::Retry,
        "model" if arg.is_empty() => ReplCommand::ListModels,
        "model" => ReplCommand::SelectModel(arg.to_string()),
        _ => ReplCommand::Unknown(name.to_string()),
    }
}

/// The relevant-resources list as printable lines.
fn render_sources(view: &CitationView) -> String {
    if view.is_empty() && view.removed.is_empty() {
        return "  No sources yet.".into();
    }
    let mut out = String::new();
    for entry in &view.entries {
        out.push_str(&format!(
            "  {} {} ({}x, score {:.2})\n      {}\n",
            entry.indicator, entry.source_name, entry.count, entry.score, entry.url
        ));
    }
    for removed in &view.removed {
        out.push_str(&format!("  - {} (removed)\n", removed.source_name));
    }
    out.trim_end().to_string()
}

pub async fn run(
    user: &str,
    message: Option<String>,
    model: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;
    let session = Session::open(&config, user).await;
    let controller = session.controller.clone();

    if let Some(model) = model {
        controller
            .select_model(&model)
            .await
            .map_err(|e| format!("Cannot use model '{model}': {e}"))?;
    }

    let before = controller.settings().await;
    if before.rag_enabled && !before.rag_collections.is_empty() {
        match controller.refresh_collections().await {
            Ok(_) => {
                let after = controller.settings().await;
                if after.rag_collections != before.rag_collections {
                    session.settings.save_now(&session.user, &after).await?;
                }
            }
            Err(e) => warn!(error = %e, "Could not list RAG collections"),
        }
    }

    let connection = controller.connection().await;
    if !connection.is_ready() {
        let reason = connection.error.unwrap_or_else(|| "no model selected".into());
        return Err(format!("Model server not ready: {reason}").into());
    }

    if let Some(msg) = message {
        // Single message mode
        stream_reply(&session, msg).await?;
        controller.stop_monitor().await;
        return Ok(());
    }

    let settings = controller.settings().await;
    println!();
    println!("  Lectern — Interactive Mode");
    println!();
    println!("  Model:        {}", connection.selected_model.as_deref().unwrap_or("-"));
    println!("  Server:       {}", settings.ollama_url);
    println!(
        "  Documents:    {}",
        if settings.rag_enabled && !settings.rag_collections.is_empty() {
            settings.rag_collections.join(", ")
        } else {
            "off".to_string()
        }
    );
    println!();
    println!("  Commands: /new  /sources  /model [name]  /retry  exit");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt()?;
    while let Some(line) = lines.next_line().await? {
        match parse_line(&line) {
            ReplCommand::Exit => break,
            ReplCommand::Blank => {}
            ReplCommand::New => match controller.new_conversation().await {
                Ok(()) => println!("  Started a new conversation."),
                Err(e) => eprintln!("  [Refused] {e}"),
            },
            ReplCommand::Sources => println!("{}", render_sources(&controller.citation_view().await)),
            ReplCommand::Retry => {
                let state = controller.check_connection().await;
                match (&state.selected_model, state.connected) {
                    (Some(model), true) => println!("  Connected, using {model}."),
                    _ => eprintln!(
                        "  [Disconnected] {}",
                        state.error.as_deref().unwrap_or("unknown error")
                    ),
                }
            }
            ReplCommand::ListModels => {
                let state = controller.connection().await;
                for model in &state.models {
                    let marker = if state.selected_model.as_ref() == Some(model) { "*" } else { " " };
                    println!("  {marker} {model}");
                }
            }
            ReplCommand::SelectModel(model) => match controller.select_model(&model).await {
                Ok(_) => println!("  Using {model}."),
                Err(e) => eprintln!("  [Error] {e}"),
            },
            ReplCommand::Unknown(name) => eprintln!("  Unknown command: /{name}"),
            ReplCommand::Message(text) => stream_reply(&session, text).await?,
        }
        prompt()?;
    }

    controller.stop_monitor().await;
    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}

fn prompt() -> std::io::Result<()> {
    print!("  You > ");
    std::io::stdout().flush()
}

/// Send one message and print the reply as it streams.
async fn stream_reply(session: &Session, text: String) -> Result<(), Box<dyn std::error::Error>> {
    let mut rx = match session.controller.clone().send_stream(text).await {
        Ok(rx) => rx,
        Err(e) => {
            eprintln!("  [Refused] {e}");
            return Ok(());
        }
    };

    let mut started = false;
    while let Some(event) = rx.recv().await {
        match event {
            ChatStreamEvent::Summarizing { .. } => eprintln!("  (summarizing earlier conversation)"),
            ChatStreamEvent::SummarizationFailed { truncated, reason } => {
                warn!(reason = %reason, "Summary failed");
                if truncated {
                    eprintln!("  (older messages dropped to fit the model)");
                }
            }
            ChatStreamEvent::Chunk { content } => {
                if !started {
                    print!("\n  Assistant > ");
                    started = true;
                }
                print!("{content}");
                std::io::stdout().flush()?;
            }
            ChatStreamEvent::Error { message } => eprintln!("\n  [Error] {message}"),
            ChatStreamEvent::Done { citations, .. } => {
                println!();
                if citations > 0 {
                    println!("  ({citations} source(s) cited, /sources to list)");
                }
                println!();
            }
            ChatStreamEvent::CitationsRecorded { .. } | ChatStreamEvent::Summarized { .. } => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lectern_conversation::{ChangeState, CitationEntry, RemovedCitation};

    #[test]
    fn parses_repl_commands() {
        assert_eq!(parse_line("  exit "), ReplCommand::Exit);
        assert_eq!(parse_line("/new"), ReplCommand::New);
        assert_eq!(parse_line("/sources"), ReplCommand::Sources);
        assert_eq!(parse_line("/retry"), ReplCommand::Retry);
        assert_eq!(parse_line("/model"), ReplCommand::ListModels);
        assert_eq!(
            parse_line("/model  llama3:8b "),
            ReplCommand::SelectModel("llama3:8b".into())
        );
        assert_eq!(parse_line("/bogus"), ReplCommand::Unknown("bogus".into()));
        assert_eq!(parse_line("   "), ReplCommand::Blank);
        assert_eq!(
            parse_line("How do I plan a retreat?"),
            ReplCommand::Message("How do I plan a retreat?".into())
        );
    }

    #[test]
    fn renders_entries_and_removed_sources() {
        let view = CitationView {
            entries: vec![CitationEntry {
                source_name: "Handbook.pdf".into(),
                url: "http://localhost:9042/docs/h".into(),
                count: 2,
                score: 1.5,
                emphasis: 1.0,
                state: ChangeState::Rose,
                indicator: ChangeState::Rose.indicator(),
                label: ChangeState::Rose.label().into(),
                index: 0,
                previous_index: Some(1),
            }],
            removed: vec![RemovedCitation {
                key: "old".into(),
                source_name: "Old.pdf".into(),
                url: "#".into(),
            }],
        };
        let text = render_sources(&view);
        assert!(text.contains("↑ Handbook.pdf (2x, score 1.50)"));
        assert!(text.contains("http://localhost:9042/docs/h"));
        assert!(text.contains("- Old.pdf (removed)"));
    }

    #[test]
    fn empty_view_says_so() {
        assert_eq!(render_sources(&CitationView::default()), "  No sources yet.");
    }
}

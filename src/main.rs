use ahamai::{
    chat::{ChatEvent, ChatSession},
    config::{get_config, initialize_config},
};
use log::debug;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

/// Drains events for one in-flight submission, echoing fragments as they
/// arrive, until the stream ends or fails.
async fn print_response(session: &ChatSession, events: &mut UnboundedReceiver<ChatEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ChatEvent::Fragment(text) => {
                print!("{}", text);
                let _ = std::io::stdout().flush();
            }
            ChatEvent::StreamEnded => {
                println!();
                return;
            }
            ChatEvent::StreamFailed(_) => {
                if let Some(error) = session.with_state(|state| state.error().map(String::from)) {
                    eprintln!("error: {}", error);
                }
                session.dismiss_error();
                return;
            }
            _ => {}
        }
    }
}

fn print_help() {
    println!("commands: /models, /model <id>, /clear, /retry, /help, /quit");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    env_logger::init();

    initialize_config()?;
    let config = get_config();
    debug!("Using API base URL {}", config.base_url);

    let session = Arc::new(ChatSession::new(&config)?);
    let mut events = session.subscribe();

    let models = session.load_models().await;
    println!(
        "AhamAI - model: {} ({} available)",
        session.selected_model(),
        models.len()
    );
    print_help();
    println!();
    let welcome = session.with_state(|state| state.turns().first().map(|t| t.content.clone()));
    if let Some(welcome) = welcome {
        println!("{}", welcome);
    }

    let mut editor = DefaultEditor::new()?;
    loop {
        let line = match editor.readline("> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(input);

        match input {
            "/quit" => break,
            "/help" => print_help(),
            "/models" => {
                for model in session.available_models() {
                    let marker = if model == session.selected_model() { "*" } else { " " };
                    println!("{} {}", marker, model);
                }
            }
            "/clear" => {
                session.clear_chat();
                println!("(cleared)");
            }
            "/retry" => {
                session.retry_last_message();
                if session.with_state(|state| state.is_loading()) {
                    print_response(&session, &mut events).await;
                } else {
                    println!("nothing to retry");
                }
            }
            _ if input.starts_with("/model ") => {
                let id = input.trim_start_matches("/model ").trim();
                if session.select_model(id) {
                    println!("model set to {}", id);
                } else {
                    println!("unknown model: {}", id);
                }
            }
            _ => {
                session.send_message(input);
                if session.with_state(|state| state.is_loading()) {
                    print_response(&session, &mut events).await;
                }
            }
        }
    }

    Ok(())
}

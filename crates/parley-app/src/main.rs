//! Parley terminal client - composition root.
//!
//! 1. Parse flags and load configuration from TOML
//! 2. Build the HTTP transport and the session controller
//! 3. Print progress and notices from the session's event channel
//! 4. Read commands from stdin until `/quit`, EOF, or Ctrl-C

mod cli;
mod render;
mod repl;

use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use parley_core::{ConversationId, CorrelationId, ParleyConfig, SessionEvent, Survey};
use parley_session::{PickOutcome, SendOutcome, Session};
use parley_transport::{AssistantApi, ConversationPatch, HttpTransport, TokenStore};

use cli::CliArgs;
use render::{render_entry, render_timeline, Drafts};
use repl::Command;

/// Print the label of the running progress entry whenever it changes.
async fn event_printer(session: Arc<Session>) {
    let mut events = session.subscribe();
    let mut last_label: Option<String> = None;
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "event printer lagged");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        tracing::trace!(event = event.name(), "session event");
        match event {
            SessionEvent::TimelineChanged { .. } => {
                let label = session
                    .snapshot()
                    .iter()
                    .filter(|e| e.is_running_progress())
                    .find_map(|e| e.progress().map(|p| p.label.clone()));
                if label != last_label {
                    if let Some(text) = &label {
                        println!("  ... {text}");
                    }
                }
                last_label = label;
            }
            SessionEvent::ConversationCreated { conversation } => {
                println!("  (new conversation {}: {})", conversation.id, conversation.title);
            }
            SessionEvent::HistoryLoaded {
                conversation_id,
                entry_count,
            } => {
                println!("  (loaded {entry_count} entries from {conversation_id})");
            }
            SessionEvent::SurveySubmitFailed { message, .. } => {
                println!("  (could not save your answers: {message})");
            }
            SessionEvent::AuthenticationRequired => {
                println!("  (your session has expired; set PARLEY_ACCESS_TOKEN and restart)");
            }
            _ => {}
        }
    }
}

/// Print entries appended since the last call. A shorter timeline means it
/// was replaced, so everything is printed again.
fn print_new(session: &Session, shown: &mut usize) {
    let snapshot = session.snapshot();
    if snapshot.len() < *shown {
        *shown = 0;
    }
    for (index, entry) in snapshot.iter().enumerate().skip(*shown) {
        print!("{}", render_entry(index, entry, &Drafts::of(session, entry)));
    }
    *shown = snapshot.len();
}

fn print_entry(session: &Session, index: usize) {
    if let Some(entry) = session.snapshot().get(index) {
        print!("{}", render_entry(index, entry, &Drafts::of(session, entry)));
    }
}

/// Correlation id of the entry printed at `index`.
fn entry_at(session: &Session, index: usize) -> Result<CorrelationId, String> {
    session
        .snapshot()
        .get(index)
        .map(|e| e.correlation_id)
        .ok_or_else(|| format!("no entry [{index}]"))
}

/// Run one command. Returns `false` when the client should exit.
async fn dispatch(
    command: Command,
    session: &Arc<Session>,
    api: &HttpTransport,
    shown: &mut usize,
) -> Result<bool, String> {
    match command {
        Command::Send(text) => match session.send_text(&text).await {
            SendOutcome::Failed { error, .. } => {
                tracing::debug!(error = %error, "send failed");
            }
            SendOutcome::Delivered { .. } | SendOutcome::Ignored => {}
        },
        Command::Show => {
            print!("{}", render_timeline(session));
            *shown = session.snapshot().len();
            return Ok(true);
        }
        Command::History => {
            let conversation = session
                .conversation()
                .ok_or_else(|| "no conversation is open".to_string())?;
            session
                .load_history(&conversation)
                .await
                .map_err(|e| e.to_string())?;
            *shown = 0;
        }
        Command::Open(id) => {
            session
                .load_history(&ConversationId::new(id))
                .await
                .map_err(|e| e.to_string())?;
            *shown = 0;
        }
        Command::Chats => {
            let chats = api.list_conversations().await.map_err(|e| e.to_string())?;
            if chats.is_empty() {
                println!("  (no conversations)");
            }
            let current = session.conversation();
            for chat in chats {
                let marker = if current.as_ref() == Some(&chat.id) { "*" } else { " " };
                let archived = if chat.archived { " (archived)" } else { "" };
                println!("  {marker} {}  {}{archived}", chat.id, chat.title);
            }
        }
        Command::Rename(title) => {
            let conversation = session
                .conversation()
                .ok_or_else(|| "no conversation is open".to_string())?;
            let patch = ConversationPatch {
                title: Some(title),
                archived: None,
            };
            let updated = api
                .update_conversation(&conversation, &patch)
                .await
                .map_err(|e| e.to_string())?;
            println!("  (renamed to {})", updated.title);
        }
        Command::Delete(id) => {
            let id = ConversationId::new(id);
            api.delete_conversation(&id)
                .await
                .map_err(|e| e.to_string())?;
            if session.conversation().as_ref() == Some(&id) {
                session.reset();
                *shown = 0;
            }
            println!("  (deleted {id})");
        }
        Command::New => {
            session.reset();
            *shown = 0;
            println!("  (started a new conversation)");
        }
        Command::Select { entry, option } => {
            let id = entry_at(session, entry)?;
            if !session
                .select_option(id, &option)
                .map_err(|e| e.to_string())?
            {
                println!("  (that survey can no longer be changed)");
            }
            print_entry(session, entry);
            return Ok(true);
        }
        Command::Pick { entry, option } => {
            let id = entry_at(session, entry)?;
            if session.toggle_skill(id, &option).map_err(|e| e.to_string())?
                == PickOutcome::Rejected
            {
                println!("  (pick rejected)");
            }
            print_entry(session, entry);
            return Ok(true);
        }
        Command::Decide { entry, on } => {
            let id = entry_at(session, entry)?;
            session
                .set_system_decides(id, on)
                .map_err(|e| e.to_string())?;
            print_entry(session, entry);
            return Ok(true);
        }
        Command::Answer {
            entry,
            batch,
            question,
            answer,
        } => {
            let id = entry_at(session, entry)?;
            if !session
                .answer_insight(id, &batch, &question, &answer)
                .map_err(|e| e.to_string())?
            {
                println!("  (that batch can no longer be changed)");
            }
            print_entry(session, entry);
            return Ok(true);
        }
        Command::Submit { entry, batch } => {
            let id = entry_at(session, entry)?;
            let snapshot = session.snapshot();
            let survey = snapshot.get(entry).and_then(|e| e.survey());
            let result = match (survey, batch) {
                (Some(Survey::SingleSelect(_)), _) => session.submit_single_select(id).await,
                (Some(Survey::LimitedMultiSelect(_)), _) => session.submit_skills(id).await,
                (Some(Survey::BatchedInsight(_)), Some(batch)) => {
                    session.submit_survey_batch(id, &batch).await
                }
                (Some(Survey::BatchedInsight(_)), None) => {
                    return Err("name the batch to submit: /submit <entry> <batch>".into())
                }
                (None, _) => return Err(format!("entry [{entry}] is not a survey")),
            };
            result.map_err(|e| e.to_string())?;
            print_entry(session, entry);
        }
        Command::Help => println!("{}", repl::HELP),
        Command::Quit => return Ok(false),
    }
    print_new(session, shown);
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let mut config = ParleyConfig::load_or_default(&config_file);
    args.apply(&mut config);

    // Logs go to stderr so they do not interleave with the transcript.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting Parley v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), server = %config.server.base_url, "Configuration loaded");

    let tokens = Arc::new(TokenStore::new(
        config.auth.access_token.clone(),
        config.auth.refresh_token.clone(),
    ));
    if !tokens.is_authenticated() {
        tracing::warn!("No access token configured; requests will be unauthenticated");
    }
    let transport = Arc::new(HttpTransport::new(&config.server, tokens)?);
    let session = Arc::new(Session::new(
        Arc::clone(&transport) as Arc<dyn AssistantApi>,
        config.session.clone(),
    ));

    let printer = tokio::spawn(event_printer(Arc::clone(&session)));

    let mut shown = 0usize;
    if let Some(id) = &args.conversation {
        match session.load_history(&ConversationId::new(id.as_str())).await {
            Ok(_) => print_new(&session, &mut shown),
            Err(e) => eprintln!("could not open conversation {id}: {e}"),
        }
    }

    println!("Type a message, or /help for commands.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        };
        let Some(line) = line else {
            break;
        };
        let command = match repl::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                eprintln!("{message}");
                continue;
            }
        };

        let keep_going = tokio::select! {
            result = dispatch(command, &session, &transport, &mut shown) => match result {
                Ok(keep_going) => keep_going,
                Err(message) => {
                    eprintln!("{message}");
                    true
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                false
            }
        };
        if !keep_going {
            break;
        }
    }

    let closed = session.shutdown();
    tracing::info!(closed_streams = closed, "Shutting down");
    printer.abort();
    Ok(())
}

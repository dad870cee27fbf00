//! Parlor terminal client.
//!
//! Run with: `cargo run --bin parlor`
//!
//! Type a message to send it. Ctrl+C stops the pending reply; the stopped
//! prompt can then be retried, edited or dismissed. `/help` lists commands.

use std::io::Write;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;

use parlor_chat::core::{
    ChatConfig, ChatMessage, ConversationId, Priority, Role, UserId, catalog, find_model,
};
use parlor_chat::session::{IdentityProvider, SessionController, SessionError, TurnOutcome};
use parlor_chat::start_parlor::{self, ClientSession};
use parlor_chat::store::ConversationMeta;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::Level;

const HELP: &str = "\
  /retry            resend the stopped prompt
  /edit             print the stopped prompt for editing and clear it
  /dismiss          forget the stopped prompt
  /new              start a new conversation
  /list             list saved conversations
  /load <n|id>      open a saved conversation
  /delete <n|id>    delete a saved conversation
  /sync             save unsaved messages now
  /login [id]       sign in (a fresh identity when no id is given)
  /logout           sign out
  /models           list models
  /model <id>       pick the model
  /priority <p>     pick the priority (high, medium, low)
  /quit             exit";

/// Mutable client-side selections.
struct Prefs {
    model: String,
    priority: Priority,
    listed: Vec<ConversationMeta>,
}

fn main() -> ExitCode {
    start_parlor::init_tracing(Level::WARN);

    let config = ChatConfig::from_env();
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    rt.block_on(async move {
        let session = match start_parlor::open_session(&config).await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!("Failed to open session: {e}");
                return ExitCode::from(1);
            }
        };
        let prefs = Prefs {
            model: config.defaults.model.clone(),
            priority: config.defaults.priority,
            listed: Vec::new(),
        };
        match repl(session, prefs).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!("Terminal error: {e}");
                ExitCode::from(1)
            }
        }
    })
}

async fn repl(session: ClientSession, mut prefs: Prefs) -> std::io::Result<()> {
    let controller = Arc::clone(&session.controller);
    println!("Parlor v{} ({} / {})", env!("CARGO_PKG_VERSION"), prefs.model, prefs.priority);
    if session.identity.current().is_none() {
        println!("  Signed out: use /login before sending messages.");
    }
    print_transcript(&controller.messages().await);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            let (name, arg) = command
                .split_once(char::is_whitespace)
                .map_or((command, ""), |(name, arg)| (name, arg.trim()));
            if name == "quit" || name == "exit" {
                break;
            }
            run_command(&session, &mut prefs, name, arg).await;
            continue;
        }

        let handle = {
            let controller = Arc::clone(&controller);
            let (content, model, priority) = (line.to_string(), prefs.model.clone(), prefs.priority);
            tokio::spawn(async move { controller.submit(&content, &model, priority).await })
        };
        match drive(&controller, handle).await {
            Some(Ok(outcome)) => report(&controller, outcome).await,
            Some(Err(err)) => println!("  ! {err}"),
            None => {}
        }
    }

    println!("Bye.");
    Ok(())
}

/// Wait for a spawned turn, forwarding Ctrl+C to the controller.
async fn drive<T>(controller: &SessionController, mut handle: JoinHandle<T>) -> Option<T> {
    loop {
        tokio::select! {
            joined = &mut handle => {
                return match joined {
                    Ok(value) => Some(value),
                    Err(e) => {
                        tracing::error!("Turn task failed: {e}");
                        None
                    }
                };
            }
            signal = tokio::signal::ctrl_c() => {
                if signal.is_ok() && controller.cancel().await {
                    println!("  Stopping...");
                }
            }
        }
    }
}

async fn report(controller: &SessionController, outcome: TurnOutcome) {
    match outcome {
        TurnOutcome::Replied | TurnOutcome::Failed => {
            if let Some(last) = controller.messages().await.last() {
                print_message(last);
            }
        }
        TurnOutcome::Stopped => {
            println!("  Stopped. /retry to resend, /edit to change it, /dismiss to drop it.");
        }
        TurnOutcome::Discarded => {}
    }
}

async fn run_command(session: &ClientSession, prefs: &mut Prefs, name: &str, arg: &str) {
    let controller = &session.controller;
    match name {
        "help" => println!("{HELP}"),
        "retry" => {
            let handle = {
                let controller = Arc::clone(controller);
                tokio::spawn(async move { controller.retry_stopped().await })
            };
            match drive(controller, handle).await {
                Some(Ok(Some(outcome))) => report(controller, outcome).await,
                Some(Ok(None)) => println!("  Nothing to retry."),
                Some(Err(err)) => println!("  ! {err}"),
                None => {}
            }
        }
        "edit" => match controller.edit_stopped().await {
            Some(content) => println!("  Edit and send again:\n{content}"),
            None => println!("  Nothing to edit."),
        },
        "dismiss" => {
            if !controller.dismiss_stopped().await {
                println!("  Nothing to dismiss.");
            }
        }
        "new" => report_result(controller.start_new().await, "  New conversation."),
        "list" => match controller.list_conversations().await {
            Ok(list) => {
                if list.is_empty() {
                    println!("  No saved conversations.");
                }
                for (index, meta) in list.iter().enumerate() {
                    println!(
                        "  {:>2}. {} ({} messages, {})",
                        index + 1,
                        meta.title,
                        meta.message_count,
                        meta.updated_at.format("%Y-%m-%d %H:%M")
                    );
                }
                prefs.listed = list;
            }
            Err(err) => println!("  ! {err}"),
        },
        "load" => match resolve_conversation(prefs, arg) {
            Some(id) => {
                let result = controller.load_conversation(id).await;
                let loaded = result.is_ok();
                report_result(result, "  Loaded.");
                if loaded {
                    print_transcript(&controller.messages().await);
                }
            }
            None => println!("  Usage: /load <n|id> (run /list first)"),
        },
        "delete" => match resolve_conversation(prefs, arg) {
            Some(id) => {
                report_result(controller.delete_conversation(id).await, "  Deleted.");
                prefs.listed.retain(|meta| meta.id != id);
            }
            None => println!("  Usage: /delete <n|id> (run /list first)"),
        },
        "sync" => match controller.reconcile_now().await {
            Ok(true) => println!("  Everything is saved."),
            Ok(false) => println!("  Some messages are still unsaved."),
            Err(err) => println!("  ! {err}"),
        },
        "login" => {
            let user = if arg.is_empty() {
                Some(UserId::new())
            } else {
                UserId::from_str(arg).ok()
            };
            match user {
                Some(user) => {
                    session.identity.sign_in(user);
                    println!("  Signed in as {user}");
                    if let Ok(false) = controller.reconcile_now().await {
                        println!("  Some messages could not be saved yet; try /sync later.");
                    }
                }
                None => println!("  Invalid identity: {arg}"),
            }
        }
        "logout" => {
            session.identity.sign_out();
            prefs.listed.clear();
            println!("  Signed out.");
        }
        "models" => {
            for model in catalog() {
                let marker = if model.id == prefs.model { '*' } else { ' ' };
                let thinking = if model.is_thinking { " [thinking]" } else { "" };
                println!("  {marker} {:<26} {} ({}){thinking}", model.id, model.name, model.provider);
            }
        }
        "model" => match find_model(arg) {
            Some(model) => {
                prefs.model = model.id.to_string();
                println!("  Model: {}", model.name);
            }
            None => println!("  Unknown model: {arg} (see /models)"),
        },
        "priority" => match Priority::from_str(arg) {
            Ok(priority) => {
                prefs.priority = priority;
                println!("  Priority: {priority}");
            }
            Err(_) => println!("  Priority must be high, medium or low"),
        },
        _ => println!("  Unknown command /{name}; try /help"),
    }
}

fn resolve_conversation(prefs: &Prefs, arg: &str) -> Option<ConversationId> {
    if let Ok(index) = arg.parse::<usize>() {
        return index
            .checked_sub(1)
            .and_then(|i| prefs.listed.get(i))
            .map(|meta| meta.id);
    }
    ConversationId::from_str(arg).ok()
}

fn report_result(result: Result<(), SessionError>, done: &str) {
    match result {
        Ok(()) => println!("{done}"),
        Err(err) => println!("  ! {err}"),
    }
}

fn print_transcript(messages: &[ChatMessage]) {
    for message in messages {
        print_message(message);
    }
}

fn print_message(message: &ChatMessage) {
    let label = match (message.role, message.is_error) {
        (Role::User, _) => "you".to_string(),
        (Role::Assistant, true) => "error".to_string(),
        (Role::Assistant, false) => message.model.clone().unwrap_or_else(|| "assistant".to_string()),
    };
    let unsaved = if message.is_unsaved() { " (unsaved)" } else { "" };
    println!("[{label}]{unsaved}\n{}\n", message.content);
}

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use lib::backend::{AuthBackend, AuthError, ChatBackend, FirebaseBackend, MemoryBackend};
use lib::config::{self, Config};
use lib::grouping;
use lib::members::MembersPanel;
use lib::model::{AuthUser, MessageScope, UserProfile};
use lib::view::{ChatView, SendOutcome};
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Parser)]
#[command(name = "chatverse")]
#[command(about = "ChatVerse CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init {
        /// Config file path (default: CHATVERSE_CONFIG_PATH or ~/.chatverse/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Register a new account and its roster profile.
    Signup {
        /// Config file path (default: CHATVERSE_CONFIG_PATH or ~/.chatverse/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Account email. Prompted when omitted.
        #[arg(long)]
        email: Option<String>,

        /// Display name shown next to your messages. Prompted when omitted.
        #[arg(long)]
        name: Option<String>,
    },

    /// Sign in and chat (shared room, /dm for private chats).
    Chat {
        /// Config file path (default: CHATVERSE_CONFIG_PATH or ~/.chatverse/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Account email. Prompted when omitted.
        #[arg(long)]
        email: Option<String>,

        /// Use the in-memory demo backend instead of a configured project.
        #[arg(long)]
        demo: bool,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("chatverse {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Signup { config, email, name }) => {
            if let Err(e) = run_signup(config, email, name).await {
                log::error!("signup failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Chat { config, email, demo }) => {
            if let Err(e) = run_chat(config, email, demo).await {
                log::error!("chat failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(config::default_config_path);
    let dir = lib::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

/// Prompt on stdout and read one line from stdin (used before the event loop
/// starts; blocking is fine here).
fn prompt(label: &str) -> anyhow::Result<String> {
    use std::io::Write;
    print!("{}: ", label);
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line).context("reading stdin")?;
    Ok(line.trim().to_string())
}

/// Build the service handles: the configured Firebase project, or the
/// in-memory demo backend when requested (or when no project is configured).
async fn build_backends(
    config: &Config,
    demo: bool,
) -> anyhow::Result<(Arc<dyn AuthBackend>, Arc<dyn ChatBackend>, bool)> {
    if !demo && config::has_backend_project(config) {
        let backend = Arc::new(FirebaseBackend::from_config(config)?);
        let auth: Arc<dyn AuthBackend> = backend.clone();
        let chat: Arc<dyn ChatBackend> = backend;
        return Ok((auth, chat, false));
    }
    let backend = Arc::new(MemoryBackend::new());
    seed_demo(backend.as_ref()).await?;
    let auth: Arc<dyn AuthBackend> = backend.clone();
    let chat: Arc<dyn ChatBackend> = backend;
    Ok((auth, chat, true))
}

/// Seed the demo backend with a second member so the room and roster have
/// something to show.
async fn seed_demo(backend: &MemoryBackend) -> anyhow::Result<()> {
    let bot = backend
        .sign_up("miles@chatverse.app", "demo-pass", "Miles")
        .await?;
    backend
        .upsert_user(&UserProfile {
            uid: bot.uid.clone(),
            name: "Miles".to_string(),
            photo_url: None,
            status: Some("Showing you around".to_string()),
        })
        .await?;
    backend
        .send_message(
            &MessageScope::Room,
            lib::backend::Draft::new(&bot, "Welcome to the ChatVerse demo room!"),
        )
        .await?;
    backend.sign_out().await;
    Ok(())
}

async fn run_signup(
    config_path: Option<std::path::PathBuf>,
    email: Option<String>,
    name: Option<String>,
) -> anyhow::Result<()> {
    let (config, _) = config::load_config(config_path)?;
    let (auth, chat, demo) = build_backends(&config, false).await?;
    if demo {
        println!("no backend project configured; registering against the demo backend");
    }
    let email = match email {
        Some(e) => e,
        None => prompt("Email")?,
    };
    let name = match name {
        Some(n) => n,
        None => prompt("Name")?,
    };
    let password = prompt("Password")?;
    let user = match auth.sign_up(&email, &password, &name).await {
        Ok(user) => user,
        Err(e) => {
            // Provider messages are shown verbatim; no retry.
            println!("{}", e);
            std::process::exit(1);
        }
    };
    chat.upsert_user(&UserProfile {
        uid: user.uid.clone(),
        name: user.sender_name().to_string(),
        photo_url: None,
        status: config.profile.status.clone(),
    })
    .await
    .context("writing roster profile")?;
    println!("Signup successful — welcome, {}", user.sender_name());
    Ok(())
}

async fn run_chat(
    config_path: Option<std::path::PathBuf>,
    email: Option<String>,
    demo: bool,
) -> anyhow::Result<()> {
    let (config, _) = config::load_config(config_path)?;
    let (auth, chat, is_demo) = build_backends(&config, demo).await?;
    if is_demo {
        println!("running against the in-memory demo backend (sign up with any email)");
    }

    let email = match email {
        Some(e) => e,
        None => prompt("Email")?,
    };
    let password = prompt("Password")?;
    let user = match auth.sign_in(&email, &password).await {
        Ok(user) => user,
        Err(e @ AuthError::Rejected(_)) if is_demo => {
            // Demo convenience: unknown accounts are created on the fly.
            log::debug!("demo sign-in failed ({}), registering instead", e);
            let name = prompt("Name")?;
            auth.sign_up(&email, &password, &name)
                .await
                .map_err(|e| anyhow::anyhow!("{}", e))?
        }
        Err(e) => {
            println!("{}", e);
            std::process::exit(1);
        }
    };
    chat.upsert_user(&UserProfile {
        uid: user.uid.clone(),
        name: user.sender_name().to_string(),
        photo_url: None,
        status: config.profile.status.clone(),
    })
    .await
    .context("writing roster profile")?;

    println!("Signed in as {} — type /help for commands", user.sender_name());
    run_session(auth, chat, user).await
}

enum Event {
    Line(String),
    Snapshot,
    Eof,
}

/// Waiting-for-input states of the session loop.
enum Mode {
    Chatting,
    ConfirmDelete,
}

/// Forward live-query wakeups for the current scope into the event channel.
fn spawn_notifier(
    chat: Arc<dyn ChatBackend>,
    scope: MessageScope,
    tx: mpsc::Sender<Event>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let sub = chat.subscribe_messages(&scope).await;
        let mut updates = Box::pin(sub.updates());
        while updates.next().await.is_some() {
            if tx.send(Event::Snapshot).await.is_err() {
                return;
            }
        }
    })
}

fn spawn_stdin_reader(tx: mpsc::Sender<Event>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(Event::Line(line)).await.is_err() {
                return;
            }
        }
        let _ = tx.send(Event::Eof).await;
    })
}

/// Print rows starting at `from`, with day separators where the label flips.
fn print_rows(view: &ChatView, from: usize) -> usize {
    let today = chrono::Local::now().date_naive();
    let rows = view.rows(today, grouping::local_day);
    for row in rows.iter().skip(from) {
        if let Some(ref label) = row.separator {
            println!("―――― {} ――――", label);
        }
        let time = row
            .message
            .created_at
            .map(|ts| ts.with_timezone(&chrono::Local).format("%-I:%M %p").to_string())
            .unwrap_or_else(|| "…".to_string());
        let marker = if row.outgoing { "me" } else { row.message.sender_name.as_str() };
        if let Some(ref reply) = row.message.reply_to {
            println!("    ↪ {}: {}", reply.sender_name, reply.text);
        }
        println!("[{} {}] {}", time, marker, row.body);
    }
    rows.len()
}

fn print_help() {
    println!("commands:");
    println!("  /members          list members and unread counts");
    println!("  /dm <name>        open a private chat with a member");
    println!("  /room             return to the shared room");
    println!("  /reply <n>        stage a reply to the n-th latest message");
    println!("  /noreply          dismiss the staged reply");
    println!("  /delete <n>       delete your n-th latest message (asks first)");
    println!("  /history          reprint the current conversation");
    println!("  /logout           sign out and quit");
    println!("  /quit             quit");
    println!("anything else is sent as a message");
}

async fn run_session(
    auth: Arc<dyn AuthBackend>,
    chat: Arc<dyn ChatBackend>,
    user: AuthUser,
) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::channel::<Event>(64);
    let _stdin_task = spawn_stdin_reader(tx.clone());

    let mut view = ChatView::open_room(chat.as_ref(), user.clone()).await;
    let mut notifier = spawn_notifier(chat.clone(), MessageScope::Room, tx.clone());
    let mut printed = print_rows(&view, 0);
    let mut mode = Mode::Chatting;

    println!("— shared room —");

    while let Some(event) = rx.recv().await {
        match event {
            Event::Snapshot => {
                printed = print_rows(&view, printed);
            }
            Event::Eof => break,
            Event::Line(line) => {
                if let Mode::ConfirmDelete = mode {
                    mode = Mode::Chatting;
                    if line.trim().eq_ignore_ascii_case("y") {
                        if view.confirm_delete(chat.as_ref()).await {
                            println!("message deleted");
                        } else if let Some(err) = view.last_error() {
                            println!("delete failed: {}", err);
                        }
                    } else {
                        view.cancel_delete();
                        println!("kept");
                    }
                    printed = print_rows(&view, printed);
                    continue;
                }

                let trimmed = line.trim();
                match trimmed.split_once(' ').map_or((trimmed, ""), |(c, r)| (c, r.trim())) {
                    ("/quit", _) => break,
                    ("/logout", _) => {
                        auth.sign_out().await;
                        println!("signed out");
                        break;
                    }
                    ("/help", _) => print_help(),
                    ("/history", _) => {
                        printed = print_rows(&view, 0);
                    }
                    ("/members", _) => {
                        show_members(chat.clone(), &user).await;
                    }
                    ("/room", _) => {
                        notifier.abort();
                        view = ChatView::open_room(chat.as_ref(), user.clone()).await;
                        notifier = spawn_notifier(chat.clone(), MessageScope::Room, tx.clone());
                        println!("— shared room —");
                        printed = print_rows(&view, 0);
                    }
                    ("/dm", name) if !name.is_empty() => {
                        match resolve_member(chat.as_ref(), &user, name).await {
                            Some(member) => {
                                match ChatView::open_private(chat.as_ref(), user.clone(), &member.uid)
                                    .await
                                {
                                    Ok(new_view) => {
                                        notifier.abort();
                                        view = new_view;
                                        let scope = view.scope().clone();
                                        notifier = spawn_notifier(chat.clone(), scope, tx.clone());
                                        println!("— private chat with {} —", member.name);
                                        printed = print_rows(&view, 0);
                                    }
                                    Err(e) => println!("{}", e),
                                }
                            }
                            None => println!("no member named '{}'", name),
                        }
                    }
                    ("/reply", n) => match nth_latest(&view, n) {
                        Some(message) => {
                            view.stage_reply(&message);
                            match view.staged_reply() {
                                Some(reply) => {
                                    println!("replying to {}: {}", reply.sender_name, reply.text)
                                }
                                None => println!("that message cannot be replied to"),
                            }
                        }
                        None => println!("usage: /reply <n>"),
                    },
                    ("/noreply", _) => {
                        view.clear_reply();
                        println!("reply dismissed");
                    }
                    ("/delete", n) => match nth_latest(&view, n) {
                        Some(message) => {
                            if view.request_delete(&message.id) {
                                println!("delete \"{}\"? [y/N]", message.text);
                                mode = Mode::ConfirmDelete;
                            } else {
                                println!("you can only delete your own messages");
                            }
                        }
                        None => println!("usage: /delete <n>"),
                    },
                    _ if trimmed.starts_with('/') => {
                        println!("unknown command {} (try /help)", trimmed);
                    }
                    _ => {
                        view.set_compose(line.clone());
                        match view.send(chat.as_ref()).await {
                            SendOutcome::Sent(_) => {
                                printed = print_rows(&view, printed);
                            }
                            SendOutcome::Rejected => {}
                            SendOutcome::Failed(err) => {
                                println!("send failed: {} (message kept, try again)", err);
                            }
                        }
                    }
                }
            }
        }
    }

    notifier.abort();
    Ok(())
}

/// The n-th latest message (1 = most recent).
fn nth_latest(view: &ChatView, arg: &str) -> Option<lib::model::Message> {
    let n: usize = arg.parse().ok().filter(|n| *n >= 1)?;
    let messages = view.messages();
    messages.len().checked_sub(n).map(|i| messages[i].clone())
}

async fn resolve_member(
    chat: &dyn ChatBackend,
    viewer: &AuthUser,
    name: &str,
) -> Option<UserProfile> {
    let roster = match chat.list_users().await {
        Ok(roster) => roster,
        Err(e) => {
            println!("could not load members: {}", e);
            return None;
        }
    };
    let query = name.to_lowercase();
    roster
        .into_iter()
        .filter(|m| m.uid != viewer.uid)
        .find(|m| m.name.to_lowercase() == query || m.uid == name)
}

/// One-shot roster listing with unread badges.
async fn show_members(chat: Arc<dyn ChatBackend>, user: &AuthUser) {
    let mut panel = match MembersPanel::open(chat, user).await {
        Ok(panel) => panel,
        Err(e) => {
            println!("could not load members: {}", e);
            return;
        }
    };
    // Give the unread watchers one beat to report their first counts.
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    panel.poll_counts();
    println!("members ({}):", panel.members().len());
    for member in panel.visible() {
        let you = if member.uid == user.uid { " (you)" } else { "" };
        let unread = panel.unread(&member.uid);
        let badge = if unread > 0 {
            format!("  [{} unread]", unread)
        } else {
            String::new()
        };
        println!("  {}{} — {}{}", member.name, you, member.display_status(), badge);
    }
}

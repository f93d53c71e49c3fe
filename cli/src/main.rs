mod commands;
mod printer;

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use chatsite_core::{
    AppAction, AppReconciler, AppUpdate, AuthFailureHook, ChatApp, SessionEvent, SessionObserver,
};
use clap::Parser;
use flume::Sender;

use commands::{parse_command, Command, HELP};
use printer::Printer;

#[derive(Debug, Parser)]
#[command(name = "chatsite")]
#[command(about = "Terminal client for chatsite direct messages and payment requests")]
struct Cli {
    /// Data directory; chatsite_config.json is read from here
    #[arg(long, default_value = ".chatsite")]
    data_dir: PathBuf,

    /// REST origin, e.g. https://chat.example.com (also used to derive the websocket URL)
    #[arg(long)]
    api_base_url: Option<String>,

    /// Explicit websocket URL; `/ws` is appended if missing
    #[arg(long)]
    ws_url: Option<String>,

    /// Session token from the login endpoint
    #[arg(long, env = "CHATSITE_TOKEN", hide_env_values = true)]
    token: String,
}

/// Merge CLI overrides into the config file, keeping unrelated keys.
fn write_config(data_dir: &Path, api_base_url: Option<&str>, ws_url: Option<&str>) -> anyhow::Result<()> {
    let path = data_dir.join(chatsite_core::config_file_name());
    let mut config: serde_json::Value = match std::fs::read(&path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .with_context(|| format!("parse {}", path.display()))?,
        Err(_) => serde_json::from_str(&chatsite_core::default_config_json())?,
    };
    if !config.is_object() {
        anyhow::bail!("{} must contain a JSON object", path.display());
    }
    if let Some(url) = api_base_url {
        config["api_base_url"] = serde_json::Value::String(url.to_string());
    }
    if let Some(url) = ws_url {
        config["ws_base_url"] = serde_json::Value::String(url.to_string());
    }
    std::fs::write(&path, serde_json::to_vec_pretty(&config)?)
        .with_context(|| format!("write {}", path.display()))
}

struct ChannelReconciler {
    tx: Sender<AppUpdate>,
}

impl AppReconciler for ChannelReconciler {
    fn reconcile(&self, update: AppUpdate) {
        let _ = self.tx.send(update);
    }
}

struct PresencePrinter;

impl SessionObserver for PresencePrinter {
    fn on_session_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::PresenceChanged { peer, online } => {
                println!("* {peer} is {}", if online { "online" } else { "offline" });
            }
            SessionEvent::RelayError { body } => eprintln!("relay: {body}"),
            _ => {}
        }
    }
}

struct ExitOnAuthFailure;

impl AuthFailureHook for ExitOnAuthFailure {
    fn on_auth_failure(&self, reason: String) {
        eprintln!("session rejected ({reason}); log in again and pass a fresh --token");
        std::process::exit(2);
    }
}

fn main() -> anyhow::Result<()> {
    // Installed before the core so its own subscriber init is a no-op.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    std::fs::create_dir_all(&cli.data_dir)
        .with_context(|| format!("create data dir {}", cli.data_dir.display()))?;
    write_config(&cli.data_dir, cli.api_base_url.as_deref(), cli.ws_url.as_deref())?;

    let app = ChatApp::new(cli.data_dir.to_string_lossy().to_string());
    app.set_auth_failure_hook(Box::new(ExitOnAuthFailure));
    app.add_session_observer(Box::new(PresencePrinter));

    let (update_tx, update_rx) = flume::unbounded::<AppUpdate>();
    app.listen_for_updates(Box::new(ChannelReconciler { tx: update_tx }));
    let app_for_printer = app.clone();
    thread::spawn(move || {
        let mut printer = Printer::default();
        while let Ok(AppUpdate::FullState(state)) = update_rx.recv() {
            for line in printer.render(&state) {
                println!("{line}");
            }
            if state.toast.is_some() {
                app_for_printer.dispatch(AppAction::ClearToast);
            }
        }
    });

    tracing::info!(data_dir = %cli.data_dir.display(), "connecting");
    app.dispatch(AppAction::Connect { token: cli.token });
    run_repl(&app)
}

fn run_repl(app: &Arc<ChatApp>) -> anyhow::Result<()> {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("read stdin")?;
        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(msg) => {
                eprintln!("{msg}");
                continue;
            }
        };
        match command {
            Command::Open { peer } => app.dispatch(AppAction::OpenChat { peer }),
            Command::Close => app.dispatch(AppAction::CloseChat),
            Command::Msg { peer, body } => app.dispatch(AppAction::SendMessage { peer, body }),
            Command::Say { body } => match app.state().active_peer {
                Some(peer) => app.dispatch(AppAction::SendMessage { peer, body }),
                None => eprintln!("no chat open; use /open <peer> or /msg <peer> <text>"),
            },
            Command::Pay { peer, amount } => {
                app.dispatch(AppAction::SendPaymentRequest { peer, amount })
            }
            Command::Settle { peer, request_id } => {
                app.dispatch(AppAction::SettlePaymentRequest { peer, request_id })
            }
            Command::Who => {
                let online = app.state().presence;
                if online.is_empty() {
                    println!("nobody online");
                } else {
                    println!("online: {}", online.join(", "));
                }
            }
            Command::Contacts => {
                for c in app.state().contacts {
                    println!(
                        "{:<20} unread={:<3} {}",
                        c.display_name,
                        c.unread_count,
                        if c.online { "online" } else { "" }
                    );
                }
            }
            Command::Help => println!("{HELP}"),
            Command::Quit => break,
        }
    }
    app.dispatch(AppAction::Disconnect);
    Ok(())
}

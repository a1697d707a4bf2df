use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use notichan::channel::{self, ChannelError, ChannelHandle, Credential};
use notichan::config::MassPredicate;
use notichan::reconnect::{ReconnectPolicy, Supervisor};
use notichan::sink::{AtomicCounter, EventSink};
use tokio::io::AsyncBufReadExt;

#[derive(Parser)]
#[command(name = "notichan")]
#[command(about = "notichan CLI", long_about = None)]
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
        /// Config file path (default: NOTICHAN_CONFIG_PATH or ~/.notichan/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Connect to the notification endpoint and print notifications as they arrive.
    /// Press Enter (or type `new`) to send an action request; `/quit` to close.
    Listen {
        /// Config file path (default: NOTICHAN_CONFIG_PATH or ~/.notichan/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// WebSocket endpoint (default from config)
        #[arg(long, short, value_name = "URL")]
        endpoint: Option<String>,

        /// Bearer token (default: NOTICHAN_TOKEN or auth.token)
        #[arg(long, short, value_name = "TOKEN")]
        token: Option<String>,

        /// Recognise mass notifications by the raw `target_action:mass_notification` marker.
        #[arg(long)]
        raw_substring: bool,
    },

    /// Run the development relay (HTTP + WebSocket notification endpoint).
    Relay {
        /// Config file path (default: NOTICHAN_CONFIG_PATH or ~/.notichan/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// WebSocket and HTTP port (default from config or 8765)
        #[arg(long, short)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("notichan {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Listen {
            config,
            endpoint,
            token,
            raw_substring,
        }) => {
            if let Err(e) = run_listen(config, endpoint, token, raw_substring).await {
                log::error!("listen failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Relay { config, port }) => {
            if let Err(e) = run_relay(config, port).await {
                log::error!("relay failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(notichan::config::default_config_path);
    let dir = notichan::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_relay(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, _) = notichan::config::load_config(config_path)?;
    if let Some(p) = port {
        config.relay.port = p;
    }
    log::info!("starting relay on {}:{}", config.relay.bind, config.relay.port);
    notichan::relay::run_relay(config.relay).await
}

/// A single channel, or one kept alive by the reconnect supervisor.
enum Listener {
    Single(ChannelHandle),
    Supervised(Supervisor),
}

impl Listener {
    fn request_mass_notification(&self) -> Result<(), ChannelError> {
        match self {
            Listener::Single(h) => h.request_mass_notification(),
            Listener::Supervised(s) => s.request_mass_notification(),
        }
    }

    fn close(&self) {
        match self {
            Listener::Single(h) => h.close(),
            Listener::Supervised(s) => s.stop(),
        }
    }

    async fn done(&mut self) {
        match self {
            Listener::Single(h) => h.closed().await,
            Listener::Supervised(s) => s.finished().await,
        }
    }
}

async fn run_listen(
    config_path: Option<std::path::PathBuf>,
    endpoint: Option<String>,
    token: Option<String>,
    raw_substring: bool,
) -> anyhow::Result<()> {
    let (config, _) = notichan::config::load_config(config_path)?;
    let endpoint = endpoint.unwrap_or_else(|| config.endpoint.url.clone());
    let token = token
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .or_else(|| notichan::config::resolve_token(&config))
        .context("no token: pass --token, set NOTICHAN_TOKEN, or set auth.token in the config")?;
    let predicate = if raw_substring {
        MassPredicate::RawSubstring
    } else {
        config.channel.mass_predicate
    };

    let (sink, mut events) = EventSink::new();
    let counter = Arc::new(AtomicCounter::default());
    let credential = Credential::new(token);

    let mut listener = if config.reconnect.enabled {
        Listener::Supervised(Supervisor::start(
            endpoint.clone(),
            credential,
            predicate,
            Arc::new(sink),
            counter.clone(),
            ReconnectPolicy::from(&config.reconnect),
        )?)
    } else {
        Listener::Single(channel::open(
            &endpoint,
            credential,
            predicate,
            Arc::new(sink),
            counter.clone(),
        )?)
    };
    println!("listening on {} (Enter = request, /quit = exit)", endpoint);

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                println!(
                    "[{}] ({}) {}",
                    event.received_at.format("%H:%M:%S"),
                    counter.get(),
                    event.kind
                );
            }
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => {
                    let input = line.trim();
                    if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
                        listener.close();
                    } else if input.is_empty() || input.eq_ignore_ascii_case("new") {
                        if let Err(e) = listener.request_mass_notification() {
                            eprintln!("request not sent: {}", e);
                        }
                    } else {
                        eprintln!("unknown input {:?} (Enter or `new` = request, /quit = exit)", input);
                    }
                }
                None => stdin_open = false,
            },
            _ = listener.done() => break,
        }
    }

    while let Ok(event) = events.try_recv() {
        println!("[{}] ({}) {}", event.received_at.format("%H:%M:%S"), counter.get(), event.kind);
    }
    println!("channel closed; {} notification(s) received", counter.get());
    Ok(())
}

mod broadcast;
mod config;
mod events;
mod server;
mod session;
mod tui;

use std::io;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use tokio::runtime::Runtime;

use config::ServerConfig;
use events::Severity;
use server::GameServer;
use tui::TuiState;

#[derive(Parser)]
#[command(name = "volley-server")]
#[command(about = "Volley session server")]
struct Args {
    #[arg(short, long)]
    bind: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    #[arg(short, long)]
    tick_rate: Option<u32>,

    #[arg(short, long)]
    max_players: Option<u8>,

    #[arg(long)]
    client_timeout_secs: Option<u64>,

    #[arg(long)]
    empty_timeout_secs: Option<u64>,

    #[arg(long)]
    headless: bool,

    #[arg(short, long, help = "JSON config file; flags override its values")]
    config: Option<PathBuf>,
}

impl Args {
    fn server_config(&self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };
        if let Some(bind) = &self.bind {
            config.bind = bind.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(tick_rate) = self.tick_rate {
            config.tick_rate = tick_rate;
        }
        if let Some(max_players) = self.max_players {
            config.max_players = max_players;
        }
        if let Some(secs) = self.client_timeout_secs {
            config.client_timeout_secs = secs;
        }
        if let Some(secs) = self.empty_timeout_secs {
            config.empty_timeout_secs = secs;
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.server_config()?;

    let runtime = Runtime::new().context("starting tokio runtime")?;

    if args.headless {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    let server = GameServer::new(&config, runtime.handle())?;

    if args.headless {
        log::info!("Server started on {}", server.local_addr());
        runtime.block_on(run_headless(&server));
        log::info!("Server shutting down");
    } else {
        run_with_tui(&server)?;
    }

    server.shutdown();
    Ok(())
}

async fn run_headless(server: &GameServer) {
    let mut interval = tokio::time::interval(Duration::from_millis(250));
    let running = server.running();

    while running.load(Ordering::SeqCst) {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    log::error!("Failed to listen for ctrl-c: {}", e);
                }
                break;
            }
            _ = interval.tick() => {
                for event in server.drain_events() {
                    match event.severity() {
                        Severity::Info => log::info!("{}", event.describe()),
                        Severity::Warn => log::warn!("{}", event.describe()),
                        Severity::Error => log::error!("{}", event.describe()),
                    }
                }
            }
        }
    }
}

fn run_with_tui(server: &GameServer) -> io::Result<()> {
    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let running = server.running();
    let mut tui_state = TuiState::new();

    tui_state.log_info(format!("Server started on {}", server.local_addr()));

    while running.load(Ordering::SeqCst) {
        for event in server.drain_events() {
            tui_state.log_event(&event);
        }

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press
                    && matches!(key.code, KeyCode::Char('q') | KeyCode::Esc)
                {
                    running.store(false, Ordering::SeqCst);
                }
            }
        }

        let stats = server.stats();
        terminal.draw(|frame| {
            tui::render(frame, &tui_state, &stats);
        })?;
    }

    tui_state.log_info("Shutting down...");

    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show)?;

    Ok(())
}

pub mod net;

use std::sync::atomic::Ordering;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;

use volley::net::GameStartData;

use net::{Client, ClientConfig, InterpolationConfig, ScriptedInput};

#[derive(Parser)]
#[command(name = "volley-client")]
#[command(about = "Headless Volley client")]
struct Args {
    #[arg(
        short,
        long,
        default_value = "127.0.0.1:4242",
        help = "Server address to connect to (host:port)"
    )]
    server: String,

    #[arg(long, default_value_t = 1)]
    session: u32,

    #[arg(short, long, default_value = "pilot")]
    name: String,

    #[arg(long, default_value_t = 600, help = "Frames to run; 0 runs until ctrl-c")]
    frames: u64,

    #[arg(long, default_value_t = net::config::DEFAULT_INTERPOLATION_SPEED)]
    interpolation_speed: f32,

    #[arg(long, help = "Ask the session to start the game once joined")]
    start: bool,
}

impl Args {
    fn client_config(&self) -> Result<ClientConfig> {
        let (host, port) = split_server(&self.server)?;
        Ok(ClientConfig {
            host,
            port,
            session_id: self.session,
            player_name: self.name.clone(),
            interpolation: InterpolationConfig {
                speed: self.interpolation_speed,
                ..InterpolationConfig::default()
            },
            ..ClientConfig::default()
        })
    }
}

fn split_server(server: &str) -> Result<(String, u16)> {
    let (host, port) = server
        .rsplit_once(':')
        .with_context(|| format!("server address '{}' is missing a port", server))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let port = port
        .parse()
        .with_context(|| format!("invalid port in '{}'", server))?;
    Ok((host.to_string(), port))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = args.client_config()?;

    let mut client = Client::connect(config.clone())?;
    client.join()?;

    let result = run(&mut client, &config, &args);
    client.disconnect();
    result
}

fn run(client: &mut Client, config: &ClientConfig, args: &Args) -> Result<()> {
    let interrupted = client.interrupt_flag();
    let script = ScriptedInput::default();
    let frame_period = config.frame_period();

    let mut frame: u64 = 0;
    let mut last_frame = Instant::now();
    let mut last_status = last_frame;
    let mut start_sent = false;

    while args.frames == 0 || frame < args.frames {
        if interrupted.load(Ordering::Acquire) {
            log::info!("Interrupted, leaving session");
            break;
        }

        let now = Instant::now();
        let dt = now.duration_since(last_frame).as_secs_f32();
        last_frame = now;

        if let Err(e) = client.frame(now, dt) {
            log::error!("{:#}", e);
            return Err(e);
        }

        if client.network().view().join_rejected {
            anyhow::bail!("session {} is full", config.session_id);
        }

        if let Some(player_id) = client.network().local_player() {
            if args.start && !start_sent {
                client.send_message(&GameStartData {
                    session_id: config.session_id,
                    stage: 1,
                })?;
                start_sent = true;
                log::info!("Player {} requested game start", player_id);
            }
            client.send_input(script.at(frame))?;
        }

        if now.duration_since(last_status) >= config.status_interval {
            last_status = now;
            log_status(client);
        }

        frame += 1;
        let elapsed = now.elapsed();
        if elapsed < frame_period {
            std::thread::sleep(frame_period - elapsed);
        }
    }

    log_status(client);
    Ok(())
}

fn log_status(client: &Client) {
    let network = client.network();
    let view = network.view();
    let stats = client.stats();
    let rtt = network
        .rtt()
        .map(|rtt| format!("{}ms", rtt.as_millis()))
        .unwrap_or_else(|| "-".to_string());

    log::info!(
        "player {:?} | mirrors {} | stage {} wave {} | score {} lives {}{} | rtt {} | {} sent / {} recv",
        network.local_player(),
        client.world().len(),
        view.stage,
        view.state.wave_number,
        view.state.score,
        view.state.lives,
        if view.game_over() { " (game over)" } else { "" },
        rtt,
        stats.packets_sent,
        stats.packets_received
    );
}

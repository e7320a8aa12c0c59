//! Headless reference client — exercises the connection state machine and
//! remote-player mirror without a renderer, the way a dedicated server has
//! no renderer either. Typed lines go out as chat `Command` packets; `/join`
//! sends the initial `JoinGame` request once connected.

use std::io::BufRead;
use std::sync::{mpsc, Arc};
use std::time::Duration;

use aeon_client::connection::{ClientConnection, ClientOutcome, ConnectionState};
use aeon_client::mirror::{MirrorConfig, RemotePlayerMirror};
use aeon_common::config::ClientConfig;
use aeon_common::vec3::Vec3;
use aeon_script::client_resource::ClientResourceRuntime;
use aeon_sys::UdpClientLink;

const TICK: Duration = Duration::from_millis(33);

fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    aeon_common::logging::init_logging("info", "", true);

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "client.toml".to_string());
    let config = match std::fs::read_to_string(&config_path) {
        Ok(text) => ClientConfig::parse(&text)?,
        Err(_) => ClientConfig::default(),
    };
    let player_name = std::env::args().nth(2).unwrap_or_else(|| "Player".to_string());

    tracing::info!(host = %config.server_host, port = config.server_port, "connecting");

    let link = UdpClientLink::connect(&config.server_host, config.server_port, String::new())?;
    let runtime = Arc::new(ClientResourceRuntime::new()?);
    runtime.install_bindings()?;

    let mirror = RemotePlayerMirror::new(MirrorConfig {
        teleport_snap_distance: config.teleport_snap_distance,
        interpolate_snap_distance: config.interpolate_snap_distance,
        high_detail_radius: config.high_detail_radius,
        ..MirrorConfig::default()
    });

    let mut conn = ClientConnection::new(Box::new(link), runtime.clone(), mirror);
    let stdin_rx = spawn_stdin_reader();
    let mut joined = false;

    loop {
        for outcome in conn.pulse() {
            match outcome {
                ClientOutcome::StateChanged(ConnectionState::Connected) if !joined => {
                    joined = true;
                    conn.join_game(0, 0, 0, 0, 0, Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0), player_name.clone());
                }
                ClientOutcome::StateChanged(state) => tracing::info!(?state, "connection state changed"),
                ClientOutcome::ChatMessage { sender, text, is_whisper } => {
                    println!("[{}{}] {}", if is_whisper { "whisper " } else { "" }, sender.map_or("server".to_string(), |s| s.to_string()), text);
                }
                ClientOutcome::ServerMessage(text) => println!("* {text}"),
            }
        }

        while let Ok(line) = stdin_rx.try_recv() {
            conn.send_command(&line);
        }

        runtime.process_timers();
        std::thread::sleep(TICK);
    }
}

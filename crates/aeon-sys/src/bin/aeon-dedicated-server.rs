//! Dedicated server entry point — grounded in `sys_win.rs`'s `WinMain`-derived
//! main loop shape (init, then poll/frame/sleep until told to stop), adapted
//! to a headless tick loop instead of a windowed message pump since this
//! server has no renderer to drive.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use aeon_common::config::ServerConfig;
use aeon_server::ServerContext;
use aeon_sys::{UdpTransportAdapter, UdpTransportConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "server.toml".to_string());
    let config = ServerConfig::load(&PathBuf::from(&config_path))?;

    aeon_common::logging::init_logging(&config.log_level, &config.log_file, config.log_to_stdout);
    tracing::info!(name = %config.name, port = config.port, "starting server");

    let transport = UdpTransportAdapter::bind(
        config.port,
        UdpTransportConfig {
            password: String::new(),
            max_slots: config.slots,
            ..UdpTransportConfig::default()
        },
    )?;

    let mut ctx = ServerContext::new(
        config.clone(),
        Box::new(transport),
        PathBuf::from("bans.json"),
        PathBuf::from("resources"),
    )?;
    ctx.sync_bans();

    let started = Instant::now();
    let frame_sleep = Duration::from_millis(config.frame_sleep_ms);
    loop {
        let now_ms = started.elapsed().as_millis() as u64;
        ctx.step(now_ms);
        std::thread::sleep(frame_sleep);
    }
}

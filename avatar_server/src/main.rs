//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p avatar_server -- [--addr 127.0.0.1:41000] [--tick-hz 64] [--catalog weapons.json]
//!
//! The server listens for peer connections, runs the fixed timestep
//! simulation, and replicates avatar state to connected peers.
//!
//! Console commands:
//!   status  - Show peers and avatars
//!   quit    - Shutdown server

use std::env;
use std::io::{BufRead, Write};

use anyhow::Context;
use avatar_server::movement::FlatGround;
use avatar_server::AvatarServer;
use avatar_shared::combat::WeaponCatalog;
use avatar_shared::config::SimConfig;
use tokio::sync::mpsc;
use tracing::info;

fn parse_args() -> SimConfig {
    let mut cfg = SimConfig::default();
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.server_addr = args[i + 1].clone();
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().unwrap_or(64);
                i += 2;
            }
            "--catalog" if i + 1 < args.len() => {
                cfg.catalog_path = args[i + 1].clone();
                i += 2;
            }
            _ => i += 1,
        }
    }
    cfg
}

fn load_catalog(cfg: &SimConfig) -> anyhow::Result<WeaponCatalog> {
    if cfg.catalog_path.is_empty() {
        return Ok(WeaponCatalog::builtin());
    }
    let raw = std::fs::read_to_string(&cfg.catalog_path)
        .with_context(|| format!("read catalog {}", cfg.catalog_path))?;
    WeaponCatalog::from_json_str(&raw).context("parse catalog")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args();
    let catalog = load_catalog(&cfg)?;
    info!(
        addr = %cfg.server_addr,
        tick_hz = cfg.tick_hz,
        weapons = catalog.len(),
        "Starting server"
    );

    let mut server = AvatarServer::new(cfg.clone(), catalog, Box::new(FlatGround::default()))
        .await
        .context("create server")?;
    let local = server.local_addr()?;
    info!(%local, "Server listening");

    // Set up console input channel.
    let (console_tx, console_rx) = mpsc::channel::<String>(32);
    server.set_console_input(console_rx);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            if stdin.lock().read_line(&mut line).is_err() {
                break;
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Server ready. Type 'status' for info, 'quit' to exit.");
    println!();

    // Main server loop.
    let tick_interval = std::time::Duration::from_secs_f32(cfg.tick_dt());
    let mut next_tick = tokio::time::Instant::now();

    loop {
        // Accept new peers (non-blocking).
        if let Ok(Some(peer_id)) = server.try_accept(std::time::Duration::from_millis(1)).await {
            info!(peer_id = ?peer_id, "New peer accepted");
        }

        server.step(tick_interval.as_secs_f32()).await?;

        // Wait for next tick.
        next_tick += tick_interval;
        tokio::time::sleep_until(next_tick).await;
    }
}

//! Standalone client binary.
//!
//! Usage:
//!   cargo run -p avatar_client -- [--addr 127.0.0.1:41000]
//!
//! The client connects to the server, spawns its avatar, and drives it from
//! console commands (a stand-in for a real input device).
//!
//! Console commands:
//!   move <x> <y>     - Hold a move direction (device axes, camera-relative)
//!   stop             - Release movement
//!   sprint on|off    - Hold/release sprint
//!   crouch on|off    - Hold/release crouch
//!   jump             - Press jump once
//!   camera <deg>     - Set camera yaw in degrees
//!   attack [heavy|charged] - Request an attack
//!   equip <id>       - Request a weapon equip
//!   aim on|off       - Self-report aiming
//!   block on|off     - Self-report blocking
//!   status           - Show replica state
//!   disconnect       - Leave the server
//!   quit             - Exit client

use std::env;
use std::io::{BufRead, Write};
use std::time::Duration;

use anyhow::Context;
use avatar_client::client::{AvatarClient, ClientState};
use avatar_client::input::{CameraBasis, RawInput};
use avatar_shared::config::SimConfig;
use avatar_shared::math::Vec2;
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
            _ => i += 1,
        }
    }
    cfg
}

/// Held input state driven by console commands. Mimics a device: held
/// fields persist across frames, `jump` is a one-frame edge.
#[derive(Default)]
struct HeldInput {
    move_axes: Vec2,
    sprint: bool,
    crouch: bool,
    jump_edge: bool,
    camera_yaw: f32,
}

impl HeldInput {
    /// Consumes the jump edge into a one-frame raw sample.
    fn frame(&mut self) -> RawInput {
        let raw = RawInput {
            move_axes: self.move_axes,
            sprint_held: self.sprint,
            crouch_held: self.crouch,
            jump_pressed: self.jump_edge,
            ..Default::default()
        };
        self.jump_edge = false;
        raw
    }

    /// Handles movement-level console commands. Returns `None` when the
    /// line is not a movement command.
    fn exec(&mut self, tokens: &[&str]) -> Option<String> {
        match tokens[0] {
            "move" => {
                let x = tokens.get(1).and_then(|t| t.parse().ok()).unwrap_or(0.0);
                let y = tokens.get(2).and_then(|t| t.parse().ok()).unwrap_or(0.0);
                self.move_axes = Vec2::new(x, y);
                Some(format!("Moving ({x}, {y})"))
            }
            "stop" => {
                self.move_axes = Vec2::ZERO;
                Some("Stopped".to_string())
            }
            "sprint" => {
                self.sprint = tokens.get(1).copied() == Some("on");
                Some(format!("Sprint {}", self.sprint))
            }
            "crouch" => {
                self.crouch = tokens.get(1).copied() == Some("on");
                Some(format!("Crouch {}", self.crouch))
            }
            "jump" => {
                self.jump_edge = true;
                Some("Jump queued".to_string())
            }
            "camera" => {
                let deg: f32 = tokens.get(1).and_then(|t| t.parse().ok()).unwrap_or(0.0);
                self.camera_yaw = deg.to_radians();
                Some(format!("Camera yaw {deg} deg"))
            }
            _ => None,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args();
    info!(server = %cfg.server_addr, "Starting client");

    let mut client = AvatarClient::connect(&cfg).await.context("connect")?;
    client.send_ready().await?;

    // Set up console input channel.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);

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

    println!("Client connected. Type 'status' for info, 'quit' to exit.");
    println!();

    let mut held = HeldInput::default();

    // Presentation frames run at their own rate, unrelated to the authority
    // tick rate.
    let frame_interval = Duration::from_secs_f32(1.0 / 60.0);
    let mut frame: u64 = 0;

    loop {
        // Process console commands.
        while let Ok(line) = console_rx.try_recv() {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.is_empty() {
                continue;
            }
            if let Some(out) = held.exec(&tokens) {
                println!("{}", out);
                continue;
            }
            match client.exec_console(&line).await {
                Ok(output) => {
                    for line in output {
                        println!("{}", line);
                    }
                }
                Err(e) => {
                    println!("Error: {}", e);
                }
            }
        }

        // Check for control messages (spawns, disconnect).
        client.poll_reliable().await?;

        if client.state == ClientState::Disconnected {
            println!("Disconnected from server.");
            break;
        }

        // Sample and ship intent, then apply replicated state.
        let camera = CameraBasis::from_yaw(held.camera_yaw);
        let raw = held.frame();
        if let Err(e) = client.send_input(&raw, &camera).await {
            println!("Input error: {}", e);
        }
        if let Err(e) = client.recv_update().await {
            println!("Update error: {}", e);
        }

        frame += 1;
        if frame % 120 == 0 {
            if let Some(replica) = client.local_replica() {
                let pose = replica.pose.get();
                info!(
                    x = pose.position.x,
                    y = pose.position.y,
                    z = pose.position.z,
                    grounded = pose.grounded,
                    "Local avatar"
                );
            }
        }

        tokio::time::sleep(frame_interval).await;
    }

    Ok(())
}

//! Terminal chat client for the Parley server.
//!
//! ```bash
//! parley register alice                 # prints the API key
//! parley --api-key <key> rooms
//! parley --api-key <key> create-room general
//! parley --api-key <key> join <room-id>
//! ```

mod session;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "parley", about = "Terminal client for the Parley chat server")]
struct Cli {
    /// Server address, host:port
    #[arg(long, default_value = "127.0.0.1:8080", env = "PARLEY_SERVER")]
    server: String,

    /// API key issued by `register`
    #[arg(long, env = "PARLEY_API_KEY")]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register a display name and print the issued API key
    Register {
        /// Name shown to other room members
        name: String,
    },
    /// List rooms
    Rooms,
    /// Create a named room
    CreateRoom {
        /// Room name
        name: String,
    },
    /// Join a room and chat
    Join {
        /// Room uuid, as printed by `rooms`
        room_id: String,
    },
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct RoomResponse {
    id: String,
    name: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Register { ref name } => register(&cli.server, name).await,
        Command::Rooms => list_rooms(&cli.server, &require_api_key(&cli)?).await,
        Command::CreateRoom { ref name } => {
            create_room(&cli.server, &require_api_key(&cli)?, name).await
        }
        Command::Join { ref room_id } => {
            session::run(&cli.server, &require_api_key(&cli)?, room_id).await
        }
    }
}

fn require_api_key(cli: &Cli) -> Result<String> {
    cli.api_key
        .clone()
        .context("an API key is required; pass --api-key or set PARLEY_API_KEY")
}

async fn register(server: &str, name: &str) -> Result<()> {
    let resp = reqwest::Client::new()
        .post(format!("http://{server}/register"))
        .json(&serde_json::json!({ "name": name }))
        .send()
        .await
        .context("failed to reach server")?;

    if !resp.status().is_success() {
        bail!("server returned {}", resp.status());
    }

    let body: RegisterResponse = resp.json().await?;
    println!("registered '{name}'");
    println!("api key: {}", body.api_key);
    Ok(())
}

async fn list_rooms(server: &str, api_key: &str) -> Result<()> {
    let resp = reqwest::Client::new()
        .get(format!("http://{server}/rooms"))
        .bearer_auth(api_key)
        .send()
        .await
        .context("failed to reach server")?;

    if !resp.status().is_success() {
        bail!("server returned {}", resp.status());
    }

    let rooms: Vec<RoomResponse> = resp.json().await?;
    if rooms.is_empty() {
        println!("no rooms yet; create one with `parley create-room <name>`");
        return Ok(());
    }
    for room in rooms {
        println!("{}  {}", room.id, room.name);
    }
    Ok(())
}

async fn create_room(server: &str, api_key: &str, name: &str) -> Result<()> {
    let resp = reqwest::Client::new()
        .post(format!("http://{server}/rooms"))
        .bearer_auth(api_key)
        .json(&serde_json::json!({ "name": name }))
        .send()
        .await
        .context("failed to reach server")?;

    if !resp.status().is_success() {
        bail!("server returned {}", resp.status());
    }

    let room: RoomResponse = resp.json().await?;
    println!("created room '{}' ({})", room.name, room.id);
    Ok(())
}

//! Interactive chat session over WebSocket.

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;

/// Join a room and chat until the connection ends or the user quits.
pub async fn run(server: &str, api_key: &str, room_id: &str) -> Result<()> {
    let mut request = format!("ws://{server}/ws/{room_id}")
        .into_client_request()
        .context("invalid server address")?;
    request.headers_mut().insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {api_key}")).context("invalid api key")?,
    );

    let (ws_stream, _) = connect_async(request)
        .await
        .context("failed to connect; is the server running and the room id valid?")?;

    println!("joined room {room_id}. Type messages and press Enter; Ctrl+C to leave.\n");

    let (mut write, mut read) = ws_stream.split();

    // Print everything the room sends us.
    let mut read_task = tokio::spawn(async move {
        while let Some(message) = read.next().await {
            match message {
                Ok(Message::Text(text)) => println!("{text}"),
                Ok(Message::Close(_)) => {
                    println!("server closed the connection");
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!("connection error: {err}");
                    eprintln!("connection lost");
                    break;
                }
            }
        }
    });

    // rustyline is synchronous; run it on its own thread and hand lines
    // over a channel.
    let (input_tx, mut input_rx) = mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        let mut editor = match DefaultEditor::new() {
            Ok(editor) => editor,
            Err(err) => {
                eprintln!("failed to initialize readline: {err}");
                return;
            }
        };

        loop {
            match editor.readline("> ") {
                Ok(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    editor.add_history_entry(line).ok();
                    if input_tx.send(line.to_string()).is_err() {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
                Err(err) => {
                    eprintln!("readline error: {err}");
                    break;
                }
            }
        }
    });

    let mut write_task = tokio::spawn(async move {
        while let Some(line) = input_rx.recv().await {
            if let Err(err) = write.send(Message::Text(line)).await {
                eprintln!("failed to send: {err}");
                break;
            }
        }
        let _ = write.send(Message::Close(None)).await;
    });

    // Whichever side finishes first tears the session down.
    tokio::select! {
        _ = &mut read_task => write_task.abort(),
        _ = &mut write_task => read_task.abort(),
    }

    Ok(())
}

//! Subscriber WebSocket
//!
//! Each connection receives the current snapshot on connect, then every
//! broadcast event. Commands it sends are queued to one worker task per
//! connection, which runs them in arrival order off the socket loop.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broadcast::Subscription;
use crate::models::{ClientCommand, GatewayEvent, ServerMessage};
use crate::AppState;

/// Handle gateway WebSocket upgrade
pub async fn gateway_websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_gateway_socket(socket, state))
}

/// Handle one subscriber connection
async fn handle_gateway_socket(socket: WebSocket, state: Arc<AppState>) {
    let connection_id = Uuid::new_v4();
    let (subscription, greeting) = open_subscription(&state);
    let commands = CommandQueue::spawn(state.clone());

    info!(connection_id = %connection_id, "Subscriber connected");

    serve_socket(socket, connection_id, subscription, greeting, &commands, &state).await;

    // Queued commands still run; the worker exits once the queue drains
    drop(commands);
    crate::metrics::set_subscribers(state.broadcaster.subscriber_count());

    info!(connection_id = %connection_id, "Subscriber disconnected");
}

/// Pump events out and commands in until either side goes away
async fn serve_socket(
    socket: WebSocket,
    connection_id: Uuid,
    mut subscription: Subscription,
    greeting: Option<GatewayEvent>,
    commands: &CommandQueue,
    state: &AppState,
) {
    let (mut sender, mut receiver) = socket.split();
    let mut shutdown = state.shutdown_receiver();

    if let Some(event) = greeting {
        if !send_event(&mut sender, &event).await {
            return;
        }
    }

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            }

            event = subscription.recv() => {
                match event {
                    Some(event) => {
                        if !send_event(&mut sender, &event).await {
                            break;
                        }
                    }
                    None => break,
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match parse_command(&text) {
                            Ok(command) => {
                                debug!(connection_id = %connection_id, command = ?command, "Command received");
                                commands.submit(command);
                            }
                            Err(reply) => {
                                warn!(connection_id = %connection_id, frame = %text, "Malformed command");
                                if !send_json(&mut sender, &reply).await {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        error!(connection_id = %connection_id, "WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Attach to the broadcaster and ask the registry for a fresh poll.
///
/// Returns the snapshot to greet the subscriber with, if one exists yet.
fn open_subscription(state: &AppState) -> (Subscription, Option<GatewayEvent>) {
    let mut subscription = state.broadcaster.subscribe();
    crate::metrics::set_subscribers(state.broadcaster.subscriber_count());

    let greeting = subscription.snapshot.take().map(GatewayEvent::Snapshot);
    state.registry.request_refresh();

    (subscription, greeting)
}

/// Decode an inbound text frame, or build the `error` reply for it
fn parse_command(text: &str) -> Result<ClientCommand, ServerMessage<'static>> {
    serde_json::from_str(text).map_err(|e| ServerMessage::Error {
        message: format!("Invalid command: {}", e),
    })
}

/// Per-connection command worker
struct CommandQueue {
    sender: mpsc::UnboundedSender<ClientCommand>,
    _worker: JoinHandle<()>,
}

impl CommandQueue {
    fn spawn(state: Arc<AppState>) -> Self {
        let (sender, mut queue) = mpsc::unbounded_channel();

        let worker = tokio::spawn(async move {
            while let Some(command) = queue.recv().await {
                execute(command, &state).await;
            }
        });

        Self {
            sender,
            _worker: worker,
        }
    }

    fn submit(&self, command: ClientCommand) {
        if self.sender.send(command).is_err() {
            error!("Command worker is gone, dropping command");
        }
    }
}

/// Run a command on the component that owns it
async fn execute(command: ClientCommand, state: &AppState) {
    match command {
        ClientCommand::ListContainers => state.registry.request_refresh(),
        ClientCommand::Start { id } => {
            state.dispatcher.start(&id).await;
        }
        ClientCommand::Stop { id } => {
            state.dispatcher.stop(&id).await;
        }
        ClientCommand::Remove { id } => {
            state.dispatcher.remove(&id).await;
        }
        ClientCommand::RunImage { name } => {
            state.dispatcher.run_image(&name).await;
        }
        ClientCommand::PipeLogs { id } => {
            state.streams.start_stream(&id).await;
        }
        ClientCommand::StopPipeLogs { id } => {
            state.streams.stop_stream(&id).await;
        }
    }
}

async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &GatewayEvent) -> bool {
    match event.to_json() {
        Ok(text) => sender.send(Message::Text(text)).await.is_ok(),
        Err(e) => {
            error!(error = %e, "Failed to encode event");
            true
        }
    }
}

async fn send_json<T: serde::Serialize>(
    sender: &mut SplitSink<WebSocket, Message>,
    value: &T,
) -> bool {
    match serde_json::to_string(value) {
        Ok(text) => sender.send(Message::Text(text)).await.is_ok(),
        Err(e) => {
            error!(error = %e, "Failed to encode reply");
            true
        }
    }
}

//! Relay server core: shared state, WebSocket handler, and frame dispatch.
//!
//! Each WebSocket connection is bound to a principal by its first frame
//! ([`ClientFrame::Connect`]). The connection then owns one subscription in
//! the [`DeliveryRouter`]: a writer task drains it onto the socket while a
//! reader task decodes client frames and hands them to the [`ChatService`].

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use parley_proto::codec;
use parley_proto::frame::{ClientFrame, ErrorKind, ServerFrame};
use parley_proto::message::MAX_CONTENT_LEN;
use parley_proto::topic::Topic;

use crate::config::RelayConfig;
use crate::directory::{DirectoryError, InMemoryDirectory, UserRecord};
use crate::router::{DeliveryRouter, Subscription, SubscriptionHandle};
use crate::service::ChatService;
use crate::store::MemoryConversationStore;
use crate::unread::UnreadCounter;

/// Extra room on top of the content limit for frame framing and names.
const FRAME_OVERHEAD: usize = 4 * 1024;

/// The chat service type the relay runs.
pub type RelayChat = ChatService<InMemoryDirectory, MemoryConversationStore>;

/// Shared relay server state.
pub struct RelayState {
    /// Chat orchestration over the directory, store, counters and router.
    pub chat: RelayChat,
    /// Maximum accepted WebSocket message size in bytes.
    max_frame_size: usize,
}

impl RelayState {
    /// Creates relay state over `directory` with default limits.
    #[must_use]
    pub fn new(directory: InMemoryDirectory) -> Self {
        let chat = ChatService::new(
            Arc::new(directory),
            Arc::new(MemoryConversationStore::new()),
            Arc::new(UnreadCounter::new()),
            Arc::new(DeliveryRouter::default()),
        );
        Self {
            chat,
            max_frame_size: MAX_CONTENT_LEN.saturating_add(FRAME_OVERHEAD),
        }
    }

    /// Creates relay state from a resolved configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`DirectoryError`] if the configured users contain a
    /// duplicate username or nickname.
    pub fn from_config(config: &RelayConfig) -> Result<Self, DirectoryError> {
        let directory = InMemoryDirectory::from_records(config.users.iter().cloned())?;
        let router = DeliveryRouter::new(config.outbound_buffer, config.delivery_timeout);
        let chat = ChatService::new(
            Arc::new(directory),
            Arc::new(MemoryConversationStore::new()),
            Arc::new(UnreadCounter::new()),
            Arc::new(router),
        )
        .with_max_content_len(config.max_content_len);
        Ok(Self {
            chat,
            max_frame_size: config.max_content_len.saturating_add(FRAME_OVERHEAD),
        })
    }

    /// The delivery router.
    #[must_use]
    pub fn router(&self) -> &DeliveryRouter {
        self.chat.router()
    }
}

/// Handles an upgraded WebSocket connection for a single user.
///
/// The connection lifecycle:
/// 1. Wait for a `Connect` frame and resolve the principal.
/// 2. Register the subscription and join the user's notification topic.
/// 3. Send `Connected` back.
/// 4. Run the reader and writer tasks until either ends.
/// 5. Remove the subscription.
pub async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let Some(username) = wait_for_connect(&mut ws_receiver).await else {
        tracing::warn!("connection closed before connect");
        return;
    };

    let user = match state.chat.principal(&username) {
        Ok(user) => user,
        Err(e) => {
            tracing::warn!(user = %username, error = %e, "rejecting connection");
            let _ = send_frame(&mut ws_sender, &e.to_frame()).await;
            let _ = ws_sender.send(Message::Close(None)).await;
            return;
        }
    };

    let Subscription {
        handle,
        mut receiver,
    } = state.router().subscribe(&user.username).await;
    state
        .router()
        .subscribe_topic(handle, Topic::notifications(&user.username))
        .await;

    let ack = ServerFrame::Connected {
        username: user.username.clone(),
        nickname: user.nickname.clone(),
    };
    if let Err(e) = send_frame(&mut ws_sender, &ack).await {
        tracing::error!(user = %user.username, error = %e, "failed to send Connected ack");
        state.router().unsubscribe(handle).await;
        return;
    }

    tracing::info!(user = %user.username, handle = %handle, "user connected");

    // Writer: forwards routed frames to the socket. The channel closes when
    // the subscription is removed or replaced by a newer connection.
    let writer_user = user.username.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(frame) = receiver.recv().await {
            if let Err(e) = send_frame(&mut ws_sender, &frame).await {
                tracing::warn!(user = %writer_user, error = %e, "WebSocket write failed");
                return;
            }
        }
        let _ = ws_sender.send(Message::Close(None)).await;
    });

    // Reader: dispatches client frames.
    let reader_user = user.clone();
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Binary(data) => {
                    handle_frame(&reader_state, handle, &reader_user, &data).await;
                }
                Message::Close(_) => {
                    tracing::info!(user = %reader_user.username, "received close frame");
                    break;
                }
                _ => {
                    // Ignore text, ping, pong frames.
                }
            }
        }
    });

    // Wait for either task to finish, then abort the other.
    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.router().unsubscribe(handle).await;
    tracing::info!(user = %user.username, "user disconnected");
}

/// Waits for the first frame on the WebSocket, expecting `Connect`.
///
/// Returns the username if a valid `Connect` is received, or `None` if the
/// connection closes or any other frame arrives first.
async fn wait_for_connect(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
) -> Option<String> {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Binary(data) => match codec::decode_client(&data) {
                Ok(ClientFrame::Connect { username }) => {
                    if username.is_empty() {
                        tracing::warn!("received Connect with empty username");
                        return None;
                    }
                    return Some(username);
                }
                Ok(other) => {
                    tracing::warn!(frame = ?other, "expected Connect, got different frame");
                    return None;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to decode connect frame");
                    return None;
                }
            },
            Message::Close(_) => return None,
            _ => {
                // Skip non-binary frames (ping/pong) while connecting.
            }
        }
    }
    None
}

/// Handles one binary frame from a connected user.
async fn handle_frame(
    state: &Arc<RelayState>,
    handle: SubscriptionHandle,
    principal: &UserRecord,
    data: &[u8],
) {
    let frame = match codec::decode_client(data) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(user = %principal.username, error = %e, "failed to decode frame");
            let err = ServerFrame::Error {
                kind: ErrorKind::InvalidRequest,
                reason: e.to_string(),
            };
            reply(state, handle, err).await;
            return;
        }
    };

    let response = match frame {
        ClientFrame::Send {
            sender,
            receiver,
            content,
        } => {
            match state
                .chat
                .send_message(&principal.username, &sender, &receiver, &content)
                .await
            {
                Ok(receipt) => Some(ServerFrame::Sent {
                    sequence: receipt.sequence,
                    unread: receipt.unread,
                }),
                Err(e) => {
                    tracing::warn!(user = %principal.username, error = %e, "send rejected");
                    Some(e.to_frame())
                }
            }
        }
        ClientFrame::History { receiver, since } => {
            // On success the history is pushed by the service itself.
            match state
                .chat
                .load_history(&principal.username, &receiver, since)
                .await
            {
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!(user = %principal.username, error = %e, "history rejected");
                    Some(e.to_frame())
                }
            }
        }
        ClientFrame::Subscribe { topic } => join_topic(state, handle, principal, topic).await,
        ClientFrame::Unsubscribe { topic } => {
            state.router().unsubscribe_topic(handle, &topic).await;
            None
        }
        ClientFrame::Unread { partner } => {
            match state.chat.unread_from(&principal.username, &partner) {
                Ok(count) => Some(ServerFrame::Unread { partner, count }),
                Err(e) => Some(e.to_frame()),
            }
        }
        ClientFrame::Connect { username } => {
            tracing::warn!(
                user = %principal.username,
                new_user = %username,
                "received duplicate Connect from already-connected user"
            );
            Some(ServerFrame::Error {
                kind: ErrorKind::InvalidRequest,
                reason: "already connected".to_string(),
            })
        }
    };

    if let Some(response) = response {
        reply(state, handle, response).await;
    }
}

/// Joins `topic` for the connection behind `handle` and returns the ack.
///
/// Only the topic owner may join. Returns `None` when the handle was already
/// replaced by a newer connection, since nothing was joined and there is no
/// one left to answer.
async fn join_topic(
    state: &Arc<RelayState>,
    handle: SubscriptionHandle,
    principal: &UserRecord,
    topic: Topic,
) -> Option<ServerFrame> {
    if topic.owner() != principal.username {
        tracing::warn!(user = %principal.username, topic = %topic, "subscribe to foreign topic");
        return Some(ServerFrame::Error {
            kind: ErrorKind::Forbidden,
            reason: format!("cannot subscribe to {topic}"),
        });
    }
    if !state.router().subscribe_topic(handle, topic.clone()).await {
        tracing::debug!(user = %principal.username, handle = %handle, "subscribe on replaced connection");
        return None;
    }
    tracing::debug!(user = %principal.username, topic = %topic, "joined topic");
    Some(ServerFrame::Subscribed { topic })
}

/// Sends a frame back to the connection identified by `handle`.
async fn reply(state: &Arc<RelayState>, handle: SubscriptionHandle, frame: ServerFrame) {
    if let Err(e) = state.router().send_to_handle(handle, frame).await {
        tracing::warn!(handle = %handle, error = %e, "reply delivery failed");
    }
}

/// Encodes and sends a server frame directly on a WebSocket sender.
async fn send_frame(
    ws_sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    frame: &ServerFrame,
) -> Result<(), String> {
    let bytes = codec::encode_server(frame).map_err(|e| e.to_string())?;
    ws_sender
        .send(Message::Binary(bytes.into()))
        .await
        .map_err(|e| format!("WebSocket send error: {e}"))
}

/// Starts the relay server with a directory of `users` and default limits.
///
/// # Errors
///
/// Returns an error if the users contain duplicates or the TCP listener
/// cannot bind to the given address.
pub async fn start_server(
    addr: &str,
    users: Vec<UserRecord>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let directory = InMemoryDirectory::from_records(users)?;
    start_server_with_state(addr, Arc::new(RelayState::new(directory))).await
}

/// Starts the relay server with a pre-configured [`RelayState`] and returns
/// the bound address and a join handle.
///
/// This is the primary entry point used by both `main.rs` and test code.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .route("/health", axum::routing::get(health))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<RelayState>>,
) -> impl axum::response::IntoResponse {
    ws.max_message_size(state.max_frame_size)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn health() -> &'static str {
    "ok"
}

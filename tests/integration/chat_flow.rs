// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::match_same_arms,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Integration tests for sending messages and loading history through a
//! running relay.
//!
//! These tests validate:
//! - Messages to an offline receiver are stored and returned by history
//! - Loading history resets the unread count for that partner
//! - Unknown receivers are rejected without storing anything
//! - Connected receivers get the notification and the live message
//! - The authenticated principal is the only allowed sender

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parley_proto::codec;
use parley_proto::frame::{ClientFrame, ErrorKind, ServerFrame};
use parley_proto::topic::Topic;
use parley_relay::directory::UserRecord;
use tokio_tungstenite::tungstenite;

type Client =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Helpers
// =============================================================================

async fn start_relay() -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let users = [("alice", "ace"), ("bob", "bee"), ("carol", "cee")]
        .into_iter()
        .map(|(username, nickname)| UserRecord {
            username: username.into(),
            nickname: nickname.into(),
        })
        .collect();
    parley_relay::relay::start_server("127.0.0.1:0", users)
        .await
        .expect("failed to start relay server")
}

async fn send(ws: &mut Client, frame: ClientFrame) {
    let bytes = codec::encode_client(&frame).unwrap();
    ws.send(tungstenite::Message::Binary(bytes.into()))
        .await
        .unwrap();
}

async fn recv(ws: &mut Client) -> ServerFrame {
    tokio::time::timeout(RECV_TIMEOUT, async {
        loop {
            let msg = ws.next().await.expect("socket closed").unwrap();
            if msg.is_binary() {
                return codec::decode_server(&msg.into_data()).unwrap();
            }
        }
    })
    .await
    .expect("timed out waiting for frame")
}

async fn connect(addr: SocketAddr, username: &str) -> Client {
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();
    send(
        &mut ws,
        ClientFrame::Connect {
            username: username.into(),
        },
    )
    .await;
    match recv(&mut ws).await {
        ServerFrame::Connected { username: bound, .. } => assert_eq!(bound, username),
        other => panic!("expected Connected, got {other:?}"),
    }
    ws
}

async fn send_message(ws: &mut Client, sender: &str, receiver: &str, content: &str) -> ServerFrame {
    send(
        ws,
        ClientFrame::Send {
            sender: sender.into(),
            receiver: receiver.into(),
            content: content.into(),
        },
    )
    .await;
    recv(ws).await
}

async fn unread(ws: &mut Client, partner: &str) -> u64 {
    send(
        ws,
        ClientFrame::Unread {
            partner: partner.into(),
        },
    )
    .await;
    match recv(ws).await {
        ServerFrame::Unread { count, .. } => count,
        other => panic!("expected Unread, got {other:?}"),
    }
}

async fn history(ws: &mut Client, partner: &str) -> Vec<parley_proto::message::ChatMessage> {
    send(
        ws,
        ClientFrame::History {
            receiver: partner.into(),
            since: 0,
        },
    )
    .await;
    match recv(ws).await {
        ServerFrame::History {
            partner: got,
            messages,
        } => {
            assert_eq!(got, partner);
            messages
        }
        other => panic!("expected History, got {other:?}"),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn offline_message_is_read_through_history() {
    let (addr, _handle) = start_relay().await;
    let mut alice = connect(addr, "alice").await;

    let sent = send_message(&mut alice, "alice", "bee", "hi").await;
    assert_eq!(
        sent,
        ServerFrame::Sent {
            sequence: 1,
            unread: 1
        }
    );

    let mut bob = connect(addr, "bob").await;
    assert_eq!(unread(&mut bob, "ace").await, 1);

    let messages = history(&mut bob, "ace").await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "hi");
    assert_eq!(messages[0].sequence, 1);
    assert_eq!(messages[0].sender, "alice");
    assert_eq!(messages[0].sender_nickname, "ace");

    assert_eq!(unread(&mut bob, "ace").await, 0);
}

#[tokio::test]
async fn unknown_receiver_is_rejected_without_storing() {
    let (addr, _handle) = start_relay().await;
    let mut alice = connect(addr, "alice").await;

    match send_message(&mut alice, "alice", "ghost", "hello?").await {
        ServerFrame::Error { kind, reason } => {
            assert_eq!(kind, ErrorKind::UnknownUser);
            assert!(reason.contains("ghost"), "got: {reason}");
        }
        other => panic!("expected Error, got {other:?}"),
    }

    // Nothing landed in any of alice's conversations.
    assert!(history(&mut alice, "bee").await.is_empty());
    assert!(history(&mut alice, "cee").await.is_empty());
}

#[tokio::test]
async fn rapid_messages_before_connect_arrive_in_order() {
    let (addr, _handle) = start_relay().await;
    let mut alice = connect(addr, "alice").await;

    let first = send_message(&mut alice, "alice", "bee", "first").await;
    let second = send_message(&mut alice, "alice", "bee", "second").await;
    assert_eq!(
        first,
        ServerFrame::Sent {
            sequence: 1,
            unread: 1
        }
    );
    assert_eq!(
        second,
        ServerFrame::Sent {
            sequence: 2,
            unread: 2
        }
    );

    let mut bob = connect(addr, "bob").await;
    let messages = history(&mut bob, "ace").await;
    let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["first", "second"]);
    let seqs: Vec<u64> = messages.iter().map(|m| m.sequence).collect();
    assert_eq!(seqs, vec![1, 2]);
    assert_eq!(unread(&mut bob, "ace").await, 0);

    // Loading again keeps the count at zero.
    history(&mut bob, "ace").await;
    assert_eq!(unread(&mut bob, "ace").await, 0);
}

#[tokio::test]
async fn connected_receiver_gets_notification_and_message() {
    let (addr, _handle) = start_relay().await;
    let mut alice = connect(addr, "alice").await;
    let mut bob = connect(addr, "bob").await;

    let topic = Topic::messages("bob", "ace");
    send(
        &mut bob,
        ClientFrame::Subscribe {
            topic: topic.clone(),
        },
    )
    .await;
    assert_eq!(
        recv(&mut bob).await,
        ServerFrame::Subscribed {
            topic: topic.clone()
        }
    );

    send_message(&mut alice, "alice", "bee", "ping").await;

    match recv(&mut bob).await {
        ServerFrame::Notification { topic, notice } => {
            assert_eq!(topic, Topic::notifications("bob"));
            assert_eq!(notice.from, "ace");
            assert_eq!(notice.count, 1);
        }
        other => panic!("expected Notification, got {other:?}"),
    }
    match recv(&mut bob).await {
        ServerFrame::Message {
            topic: got,
            message,
        } => {
            assert_eq!(got, topic);
            assert_eq!(message.content, "ping");
            assert_eq!(message.sequence, 1);
        }
        other => panic!("expected Message, got {other:?}"),
    }
}

#[tokio::test]
async fn both_directions_share_one_history() {
    let (addr, _handle) = start_relay().await;
    let mut alice = connect(addr, "alice").await;
    let mut bob = connect(addr, "bob").await;

    send_message(&mut alice, "alice", "bee", "hi bob").await;
    // Bob is auto-subscribed to notifications; skip the one for alice's message.
    assert!(matches!(
        recv(&mut bob).await,
        ServerFrame::Notification { .. }
    ));
    let reply = send_message(&mut bob, "bob", "ace", "hi alice").await;
    assert_eq!(
        reply,
        ServerFrame::Sent {
            sequence: 2,
            unread: 1
        }
    );

    // Alice got a notification for bob's reply before the history arrives.
    assert!(matches!(
        recv(&mut alice).await,
        ServerFrame::Notification { .. }
    ));
    let messages = history(&mut alice, "bee").await;
    let senders: Vec<&str> = messages.iter().map(|m| m.sender.as_str()).collect();
    assert_eq!(senders, vec!["alice", "bob"]);

    // Alice read bob's reply; bob has not read alice's message.
    assert_eq!(unread(&mut alice, "bee").await, 0);
    assert_eq!(unread(&mut bob, "ace").await, 1);
}

#[tokio::test]
async fn spoofed_sender_is_forbidden() {
    let (addr, _handle) = start_relay().await;
    let mut carol = connect(addr, "carol").await;

    match send_message(&mut carol, "alice", "bee", "it's me, alice").await {
        ServerFrame::Error { kind, .. } => assert_eq!(kind, ErrorKind::Forbidden),
        other => panic!("expected Error, got {other:?}"),
    }

    let mut bob = connect(addr, "bob").await;
    assert!(history(&mut bob, "ace").await.is_empty());
    assert_eq!(unread(&mut bob, "ace").await, 0);
}

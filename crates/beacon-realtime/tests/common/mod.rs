//! In-process Phoenix socket server for transport tests.
//!
//! Accepts WebSocket connections, records every decoded frame and answers
//! joins, `doc` registrations, leaves, unsubscribes and heartbeats as the
//! [`Behaviour`] dictates. Tests can push frames to the most recent
//! connection with [`FakePhoenix::push`].

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use beacon_realtime::{Message, TransportConfig};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

pub const CONTROL_TOPIC: &str = "__absinthe__:control";

/// How the server answers `phx_join`.
#[derive(Clone, Debug)]
pub enum JoinReply {
    Ok,
    Error(Value),
    Delayed(Duration),
    Ignore,
}

/// How the server answers a `doc` push.
#[derive(Clone, Debug)]
pub enum DocReply {
    Ok(String),
    Error(Value),
    Delayed(Duration, String),
    Ignore,
}

#[derive(Clone, Debug)]
pub struct Behaviour {
    pub join: JoinReply,
    /// Replies for successive `doc` pushes; the last one repeats.
    pub docs: Vec<DocReply>,
    pub reply_to_heartbeats: bool,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            join: JoinReply::Ok,
            docs: vec![DocReply::Ok("sub:1".to_string())],
            reply_to_heartbeats: true,
        }
    }
}

struct Shared {
    behaviour: Behaviour,
    frames: Mutex<Vec<Message>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    docs_seen: AtomicUsize,
}

pub struct FakePhoenix {
    addr: SocketAddr,
    shared: Arc<Shared>,
}

impl FakePhoenix {
    pub async fn start(behaviour: Behaviour) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = Arc::new(Shared {
            behaviour,
            frames: Mutex::new(Vec::new()),
            outbound: Mutex::new(None),
            docs_seen: AtomicUsize::new(0),
        });

        let accept_shared = Arc::clone(&shared);
        let _accept = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let _conn = tokio::spawn(serve(stream, Arc::clone(&accept_shared)));
            }
        });

        Self { addr, shared }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/socket/websocket?vsn=2.0.0", self.addr)
    }

    /// Transport config pointing at this server with test-sized timeouts.
    pub fn config(&self) -> TransportConfig {
        TransportConfig {
            socket_url: self.url(),
            control_topic: CONTROL_TOPIC.to_string(),
            heartbeat_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(2),
            join_timeout: Duration::from_secs(2),
            registration_timeout: Duration::from_secs(2),
        }
    }

    /// Every frame received so far, in receipt order.
    pub fn frames(&self) -> Vec<Message> {
        self.shared.frames.lock().clone()
    }

    /// Received frames with the given event.
    pub fn frames_with(&self, event: &str) -> Vec<Message> {
        self.frames()
            .into_iter()
            .filter(|m| m.event == event)
            .collect()
    }

    /// Wait until at least `count` frames with `event` have been received.
    pub async fn wait_for(&self, event: &str, count: usize) -> Vec<Message> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        loop {
            let frames = self.frames_with(event);
            if frames.len() >= count {
                return frames;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {count} {event} frame(s), got {}",
                frames.len()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Send a server push to the most recent connection.
    pub fn push(&self, topic: &str, event: &str, payload: Value) {
        let text = Message::new(topic, event, payload).encode();
        let outbound = self.shared.outbound.lock();
        let tx = outbound.as_ref().expect("no client connected");
        tx.send(text).unwrap();
    }

    /// Push a `subscription:data` frame carrying `result`.
    pub fn push_result(&self, subscription_id: &str, result: Value) {
        self.push(
            subscription_id,
            "subscription:data",
            json!({"result": result, "subscriptionId": subscription_id}),
        );
    }
}

async fn serve(stream: TcpStream, shared: Arc<Shared>) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    let (mut sink, mut source) = ws.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    *shared.outbound.lock() = Some(out_tx.clone());

    loop {
        tokio::select! {
            frame = source.next() => {
                let text = match frame {
                    Some(Ok(WsMessage::Text(text))) => text,
                    Some(Ok(WsMessage::Close(_)) | Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };
                let message = Message::decode(&text).expect("client sent a valid frame");
                // Replies are queued before the frame becomes visible to the
                // test, so test pushes always follow them on the wire.
                shared.respond(&message, &out_tx);
                shared.frames.lock().push(message);
            }
            out = out_rx.recv() => {
                let Some(text) = out else { break };
                if sink.send(WsMessage::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

impl Shared {
    fn respond(&self, msg: &Message, out: &mpsc::UnboundedSender<String>) {
        match (msg.topic.as_str(), msg.event.as_str()) {
            ("phoenix", "heartbeat") => {
                if self.behaviour.reply_to_heartbeats {
                    let _ = out.send(reply(msg, "ok", json!({})));
                }
            }
            (_, "phx_join") => match &self.behaviour.join {
                JoinReply::Ok => {
                    let _ = out.send(reply(msg, "ok", json!({})));
                }
                JoinReply::Error(response) => {
                    let _ = out.send(reply(msg, "error", response.clone()));
                }
                JoinReply::Delayed(delay) => send_later(out, *delay, reply(msg, "ok", json!({}))),
                JoinReply::Ignore => {}
            },
            (_, "doc") => {
                let seen = self.docs_seen.fetch_add(1, Ordering::SeqCst);
                let docs = &self.behaviour.docs;
                match &docs[seen.min(docs.len() - 1)] {
                    DocReply::Ok(id) => {
                        let _ = out.send(reply(msg, "ok", json!({"subscriptionId": id})));
                    }
                    DocReply::Error(response) => {
                        let _ = out.send(reply(msg, "error", response.clone()));
                    }
                    DocReply::Delayed(delay, id) => send_later(
                        out,
                        *delay,
                        reply(msg, "ok", json!({"subscriptionId": id})),
                    ),
                    DocReply::Ignore => {}
                }
            }
            (_, "phx_leave" | "unsubscribe") => {
                let _ = out.send(reply(msg, "ok", json!({})));
            }
            _ => {}
        }
    }
}

fn reply(msg: &Message, status: &str, response: Value) -> String {
    Message {
        join_ref: msg.join_ref.clone(),
        msg_ref: msg.msg_ref.clone(),
        topic: msg.topic.clone(),
        event: "phx_reply".to_string(),
        payload: json!({"status": status, "response": response}),
    }
    .encode()
}

fn send_later(out: &mpsc::UnboundedSender<String>, delay: Duration, text: String) {
    let out = out.clone();
    let _task = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = out.send(text);
    });
}

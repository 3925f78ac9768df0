//! In-process grid servers for exercising the client without sockets.
//!
//! Each fake server is scripted with a [`Behavior`] that is consulted per
//! connection attempt and per request, so a test can change it mid-run.

use async_trait::async_trait;
use gridlink::messages::{FramedMessage, Message, MessageType, Part};
use gridlink::network::{ByteStream, ServerAddress, Transport};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

pub type Handler = Arc<dyn Fn(&Message) -> Message + Send + Sync>;

#[derive(Clone)]
pub enum Behavior {
    /// Answer every request with the handler's message
    Respond(Handler),
    /// Like `Respond`, but the first `slow` requests across all
    /// connections are answered only after `delay`
    Delayed {
        delay: Duration,
        slow: Arc<AtomicUsize>,
        handler: Handler,
    },
    /// Refuse the connection
    Refuse,
    /// Accept requests and never answer
    Hang,
    /// Answer with bytes that do not decode as a message
    Garbage,
    /// Read one request, then drop the stream
    CloseAfterRequest,
}

impl Behavior {
    pub fn respond(handler: impl Fn(&Message) -> Message + Send + Sync + 'static) -> Self {
        Behavior::Respond(Arc::new(handler))
    }

    /// Answer the first request late, later ones at once
    pub fn slow_first(delay: Duration, handler: impl Fn(&Message) -> Message + Send + Sync + 'static) -> Self {
        Behavior::Delayed {
            delay,
            slow: Arc::new(AtomicUsize::new(1)),
            handler: Arc::new(handler),
        }
    }

    /// Reply `RESPONSE` carrying `size` as an int part
    pub fn size(size: i32) -> Self {
        Self::respond(move |_| Message::response(MessageType::Response, vec![Part::int(size)]))
    }

    /// Reply with `message_type` carrying a text part
    pub fn error(message_type: MessageType, text: &'static str) -> Self {
        Self::respond(move |_| Message::response(message_type, vec![Part::string(text)]))
    }
}

#[derive(Default)]
struct GridState {
    behaviors: HashMap<ServerAddress, Behavior>,
    connects: HashMap<ServerAddress, usize>,
    requests: Vec<(ServerAddress, Message)>,
}

/// A set of fake servers reachable through its [`Transport`] impl
#[derive(Clone, Default)]
pub struct FakeGrid {
    state: Arc<Mutex<GridState>>,
}

impl FakeGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server(self, server: &str, behavior: Behavior) -> Self {
        self.set_behavior(server, behavior);
        self
    }

    pub fn set_behavior(&self, server: &str, behavior: Behavior) {
        self.state
            .lock()
            .unwrap()
            .behaviors
            .insert(ServerAddress::from(server), behavior);
    }

    pub fn addresses(&self) -> Vec<ServerAddress> {
        let mut addresses: Vec<ServerAddress> =
            self.state.lock().unwrap().behaviors.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    /// Successful connects to `server` so far
    pub fn connects(&self, server: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .connects
            .get(&ServerAddress::from(server))
            .copied()
            .unwrap_or(0)
    }

    /// Requests received, in arrival order
    pub fn requests(&self) -> Vec<(ServerAddress, Message)> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn requests_to(&self, server: &str) -> usize {
        let server = ServerAddress::from(server);
        self.requests().iter().filter(|(to, _)| *to == server).count()
    }

    fn behavior(&self, server: &ServerAddress) -> Option<Behavior> {
        self.state.lock().unwrap().behaviors.get(server).cloned()
    }

    async fn serve(self, server: ServerAddress, mut stream: tokio::io::DuplexStream) {
        let framed = FramedMessage::default();
        loop {
            let request = match framed.read_message(&mut stream).await {
                Ok(request) => request,
                Err(_) => return,
            };
            self.state
                .lock()
                .unwrap()
                .requests
                .push((server.clone(), request.clone()));

            match self.behavior(&server) {
                Some(Behavior::Respond(handler)) => {
                    let response = handler(&request);
                    if framed.write_message(&mut stream, &response).await.is_err() {
                        return;
                    }
                }
                Some(Behavior::Delayed { delay, slow, handler }) => {
                    let late = slow
                        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                        .is_ok();
                    if late {
                        tokio::time::sleep(delay).await;
                    }
                    let response = handler(&request);
                    if framed.write_message(&mut stream, &response).await.is_err() {
                        return;
                    }
                }
                Some(Behavior::Hang) => {}
                Some(Behavior::Garbage) => {
                    // Unknown message type code 0x7f7f
                    let _ = stream.write_all(&[0x7f, 0x7f, 0, 0, 0]).await;
                }
                Some(Behavior::CloseAfterRequest) | Some(Behavior::Refuse) | None => return,
            }
        }
    }
}

#[async_trait]
impl Transport for FakeGrid {
    async fn connect(&self, server: &ServerAddress) -> io::Result<Box<dyn ByteStream>> {
        match self.behavior(server) {
            None | Some(Behavior::Refuse) => Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("{} refused the connection", server),
            )),
            Some(_) => {
                *self
                    .state
                    .lock()
                    .unwrap()
                    .connects
                    .entry(server.clone())
                    .or_insert(0) += 1;

                let (client, server_side) = tokio::io::duplex(64 * 1024);
                tokio::spawn(self.clone().serve(server.clone(), server_side));
                Ok(Box::new(client))
            }
        }
    }
}

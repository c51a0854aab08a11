//! In-process relay for tests. Stores every accepted event, answers REQ with
//! the stored matches followed by EOSE and forwards new events to open
//! subscriptions.
use std::{collections::HashMap, sync::Arc};

use futures::{SinkExt, StreamExt};
use joinstr_core::protocol::SignedEvent;
use log::{debug, warn};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{Mutex, broadcast},
};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::message::{ClientMessage, Filter, RelayMessage};

#[derive(Debug, Clone)]
enum Outgoing {
    Event(SignedEvent),
    Raw(String),
}

struct RelayState {
    events: Mutex<Vec<SignedEvent>>,
    reject: Mutex<Option<String>>,
    notice: Mutex<Option<String>>,
    live: broadcast::Sender<Outgoing>,
}

pub struct MockRelay {
    url: Url,
    state: Arc<RelayState>,
    shutdown: CancellationToken,
}

impl MockRelay {
    /// Binds to a random local port on the current runtime
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("can bind mock relay");
        let address = listener.local_addr().expect("mock relay has an address");
        let url = Url::parse(&format!("ws://{address}")).expect("valid mock relay url");
        let (live, _) = broadcast::channel(256);
        let state = Arc::new(RelayState {
            events: Mutex::new(Vec::new()),
            reject: Mutex::new(None),
            notice: Mutex::new(None),
            live,
        });
        let shutdown = CancellationToken::new();

        let accept_state = state.clone();
        let accept_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = accept_shutdown.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, _)) => {
                            tokio::spawn(serve(stream, accept_state.clone(), accept_shutdown.clone()));
                        }
                        Err(e) => warn!("Mock relay failed to accept: {e}"),
                    },
                }
            }
        });

        Self {
            url,
            state,
            shutdown,
        }
    }

    pub fn url(&self) -> Url {
        self.url.clone()
    }

    /// All accepted events in arrival order, duplicates included
    pub async fn stored_events(&self) -> Vec<SignedEvent> {
        self.state.events.lock().await.clone()
    }

    /// Stores an event as if it was published and forwards it to open
    /// subscriptions
    pub async fn store_event(&self, event: SignedEvent) {
        self.state.events.lock().await.push(event.clone());
        let _ = self.state.live.send(Outgoing::Event(event));
    }

    /// Rejects all following publishes with the given message, or accepts them
    /// again with None
    pub async fn reject_events(&self, message: Option<String>) {
        *self.state.reject.lock().await = message;
    }

    /// Precedes every following OK with a NOTICE carrying the given message
    pub async fn notice_on_publish(&self, message: Option<String>) {
        *self.state.notice.lock().await = message;
    }

    /// Sends a raw frame to every connection with an open subscription
    pub async fn send_raw(&self, frame: &str) {
        let _ = self.state.live.send(Outgoing::Raw(frame.to_owned()));
    }
}

impl Drop for MockRelay {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn serve(stream: TcpStream, state: Arc<RelayState>, shutdown: CancellationToken) {
    let socket = match accept_async(stream).await {
        Ok(socket) => socket,
        Err(e) => {
            warn!("Mock relay handshake failed: {e}");
            return;
        }
    };
    let (mut write, mut read) = socket.split();
    let mut live = state.live.subscribe();
    let mut subscriptions: HashMap<String, Filter> = HashMap::new();

    loop {
        let replies = tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => state.handle(&text, &mut subscriptions).await,
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => continue,
            },
            outgoing = live.recv() => match outgoing {
                Ok(Outgoing::Event(event)) => subscriptions
                    .iter()
                    .filter(|(_, filter)| filter.matches(&event))
                    .filter_map(|(id, _)| {
                        RelayMessage::Event {
                            subscription_id: id.clone(),
                            event: event.clone(),
                        }
                        .to_json()
                        .ok()
                    })
                    .collect(),
                Ok(Outgoing::Raw(raw)) if !subscriptions.is_empty() => vec![raw],
                Ok(Outgoing::Raw(_)) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };
        for reply in replies {
            if write.send(Message::Text(reply.into())).await.is_err() {
                return;
            }
        }
    }
    let _ = write.close().await;
}

impl RelayState {
    async fn handle(&self, frame: &str, subscriptions: &mut HashMap<String, Filter>) -> Vec<String> {
        let message = match ClientMessage::from_json(frame) {
            Ok(message) => message,
            Err(e) => {
                return RelayMessage::Notice(format!("invalid: {e}"))
                    .to_json()
                    .into_iter()
                    .collect();
            }
        };
        let replies = match message {
            ClientMessage::Req {
                subscription_id,
                filter,
            } => {
                let mut replies: Vec<RelayMessage> = self
                    .events
                    .lock()
                    .await
                    .iter()
                    .filter(|event| filter.matches(event))
                    .map(|event| RelayMessage::Event {
                        subscription_id: subscription_id.clone(),
                        event: event.clone(),
                    })
                    .collect();
                replies.push(RelayMessage::EndOfStoredEvents(subscription_id.clone()));
                subscriptions.insert(subscription_id, filter);
                replies
            }
            ClientMessage::Event(event) => {
                let mut replies: Vec<RelayMessage> = self
                    .notice
                    .lock()
                    .await
                    .clone()
                    .map(RelayMessage::Notice)
                    .into_iter()
                    .collect();
                replies.push(self.accept(event).await);
                replies
            }
            ClientMessage::Close(subscription_id) => {
                debug!("Mock relay closing subscription {subscription_id}");
                subscriptions.remove(&subscription_id);
                vec![]
            }
        };
        replies
            .into_iter()
            .filter_map(|reply| reply.to_json().ok())
            .collect()
    }

    async fn accept(&self, event: SignedEvent) -> RelayMessage {
        let event_id = event.id.clone();
        if let Some(message) = self.reject.lock().await.clone() {
            return RelayMessage::Ok {
                event_id,
                accepted: false,
                message,
            };
        }
        if !event.verify() {
            return RelayMessage::Ok {
                event_id,
                accepted: false,
                message: "invalid: bad signature".to_owned(),
            };
        }
        self.events.lock().await.push(event.clone());
        let _ = self.live.send(Outgoing::Event(event));
        RelayMessage::Ok {
            event_id,
            accepted: true,
            message: String::new(),
        }
    }
}

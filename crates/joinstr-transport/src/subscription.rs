use std::collections::HashSet;

use async_broadcast::{Receiver, RecvError, Sender};
use futures::{SinkExt, StreamExt};
use joinstr_core::protocol::SignedEvent;
use log::{debug, error, info, warn};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite::Message};
use tokio_util::sync::CancellationToken;

use crate::constants::SUBSCRIPTION_CHANNEL_CAPACITY;
use crate::message::{ClientMessage, Filter, RelayMessage};

pub(crate) type RelayStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Items delivered by a subscription, in relay order
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    /// A verified event seen for the first time
    Event(SignedEvent),
    /// Historical backfill is complete. Delivered at most once.
    EndOfStoredEvents,
}

/// A live subscription on a relay connection. Events are verified, checked
/// against the filter and deduplicated by id before they are published to
/// the snapshot and the stream. Dropping the subscription closes it.
pub struct Subscription {
    id: String,
    events: watch::Receiver<Vec<SignedEvent>>,
    synced: watch::Receiver<bool>,
    stream: Receiver<SubscriptionEvent>,
    cancel: CancellationToken,
}

impl Subscription {
    /// Spawns the reader task for an already sent REQ
    pub(crate) fn spawn(id: String, filter: Filter, socket: RelayStream) -> Self {
        let (events_tx, events) = watch::channel(Vec::new());
        let (synced_tx, synced) = watch::channel(false);
        let (mut stream_tx, stream) = async_broadcast::broadcast(SUBSCRIPTION_CHANNEL_CAPACITY);
        stream_tx.set_overflow(true);
        let cancel = CancellationToken::new();

        let reader = SubscriptionReader {
            id: id.clone(),
            filter,
            seen: HashSet::new(),
            events_tx,
            synced_tx,
            stream_tx,
        };
        tokio::spawn(reader.run(socket, cancel.clone()));

        Self {
            id,
            events,
            synced,
            stream,
            cancel,
        }
    }

    /// Builds a subscription fed from the returned handle instead of a relay
    /// connection
    pub fn detached(id: &str) -> (Self, SubscriptionFeed) {
        let (events_tx, events) = watch::channel(Vec::new());
        let (synced_tx, synced) = watch::channel(false);
        let (mut stream_tx, stream) = async_broadcast::broadcast(SUBSCRIPTION_CHANNEL_CAPACITY);
        stream_tx.set_overflow(true);
        let cancel = CancellationToken::new();
        let feed = SubscriptionFeed {
            reader: SubscriptionReader {
                id: id.to_owned(),
                filter: Filter::new(),
                seen: HashSet::new(),
                events_tx,
                synced_tx,
                stream_tx,
            },
            cancel: cancel.clone(),
        };
        let subscription = Self {
            id: id.to_owned(),
            events,
            synced,
            stream,
            cancel,
        };
        (subscription, feed)
    }

    /// All events seen so far, most recent first
    pub fn snapshot(&self) -> Vec<SignedEvent> {
        self.events.borrow().clone()
    }

    pub fn is_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Waits until the relay signalled the end of stored events. Returns
    /// false if the subscription ended before that.
    pub async fn wait_for_sync(&self) -> bool {
        let mut synced = self.synced.clone();
        synced.wait_for(|s| *s).await.is_ok()
    }

    /// Next item of the subscription, None once it is closed and drained
    pub async fn next(&mut self) -> Option<SubscriptionEvent> {
        loop {
            match self.stream.recv().await {
                Ok(item) => return Some(item),
                Err(RecvError::Overflowed(skipped)) => {
                    warn!("Subscription {} lagging, skipped {skipped} items", self.id);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// An additional independent stream of items delivered from now on
    pub fn stream(&self) -> Receiver<SubscriptionEvent> {
        self.stream.new_receiver()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.stream.is_closed()
    }

    /// Closes the subscription and its connection. Safe to call repeatedly
    /// and while another task is reading.
    pub fn close(&self) {
        if !self.cancel.is_cancelled() {
            debug!("Closing subscription {}", self.id);
        }
        self.cancel.cancel();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Feeds frames into a detached subscription
pub struct SubscriptionFeed {
    reader: SubscriptionReader,
    cancel: CancellationToken,
}

impl SubscriptionFeed {
    /// Handles a raw relay frame as if it was received from a relay
    pub fn push_frame(&mut self, frame: &str) -> bool {
        self.reader.handle_frame(frame)
    }

    pub fn push_event(&mut self, event: SignedEvent) {
        self.reader.accept_event(event);
    }

    pub fn end_of_stored_events(&mut self) {
        self.reader.end_of_stored_events();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Ends the stream for all receivers
    pub fn finish(self) {
        self.reader.stream_tx.close();
    }
}

struct SubscriptionReader {
    id: String,
    filter: Filter,
    seen: HashSet<String>,
    events_tx: watch::Sender<Vec<SignedEvent>>,
    synced_tx: watch::Sender<bool>,
    stream_tx: Sender<SubscriptionEvent>,
}

impl SubscriptionReader {
    async fn run(mut self, socket: RelayStream, cancel: CancellationToken) {
        let (mut write, mut read) = socket.split();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    if let Ok(close) = ClientMessage::Close(self.id.clone()).to_json() {
                        let _ = write.send(Message::Text(close.into())).await;
                    }
                    let _ = write.close().await;
                    debug!("Subscription {} closed", self.id);
                    break;
                }
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if !self.handle_frame(&text) {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        warn!("Relay closed the connection of subscription {}", self.id);
                        break;
                    }
                    Some(Err(e)) => {
                        error!("Failed to read from relay for subscription {}: {e}", self.id);
                        break;
                    }
                    Some(Ok(_)) => {}
                },
            }
        }
        cancel.cancel();
        self.stream_tx.close();
    }

    /// Returns false once the relay ended the subscription
    fn handle_frame(&mut self, frame: &str) -> bool {
        let message = match RelayMessage::from_json(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!("Discarding malformed frame on subscription {}: {e}", self.id);
                return true;
            }
        };
        match message {
            RelayMessage::Event {
                subscription_id,
                event,
            } if subscription_id == self.id => self.accept_event(event),
            RelayMessage::EndOfStoredEvents(subscription_id) if subscription_id == self.id => {
                self.end_of_stored_events()
            }
            RelayMessage::Closed {
                subscription_id,
                message,
            } if subscription_id == self.id => {
                warn!("Relay closed subscription {}: {message}", self.id);
                return false;
            }
            RelayMessage::Notice(message) => info!("Relay notice: {message}"),
            other => debug!("Ignoring frame on subscription {}: {other:?}", self.id),
        }
        true
    }

    fn accept_event(&mut self, event: SignedEvent) {
        if !self.filter.matches(&event) {
            warn!("Discarding event {} not matching subscription {}", event.id, self.id);
            return;
        }
        if self.seen.contains(&event.id) {
            debug!("Duplicate event {} on subscription {}", event.id, self.id);
            return;
        }
        if !event.verify() {
            warn!("Discarding event {} with invalid signature", event.id);
            return;
        }
        self.seen.insert(event.id.clone());
        self.events_tx
            .send_modify(|events| events.insert(0, event.clone()));
        if let Err(e) = self.stream_tx.try_broadcast(SubscriptionEvent::Event(event)) {
            debug!("No stream receiver for subscription {}: {e}", self.id);
        }
    }

    fn end_of_stored_events(&mut self) {
        if *self.synced_tx.borrow() {
            return;
        }
        debug!("Initial sync done for subscription {}", self.id);
        self.synced_tx.send_replace(true);
        if let Err(e) = self
            .stream_tx
            .try_broadcast(SubscriptionEvent::EndOfStoredEvents)
        {
            debug!("No stream receiver for subscription {}: {e}", self.id);
        }
    }
}

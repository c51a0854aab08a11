use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use joinstr_core::{ServiceTraitBounds, protocol::SignedEvent};
use log::{debug, error, info, warn};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use crate::constants::DEFAULT_RELAY_TIMEOUT;
use crate::message::{ClientMessage, Filter, RelayMessage};
use crate::subscription::{RelayStream, Subscription, SubscriptionEvent};
use crate::{Error, Result};

/// Publishes and subscribes to events on a single relay
#[async_trait]
pub trait RelayTransportApi: ServiceTraitBounds {
    /// Sends the event and waits for the relay to accept it
    async fn publish(&self, event: &SignedEvent) -> Result<()>;

    /// Opens a live subscription for the given filter
    async fn subscribe(&self, filter: Filter) -> Result<Subscription>;

    /// Collects all stored events matching the filter, most recent first
    async fn fetch_events(&self, filter: Filter) -> Result<Vec<SignedEvent>>;
}

/// Relay client that opens a dedicated websocket per publish and per
/// subscription
#[derive(Debug, Clone)]
pub struct RelayClient {
    url: Url,
    timeout: Duration,
}

impl ServiceTraitBounds for RelayClient {}

impl RelayClient {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            timeout: DEFAULT_RELAY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn connect(&self) -> Result<RelayStream> {
        let connecting = connect_async(self.url.as_str());
        match tokio::time::timeout(self.timeout, connecting).await {
            Ok(Ok((socket, _))) => Ok(socket),
            Ok(Err(e)) => {
                error!("Could not connect to relay {}: {e}", self.url);
                Err(Error::Network(format!("connect to {}: {e}", self.url)))
            }
            Err(_) => Err(Error::Timeout(format!("connect to {}", self.url))),
        }
    }

    async fn await_ok(socket: &mut RelayStream, event_id: &str) -> Result<()> {
        while let Some(frame) = socket.next().await {
            let text = match frame {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => return Err(Error::Closed),
                Ok(_) => continue,
                Err(e) => return Err(Error::Network(e.to_string())),
            };
            match RelayMessage::from_json(&text) {
                Ok(RelayMessage::Ok {
                    event_id: id,
                    accepted,
                    message,
                }) if id == event_id => {
                    return if accepted {
                        Ok(())
                    } else {
                        Err(Error::Rejected(message))
                    };
                }
                Ok(RelayMessage::Notice(message)) => {
                    warn!("Relay notice while publishing {event_id}: {message}");
                }
                Ok(other) => debug!("Ignoring frame while publishing: {other:?}"),
                Err(e) => warn!("Discarding malformed frame while publishing: {e}"),
            }
        }
        Err(Error::Closed)
    }
}

#[async_trait]
impl RelayTransportApi for RelayClient {
    async fn publish(&self, event: &SignedEvent) -> Result<()> {
        let mut socket = self.connect().await?;
        let frame = ClientMessage::Event(event.clone()).to_json()?;
        socket
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        let result = match tokio::time::timeout(self.timeout, Self::await_ok(&mut socket, &event.id)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!("no OK for event {}", event.id))),
        };
        let _ = socket.close(None).await;

        match &result {
            Ok(()) => info!("Published event {} of kind {} to {}", event.id, event.kind, self.url),
            Err(e) => error!("Failed to publish event {} to {}: {e}", event.id, self.url),
        }
        result
    }

    async fn subscribe(&self, filter: Filter) -> Result<Subscription> {
        let mut socket = self.connect().await?;
        let subscription_id = uuid::Uuid::new_v4().simple().to_string();
        let frame = ClientMessage::Req {
            subscription_id: subscription_id.clone(),
            filter: filter.clone(),
        }
        .to_json()?;
        socket
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        debug!("Opened subscription {subscription_id} on {}", self.url);
        Ok(Subscription::spawn(subscription_id, filter, socket))
    }

    async fn fetch_events(&self, filter: Filter) -> Result<Vec<SignedEvent>> {
        let mut subscription = self.subscribe(filter).await?;
        let collect = async {
            while let Some(item) = subscription.next().await {
                if item == SubscriptionEvent::EndOfStoredEvents {
                    return true;
                }
            }
            false
        };
        let synced = tokio::time::timeout(self.timeout, collect).await;
        let events = subscription.snapshot();
        subscription.close();
        match synced {
            Ok(true) => Ok(events),
            Ok(false) => Err(Error::Closed),
            Err(_) => {
                warn!("Relay {} did not finish stored events in time, returning {} events", self.url, events.len());
                Ok(events)
            }
        }
    }
}

use async_trait::async_trait;
use dashmap::DashMap;
use metrics::counter;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use super::envelope::{Dispatcher, Envelope, Reply, ServiceFailure};

const CONSUMER_BUFFER: usize = 256;

/// Server side of an address: receives the action and body of each envelope.
#[async_trait]
pub trait Consumer: Send + Sync + 'static {
    async fn handle(&self, action: &str, body: Value) -> Reply;
}

struct Delivery {
    action: String,
    body: Value,
    respond_to: oneshot::Sender<Reply>,
}

struct Registration {
    id: Uuid,
    sender: mpsc::Sender<Delivery>,
}

/// In-process bus. Cloning shares the same address table.
#[derive(Clone, Default)]
pub struct EventBus {
    consumers: Arc<DashMap<String, Registration>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `consumer` at `address`, replacing any previous consumer.
    ///
    /// Each delivery is handled on its own task so slow calls do not hold up
    /// the ones behind them.
    pub fn register<C: Consumer>(&self, address: &str, consumer: C) -> ConsumerHandle {
        let (sender, mut receiver) = mpsc::channel::<Delivery>(CONSUMER_BUFFER);
        let id = Uuid::new_v4();
        let consumer = Arc::new(consumer);

        tokio::spawn(async move {
            while let Some(delivery) = receiver.recv().await {
                let consumer = Arc::clone(&consumer);
                tokio::spawn(async move {
                    let reply = consumer.handle(&delivery.action, delivery.body).await;
                    // The caller may have gone away; nobody is left to tell.
                    let _ = delivery.respond_to.send(reply);
                });
            }
        });

        if self
            .consumers
            .insert(address.to_string(), Registration { id, sender })
            .is_some()
        {
            tracing::warn!(address = %address, "Replaced existing bus consumer");
        }
        tracing::info!(address = %address, "Bus consumer registered");

        ConsumerHandle {
            address: address.to_string(),
            id,
            bus: self.clone(),
        }
    }

    /// Whether a consumer is currently registered at `address`.
    pub fn is_registered(&self, address: &str) -> bool {
        self.consumers.contains_key(address)
    }

    fn unregister(&self, address: &str, id: Uuid) {
        if self
            .consumers
            .remove_if(address, |_, registration| registration.id == id)
            .is_some()
        {
            tracing::info!(address = %address, "Bus consumer unregistered");
        }
    }

    async fn deliver(&self, envelope: Envelope) -> Reply {
        let sender = self
            .consumers
            .get(&envelope.address)
            .map(|registration| registration.sender.clone())
            .ok_or_else(|| ServiceFailure::no_handler(&envelope.address))?;

        let (respond_to, reply) = oneshot::channel();
        sender
            .send(Delivery {
                action: envelope.action,
                body: envelope.body,
                respond_to,
            })
            .await
            .map_err(|_| ServiceFailure::no_handler(&envelope.address))?;

        reply
            .await
            .map_err(|_| ServiceFailure::internal("Consumer dropped the reply"))?
    }
}

#[async_trait]
impl Dispatcher for EventBus {
    async fn send(&self, envelope: Envelope) -> Reply {
        let address = envelope.address.clone();
        let action = envelope.action.clone();

        let reply = self.deliver(envelope).await;

        let outcome = match &reply {
            Ok(_) => "success".to_string(),
            Err(failure) => failure.kind.to_string(),
        };
        counter!(
            "bus_requests_total",
            "address" => address,
            "action" => action,
            "outcome" => outcome
        )
        .increment(1);

        reply
    }
}

/// Keeps a consumer registration; [`ConsumerHandle::unregister`] removes it.
///
/// Dropping the handle leaves the consumer registered.
pub struct ConsumerHandle {
    address: String,
    id: Uuid,
    bus: EventBus,
}

impl ConsumerHandle {
    /// Remove the registration. A newer consumer at the same address is left
    /// in place.
    pub fn unregister(self) {
        self.bus.unregister(&self.address, self.id);
    }
}
